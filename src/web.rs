//! HTTP/WebSocket API for the dashboard, served by axum on a dedicated
//! runtime thread. The core stays thread-based; this adapter only reads
//! snapshots, issues supervisor commands and relays bus events.
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{io, net::SocketAddr, thread};
use tokio::sync::{broadcast, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::{
    api::ApiContext,
    error::NovaError,
    events::{BusEvent, EventBus, Topic},
    process::Target,
};

/// Broadcast channels bridging the event bus into WebSocket streams.
#[derive(Clone)]
pub struct WebChannels {
    metrics_tx: broadcast::Sender<String>,
    logs_tx: broadcast::Sender<String>,
}

impl WebChannels {
    /// Creates the channels and wires them to the bus.
    pub fn bridge(bus: &EventBus) -> Self {
        let (metrics_tx, _) = broadcast::channel(256);
        let (logs_tx, _) = broadcast::channel(1024);

        let metrics_sender = metrics_tx.clone();
        bus.subscribe(Topic::SystemMetric, move |event| {
            if let BusEvent::SystemMetric(sample) = event
                && let Ok(payload) = serde_json::to_string(sample)
            {
                let _ = metrics_sender.send(payload);
            }
        });

        let logs_sender = logs_tx.clone();
        bus.subscribe(Topic::Log, move |event| {
            if let BusEvent::Log(line) = event
                && let Ok(payload) = serde_json::to_string(line)
            {
                let _ = logs_sender.send(payload);
            }
        });

        Self { metrics_tx, logs_tx }
    }
}

#[derive(Clone)]
struct WebState {
    ctx: ApiContext,
    channels: WebChannels,
}

/// Background HTTP server.
pub struct WebServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WebServer {
    /// Binds `addr` and serves the API until stopped.
    pub fn spawn(addr: SocketAddr, ctx: ApiContext, channels: WebChannels) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (bound_tx, bound_rx) = std::sync::mpsc::channel::<io::Result<()>>();

        let state = WebState { ctx, channels };
        let handle = thread::Builder::new()
            .name("nova-web".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = bound_tx.send(Err(err));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::bind(addr).await {
                        Ok(listener) => {
                            let _ = bound_tx.send(Ok(()));
                            listener
                        }
                        Err(err) => {
                            let _ = bound_tx.send(Err(err));
                            return;
                        }
                    };
                    info!("web api listening on http://{addr}");

                    let app = router(state);
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(err) = result {
                        error!("web server failed: {err}");
                    }
                });
            })?;

        bound_rx
            .recv()
            .map_err(|_| io::Error::other("web server thread died during bind"))??;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stops the server and joins its thread.
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/v1/processes", get(list_processes).post(create_process))
        .route("/api/v1/processes/:id", get(process_info).delete(delete_process))
        .route("/api/v1/processes/:id/restart", put(restart_process))
        .route("/api/v1/processes/:id/stop", put(stop_process))
        .route("/api/v1/metrics", get(latest_metrics))
        .route("/api/v1/metrics/:id", get(process_metrics))
        .route("/api/v1/system", get(system_metrics))
        .route("/api/v1/logs", get(all_logs))
        .route("/api/v1/logs/:id", get(process_logs))
        .route("/api/v1/health", get(daemon_health))
        .route("/ws/metrics", get(ws_metrics))
        .route("/ws/logs", get(ws_logs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps a core error onto an HTTP status plus a `{error: {kind, message}}`
/// body.
fn error_response(err: NovaError) -> Response {
    let status = match &err {
        NovaError::ProcessNotFound(_) => StatusCode::NOT_FOUND,
        NovaError::ProcessAlreadyExists(_) => StatusCode::CONFLICT,
        NovaError::ProcessNotRunning(_) => StatusCode::CONFLICT,
        NovaError::ConfigValidation(_) => StatusCode::BAD_REQUEST,
        NovaError::Serde(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({"error": {"kind": err.kind(), "message": err.to_string()}});
    (status, Json(body)).into_response()
}

async fn run_dispatch(ctx: ApiContext, method: &'static str, params: Value) -> Response {
    let result =
        tokio::task::spawn_blocking(move || ctx.dispatch(method, &params)).await;
    match result {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn list_processes(State(state): State<WebState>) -> Response {
    run_dispatch(state.ctx, "process.list", Value::Null).await
}

async fn create_process(State(state): State<WebState>, Json(body): Json<Value>) -> Response {
    run_dispatch(state.ctx, "process.start", json!({"spec": body})).await
}

async fn process_info(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    run_dispatch(state.ctx, "process.info", json!({"target": id})).await
}

async fn delete_process(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    run_dispatch(state.ctx, "process.delete", json!({"target": id})).await
}

async fn restart_process(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    run_dispatch(state.ctx, "process.restart", json!({"target": id})).await
}

async fn stop_process(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    run_dispatch(state.ctx, "process.stop", json!({"target": id})).await
}

async fn latest_metrics(State(state): State<WebState>) -> Response {
    let ctx = state.ctx;
    let result = tokio::task::spawn_blocking(move || -> Result<Value, NovaError> {
        let views = ctx.supervisor.list()?;
        let entries: Vec<Value> = views
            .iter()
            .map(|view| {
                let samples = ctx.metrics.latest_for(view.id);
                json!({"id": view.id, "name": view.name, "samples": samples})
            })
            .collect();
        Ok(json!({"processes": entries}))
    })
    .await;
    match result {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Deserialize)]
struct RangeQuery {
    start: Option<i64>,
    end: Option<i64>,
}

async fn process_metrics(
    State(state): State<WebState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Response {
    let ctx = state.ctx;
    let result = tokio::task::spawn_blocking(move || -> Result<Value, NovaError> {
        let view = ctx.supervisor.info(Target::parse(&id))?;
        let start = range.start.unwrap_or(0);
        let end = range.end.unwrap_or_else(|| Utc::now().timestamp());
        let samples = ctx.store.metrics_range(view.id, start, end)?;
        Ok(json!({"id": view.id, "name": view.name, "samples": samples}))
    })
    .await;
    match result {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn system_metrics(State(state): State<WebState>) -> Response {
    run_dispatch(state.ctx, "metrics.system", Value::Null).await
}

#[derive(Deserialize)]
struct LinesQuery {
    lines: Option<usize>,
}

async fn all_logs(State(state): State<WebState>, Query(query): Query<LinesQuery>) -> Response {
    let ctx = state.ctx;
    let lines = query.lines.unwrap_or(50);
    let result = tokio::task::spawn_blocking(move || -> Result<Value, NovaError> {
        let views = ctx.supervisor.list()?;
        let entries: Vec<Value> = views
            .iter()
            .map(|view| {
                let recent = ctx.logs.recent(view.id, lines);
                json!({"id": view.id, "name": view.name, "lines": recent})
            })
            .collect();
        Ok(json!({"processes": entries}))
    })
    .await;
    match result {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn process_logs(
    State(state): State<WebState>,
    Path(id): Path<String>,
    Query(query): Query<LinesQuery>,
) -> Response {
    let lines = query.lines.unwrap_or(50);
    run_dispatch(
        state.ctx,
        "logs.recent",
        json!({"target": id, "lines": lines}),
    )
    .await
}

async fn daemon_health(State(state): State<WebState>) -> Response {
    let ctx = state.ctx;
    let result = tokio::task::spawn_blocking(move || -> Result<Value, NovaError> {
        let views = ctx.supervisor.list()?;
        let mut health = serde_json::Map::new();
        {
            let guard = ctx.health.read().unwrap_or_else(|e| e.into_inner());
            for (id, state) in guard.iter() {
                health.insert(
                    id.to_string(),
                    serde_json::to_value(state).unwrap_or(Value::Null),
                );
            }
        }
        let health = Value::Object(health);
        Ok(json!({
            "status": "ok",
            "uptime_secs": (Utc::now() - ctx.started_at).num_seconds(),
            "processes": views.len(),
            "health": health,
        }))
    })
    .await;
    match result {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn ws_metrics(State(state): State<WebState>, upgrade: WebSocketUpgrade) -> Response {
    let rx = state.channels.metrics_tx.subscribe();
    upgrade.on_upgrade(move |socket| stream_broadcast(socket, rx))
}

async fn ws_logs(State(state): State<WebState>, upgrade: WebSocketUpgrade) -> Response {
    let rx = state.channels.logs_tx.subscribe();
    upgrade.on_upgrade(move |socket| stream_broadcast(socket, rx))
}

/// Forwards broadcast payloads to one WebSocket client until it disconnects.
async fn stream_broadcast(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    loop {
        match rx.recv().await {
            Ok(payload) => {
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Slow consumer: drop the backlog and keep streaming.
                tracing::debug!("websocket client lagged, skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        let not_found = error_response(NovaError::ProcessNotFound("x".into()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let duplicate = error_response(NovaError::ProcessAlreadyExists("x".into()));
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let invalid = error_response(NovaError::ConfigValidation(vec!["bad".into()]));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let broken = error_response(NovaError::SupervisorGone);
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn channels_fan_out_system_metrics() {
        let bus = EventBus::new();
        let channels = WebChannels::bridge(&bus);
        let mut rx = channels.metrics_tx.subscribe();

        bus.publish(BusEvent::SystemMetric(crate::process::SystemSample {
            ts: 1,
            cpu: 12.5,
            memory_total: 100,
            memory_used: 50,
            load: [0.1, 0.2, 0.3],
        }));

        let payload = rx.try_recv().unwrap();
        assert!(payload.contains("12.5"));
    }
}
