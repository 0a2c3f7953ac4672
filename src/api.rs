//! Shared adapter surface: the method dispatch consumed by the local control
//! channel and reused by the HTTP API.
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::{
    config::ProcessSpec,
    error::NovaError,
    health::HealthStates,
    home,
    logs::LogAggregator,
    metrics::MetricsHandle,
    process::{ProcessView, ScaleArg, Target},
    store::Store,
    supervisor::SupervisorHandle,
};

/// Everything an adapter needs to serve requests.
#[derive(Clone)]
pub struct ApiContext {
    pub supervisor: SupervisorHandle,
    pub store: Arc<Store>,
    pub logs: LogAggregator,
    pub metrics: MetricsHandle,
    pub health: HealthStates,
    pub started_at: DateTime<Utc>,
}

impl ApiContext {
    /// Dispatches one control-channel method.
    pub fn dispatch(&self, method: &str, params: &Value) -> Result<Value, NovaError> {
        match method {
            "daemon.ping" => Ok(json!({
                "pong": true,
                "pid": std::process::id(),
                "uptime_secs": (Utc::now() - self.started_at).num_seconds(),
            })),
            "daemon.save" => {
                let count = self.supervisor.save(home::dump_path())?;
                Ok(json!({"saved": count}))
            }
            "daemon.resurrect" => {
                let count = self.supervisor.resurrect(home::dump_path())?;
                Ok(json!({"started": count}))
            }
            "process.start" => {
                if let Some(spec_value) = params.get("spec") {
                    let spec: ProcessSpec = serde_json::from_value(spec_value.clone())?;
                    let view = self.supervisor.start(spec)?;
                    Ok(json!({"processes": [self.summarize(&view)]}))
                } else {
                    let target = self.param_target(params)?;
                    let views = self.supervisor.start_existing(target)?;
                    Ok(self.summaries(&views))
                }
            }
            "process.stop" => {
                let target = self.param_target(params)?;
                let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);
                let views = self.supervisor.stop(target, force)?;
                Ok(self.summaries(&views))
            }
            "process.restart" => {
                let target = self.param_target(params)?;
                let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);
                let views = self.supervisor.restart(target, force)?;
                Ok(self.summaries(&views))
            }
            "process.delete" => {
                let target = self.param_target(params)?;
                let views = self.supervisor.delete(target)?;
                Ok(self.summaries(&views))
            }
            "process.list" => {
                let views = self.supervisor.list()?;
                Ok(self.summaries(&views))
            }
            "process.info" => {
                let target = self.param_target(params)?;
                let view = self.supervisor.info(target)?;
                Ok(self.detail(&view))
            }
            "process.scale" => {
                let target = self.param_target(params)?;
                let raw = params
                    .get("instances")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        NovaError::ConfigValidation(vec![
                            "instances: missing scale argument".to_string(),
                        ])
                    })?;
                let arg: ScaleArg = raw
                    .parse()
                    .map_err(|msg: String| NovaError::ConfigValidation(vec![msg]))?;
                let view = self.supervisor.scale(target, arg)?;
                Ok(self.detail(&view))
            }
            "process.reset" => {
                let target = self.param_target(params)?;
                let views = self.supervisor.reset(target)?;
                Ok(self.summaries(&views))
            }
            "logs.recent" => {
                let target = self.param_target(params)?;
                let lines = params
                    .get("lines")
                    .and_then(Value::as_u64)
                    .unwrap_or(50) as usize;
                let view = self.supervisor.info(target)?;
                let recent = self.logs.recent(view.id, lines);
                Ok(json!({"process": view.name, "lines": recent}))
            }
            "metrics.system" => Ok(serde_json::to_value(self.metrics.system())?),
            other => Err(NovaError::IpcConnection(format!(
                "unknown method '{other}'"
            ))),
        }
    }

    fn param_target(&self, params: &Value) -> Result<Target, NovaError> {
        let raw = params
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                NovaError::ConfigValidation(vec!["target: missing".to_string()])
            })?;
        Ok(Target::parse(raw))
    }

    fn summaries(&self, views: &[ProcessView]) -> Value {
        let entries: Vec<Value> = views.iter().map(|v| self.summarize(v)).collect();
        json!({"processes": entries})
    }

    /// One-line summary of a process for listings.
    pub fn summarize(&self, view: &ProcessView) -> Value {
        let (cpu, memory) = self.metrics.aggregate_for(view.id);
        let uptime_secs = view
            .containers
            .iter()
            .filter_map(|c| c.started_at)
            .min()
            .map(|t| (Utc::now() - t).num_seconds().max(0));
        json!({
            "id": view.id,
            "name": view.name,
            "status": view.status,
            "exec_mode": view.exec_mode,
            "instances": view.instances,
            "pid": view.primary_pid(),
            "restarts": view.restarts,
            "cpu": cpu,
            "memory": memory,
            "uptime_secs": uptime_secs,
        })
    }

    /// Detailed view of a process: containers, health, latest samples.
    pub fn detail(&self, view: &ProcessView) -> Value {
        let health = {
            let guard = self.health.read().unwrap_or_else(|e| e.into_inner());
            guard.get(&view.id).cloned()
        };
        let mut value = self.summarize(view);
        if let Value::Object(map) = &mut value {
            map.insert(
                "containers".to_string(),
                serde_json::to_value(&view.containers).unwrap_or(Value::Null),
            );
            map.insert(
                "health".to_string(),
                serde_json::to_value(health).unwrap_or(Value::Null),
            );
            map.insert(
                "metrics".to_string(),
                serde_json::to_value(self.metrics.latest_for(view.id))
                    .unwrap_or(Value::Null),
            );
        }
        value
    }
}
