mod common;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::Utc;
use common::{Harness, shell_spec, wait_until};
use novapm::{
    api::ApiContext,
    error::NovaError,
    ipc::{IpcClient, IpcServer},
    metrics::MetricsHandle,
};
use serde_json::{Value, json};

struct IpcHarness {
    _harness: Harness,
    _server: IpcServer,
    socket: std::path::PathBuf,
}

impl IpcHarness {
    fn new() -> Self {
        let harness = Harness::new();
        let socket = harness.dir.path().join("nova.sock");

        let ctx = ApiContext {
            supervisor: harness.supervisor.clone(),
            store: Arc::clone(&harness.store),
            logs: harness.logs.clone(),
            metrics: MetricsHandle::default(),
            health: Arc::new(RwLock::new(HashMap::new())),
            started_at: Utc::now(),
        };
        let server = IpcServer::spawn(socket.clone(), ctx).unwrap();

        Self {
            _harness: harness,
            _server: server,
            socket,
        }
    }

    fn client(&self) -> IpcClient {
        IpcClient::connect(&self.socket).unwrap()
    }
}

#[test]
fn ping_answers_with_daemon_pid() {
    let ipc = IpcHarness::new();
    let mut client = ipc.client();

    let result = client.request("daemon.ping", Value::Null).unwrap();
    assert_eq!(result["pong"], json!(true));
    assert_eq!(result["pid"], json!(std::process::id()));
}

#[test]
fn full_lifecycle_over_the_socket() {
    let ipc = IpcHarness::new();
    let mut client = ipc.client();

    let spec = shell_spec("sock", "sleep 60");
    let result = client
        .request("process.start", json!({"spec": spec}))
        .unwrap();
    assert_eq!(result["processes"][0]["name"], json!("sock"));

    wait_until(Duration::from_secs(20), || {
        let list = ipc
            .client()
            .request("process.list", Value::Null)
            .unwrap();
        list["processes"][0]["status"] == json!("online")
    });

    let info = client
        .request("process.info", json!({"target": "sock"}))
        .unwrap();
    assert_eq!(info["name"], json!("sock"));
    assert!(info["pid"].as_u64().is_some());
    assert!(info["containers"].is_array());

    let logs = client
        .request("logs.recent", json!({"target": "sock", "lines": 5}))
        .unwrap();
    assert_eq!(logs["process"], json!("sock"));

    let stopped = client
        .request("process.stop", json!({"target": "sock"}))
        .unwrap();
    assert!(stopped["processes"].is_array());
    wait_until(Duration::from_secs(20), || {
        let list = ipc
            .client()
            .request("process.list", Value::Null)
            .unwrap();
        list["processes"][0]["status"] == json!("stopped")
    });

    client
        .request("process.delete", json!({"target": "sock"}))
        .unwrap();
    wait_until(Duration::from_secs(20), || {
        let list = ipc
            .client()
            .request("process.list", Value::Null)
            .unwrap();
        list["processes"].as_array().map(Vec::is_empty).unwrap_or(false)
    });
}

#[test]
fn unknown_target_maps_to_typed_error() {
    let ipc = IpcHarness::new();
    let mut client = ipc.client();

    let err = client
        .request("process.info", json!({"target": "ghost"}))
        .unwrap_err();
    assert!(matches!(err, NovaError::ProcessNotFound(_)));
}

#[test]
fn unknown_method_is_rejected() {
    let ipc = IpcHarness::new();
    let mut client = ipc.client();

    let err = client.request("daemon.explode", Value::Null).unwrap_err();
    assert!(matches!(err, NovaError::IpcConnection(msg) if msg.contains("unknown method")));
}

#[test]
fn metrics_system_returns_a_sample_shape() {
    let ipc = IpcHarness::new();
    let mut client = ipc.client();

    let result = client.request("metrics.system", Value::Null).unwrap();
    assert!(result.get("cpu").is_some());
    assert!(result.get("memory_total").is_some());
    assert!(result.get("load").is_some());
}

#[test]
fn requests_on_one_connection_are_correlated() {
    let ipc = IpcHarness::new();
    let mut client = ipc.client();

    for _ in 0..5 {
        let result = client.request("daemon.ping", Value::Null).unwrap();
        assert_eq!(result["pong"], json!(true));
    }
}
