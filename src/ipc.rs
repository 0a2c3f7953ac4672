//! Local control channel: newline-delimited JSON request/response over a
//! Unix-domain socket (`nova.sock`).
//!
//! Framing: `{id, method, params}` in, `{id, result}` or `{id, error}` out,
//! one object per line.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs, io,
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use tracing::{debug, error, warn};

use crate::{api::ApiContext, error::NovaError};

/// Default deadline for one request/response round trip on the client side.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One request frame on the control channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation id, echoed back verbatim.
    #[serde(default)]
    pub id: Value,
    /// Method name, e.g. `process.start`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// One response frame on the control channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id copied from the request.
    #[serde(default)]
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Error payload carried on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireError {
    /// Stable error kind tag (see the error taxonomy).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// Background IPC server owning the listening socket.
pub struct IpcServer {
    stop: Arc<AtomicBool>,
    socket_path: PathBuf,
    handle: Option<thread::JoinHandle<()>>,
}

impl IpcServer {
    /// Binds the socket and starts the accept loop.
    pub fn spawn(socket_path: PathBuf, ctx: ApiContext) -> io::Result<Self> {
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("nova-ipc".to_string())
            .spawn(move || {
                while !stop_clone.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _addr)) => {
                            let ctx = ctx.clone();
                            thread::spawn(move || serve_connection(stream, ctx));
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(50));
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            error!("ipc accept failed: {err}");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop,
            socket_path,
            handle: Some(handle),
        })
    }

    /// Stops the accept loop and removes the socket file.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if self.socket_path.exists() {
            let _ = fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serves requests on one accepted connection until EOF.
fn serve_connection(stream: UnixStream, ctx: ApiContext) {
    let reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(err) => {
            warn!("failed to clone ipc stream: {err}");
            return;
        }
    };
    let mut writer = stream;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("ipc request: {}", request.method);
                let id = request.id.clone();
                match ctx.dispatch(&request.method, &request.params) {
                    Ok(result) => Response {
                        id,
                        result: Some(result),
                        error: None,
                    },
                    Err(err) => Response {
                        id,
                        result: None,
                        error: Some(WireError {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        }),
                    },
                }
            }
            Err(err) => Response {
                id: Value::Null,
                result: None,
                error: Some(WireError {
                    kind: "ipc-connection".to_string(),
                    message: format!("malformed request: {err}"),
                }),
            },
        };

        let Ok(mut payload) = serde_json::to_vec(&response) else {
            break;
        };
        payload.push(b'\n');
        if writer.write_all(&payload).and_then(|_| writer.flush()).is_err() {
            break;
        }
    }
}

/// Client side of the control channel, used by the CLI.
#[derive(Debug)]
pub struct IpcClient {
    stream: UnixStream,
    next_id: u64,
}

impl IpcClient {
    /// Connects to the daemon socket.
    pub fn connect(socket_path: &Path) -> Result<Self, NovaError> {
        if !socket_path.exists() {
            return Err(NovaError::DaemonNotRunning);
        }
        let stream = UnixStream::connect(socket_path).map_err(|err| {
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) {
                NovaError::DaemonNotRunning
            } else {
                NovaError::IpcConnection(err.to_string())
            }
        })?;
        stream
            .set_read_timeout(Some(CLIENT_TIMEOUT))
            .map_err(|err| NovaError::IpcConnection(err.to_string()))?;
        Ok(Self { stream, next_id: 0 })
    }

    /// Sends one request and waits for its response.
    pub fn request(&mut self, method: &str, params: Value) -> Result<Value, NovaError> {
        self.next_id += 1;
        let request = Request {
            id: Value::from(self.next_id),
            method: method.to_string(),
            params,
        };
        let mut payload = serde_json::to_vec(&request)?;
        payload.push(b'\n');
        self.stream
            .write_all(&payload)
            .and_then(|_| self.stream.flush())
            .map_err(|err| NovaError::IpcConnection(err.to_string()))?;

        let mut reader = BufReader::new(&self.stream);
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return Err(NovaError::IpcConnection("connection closed".into())),
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(NovaError::IpcTimeout);
            }
            Err(err) => return Err(NovaError::IpcConnection(err.to_string())),
        }

        let response: Response = serde_json::from_str(line.trim())?;
        if let Some(error) = response.error {
            return Err(NovaError::from_wire(&error.kind, &error.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frames_round_trip() {
        let request = Request {
            id: json!(7),
            method: "process.list".to_string(),
            params: json!({"target": "all"}),
        };
        let line = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(back.method, "process.list");
        assert_eq!(back.id, json!(7));
        assert_eq!(back.params["target"], json!("all"));
    }

    #[test]
    fn response_omits_empty_sides() {
        let ok = Response {
            id: json!(1),
            result: Some(json!({"pong": true})),
            error: None,
        };
        let line = serde_json::to_string(&ok).unwrap();
        assert!(line.contains("result"));
        assert!(!line.contains("error"));

        let failed = Response {
            id: json!(2),
            result: None,
            error: Some(WireError {
                kind: "process-not-found".to_string(),
                message: "no such process".to_string(),
            }),
        };
        let line = serde_json::to_string(&failed).unwrap();
        assert!(!line.contains("result"));
        assert!(line.contains("process-not-found"));
    }

    #[test]
    fn missing_params_defaults_to_null() {
        let back: Request =
            serde_json::from_str("{\"id\":1,\"method\":\"daemon.ping\"}").unwrap();
        assert_eq!(back.params, Value::Null);
    }

    #[test]
    fn connect_without_socket_reports_daemon_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let err = IpcClient::connect(&path).unwrap_err();
        assert!(matches!(err, NovaError::DaemonNotRunning));
    }
}
