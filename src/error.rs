//! Error handling for novapm.
use thiserror::Error;

/// Defines all possible errors that can occur in the process manager.
#[derive(Debug, Error)]
pub enum NovaError {
    /// Target resolves to no process record.
    #[error("process not found: '{0}'")]
    ProcessNotFound(String),

    /// `start` was issued with a name that already exists.
    #[error("process already exists: '{0}'")]
    ProcessAlreadyExists(String),

    /// A command required a live child process and none exists.
    #[error("process '{0}' is not running")]
    ProcessNotRunning(String),

    /// The daemon is not running (no socket / stale PID file).
    #[error("daemon not running")]
    DaemonNotRunning,

    /// A second daemon attempted to start over a live PID file.
    #[error("daemon already running (pid {0})")]
    DaemonAlreadyRunning(u32),

    /// A process spec failed schema checks; carries per-field messages.
    #[error("config validation failed: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    /// Failed to connect to the daemon control socket.
    #[error("ipc connection failed: {0}")]
    IpcConnection(String),

    /// The daemon did not respond within the IPC deadline.
    #[error("ipc request timed out")]
    IpcTimeout,

    /// The OS refused to fork/exec a child.
    #[error("failed to spawn process '{name}': {source}")]
    SpawnError {
        /// The process name that failed to spawn.
        name: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The restart budget was exhausted for a crash streak.
    #[error("process '{0}' exceeded its restart limit")]
    MaxRestartsExceeded(String),

    /// I/O error from the filesystem or a socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("invalid YAML format: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Persistence layer error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Error serialising or deserialising JSON payloads.
    #[error("failed to serialise payload: {0}")]
    Serde(#[from] serde_json::Error),

    /// The supervisor command loop is gone; the daemon is shutting down.
    #[error("supervisor unavailable")]
    SupervisorGone,
}

impl NovaError {
    /// Stable machine-readable tag for the adapter boundary (IPC and HTTP).
    pub fn kind(&self) -> &'static str {
        match self {
            NovaError::ProcessNotFound(_) => "process-not-found",
            NovaError::ProcessAlreadyExists(_) => "process-already-exists",
            NovaError::ProcessNotRunning(_) => "process-not-running",
            NovaError::DaemonNotRunning => "daemon-not-running",
            NovaError::DaemonAlreadyRunning(_) => "daemon-already-running",
            NovaError::ConfigValidation(_) => "config-validation",
            NovaError::IpcConnection(_) => "ipc-connection",
            NovaError::IpcTimeout => "ipc-timeout",
            NovaError::SpawnError { .. } => "spawn-error",
            NovaError::MaxRestartsExceeded(_) => "max-restarts-exceeded",
            NovaError::Io(_) => "io",
            NovaError::ConfigParse(_) => "config-parse",
            NovaError::Store(_) => "store",
            NovaError::Serde(_) => "serde",
            NovaError::SupervisorGone => "supervisor-gone",
        }
    }

    /// Rebuilds a typed error from an adapter `{kind, message}` pair.
    ///
    /// Kinds that do not travel across the wire collapse into the IPC
    /// connection variant so callers still get a sensible message.
    pub fn from_wire(kind: &str, message: &str) -> Self {
        match kind {
            "process-not-found" => NovaError::ProcessNotFound(message.to_string()),
            "process-already-exists" => {
                NovaError::ProcessAlreadyExists(message.to_string())
            }
            "process-not-running" => NovaError::ProcessNotRunning(message.to_string()),
            "daemon-not-running" => NovaError::DaemonNotRunning,
            "config-validation" => {
                NovaError::ConfigValidation(vec![message.to_string()])
            }
            "max-restarts-exceeded" => {
                NovaError::MaxRestartsExceeded(message.to_string())
            }
            _ => NovaError::IpcConnection(format!("{kind}: {message}")),
        }
    }
}

/// Error type for the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row violated the unique index on `processes.name`.
    #[error("duplicate process name '{0}'")]
    DuplicateName(String),

    /// A row lookup by id found nothing.
    #[error("no process row with id {0}")]
    MissingRow(i64),

    /// A persisted column could not be decoded.
    #[error("failed to decode persisted value: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(NovaError::ProcessNotFound("x".into()).kind(), "process-not-found");
        assert_eq!(NovaError::DaemonNotRunning.kind(), "daemon-not-running");
        assert_eq!(
            NovaError::ConfigValidation(vec!["name: empty".into()]).kind(),
            "config-validation"
        );
        assert_eq!(
            NovaError::MaxRestartsExceeded("api".into()).kind(),
            "max-restarts-exceeded"
        );
    }

    #[test]
    fn wire_round_trip_preserves_known_kinds() {
        let err = NovaError::ProcessAlreadyExists("api".into());
        let back = NovaError::from_wire(err.kind(), "api");
        assert!(matches!(back, NovaError::ProcessAlreadyExists(name) if name == "api"));
    }

    #[test]
    fn unknown_wire_kind_degrades_to_ipc_connection() {
        let back = NovaError::from_wire("mystery", "boom");
        assert!(matches!(back, NovaError::IpcConnection(msg) if msg.contains("mystery")));
    }

    #[test]
    fn validation_errors_join_messages() {
        let err = NovaError::ConfigValidation(vec![
            "name: must not be empty".into(),
            "instances: must be positive".into(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("name: must not be empty"));
        assert!(rendered.contains("instances: must be positive"));
    }
}
