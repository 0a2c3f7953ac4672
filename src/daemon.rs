//! Daemon bootstrap: wires the persistence layer, event bus, log aggregator,
//! supervisor, monitors and adapters together, then waits for shutdown.
use fs2::FileExt;
use std::{
    fs::{self, OpenOptions},
    io::{Read, Seek, Write},
    net::SocketAddr,
    path::Path,
    sync::{Arc, mpsc},
};
use tracing::{info, warn};

use crate::{
    api::ApiContext,
    error::NovaError,
    events::EventBus,
    health::HealthMonitor,
    home,
    ipc::IpcServer,
    logs::LogAggregator,
    metrics::{Downsampler, MetricsCollector, MetricsHandle, MetricsSettings},
    store::Store,
    supervisor::Supervisor,
    web::{WebChannels, WebServer},
};

/// Default bind address of the HTTP/WebSocket API.
pub const DEFAULT_WEB_ADDR: &str = "127.0.0.1:9615";

/// Daemon start-up options.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Bind address for the web API; `None` disables it.
    pub web_addr: Option<SocketAddr>,
    /// Metrics tuning, overridable in tests.
    pub metrics: MetricsSettings,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            web_addr: DEFAULT_WEB_ADDR.parse().ok(),
            metrics: MetricsSettings::default(),
        }
    }
}

/// Exclusive daemon PID file. Held for the daemon's lifetime; the advisory
/// lock makes stale files from crashed daemons harmless.
#[derive(Debug)]
struct PidFile {
    file: std::fs::File,
    path: std::path::PathBuf,
}

impl PidFile {
    fn acquire(path: &Path) -> Result<Self, NovaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            let mut contents = String::new();
            let _ = file.read_to_string(&mut contents);
            let pid = contents.trim().parse::<u32>().unwrap_or(0);
            return Err(NovaError::DaemonAlreadyRunning(pid));
        }

        file.set_len(0)?;
        file.rewind()?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Reads the recorded daemon PID, if any.
pub fn read_pid() -> Option<u32> {
    let contents = fs::read_to_string(home::pid_path()).ok()?;
    contents.trim().parse().ok()
}

/// Whether a daemon process appears to be alive.
pub fn daemon_running() -> bool {
    let Some(pid) = read_pid() else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Runs the daemon until a shutdown signal arrives.
pub fn run(options: DaemonOptions) -> Result<(), NovaError> {
    home::ensure_dirs()?;
    let pid_file = PidFile::acquire(&home::pid_path())?;
    info!("novapm daemon starting (pid {})", std::process::id());

    let store = Arc::new(Store::open(&home::db_path())?);
    let bus = EventBus::new();
    let logs = LogAggregator::new(home::log_dir(), bus.clone());
    let supervisor = Supervisor::spawn(Arc::clone(&store), bus.clone(), logs.clone());

    let restored = supervisor.restore()?;
    if restored > 0 {
        info!("restored {restored} process(es) from persistence");
    }

    let metrics = MetricsHandle::default();
    let collector = MetricsCollector::spawn(
        supervisor.snapshot(),
        supervisor.clone(),
        Arc::clone(&store),
        bus.clone(),
        metrics.clone(),
        options.metrics.clone(),
    );
    let downsampler = Downsampler::spawn(Arc::clone(&store), options.metrics.clone());
    let health = HealthMonitor::spawn(
        supervisor.snapshot(),
        supervisor.clone(),
        Arc::clone(&store),
        bus.clone(),
    );

    let ctx = ApiContext {
        supervisor: supervisor.clone(),
        store: Arc::clone(&store),
        logs: logs.clone(),
        metrics: metrics.clone(),
        health: health.states(),
        started_at: chrono::Utc::now(),
    };

    let ipc = IpcServer::spawn(home::socket_path(), ctx.clone())?;
    let web = match options.web_addr {
        Some(addr) => {
            let channels = WebChannels::bridge(&bus);
            match WebServer::spawn(addr, ctx, channels) {
                Ok(server) => Some(server),
                Err(err) => {
                    warn!("web api disabled: failed to bind {addr}: {err}");
                    None
                }
            }
        }
        None => None,
    };

    // Park until SIGINT/SIGTERM.
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|err| {
        NovaError::IpcConnection(format!("failed to install signal handler: {err}"))
    })?;
    let _ = shutdown_rx.recv();
    info!("shutdown requested; stopping managed processes");

    // Teardown in reverse dependency order. Timers first so nothing keeps
    // the process alive past shutdown.
    health.stop();
    collector.stop();
    downsampler.stop();
    if let Err(err) = supervisor.shutdown() {
        warn!("supervisor shutdown failed: {err}");
    }
    ipc.stop();
    if let Some(web) = web {
        web.stop();
    }
    logs.flush();
    drop(pid_file);
    info!("novapm daemon stopped");
    Ok(())
}
