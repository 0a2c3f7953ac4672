//! Core types shared by the supervisor, the store and the adapters.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use strum_macros::AsRefStr;

use crate::config::ProcessSpec;

/// Identifier assigned to a process record by the persistence layer.
pub type ProcessId = i64;

/// Lifecycle status of a managed process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProcessStatus {
    /// A spawn is in flight.
    Launching,
    /// The child is running.
    Online,
    /// SIGINT has been sent; waiting for the child to exit.
    Stopping,
    /// The child exited and no respawn is pending.
    Stopped,
    /// The restart budget is exhausted; requires `reset`.
    Errored,
    /// A respawn timer is armed.
    WaitingRestart,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl ProcessStatus {
    /// Decodes the persisted kebab-case form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "launching" => Some(Self::Launching),
            "online" => Some(Self::Online),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "errored" => Some(Self::Errored),
            "waiting-restart" => Some(Self::WaitingRestart),
            _ => None,
        }
    }
}

/// Lifecycle event types recorded in the event log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventType {
    Start,
    Stop,
    Restart,
    Error,
    Exit,
    Crash,
    Online,
    HealthCheckFail,
    HealthCheckRestore,
    Scaling,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl EventType {
    /// Decodes the persisted kebab-case form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "error" => Some(Self::Error),
            "exit" => Some(Self::Exit),
            "crash" => Some(Self::Crash),
            "online" => Some(Self::Online),
            "health-check-fail" => Some(Self::HealthCheckFail),
            "health-check-restore" => Some(Self::HealthCheckRestore),
            "scaling" => Some(Self::Scaling),
            _ => None,
        }
    }
}

/// Persistent process record: the spec plus volatile runtime fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Identifier assigned by the store.
    pub id: ProcessId,
    /// Declarative definition.
    pub spec: ProcessSpec,
    /// Last persisted status.
    pub status: ProcessStatus,
    /// PID of instance 0 while online.
    pub pid: Option<u32>,
    /// Time the process last went online.
    pub started_at: Option<DateTime<Utc>>,
    /// Lifetime restart counter; reset only by an explicit `reset`.
    pub restarts: u32,
    /// Time the record was created.
    pub created_at: DateTime<Utc>,
}

/// One row of the persistent event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Row id, when read back from the store.
    #[serde(default)]
    pub id: i64,
    /// Process the event belongs to.
    pub process_id: ProcessId,
    /// Denormalised process name at event time.
    pub process_name: String,
    /// Event type.
    pub event_type: EventType,
    /// Structured payload (instance index, exit code, reason, ...).
    #[serde(default)]
    pub data: serde_json::Value,
    /// Event time.
    pub ts: DateTime<Utc>,
}

impl EventRecord {
    /// Builds an event stamped with the current time.
    pub fn now(
        process_id: ProcessId,
        process_name: &str,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            process_id,
            process_name: process_name.to_string(),
            event_type,
            data,
            ts: Utc::now(),
        }
    }
}

/// One persisted metric sample for a process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Process the sample belongs to.
    pub process_id: ProcessId,
    /// Sample time, seconds since the epoch.
    pub ts: i64,
    /// CPU percent, aggregated across cores.
    pub cpu: f64,
    /// Resident set size in bytes.
    pub memory: u64,
    /// Runtime-reported heap usage, when the child reports it.
    pub heap_used: Option<u64>,
    /// Runtime-reported heap capacity.
    pub heap_total: Option<u64>,
    /// Runtime-reported event loop latency in milliseconds.
    pub event_loop_latency: Option<f64>,
    /// Runtime-reported open handle count.
    pub active_handles: Option<u64>,
    /// Runtime-reported in-flight request count.
    pub active_requests: Option<u64>,
}

impl MetricSample {
    /// Sample carrying only what the OS PID sampler can observe.
    pub fn os(process_id: ProcessId, ts: i64, cpu: f64, memory: u64) -> Self {
        Self {
            process_id,
            ts,
            cpu,
            memory,
            heap_used: None,
            heap_total: None,
            event_loop_latency: None,
            active_handles: None,
            active_requests: None,
        }
    }
}

/// System-wide sample served by `metrics.system` and the metrics stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSample {
    /// Sample time, seconds since the epoch.
    pub ts: i64,
    /// Whole-machine CPU percent.
    pub cpu: f64,
    /// Total physical memory in bytes.
    pub memory_total: u64,
    /// Used physical memory in bytes.
    pub memory_used: u64,
    /// 1/5/15 minute load averages.
    pub load: [f64; 3],
}

/// Command target: a process id, a name, or every managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Resolve by store id.
    Id(ProcessId),
    /// Resolve by unique name.
    Name(String),
    /// Every managed process.
    All,
}

impl Target {
    /// Parses `"all"`, a numeric id, or a name.
    pub fn parse(raw: &str) -> Target {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Target::All;
        }
        match trimmed.parse::<ProcessId>() {
            Ok(id) => Target::Id(id),
            Err(_) => Target::Name(trimmed.to_string()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => write!(f, "{id}"),
            Target::Name(name) => f.write_str(name),
            Target::All => f.write_str("all"),
        }
    }
}

/// Instance-count argument accepted by `scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleArg {
    /// Set the count to an absolute value.
    Absolute(u32),
    /// Add or remove instances relative to the current count.
    Delta(i32),
    /// Scale to the CPU count.
    Max,
}

impl ScaleArg {
    /// Resolves the argument against the current count and CPU count.
    pub fn resolve(&self, current: u32, cpus: u32) -> u32 {
        match self {
            ScaleArg::Absolute(n) => (*n).max(1),
            ScaleArg::Delta(delta) => {
                let next = current as i64 + *delta as i64;
                next.clamp(1, u32::MAX as i64) as u32
            }
            ScaleArg::Max => cpus.max(1),
        }
    }
}

impl FromStr for ScaleArg {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("max") {
            return Ok(ScaleArg::Max);
        }
        if let Some(rest) = trimmed.strip_prefix('+') {
            let delta: i32 = rest
                .parse()
                .map_err(|_| format!("invalid scale delta '{trimmed}'"))?;
            return Ok(ScaleArg::Delta(delta));
        }
        if let Some(rest) = trimmed.strip_prefix('-') {
            let delta: i32 = rest
                .parse()
                .map_err(|_| format!("invalid scale delta '{trimmed}'"))?;
            return Ok(ScaleArg::Delta(-delta));
        }
        let absolute: u32 = trimmed
            .parse()
            .map_err(|_| format!("invalid instance count '{trimmed}'"))?;
        if absolute == 0 {
            return Err("instance count must be at least 1".to_string());
        }
        Ok(ScaleArg::Absolute(absolute))
    }
}

/// How a child terminated, as reported by the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Whether the exit counts as clean (`exit 0`, no signal).
    pub fn clean(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Snapshot of one container, published by the supervisor after every
/// transition and read by the health monitor, metrics collector and adapters.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerView {
    /// 0-based ordinal inside the cluster group.
    pub instance: u32,
    /// Container state.
    pub state: ProcessStatus,
    /// Live PID, when online.
    pub pid: Option<u32>,
    /// Time the container went online.
    pub started_at: Option<DateTime<Utc>>,
    /// Respawn attempts within the current streak.
    pub restarts: u32,
    /// How the previous child terminated, if one has exited.
    pub last_exit: Option<ExitInfo>,
}

/// Snapshot of one managed process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessView {
    /// Record id.
    pub id: ProcessId,
    /// Process name.
    pub name: String,
    /// Execution mode string (`fork`/`cluster`).
    pub exec_mode: String,
    /// Persisted aggregate status.
    pub status: ProcessStatus,
    /// Lifetime restart counter.
    pub restarts: u32,
    /// Declared instance count after scaling.
    pub instances: u32,
    /// RSS restart threshold in bytes, when configured.
    pub max_memory_restart: Option<u64>,
    /// Health probe configuration, when declared.
    pub health_check: Option<crate::config::HealthCheckSpec>,
    /// Per-container snapshots, ordered by instance.
    pub containers: Vec<ContainerView>,
}

impl ProcessView {
    /// PID of the lowest-index online container.
    pub fn primary_pid(&self) -> Option<u32> {
        self.containers.iter().find_map(|c| {
            if c.state == ProcessStatus::Online {
                c.pid
            } else {
                None
            }
        })
    }

    /// Whether any container is currently online.
    pub fn any_online(&self) -> bool {
        self.containers
            .iter()
            .any(|c| c.state == ProcessStatus::Online)
    }
}
