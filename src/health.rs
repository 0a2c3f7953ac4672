//! Health monitor: periodic liveness probing of running containers.
//!
//! One scheduler thread walks the supervisor snapshot on a fixed tick. When a
//! probe comes due it runs on a worker thread so a slow probe never delays
//! probes of other processes; at most one probe per process is in flight, and
//! ticks that land while a probe is running are skipped rather than queued.
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::{
    collections::HashMap,
    net::{TcpStream, ToSocketAddrs},
    process::{Command, Stdio},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    config::{HealthCheckKind, HealthCheckSpec},
    events::{BusEvent, EventBus},
    process::{EventRecord, EventType, ProcessId},
    store::Store,
    supervisor::{Snapshot, SupervisorHandle},
};

const SCHEDULER_TICK: Duration = Duration::from_millis(250);

/// Health state tracked per process, exposed to the adapters.
#[derive(Debug, Clone, Serialize)]
pub struct HealthState {
    /// Consecutive probe failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the last completed probe.
    pub last_check: Option<DateTime<Utc>>,
    /// Whether the process currently counts as healthy.
    pub healthy: bool,
    /// Whether failures are still ignored under the start-period grace.
    pub in_start_period: bool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_check: None,
            healthy: true,
            in_start_period: true,
        }
    }
}

struct ProbeEntry {
    state: HealthState,
    /// Container start time the grace window was computed from.
    started_at: Option<DateTime<Utc>>,
    grace_until: Option<Instant>,
    next_due: Instant,
    in_flight: Arc<AtomicBool>,
    /// Failure threshold from the probe configuration.
    retries: u32,
}

/// Shared map of per-process health state.
pub type HealthStates = Arc<RwLock<HashMap<ProcessId, HealthState>>>;

/// Background health monitor.
pub struct HealthMonitor {
    stop: Arc<AtomicBool>,
    states: HealthStates,
    handle: Option<thread::JoinHandle<()>>,
}

impl HealthMonitor {
    /// Starts the scheduler thread.
    pub fn spawn(
        snapshot: Snapshot,
        supervisor: SupervisorHandle,
        store: Arc<Store>,
        bus: EventBus,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let states: HealthStates = Arc::new(RwLock::new(HashMap::new()));

        let stop_clone = Arc::clone(&stop);
        let states_clone = Arc::clone(&states);
        let handle = thread::Builder::new()
            .name("nova-health".to_string())
            .spawn(move || {
                let mut entries: HashMap<ProcessId, ProbeEntry> = HashMap::new();
                let shared = Arc::new(Mutex::new(ProbeResults::default()));

                while !stop_clone.load(Ordering::SeqCst) {
                    drain_probe_results(
                        &shared,
                        &mut entries,
                        &states_clone,
                        &supervisor,
                        &store,
                        &bus,
                    );
                    schedule_probes(&snapshot, &mut entries, &states_clone, &shared);
                    thread::sleep(SCHEDULER_TICK);
                }
            })
            .expect("failed to spawn health monitor thread");

        Self {
            stop,
            states,
            handle: Some(handle),
        }
    }

    /// Shared per-process health state map.
    pub fn states(&self) -> HealthStates {
        Arc::clone(&self.states)
    }

    /// Stops the scheduler and joins it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct ProbeResults {
    finished: Vec<(ProcessId, String, bool)>,
}

/// Applies finished probe outcomes to the tracked state, emitting events and
/// requesting restarts where thresholds are crossed.
fn drain_probe_results(
    shared: &Arc<Mutex<ProbeResults>>,
    entries: &mut HashMap<ProcessId, ProbeEntry>,
    states: &HealthStates,
    supervisor: &SupervisorHandle,
    store: &Arc<Store>,
    bus: &EventBus,
) {
    let finished = {
        let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut guard.finished)
    };

    for (id, name, healthy) in finished {
        let Some(entry) = entries.get_mut(&id) else {
            continue;
        };
        entry.state.last_check = Some(Utc::now());

        if healthy {
            let was_unhealthy = !entry.state.healthy;
            entry.state.consecutive_failures = 0;
            entry.state.healthy = true;
            if was_unhealthy {
                emit_health_event(store, bus, id, &name, EventType::HealthCheckRestore);
            }
        } else if !entry.state.in_start_period {
            entry.state.consecutive_failures += 1;
            debug!(
                "health probe failed for '{name}' ({} consecutive)",
                entry.state.consecutive_failures
            );
            if entry.state.healthy && entry.state.consecutive_failures >= entry.retries {
                entry.state.healthy = false;
                // Reset the counter so supervisor backoff and probe failures
                // do not compound into a restart loop.
                entry.state.consecutive_failures = 0;
                emit_health_event(store, bus, id, &name, EventType::HealthCheckFail);
                supervisor.request_health_restart(id);
            }
        }

        publish_states(entries, states);
    }
}

/// Walks the snapshot, registers/deregisters probes and dispatches due ones.
fn schedule_probes(
    snapshot: &Snapshot,
    entries: &mut HashMap<ProcessId, ProbeEntry>,
    states: &HealthStates,
    shared: &Arc<Mutex<ProbeResults>>,
) {
    let views: Vec<(ProcessId, String, Option<HealthCheckSpec>, Option<DateTime<Utc>>, bool)> = {
        let guard = snapshot.read().unwrap_or_else(|e| e.into_inner());
        guard
            .values()
            .map(|view| {
                (
                    view.id,
                    view.name.clone(),
                    view.health_check.clone(),
                    view.containers
                        .iter()
                        .filter_map(|c| c.started_at)
                        .max(),
                    view.any_online(),
                )
            })
            .collect()
    };

    let mut seen = Vec::new();
    let now = Instant::now();

    for (id, name, health, started_at, online) in views {
        let Some(spec) = health else {
            continue;
        };
        seen.push(id);

        let entry = entries.entry(id).or_insert_with(|| ProbeEntry {
            state: HealthState::default(),
            started_at: None,
            grace_until: None,
            next_due: now + spec.interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            retries: spec.retries,
        });
        entry.retries = spec.retries;

        // The start-period grace re-arms on every container (re)start. The
        // healthy flag survives the restart so recovery still emits a
        // health-check-restore.
        if started_at != entry.started_at {
            entry.started_at = started_at;
            entry.grace_until = Some(now + spec.start_period);
            entry.state = HealthState {
                in_start_period: !spec.start_period.is_zero(),
                healthy: entry.state.healthy,
                ..HealthState::default()
            };
            entry.next_due = now + spec.interval.min(spec.start_period.max(SCHEDULER_TICK));
        }
        if entry.state.in_start_period
            && entry.grace_until.map(|g| now >= g).unwrap_or(true)
        {
            entry.state.in_start_period = false;
        }

        if !online || now < entry.next_due {
            continue;
        }
        if entry.in_flight.load(Ordering::SeqCst) {
            // Previous probe still running: skip this tick, do not queue.
            entry.next_due = now + spec.interval;
            continue;
        }

        entry.next_due = now + spec.interval;
        entry.in_flight.store(true, Ordering::SeqCst);

        let in_flight = Arc::clone(&entry.in_flight);
        let shared = Arc::clone(shared);
        let probe_spec = spec.clone();
        let probe_name = name.clone();
        thread::Builder::new()
            .name(format!("nova-probe-{id}"))
            .spawn(move || {
                let healthy = run_probe(&probe_spec);
                let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
                guard.finished.push((id, probe_name, healthy));
                in_flight.store(false, Ordering::SeqCst);
            })
            .ok();
    }

    entries.retain(|id, _| seen.contains(id));
    publish_states(entries, states);
}

fn publish_states(entries: &HashMap<ProcessId, ProbeEntry>, states: &HealthStates) {
    let mut guard = states.write().unwrap_or_else(|e| e.into_inner());
    guard.clear();
    for (id, entry) in entries {
        guard.insert(*id, entry.state.clone());
    }
}

fn emit_health_event(
    store: &Arc<Store>,
    bus: &EventBus,
    id: ProcessId,
    name: &str,
    event_type: EventType,
) {
    let event = EventRecord::now(id, name, event_type, json!({}));
    if let Err(err) = store.append_event(&event) {
        warn!("failed to persist health event for '{name}': {err}");
    }
    bus.publish(BusEvent::Process(event));
}

/// Runs one probe to completion, honouring the configured timeout.
pub fn run_probe(spec: &HealthCheckSpec) -> bool {
    match spec.kind {
        HealthCheckKind::Http => probe_http(spec),
        HealthCheckKind::Tcp => probe_tcp(spec),
        HealthCheckKind::Script => probe_script(spec),
    }
}

fn probe_http(spec: &HealthCheckSpec) -> bool {
    let port = match spec.port {
        Some(port) => port,
        None => return false,
    };
    let path = if spec.path.starts_with('/') {
        spec.path.clone()
    } else {
        format!("/{}", spec.path)
    };
    let url = format!("http://{}:{}{}", spec.host, port, path);

    let client = match reqwest::blocking::Client::builder()
        .timeout(spec.timeout)
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(&url).send() {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

fn probe_tcp(spec: &HealthCheckSpec) -> bool {
    let port = match spec.port {
        Some(port) => port,
        None => return false,
    };
    let addrs = match (spec.host.as_str(), port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, spec.timeout).is_ok() {
            return true;
        }
    }
    false
}

fn probe_script(spec: &HealthCheckSpec) -> bool {
    let script = match &spec.script {
        Some(script) => script.clone(),
        None => return false,
    };

    let child = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(_) => return false,
    };

    let deadline = Instant::now() + spec.timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.success(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return false;
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn spec(kind: HealthCheckKind) -> HealthCheckSpec {
        HealthCheckSpec {
            kind,
            host: "127.0.0.1".to_string(),
            port: None,
            path: "/".to_string(),
            script: None,
            interval: Duration::from_millis(100),
            timeout: Duration::from_millis(500),
            retries: 3,
            start_period: Duration::ZERO,
        }
    }

    #[test]
    fn script_probe_reports_exit_code() {
        let mut ok = spec(HealthCheckKind::Script);
        ok.script = Some("exit 0".to_string());
        assert!(run_probe(&ok));

        let mut bad = spec(HealthCheckKind::Script);
        bad.script = Some("exit 3".to_string());
        assert!(!run_probe(&bad));
    }

    #[test]
    fn script_probe_times_out_and_kills() {
        let mut slow = spec(HealthCheckKind::Script);
        slow.script = Some("sleep 30".to_string());
        slow.timeout = Duration::from_millis(100);

        let started = Instant::now();
        assert!(!run_probe(&slow));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn tcp_probe_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut reachable = spec(HealthCheckKind::Tcp);
        reachable.port = Some(port);
        assert!(run_probe(&reachable));

        drop(listener);
        let mut unreachable = spec(HealthCheckKind::Tcp);
        unreachable.port = Some(port);
        unreachable.timeout = Duration::from_millis(200);
        assert!(!run_probe(&unreachable));
    }

    #[test]
    fn probe_without_target_fails_closed() {
        assert!(!run_probe(&spec(HealthCheckKind::Tcp)));
        assert!(!run_probe(&spec(HealthCheckKind::Script)));
        assert!(!run_probe(&spec(HealthCheckKind::Http)));
    }

    #[test]
    fn default_state_starts_healthy_in_grace() {
        let state = HealthState::default();
        assert!(state.healthy);
        assert!(state.in_start_period);
        assert_eq!(state.consecutive_failures, 0);
    }
}
