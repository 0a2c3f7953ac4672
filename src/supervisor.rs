//! Process supervisor: owns every managed child process.
//!
//! The supervisor runs a single command-loop thread fed by a channel. All
//! container state is mutated on that thread; blocking work (fork/exec,
//! waiting on children, timers) happens on worker threads that report back
//! through the same channel, so a slow spawn or a stuck child never delays
//! the next command. Other components observe state through the published
//! snapshot, never by reaching into the loop.
use chrono::{DateTime, Utc};
#[cfg(unix)]
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fs,
    path::PathBuf,
    process::{Command as OsCommand, Stdio},
    str::FromStr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::Duration,
};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    config::{self, ExecMode, InstanceCount, ProcessSpec, RESTART_BACKOFF_CEILING},
    error::NovaError,
    events::{BusEvent, EventBus, StreamKind},
    logs::LogAggregator,
    process::{
        ContainerView, EventRecord, EventType, ExitInfo, ProcessId, ProcessRecord,
        ProcessStatus, ProcessView, ScaleArg, Target,
    },
    store::{Store, Transition},
};

/// Shared, read-only view of every managed process.
pub type Snapshot = Arc<RwLock<HashMap<ProcessId, ProcessView>>>;

/// Handle used by adapters and monitors to drive the supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: Sender<Msg>,
    snapshot: Snapshot,
}

/// Spawns the supervisor command loop.
pub struct Supervisor;

type Reply<T> = Sender<T>;

enum Command {
    Start {
        spec: ProcessSpec,
        reply: Reply<Result<ProcessView, NovaError>>,
    },
    StartExisting {
        target: Target,
        reply: Reply<Result<Vec<ProcessView>, NovaError>>,
    },
    Stop {
        target: Target,
        force: bool,
        reply: Reply<Result<Vec<ProcessView>, NovaError>>,
    },
    Restart {
        target: Target,
        force: bool,
        reason: Option<String>,
        reply: Reply<Result<Vec<ProcessView>, NovaError>>,
    },
    Delete {
        target: Target,
        reply: Reply<Result<Vec<ProcessView>, NovaError>>,
    },
    Scale {
        target: Target,
        arg: ScaleArg,
        reply: Reply<Result<ProcessView, NovaError>>,
    },
    List {
        reply: Reply<Vec<ProcessView>>,
    },
    Info {
        target: Target,
        reply: Reply<Result<ProcessView, NovaError>>,
    },
    Reset {
        target: Target,
        reply: Reply<Result<Vec<ProcessView>, NovaError>>,
    },
    Restore {
        reply: Reply<Result<usize, NovaError>>,
    },
    Save {
        path: PathBuf,
        reply: Reply<Result<usize, NovaError>>,
    },
    Resurrect {
        path: PathBuf,
        reply: Reply<Result<usize, NovaError>>,
    },
    StopAll {
        exit_after: bool,
        reply: Reply<()>,
    },
}

enum Msg {
    Cmd(Command),
    SpawnResult {
        id: ProcessId,
        instance: u32,
        generation: u64,
        result: Result<u32, std::io::Error>,
    },
    ChildExited {
        id: ProcessId,
        instance: u32,
        generation: u64,
        exit: ExitInfo,
    },
    RestartTimer {
        id: ProcessId,
        instance: u32,
        generation: u64,
    },
    KillTimer {
        id: ProcessId,
        instance: u32,
        generation: u64,
    },
    CronFire {
        id: ProcessId,
    },
    MemoryExceeded {
        id: ProcessId,
        instance: u32,
        pid: u32,
        rss: u64,
    },
    HealthRestart {
        id: ProcessId,
    },
    StopAllDeadline,
}

/// What to do with a container once its current stop completes.
#[derive(Debug, Clone, PartialEq)]
enum Disposition {
    Remain,
    Respawn { reason: Option<String> },
    Remove,
}

struct Container {
    instance: u32,
    state: ProcessStatus,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    streak: u32,
    generation: u64,
    disposition: Disposition,
    pending_stop: Option<bool>,
    last_exit: Option<ExitInfo>,
}

impl Container {
    fn new(instance: u32) -> Self {
        Self {
            instance,
            state: ProcessStatus::Stopped,
            pid: None,
            started_at: None,
            streak: 0,
            generation: 0,
            disposition: Disposition::Remain,
            pending_stop: None,
            last_exit: None,
        }
    }

    fn running(&self) -> bool {
        matches!(
            self.state,
            ProcessStatus::Launching | ProcessStatus::Online | ProcessStatus::Stopping
        )
    }
}

struct CronTimer {
    cancel: Arc<AtomicBool>,
}

impl Drop for CronTimer {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

struct Managed {
    record: ProcessRecord,
    containers: BTreeMap<u32, Container>,
    deleting: bool,
    rolling: VecDeque<u32>,
    rolling_reason: Option<String>,
    cron: Option<CronTimer>,
}

struct PendingStopAll {
    replies: Vec<Reply<()>>,
    exit_after: bool,
}

struct SupervisorLoop {
    store: Arc<Store>,
    bus: EventBus,
    logs: LogAggregator,
    tx: Sender<Msg>,
    managed: HashMap<ProcessId, Managed>,
    snapshot: Snapshot,
    pending_stop_all: Option<PendingStopAll>,
    cpus: u32,
}

impl Supervisor {
    /// Starts the command loop and returns its handle.
    pub fn spawn(store: Arc<Store>, bus: EventBus, logs: LogAggregator) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel();
        let snapshot: Snapshot = Arc::new(RwLock::new(HashMap::new()));

        let mut event_loop = SupervisorLoop {
            store,
            bus,
            logs,
            tx: tx.clone(),
            managed: HashMap::new(),
            snapshot: Arc::clone(&snapshot),
            pending_stop_all: None,
            cpus: config::cpu_count(),
        };

        thread::Builder::new()
            .name("nova-supervisor".to_string())
            .spawn(move || event_loop.run(rx))
            .expect("failed to spawn supervisor thread");

        SupervisorHandle { tx, snapshot }
    }
}

impl SupervisorHandle {
    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, NovaError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Msg::Cmd(build(reply_tx)))
            .map_err(|_| NovaError::SupervisorGone)?;
        reply_rx.recv().map_err(|_| NovaError::SupervisorGone)
    }

    /// Registers and launches a new process from a validated spec.
    pub fn start(&self, spec: ProcessSpec) -> Result<ProcessView, NovaError> {
        self.request(|reply| Command::Start { spec, reply })?
    }

    /// Relaunches an already-registered, not-running process.
    pub fn start_existing(&self, target: Target) -> Result<Vec<ProcessView>, NovaError> {
        self.request(|reply| Command::StartExisting { target, reply })?
    }

    /// Stops containers; `force` skips SIGINT and goes straight to SIGKILL.
    pub fn stop(&self, target: Target, force: bool) -> Result<Vec<ProcessView>, NovaError> {
        self.request(|reply| Command::Stop { target, force, reply })?
    }

    /// Restarts containers. Cluster processes restart one instance at a time
    /// unless `force`.
    pub fn restart(&self, target: Target, force: bool) -> Result<Vec<ProcessView>, NovaError> {
        self.request(|reply| Command::Restart {
            target,
            force,
            reason: None,
            reply,
        })?
    }

    /// Stops containers and removes the record and its dependents.
    pub fn delete(&self, target: Target) -> Result<Vec<ProcessView>, NovaError> {
        self.request(|reply| Command::Delete { target, reply })?
    }

    /// Changes the declared instance count of a cluster process.
    pub fn scale(&self, target: Target, arg: ScaleArg) -> Result<ProcessView, NovaError> {
        self.request(|reply| Command::Scale { target, arg, reply })?
    }

    /// Lists every managed process.
    pub fn list(&self) -> Result<Vec<ProcessView>, NovaError> {
        self.request(|reply| Command::List { reply })
    }

    /// Detailed view of one process.
    pub fn info(&self, target: Target) -> Result<ProcessView, NovaError> {
        self.request(|reply| Command::Info { target, reply })?
    }

    /// Clears restart counters; errored containers become stopped.
    pub fn reset(&self, target: Target) -> Result<Vec<ProcessView>, NovaError> {
        self.request(|reply| Command::Reset { target, reply })?
    }

    /// Re-registers persisted records and launches the autorestart ones.
    pub fn restore(&self) -> Result<usize, NovaError> {
        self.request(|reply| Command::Restore { reply })?
    }

    /// Snapshots every definition to a dump file.
    pub fn save(&self, path: PathBuf) -> Result<usize, NovaError> {
        self.request(|reply| Command::Save { path, reply })?
    }

    /// Registers and starts every definition from a dump file.
    pub fn resurrect(&self, path: PathBuf) -> Result<usize, NovaError> {
        self.request(|reply| Command::Resurrect { path, reply })?
    }

    /// Stops every container concurrently, returning once all are down or
    /// the kill window has elapsed.
    pub fn stop_all(&self) -> Result<(), NovaError> {
        self.request(|reply| Command::StopAll {
            exit_after: false,
            reply,
        })
    }

    /// Stops everything and terminates the command loop.
    pub fn shutdown(&self) -> Result<(), NovaError> {
        self.request(|reply| Command::StopAll {
            exit_after: true,
            reply,
        })
    }

    /// Shared snapshot read by monitors and adapters.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot)
    }

    /// Current views, cloned out of the snapshot.
    pub fn views(&self) -> Vec<ProcessView> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        let mut views: Vec<_> = guard.values().cloned().collect();
        views.sort_by_key(|v| v.id);
        views
    }

    /// Reports an RSS sample above the configured threshold.
    pub fn notify_memory_exceeded(&self, id: ProcessId, instance: u32, pid: u32, rss: u64) {
        let _ = self.tx.send(Msg::MemoryExceeded {
            id,
            instance,
            pid,
            rss,
        });
    }

    /// Requests a restart after sustained health-probe failure.
    pub fn request_health_restart(&self, id: ProcessId) {
        let _ = self.tx.send(Msg::HealthRestart { id });
    }
}

impl SupervisorLoop {
    fn run(&mut self, rx: Receiver<Msg>) {
        info!("supervisor command loop started");
        while let Ok(msg) = rx.recv() {
            match msg {
                Msg::Cmd(command) => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                Msg::SpawnResult {
                    id,
                    instance,
                    generation,
                    result,
                } => self.handle_spawn_result(id, instance, generation, result),
                Msg::ChildExited {
                    id,
                    instance,
                    generation,
                    exit,
                } => self.handle_child_exited(id, instance, generation, exit),
                Msg::RestartTimer {
                    id,
                    instance,
                    generation,
                } => self.handle_restart_timer(id, instance, generation),
                Msg::KillTimer {
                    id,
                    instance,
                    generation,
                } => self.handle_kill_timer(id, instance, generation),
                Msg::CronFire { id } => self.handle_cron_fire(id),
                Msg::MemoryExceeded {
                    id,
                    instance,
                    pid,
                    rss,
                } => self.handle_memory_exceeded(id, instance, pid, rss),
                Msg::HealthRestart { id } => self.handle_health_restart(id),
                Msg::StopAllDeadline => {
                    if self.finish_stop_all(true) {
                        break;
                    }
                }
            }

            if self.pending_stop_all.is_some() && self.all_stopped() {
                let exit = self.finish_stop_all(false);
                if exit {
                    break;
                }
            }
        }
        info!("supervisor command loop terminated");
    }

    /// Returns true when the loop should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { spec, reply } => {
                let result = self.cmd_start(spec);
                let _ = reply.send(result);
            }
            Command::StartExisting { target, reply } => {
                let result = self.for_targets(target, |this, id| this.cmd_start_existing(id));
                let _ = reply.send(result);
            }
            Command::Stop { target, force, reply } => {
                let result = self.for_targets(target, |this, id| {
                    this.cmd_stop(id, force, Disposition::Remain);
                    Ok(())
                });
                let _ = reply.send(result);
            }
            Command::Restart {
                target,
                force,
                reason,
                reply,
            } => {
                let result = self.for_targets(target, |this, id| {
                    this.cmd_restart(id, force, reason.clone());
                    Ok(())
                });
                let _ = reply.send(result);
            }
            Command::Delete { target, reply } => {
                let result = self.for_targets(target, |this, id| {
                    this.cmd_delete(id);
                    Ok(())
                });
                let _ = reply.send(result);
            }
            Command::Scale { target, arg, reply } => {
                let result = self.cmd_scale(target, arg);
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let mut views: Vec<_> =
                    self.managed.keys().map(|id| self.view(*id)).collect();
                views.sort_by_key(|v| v.id);
                let _ = reply.send(views);
            }
            Command::Info { target, reply } => {
                let result = self
                    .resolve_one(&target)
                    .map(|id| self.view(id));
                let _ = reply.send(result);
            }
            Command::Reset { target, reply } => {
                let result = self.for_targets(target, |this, id| {
                    this.cmd_reset(id);
                    Ok(())
                });
                let _ = reply.send(result);
            }
            Command::Restore { reply } => {
                let result = self.cmd_restore();
                let _ = reply.send(result);
            }
            Command::Save { path, reply } => {
                let result = self.cmd_save(&path);
                let _ = reply.send(result);
            }
            Command::Resurrect { path, reply } => {
                let result = self.cmd_resurrect(&path);
                let _ = reply.send(result);
            }
            Command::StopAll { exit_after, reply } => {
                self.cmd_stop_all(exit_after, reply);
                if self.pending_stop_all.is_some() && self.all_stopped() {
                    return self.finish_stop_all(false);
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Target resolution
    // ------------------------------------------------------------------

    fn resolve_one(&self, target: &Target) -> Result<ProcessId, NovaError> {
        match target {
            Target::Id(id) if self.managed.contains_key(id) => Ok(*id),
            Target::Name(name) => self
                .managed
                .values()
                .find(|m| m.record.spec.name == *name)
                .map(|m| m.record.id)
                .ok_or_else(|| NovaError::ProcessNotFound(name.clone())),
            Target::Id(id) => Err(NovaError::ProcessNotFound(id.to_string())),
            Target::All => Err(NovaError::ProcessNotFound("all".to_string())),
        }
    }

    fn resolve_many(&self, target: &Target) -> Result<Vec<ProcessId>, NovaError> {
        match target {
            Target::All => {
                let mut ids: Vec<_> = self.managed.keys().copied().collect();
                ids.sort_unstable();
                Ok(ids)
            }
            other => self.resolve_one(other).map(|id| vec![id]),
        }
    }

    fn for_targets(
        &mut self,
        target: Target,
        mut apply: impl FnMut(&mut Self, ProcessId) -> Result<(), NovaError>,
    ) -> Result<Vec<ProcessView>, NovaError> {
        let ids = self.resolve_many(&target)?;
        for id in &ids {
            apply(self, *id)?;
        }
        Ok(ids
            .iter()
            .filter(|id| self.managed.contains_key(id))
            .map(|id| self.view(*id))
            .collect())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn cmd_start(&mut self, spec: ProcessSpec) -> Result<ProcessView, NovaError> {
        spec.validate()?;
        if self
            .managed
            .values()
            .any(|m| m.record.spec.name == spec.name)
        {
            return Err(NovaError::ProcessAlreadyExists(spec.name.clone()));
        }

        let record = self.store.insert_process(&spec).map_err(|err| match err {
            crate::error::StoreError::DuplicateName(name) => {
                NovaError::ProcessAlreadyExists(name)
            }
            other => NovaError::Store(other),
        })?;
        let id = record.id;

        self.logs.register(id, &spec.name, &spec.log);
        let instances = spec.instances.resolve(self.cpus);
        let mut managed = Managed {
            record,
            containers: BTreeMap::new(),
            deleting: false,
            rolling: VecDeque::new(),
            rolling_reason: None,
            cron: None,
        };
        for instance in 0..instances {
            managed.containers.insert(instance, Container::new(instance));
        }
        self.managed.insert(id, managed);
        self.arm_cron(id);

        for instance in 0..instances {
            self.launch(id, instance);
        }
        self.publish_snapshot();
        Ok(self.view(id))
    }

    fn cmd_start_existing(&mut self, id: ProcessId) -> Result<(), NovaError> {
        let managed = match self.managed.get_mut(&id) {
            Some(managed) => managed,
            None => return Ok(()),
        };
        if managed.containers.values().any(Container::running) {
            return Ok(());
        }

        let instances = managed.record.spec.instances.resolve(self.cpus);
        managed.containers.clear();
        for instance in 0..instances {
            managed.containers.insert(instance, Container::new(instance));
        }
        for instance in 0..instances {
            self.launch(id, instance);
        }
        self.publish_snapshot();
        Ok(())
    }

    fn cmd_stop(&mut self, id: ProcessId, force: bool, disposition: Disposition) {
        let instances: Vec<u32> = match self.managed.get(&id) {
            Some(managed) => managed.containers.keys().copied().collect(),
            None => return,
        };
        for instance in instances {
            self.initiate_stop(id, instance, force, disposition.clone());
        }
        self.publish_snapshot();
    }

    fn cmd_restart(&mut self, id: ProcessId, force: bool, reason: Option<String>) {
        let Some(managed) = self.managed.get_mut(&id) else {
            return;
        };

        let is_cluster = managed.record.spec.exec_mode == ExecMode::Cluster;
        let instances: Vec<u32> = managed.containers.keys().copied().collect();
        if instances.is_empty() {
            return;
        }

        self.emit_restart_events(id, &instances, reason.as_deref());

        if is_cluster && !force && instances.len() > 1 {
            // Zero-downtime: cycle one instance at a time.
            let managed = self.managed.get_mut(&id).expect("checked above");
            managed.rolling = instances.iter().skip(1).copied().collect();
            managed.rolling_reason = reason.clone();
            let first = instances[0];
            self.restart_container(id, first, force, reason);
        } else {
            for instance in instances {
                self.restart_container(id, instance, force, reason.clone());
            }
        }
        self.publish_snapshot();
    }

    fn emit_restart_events(&mut self, id: ProcessId, instances: &[u32], reason: Option<&str>) {
        let name = match self.managed.get(&id) {
            Some(managed) => managed.record.spec.name.clone(),
            None => return,
        };
        for instance in instances {
            let event = EventRecord::now(
                id,
                &name,
                EventType::Restart,
                json!({"instance": instance, "reason": reason}),
            );
            if let Err(err) = self.store.append_event(&event) {
                warn!("failed to persist restart event for '{name}': {err}");
            }
            self.bus.publish(BusEvent::Process(event));
        }
    }

    /// Restart of a single container, whatever state it is in.
    fn restart_container(
        &mut self,
        id: ProcessId,
        instance: u32,
        force: bool,
        reason: Option<String>,
    ) {
        let state = match self
            .managed
            .get(&id)
            .and_then(|m| m.containers.get(&instance))
        {
            Some(container) => container.state,
            None => return,
        };

        match state {
            ProcessStatus::Online | ProcessStatus::Launching | ProcessStatus::Stopping => {
                self.initiate_stop(id, instance, force, Disposition::Respawn { reason });
            }
            ProcessStatus::WaitingRestart => {
                // Fold the pending backoff into an immediate respawn.
                self.initiate_stop(id, instance, force, Disposition::Respawn { reason });
            }
            ProcessStatus::Stopped | ProcessStatus::Errored => {
                self.bump_restart_counter(id);
                self.launch(id, instance);
            }
        }
    }

    fn cmd_delete(&mut self, id: ProcessId) {
        let Some(managed) = self.managed.get_mut(&id) else {
            return;
        };
        managed.deleting = true;
        managed.cron = None;
        managed.rolling.clear();

        let instances: Vec<u32> = managed.containers.keys().copied().collect();
        for instance in instances {
            self.initiate_stop(id, instance, false, Disposition::Remove);
        }
        self.try_finish_delete(id);
        self.publish_snapshot();
    }

    fn cmd_scale(
        &mut self,
        target: Target,
        arg: ScaleArg,
    ) -> Result<ProcessView, NovaError> {
        let id = self.resolve_one(&target)?;
        let (current, name, is_cluster) = {
            let managed = self.managed.get(&id).expect("resolved above");
            (
                managed.record.spec.instances.resolve(self.cpus),
                managed.record.spec.name.clone(),
                managed.record.spec.exec_mode == ExecMode::Cluster,
            )
        };

        let next = arg.resolve(current, self.cpus);
        if !is_cluster && next > 1 {
            return Err(NovaError::ConfigValidation(vec![
                "exec_mode: scaling beyond one instance requires cluster mode".to_string(),
            ]));
        }

        if next != current {
            let managed = self.managed.get_mut(&id).expect("resolved above");
            managed.record.spec.instances = InstanceCount::Count(next);
            let spec = managed.record.spec.clone();
            self.store.update_spec(id, &spec)?;
        }

        let event = EventRecord::now(
            id,
            &name,
            EventType::Scaling,
            json!({"from": current, "to": next}),
        );
        if let Err(err) = self.store.append_event(&event) {
            warn!("failed to persist scaling event for '{name}': {err}");
        }
        self.bus.publish(BusEvent::Process(event));

        if next > current {
            for instance in current..next {
                let managed = self.managed.get_mut(&id).expect("resolved above");
                managed
                    .containers
                    .entry(instance)
                    .or_insert_with(|| Container::new(instance));
                self.launch(id, instance);
            }
        } else if next < current {
            // Highest-indexed containers go first.
            for instance in (next..current).rev() {
                self.initiate_stop(id, instance, false, Disposition::Remove);
            }
        }

        self.publish_snapshot();
        Ok(self.view(id))
    }

    fn cmd_reset(&mut self, id: ProcessId) {
        let Some(managed) = self.managed.get_mut(&id) else {
            return;
        };
        managed.record.restarts = 0;
        for container in managed.containers.values_mut() {
            container.streak = 0;
            if container.state == ProcessStatus::Errored {
                container.state = ProcessStatus::Stopped;
            }
        }
        self.persist(id, None);
        self.publish_snapshot();
    }

    fn cmd_restore(&mut self) -> Result<usize, NovaError> {
        let records = self.store.load_processes()?;
        let mut started = 0usize;
        for record in records {
            let id = record.id;
            if self.managed.contains_key(&id) {
                continue;
            }
            let autorestart = record.spec.autorestart;
            let instances = record.spec.instances.resolve(self.cpus);
            self.logs.register(id, &record.spec.name, &record.spec.log);

            let mut managed = Managed {
                record,
                containers: BTreeMap::new(),
                deleting: false,
                rolling: VecDeque::new(),
                rolling_reason: None,
                cron: None,
            };
            for instance in 0..instances {
                managed.containers.insert(instance, Container::new(instance));
            }
            self.managed.insert(id, managed);

            if autorestart {
                self.arm_cron(id);
                for instance in 0..instances {
                    self.launch(id, instance);
                }
                started += 1;
            } else {
                // Correct any stale status persisted by a previous daemon.
                self.persist(id, None);
            }
        }
        self.publish_snapshot();
        Ok(started)
    }

    fn cmd_save(&self, path: &std::path::Path) -> Result<usize, NovaError> {
        let specs: Vec<ProcessSpec> = {
            let mut entries: Vec<_> = self.managed.values().collect();
            entries.sort_by_key(|m| m.record.id);
            entries.iter().map(|m| m.record.spec.clone()).collect()
        };
        let encoded = serde_json::to_string_pretty(&specs)?;
        fs::write(path, encoded)?;
        Ok(specs.len())
    }

    fn cmd_resurrect(&mut self, path: &std::path::Path) -> Result<usize, NovaError> {
        let raw = fs::read_to_string(path)?;
        let specs: Vec<ProcessSpec> = serde_json::from_str(&raw)?;
        let mut started = 0usize;
        for spec in specs {
            let exists = self
                .managed
                .values()
                .any(|m| m.record.spec.name == spec.name);
            if exists {
                continue;
            }
            self.cmd_start(spec)?;
            started += 1;
        }
        Ok(started)
    }

    fn cmd_stop_all(&mut self, exit_after: bool, reply: Reply<()>) {
        let ids: Vec<ProcessId> = self.managed.keys().copied().collect();
        let mut max_kill = Duration::ZERO;
        for id in &ids {
            if let Some(managed) = self.managed.get(id) {
                max_kill = max_kill.max(managed.record.spec.kill_timeout);
            }
        }
        for id in ids {
            self.cmd_stop(id, false, Disposition::Remain);
        }

        match self.pending_stop_all.as_mut() {
            Some(pending) => {
                pending.replies.push(reply);
                pending.exit_after |= exit_after;
            }
            None => {
                self.pending_stop_all = Some(PendingStopAll {
                    replies: vec![reply],
                    exit_after,
                });
                let tx = self.tx.clone();
                let deadline = max_kill + Duration::from_secs(1);
                thread::spawn(move || {
                    thread::sleep(deadline);
                    let _ = tx.send(Msg::StopAllDeadline);
                });
            }
        }
    }

    fn all_stopped(&self) -> bool {
        self.managed
            .values()
            .all(|m| m.containers.values().all(|c| !c.running()))
    }

    /// Resolves a pending stop-all; returns whether the loop should exit.
    fn finish_stop_all(&mut self, deadline: bool) -> bool {
        let Some(pending) = self.pending_stop_all.take() else {
            return false;
        };
        if deadline && !self.all_stopped() {
            warn!("stop-all deadline reached with containers still alive");
        }
        for reply in pending.replies {
            let _ = reply.send(());
        }
        pending.exit_after
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    fn launch(&mut self, id: ProcessId, instance: u32) {
        let (spec, generation, declared) = {
            let Some(managed) = self.managed.get_mut(&id) else {
                return;
            };
            let declared = managed.containers.len() as u32;
            let Some(container) = managed.containers.get_mut(&instance) else {
                return;
            };
            container.generation += 1;
            container.state = ProcessStatus::Launching;
            container.pid = None;
            container.started_at = None;
            container.disposition = Disposition::Remain;
            (managed.record.spec.clone(), container.generation, declared)
        };

        self.persist(
            id,
            Some(EventRecord::now(
                id,
                &spec.name,
                EventType::Start,
                json!({"instance": instance}),
            )),
        );

        let tx = self.tx.clone();
        let logs = self.logs.clone();
        let name = spec.name.clone();
        thread::Builder::new()
            .name(format!("nova-spawn-{name}-{instance}"))
            .spawn(move || {
                spawn_and_wait(tx, logs, id, instance, generation, &spec, declared);
            })
            .ok();
    }

    fn handle_spawn_result(
        &mut self,
        id: ProcessId,
        instance: u32,
        generation: u64,
        result: Result<u32, std::io::Error>,
    ) {
        let Some(container) = self
            .managed
            .get_mut(&id)
            .and_then(|m| m.containers.get_mut(&instance))
        else {
            // Container vanished while the spawn was in flight; reap the
            // orphan so invariant "one live child per container" holds.
            if let Ok(pid) = &result {
                send_signal(*pid, Signal::SIGKILL);
            }
            return;
        };
        if container.generation != generation {
            if let Ok(pid) = &result {
                send_signal(*pid, Signal::SIGKILL);
            }
            return;
        }

        match result {
            Ok(pid) => {
                container.state = ProcessStatus::Online;
                container.pid = Some(pid);
                container.started_at = Some(Utc::now());
                let name = self.managed[&id].record.spec.name.clone();
                debug!("process '{name}' instance {instance} online (pid {pid})");
                self.persist(
                    id,
                    Some(EventRecord::now(
                        id,
                        &name,
                        EventType::Online,
                        json!({"instance": instance, "pid": pid}),
                    )),
                );

                // A stop that arrived mid-spawn takes effect now.
                let pending = self
                    .managed
                    .get_mut(&id)
                    .and_then(|m| m.containers.get_mut(&instance))
                    .and_then(|c| c.pending_stop.take());
                if let Some(force) = pending {
                    let disposition = self
                        .managed
                        .get(&id)
                        .and_then(|m| m.containers.get(&instance))
                        .map(|c| c.disposition.clone())
                        .unwrap_or(Disposition::Remain);
                    self.initiate_stop(id, instance, force, disposition);
                } else {
                    self.advance_rolling(id);
                }
                self.publish_snapshot();
            }
            Err(err) => {
                let name = self.managed[&id].record.spec.name.clone();
                warn!("spawn failed for '{name}' instance {instance}: {err}");
                let event = EventRecord::now(
                    id,
                    &name,
                    EventType::Error,
                    json!({
                        "instance": instance,
                        "reason": "spawn-error",
                        "message": err.to_string(),
                    }),
                );
                if let Err(store_err) = self.store.append_event(&event) {
                    warn!("failed to persist spawn error event: {store_err}");
                }
                self.bus.publish(BusEvent::Process(event));
                self.apply_restart_policy(id, instance, None);
                self.publish_snapshot();
            }
        }
    }

    /// Chains the next instance of a rolling cluster restart.
    fn advance_rolling(&mut self, id: ProcessId) {
        let next = {
            let Some(managed) = self.managed.get_mut(&id) else {
                return;
            };
            if managed.rolling.is_empty() {
                return;
            }
            managed.rolling.pop_front()
        };
        if let Some(instance) = next {
            let reason = self
                .managed
                .get(&id)
                .and_then(|m| m.rolling_reason.clone());
            self.restart_container(id, instance, false, reason);
        }
    }

    // ------------------------------------------------------------------
    // Exits and restart policy
    // ------------------------------------------------------------------

    fn handle_child_exited(
        &mut self,
        id: ProcessId,
        instance: u32,
        generation: u64,
        exit: ExitInfo,
    ) {
        let (state, tenure_ms, name) = {
            let Some(managed) = self.managed.get_mut(&id) else {
                return;
            };
            let name = managed.record.spec.name.clone();
            let Some(container) = managed.containers.get_mut(&instance) else {
                return;
            };
            if container.generation != generation {
                return;
            }
            let tenure_ms = container
                .started_at
                .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            container.pid = None;
            container.last_exit = Some(exit);
            (container.state, tenure_ms, name)
        };

        if state == ProcessStatus::Stopping {
            self.complete_stop(id, instance, exit);
            return;
        }

        // Unexpected exit: classify, then decide on a respawn.
        let event_type = if exit.clean() {
            EventType::Exit
        } else {
            EventType::Crash
        };
        info!(
            "process '{name}' instance {instance} exited ({event_type}, code {:?}, signal {:?})",
            exit.code, exit.signal
        );

        let autorestart = self.managed[&id].record.spec.autorestart;
        if autorestart {
            let classification = EventRecord::now(
                id,
                &name,
                event_type,
                json!({"instance": instance, "code": exit.code, "signal": exit.signal}),
            );
            self.apply_restart_policy(id, instance, Some((classification, tenure_ms)));
        } else {
            if let Some(container) = self
                .managed
                .get_mut(&id)
                .and_then(|m| m.containers.get_mut(&instance))
            {
                container.state = ProcessStatus::Stopped;
            }
            self.persist(
                id,
                Some(EventRecord::now(
                    id,
                    &name,
                    event_type,
                    json!({"instance": instance, "code": exit.code, "signal": exit.signal}),
                )),
            );
        }
        self.publish_snapshot();
    }

    /// Applies the crash/spawn-failure restart policy for one container.
    ///
    /// When `classification` is given it is persisted together with the
    /// resulting status in one unit of work.
    fn apply_restart_policy(
        &mut self,
        id: ProcessId,
        instance: u32,
        classification: Option<(EventRecord, u64)>,
    ) {
        let (max_restarts, restart_delay, exp_backoff, listen_timeout, name) = {
            let record = &self.managed[&id].record;
            (
                record.spec.max_restarts,
                record.spec.restart_delay,
                record.spec.exp_backoff_restart_delay,
                record.spec.listen_timeout,
                record.spec.name.clone(),
            )
        };
        let tenure_ms = classification.as_ref().map(|(_, t)| *t).unwrap_or(0);

        let streak = {
            let Some(container) = self
                .managed
                .get_mut(&id)
                .and_then(|m| m.containers.get_mut(&instance))
            else {
                return;
            };
            if tenure_ms >= listen_timeout.as_millis() as u64 {
                container.streak = 0;
            }
            container.streak += 1;
            container.streak
        };

        let event = classification.map(|(record, _)| record);

        if streak > max_restarts {
            if let Some(container) = self
                .managed
                .get_mut(&id)
                .and_then(|m| m.containers.get_mut(&instance))
            {
                container.state = ProcessStatus::Errored;
                container.generation += 1;
            }
            self.persist(id, event);

            let error_event = EventRecord::now(
                id,
                &name,
                EventType::Error,
                json!({"instance": instance, "reason": "max-restarts-exceeded"}),
            );
            if let Err(err) = self.store.append_event(&error_event) {
                warn!("failed to persist max-restarts event for '{name}': {err}");
            }
            self.bus.publish(BusEvent::Process(error_event));
            warn!("process '{name}' instance {instance} errored: max restarts exceeded");
            return;
        }

        let delay = respawn_delay(restart_delay, exp_backoff, streak);
        let generation = {
            let container = self
                .managed
                .get_mut(&id)
                .and_then(|m| m.containers.get_mut(&instance))
                .expect("container checked above");
            container.state = ProcessStatus::WaitingRestart;
            container.generation += 1;
            container.generation
        };
        self.persist(id, event);
        debug!(
            "process '{name}' instance {instance} waiting {}ms before respawn (streak {streak})",
            delay.as_millis()
        );

        let tx = self.tx.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = tx.send(Msg::RestartTimer {
                id,
                instance,
                generation,
            });
        });
    }

    fn handle_restart_timer(&mut self, id: ProcessId, instance: u32, generation: u64) {
        let valid = self
            .managed
            .get(&id)
            .and_then(|m| m.containers.get(&instance))
            .map(|c| c.state == ProcessStatus::WaitingRestart && c.generation == generation)
            .unwrap_or(false);
        if !valid {
            return;
        }
        self.bump_restart_counter(id);
        self.launch(id, instance);
        self.publish_snapshot();
    }

    fn bump_restart_counter(&mut self, id: ProcessId) {
        if let Some(managed) = self.managed.get_mut(&id) {
            managed.record.restarts = managed.record.restarts.saturating_add(1);
        }
    }

    // ------------------------------------------------------------------
    // Stopping
    // ------------------------------------------------------------------

    fn initiate_stop(
        &mut self,
        id: ProcessId,
        instance: u32,
        force: bool,
        disposition: Disposition,
    ) {
        let (state, pid, kill_timeout) = {
            let Some(managed) = self.managed.get_mut(&id) else {
                return;
            };
            let kill_timeout = managed.record.spec.kill_timeout;
            let Some(container) = managed.containers.get_mut(&instance) else {
                return;
            };
            container.disposition = disposition.clone();
            (container.state, container.pid, kill_timeout)
        };

        match state {
            ProcessStatus::Online => {
                // The generation stays put: it identifies the live child, and
                // both the waiter and the kill timer must agree on it.
                let generation = {
                    let container = self
                        .managed
                        .get_mut(&id)
                        .and_then(|m| m.containers.get_mut(&instance))
                        .expect("checked above");
                    container.state = ProcessStatus::Stopping;
                    container.generation
                };
                self.persist(id, None);

                if let Some(pid) = pid {
                    if force {
                        send_signal(pid, Signal::SIGKILL);
                    } else {
                        send_signal(pid, Signal::SIGINT);
                        let tx = self.tx.clone();
                        thread::spawn(move || {
                            thread::sleep(kill_timeout);
                            let _ = tx.send(Msg::KillTimer {
                                id,
                                instance,
                                generation,
                            });
                        });
                    }
                }
            }
            ProcessStatus::Launching => {
                if let Some(container) = self
                    .managed
                    .get_mut(&id)
                    .and_then(|m| m.containers.get_mut(&instance))
                {
                    container.pending_stop = Some(force);
                }
            }
            ProcessStatus::Stopping => {
                if force && let Some(pid) = pid {
                    send_signal(pid, Signal::SIGKILL);
                }
            }
            ProcessStatus::WaitingRestart => {
                // Cancel the armed respawn.
                {
                    let container = self
                        .managed
                        .get_mut(&id)
                        .and_then(|m| m.containers.get_mut(&instance))
                        .expect("checked above");
                    container.generation += 1;
                    container.state = ProcessStatus::Stopped;
                }
                let name = self.managed[&id].record.spec.name.clone();
                self.persist(
                    id,
                    Some(EventRecord::now(
                        id,
                        &name,
                        EventType::Stop,
                        json!({"instance": instance}),
                    )),
                );
                self.resolve_disposition(id, instance);
            }
            ProcessStatus::Stopped | ProcessStatus::Errored => {
                self.resolve_disposition(id, instance);
            }
        }
    }

    fn handle_kill_timer(&mut self, id: ProcessId, instance: u32, generation: u64) {
        let pid = self
            .managed
            .get(&id)
            .and_then(|m| m.containers.get(&instance))
            .filter(|c| c.state == ProcessStatus::Stopping && c.generation == generation)
            .and_then(|c| c.pid);
        if let Some(pid) = pid {
            let name = &self.managed[&id].record.spec.name;
            warn!("process '{name}' instance {instance} ignored SIGINT; sending SIGKILL");
            send_signal(pid, Signal::SIGKILL);
        }
    }

    /// An expected exit (state was `stopping`) completed.
    fn complete_stop(&mut self, id: ProcessId, instance: u32, exit: ExitInfo) {
        {
            let Some(container) = self
                .managed
                .get_mut(&id)
                .and_then(|m| m.containers.get_mut(&instance))
            else {
                return;
            };
            container.state = ProcessStatus::Stopped;
            container.generation += 1;
        }

        let name = self.managed[&id].record.spec.name.clone();
        self.persist(
            id,
            Some(EventRecord::now(
                id,
                &name,
                EventType::Stop,
                json!({"instance": instance, "code": exit.code, "signal": exit.signal}),
            )),
        );

        self.resolve_disposition(id, instance);
        self.publish_snapshot();
    }

    /// Acts on the container's stop disposition once it is fully down.
    fn resolve_disposition(&mut self, id: ProcessId, instance: u32) {
        let disposition = {
            let Some(container) = self
                .managed
                .get_mut(&id)
                .and_then(|m| m.containers.get_mut(&instance))
            else {
                return;
            };
            std::mem::replace(&mut container.disposition, Disposition::Remain)
        };

        match disposition {
            Disposition::Remain => {}
            Disposition::Respawn { .. } => {
                self.bump_restart_counter(id);
                self.launch(id, instance);
            }
            Disposition::Remove => {
                if let Some(managed) = self.managed.get_mut(&id) {
                    managed.containers.remove(&instance);
                }
                self.try_finish_delete(id);
            }
        }
    }

    fn try_finish_delete(&mut self, id: ProcessId) {
        let done = self
            .managed
            .get(&id)
            .map(|m| m.deleting && m.containers.is_empty())
            .unwrap_or(false);
        if !done {
            return;
        }

        if let Some(managed) = self.managed.remove(&id) {
            let name = managed.record.spec.name;
            if let Err(err) = self.store.delete_process(id) {
                error!("failed to delete process '{name}' from store: {err}");
            }
            self.logs.deregister(id);
            info!("process '{name}' deleted");
        }
        self.publish_snapshot();
    }

    // ------------------------------------------------------------------
    // Cron, memory and health triggers
    // ------------------------------------------------------------------

    fn arm_cron(&mut self, id: ProcessId) {
        let expression = match self.managed.get(&id) {
            Some(managed) => match &managed.record.spec.cron_restart {
                Some(expr) => expr.clone(),
                None => return,
            },
            None => return,
        };
        let schedule = match cron::Schedule::from_str(&expression) {
            Ok(schedule) => schedule,
            Err(err) => {
                warn!("invalid cron_restart expression '{expression}': {err}");
                return;
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_clone = Arc::clone(&cancel);
        let tx = self.tx.clone();
        thread::Builder::new()
            .name(format!("nova-cron-{id}"))
            .spawn(move || {
                loop {
                    let next = match schedule.upcoming(Utc).next() {
                        Some(next) => next,
                        None => return,
                    };
                    while Utc::now() < next {
                        if cancel_clone.load(Ordering::SeqCst) {
                            return;
                        }
                        thread::sleep(Duration::from_millis(500));
                    }
                    if cancel_clone.load(Ordering::SeqCst) {
                        return;
                    }
                    if tx.send(Msg::CronFire { id }).is_err() {
                        return;
                    }
                }
            })
            .ok();

        if let Some(managed) = self.managed.get_mut(&id) {
            managed.cron = Some(CronTimer { cancel });
        }
    }

    fn handle_cron_fire(&mut self, id: ProcessId) {
        let restart = self
            .managed
            .get(&id)
            .map(|m| !m.deleting && m.containers.values().any(|c| c.state == ProcessStatus::Online))
            .unwrap_or(false);
        if restart {
            info!("cron restart firing for process {id}");
            self.cmd_restart(id, false, Some("cron".to_string()));
        }
    }

    fn handle_memory_exceeded(&mut self, id: ProcessId, instance: u32, pid: u32, rss: u64) {
        let matches = self
            .managed
            .get(&id)
            .and_then(|m| m.containers.get(&instance))
            .map(|c| c.state == ProcessStatus::Online && c.pid == Some(pid))
            .unwrap_or(false);
        if !matches {
            return;
        }

        let name = self.managed[&id].record.spec.name.clone();
        info!(
            "process '{name}' instance {instance} exceeded its memory limit (rss {rss}); restarting"
        );
        let event = EventRecord::now(
            id,
            &name,
            EventType::Restart,
            json!({"instance": instance, "reason": "memory-threshold", "rss": rss}),
        );
        if let Err(err) = self.store.append_event(&event) {
            warn!("failed to persist memory restart event for '{name}': {err}");
        }
        self.bus.publish(BusEvent::Process(event));

        self.initiate_stop(
            id,
            instance,
            false,
            Disposition::Respawn {
                reason: Some("memory-threshold".to_string()),
            },
        );
        self.publish_snapshot();
    }

    fn handle_health_restart(&mut self, id: ProcessId) {
        let eligible = self
            .managed
            .get(&id)
            .map(|m| !m.deleting && m.containers.values().any(|c| c.state == ProcessStatus::Online))
            .unwrap_or(false);
        if eligible {
            self.cmd_restart(id, false, Some("health-check".to_string()));
        }
    }

    // ------------------------------------------------------------------
    // Persistence and snapshots
    // ------------------------------------------------------------------

    /// Persists the record's aggregate state, optionally with an event row in
    /// the same transaction, then publishes the event on the bus.
    fn persist(&mut self, id: ProcessId, event: Option<EventRecord>) {
        let Some(managed) = self.managed.get_mut(&id) else {
            return;
        };
        let status = aggregate_status(managed);
        let pid = managed
            .containers
            .values()
            .find(|c| c.state == ProcessStatus::Online)
            .and_then(|c| c.pid);
        let started_at = managed
            .containers
            .values()
            .filter_map(|c| c.started_at)
            .min();
        managed.record.status = status;
        managed.record.pid = pid;
        managed.record.started_at = started_at;

        let transition = Transition {
            status,
            pid,
            started_at,
            restarts: managed.record.restarts,
        };
        let name = managed.record.spec.name.clone();

        match self.store.record_transition(id, &transition, event.as_ref()) {
            Ok(()) => {
                if let Some(event) = event {
                    self.bus.publish(BusEvent::Process(event));
                }
            }
            Err(err) => {
                // The persisted row still holds the previous state; events are
                // only published for states that reached disk.
                error!("failed to persist transition for '{name}': {err}");
            }
        }
    }

    fn view(&self, id: ProcessId) -> ProcessView {
        let managed = &self.managed[&id];
        build_view(managed, self.cpus)
    }

    fn publish_snapshot(&self) {
        let mut views = HashMap::with_capacity(self.managed.len());
        for (id, managed) in &self.managed {
            views.insert(*id, build_view(managed, self.cpus));
        }
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = views;
    }
}

fn aggregate_status(managed: &Managed) -> ProcessStatus {
    let states: Vec<ProcessStatus> =
        managed.containers.values().map(|c| c.state).collect();
    for state in [
        ProcessStatus::Online,
        ProcessStatus::Launching,
        ProcessStatus::Stopping,
        ProcessStatus::WaitingRestart,
        ProcessStatus::Errored,
    ] {
        if states.contains(&state) {
            return state;
        }
    }
    ProcessStatus::Stopped
}

fn build_view(managed: &Managed, cpus: u32) -> ProcessView {
    ProcessView {
        id: managed.record.id,
        name: managed.record.spec.name.clone(),
        exec_mode: managed.record.spec.exec_mode.as_ref().to_string(),
        status: aggregate_status(managed),
        restarts: managed.record.restarts,
        instances: managed.record.spec.instances.resolve(cpus),
        max_memory_restart: managed.record.spec.max_memory_restart,
        // Probes fall back to the process-level port.
        health_check: managed.record.spec.health_check.clone().map(|mut h| {
            h.port = h.port.or(managed.record.spec.port);
            h
        }),
        containers: managed
            .containers
            .values()
            .map(|c| ContainerView {
                instance: c.instance,
                state: c.state,
                pid: c.pid,
                started_at: c.started_at,
                restarts: c.streak,
                last_exit: c.last_exit,
            })
            .collect(),
    }
}

/// Delay before the `streak`-th respawn attempt.
fn respawn_delay(restart_delay: Duration, exp_backoff: Duration, streak: u32) -> Duration {
    let shift = streak.saturating_sub(1).min(20);
    let backoff_ms = (exp_backoff.as_millis() as u64).saturating_mul(1u64 << shift);
    let delay = restart_delay.max(Duration::from_millis(backoff_ms));
    delay.min(RESTART_BACKOFF_CEILING)
}

/// Signals the child's process group, falling back to the bare PID when the
/// group is gone.
fn send_signal(pid: u32, sig: Signal) {
    let target = Pid::from_raw(pid as i32);
    if signal::killpg(target, sig).is_err() {
        let _ = signal::kill(target, sig);
    }
}

/// Worker-thread body: fork the child, report the outcome, then wait for it.
fn spawn_and_wait(
    tx: Sender<Msg>,
    logs: LogAggregator,
    id: ProcessId,
    instance: u32,
    generation: u64,
    spec: &ProcessSpec,
    declared_instances: u32,
) {
    let mut cmd = match &spec.interpreter {
        Some(interpreter) => {
            let mut cmd = OsCommand::new(interpreter);
            cmd.args(&spec.interpreter_args);
            cmd.arg(&spec.script);
            cmd
        }
        None => OsCommand::new(&spec.script),
    };
    cmd.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    cmd.envs(&spec.env);
    cmd.env("INSTANCE_INDEX", instance.to_string());
    cmd.env("INSTANCE_COUNT", declared_instances.to_string());
    if let Some(port) = spec.port {
        cmd.env("PORT", port.to_string());
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = tx.send(Msg::SpawnResult {
                id,
                instance,
                generation,
                result: Err(err),
            });
            return;
        }
    };

    let pid = child.id();
    if let Some(stdout) = child.stdout.take() {
        logs.capture(id, StreamKind::Stdout, stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        logs.capture(id, StreamKind::Stderr, stderr);
    }
    let _ = tx.send(Msg::SpawnResult {
        id,
        instance,
        generation,
        result: Ok(pid),
    });

    let exit = match child.wait() {
        Ok(status) => ExitInfo {
            code: status.code(),
            #[cfg(unix)]
            signal: status.signal(),
            #[cfg(not(unix))]
            signal: None,
        },
        Err(err) => {
            error!("failed to wait for child {pid}: {err}");
            ExitInfo::default()
        }
    };
    let _ = tx.send(Msg::ChildExited {
        id,
        instance,
        generation,
        exit,
    });
}
