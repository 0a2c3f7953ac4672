#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use novapm::{
    config::ProcessSpec,
    events::{BusEvent, EventBus, Topic},
    logs::LogAggregator,
    process::{EventRecord, EventType, ProcessStatus, Target},
    store::Store,
    supervisor::{Supervisor, SupervisorHandle},
};
use tempfile::TempDir;

/// A collected lifecycle event plus its arrival instant, for timing checks.
#[derive(Clone)]
pub struct SeenEvent {
    pub at: Instant,
    pub record: EventRecord,
}

pub type EventLog = Arc<Mutex<Vec<SeenEvent>>>;

/// Fully wired supervisor over an in-memory store and a scratch log dir.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<Store>,
    pub bus: EventBus,
    pub logs: LogAggregator,
    pub supervisor: SupervisorHandle,
    pub events: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let bus = EventBus::new();
        let logs = LogAggregator::new(dir.path().to_path_buf(), bus.clone());

        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(Topic::Process, move |event| {
            if let BusEvent::Process(record) = event {
                sink.lock().unwrap().push(SeenEvent {
                    at: Instant::now(),
                    record: record.clone(),
                });
            }
        });

        let supervisor = Supervisor::spawn(Arc::clone(&store), bus.clone(), logs.clone());
        Self {
            dir,
            store,
            bus,
            logs,
            supervisor,
            events,
        }
    }

    /// Events of one type, in arrival order.
    pub fn events_of(&self, event_type: EventType) -> Vec<SeenEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.record.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Full type sequence, for order assertions.
    pub fn event_types(&self) -> Vec<EventType> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|seen| seen.record.event_type)
            .collect()
    }

    /// Waits until the aggregate status of `name` matches.
    pub fn wait_for_status(&self, name: &str, status: ProcessStatus) {
        wait_until(Duration::from_secs(20), || {
            self.supervisor
                .info(Target::Name(name.to_string()))
                .map(|view| view.status == status)
                .unwrap_or(false)
        });
    }

    /// Waits until `predicate` holds for the named process view.
    pub fn wait_for_view(
        &self,
        name: &str,
        predicate: impl Fn(&novapm::process::ProcessView) -> bool,
    ) {
        wait_until(Duration::from_secs(20), || {
            self.supervisor
                .info(Target::Name(name.to_string()))
                .map(|view| predicate(&view))
                .unwrap_or(false)
        });
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        // Leave no children behind when a test ends or panics.
        let _ = self.supervisor.shutdown();
    }
}

/// Spec running `sh -c <body>` under a given name.
pub fn shell_spec(name: &str, body: &str) -> ProcessSpec {
    let mut spec = ProcessSpec::new(name, "/bin/sh");
    spec.args = vec!["-c".to_string(), body.to_string()];
    spec
}

/// Polls until the predicate holds, panicking past the deadline.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for condition");
        }
        thread::sleep(Duration::from_millis(50));
    }
}
