//! In-process topic-keyed publish/subscribe connecting the supervisor,
//! monitors and adapters.
//!
//! Dispatch is synchronous on the publisher's thread against a snapshot of
//! the subscriber list, so a subscriber added mid-publish never receives the
//! in-flight event. A panicking subscriber is isolated from its siblings and
//! from the publisher.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, atomic::{AtomicU64, Ordering}},
};
use tracing::error;

use crate::process::{EventRecord, ProcessId, SystemSample};

/// Topics events are published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Lifecycle events (start, stop, crash, ...).
    Process,
    /// Captured log lines.
    Log,
    /// Per-process metric samples.
    Metric,
    /// System-wide metric samples.
    SystemMetric,
    /// Daemon-level warnings (log backpressure, dropped batches).
    Daemon,
}

/// Which stdio stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Stream label used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }

    /// Log file extension for this stream (`out` / `err`).
    pub fn file_ext(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "out",
            StreamKind::Stderr => "err",
        }
    }
}

/// One captured and tagged log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    /// Process the line belongs to.
    pub process_id: ProcessId,
    /// Process name at capture time.
    pub process_name: String,
    /// Source stream.
    pub stream: StreamKind,
    /// Line content without the trailing newline.
    pub line: String,
    /// Capture time.
    pub ts: DateTime<Utc>,
}

/// Per-process metric event published every sampling tick.
#[derive(Debug, Clone, Serialize)]
pub struct MetricEvent {
    pub process_id: ProcessId,
    pub process_name: String,
    pub instance: u32,
    pub pid: u32,
    pub cpu: f64,
    pub memory: u64,
    pub ts: i64,
}

/// Event payloads carried by the bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum BusEvent {
    /// Lifecycle event, mirroring the persisted event row.
    Process(EventRecord),
    /// Captured log line.
    Log(LogLine),
    /// Per-process metric sample.
    Metric(MetricEvent),
    /// System-wide metric sample.
    SystemMetric(SystemSample),
    /// Daemon-level warning.
    Warning {
        /// Component that raised the warning.
        source: String,
        /// Human-readable description.
        message: String,
    },
}

impl BusEvent {
    /// Topic this event is published under.
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Process(_) => Topic::Process,
            BusEvent::Log(_) => Topic::Log,
            BusEvent::Metric(_) => Topic::Metric,
            BusEvent::SystemMetric(_) => Topic::SystemMetric,
            BusEvent::Warning { .. } => Topic::Daemon,
        }
    }
}

type Subscriber = Arc<dyn Fn(&BusEvent) + Send + Sync + 'static>;

/// Handle used to remove a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Shared in-process event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<Topic, Vec<(u64, Subscriber)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for one topic.
    pub fn subscribe<F>(&self, topic: Topic, subscriber: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.entry(topic).or_default().push((id, Arc::new(subscriber)));
        SubscriptionId(id)
    }

    /// Removes a subscriber. Removing twice is a no-op.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) {
        let mut subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|(sub_id, _)| *sub_id != id.0);
        }
    }

    /// Publishes an event, dispatching synchronously to a snapshot of the
    /// topic's subscribers in registration order.
    pub fn publish(&self, event: BusEvent) {
        let snapshot: Vec<Subscriber> = {
            let subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.get(&event.topic())
                .map(|list| list.iter().map(|(_, s)| Arc::clone(s)).collect())
                .unwrap_or_default()
        };

        for subscriber in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber(&event)));
            if result.is_err() {
                error!("event subscriber panicked; continuing dispatch");
            }
        }
    }

    /// Number of subscribers currently registered for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.get(&topic).map(Vec::len).unwrap_or(0)
    }
}
