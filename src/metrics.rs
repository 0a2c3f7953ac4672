//! Metrics collection: per-PID CPU/RSS sampling, system-wide samples,
//! batched persistence and time-window downsampling.
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::{
    events::{BusEvent, EventBus, MetricEvent},
    process::{MetricSample, ProcessId, ProcessStatus, SystemSample},
    store::Store,
    supervisor::{Snapshot, SupervisorHandle},
};

/// Tuning knobs for the collector and downsampler.
#[derive(Debug, Clone)]
pub struct MetricsSettings {
    /// Interval between per-PID samples.
    pub sample_interval: Duration,
    /// Number of samples buffered before a batch insert.
    pub flush_every: usize,
    /// Age after which samples are coarsened into minute buckets.
    pub coarsen_after: Duration,
    /// Age after which samples are deleted outright.
    pub expire_after: Duration,
    /// Interval between downsampling passes.
    pub downsample_interval: Duration,
    /// Bucket width used when coarsening.
    pub bucket: Duration,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            flush_every: 10,
            coarsen_after: Duration::from_secs(24 * 3600),
            expire_after: Duration::from_secs(30 * 24 * 3600),
            downsample_interval: Duration::from_secs(3600),
            bucket: Duration::from_secs(60),
        }
    }
}

/// Most recent per-container samples plus the latest system sample, served
/// from memory to the adapters.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    latest: Arc<RwLock<HashMap<(ProcessId, u32), MetricEvent>>>,
    system: Arc<RwLock<SystemSample>>,
}

impl MetricsHandle {
    /// Latest sample per container of one process.
    pub fn latest_for(&self, id: ProcessId) -> Vec<MetricEvent> {
        let guard = self.latest.read().unwrap_or_else(|e| e.into_inner());
        let mut samples: Vec<_> = guard
            .iter()
            .filter(|((pid, _), _)| *pid == id)
            .map(|(_, event)| event.clone())
            .collect();
        samples.sort_by_key(|event| event.instance);
        samples
    }

    /// Aggregate CPU/RSS across one process's containers.
    pub fn aggregate_for(&self, id: ProcessId) -> (f64, u64) {
        let guard = self.latest.read().unwrap_or_else(|e| e.into_inner());
        guard
            .iter()
            .filter(|((pid, _), _)| *pid == id)
            .fold((0.0, 0u64), |(cpu, mem), (_, event)| {
                (cpu + event.cpu, mem + event.memory)
            })
    }

    /// Latest system-wide sample.
    pub fn system(&self) -> SystemSample {
        self.system.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Background worker that samples every online container each tick.
pub struct MetricsCollector {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MetricsCollector {
    pub fn spawn(
        snapshot: Snapshot,
        supervisor: SupervisorHandle,
        store: Arc<Store>,
        bus: EventBus,
        metrics: MetricsHandle,
        settings: MetricsSettings,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("nova-metrics".to_string())
            .spawn(move || {
                let mut system = System::new();
                let mut batch: Vec<MetricSample> = Vec::new();
                let mut ticks = 0usize;

                while !stop_clone.load(Ordering::SeqCst) {
                    sample_tick(
                        &mut system,
                        &snapshot,
                        &supervisor,
                        &bus,
                        &metrics,
                        &mut batch,
                    );

                    ticks += 1;
                    if ticks.is_multiple_of(settings.flush_every) && !batch.is_empty() {
                        if let Err(err) = store.insert_metrics(&batch) {
                            // Best effort: log the failed batch, no retry queue.
                            warn!("failed to persist metrics batch ({} rows): {err}", batch.len());
                        }
                        batch.clear();
                    }

                    sleep_with_stop(&stop_clone, settings.sample_interval);
                }

                if !batch.is_empty()
                    && let Err(err) = store.insert_metrics(&batch)
                {
                    warn!("failed to flush final metrics batch: {err}");
                }
            })
            .expect("failed to spawn metrics collector thread");

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One sampling pass over every online container plus the system totals.
fn sample_tick(
    system: &mut System,
    snapshot: &Snapshot,
    supervisor: &SupervisorHandle,
    bus: &EventBus,
    metrics: &MetricsHandle,
    batch: &mut Vec<MetricSample>,
) {
    struct SampleTarget {
        id: ProcessId,
        name: String,
        instance: u32,
        pid: u32,
        max_memory: Option<u64>,
    }

    let targets: Vec<SampleTarget> = {
        let guard = snapshot.read().unwrap_or_else(|e| e.into_inner());
        guard
            .values()
            .flat_map(|view| {
                view.containers
                    .iter()
                    .filter(|c| c.state == ProcessStatus::Online)
                    .filter_map(|c| {
                        c.pid.map(|pid| SampleTarget {
                            id: view.id,
                            name: view.name.clone(),
                            instance: c.instance,
                            pid,
                            max_memory: view.max_memory_restart,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    };

    let ts = Utc::now().timestamp();
    let pids: Vec<Pid> = targets.iter().map(|t| Pid::from_u32(t.pid)).collect();
    if !pids.is_empty() {
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::everything(),
        );
    }

    let mut per_process: HashMap<ProcessId, (f64, u64)> = HashMap::new();
    let mut live_keys = Vec::with_capacity(targets.len());

    for target in &targets {
        // The child may have died between snapshot and refresh; skip it.
        let Some(process) = system.process(Pid::from_u32(target.pid)) else {
            continue;
        };
        let cpu = process.cpu_usage() as f64;
        let memory = process.memory();

        let event = MetricEvent {
            process_id: target.id,
            process_name: target.name.clone(),
            instance: target.instance,
            pid: target.pid,
            cpu,
            memory,
            ts,
        };
        {
            let mut guard = metrics.latest.write().unwrap_or_else(|e| e.into_inner());
            guard.insert((target.id, target.instance), event.clone());
        }
        live_keys.push((target.id, target.instance));
        bus.publish(BusEvent::Metric(event));

        let entry = per_process.entry(target.id).or_insert((0.0, 0));
        entry.0 += cpu;
        entry.1 += memory;

        if let Some(limit) = target.max_memory
            && memory > limit
        {
            debug!(
                "container {}:{} rss {memory} exceeds limit {limit}",
                target.id, target.instance
            );
            supervisor.notify_memory_exceeded(target.id, target.instance, target.pid, memory);
        }
    }

    // Drop stale entries for containers that are gone.
    {
        let mut guard = metrics.latest.write().unwrap_or_else(|e| e.into_inner());
        guard.retain(|key, _| live_keys.contains(key));
    }

    for (id, (cpu, memory)) in per_process {
        batch.push(MetricSample::os(id, ts, cpu, memory));
    }

    // System-wide totals are sampled separately from the PID walk.
    system.refresh_cpu_usage();
    system.refresh_memory();
    let load = System::load_average();
    let sample = SystemSample {
        ts,
        cpu: system.global_cpu_usage() as f64,
        memory_total: system.total_memory(),
        memory_used: system.used_memory(),
        load: [load.one, load.five, load.fifteen],
    };
    {
        let mut guard = metrics.system.write().unwrap_or_else(|e| e.into_inner());
        *guard = sample.clone();
    }
    bus.publish(BusEvent::SystemMetric(sample));
}

/// Background worker that periodically coarsens and expires history.
pub struct Downsampler {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Downsampler {
    pub fn spawn(store: Arc<Store>, settings: MetricsSettings) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("nova-downsample".to_string())
            .spawn(move || {
                while !stop_clone.load(Ordering::SeqCst) {
                    sleep_with_stop(&stop_clone, settings.downsample_interval);
                    if stop_clone.load(Ordering::SeqCst) {
                        break;
                    }

                    let now = Utc::now().timestamp();
                    let coarsen_before = now - settings.coarsen_after.as_secs() as i64;
                    let expire_before = now - settings.expire_after.as_secs() as i64;
                    match store.downsample(
                        coarsen_before,
                        expire_before,
                        settings.bucket.as_secs() as i64,
                    ) {
                        Ok(report) => debug!(
                            "downsample pass: {} aggregates, {} expired",
                            report.aggregated, report.expired
                        ),
                        Err(err) => warn!("downsample pass failed: {err}"),
                    }
                }
            })
            .expect("failed to spawn downsampler thread");

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Downsampler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Sleeps in short steps so a stop request interrupts promptly.
fn sleep_with_stop(stop: &Arc<AtomicBool>, total: Duration) {
    let mut slept = Duration::ZERO;
    while slept < total {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let remaining = total.saturating_sub(slept);
        let step = remaining.min(Duration::from_millis(100));
        thread::sleep(step);
        slept += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_aggregates_across_instances() {
        let handle = MetricsHandle::default();
        {
            let mut guard = handle.latest.write().unwrap();
            for (instance, cpu, memory) in [(0u32, 10.0, 100u64), (1, 15.0, 150)] {
                guard.insert(
                    (7, instance),
                    MetricEvent {
                        process_id: 7,
                        process_name: "api".to_string(),
                        instance,
                        pid: 100 + instance,
                        cpu,
                        memory,
                        ts: 0,
                    },
                );
            }
            guard.insert(
                (8, 0),
                MetricEvent {
                    process_id: 8,
                    process_name: "other".to_string(),
                    instance: 0,
                    pid: 200,
                    cpu: 99.0,
                    memory: 999,
                    ts: 0,
                },
            );
        }

        let (cpu, memory) = handle.aggregate_for(7);
        assert!((cpu - 25.0).abs() < f64::EPSILON);
        assert_eq!(memory, 250);

        let samples = handle.latest_for(7);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].instance, 0);
        assert_eq!(samples[1].instance, 1);
    }

    #[test]
    fn sleep_with_stop_returns_early() {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let started = std::time::Instant::now();
        let waiter = thread::spawn(move || {
            sleep_with_stop(&stop_clone, Duration::from_secs(30));
        });
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
        waiter.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn default_settings_are_sane() {
        let settings = MetricsSettings::default();
        assert_eq!(settings.sample_interval, Duration::from_secs(1));
        assert!(settings.coarsen_after < settings.expire_after);
        assert_eq!(settings.bucket, Duration::from_secs(60));
    }
}
