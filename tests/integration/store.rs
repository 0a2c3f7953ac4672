use chrono::Utc;
use novapm::{
    config::{ExecMode, InstanceCount, ProcessSpec},
    process::{EventRecord, EventType, MetricSample, ProcessStatus},
    store::{Store, Transition},
};
use serde_json::json;

#[test]
fn records_survive_a_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nova.db");

    let mut spec = ProcessSpec::new("api", "./server.js");
    spec.interpreter = Some("node".to_string());
    spec.exec_mode = ExecMode::Cluster;
    spec.instances = InstanceCount::Auto;
    spec.max_memory_restart = Some(512 * 1024 * 1024);

    let (id, started_at) = {
        let store = Store::open(&path).unwrap();
        let record = store.insert_process(&spec).unwrap();
        let started_at = Utc::now();
        store
            .record_transition(
                record.id,
                &Transition {
                    status: ProcessStatus::Online,
                    pid: Some(7777),
                    started_at: Some(started_at),
                    restarts: 2,
                },
                Some(&EventRecord::now(
                    record.id,
                    "api",
                    EventType::Online,
                    json!({"instance": 0}),
                )),
            )
            .unwrap();
        store
            .insert_metrics(&[MetricSample::os(record.id, 100, 3.5, 2048)])
            .unwrap();
        (record.id, started_at)
    };

    // Reopen the same file, as a restarted daemon would.
    let store = Store::open(&path).unwrap();
    let record = store.get_process(id).unwrap().unwrap();
    assert_eq!(record.spec, spec);
    assert_eq!(record.status, ProcessStatus::Online);
    assert_eq!(record.pid, Some(7777));
    assert_eq!(record.restarts, 2);
    assert_eq!(
        record.started_at.map(|t| t.timestamp()),
        Some(started_at.timestamp())
    );

    let metrics = store.metrics_range(id, 0, i64::MAX).unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].memory, 2048);

    let events = store.events_for_process(id, 0, i64::MAX, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Online);
}

#[test]
fn migrations_are_idempotent_across_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nova.db");

    let first = Store::open(&path).unwrap();
    let version = first.schema_version().unwrap();
    assert!(version >= 1);
    drop(first);

    let second = Store::open(&path).unwrap();
    assert_eq!(second.schema_version().unwrap(), version);
    // The schema is usable after the no-op migration pass.
    second
        .insert_process(&ProcessSpec::new("later", "./x.sh"))
        .unwrap();
}

#[test]
fn find_by_name_distinguishes_case() {
    let store = Store::open_in_memory().unwrap();
    store.insert_process(&ProcessSpec::new("Api", "./a.sh")).unwrap();

    assert!(store.find_by_name("Api").unwrap().is_some());
    assert!(store.find_by_name("api").unwrap().is_none());
}

#[test]
fn downsample_collapses_day_old_history() {
    let store = Store::open_in_memory().unwrap();
    let record = store
        .insert_process(&ProcessSpec::new("api", "./a.sh"))
        .unwrap();

    let now = Utc::now().timestamp();
    let day_ago = now - 24 * 3600;

    // Ten minutes of one-second samples from yesterday, one fresh sample.
    let mut samples = Vec::new();
    for i in 0..600 {
        samples.push(MetricSample::os(record.id, day_ago - 600 + i, 10.0, 1000));
    }
    samples.push(MetricSample::os(record.id, now, 42.0, 5000));
    store.insert_metrics(&samples).unwrap();

    let report = store.downsample(day_ago, now - 30 * 24 * 3600, 60).unwrap();
    assert!(report.aggregated >= 10 && report.aggregated <= 11);

    let old = store.metrics_range(record.id, 0, day_ago - 1).unwrap();
    assert!(old.len() <= 11);
    for sample in &old {
        assert_eq!(sample.ts % 60, 0);
        assert!((sample.cpu - 10.0).abs() < 1e-9);
    }

    let fresh = store.metrics_range(record.id, now, now).unwrap();
    assert_eq!(fresh.len(), 1);
    assert!((fresh[0].cpu - 42.0).abs() < 1e-9);
}
