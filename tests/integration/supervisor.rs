mod common;

use std::time::{Duration, Instant};

use common::{Harness, shell_spec, wait_until};
use novapm::{
    config::{ExecMode, InstanceCount},
    error::NovaError,
    events::{BusEvent, Topic},
    health::HealthMonitor,
    process::{EventType, ProcessStatus, ScaleArg, Target},
};

#[test]
fn basic_start_and_list() {
    let harness = Harness::new();
    let mut spec = shell_spec("api", "sleep 30");
    spec.autorestart = true;

    let view = harness.supervisor.start(spec).unwrap();
    assert_eq!(view.name, "api");

    harness.wait_for_status("api", ProcessStatus::Online);

    let list = harness.supervisor.list().unwrap();
    assert_eq!(list.len(), 1);
    let entry = &list[0];
    assert_eq!(entry.status, ProcessStatus::Online);
    assert!(entry.primary_pid().is_some());
    assert_eq!(entry.restarts, 0);

    // The persisted row tracks the transition.
    let record = harness.store.get_process(entry.id).unwrap().unwrap();
    assert_eq!(record.status, ProcessStatus::Online);
    assert_eq!(record.pid, entry.primary_pid());

    harness
        .supervisor
        .stop(Target::Name("api".to_string()), false)
        .unwrap();
    harness.wait_for_status("api", ProcessStatus::Stopped);
}

#[test]
fn duplicate_start_is_rejected_and_state_unchanged() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec("api", "sleep 30"))
        .unwrap();
    harness.wait_for_status("api", ProcessStatus::Online);
    let before = harness.supervisor.list().unwrap();

    let err = harness
        .supervisor
        .start(shell_spec("api", "sleep 1"))
        .unwrap_err();
    assert!(matches!(err, NovaError::ProcessAlreadyExists(name) if name == "api"));

    let after = harness.supervisor.list().unwrap();
    assert_eq!(before.len(), after.len());
    assert_eq!(after[0].status, ProcessStatus::Online);
}

#[test]
fn crash_loop_respects_backoff_and_budget() {
    let harness = Harness::new();
    let mut spec = shell_spec("crasher", "exit 1");
    spec.max_restarts = 3;
    spec.restart_delay = Duration::from_millis(100);
    spec.exp_backoff_restart_delay = Duration::from_millis(100);

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("crasher", ProcessStatus::Errored);

    // Initial start plus exactly max_restarts respawn attempts.
    let starts = harness.events_of(EventType::Start);
    assert_eq!(starts.len(), 4);
    let crashes = harness.events_of(EventType::Crash);
    assert_eq!(crashes.len(), 4);

    let errors = harness.events_of(EventType::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].record.data["reason"], "max-restarts-exceeded");

    // Backoff: successive starts are spaced at least 100, 200, 400 ms apart.
    let gaps: Vec<Duration> = starts
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect();
    assert!(gaps[0] >= Duration::from_millis(100), "gap {:?}", gaps[0]);
    assert!(gaps[1] >= Duration::from_millis(200), "gap {:?}", gaps[1]);
    assert!(gaps[2] >= Duration::from_millis(400), "gap {:?}", gaps[2]);

    // The lifetime restart counter matches the respawn attempts.
    let view = harness
        .supervisor
        .info(Target::Name("crasher".to_string()))
        .unwrap();
    assert_eq!(view.restarts, 3);
}

#[test]
fn reset_clears_the_errored_state() {
    let harness = Harness::new();
    let mut spec = shell_spec("flappy", "exit 1");
    spec.max_restarts = 1;
    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("flappy", ProcessStatus::Errored);

    harness
        .supervisor
        .reset(Target::Name("flappy".to_string()))
        .unwrap();
    let view = harness
        .supervisor
        .info(Target::Name("flappy".to_string()))
        .unwrap();
    assert_eq!(view.status, ProcessStatus::Stopped);
    assert_eq!(view.restarts, 0);
}

#[test]
fn clean_exit_without_autorestart_stays_stopped() {
    let harness = Harness::new();
    let mut spec = shell_spec("oneshot", "exit 0");
    spec.autorestart = false;

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("oneshot", ProcessStatus::Stopped);

    assert_eq!(harness.events_of(EventType::Start).len(), 1);
    assert_eq!(harness.events_of(EventType::Exit).len(), 1);
    assert!(harness.events_of(EventType::Crash).is_empty());
}

#[test]
fn graceful_stop_lets_the_child_exit_on_sigint() {
    let harness = Harness::new();
    let mut spec = shell_spec(
        "polite",
        "trap 'exit 0' INT; while true; do sleep 0.05; done",
    );
    spec.kill_timeout = Duration::from_secs(5);

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("polite", ProcessStatus::Online);

    let stopped_at = Instant::now();
    harness
        .supervisor
        .stop(Target::Name("polite".to_string()), false)
        .unwrap();
    harness.wait_for_status("polite", ProcessStatus::Stopped);

    // The child honoured SIGINT well before the kill window.
    assert!(stopped_at.elapsed() < Duration::from_secs(4));
    assert_eq!(harness.events_of(EventType::Stop).len(), 1);
}

#[test]
fn stubborn_child_is_killed_after_the_timeout() {
    let harness = Harness::new();
    let mut spec = shell_spec(
        "stubborn",
        "trap '' INT; while true; do sleep 0.05; done",
    );
    spec.kill_timeout = Duration::from_millis(500);

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("stubborn", ProcessStatus::Online);

    let stopped_at = Instant::now();
    harness
        .supervisor
        .stop(Target::Name("stubborn".to_string()), false)
        .unwrap();
    harness.wait_for_status("stubborn", ProcessStatus::Stopped);

    // SIGKILL only fires after the kill window has elapsed.
    assert!(stopped_at.elapsed() >= Duration::from_millis(500));
}

#[test]
fn cluster_scale_down_stops_highest_indices() {
    let harness = Harness::new();
    let mut spec = shell_spec("workers", "sleep 60");
    spec.exec_mode = ExecMode::Cluster;
    spec.instances = InstanceCount::Count(4);

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_view("workers", |view| {
        view.containers
            .iter()
            .filter(|c| c.state == ProcessStatus::Online)
            .count()
            == 4
    });

    let view = harness
        .supervisor
        .scale(Target::Name("workers".to_string()), ScaleArg::Absolute(2))
        .unwrap();
    assert_eq!(view.instances, 2);

    harness.wait_for_view("workers", |view| {
        view.containers.len() == 2
            && view
                .containers
                .iter()
                .all(|c| c.state == ProcessStatus::Online)
    });

    let view = harness
        .supervisor
        .info(Target::Name("workers".to_string()))
        .unwrap();
    let indices: Vec<u32> = view.containers.iter().map(|c| c.instance).collect();
    assert_eq!(indices, vec![0, 1]);

    // Declared count is persisted.
    let record = harness.store.get_process(view.id).unwrap().unwrap();
    assert_eq!(record.spec.instances, InstanceCount::Count(2));

    let scaling = harness.events_of(EventType::Scaling);
    assert_eq!(scaling.len(), 1);
    assert_eq!(scaling[0].record.data["from"], 4);
    assert_eq!(scaling[0].record.data["to"], 2);
}

#[test]
fn cluster_children_receive_instance_environment() {
    let harness = Harness::new();
    let out_dir = harness.dir.path().to_path_buf();
    let mut spec = shell_spec(
        "indexed",
        &format!(
            "echo $INSTANCE_INDEX/$INSTANCE_COUNT/$PORT > {}/idx_$INSTANCE_INDEX; sleep 60",
            out_dir.display()
        ),
    );
    spec.exec_mode = ExecMode::Cluster;
    spec.instances = InstanceCount::Count(2);
    spec.port = Some(4100);

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_view("indexed", |view| {
        view.containers
            .iter()
            .filter(|c| c.state == ProcessStatus::Online)
            .count()
            == 2
    });

    wait_until(Duration::from_secs(10), || {
        out_dir.join("idx_0").exists() && out_dir.join("idx_1").exists()
    });
    let idx0 = std::fs::read_to_string(out_dir.join("idx_0")).unwrap();
    let idx1 = std::fs::read_to_string(out_dir.join("idx_1")).unwrap();
    assert_eq!(idx0.trim(), "0/2/4100");
    assert_eq!(idx1.trim(), "1/2/4100");
}

#[test]
fn delete_removes_record_and_history() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec("doomed", "sleep 60"))
        .unwrap();
    harness.wait_for_status("doomed", ProcessStatus::Online);
    let id = harness
        .supervisor
        .info(Target::Name("doomed".to_string()))
        .unwrap()
        .id;

    harness
        .supervisor
        .delete(Target::Name("doomed".to_string()))
        .unwrap();

    wait_until(Duration::from_secs(20), || {
        harness.supervisor.list().unwrap().is_empty()
    });
    wait_until(Duration::from_secs(10), || {
        harness.store.get_process(id).unwrap().is_none()
    });
}

#[test]
fn restore_relaunches_only_autorestart_records() {
    let harness = Harness::new();

    let auto = shell_spec("auto", "sleep 60");
    let mut manual = shell_spec("manual", "sleep 60");
    manual.autorestart = false;

    harness.store.insert_process(&auto).unwrap();
    harness.store.insert_process(&manual).unwrap();

    let started = harness.supervisor.restore().unwrap();
    assert_eq!(started, 1);

    harness.wait_for_status("auto", ProcessStatus::Online);
    let manual_view = harness
        .supervisor
        .info(Target::Name("manual".to_string()))
        .unwrap();
    assert_eq!(manual_view.status, ProcessStatus::Stopped);
}

#[test]
fn memory_report_triggers_container_restart() {
    let harness = Harness::new();
    let mut spec = shell_spec("hungry", "sleep 60");
    spec.max_memory_restart = Some(64 * 1024 * 1024);

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("hungry", ProcessStatus::Online);
    let view = harness
        .supervisor
        .info(Target::Name("hungry".to_string()))
        .unwrap();
    let first_pid = view.primary_pid().unwrap();

    harness
        .supervisor
        .notify_memory_exceeded(view.id, 0, first_pid, 128 * 1024 * 1024);

    // The container comes back online under a fresh PID.
    harness.wait_for_view("hungry", |view| {
        view.status == ProcessStatus::Online
            && view.primary_pid().map(|pid| pid != first_pid).unwrap_or(false)
    });

    let restarts = harness.events_of(EventType::Restart);
    assert!(!restarts.is_empty());
    assert_eq!(restarts[0].record.data["reason"], "memory-threshold");
}

#[test]
fn stop_all_brings_every_process_down() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec("one", "sleep 60"))
        .unwrap();
    harness
        .supervisor
        .start(shell_spec("two", "sleep 60"))
        .unwrap();
    harness.wait_for_status("one", ProcessStatus::Online);
    harness.wait_for_status("two", ProcessStatus::Online);

    harness.supervisor.stop_all().unwrap();

    for name in ["one", "two"] {
        let view = harness
            .supervisor
            .info(Target::Name(name.to_string()))
            .unwrap();
        assert_eq!(view.status, ProcessStatus::Stopped, "{name} still running");
    }
}

#[test]
fn restart_command_cycles_the_child() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec("cycled", "sleep 60"))
        .unwrap();
    harness.wait_for_status("cycled", ProcessStatus::Online);
    let first_pid = harness
        .supervisor
        .info(Target::Name("cycled".to_string()))
        .unwrap()
        .primary_pid()
        .unwrap();

    harness
        .supervisor
        .restart(Target::Name("cycled".to_string()), false)
        .unwrap();

    harness.wait_for_view("cycled", |view| {
        view.status == ProcessStatus::Online
            && view.primary_pid().map(|pid| pid != first_pid).unwrap_or(false)
    });

    let view = harness
        .supervisor
        .info(Target::Name("cycled".to_string()))
        .unwrap();
    assert_eq!(view.restarts, 1);
}

#[test]
fn save_and_resurrect_round_trip() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec("kept", "sleep 60"))
        .unwrap();
    harness.wait_for_status("kept", ProcessStatus::Online);

    let dump = harness.dir.path().join("dump.json");
    let saved = harness.supervisor.save(dump.clone()).unwrap();
    assert_eq!(saved, 1);

    harness
        .supervisor
        .delete(Target::Name("kept".to_string()))
        .unwrap();
    wait_until(Duration::from_secs(20), || {
        harness.supervisor.list().unwrap().is_empty()
    });

    let started = harness.supervisor.resurrect(dump).unwrap();
    assert_eq!(started, 1);
    harness.wait_for_status("kept", ProcessStatus::Online);
}

#[test]
fn failing_health_probe_restarts_the_process() {
    let harness = Harness::new();
    let mut spec = shell_spec("probed", "sleep 60");
    spec.health_check = Some(novapm::config::HealthCheckSpec {
        kind: novapm::config::HealthCheckKind::Script,
        host: "127.0.0.1".to_string(),
        port: None,
        path: "/".to_string(),
        script: Some("exit 1".to_string()),
        interval: Duration::from_millis(200),
        timeout: Duration::from_millis(500),
        retries: 2,
        start_period: Duration::ZERO,
    });

    harness.supervisor.start(spec).unwrap();
    harness.wait_for_status("probed", ProcessStatus::Online);

    let monitor = HealthMonitor::spawn(
        harness.supervisor.snapshot(),
        harness.supervisor.clone(),
        std::sync::Arc::clone(&harness.store),
        harness.bus.clone(),
    );

    wait_until(Duration::from_secs(20), || {
        !harness.events_of(EventType::HealthCheckFail).is_empty()
    });
    wait_until(Duration::from_secs(20), || {
        harness
            .events_of(EventType::Restart)
            .iter()
            .any(|seen| seen.record.data["reason"] == "health-check")
    });

    monitor.stop();
}

#[test]
fn log_events_flow_for_started_processes() {
    let harness = Harness::new();
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    harness.bus.subscribe(Topic::Log, move |event| {
        if let BusEvent::Log(line) = event {
            sink.lock().unwrap().push(line.line.clone());
        }
    });

    harness
        .supervisor
        .start(shell_spec("chatty", "echo ready; sleep 60"))
        .unwrap();

    wait_until(Duration::from_secs(10), || {
        seen.lock().unwrap().iter().any(|line| line == "ready")
    });
}
