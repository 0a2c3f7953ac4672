mod common;

use std::time::Duration;

use common::{Harness, shell_spec, wait_until};
use novapm::{
    events::StreamKind,
    process::{ProcessStatus, Target},
};

#[test]
fn child_output_reaches_files_and_ring() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec(
            "writer",
            "echo out line; echo err line >&2; sleep 60",
        ))
        .unwrap();
    harness.wait_for_status("writer", ProcessStatus::Online);

    let id = harness
        .supervisor
        .info(Target::Name("writer".to_string()))
        .unwrap()
        .id;

    wait_until(Duration::from_secs(10), || {
        harness.logs.recent(id, 10).len() >= 2
    });

    let recent = harness.logs.recent(id, 10);
    assert!(recent.iter().any(|l| l.line == "out line" && l.stream == StreamKind::Stdout));
    assert!(recent.iter().any(|l| l.line == "err line" && l.stream == StreamKind::Stderr));
    assert!(recent.iter().all(|l| l.process_name == "writer"));

    harness.logs.flush();
    let out_path = harness.dir.path().join("writer.out");
    let err_path = harness.dir.path().join("writer.err");
    wait_until(Duration::from_secs(5), || {
        out_path.exists() && err_path.exists()
    });
    let out = std::fs::read_to_string(&out_path).unwrap();
    let err = std::fs::read_to_string(&err_path).unwrap();
    assert!(out.contains("out line"));
    assert!(err.contains("err line"));
}

#[test]
fn stream_order_is_preserved_per_process() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec(
            "ordered",
            "for i in 1 2 3 4 5; do echo line $i; done; sleep 60",
        ))
        .unwrap();
    harness.wait_for_status("ordered", ProcessStatus::Online);

    let id = harness
        .supervisor
        .info(Target::Name("ordered".to_string()))
        .unwrap()
        .id;
    wait_until(Duration::from_secs(10), || {
        harness.logs.recent(id, 10).len() >= 5
    });

    let lines: Vec<String> = harness
        .logs
        .recent(id, 10)
        .into_iter()
        .filter(|l| l.stream == StreamKind::Stdout)
        .map(|l| l.line)
        .collect();
    assert_eq!(
        lines,
        vec!["line 1", "line 2", "line 3", "line 4", "line 5"]
    );
}

#[test]
fn ring_survives_a_restart_cycle() {
    let harness = Harness::new();
    harness
        .supervisor
        .start(shell_spec("phoenix", "echo alive; sleep 60"))
        .unwrap();
    harness.wait_for_status("phoenix", ProcessStatus::Online);
    let id = harness
        .supervisor
        .info(Target::Name("phoenix".to_string()))
        .unwrap()
        .id;
    wait_until(Duration::from_secs(10), || {
        !harness.logs.recent(id, 10).is_empty()
    });

    harness
        .supervisor
        .restart(Target::Name("phoenix".to_string()), false)
        .unwrap();
    wait_until(Duration::from_secs(20), || {
        harness.logs.recent(id, 10).len() >= 2
    });

    let alive_lines = harness
        .logs
        .recent(id, 10)
        .into_iter()
        .filter(|l| l.line == "alive")
        .count();
    assert!(alive_lines >= 2);
}
