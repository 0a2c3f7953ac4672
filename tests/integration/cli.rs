use assert_cmd::Command;
use predicates::prelude::*;

fn nova() -> Command {
    Command::cargo_bin("nova").expect("binary built")
}

#[test]
fn help_lists_core_commands() {
    nova()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("scale"))
        .stdout(predicate::str::contains("resurrect"));
}

#[test]
fn ping_without_daemon_fails_with_exit_one() {
    let home = tempfile::tempdir().unwrap();
    nova()
        .env("NOVA_HOME", home.path())
        .arg("ping")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("daemon not running"));
}

#[test]
fn stop_without_daemon_reports_the_error() {
    let home = tempfile::tempdir().unwrap();
    nova()
        .env("NOVA_HOME", home.path())
        .args(["stop", "api"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn init_writes_a_starter_app_file() {
    let dir = tempfile::tempdir().unwrap();
    nova()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("nova.yaml"));

    let content = std::fs::read_to_string(dir.path().join("nova.yaml")).unwrap();
    assert!(content.contains("apps:"));
    assert!(content.contains("health_check:"));

    // A second init refuses to overwrite.
    nova()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn startup_prints_a_systemd_unit() {
    nova()
        .arg("startup")
        .assert()
        .success()
        .stdout(predicate::str::contains("[Service]"))
        .stdout(predicate::str::contains("ExecStart"));
}

#[test]
fn dashboard_prints_the_api_address() {
    nova()
        .arg("dashboard")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://127.0.0.1:9615"));
}

#[test]
fn scale_rejects_garbage_counts() {
    let home = tempfile::tempdir().unwrap();
    nova()
        .env("NOVA_HOME", home.path())
        .args(["scale", "api", "lots"])
        .assert()
        .failure()
        .code(1);
}
