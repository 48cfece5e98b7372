#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const TARGETS: &str = r#"
targets:
  - name: lint
    run: echo "vet found 1 issue" >&2; exit 1
  - name: test
    run: echo "ok  ./... 0.01s"
"#;

fn workspace(targets: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fanbuild.yml"), targets).unwrap();
    dir
}

fn fanbuild(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fanbuild").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_all_runs_every_target_and_names_failures() {
    let dir = workspace(TARGETS);

    fanbuild(dir.path())
        .args(["--progress", "plain"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[lint]"))
        .stdout(predicate::str::contains("vet found 1 issue"))
        .stdout(predicate::str::contains("[test]"))
        .stdout(predicate::str::contains("ok  ./... 0.01s"))
        .stderr(predicate::str::contains("1 of 2 targets failed: lint"));
}

#[test]
fn test_single_target_has_no_prefix() {
    let dir = workspace(TARGETS);

    fanbuild(dir.path())
        .args(["--progress", "plain", "--target", "test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok  ./... 0.01s"))
        .stdout(predicate::str::contains("[test]").not());
}

#[test]
fn test_unknown_target_lists_known_ones() {
    let dir = workspace(TARGETS);

    fanbuild(dir.path())
        .args(["--target", "fmt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown target \"fmt\" (known: all, lint, test)"));
}

#[test]
fn test_list() {
    let dir = workspace(TARGETS);

    fanbuild(dir.path())
        .arg("--list")
        .assert()
        .success()
        .stdout("lint\ntest\n");
}

#[test]
fn test_json_progress_is_one_object_per_line() {
    let dir = workspace(TARGETS);

    let output = fanbuild(dir.path())
        .args(["--progress", "json", "--target", "test"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.first().unwrap()["event"]["type"], "started");
    assert_eq!(events.last().unwrap()["event"]["status"]["status"], "succeeded");
    assert!(events.iter().all(|e| e["target"] == "test"));
}

#[test]
fn test_missing_targets_file() {
    let dir = tempfile::tempdir().unwrap();

    fanbuild(dir.path())
        .args(["--file", "nope.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.yml"));
}

#[test]
fn test_bad_endpoint() {
    let dir = workspace(TARGETS);

    fanbuild(dir.path())
        .args(["--connect", "ssh://builder"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unsupported endpoint scheme"));
}

#[test]
fn test_slow_reader_gets_all_output_without_cancel() {
    use std::io::Read;
    use std::process::Stdio;

    let dir = workspace("targets:\n  - name: big\n    run: seq 1 200000\n");
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("fanbuild"))
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .args(["--progress", "plain", "--target", "big", "--grace", "0.2"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // let the pipe fill up well past the grace period before reading
    std::thread::sleep(std::time::Duration::from_millis(1500));
    let mut stdout = String::new();
    child.stdout.take().unwrap().read_to_string(&mut stdout).unwrap();
    let status = child.wait().unwrap();

    assert!(status.success());
    let lines = stdout.lines().filter(|l| l.contains(" | ")).count();
    // started, the step, every number, done
    assert_eq!(lines, 200_003);
    assert!(stdout.contains("| 200000\n"));
}
