//! CLI tests for argument validation that must happen before any work.
//!
//! Spawns the pipeline binary and verifies exit codes and that no session
//! directory is created when a run is refused.

use std::fs;
use std::process::Command;

use pipeline::exit_codes;
use pipeline::io::executor::NESTED_GUARD_ENV;

fn pipeline_cmd(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pipeline"));
    cmd.current_dir(dir).env_remove(NESTED_GUARD_ENV);
    cmd
}

#[test]
fn invalid_scope_exits_before_touching_disk() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("PRD.md"), "# PRD\n").expect("write prd");

    for scope in ["P1.X", "p1", "P1.M1.S1", ""] {
        let output = pipeline_cmd(temp.path())
            .args(["run", "--prd", "PRD.md", "--scope", scope])
            .output()
            .expect("pipeline run");

        assert_eq!(output.status.code(), Some(exit_codes::INVALID_SCOPE), "{scope:?}");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("VALIDATION_INVALID_INPUT"), "{stderr}");
    }
    assert!(!temp.path().join("plan").exists());
}

/// A run launched from inside another run's agent is refused.
#[test]
fn nested_run_is_refused() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("PRD.md"), "# PRD\n").expect("write prd");

    let output = pipeline_cmd(temp.path())
        .env(NESTED_GUARD_ENV, "4242")
        .args(["run", "--prd", "PRD.md"])
        .output()
        .expect("pipeline run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("VALIDATION_NESTED_EXECUTION"), "{stderr}");
    assert!(!temp.path().join("plan").exists());
}

#[test]
fn inspection_without_sessions_reports_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = pipeline_cmd(temp.path())
        .arg("sessions")
        .status()
        .expect("pipeline sessions");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let output = pipeline_cmd(temp.path())
        .arg("show")
        .output()
        .expect("pipeline show");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("SESSION_NOT_FOUND"));
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = pipeline_cmd(temp.path())
        .arg("init")
        .status()
        .expect("pipeline init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let written = fs::read_to_string(temp.path().join("pipeline.toml")).expect("config");
    assert!(written.contains("sessions_dir"));

    fs::write(temp.path().join("pipeline.toml"), "sessions_dir = \"custom\"\n").expect("edit");
    let status = pipeline_cmd(temp.path())
        .arg("init")
        .status()
        .expect("pipeline init again");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let kept = fs::read_to_string(temp.path().join("pipeline.toml")).expect("config");
    assert_eq!(kept, "sessions_dir = \"custom\"\n");
}
