//! CLI behavior tests for chirp-queue

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let db_path = dir.join("chirpcast.db");
    let config_path = dir.join("config.toml");
    std::fs::write(
        &config_path,
        format!("[database]\npath = \"{}\"\n", db_path.display()),
    )
    .unwrap();
    config_path
}

fn chirp_queue(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("chirp-queue").unwrap();
    cmd.env("CHIRPCAST_CONFIG", config);
    cmd
}

#[test]
fn schedule_and_list_round_trip() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    chirp_queue(&config)
        .args(["schedule", "--text", "hello world", "--every", "hourly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 * * * *"));

    chirp_queue(&config)
        .args(["list", "--status", "scheduled"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn bad_cron_is_rejected_with_exit_3() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    chirp_queue(&config)
        .args(["schedule", "--text", "x", "--cron", "* * *"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("5 fields"));

    // Nothing was persisted
    chirp_queue(&config)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn five_field_step_cron_is_accepted() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    chirp_queue(&config)
        .args(["schedule", "--prompt", "status ping", "--cron", "*/1 * * * *"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*/1 * * * *"));
}

#[test]
fn bad_time_is_rejected() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    chirp_queue(&config)
        .args(["schedule", "--text", "x", "--every", "daily", "--at", "25:00"])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn cancel_then_cancel_again() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = chirp_queue(&config)
        .args(["schedule", "--text", "soon gone", "--every", "daily", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let post: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = post["id"].as_str().unwrap();

    chirp_queue(&config)
        .args(["cancel", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled"));

    // Second cancel is an error: the post is already terminal
    chirp_queue(&config)
        .args(["cancel", id])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn cancel_all_with_force_empties_the_queue() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    for text in ["one", "two", "three"] {
        chirp_queue(&config)
            .args(["schedule", "--text", text, "--every", "daily"])
            .assert()
            .success();
    }

    chirp_queue(&config)
        .args(["cancel", "--all", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled 3 post(s)"));

    chirp_queue(&config)
        .args(["list", "--status", "scheduled"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn stats_reports_quota() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = chirp_queue(&config)
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["daily_limit"], 17);
    assert_eq!(stats["quota_remaining"], 17);
    assert_eq!(stats["sent_today"], 0);
}

#[test]
fn unknown_status_filter_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = write_config(temp.path());

    chirp_queue(&config)
        .args(["list", "--status", "archived"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Unknown status"));
}
