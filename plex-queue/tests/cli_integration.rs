//! Integration tests for plex-queue

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// Write an executable publisher script that prints a receipt
#[cfg(unix)]
fn write_publisher(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

/// Config with a database, one approver and optional publish commands
fn setup_test_env(publishers: &[(&str, String)]) -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("plexcast.db");

    let mut config = format!(
        r#"
[database]
path = "{}"

[approval]
approvers = ["carol"]

[retry]
base_delay = "1s"
max_delay = "2s"
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    for (platform, command) in publishers {
        config.push_str(&format!(
            "\n[platforms.{}]\npublish_command = \"{}\"\n",
            platform,
            escape_path_for_toml(command)
        ));
    }
    fs::write(&config_path, config).unwrap();

    let config_path = config_path.to_string_lossy().to_string();
    (temp_dir, config_path)
}

fn plex_queue(config_path: &str, user: &str) -> Command {
    let mut cmd = Command::cargo_bin("plex-queue").unwrap();
    cmd.env("PLEXCAST_CONFIG", config_path)
        .env("PLEXCAST_USER", user)
        .env_remove("PLEXCAST_DB_PATH");
    cmd
}

fn connect(config_path: &str, platform: &str, connection_type: &str) {
    plex_queue(config_path, "alice")
        .args(["connect", platform, "--type", connection_type])
        .write_stdin("secret-token\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Connected {}", platform)));
}

/// Run a command that prints "<id> <status>" and return both
fn id_and_status(cmd: &mut Command) -> (String, String) {
    let output = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();
    let mut parts = stdout.split_whitespace();
    let id = parts.next().unwrap().to_string();
    let status = parts.next().unwrap().to_string();
    (id, status)
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("plex-queue").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("approve"))
        .stdout(predicate::str::contains("reconcile"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_invalid_config_exits_2() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "invalid toml content [[[").unwrap();

    plex_queue(&config_path.to_string_lossy(), "alice")
        .arg("stats")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_unknown_platform_exits_3() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    plex_queue(&config_path, "alice")
        .args(["create", "Hello", "-p", "myspace"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("myspace"));
}

#[test]
fn test_submit_without_integration_exits_3() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    plex_queue(&config_path, "alice")
        .args(["create", "Hello", "-p", "mastodon", "--submit"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no connected integration"));
}

#[test]
fn test_connect_twice_is_rejected() {
    let (_temp_dir, config_path) = setup_test_env(&[]);
    connect(&config_path, "mastodon", "oauth");

    plex_queue(&config_path, "alice")
        .args(["connect", "mastodon"])
        .write_stdin("another-token\n")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Duplicate connection"));

    plex_queue(&config_path, "alice")
        .args(["integrations", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"connected\""));
}

#[test]
fn test_bluesky_requires_api_key() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    plex_queue(&config_path, "alice")
        .args(["connect", "bluesky", "--type", "oauth"])
        .write_stdin("token\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not support oauth"));
}

#[test]
fn test_drafts_are_scoped_to_owner() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    let (draft_id, status) = id_and_status(
        plex_queue(&config_path, "alice").args(["create", "Just a draft", "-p", "threads"]),
    );
    assert_eq!(status, "draft");

    plex_queue(&config_path, "alice")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&draft_id));

    plex_queue(&config_path, "bob")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&draft_id).not());

    plex_queue(&config_path, "bob")
        .args(["submit", &draft_id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Permission denied"));
}

#[cfg(unix)]
#[test]
fn test_create_submit_tick_publishes() {
    let scripts = TempDir::new().unwrap();
    let publisher = write_publisher(
        scripts.path(),
        "post-mastodon",
        r#"echo '{"remote_post_id":"toot-42","permalink":"https://mastodon.example/@alice/42"}'"#,
    );
    let (_temp_dir, config_path) = setup_test_env(&[("mastodon", publisher)]);
    connect(&config_path, "mastodon", "oauth");

    let (draft_id, status) = id_and_status(
        plex_queue(&config_path, "alice").args(["create", "Launch day!", "-p", "mastodon", "--submit"]),
    );
    assert_eq!(status, "publishing");

    plex_queue(&config_path, "alice")
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed=1"));

    plex_queue(&config_path, "alice")
        .args(["show", &draft_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("published"))
        .stdout(predicate::str::contains("https://mastodon.example/@alice/42"));

    let output = plex_queue(&config_path, "alice")
        .args(["ledger", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let records: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["platform_post_id"], "toot-42");
    assert_eq!(records[0]["content_snapshot"], "Launch day!");

    plex_queue(&config_path, "alice")
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("consistent"));
}

#[cfg(unix)]
#[test]
fn test_rejected_content_fails_and_retry_requeues() {
    let scripts = TempDir::new().unwrap();
    let publisher = write_publisher(
        scripts.path(),
        "post-mastodon",
        "echo 'Status is a duplicate' >&2\nexit 3",
    );
    let (_temp_dir, config_path) = setup_test_env(&[("mastodon", publisher)]);
    connect(&config_path, "mastodon", "oauth");

    let (draft_id, _) = id_and_status(
        plex_queue(&config_path, "alice").args(["create", "Again", "-p", "mastodon", "--submit"]),
    );

    plex_queue(&config_path, "alice")
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("failed=1"));

    let output = plex_queue(&config_path, "alice")
        .args(["show", &draft_id, "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let shown: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(shown["draft"]["status"], "failed");
    assert_eq!(shown["items"][0]["status"], "failed");
    assert!(shown["items"][0]["last_error"]
        .as_str()
        .unwrap()
        .contains("duplicate"));
    let item_id = shown["items"][0]["id"].as_str().unwrap().to_string();

    // Only the owner or an approver may retry
    plex_queue(&config_path, "bob")
        .args(["retry", &item_id])
        .assert()
        .code(3);

    plex_queue(&config_path, "alice")
        .args(["retry", &item_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"));

    plex_queue(&config_path, "alice")
        .args(["list", "--status", "publishing"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&draft_id));
}

#[test]
fn test_approval_flow() {
    let (_temp_dir, config_path) = setup_test_env(&[]);
    connect(&config_path, "linkedin", "oauth");

    let (draft_id, status) = id_and_status(plex_queue(&config_path, "alice").args([
        "create",
        "Quarterly update",
        "-p",
        "linkedin",
        "--approval",
        "--submit",
    ]));
    assert_eq!(status, "pending_approval");

    // Authors cannot approve their own drafts without the right
    plex_queue(&config_path, "alice")
        .args(["approve", &draft_id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Permission denied"));

    plex_queue(&config_path, "carol")
        .args(["reject", &draft_id, "--reason", "Numbers not final"])
        .assert()
        .success()
        .stdout(predicate::str::contains("draft"));

    plex_queue(&config_path, "alice")
        .args(["show", &draft_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Numbers not final"));

    plex_queue(&config_path, "alice")
        .args(["submit", &draft_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending_approval"));

    plex_queue(&config_path, "carol")
        .args(["approve", &draft_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("publishing"));

    plex_queue(&config_path, "alice")
        .args(["stats", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\": 1"));
}

#[test]
fn test_reject_requires_reason() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    plex_queue(&config_path, "carol")
        .args(["reject", "some-draft"])
        .assert()
        .failure();
}

#[test]
fn test_cancel_scheduled_draft() {
    let (_temp_dir, config_path) = setup_test_env(&[]);
    connect(&config_path, "mastodon", "oauth");

    let (draft_id, status) = id_and_status(plex_queue(&config_path, "alice").args([
        "create",
        "Later",
        "-p",
        "mastodon",
        "--at",
        "2h",
        "--submit",
    ]));
    assert_eq!(status, "scheduled");

    plex_queue(&config_path, "bob")
        .args(["cancel", &draft_id])
        .assert()
        .code(3);

    plex_queue(&config_path, "alice")
        .args(["cancel", &draft_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled draft"));

    plex_queue(&config_path, "alice")
        .args(["stats", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cancelled\": 1"));

    // Already terminal
    plex_queue(&config_path, "alice")
        .args(["cancel", &draft_id])
        .assert()
        .code(3);
}

#[test]
fn test_schedule_in_the_past_is_rejected() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    plex_queue(&config_path, "alice")
        .args(["create", "Too late", "-p", "mastodon", "--at", "2001-01-01 10:00"])
        .assert()
        .code(3);
}

#[test]
fn test_unknown_draft_exits_3() {
    let (_temp_dir, config_path) = setup_test_env(&[]);

    plex_queue(&config_path, "alice")
        .args(["show", "does-not-exist"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}
