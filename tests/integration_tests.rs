//! Integration tests for the runsync CLI
//!
//! These tests drive the offline commands end to end through the binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a runsync Command
fn runsync() -> Command {
    let mut cmd = cargo_bin_cmd!("runsync");
    for key in [
        "RUNSYNC_BASE_URL",
        "RUNSYNC_FRAME_RATE",
        "RUNSYNC_REDUCED_MOTION",
        "RUNSYNC_AUTOMATION",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn write_json(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        runsync()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("watch"))
            .stdout(predicate::str::contains("normalize"))
            .stdout(predicate::str::contains("action"));
    }

    #[test]
    fn test_version() {
        runsync().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        runsync().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Reward Progression Normalization
// =============================================================================

mod normalize {
    use super::*;

    #[test]
    fn test_bare_progression() {
        let dir = TempDir::new().unwrap();
        let file = write_json(
            &dir,
            "progression.json",
            r#"{"available": ["loot", "cards", "review"], "completed": ["drops"]}"#,
        );

        let output = runsync().arg("normalize").arg(&file).output().unwrap();
        assert!(output.status.success());
        let json = stdout_json(&output);
        assert_eq!(json["sequence"], serde_json::json!(["drops", "cards", "battle_review"]));
        assert_eq!(json["completed"], serde_json::json!(["drops"]));
        assert_eq!(json["current"], "cards");
        assert_eq!(json["next"], "battle_review");
        assert_eq!(json["diagnostics"], serde_json::json!([]));
    }

    #[test]
    fn test_room_data_hints_and_diagnostics() {
        let dir = TempDir::new().unwrap();
        let file = write_json(
            &dir,
            "room.json",
            r#"{
                "result": "battle",
                "awaiting_card": true,
                "card_choices": [{"id": "bash"}],
                "reward_progression": {"available": ["relics", "mystery"]}
            }"#,
        );

        let output = runsync().arg("normalize").arg(&file).output().unwrap();
        assert!(output.status.success());
        let json = stdout_json(&output);
        assert_eq!(json["sequence"], serde_json::json!(["cards", "relics"]));
        assert_eq!(json["current"], "cards");
        assert_eq!(json["diagnostics"], serde_json::json!(["unknown-phase:mystery"]));
    }

    #[test]
    fn test_reads_stdin() {
        let output = runsync()
            .args(["normalize", "-"])
            .write_stdin(r#"{"available": [], "completed": []}"#)
            .output()
            .unwrap();
        assert!(output.status.success());
        let json = stdout_json(&output);
        assert_eq!(json["current"], "drops");
        assert_eq!(json["diagnostics"], serde_json::json!(["empty-available-fallback"]));
    }

    #[test]
    fn test_missing_progression_fails() {
        let dir = TempDir::new().unwrap();
        let file = write_json(&dir, "room.json", r#"{"result": "shop"}"#);

        runsync()
            .arg("normalize")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("no reward_progression"));
    }

    #[test]
    fn test_invalid_json_fails() {
        let dir = TempDir::new().unwrap();
        let file = write_json(&dir, "broken.json", "{not json");

        runsync()
            .arg("normalize")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid JSON"));
    }
}

// =============================================================================
// Automation Actions
// =============================================================================

mod action {
    use super::*;

    fn action_for(content: &str) -> serde_json::Value {
        let dir = TempDir::new().unwrap();
        let file = write_json(&dir, "room.json", content);
        let output = runsync().arg("action").arg(&file).output().unwrap();
        assert!(output.status.success());
        stdout_json(&output)
    }

    #[test]
    fn test_phase_aware_card_selection() {
        let action = action_for(
            r#"{
                "card_choices": [{"id": "strike"}, {"id": "bash"}],
                "reward_progression": {"available": ["drops", "cards"], "completed": ["drops"]}
            }"#,
        );
        assert_eq!(action, serde_json::json!({"type": "select-card", "id": "strike"}));
    }

    #[test]
    fn test_legacy_loot_ack() {
        let action = action_for(r#"{"awaiting_loot": true, "loot": {"gold": 12, "items": []}}"#);
        assert_eq!(action, serde_json::json!({"type": "ack-loot"}));
    }

    #[test]
    fn test_shop_moves_on() {
        let action = action_for(r#"{"result": "shop"}"#);
        assert_eq!(action, serde_json::json!({"type": "next-room"}));
    }

    #[test]
    fn test_error_room_does_nothing() {
        let action = action_for(r#"{"awaiting_loot": true, "error": "boom"}"#);
        assert_eq!(action, serde_json::json!({"type": "none"}));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_init_creates_file() {
        let dir = TempDir::new().unwrap();

        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created runsync.toml"));

        let path = dir.path().join(".runsync/runsync.toml");
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("[transport]"));
        assert!(content.contains("frame_rate = 30"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            runsync()
                .arg("--project-dir")
                .arg(dir.path())
                .args(["config", "init"])
                .assert()
                .success();
        }
        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_show_defaults_without_file() {
        let dir = TempDir::new().unwrap();

        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No runsync.toml found"))
            .stdout(predicate::str::contains("http://127.0.0.1:59002"))
            .stdout(predicate::str::contains("battle tick = 33ms"));
    }

    #[test]
    fn test_show_applies_env_override() {
        let dir = TempDir::new().unwrap();

        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .env("RUNSYNC_FRAME_RATE", "10")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("battle tick = 100ms"));
    }

    #[test]
    fn test_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".runsync")).unwrap();
        fs::write(
            dir.path().join(".runsync/runsync.toml"),
            r#"
[battle]
frame_rate = 0

[automation.delays]
next_room = [900, 100]
"#,
        )
        .unwrap();

        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("battle.frame_rate is 0"))
            .stdout(predicate::str::contains("automation.delays.next_room is inverted"));
    }

    #[test]
    fn test_validate_clean_file() {
        let dir = TempDir::new().unwrap();
        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success();

        runsync()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }
}
