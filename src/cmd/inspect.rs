//! Offline payload inspection: `runsync normalize` and `runsync action`.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::io::Read;
use std::path::Path;

use runsync::automation::compute_automation_action;
use runsync::rewards::{RewardPhaseSnapshot, hints_from_room, normalize_reward_progression};

static NO_ROOM: Value = Value::Null;

fn read_json(file: &Path) -> Result<Value> {
    let content = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", file.display()))
}

/// Split input into (room data, progression). Accepts either room data with a
/// nested `reward_progression` or a bare progression object.
fn split_room(input: &Value) -> (&Value, Option<&Value>) {
    match input.get("reward_progression") {
        Some(progression) if progression.is_object() => (input, Some(progression)),
        _ if input.get("available").is_some() || input.get("completed").is_some() => (&NO_ROOM, Some(input)),
        _ => (input, None),
    }
}

fn normalize(input: &Value) -> Option<RewardPhaseSnapshot> {
    let (room, progression) = split_room(input);
    progression.map(|p| normalize_reward_progression(p, &hints_from_room(room)))
}

pub fn cmd_normalize(file: &Path) -> Result<()> {
    let input = read_json(file)?;
    let Some(snapshot) = normalize(&input) else {
        anyhow::bail!("{} holds no reward_progression", file.display());
    };
    let output = json!({
        "sequence": snapshot.sequence,
        "completed": snapshot.completed,
        "current": snapshot.current,
        "next": snapshot.next,
        "diagnostics": snapshot.diagnostics,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn cmd_action(file: &Path) -> Result<()> {
    let input = read_json(file)?;
    let phases = normalize(&input);
    let (room, _) = split_room(&input);
    let action = compute_automation_action(room, phases.as_ref());
    println!("{}", serde_json::to_string(&action)?);
    Ok(())
}
