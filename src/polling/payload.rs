//! Reading battle and room payloads.

use serde_json::{Map, Value, json};

use crate::util::{array_field, flag, has_content, string_field, truthy};

/// Room result that marks an active battle.
pub const BATTLE_RESULT: &str = "battle";

/// Normalize a battle snapshot: `enemies` becomes `foes`, and the combatant
/// lists and summon maps are always present.
pub fn normalize_battle_snapshot(payload: Value) -> Value {
    let Value::Object(mut map) = payload else {
        return payload;
    };

    let enemies = map.remove("enemies");
    if !map.contains_key("foes")
        && let Some(enemies) = enemies
    {
        map.insert("foes".to_string(), enemies);
    }

    for key in ["party", "foes"] {
        ensure(&mut map, key, || json!([]));
    }
    for key in ["party_summons", "foe_summons"] {
        ensure(&mut map, key, || json!({}));
    }

    Value::Object(map)
}

fn ensure(map: &mut Map<String, Value>, key: &str, default: impl FnOnce() -> Value) {
    if map.get(key).is_none_or(Value::is_null) {
        map.insert(key.to_string(), default());
    }
}

/// Whether the backend reported that it has no snapshot for this tick.
pub fn snapshot_missing(payload: &Value) -> bool {
    !truthy(payload) || flag(payload, "snapshot_missing")
}

/// Message of an explicit `error` field, if the payload carries one.
pub fn battle_error(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        ),
        other if truthy(other) && !other.is_string() => Some("battle error".to_string()),
        _ => None,
    }
}

/// Whether the server has signalled that rewards or the next room are ready.
pub fn signals_completion(payload: &Value) -> bool {
    ["awaiting_next", "awaiting_loot", "awaiting_card", "awaiting_relic"]
        .iter()
        .any(|key| flag(payload, key))
        || string_field(payload, "next_room").is_some()
        || has_content(payload, "card_choices")
        || has_content(payload, "relic_choices")
        || reward_staging_pending(payload)
        || loot_pending(payload)
}

/// Whether `reward_staging` holds a selected-but-unconfirmed reward.
pub fn reward_staging_pending(payload: &Value) -> bool {
    let staging = payload.get("reward_staging").unwrap_or(&Value::Null);
    ["cards", "relics", "items"]
        .iter()
        .any(|key| has_content(staging, key))
}

/// Staged entries of one reward kind (`cards`, `relics`, `items`).
pub fn staged(payload: &Value, kind: &str) -> Vec<Value> {
    let staging = payload.get("reward_staging").unwrap_or(&Value::Null);
    match staging.get(kind) {
        Some(Value::Array(items)) => items.clone(),
        Some(value) if truthy(value) && !value.is_object() => vec![value.clone()],
        Some(Value::Object(map)) if !map.is_empty() => vec![Value::Object(map.clone())],
        _ => Vec::new(),
    }
}

/// Whether `loot` still has gold or items to acknowledge.
pub fn loot_pending(payload: &Value) -> bool {
    let loot = payload.get("loot").unwrap_or(&Value::Null);
    let gold = loot.get("gold").and_then(Value::as_f64).unwrap_or(0.0);
    gold > 0.0 || !array_field(loot, "items").is_empty()
}

fn combatant_defeated(combatant: &Value) -> bool {
    if ["dead", "is_dead", "defeated"]
        .iter()
        .any(|key| flag(combatant, key))
    {
        return true;
    }
    ["hp", "current_hp"]
        .iter()
        .find_map(|key| combatant.get(key).and_then(Value::as_f64))
        .is_some_and(|hp| hp <= 0.0)
}

/// Every combatant on a side is down. A side with no combatants is not
/// considered defeated.
pub fn side_defeated(combatants: &[Value]) -> bool {
    !combatants.is_empty() && combatants.iter().all(combatant_defeated)
}

/// One side has been wiped out on screen.
pub fn combat_visually_over(snapshot: &Value) -> bool {
    side_defeated(array_field(snapshot, "foes")) || side_defeated(array_field(snapshot, "party"))
}

/// Room data reporting a battle that has not yet been resolved.
pub fn battle_in_progress(room_data: &Value) -> bool {
    string_field(room_data, "result") == Some(BATTLE_RESULT) && !flag(room_data, "awaiting_next")
}

/// Copy of `base` (or an empty object) with `error` set to `message`.
pub fn with_error(base: Option<&Value>, message: &str) -> Value {
    let mut map = match base {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    map.insert("error".to_string(), Value::String(message.to_string()));
    Value::Object(map)
}
