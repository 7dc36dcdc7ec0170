//! Run snapshot types and payload parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::{entry_id, truthy};

/// Ids the backend uses for empty party slots.
const PLACEHOLDER_IDS: &[&str] = &["placeholder", "empty", "none"];

/// Canonical local view of the authoritative run.
///
/// An empty `run_id` means no run: `battle_active` is then false and
/// `room_data` is `None`. The store enforces this after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    /// Ordered, de-duplicated member ids without placeholders or summons.
    pub selected_party: Vec<String>,
    pub map_rooms: Vec<Value>,
    pub current_index: usize,
    pub current_room_type: Option<String>,
    pub next_room: Option<String>,
    /// Opaque room payload handed to presentation.
    pub room_data: Option<Value>,
    pub battle_active: bool,
    pub last_battle_snapshot: Option<Value>,
}

impl RunSnapshot {
    pub fn has_run(&self) -> bool {
        !self.run_id.is_empty()
    }

    /// Whether the battle poller should be running.
    pub fn battle_polling_eligible(&self) -> bool {
        self.has_run() && self.battle_active
    }

    /// Whether the map poller should be running.
    pub fn map_polling_eligible(&self) -> bool {
        self.has_run() && !self.battle_active
    }

    /// Restore the empty-run invariant.
    pub(crate) fn enforce_invariants(&mut self) {
        if self.run_id.is_empty() {
            self.battle_active = false;
            self.room_data = None;
        }
    }
}

/// Fields of a map poll response. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapUpdate {
    pub party: Option<Vec<String>>,
    pub rooms: Option<Vec<Value>>,
    pub current_index: Option<usize>,
    pub current_room_type: Option<String>,
    pub next_room: Option<String>,
    pub room_data: Option<Value>,
}

impl MapUpdate {
    /// Read `party`, `map.rooms` and `current_state.*` out of a map payload.
    pub fn from_payload(payload: &Value) -> Self {
        let state = payload.get("current_state").unwrap_or(&Value::Null);

        Self {
            party: payload.get("party").map(normalize_party),
            rooms: payload
                .get("map")
                .and_then(|m| m.get("rooms"))
                .and_then(Value::as_array)
                .cloned(),
            current_index: state
                .get("current_index")
                .and_then(Value::as_u64)
                .map(|i| i as usize),
            current_room_type: state
                .get("current_room_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            next_room: state
                .get("next_room_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            room_data: state.get("room_data").filter(|v| !v.is_null()).cloned(),
        }
    }

    /// Write the present fields into `snapshot`.
    pub fn apply_to(self, snapshot: &mut RunSnapshot) {
        if let Some(party) = self.party {
            snapshot.selected_party = party;
        }
        if let Some(rooms) = self.rooms {
            snapshot.map_rooms = rooms;
        }
        if let Some(index) = self.current_index {
            snapshot.current_index = index;
        }
        if let Some(room_type) = self.current_room_type {
            snapshot.current_room_type = Some(room_type);
        }
        if let Some(next) = self.next_room {
            snapshot.next_room = Some(next);
        }
        if let Some(room_data) = self.room_data {
            snapshot.room_data = Some(room_data);
        }
    }
}

/// Normalize a `party` payload into ordered, unique member ids.
///
/// Entries may be plain ids or objects with an `id`. Summons (`is_summon`,
/// `summon_type`, or an id ending in `_summon`) and placeholder slots are
/// dropped.
pub fn normalize_party(party: &Value) -> Vec<String> {
    let Some(entries) = party.as_array() else {
        return Vec::new();
    };

    let mut ids: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        if is_summon_or_placeholder_entry(entry) {
            continue;
        }
        let Some(id) = entry_id(entry) else {
            continue;
        };
        if is_placeholder_id(&id) || id.ends_with("_summon") {
            continue;
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn is_summon_or_placeholder_entry(entry: &Value) -> bool {
    ["is_summon", "summon_type", "placeholder", "is_placeholder"]
        .iter()
        .any(|key| entry.get(key).is_some_and(truthy))
}

fn is_placeholder_id(id: &str) -> bool {
    PLACEHOLDER_IDS
        .iter()
        .any(|p| id.eq_ignore_ascii_case(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_party_dedupes_in_order() {
        let party = json!(["player", "ally", "player", {"id": "becca"}, "ally"]);
        assert_eq!(normalize_party(&party), vec!["player", "ally", "becca"]);
    }

    #[test]
    fn test_normalize_party_drops_summons_and_placeholders() {
        let party = json!([
            "player",
            "placeholder",
            {"id": "jelly", "is_summon": true},
            {"id": "echo", "summon_type": "mirror"},
            "lady_light_summon",
            {"id": "slot", "placeholder": 1},
            {"id": "carly"}
        ]);
        assert_eq!(normalize_party(&party), vec!["player", "carly"]);
    }

    #[test]
    fn test_normalize_party_non_array() {
        assert!(normalize_party(&json!(null)).is_empty());
        assert!(normalize_party(&json!({"id": "x"})).is_empty());
    }

    #[test]
    fn test_map_update_reads_nested_fields() {
        let payload = json!({
            "party": ["player", "ally"],
            "map": {"rooms": [{"room_type": "battle-normal"}, {"room_type": "shop"}]},
            "current_state": {
                "current_index": 1,
                "current_room_type": "shop",
                "next_room_type": "battle-boss",
                "room_data": {"result": "shop"}
            }
        });

        let update = MapUpdate::from_payload(&payload);
        assert_eq!(update.party, Some(vec!["player".into(), "ally".into()]));
        assert_eq!(update.rooms.as_ref().map(Vec::len), Some(2));
        assert_eq!(update.current_index, Some(1));
        assert_eq!(update.current_room_type.as_deref(), Some("shop"));
        assert_eq!(update.next_room.as_deref(), Some("battle-boss"));
        assert_eq!(update.room_data, Some(json!({"result": "shop"})));
    }

    #[test]
    fn test_map_update_partial_leaves_fields() {
        let mut snapshot = RunSnapshot {
            run_id: "r1".into(),
            current_index: 3,
            map_rooms: vec![json!({"room_type": "start"})],
            ..Default::default()
        };
        MapUpdate::from_payload(&json!({"party": ["a"]})).apply_to(&mut snapshot);
        assert_eq!(snapshot.current_index, 3);
        assert_eq!(snapshot.map_rooms.len(), 1);
        assert_eq!(snapshot.selected_party, vec!["a"]);
    }

    #[test]
    fn test_enforce_invariants_clears_battle_state() {
        let mut snapshot = RunSnapshot {
            battle_active: true,
            room_data: Some(json!({})),
            ..Default::default()
        };
        snapshot.enforce_invariants();
        assert!(!snapshot.battle_active);
        assert!(snapshot.room_data.is_none());
    }

    #[test]
    fn test_eligibility_is_mutually_exclusive() {
        let mut snapshot = RunSnapshot {
            run_id: "r1".into(),
            ..Default::default()
        };
        assert!(snapshot.map_polling_eligible());
        assert!(!snapshot.battle_polling_eligible());
        snapshot.battle_active = true;
        assert!(!snapshot.map_polling_eligible());
        assert!(snapshot.battle_polling_eligible());
        snapshot.run_id.clear();
        assert!(!snapshot.map_polling_eligible());
        assert!(!snapshot.battle_polling_eligible());
    }
}
