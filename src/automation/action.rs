//! Choosing the next automatic reward action.
//!
//! Two strategies exist. Servers that send a well-formed `reward_progression`
//! are driven phase by phase; anything else falls back to the legacy rules
//! that read the room's `awaiting_*` flags and choice lists directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::polling::payload::{loot_pending, staged};
use crate::rewards::{Diagnostic, RewardPhase, RewardPhaseSnapshot};
use crate::util::{array_field, entry_id, flag, string_field, truthy};

/// Room result of a shop.
const SHOP_RESULT: &str = "shop";

/// One automatic step through the reward flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AutomationAction {
    None,
    AckLoot,
    SelectCard {
        id: String,
    },
    ConfirmCard {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    SelectRelic {
        id: String,
    },
    ConfirmRelic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Advance {
        phase: RewardPhase,
    },
    NextRoom,
}

impl AutomationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AckLoot => "ack-loot",
            Self::SelectCard { .. } => "select-card",
            Self::ConfirmCard { .. } => "confirm-card",
            Self::SelectRelic { .. } => "select-relic",
            Self::ConfirmRelic { .. } => "confirm-relic",
            Self::Advance { .. } => "advance",
            Self::NextRoom => "next-room",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether `other` asks for the same thing. Selections compare their
    /// choice id; confirmations compare by type only.
    pub fn same_request(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SelectCard { id: a }, Self::SelectCard { id: b })
            | (Self::SelectRelic { id: a }, Self::SelectRelic { id: b }) => a == b,
            (Self::ConfirmCard { .. }, Self::ConfirmCard { .. })
            | (Self::ConfirmRelic { .. }, Self::ConfirmRelic { .. }) => true,
            (Self::Advance { phase: a }, Self::Advance { phase: b }) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for AutomationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectCard { id } | Self::SelectRelic { id } => write!(f, "{}:{id}", self.kind()),
            Self::Advance { phase } => write!(f, "{}:{phase}", self.kind()),
            _ => f.write_str(self.kind()),
        }
    }
}

/// Inputs to an action decision.
#[derive(Debug, Clone, Copy)]
pub struct AutomationContext<'a> {
    pub room: &'a Value,
    pub phases: Option<&'a RewardPhaseSnapshot>,
}

/// A rule set mapping room state to an action.
pub trait AutomationStrategy {
    fn name(&self) -> &'static str;

    /// Whether this strategy can read `ctx`.
    fn applies(&self, ctx: &AutomationContext<'_>) -> bool;

    fn decide(&self, ctx: &AutomationContext<'_>) -> AutomationAction;
}

/// Drives the reward flow from the phase snapshot.
pub struct PhaseAwareStrategy;

/// Reads room flags directly, for servers without phase progression.
pub struct LegacyStrategy;

/// A phase snapshot the phase-aware rules can trust.
pub fn phases_well_formed(phases: &RewardPhaseSnapshot) -> bool {
    !phases.sequence.is_empty()
        && phases.raw.is_object()
        && !phases.has_diagnostic(&Diagnostic::EmptyAvailableFallback)
        && phases
            .current
            .as_ref()
            .is_none_or(|current| phases.sequence.contains(current))
}

fn first_choice(room: &Value, key: &str) -> Option<String> {
    array_field(room, key).iter().find_map(entry_id)
}

fn staged_id(room: &Value, kind: &str) -> Option<Option<String>> {
    let entries = staged(room, kind);
    let first = entries.first()?;
    Some(entry_id(first))
}

fn room_moves_on(room: &Value) -> bool {
    flag(room, "awaiting_next") || string_field(room, "next_room").is_some()
}

impl AutomationStrategy for PhaseAwareStrategy {
    fn name(&self) -> &'static str {
        "phase-aware"
    }

    fn applies(&self, ctx: &AutomationContext<'_>) -> bool {
        ctx.phases.is_some_and(phases_well_formed)
    }

    fn decide(&self, ctx: &AutomationContext<'_>) -> AutomationAction {
        let room = ctx.room;
        let Some(phases) = ctx.phases else {
            return AutomationAction::None;
        };
        let Some(current) = &phases.current else {
            return if room_moves_on(room) {
                AutomationAction::NextRoom
            } else {
                AutomationAction::None
            };
        };

        match current {
            RewardPhase::Drops => {
                if loot_pending(room) || flag(room, "awaiting_loot") {
                    AutomationAction::AckLoot
                } else {
                    AutomationAction::Advance {
                        phase: current.clone(),
                    }
                }
            }
            RewardPhase::Cards => {
                if let Some(id) = staged_id(room, "cards") {
                    AutomationAction::ConfirmCard { id }
                } else if let Some(id) = first_choice(room, "card_choices") {
                    AutomationAction::SelectCard { id }
                } else {
                    AutomationAction::Advance {
                        phase: current.clone(),
                    }
                }
            }
            RewardPhase::Relics => {
                if let Some(id) = staged_id(room, "relics") {
                    AutomationAction::ConfirmRelic { id }
                } else if let Some(id) = first_choice(room, "relic_choices") {
                    AutomationAction::SelectRelic { id }
                } else {
                    AutomationAction::Advance {
                        phase: current.clone(),
                    }
                }
            }
            RewardPhase::BattleReview | RewardPhase::Custom(_) => AutomationAction::Advance {
                phase: current.clone(),
            },
        }
    }
}

impl AutomationStrategy for LegacyStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn applies(&self, _ctx: &AutomationContext<'_>) -> bool {
        true
    }

    fn decide(&self, ctx: &AutomationContext<'_>) -> AutomationAction {
        let room = ctx.room;
        if let Some(id) = staged_id(room, "cards") {
            return AutomationAction::ConfirmCard { id };
        }
        if flag(room, "awaiting_card")
            && let Some(id) = first_choice(room, "card_choices")
        {
            return AutomationAction::SelectCard { id };
        }
        if let Some(id) = staged_id(room, "relics") {
            return AutomationAction::ConfirmRelic { id };
        }
        if flag(room, "awaiting_relic")
            && let Some(id) = first_choice(room, "relic_choices")
        {
            return AutomationAction::SelectRelic { id };
        }
        if flag(room, "awaiting_loot") {
            return AutomationAction::AckLoot;
        }
        if string_field(room, "result") == Some(SHOP_RESULT) || flag(room, "awaiting_next") {
            return AutomationAction::NextRoom;
        }
        AutomationAction::None
    }
}

/// Pick the next automatic action for `room`.
///
/// Pure: the same inputs always produce the same action. Rooms without data
/// or still reporting an error yield [`AutomationAction::None`].
pub fn compute_automation_action(
    room: &Value,
    phases: Option<&RewardPhaseSnapshot>,
) -> AutomationAction {
    if !truthy(room) || truthy(room.get("error").unwrap_or(&Value::Null)) {
        return AutomationAction::None;
    }
    let ctx = AutomationContext { room, phases };
    let strategies: [&dyn AutomationStrategy; 2] = [&PhaseAwareStrategy, &LegacyStrategy];
    let Some(strategy) = strategies.iter().find(|s| s.applies(&ctx)) else {
        return AutomationAction::None;
    };
    let action = strategy.decide(&ctx);
    tracing::trace!(strategy = strategy.name(), action = %action, "automation action computed");
    action
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::normalize_reward_progression;
    use serde_json::json;

    fn phases(progression: Value, room: &Value) -> RewardPhaseSnapshot {
        normalize_reward_progression(&progression, &crate::rewards::hints_from_room(room))
    }

    #[test]
    fn test_action_serializes_as_kebab_tags() {
        let action = AutomationAction::SelectCard { id: "strike".into() };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"type": "select-card", "id": "strike"})
        );
        assert_eq!(
            serde_json::to_value(AutomationAction::NextRoom).unwrap(),
            json!({"type": "next-room"})
        );
        let parsed: AutomationAction = serde_json::from_value(json!({"type": "confirm-relic"})).unwrap();
        assert_eq!(parsed, AutomationAction::ConfirmRelic { id: None });
    }

    #[test]
    fn test_same_request() {
        let a = AutomationAction::SelectCard { id: "a".into() };
        let b = AutomationAction::SelectCard { id: "b".into() };
        assert!(a.same_request(&a.clone()));
        assert!(!a.same_request(&b));
        assert!(
            AutomationAction::ConfirmCard { id: Some("x".into()) }
                .same_request(&AutomationAction::ConfirmCard { id: None })
        );
        assert!(!AutomationAction::ConfirmCard { id: None }.same_request(&AutomationAction::ConfirmRelic { id: None }));
        assert!(AutomationAction::NextRoom.same_request(&AutomationAction::NextRoom));
    }

    #[test]
    fn test_legacy_rule_order() {
        let room = json!({
            "awaiting_card": true,
            "card_choices": [{"id": "bash"}, {"id": "cleave"}],
            "awaiting_loot": true,
        });
        assert_eq!(
            compute_automation_action(&room, None),
            AutomationAction::SelectCard { id: "bash".into() }
        );

        let staged = json!({"reward_staging": {"cards": [{"id": "bash"}]}, "awaiting_card": true});
        assert_eq!(
            compute_automation_action(&staged, None),
            AutomationAction::ConfirmCard { id: Some("bash".into()) }
        );

        let relic = json!({"awaiting_relic": true, "relic_choices": ["idol"]});
        assert_eq!(
            compute_automation_action(&relic, None),
            AutomationAction::SelectRelic { id: "idol".into() }
        );

        assert_eq!(
            compute_automation_action(&json!({"awaiting_loot": true}), None),
            AutomationAction::AckLoot
        );
        assert_eq!(
            compute_automation_action(&json!({"result": "shop"}), None),
            AutomationAction::NextRoom
        );
        assert_eq!(
            compute_automation_action(&json!({"awaiting_next": true}), None),
            AutomationAction::NextRoom
        );
        assert_eq!(
            compute_automation_action(&json!({"result": "battle"}), None),
            AutomationAction::None
        );
    }

    #[test]
    fn test_legacy_card_flag_without_choices_falls_through() {
        let room = json!({"awaiting_card": true, "card_choices": [], "awaiting_next": true});
        assert_eq!(compute_automation_action(&room, None), AutomationAction::NextRoom);
    }

    #[test]
    fn test_error_or_empty_room_yields_none() {
        assert_eq!(compute_automation_action(&Value::Null, None), AutomationAction::None);
        assert_eq!(
            compute_automation_action(&json!({"awaiting_next": true, "error": "boom"}), None),
            AutomationAction::None
        );
    }

    #[test]
    fn test_phase_aware_follows_current_phase() {
        let room = json!({
            "awaiting_loot": true,
            "card_choices": [{"id": "bash"}],
            "awaiting_card": true,
        });
        let snap = phases(json!({"available": ["drops", "cards"], "completed": ["drops"]}), &room);
        assert_eq!(
            compute_automation_action(&room, Some(&snap)),
            AutomationAction::SelectCard { id: "bash".into() }
        );

        let drops = phases(json!({"available": ["drops", "cards"], "completed": []}), &room);
        assert_eq!(compute_automation_action(&room, Some(&drops)), AutomationAction::AckLoot);
    }

    #[test]
    fn test_phase_aware_advances_empty_phases() {
        let room = json!({"result": "battle", "awaiting_next": false});
        let snap = phases(
            json!({"available": ["relics", "battle_review"], "completed": ["relics"]}),
            &room,
        );
        assert_eq!(
            compute_automation_action(&room, Some(&snap)),
            AutomationAction::Advance { phase: RewardPhase::BattleReview }
        );
    }

    #[test]
    fn test_phase_aware_finished_moves_on() {
        let room = json!({"awaiting_next": true});
        let snap = phases(json!({"available": ["drops"], "completed": ["drops"]}), &room);
        assert!(snap.is_finished());
        assert_eq!(compute_automation_action(&room, Some(&snap)), AutomationAction::NextRoom);
    }

    #[test]
    fn test_fallback_snapshot_uses_legacy_rules() {
        let room = json!({"awaiting_relic": true, "relic_choices": [{"id": "idol"}]});
        let fallback = normalize_reward_progression(&json!({}), &[]);
        assert!(!phases_well_formed(&fallback));
        assert_eq!(
            compute_automation_action(&room, Some(&fallback)),
            AutomationAction::SelectRelic { id: "idol".into() }
        );
    }

    #[test]
    fn test_strategies_are_independent() {
        let room = json!({"awaiting_loot": true});
        let ctx = AutomationContext { room: &room, phases: None };
        assert!(!PhaseAwareStrategy.applies(&ctx));
        assert_eq!(PhaseAwareStrategy.decide(&ctx), AutomationAction::None);
        assert_eq!(LegacyStrategy.decide(&ctx), AutomationAction::AckLoot);
    }
}
