//! Turning heterogeneous `reward_progression` payloads into an ordered phase
//! sequence.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::phase::{DEFAULT_SEQUENCE, Diagnostic, RewardPhase, order_phases};
use crate::polling::payload::{loot_pending, staged};
use crate::util::{flag, has_content};

/// Normalized reward progression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardPhaseSnapshot {
    /// Ordered, deduplicated phases.
    pub sequence: Vec<RewardPhase>,
    /// Completed phases, in sequence order.
    pub completed: Vec<RewardPhase>,
    /// First phase of `sequence` that is not completed.
    pub current: Option<RewardPhase>,
    /// First phase after `current` that is not completed.
    pub next: Option<RewardPhase>,
    pub diagnostics: Vec<Diagnostic>,
    /// The payload this snapshot was normalized from.
    #[serde(default)]
    pub raw: Value,
}

impl RewardPhaseSnapshot {
    /// Snapshot with `completed` folded into sequence order and `current`/
    /// `next` derived from it.
    pub(crate) fn derive(
        sequence: Vec<RewardPhase>,
        completed: &[RewardPhase],
        diagnostics: Vec<Diagnostic>,
        raw: Value,
    ) -> Self {
        let completed: Vec<RewardPhase> = sequence
            .iter()
            .filter(|p| completed.contains(p))
            .cloned()
            .collect();
        let mut pending = sequence.iter().filter(|p| !completed.contains(p));
        let current = pending.next().cloned();
        let next = pending.next().cloned();
        Self {
            sequence,
            completed,
            current,
            next,
            diagnostics,
            raw,
        }
    }

    /// Same snapshot with `target` forced current: it leaves `completed`
    /// and every phase before it joins.
    pub(crate) fn force_current(mut self, target: &RewardPhase) -> Self {
        let Some(index) = self.sequence.iter().position(|p| p == target) else {
            return self;
        };
        let before = &self.sequence[..index];
        let completed: Vec<RewardPhase> = self
            .sequence
            .iter()
            .filter(|p| *p != target && (before.contains(p) || self.completed.contains(p)))
            .cloned()
            .collect();
        let next = self.sequence[index + 1..]
            .iter()
            .find(|p| !completed.contains(p))
            .cloned();
        self.completed = completed;
        self.current = Some(target.clone());
        self.next = next;
        self
    }

    /// Whether sequence, completion and position are identical.
    pub fn same_structure(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.completed == other.completed
            && self.current == other.current
            && self.next == other.next
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Every phase in the sequence is completed.
    pub fn is_finished(&self) -> bool {
        !self.sequence.is_empty() && self.current.is_none()
    }

    pub fn has_diagnostic(&self, diagnostic: &Diagnostic) -> bool {
        self.diagnostics.contains(diagnostic)
    }

    /// Render back into the server's `reward_progression` shape.
    pub fn to_payload(&self) -> Value {
        json!({
            "available": self.sequence,
            "completed": self.completed,
            "current_step": self.current,
        })
    }
}

/// Phases suggested by room flags, used when the server's progression
/// omits them.
pub fn hints_from_room(room_data: &Value) -> Vec<RewardPhase> {
    let mut hints = Vec::new();
    if loot_pending(room_data) || flag(room_data, "awaiting_loot") {
        hints.push(RewardPhase::Drops);
    }
    if has_content(room_data, "card_choices")
        || flag(room_data, "awaiting_card")
        || !staged(room_data, "cards").is_empty()
    {
        hints.push(RewardPhase::Cards);
    }
    if has_content(room_data, "relic_choices")
        || flag(room_data, "awaiting_relic")
        || !staged(room_data, "relics").is_empty()
    {
        hints.push(RewardPhase::Relics);
    }
    hints
}

/// Read a list of phase tokens. A bare string counts as a one-element list;
/// unknown tokens are dropped and recorded.
fn read_tokens(value: Option<&Value>, diagnostics: &mut Vec<Diagnostic>) -> Vec<RewardPhase> {
    let tokens: Vec<&str> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    };
    tokens
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| read_token(t, diagnostics))
        .collect()
}

fn read_token(token: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<RewardPhase> {
    let phase = RewardPhase::parse(token);
    if phase.is_none() {
        let diagnostic = Diagnostic::UnknownPhase(token.trim().to_string());
        if !diagnostics.contains(&diagnostic) {
            diagnostics.push(diagnostic);
        }
    }
    phase
}

/// Normalize a `reward_progression` payload.
///
/// `available`, `completed` and `current_step` are resolved through the alias
/// table. The sequence is the union of those and `hints`, ordered with
/// canonical phases first. An explicit `current_step` wins over the derived
/// current phase and backfills `completed` with every phase before it.
/// Anomalies are recorded in `diagnostics`, never raised.
pub fn normalize_reward_progression(payload: &Value, hints: &[RewardPhase]) -> RewardPhaseSnapshot {
    let mut diagnostics = Vec::new();
    let available = read_tokens(payload.get("available"), &mut diagnostics);
    let completed = read_tokens(payload.get("completed"), &mut diagnostics);
    let current_step = match payload.get("current_step") {
        Some(Value::String(token)) if !token.trim().is_empty() => read_token(token, &mut diagnostics),
        _ => None,
    };

    let candidates: Vec<RewardPhase> = available
        .iter()
        .chain(completed.iter())
        .chain(current_step.iter())
        .chain(hints.iter())
        .cloned()
        .collect();

    let sequence = if candidates.is_empty() {
        diagnostics.push(Diagnostic::EmptyAvailableFallback);
        DEFAULT_SEQUENCE.to_vec()
    } else {
        order_phases(candidates)
    };

    let mut snapshot = RewardPhaseSnapshot::derive(sequence, &completed, Vec::new(), payload.clone());

    if let Some(step) = current_step
        && snapshot.current.as_ref() != Some(&step)
    {
        if snapshot.completed.contains(&step) {
            diagnostics.push(Diagnostic::CurrentWasCompleted);
        }
        let before_backfill = snapshot.completed.len() - usize::from(snapshot.completed.contains(&step));
        snapshot = snapshot.force_current(&step);
        if snapshot.completed.len() > before_backfill {
            diagnostics.push(Diagnostic::CompletedBackfilled);
        }
    }

    if snapshot.current.is_none() && !snapshot.sequence.is_empty() {
        diagnostics.push(Diagnostic::NoActivePhase);
    }

    if !diagnostics.is_empty() {
        let tags: Vec<String> = diagnostics.iter().map(Diagnostic::tag).collect();
        tracing::warn!(diagnostics = ?tags, "reward progression anomalies");
    }
    snapshot.diagnostics = diagnostics;
    snapshot
}
