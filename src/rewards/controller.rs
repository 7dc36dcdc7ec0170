use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Mutex;

use super::normalize::{RewardPhaseSnapshot, normalize_reward_progression};
use super::phase::{RewardPhase, order_phases};
use crate::listeners::{ListenerSet, Subscription, lock};

/// What caused a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    Ingest,
    Advance,
    SkipTo,
    Reset,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ingest => "ingest",
            Self::Advance => "advance",
            Self::SkipTo => "skip-to",
            Self::Reset => "reset",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseChange {
    pub previous: RewardPhaseSnapshot,
    pub current: RewardPhaseSnapshot,
    pub reason: ChangeReason,
}

/// State machine over the reward phases of the current room.
///
/// Every mutator emits only when the structure changed. Emission order is
/// `exit` (old current), `enter` (new current), then `change`; the first two
/// fire only when the current phase itself moved.
pub struct RewardPhaseController {
    state: Mutex<RewardPhaseSnapshot>,
    enter: ListenerSet<RewardPhase>,
    exit: ListenerSet<RewardPhase>,
    change: ListenerSet<PhaseChange>,
}

impl Default for RewardPhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl RewardPhaseController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RewardPhaseSnapshot::default()),
            enter: ListenerSet::new("reward-phase-enter"),
            exit: ListenerSet::new("reward-phase-exit"),
            change: ListenerSet::new("reward-phase-change"),
        }
    }

    pub fn snapshot(&self) -> RewardPhaseSnapshot {
        lock(&self.state).clone()
    }

    pub fn on_enter(&self, listener: impl Fn(&RewardPhase) + Send + Sync + 'static) -> Subscription {
        self.enter.subscribe(listener)
    }

    pub fn on_exit(&self, listener: impl Fn(&RewardPhase) + Send + Sync + 'static) -> Subscription {
        self.exit.subscribe(listener)
    }

    pub fn on_change(&self, listener: impl Fn(&PhaseChange) + Send + Sync + 'static) -> Subscription {
        self.change.subscribe(listener)
    }

    /// Replace the state with a freshly normalized payload.
    pub fn ingest(&self, payload: &Value, hints: &[RewardPhase]) -> RewardPhaseSnapshot {
        let next = normalize_reward_progression(payload, hints);
        self.commit(ChangeReason::Ingest, |_| Some(next));
        self.snapshot()
    }

    /// Complete the current phase. Returns false when there is none.
    pub fn advance(&self) -> bool {
        self.commit(ChangeReason::Advance, |prev| {
            let current = prev.current.as_ref()?;
            let mut completed = prev.completed.clone();
            completed.push(current.clone());
            Some(RewardPhaseSnapshot::derive(
                prev.sequence.clone(),
                &completed,
                prev.diagnostics.clone(),
                prev.raw.clone(),
            ))
        })
    }

    /// Jump to `phase`, adding it to the sequence when missing and completing
    /// everything before it.
    pub fn skip_to(&self, phase: RewardPhase) -> bool {
        self.commit(ChangeReason::SkipTo, |prev| {
            let sequence = order_phases(prev.sequence.iter().cloned().chain([phase.clone()]));
            let base = RewardPhaseSnapshot::derive(
                sequence,
                &prev.completed,
                prev.diagnostics.clone(),
                prev.raw.clone(),
            );
            Some(base.force_current(&phase))
        })
    }

    pub fn reset(&self) -> bool {
        self.commit(ChangeReason::Reset, |_| Some(RewardPhaseSnapshot::default()))
    }

    /// Swap in the state computed by `next`; emit outside the lock.
    fn commit(
        &self,
        reason: ChangeReason,
        next: impl FnOnce(&RewardPhaseSnapshot) -> Option<RewardPhaseSnapshot>,
    ) -> bool {
        let change = {
            let mut state = lock(&self.state);
            let Some(next) = next(&*state) else {
                return false;
            };
            if state.same_structure(&next) {
                // Keep the latest raw payload and diagnostics without notifying.
                *state = next;
                return false;
            }
            let previous = std::mem::replace(&mut *state, next);
            PhaseChange {
                previous,
                current: state.clone(),
                reason,
            }
        };

        tracing::debug!(
            reason = %reason,
            from = ?change.previous.current.as_ref().map(RewardPhase::as_str),
            to = ?change.current.current.as_ref().map(RewardPhase::as_str),
            "reward phase changed"
        );

        if change.previous.current != change.current.current {
            if let Some(old) = &change.previous.current {
                self.exit.emit(old);
            }
            if let Some(new) = &change.current.current {
                self.enter.emit(new);
            }
        }
        self.change.emit(&change);
        true
    }
}
