//! Overlay state that suspends polling while the player is busy with a
//! reward or review screen, or has halted sync by hand.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::listeners::{ListenerSet, Subscription, lock};

/// View in which polling is allowed to run.
pub const MAIN_VIEW: &str = "main";

/// Overlay flags reported by presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub reward_open: bool,
    pub review_open: bool,
    pub review_ready: bool,
    pub manual_halt: bool,
    /// Active overlay view, `"main"` when nothing covers the game.
    pub view: String,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            reward_open: false,
            review_open: false,
            review_ready: false,
            manual_halt: false,
            view: MAIN_VIEW.to_string(),
        }
    }
}

impl OverlayState {
    /// A reward overlay, or a review overlay that has finished loading.
    pub fn blocking(&self) -> bool {
        self.reward_open || (self.review_open && self.review_ready)
    }

    pub fn halt_sync(&self) -> bool {
        self.manual_halt || self.blocking()
    }

    /// Whether a poll tick should skip its fetch.
    pub fn should_pause(&self) -> bool {
        self.halt_sync() || self.view != MAIN_VIEW
    }
}

/// Shared overlay flags with change notification.
pub struct OverlayGate {
    state: Mutex<OverlayState>,
    listeners: ListenerSet<OverlayState>,
}

impl Default for OverlayGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OverlayState::default()),
            listeners: ListenerSet::new("overlay"),
        }
    }

    pub fn get_snapshot(&self) -> OverlayState {
        lock(&self.state).clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&OverlayState) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub fn set_reward_open(&self, open: bool) {
        self.update(|s| s.reward_open = open);
    }

    pub fn set_review(&self, open: bool, ready: bool) {
        self.update(|s| {
            s.review_open = open;
            s.review_ready = ready;
        });
    }

    pub fn set_manual_halt(&self, halted: bool) {
        self.update(|s| s.manual_halt = halted);
    }

    pub fn set_view(&self, view: impl Into<String>) {
        let view = view.into();
        self.update(move |s| s.view = view);
    }

    pub fn should_pause(&self) -> bool {
        lock(&self.state).should_pause()
    }

    fn update(&self, mutate: impl FnOnce(&mut OverlayState)) {
        let next = {
            let mut state = lock(&self.state);
            let before = state.clone();
            mutate(&mut state);
            if *state == before {
                return;
            }
            state.clone()
        };
        tracing::debug!(halt_sync = next.halt_sync(), view = %next.view, "overlay changed");
        self.listeners.emit(&next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_blocking_truth_table() {
        let mut s = OverlayState::default();
        assert!(!s.blocking());

        s.review_open = true;
        assert!(!s.blocking(), "review not ready yet");
        s.review_ready = true;
        assert!(s.blocking());

        s = OverlayState {
            reward_open: true,
            ..Default::default()
        };
        assert!(s.blocking());
    }

    #[test]
    fn test_halt_sync_includes_manual_halt() {
        let s = OverlayState {
            manual_halt: true,
            ..Default::default()
        };
        assert!(!s.blocking());
        assert!(s.halt_sync());
    }

    #[test]
    fn test_non_main_view_pauses() {
        let s = OverlayState {
            view: "party".into(),
            ..Default::default()
        };
        assert!(!s.halt_sync());
        assert!(s.should_pause());
    }

    #[test]
    fn test_gate_publishes_on_change_only() {
        let gate = OverlayGate::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = gate.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        gate.set_reward_open(true);
        gate.set_reward_open(true);
        gate.set_review(false, false);
        gate.set_view("main");
        gate.set_manual_halt(true);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(gate.should_pause());
    }
}
