//! Battle poller: follows an active battle until it reaches a terminal
//! outcome.
//!
//! Activation is edge-triggered on `battle_active ∧ run_id`. Each tick fetches
//! the battle snapshot for the run and either persists it and reschedules one
//! frame later, or settles the battle:
//!
//! | Outcome                       | Store effect                      | Observer hook                 |
//! |-------------------------------|-----------------------------------|-------------------------------|
//! | rewards / next room signalled | battle off, snapshot → room data  | `on_battle_complete`          |
//! | explicit `error` field        | battle off, error on room data    | `on_battle_error`             |
//! | combat-over stall             | battle off, error on room data    | `on_battle_error`             |
//! | missing-snapshot stall        | battle off, error on room data    | `on_missing_snapshot_timeout` |
//! | run-end rejection             | store reset                       | `on_run_end`                  |
//!
//! `on_battle_settled` always follows the outcome hook.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::fetch::{Fetch, RunEndClassifier, default_run_end_classifier};
use super::payload::{
    battle_error, combat_visually_over, normalize_battle_snapshot, signals_completion,
    snapshot_missing, with_error,
};
use super::timer::{TickTimer, retry_delay};
use crate::listeners::{Subscription, isolate, lock};
use crate::overlay::OverlayGate;
use crate::run_state::{RunSnapshot, RunStateStore};

/// Shortest battle tick, whatever the configured frame rate.
const MIN_TICK_MS: u64 = 16;

/// Cadence and stall limits of the battle poller, derived from a frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattlePollingConfig {
    pub frame_rate: u32,
    /// Seconds of consecutive missing snapshots before giving up.
    pub missing_snapshot_seconds: u32,
    /// Seconds a finished-looking combat may wait for the server's signal.
    pub combat_over_seconds: u32,
    pub retry_base: Duration,
    pub max_retry: Duration,
}

impl Default for BattlePollingConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            missing_snapshot_seconds: 10,
            combat_over_seconds: 5,
            retry_base: Duration::from_millis(250),
            max_retry: Duration::from_millis(4000),
        }
    }
}

impl BattlePollingConfig {
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Delay between non-terminal ticks: one frame.
    pub fn tick_delay(&self) -> Duration {
        let fps = u64::from(self.frame_rate.max(1));
        Duration::from_millis((1000 / fps).max(MIN_TICK_MS))
    }

    /// Consecutive missing-snapshot ticks that end the battle.
    pub fn missing_snapshot_limit(&self) -> u32 {
        self.frame_rate.max(1).saturating_mul(self.missing_snapshot_seconds).max(1)
    }

    /// Consecutive combat-over ticks that end the battle.
    pub fn combat_over_limit(&self) -> u32 {
        self.frame_rate.max(1).saturating_mul(self.combat_over_seconds).max(1)
    }
}

/// Receives battle outcomes. Every hook defaults to a no-op.
pub trait BattleObserver: Send + Sync {
    fn on_battle_complete(&self, _snapshot: &Value) {}
    fn on_battle_error(&self, _message: &str) {}
    fn on_missing_snapshot_timeout(&self) {}
    fn on_run_end(&self) {}
    fn on_battle_settled(&self) {}
}

/// Observer that ignores everything.
pub struct NoopBattleObserver;

impl BattleObserver for NoopBattleObserver {}

/// How a battle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BattleOutcome {
    Complete(Value),
    Error(String),
    MissingSnapshotTimeout(String),
    RunEnd,
}

enum Verdict {
    Continue(Option<Value>),
    Terminal(BattleOutcome),
}

#[derive(Debug, Default)]
struct BattleState {
    active: bool,
    destroyed: bool,
    in_flight: bool,
    eligible: bool,
    run_id: String,
    failures: u32,
    missing_ticks: u32,
    combat_over_ticks: u32,
    timer: TickTimer,
}

impl BattleState {
    /// Fold one snapshot into the stall counters and decide what happens.
    fn evaluate(&mut self, payload: Value, config: &BattlePollingConfig) -> Verdict {
        if snapshot_missing(&payload) {
            self.missing_ticks += 1;
            self.combat_over_ticks = 0;
            if self.missing_ticks >= config.missing_snapshot_limit() {
                return Verdict::Terminal(BattleOutcome::MissingSnapshotTimeout(format!(
                    "Battle snapshot missing for {} consecutive polls",
                    self.missing_ticks
                )));
            }
            return Verdict::Continue(None);
        }
        self.missing_ticks = 0;

        let snapshot = normalize_battle_snapshot(payload);
        if let Some(message) = battle_error(&snapshot) {
            return Verdict::Terminal(BattleOutcome::Error(message));
        }
        if signals_completion(&snapshot) {
            return Verdict::Terminal(BattleOutcome::Complete(snapshot));
        }

        if combat_visually_over(&snapshot) {
            self.combat_over_ticks += 1;
            if self.combat_over_ticks >= config.combat_over_limit() {
                return Verdict::Terminal(BattleOutcome::Error(format!(
                    "Battle appears finished but the server has not signalled completion after {} polls",
                    self.combat_over_ticks
                )));
            }
        } else {
            self.combat_over_ticks = 0;
        }
        Verdict::Continue(Some(snapshot))
    }
}

struct Shared {
    fetch: Arc<dyn Fetch>,
    store: Arc<RunStateStore>,
    gate: Option<Arc<OverlayGate>>,
    observer: Arc<dyn BattleObserver>,
    classify: RunEndClassifier,
    config: BattlePollingConfig,
    state: Mutex<BattleState>,
}

/// Poller for an active battle.
#[derive(Clone)]
pub struct BattlePollingController {
    shared: Arc<Shared>,
}

impl BattlePollingController {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        store: Arc<RunStateStore>,
        observer: Arc<dyn BattleObserver>,
        config: BattlePollingConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetch,
                store,
                gate: None,
                observer,
                classify: default_run_end_classifier(),
                config,
                state: Mutex::new(BattleState::default()),
            }),
        }
    }

    /// Same controller, paused while `gate` says so. Call before starting.
    pub fn with_gate(self, gate: Arc<OverlayGate>) -> Self {
        self.rebuild(|s| s.gate = Some(gate))
    }

    /// Same controller with a custom run-end classifier. Call before starting.
    pub fn with_classifier(self, classify: RunEndClassifier) -> Self {
        self.rebuild(|s| s.classify = classify)
    }

    fn rebuild(self, edit: impl FnOnce(&mut Shared)) -> Self {
        let mut shared = match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared,
            Err(shared) => Shared {
                fetch: Arc::clone(&shared.fetch),
                store: Arc::clone(&shared.store),
                gate: shared.gate.clone(),
                observer: Arc::clone(&shared.observer),
                classify: Arc::clone(&shared.classify),
                config: shared.config,
                state: Mutex::new(BattleState::default()),
            },
        };
        edit(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Start polling `run_id` with an immediate tick.
    pub fn start(&self, run_id: &str) {
        let mut state = lock(&self.shared.state);
        if state.active || state.destroyed || run_id.is_empty() {
            return;
        }
        state.active = true;
        state.run_id = run_id.to_string();
        state.failures = 0;
        state.missing_ticks = 0;
        state.combat_over_ticks = 0;
        tracing::debug!(controller = "battle", run_id = %run_id, "battle polling started");
        if !state.in_flight && !Shared::schedule(&self.shared, &mut state, Duration::ZERO) {
            // Retried on the next eligible publication.
            state.active = false;
            state.eligible = false;
        }
    }

    pub fn stop(&self) {
        let mut state = lock(&self.shared.state);
        if !state.active {
            return;
        }
        state.active = false;
        state.timer.cancel();
        tracing::debug!(controller = "battle", "battle polling stopped");
    }

    pub fn destroy(&self) {
        let mut state = lock(&self.shared.state);
        state.destroyed = true;
        state.active = false;
        state.timer.cancel();
    }

    /// Edge-triggered activation from a store publication. A new run id
    /// mid-battle restarts polling for that run with fresh stall counters.
    pub fn sync_with(&self, snapshot: &RunSnapshot) {
        let eligible = snapshot.battle_polling_eligible();
        let restart = {
            let mut state = lock(&self.shared.state);
            if state.destroyed {
                return;
            }
            let restart = eligible && state.eligible && state.run_id != snapshot.run_id;
            if state.eligible == eligible && !restart {
                return;
            }
            state.eligible = eligible;
            restart
        };
        if eligible {
            if restart {
                tracing::debug!(controller = "battle", run_id = %snapshot.run_id, "run id changed; restarting");
                self.stop();
            }
            self.start(&snapshot.run_id);
        } else {
            self.stop();
        }
    }

    /// Follow the store: start and stop on its battle edges.
    pub fn attach(&self, store: &RunStateStore) -> Subscription {
        let controller = self.clone();
        let subscription = store.subscribe(move |snapshot| controller.sync_with(snapshot));
        self.sync_with(&store.get_snapshot());
        subscription
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared.state).active
    }

    pub fn missing_snapshot_ticks(&self) -> u32 {
        lock(&self.shared.state).missing_ticks
    }

    pub fn combat_over_ticks(&self) -> u32 {
        lock(&self.shared.state).combat_over_ticks
    }
}

impl Shared {
    /// Arm the next tick. False outside a Tokio runtime.
    fn schedule(this: &Arc<Self>, state: &mut BattleState, delay: Duration) -> bool {
        let shared = Arc::clone(this);
        state
            .timer
            .arm(delay, move |generation| async move { shared.tick(generation).await })
    }

    async fn tick(self: Arc<Self>, generation: u64) {
        let run_id = {
            let mut state = lock(&self.state);
            if !state.active || state.destroyed || !state.timer.claim(generation) {
                return;
            }
            if self.gate.as_ref().is_some_and(|g| g.should_pause()) {
                Self::schedule(&self, &mut state, self.config.tick_delay());
                return;
            }
            state.in_flight = true;
            state.run_id.clone()
        };

        let result = self.fetch.fetch(Some(&run_id)).await;

        let verdict = {
            let mut state = lock(&self.state);
            state.in_flight = false;
            if !state.active || state.destroyed {
                return;
            }
            if state.run_id != run_id {
                tracing::debug!(controller = "battle", stale = %run_id, "discarding response for a previous run");
                Self::schedule(&self, &mut state, Duration::ZERO);
                return;
            }
            let verdict = match result {
                Err(e) if (self.classify)(&e) => {
                    tracing::info!(controller = "battle", run_id = %run_id, error = %e, "run ended during battle");
                    Verdict::Terminal(BattleOutcome::RunEnd)
                }
                Err(e) => {
                    state.failures = state.failures.saturating_add(1);
                    let delay = retry_delay(state.failures, self.config.retry_base, self.config.max_retry);
                    tracing::debug!(
                        controller = "battle",
                        failures = state.failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "battle poll failed; backing off"
                    );
                    Self::schedule(&self, &mut state, delay);
                    return;
                }
                Ok(payload) => {
                    state.failures = 0;
                    state.evaluate(payload, &self.config)
                }
            };
            if matches!(verdict, Verdict::Terminal(_)) {
                state.active = false;
                state.timer.cancel();
            }
            verdict
        };

        match verdict {
            Verdict::Terminal(outcome) => self.settle(outcome),
            Verdict::Continue(snapshot) => {
                if let Some(snapshot) = snapshot {
                    self.store.set_last_battle_snapshot(Some(snapshot));
                }
                let mut state = lock(&self.state);
                if state.active && !state.destroyed && !state.timer.is_armed() && !state.in_flight {
                    Self::schedule(&self, &mut state, self.config.tick_delay());
                }
            }
        }
    }

    /// Apply a terminal outcome: store first, then exactly one outcome hook,
    /// then `on_battle_settled`.
    fn settle(&self, outcome: BattleOutcome) {
        let observer = &self.observer;
        match outcome {
            BattleOutcome::Complete(snapshot) => {
                tracing::info!(controller = "battle", "battle complete");
                let stored = snapshot.clone();
                self.store.update(move |s| {
                    s.battle_active = false;
                    s.last_battle_snapshot = Some(stored.clone());
                    s.room_data = Some(stored);
                });
                isolate("battle", "on_battle_complete", || observer.on_battle_complete(&snapshot));
            }
            BattleOutcome::Error(message) => {
                tracing::info!(controller = "battle", error = %message, "battle ended with error");
                self.store_error(&message);
                isolate("battle", "on_battle_error", || observer.on_battle_error(&message));
            }
            BattleOutcome::MissingSnapshotTimeout(message) => {
                tracing::info!(controller = "battle", error = %message, "battle snapshot timed out");
                self.store_error(&message);
                isolate("battle", "on_missing_snapshot_timeout", || {
                    observer.on_missing_snapshot_timeout()
                });
            }
            BattleOutcome::RunEnd => {
                self.store.reset();
                isolate("battle", "on_run_end", || observer.on_run_end());
            }
        }
        isolate("battle", "on_battle_settled", || observer.on_battle_settled());
    }

    fn store_error(&self, message: &str) {
        self.store.update(|s| {
            s.battle_active = false;
            let base = s.last_battle_snapshot.as_ref().or(s.room_data.as_ref());
            s.room_data = Some(with_error(base, message));
        });
    }
}
