//! Map poller: keeps party, map and room data current between battles.
//!
//! Active while the store holds a run and no battle is running. Every
//! successful payload is folded into the store. Room data reporting a fresh
//! battle flips `battle_active`, which hands control to the battle poller.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::controller::PollingConfig;
use super::fetch::{Fetch, RunEndClassifier, default_run_end_classifier};
use super::payload::battle_in_progress;
use super::timer::{TickTimer, retry_delay};
use crate::listeners::{Subscription, isolate, lock};
use crate::overlay::OverlayGate;
use crate::run_state::{RunSnapshot, RunStateStore};
use crate::util::truthy;

/// Receives map poller events. Every hook defaults to a no-op.
pub trait MapObserver: Send + Sync {
    /// A payload was applied to the store.
    fn on_map_state(&self, _payload: &Value) {}
    /// Room data started a battle. Fires once per detected battle.
    fn on_battle_detected(&self, _room_data: &Value) {}
    fn on_run_end(&self) {}
}

pub struct NoopMapObserver;

impl MapObserver for NoopMapObserver {}

#[derive(Debug, Default)]
struct MapState {
    active: bool,
    destroyed: bool,
    in_flight: bool,
    eligible: bool,
    run_id: String,
    failures: u32,
    timer: TickTimer,
}

enum Step {
    Applied(Value),
    RunEnd,
}

struct Shared {
    fetch: Arc<dyn Fetch>,
    store: Arc<RunStateStore>,
    gate: Option<Arc<OverlayGate>>,
    observer: Arc<dyn MapObserver>,
    classify: RunEndClassifier,
    config: PollingConfig,
    state: Mutex<MapState>,
}

/// Poller for party, map and room state outside of battle.
#[derive(Clone)]
pub struct MapPollingController {
    shared: Arc<Shared>,
}

impl MapPollingController {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        store: Arc<RunStateStore>,
        gate: Option<Arc<OverlayGate>>,
        observer: Arc<dyn MapObserver>,
        config: PollingConfig,
    ) -> Self {
        Self::with_classifier(fetch, store, gate, observer, config, default_run_end_classifier())
    }

    pub fn with_classifier(
        fetch: Arc<dyn Fetch>,
        store: Arc<RunStateStore>,
        gate: Option<Arc<OverlayGate>>,
        observer: Arc<dyn MapObserver>,
        config: PollingConfig,
        classify: RunEndClassifier,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetch,
                store,
                gate,
                observer,
                classify,
                config,
                state: Mutex::new(MapState::default()),
            }),
        }
    }

    pub fn start(&self, run_id: &str) {
        let mut state = lock(&self.shared.state);
        if state.active || state.destroyed || run_id.is_empty() {
            return;
        }
        state.active = true;
        state.run_id = run_id.to_string();
        state.failures = 0;
        tracing::debug!(controller = "map", run_id = %run_id, "map polling started");
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
        tracing::debug!(controller = "map", "map polling stopped");
    }

    /// Force a tick now, e.g. after a room action changed server state.
    pub fn sync_now(&self) {
        let mut state = lock(&self.shared.state);
        if state.active && !state.destroyed && !state.in_flight {
            Shared::schedule(&self.shared, &mut state, Duration::ZERO);
        }
    }

    pub fn destroy(&self) {
        let mut state = lock(&self.shared.state);
        state.destroyed = true;
        state.active = false;
        state.timer.cancel();
    }

    /// Edge-triggered activation from a store publication. A new run id
    /// while eligible restarts polling for that run.
    pub fn sync_with(&self, snapshot: &RunSnapshot) {
        let eligible = snapshot.map_polling_eligible();
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
                tracing::debug!(controller = "map", run_id = %snapshot.run_id, "run id changed; restarting");
                self.stop();
            }
            self.start(&snapshot.run_id);
        } else {
            self.stop();
        }
    }

    pub fn attach(&self, store: &RunStateStore) -> Subscription {
        let controller = self.clone();
        let subscription = store.subscribe(move |snapshot| controller.sync_with(snapshot));
        self.sync_with(&store.get_snapshot());
        subscription
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared.state).active
    }

    pub fn failure_count(&self) -> u32 {
        lock(&self.shared.state).failures
    }
}

impl Shared {
    /// Arm the next tick. False outside a Tokio runtime.
    fn schedule(this: &Arc<Self>, state: &mut MapState, delay: Duration) -> bool {
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
                Self::schedule(&self, &mut state, self.config.success_delay);
                return;
            }
            state.in_flight = true;
            state.run_id.clone()
        };

        let result = self.fetch.fetch(Some(&run_id)).await;

        let step = {
            let mut state = lock(&self.state);
            state.in_flight = false;
            if !state.active || state.destroyed {
                return;
            }
            if state.run_id != run_id {
                tracing::debug!(controller = "map", stale = %run_id, "discarding response for a previous run");
                Self::schedule(&self, &mut state, Duration::ZERO);
                return;
            }
            let step = match result {
                Ok(payload) if truthy(&payload) => Step::Applied(payload),
                Ok(_) => Step::RunEnd,
                Err(e) if (self.classify)(&e) => {
                    tracing::info!(controller = "map", run_id = %run_id, error = %e, "run ended");
                    Step::RunEnd
                }
                Err(e) => {
                    state.failures = state.failures.saturating_add(1);
                    let delay = retry_delay(state.failures, self.config.retry_base, self.config.max_retry);
                    tracing::debug!(
                        controller = "map",
                        failures = state.failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "map poll failed; backing off"
                    );
                    Self::schedule(&self, &mut state, delay);
                    return;
                }
            };
            state.failures = 0;
            if matches!(step, Step::RunEnd) {
                state.active = false;
                state.timer.cancel();
            }
            step
        };

        let payload = match step {
            Step::RunEnd => {
                self.store.reset();
                isolate("map", "on_run_end", || self.observer.on_run_end());
                return;
            }
            Step::Applied(payload) => payload,
        };

        self.store.apply_map_payload(&payload);
        isolate("map", "on_map_state", || self.observer.on_map_state(&payload));

        let snapshot = self.store.get_snapshot();
        let detected = snapshot
            .room_data
            .as_ref()
            .filter(|room| !snapshot.battle_active && battle_in_progress(room));
        if let Some(room) = detected {
            {
                let mut state = lock(&self.state);
                state.active = false;
                state.timer.cancel();
            }
            tracing::info!(controller = "map", run_id = %run_id, "battle detected");
            self.store.set_battle_active(true);
            isolate("map", "on_battle_detected", || self.observer.on_battle_detected(room));
            return;
        }

        let mut state = lock(&self.state);
        if state.active && !state.destroyed && !state.timer.is_armed() && !state.in_flight {
            Self::schedule(&self, &mut state, self.config.success_delay);
        }
    }
}
