//! Generic single-flight poll loop.
//!
//! Each tick: evaluate the overlay gate, fetch, notify subscribers, and
//! reschedule. Failures back off exponentially. Exactly one fetch is ever in
//! flight; tick N+1 is only armed once tick N's fetch has settled.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::fetch::Fetch;
use super::timer::{TickTimer, retry_delay};
use crate::listeners::{ListenerSet, Subscription, lock};
use crate::overlay::OverlayGate;

/// Cadence of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Delay after a successful (or gated) tick.
    pub success_delay: Duration,
    /// First retry delay after a failure.
    pub retry_base: Duration,
    /// Ceiling for the backoff.
    pub max_retry: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_millis(1000),
            retry_base: Duration::from_millis(500),
            max_retry: Duration::from_millis(8000),
        }
    }
}

impl PollingConfig {
    pub fn new(success_delay: Duration, retry_base: Duration, max_retry: Duration) -> Self {
        Self {
            success_delay,
            retry_base,
            max_retry,
        }
    }
}

#[derive(Debug, Default)]
struct LoopState {
    running: bool,
    destroyed: bool,
    paused: bool,
    in_flight: bool,
    sync_requested: bool,
    failures: u32,
    timer: TickTimer,
}

struct Shared {
    label: &'static str,
    fetch: Arc<dyn Fetch>,
    gate: Option<Arc<OverlayGate>>,
    config: PollingConfig,
    state: Mutex<LoopState>,
    listeners: ListenerSet<Value>,
}

/// Handle to a poll loop. Cheap to clone; all clones drive the same loop.
#[derive(Clone)]
pub struct PollingController {
    shared: Arc<Shared>,
}

impl PollingController {
    pub fn new(
        label: &'static str,
        fetch: Arc<dyn Fetch>,
        gate: Option<Arc<OverlayGate>>,
        config: PollingConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                label,
                fetch,
                gate,
                config,
                state: Mutex::new(LoopState::default()),
                listeners: ListenerSet::new(label),
            }),
        }
    }

    /// Start polling with an immediate tick. No-op when already running or
    /// destroyed.
    pub fn start(&self) {
        let mut state = lock(&self.shared.state);
        if state.running || state.destroyed {
            return;
        }
        state.running = true;
        state.failures = 0;
        tracing::debug!(controller = self.shared.label, "polling started");
        if !state.in_flight && !Shared::schedule(&self.shared, &mut state, Duration::ZERO) {
            state.running = false;
        }
    }

    /// Cancel the pending tick. A fetch already in flight finishes, but its
    /// result is discarded and nothing is rescheduled.
    pub fn stop(&self) {
        let mut state = lock(&self.shared.state);
        if !state.running {
            return;
        }
        state.running = false;
        state.paused = false;
        state.sync_requested = false;
        state.timer.cancel();
        tracing::debug!(controller = self.shared.label, "polling stopped");
    }

    /// Tick as soon as possible. When a fetch is in flight the next tick
    /// follows it immediately instead of waiting the success delay.
    pub fn sync_now(&self) {
        let mut state = lock(&self.shared.state);
        if !state.running || state.destroyed {
            return;
        }
        if state.in_flight {
            state.sync_requested = true;
        } else {
            Shared::schedule(&self.shared, &mut state, Duration::ZERO);
        }
    }

    /// Subscribe to successful payloads.
    pub fn on_ui_state(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.shared.listeners.subscribe(handler)
    }

    /// Stop permanently and drop every subscriber.
    pub fn destroy(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.destroyed = true;
            state.running = false;
            state.sync_requested = false;
            state.timer.cancel();
        }
        self.shared.listeners.clear();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Whether the last tick was skipped by the overlay gate.
    pub fn is_paused(&self) -> bool {
        lock(&self.shared.state).paused
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.shared.state).in_flight
    }

    pub fn has_pending_tick(&self) -> bool {
        lock(&self.shared.state).timer.is_armed()
    }

    pub fn failure_count(&self) -> u32 {
        lock(&self.shared.state).failures
    }
}

impl Shared {
    /// Arm the next tick. False outside a Tokio runtime.
    fn schedule(this: &Arc<Self>, state: &mut LoopState, delay: Duration) -> bool {
        let shared = Arc::clone(this);
        state
            .timer
            .arm(delay, move |generation| async move { shared.tick(generation).await })
    }

    fn gated(&self) -> bool {
        self.gate.as_ref().is_some_and(|g| g.should_pause())
    }

    async fn tick(self: Arc<Self>, generation: u64) {
        {
            let mut state = lock(&self.state);
            if !state.running || state.destroyed || !state.timer.claim(generation) {
                return;
            }
            if state.in_flight {
                // Forced while the previous fetch was settling; it ticks again.
                state.sync_requested = true;
                return;
            }
            if self.gated() {
                if !state.paused {
                    tracing::debug!(controller = self.label, "overlay gate closed; pausing");
                }
                state.paused = true;
                Self::schedule(&self, &mut state, self.config.success_delay);
                return;
            }
            state.paused = false;
            state.in_flight = true;
        }

        let result = self.fetch.fetch(None).await;

        let payload = {
            let mut state = lock(&self.state);
            state.in_flight = false;
            if !state.running || state.destroyed {
                tracing::debug!(controller = self.label, "discarding late response");
                return;
            }
            match result {
                Ok(payload) => payload,
                Err(e) => {
                    state.failures = state.failures.saturating_add(1);
                    let delay = retry_delay(state.failures, self.config.retry_base, self.config.max_retry);
                    tracing::debug!(
                        controller = self.label,
                        failures = state.failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "poll failed; backing off"
                    );
                    state.sync_requested = false;
                    Self::schedule(&self, &mut state, delay);
                    return;
                }
            }
        };

        self.listeners.emit(&payload);

        let mut state = lock(&self.state);
        state.failures = 0;
        if !state.running || state.destroyed || state.timer.is_armed() || state.in_flight {
            // A subscriber stopped the loop or already forced a tick.
            return;
        }
        let delay = if std::mem::take(&mut state.sync_requested) {
            Duration::ZERO
        } else {
            self.config.success_delay
        };
        Self::schedule(&self, &mut state, delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::polling::fetch::FnFetch;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    type Script = Arc<Mutex<VecDeque<Result<Value, FetchError>>>>;

    /// Fetch that replays `script` and records the virtual time of each call.
    fn scripted(script: Vec<Result<Value, FetchError>>) -> (Arc<dyn Fetch>, Arc<Mutex<Vec<Instant>>>) {
        let script: Script = Arc::new(Mutex::new(script.into()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_in = Arc::clone(&calls);
        let fetch = FnFetch::shared(move |_run_id: Option<String>| {
            calls_in.lock().unwrap().push(Instant::now());
            let next = script.lock().unwrap().pop_front();
            async move { next.unwrap_or_else(|| Ok(json!({"ok": true}))) }
        });
        (fetch, calls)
    }

    fn config(success: u64, base: u64, max: u64) -> PollingConfig {
        PollingConfig::new(
            Duration::from_millis(success),
            Duration::from_millis(base),
            Duration::from_millis(max),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_reset_after_success() {
        let (fetch, calls) = scripted(vec![
            Err(FetchError::http(503, "unavailable")),
            Err(FetchError::http(503, "unavailable")),
            Ok(json!({"mode": "run"})),
        ]);
        let poller = PollingController::new("test", fetch, None, config(1000, 5, 40));

        poller.start();
        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(poller.failure_count(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(poller.failure_count(), 0);
        poller.stop();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(5));
        assert_eq!(calls[2] - calls[1], Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_caps_at_max_retry() {
        let (fetch, calls) = scripted(vec![
            Err(FetchError::default()),
            Err(FetchError::default()),
            Err(FetchError::default()),
            Err(FetchError::default()),
            Err(FetchError::default()),
        ]);
        let poller = PollingController::new("test", fetch, None, config(1000, 5, 12));
        poller.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        poller.stop();

        let calls = calls.lock().unwrap();
        let gaps: Vec<u64> = calls.windows(2).map(|w| (w[1] - w[0]).as_millis() as u64).collect();
        assert_eq!(&gaps[..4], &[5, 10, 12, 12]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_notifies_and_reschedules() {
        let (fetch, calls) = scripted(vec![]);
        let poller = PollingController::new("test", fetch, None, config(100, 5, 40));
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let _sub = poller.on_ui_state(move |payload| {
            assert_eq!(payload["ok"], json!(true));
            s.fetch_add(1, Ordering::SeqCst);
        });

        poller.start();
        tokio::time::sleep(Duration::from_millis(250)).await;
        poller.stop();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (fetch, calls) = scripted(vec![]);
        let poller = PollingController::new("test", fetch, None, config(100, 5, 40));
        poller.start();
        poller.start();
        poller.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
        poller.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_in_flight_fetch_discards_result() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let fetch = FnFetch::shared(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            let rx = Arc::clone(&release_rx);
            async move {
                if let Some(rx) = rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(json!({"late": true}))
            }
        });

        let poller = PollingController::new("test", fetch, None, config(10, 5, 40));
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        let _sub = poller.on_ui_state(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        poller.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(poller.is_in_flight());

        poller.stop();
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!poller.is_in_flight());
        assert!(!poller.has_pending_tick());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_pauses_without_fetching() {
        let (fetch, calls) = scripted(vec![]);
        let gate = Arc::new(OverlayGate::new());
        gate.set_reward_open(true);
        let poller = PollingController::new("test", fetch, Some(Arc::clone(&gate)), config(50, 5, 40));

        poller.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(poller.is_paused());
        assert!(calls.lock().unwrap().is_empty());

        gate.set_reward_open(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!poller.is_paused());
        assert_eq!(calls.lock().unwrap().len(), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_other_than_main_pauses() {
        let (fetch, calls) = scripted(vec![]);
        let gate = Arc::new(OverlayGate::new());
        gate.set_view("inventory");
        let poller = PollingController::new("test", fetch, Some(gate), config(50, 5, 40));
        poller.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(calls.lock().unwrap().is_empty());
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_now_skips_success_delay() {
        let (fetch, calls) = scripted(vec![]);
        let poller = PollingController::new("test", fetch, None, config(1000, 5, 40));
        poller.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);

        poller.sync_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.lock().unwrap().len(), 2);
        poller.stop();

        poller.sync_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.lock().unwrap().len(), 2, "stopped loop ignores sync_now");
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_subscriber_does_not_halt_loop() {
        let (fetch, calls) = scripted(vec![]);
        let poller = PollingController::new("test", fetch, None, config(20, 5, 40));
        let _bad = poller.on_ui_state(|_| panic!("subscriber failure"));
        poller.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        poller.stop();
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_clears_subscribers_and_blocks_restart() {
        let (fetch, calls) = scripted(vec![]);
        let poller = PollingController::new("test", fetch, None, config(20, 5, 40));
        let _sub = poller.on_ui_state(|_| {});
        poller.destroy();
        poller.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(!poller.is_running());
        assert!(poller.shared.listeners.is_empty());
    }

    #[test]
    fn test_start_outside_runtime_stays_stopped() {
        let (fetch, _calls) = scripted(vec![]);
        let poller = PollingController::new("test", fetch, None, config(20, 5, 40));
        poller.start();
        assert!(!poller.is_running());
        assert!(!poller.has_pending_tick());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscriber_sync_keeps_single_fetch_in_flight() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = {
            let (active, peak, calls) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&calls));
            FnFetch::shared(move |_run_id: Option<String>| {
                let (active, peak, calls) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&calls));
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!({"ok": true}))
                }
            })
        };
        let poller = PollingController::new("test", fetch, None, config(10, 5, 40));

        // On the first payload, force a tick from another thread and hold the
        // emitting worker long enough for that tick to start fetching.
        let handle = tokio::runtime::Handle::current();
        let forced = std::sync::atomic::AtomicBool::new(false);
        let inner = poller.clone();
        let _sub = poller.on_ui_state(move |_| {
            if forced.swap(true, Ordering::SeqCst) {
                return;
            }
            let poller = inner.clone();
            let handle = handle.clone();
            std::thread::spawn(move || {
                let _guard = handle.enter();
                poller.sync_now();
            })
            .join()
            .unwrap();
            std::thread::sleep(Duration::from_millis(50));
        });

        poller.start();
        tokio::time::sleep(Duration::from_millis(450)).await;
        poller.destroy();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
