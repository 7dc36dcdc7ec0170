//! Paced execution of automatic reward actions.
//!
//! At most one action is pending and at most one is running. Scheduling a
//! materially different action replaces the pending one; scheduling the same
//! action again keeps its original delay.

use async_trait::async_trait;
use futures::FutureExt;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::action::AutomationAction;
use crate::listeners::{isolate, lock};
use crate::polling::timer::TickTimer;

/// Inclusive delay range for one kind of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayBounds {
    pub min: Duration,
    pub max: Duration,
}

impl DelayBounds {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// A random delay within the bounds; `min` when the range is empty.
    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rng.gen_range(min..=max))
    }
}

/// Delay bounds per action type, plus one shared set for reduced motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomationDelays {
    pub ack_loot: DelayBounds,
    pub select: DelayBounds,
    pub confirm: DelayBounds,
    pub advance: DelayBounds,
    pub next_room: DelayBounds,
    pub reduced_motion: DelayBounds,
}

impl Default for AutomationDelays {
    fn default() -> Self {
        Self {
            ack_loot: DelayBounds::from_millis(600, 1200),
            select: DelayBounds::from_millis(700, 1400),
            confirm: DelayBounds::from_millis(400, 900),
            advance: DelayBounds::from_millis(500, 1000),
            next_room: DelayBounds::from_millis(800, 1600),
            reduced_motion: DelayBounds::from_millis(150, 350),
        }
    }
}

impl AutomationDelays {
    /// Every action waits exactly `delay`.
    pub fn fixed(delay: Duration) -> Self {
        let bounds = DelayBounds {
            min: delay,
            max: delay,
        };
        Self {
            ack_loot: bounds,
            select: bounds,
            confirm: bounds,
            advance: bounds,
            next_room: bounds,
            reduced_motion: bounds,
        }
    }

    pub fn bounds_for(&self, action: &AutomationAction, reduced_motion: bool) -> DelayBounds {
        if reduced_motion {
            return self.reduced_motion;
        }
        match action {
            AutomationAction::AckLoot => self.ack_loot,
            AutomationAction::SelectCard { .. } | AutomationAction::SelectRelic { .. } => self.select,
            AutomationAction::ConfirmCard { .. } | AutomationAction::ConfirmRelic { .. } => self.confirm,
            AutomationAction::NextRoom => self.next_room,
            AutomationAction::Advance { .. } | AutomationAction::None => self.advance,
        }
    }
}

/// How a fired action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed,
    /// `validate` rejected the action at fire time.
    Invalidated,
    Failed(String),
}

/// Carries out scheduled actions.
#[async_trait]
pub trait AutomationHandler: Send + Sync {
    async fn execute(&self, action: &AutomationAction) -> anyhow::Result<()>;

    /// Last-moment check that the action still applies.
    async fn validate(&self, _action: &AutomationAction) -> bool {
        true
    }

    /// Called exactly once per fired action, after it finished.
    fn on_settled(&self, _action: &AutomationAction, _outcome: &ExecutionOutcome) {}
}

/// Result of a [`RewardAutomationScheduler::schedule`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A `none` action cleared the pending one, or the scheduler is destroyed.
    Cancelled,
    /// An action is executing; the request was dropped.
    IgnoredRunning,
    /// The same action is already waiting to fire.
    AlreadyPending,
    Armed { token: u64, delay: Duration },
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: Option<AutomationAction>,
    running: bool,
    destroyed: bool,
    reduced_motion: bool,
    timer: TickTimer,
}

struct Inner {
    delays: AutomationDelays,
    rng: Mutex<SmallRng>,
    state: Mutex<SchedulerState>,
}

/// Delay-and-execute controller for automatic reward actions.
#[derive(Clone)]
pub struct RewardAutomationScheduler {
    inner: Arc<Inner>,
}

impl RewardAutomationScheduler {
    pub fn new(delays: AutomationDelays) -> Self {
        Self::with_rng(delays, SmallRng::from_entropy())
    }

    /// Scheduler with reproducible delays.
    pub fn with_seed(delays: AutomationDelays, seed: u64) -> Self {
        Self::with_rng(delays, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(delays: AutomationDelays, rng: SmallRng) -> Self {
        Self {
            inner: Arc::new(Inner {
                delays,
                rng: Mutex::new(rng),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn set_reduced_motion(&self, enabled: bool) {
        lock(&self.inner.state).reduced_motion = enabled;
    }

    pub fn reduced_motion(&self) -> bool {
        lock(&self.inner.state).reduced_motion
    }

    /// Arrange for `action` to run after a randomized delay.
    pub fn schedule(&self, action: AutomationAction, handler: Arc<dyn AutomationHandler>) -> ScheduleOutcome {
        let mut state = lock(&self.inner.state);
        if state.destroyed {
            return ScheduleOutcome::Cancelled;
        }
        if action.is_none() {
            if state.pending.take().is_some() {
                tracing::debug!("automation cancelled");
            }
            state.timer.cancel();
            return ScheduleOutcome::Cancelled;
        }
        if state.running {
            return ScheduleOutcome::IgnoredRunning;
        }
        if state.timer.is_armed()
            && state
                .pending
                .as_ref()
                .is_some_and(|pending| pending.same_request(&action))
        {
            return ScheduleOutcome::AlreadyPending;
        }

        let bounds = self.inner.delays.bounds_for(&action, state.reduced_motion);
        let delay = bounds.sample(&mut *lock(&self.inner.rng));
        let inner = Arc::clone(&self.inner);
        let fired = action.clone();
        let armed = state
            .timer
            .arm(delay, move |token| async move { inner.fire(token, fired, handler).await });
        if !armed {
            state.pending = None;
            state.timer.cancel();
            return ScheduleOutcome::Cancelled;
        }
        let token = state.timer.generation();
        tracing::debug!(action = %action, token, delay_ms = delay.as_millis() as u64, "automation armed");
        state.pending = Some(action);
        ScheduleOutcome::Armed { token, delay }
    }

    /// Drop the pending action. A running action finishes normally.
    pub fn cancel(&self) {
        let mut state = lock(&self.inner.state);
        state.pending = None;
        state.timer.cancel();
    }

    /// Cancel and refuse every later request.
    pub fn destroy(&self) {
        let mut state = lock(&self.inner.state);
        state.destroyed = true;
        state.pending = None;
        state.timer.cancel();
    }

    pub fn pending(&self) -> Option<AutomationAction> {
        lock(&self.inner.state).pending.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).running
    }
}

impl Inner {
    async fn fire(self: Arc<Self>, token: u64, action: AutomationAction, handler: Arc<dyn AutomationHandler>) {
        {
            let mut state = lock(&self.state);
            if state.destroyed || !state.timer.claim(token) {
                return;
            }
            state.running = true;
        }

        let run = async {
            if !handler.validate(&action).await {
                return ExecutionOutcome::Invalidated;
            }
            match handler.execute(&action).await {
                Ok(()) => ExecutionOutcome::Executed,
                Err(e) => ExecutionOutcome::Failed(format!("{e:#}")),
            }
        };
        let outcome = AssertUnwindSafe(run)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| ExecutionOutcome::Failed("automation handler panicked".to_string()));

        match &outcome {
            ExecutionOutcome::Executed => tracing::debug!(action = %action, "automation executed"),
            ExecutionOutcome::Invalidated => tracing::debug!(action = %action, "automation no longer valid"),
            ExecutionOutcome::Failed(error) => tracing::warn!(action = %action, error = %error, "automation failed"),
        }

        {
            let mut state = lock(&self.state);
            state.running = false;
            state.pending = None;
        }
        isolate("automation", "on_settled", || handler.on_settled(&action, &outcome));
    }
}
