//! Composition root: one `RunSession` per active game session.
//!
//! The session owns every controller and wires them together:
//! - the root poller feeds server mode, run id and reward progression
//! - the store's battle flag hands control between the map and battle pollers
//! - store publications outside battle drive reward automation
//!
//! Everything observable is fanned out as [`SessionEvent`]s on a broadcast
//! channel.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

use crate::automation::{
    AutomationAction, AutomationDelays, AutomationHandler, ExecutionOutcome, RewardAutomationScheduler,
    ScheduleOutcome, compute_automation_action,
};
use crate::config::SyncConfig;
use crate::errors::SessionError;
use crate::listeners::{Subscription, lock};
use crate::overlay::OverlayGate;
use crate::polling::{
    BattleObserver, BattlePollingConfig, BattlePollingController, Fetch, MapObserver, MapPollingController,
    PollingConfig, PollingController, RunEndClassifier, default_run_end_classifier,
};
use crate::rewards::{ChangeReason, RewardPhase, RewardPhaseController, hints_from_room};
use crate::run_state::{RunSnapshot, RunStateStore};
use crate::util::string_field;

const EVENT_CAPACITY: usize = 256;

/// Something a session consumer may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    RunStarted {
        run_id: String,
    },
    RunEnded,
    MenuEntered,
    MapUpdated,
    BattleDetected,
    BattleComplete,
    BattleError {
        message: String,
    },
    MissingSnapshotTimeout,
    BattleSettled,
    PhaseChanged {
        from: Option<RewardPhase>,
        to: Option<RewardPhase>,
        reason: ChangeReason,
    },
    AutomationArmed {
        action: AutomationAction,
        delay_ms: u64,
    },
    AutomationSettled {
        action: AutomationAction,
        outcome: String,
    },
}

/// Injected collaborators of a session.
pub struct SessionDeps {
    /// Root UI-state endpoint (no run id).
    pub ui: Arc<dyn Fetch>,
    pub battle: Arc<dyn Fetch>,
    pub map: Arc<dyn Fetch>,
    /// Shared with the automation handler when it needs the active run.
    pub store: Arc<RunStateStore>,
    pub classifier: RunEndClassifier,
    /// Executes automation actions. Automation stays off without one.
    pub automation: Option<Arc<dyn AutomationHandler>>,
}

impl SessionDeps {
    /// Deps with an in-memory store, the default classifier and no automation.
    pub fn new(ui: Arc<dyn Fetch>, battle: Arc<dyn Fetch>, map: Arc<dyn Fetch>) -> Self {
        Self {
            ui,
            battle,
            map,
            store: Arc::new(RunStateStore::in_memory()),
            classifier: default_run_end_classifier(),
            automation: None,
        }
    }

    pub fn with_store(mut self, store: Arc<RunStateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_classifier(mut self, classifier: RunEndClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_automation(mut self, handler: Arc<dyn AutomationHandler>) -> Self {
        self.automation = Some(handler);
        self
    }
}

/// Cadences and switches of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub root: PollingConfig,
    pub map: PollingConfig,
    pub battle: BattlePollingConfig,
    pub automation: bool,
    pub reduced_motion: bool,
    pub delays: AutomationDelays,
}

impl From<&SyncConfig> for SessionSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            root: config.root_polling(),
            map: config.map_polling(),
            battle: config.battle_polling(),
            automation: config.toml.automation.enabled,
            reduced_motion: config.toml.automation.reduced_motion,
            delays: config.automation_delays(),
        }
    }
}

/// Forwards poller outcomes onto the event channel.
struct EventSink {
    events: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    fn send(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

impl BattleObserver for EventSink {
    fn on_battle_complete(&self, _snapshot: &Value) {
        self.send(SessionEvent::BattleComplete);
    }

    fn on_battle_error(&self, message: &str) {
        self.send(SessionEvent::BattleError {
            message: message.to_string(),
        });
    }

    fn on_missing_snapshot_timeout(&self) {
        self.send(SessionEvent::MissingSnapshotTimeout);
    }

    fn on_run_end(&self) {
        self.send(SessionEvent::RunEnded);
    }

    fn on_battle_settled(&self) {
        self.send(SessionEvent::BattleSettled);
    }
}

impl MapObserver for EventSink {
    fn on_map_state(&self, _payload: &Value) {
        self.send(SessionEvent::MapUpdated);
    }

    fn on_battle_detected(&self, _room_data: &Value) {
        self.send(SessionEvent::BattleDetected);
    }

    fn on_run_end(&self) {
        self.send(SessionEvent::RunEnded);
    }
}

/// Wraps the injected handler: reports settlement and refreshes the map so
/// the next action sees the server's new state.
struct SessionHandler {
    inner: Arc<dyn AutomationHandler>,
    sink: Arc<EventSink>,
    map: MapPollingController,
}

#[async_trait::async_trait]
impl AutomationHandler for SessionHandler {
    async fn execute(&self, action: &AutomationAction) -> anyhow::Result<()> {
        self.inner.execute(action).await
    }

    async fn validate(&self, action: &AutomationAction) -> bool {
        self.inner.validate(action).await
    }

    fn on_settled(&self, action: &AutomationAction, outcome: &ExecutionOutcome) {
        self.inner.on_settled(action, outcome);
        let outcome = match outcome {
            ExecutionOutcome::Executed => "executed".to_string(),
            ExecutionOutcome::Invalidated => "invalidated".to_string(),
            ExecutionOutcome::Failed(error) => format!("failed: {error}"),
        };
        self.sink.send(SessionEvent::AutomationSettled {
            action: action.clone(),
            outcome,
        });
        self.map.sync_now();
    }
}

struct Core {
    store: Arc<RunStateStore>,
    gate: Arc<OverlayGate>,
    root: PollingController,
    battle: BattlePollingController,
    map: MapPollingController,
    rewards: RewardPhaseController,
    scheduler: RewardAutomationScheduler,
    sink: Arc<EventSink>,
    automation: Option<Arc<dyn AutomationHandler>>,
    automation_enabled: bool,
    last_run_id: Mutex<String>,
    subscriptions: Mutex<Vec<Subscription>>,
    started: AtomicBool,
    destroyed: AtomicBool,
}

/// One synchronized game session.
pub struct RunSession {
    core: Arc<Core>,
}

impl RunSession {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sink = Arc::new(EventSink { events });
        let store = deps.store;
        let gate = Arc::new(OverlayGate::new());

        let root = PollingController::new("root", deps.ui, Some(Arc::clone(&gate)), settings.root);
        let battle = BattlePollingController::new(
            deps.battle,
            Arc::clone(&store),
            Arc::clone(&sink) as Arc<dyn BattleObserver>,
            settings.battle,
        )
        .with_gate(Arc::clone(&gate))
        .with_classifier(Arc::clone(&deps.classifier));
        let map = MapPollingController::with_classifier(
            deps.map,
            Arc::clone(&store),
            Some(Arc::clone(&gate)),
            Arc::clone(&sink) as Arc<dyn MapObserver>,
            settings.map,
            deps.classifier,
        );

        let scheduler = RewardAutomationScheduler::new(settings.delays);
        scheduler.set_reduced_motion(settings.reduced_motion);

        let automation = deps.automation.map(|inner| {
            Arc::new(SessionHandler {
                inner,
                sink: Arc::clone(&sink),
                map: map.clone(),
            }) as Arc<dyn AutomationHandler>
        });

        Self {
            core: Arc::new(Core {
                store,
                gate,
                root,
                battle,
                map,
                rewards: RewardPhaseController::new(),
                scheduler,
                sink,
                automation,
                automation_enabled: settings.automation,
                last_run_id: Mutex::new(String::new()),
                subscriptions: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Restore the persisted run, wire the controllers together and start
    /// the root poller. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), SessionError> {
        let core = &self.core;
        if core.destroyed.load(Ordering::SeqCst) {
            return Err(SessionError::ShutDown);
        }
        if core.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(core);
        subscriptions.push(core.rewards.on_change(move |change| {
            if let Some(core) = weak.upgrade() {
                core.sink.send(SessionEvent::PhaseChanged {
                    from: change.previous.current.clone(),
                    to: change.current.current.clone(),
                    reason: change.reason,
                });
            }
        }));

        let weak: Weak<Core> = Arc::downgrade(core);
        subscriptions.push(core.store.subscribe(move |snapshot| {
            if let Some(core) = weak.upgrade() {
                core.on_store(snapshot);
            }
        }));

        let weak: Weak<Core> = Arc::downgrade(core);
        subscriptions.push(core.root.on_ui_state(move |payload| {
            if let Some(core) = weak.upgrade() {
                core.on_ui_state(payload);
            }
        }));

        let root = core.root.clone();
        subscriptions.push(core.gate.subscribe(move |overlay| {
            if !overlay.should_pause() {
                root.sync_now();
            }
        }));

        subscriptions.push(core.battle.attach(&core.store));
        subscriptions.push(core.map.attach(&core.store));
        lock(&core.subscriptions).extend(subscriptions);

        match core.store.restore() {
            Ok(Some(run_id)) => tracing::info!(run_id = %run_id, "resuming persisted run"),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not restore persisted run id"),
        }

        core.root.start();
        tracing::info!("session started");
        Ok(())
    }

    /// Stop every controller and drop every subscription. Irreversible.
    pub fn destroy(&self) {
        let core = &self.core;
        if core.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        core.root.destroy();
        core.battle.destroy();
        core.map.destroy();
        core.scheduler.destroy();
        let subscriptions = std::mem::take(&mut *lock(&core.subscriptions));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        tracing::info!("session destroyed");
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.sink.events.subscribe()
    }

    pub fn store(&self) -> &Arc<RunStateStore> {
        &self.core.store
    }

    pub fn gate(&self) -> &Arc<OverlayGate> {
        &self.core.gate
    }

    pub fn rewards(&self) -> &RewardPhaseController {
        &self.core.rewards
    }

    pub fn scheduler(&self) -> &RewardAutomationScheduler {
        &self.core.scheduler
    }

    pub fn root(&self) -> &PollingController {
        &self.core.root
    }

    pub fn battle(&self) -> &BattlePollingController {
        &self.core.battle
    }

    pub fn map(&self) -> &MapPollingController {
        &self.core.map
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Room data nested in a root payload, if any.
fn root_room_data(payload: &Value) -> Option<&Value> {
    payload
        .get("room_data")
        .or_else(|| payload.get("current_state").and_then(|s| s.get("room_data")))
        .filter(|room| room.is_object())
}

impl Core {
    fn on_ui_state(&self, payload: &Value) {
        if let Some(mode) = string_field(payload, "mode") {
            let had_run = self.store.get_snapshot().has_run();
            if self.store.apply_server_mode(mode) {
                self.rewards.reset();
                self.scheduler.cancel();
                if had_run {
                    self.sink.send(SessionEvent::MenuEntered);
                }
                return;
            }
        }

        if let Some(run_id) = string_field(payload, "run_id") {
            self.store.set_run_id(run_id);
        }

        if let Some(room) = root_room_data(payload) {
            self.ingest_rewards(room);
        }
    }

    fn on_store(&self, snapshot: &RunSnapshot) {
        {
            let mut last = lock(&self.last_run_id);
            if *last != snapshot.run_id {
                last.clone_from(&snapshot.run_id);
                if snapshot.has_run() {
                    self.sink.send(SessionEvent::RunStarted {
                        run_id: snapshot.run_id.clone(),
                    });
                }
            }
        }

        if !snapshot.has_run() {
            self.rewards.reset();
        } else if !snapshot.battle_active
            && let Some(room) = &snapshot.room_data
        {
            self.ingest_rewards(room);
        }

        self.automate(snapshot);
    }

    fn ingest_rewards(&self, room: &Value) {
        if let Some(progression) = room.get("reward_progression").filter(|p| p.is_object()) {
            self.rewards.ingest(progression, &hints_from_room(room));
        }
    }

    /// Recompute and schedule the automatic action for `snapshot`.
    fn automate(&self, snapshot: &RunSnapshot) {
        if !self.automation_enabled || self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let Some(handler) = &self.automation else {
            return;
        };

        let action = if snapshot.battle_active || !snapshot.has_run() {
            AutomationAction::None
        } else {
            let phases = self.rewards.snapshot();
            let phases = (!phases.is_empty()).then_some(phases);
            compute_automation_action(snapshot.room_data.as_ref().unwrap_or(&Value::Null), phases.as_ref())
        };

        if let ScheduleOutcome::Armed { delay, .. } = self.scheduler.schedule(action.clone(), Arc::clone(handler)) {
            self.sink.send(SessionEvent::AutomationArmed {
                action,
                delay_ms: delay.as_millis() as u64,
            });
        }
    }
}
