//! The run state store: the single shared mutable resource of a session.
//!
//! Pollers never touch fields directly; they go through the mutators below
//! and observe changes through `subscribe`. Every mutation publishes at most
//! once, and only when the snapshot actually changed.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::snapshot::{MapUpdate, RunSnapshot, normalize_party};
use super::storage::{MemoryRunIdStorage, RunIdStorage};
use crate::errors::StorageError;
use crate::listeners::{ListenerSet, Subscription, lock};

/// Server mode that ends the local run view.
pub const MENU_MODE: &str = "menu";

pub struct RunStateStore {
    state: Mutex<RunSnapshot>,
    listeners: ListenerSet<RunSnapshot>,
    storage: Arc<dyn RunIdStorage>,
}

impl RunStateStore {
    pub fn new(storage: Arc<dyn RunIdStorage>) -> Self {
        Self {
            state: Mutex::new(RunSnapshot::default()),
            listeners: ListenerSet::new("run_state"),
            storage,
        }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRunIdStorage::new()))
    }

    /// Load the persisted run id into the snapshot.
    ///
    /// Returns the restored id. Existing state is left alone when nothing is
    /// persisted.
    pub fn restore(&self) -> Result<Option<String>, StorageError> {
        let persisted = self.storage.load()?;
        if let Some(run_id) = &persisted {
            tracing::debug!(run_id = %run_id, "restored persisted run id");
            let run_id = run_id.clone();
            self.update(move |s| s.run_id = run_id);
        }
        Ok(persisted)
    }

    /// Copy of the current snapshot.
    pub fn get_snapshot(&self) -> RunSnapshot {
        lock(&self.state).clone()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self, listener: impl Fn(&RunSnapshot) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Apply `mutate` atomically and publish once if anything changed.
    ///
    /// Returns whether the snapshot changed.
    pub fn update(&self, mutate: impl FnOnce(&mut RunSnapshot)) -> bool {
        let (previous_run_id, next) = {
            let mut state = lock(&self.state);
            let before = state.clone();
            mutate(&mut state);
            state.enforce_invariants();
            if *state == before {
                return false;
            }
            (before.run_id, state.clone())
        };

        if previous_run_id != next.run_id {
            self.persist_run_id(&next.run_id);
        }
        self.listeners.emit(&next);
        true
    }

    pub fn set_run_id(&self, run_id: impl Into<String>) {
        let run_id = run_id.into();
        self.update(move |s| s.run_id = run_id.trim().to_string());
    }

    /// Replace the selected party from a raw `party` payload.
    pub fn set_party(&self, party: &Value) {
        let party = normalize_party(party);
        self.update(move |s| s.selected_party = party);
    }

    pub fn set_map_state(&self, update: MapUpdate) {
        self.update(move |s| update.apply_to(s));
    }

    /// Apply a full map poll response (`party`, `map`, `current_state`).
    pub fn apply_map_payload(&self, payload: &Value) {
        self.set_map_state(MapUpdate::from_payload(payload));
    }

    pub fn set_battle_active(&self, active: bool) {
        self.update(move |s| s.battle_active = active);
    }

    pub fn set_last_battle_snapshot(&self, snapshot: Option<Value>) {
        self.update(move |s| s.last_battle_snapshot = snapshot);
    }

    /// Return every field to its default and drop the persisted run id.
    pub fn reset(&self) {
        self.update(|s| *s = RunSnapshot::default());
    }

    /// React to the server-reported mode. `"menu"` ends the local run view.
    ///
    /// Returns whether the store was reset.
    pub fn apply_server_mode(&self, mode: &str) -> bool {
        if mode.eq_ignore_ascii_case(MENU_MODE) {
            self.reset();
            true
        } else {
            false
        }
    }

    fn persist_run_id(&self, run_id: &str) {
        let result = if run_id.is_empty() {
            self.storage.clear()
        } else {
            self.storage.save(run_id)
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist run id");
        }
    }
}

impl std::fmt::Debug for RunStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStateStore")
            .field("state", &self.get_snapshot())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
