//! Timer-driven pollers.
//!
//! This module provides:
//! - `PollingController`: generic gated, single-flight poll loop with backoff
//! - `BattlePollingController`: follows an active battle to its outcome
//! - `MapPollingController`: party/map/room state between battles
//! - `Fetch`: the injected network seam shared by all three

pub mod battle;
pub mod controller;
pub mod fetch;
pub mod map;
pub mod payload;
pub(crate) mod timer;

pub use battle::{
    BattleObserver, BattleOutcome, BattlePollingConfig, BattlePollingController, NoopBattleObserver,
};
pub use controller::{PollingConfig, PollingController};
pub use fetch::{
    Fetch, FnFetch, RunEndClassifier, default_run_end_classifier, should_handle_run_end_error,
};
pub use map::{MapObserver, MapPollingController, NoopMapObserver};
pub use timer::retry_delay;
