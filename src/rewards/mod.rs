//! Reward progression after a battle.
//!
//! This module provides:
//! - `RewardPhase`: canonical phases plus the alias table for server tokens
//! - `normalize_reward_progression`: payload to `RewardPhaseSnapshot`
//! - `RewardPhaseController`: state machine with enter/exit/change events

pub mod controller;
pub mod normalize;
pub mod phase;

pub use controller::{ChangeReason, PhaseChange, RewardPhaseController};
pub use normalize::{RewardPhaseSnapshot, hints_from_room, normalize_reward_progression};
pub use phase::{DEFAULT_SEQUENCE, Diagnostic, RewardPhase, canonical_token, order_phases};
