//! Automatic advancement through post-battle rewards.
//!
//! This module provides:
//! - `compute_automation_action`: pure choice of the next action
//! - `RewardAutomationScheduler`: paces that action behind a randomized delay

pub mod action;
pub mod scheduler;

pub use action::{
    AutomationAction, AutomationContext, AutomationStrategy, LegacyStrategy, PhaseAwareStrategy,
    compute_automation_action, phases_well_formed,
};
pub use scheduler::{
    AutomationDelays, AutomationHandler, DelayBounds, ExecutionOutcome, RewardAutomationScheduler,
    ScheduleOutcome,
};
