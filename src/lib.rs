pub mod automation;
pub mod config;
pub mod errors;
pub mod listeners;
pub mod overlay;
pub mod polling;
pub mod rewards;
pub mod run_state;
pub mod session;
pub mod transport;
pub mod util;

pub use automation::{AutomationAction, RewardAutomationScheduler, compute_automation_action};
pub use errors::{FetchError, SessionError, StorageError};
pub use overlay::OverlayGate;
pub use polling::{BattlePollingController, MapPollingController, PollingController};
pub use rewards::{RewardPhase, RewardPhaseController, RewardPhaseSnapshot, normalize_reward_progression};
pub use run_state::{RunSnapshot, RunStateStore};
pub use session::{RunSession, SessionDeps, SessionEvent, SessionSettings};
