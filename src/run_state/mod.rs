//! Canonical local snapshot of the remote run.
//!
//! This module provides:
//! - `RunSnapshot` and `MapUpdate`: the snapshot and map payload parsing
//! - `RunStateStore`: publish/subscribe store, the only shared mutable state
//! - `RunIdStorage`: persistence of the active run id

pub mod snapshot;
pub mod storage;
pub mod store;

pub use snapshot::{MapUpdate, RunSnapshot, normalize_party};
pub use storage::{FileRunIdStorage, MemoryRunIdStorage, RunIdStorage};
pub use store::{MENU_MODE, RunStateStore};
