//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `watch`   | `Watch`                 |
//! | `inspect` | `Normalize`, `Action`   |
//! | `config`  | `Config`                |

pub mod config;
pub mod inspect;
pub mod watch;

pub use config::cmd_config;
pub use inspect::{cmd_action, cmd_normalize};
pub use watch::cmd_watch;
