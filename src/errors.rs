//! Typed error hierarchy for the run synchronization core.
//!
//! Three enums/structs cover the three failure surfaces:
//! - `FetchError`: rejection shape of the injected fetch operation
//! - `StorageError`: run id persistence failures
//! - `SessionError`: composition-root failures

use std::path::PathBuf;
use thiserror::Error;

/// Code the backend uses when a request targets a run that no longer exists.
pub const ERR_NO_ACTIVE_RUN: &str = "ERR_NO_ACTIVE_RUN";

/// Rejection produced by an injected fetch operation.
///
/// Every field is optional: transports report whatever they know. The codes
/// are kept apart because backends put them in different places (top level,
/// inside the JSON body, or on the wrapped response).
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct FetchError {
    pub status: Option<u16>,
    pub message: Option<String>,
    pub code: Option<String>,
    pub body_code: Option<String>,
    pub response_code: Option<String>,
}

impl FetchError {
    /// Error carrying only a message (network failures, decode errors).
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Error carrying an HTTP status and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_body_code(mut self, code: impl Into<String>) -> Self {
        self.body_code = Some(code.into());
        self
    }

    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = Some(code.into());
        self
    }

    /// All codes the error carries, in lookup order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        [&self.code, &self.body_code, &self.response_code]
            .into_iter()
            .filter_map(|c| c.as_deref())
    }

    /// Whether this rejection means the run is over rather than a transient
    /// failure.
    ///
    /// True when the status is 404, the message mentions "run ended"
    /// (any case), the status is 400 with "no active run" in the message, or
    /// any code equals [`ERR_NO_ACTIVE_RUN`].
    pub fn is_run_end(&self) -> bool {
        if self.status == Some(404) {
            return true;
        }

        let message = self.message.as_deref().unwrap_or("").to_lowercase();
        if message.contains("run ended") {
            return true;
        }
        if self.status == Some(400) && message.contains("no active run") {
            return true;
        }

        self.codes().any(|code| code == ERR_NO_ACTIVE_RUN)
    }

    fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("request failed");
        match (self.status, self.codes().next()) {
            (Some(status), Some(code)) => format!("{message} (status {status}, code {code})"),
            (Some(status), None) => format!("{message} (status {status})"),
            (None, Some(code)) => format!("{message} (code {code})"),
            (None, None) => message.to_string(),
        }
    }
}

/// Errors from run id persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read run state at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write run state at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove run state at {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed run state: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the session composition root.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session has been shut down")]
    ShutDown,
}
