//! The injected fetch operation consumed by every poller.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::errors::FetchError;

/// Asynchronous fetch of one authoritative payload.
///
/// `run_id` is `None` for the root UI-state poller. A `Value::Null` (or any
/// falsy) payload is a legitimate answer meaning "nothing there".
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, run_id: Option<&str>) -> Result<Value, FetchError>;
}

/// Adapter turning an async closure into a [`Fetch`].
pub struct FnFetch<F> {
    f: F,
}

impl<F, Fut> FnFetch<F>
where
    F: Fn(Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn Fetch>
    where
        F: 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Fetch for FnFetch<F>
where
    F: Fn(Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send,
{
    async fn fetch(&self, run_id: Option<&str>) -> Result<Value, FetchError> {
        (self.f)(run_id.map(str::to_string)).await
    }
}

/// Decides whether a fetch rejection ends the run.
pub type RunEndClassifier = Arc<dyn Fn(&FetchError) -> bool + Send + Sync>;

/// Classifier backed by [`FetchError::is_run_end`].
pub fn default_run_end_classifier() -> RunEndClassifier {
    Arc::new(should_handle_run_end_error)
}

/// Whether `error` signals that the run is over.
pub fn should_handle_run_end_error(error: &FetchError) -> bool {
    error.is_run_end()
}
