//! HTTP adapters for the injected seams: [`Fetch`] for the three pollers and
//! [`AutomationHandler`] for reward actions.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::automation::{AutomationAction, AutomationHandler};
use crate::config::TransportSection;
use crate::errors::FetchError;
use crate::polling::Fetch;
use crate::run_state::RunStateStore;

const RUN_ID_PLACEHOLDER: &str = "{run_id}";

/// Join `base_url` and `path`, substituting the run id.
pub fn endpoint_url(base_url: &str, path: &str, run_id: Option<&str>) -> Result<String, FetchError> {
    let path = if path.contains(RUN_ID_PLACEHOLDER) {
        let run_id = run_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FetchError::message(format!("No run id for endpoint {path}")))?;
        path.replace(RUN_ID_PLACEHOLDER, run_id)
    } else {
        path.to_string()
    };
    Ok(format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

fn str_at<'a>(body: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(body, |v, key| v.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Build a [`FetchError`] from a non-2xx response.
///
/// Codes are read from `code`, `error.code` and `detail.code`; the message
/// from `message`, `error`, `error.message` or `detail`, falling back to the
/// status line.
pub fn error_from_response(status: u16, reason: &str, body: &str) -> FetchError {
    let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = str_at(&json, &["message"])
        .or_else(|| str_at(&json, &["error"]))
        .or_else(|| str_at(&json, &["error", "message"]))
        .or_else(|| str_at(&json, &["detail"]))
        .or_else(|| str_at(&json, &["detail", "message"]))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let text = body.trim();
            if text.is_empty() || json.is_object() {
                format!("HTTP {status} {reason}").trim().to_string()
            } else {
                text.to_string()
            }
        });

    let mut error = FetchError::http(status, message);
    if let Some(code) = str_at(&json, &["code"]) {
        error = error.with_code(code);
    }
    if let Some(code) = str_at(&json, &["error", "code"]) {
        error = error.with_body_code(code);
    }
    if let Some(code) = str_at(&json, &["detail", "code"]) {
        error = error.with_response_code(code);
    }
    error
}

/// GETs one backend endpoint as JSON.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    path: String,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            path: path.into(),
        }
    }

    /// Fetchers for the root, battle and map endpoints, sharing one client.
    pub fn endpoints(transport: &TransportSection) -> [Arc<dyn Fetch>; 3] {
        let client = reqwest::Client::new();
        let make = |path: &str| -> Arc<dyn Fetch> {
            Arc::new(Self::new(client.clone(), transport.base_url.clone(), path))
        };
        [
            make(&transport.ui_path),
            make(&transport.battle_path),
            make(&transport.map_path),
        ]
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, run_id: Option<&str>) -> Result<Value, FetchError> {
        let url = endpoint_url(&self.base_url, &self.path, run_id)?;
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::message(format!("Request to {url} failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::message(format!("Failed to read response from {url}: {e}")))?;

        if !status.is_success() {
            return Err(error_from_response(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                &body,
            ));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| FetchError::message(format!("Malformed JSON from {url}: {e}")).with_status(status.as_u16()))
    }
}

/// POSTs automation actions for the active run.
pub struct HttpActionHandler {
    client: reqwest::Client,
    base_url: String,
    path: String,
    store: Arc<RunStateStore>,
}

impl HttpActionHandler {
    pub fn new(transport: &TransportSection, store: Arc<RunStateStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: transport.base_url.clone(),
            path: transport.action_path.clone(),
            store,
        }
    }
}

#[async_trait]
impl AutomationHandler for HttpActionHandler {
    async fn execute(&self, action: &AutomationAction) -> anyhow::Result<()> {
        let run_id = self.store.get_snapshot().run_id;
        let url = endpoint_url(&self.base_url, &self.path, Some(&run_id))?;
        let resp = self
            .client
            .post(&url)
            .json(action)
            .send()
            .await
            .with_context(|| format!("Failed to send {action} to {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), status.canonical_reason().unwrap_or(""), &body).into());
        }
        Ok(())
    }

    async fn validate(&self, _action: &AutomationAction) -> bool {
        let snapshot = self.store.get_snapshot();
        snapshot.has_run() && !snapshot.battle_active
    }
}
