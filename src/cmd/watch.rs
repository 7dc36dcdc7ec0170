//! Live session against a backend: `runsync watch`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use runsync::config::SyncConfig;
use runsync::run_state::{FileRunIdStorage, RunStateStore};
use runsync::session::{RunSession, SessionDeps, SessionSettings};
use runsync::transport::{HttpActionHandler, HttpFetcher};

pub async fn cmd_watch(
    project_dir: PathBuf,
    base_url: Option<String>,
    auto: bool,
    reduced_motion: bool,
) -> Result<()> {
    let config = SyncConfig::with_cli_args(project_dir, base_url, auto, reduced_motion)?;
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    let transport = &config.toml.transport;
    let [ui, battle, map] = HttpFetcher::endpoints(transport);
    let storage = Arc::new(FileRunIdStorage::new(config.run_id_path()));
    let store = Arc::new(RunStateStore::new(storage));

    let mut deps = SessionDeps::new(ui, battle, map).with_store(Arc::clone(&store));
    if config.toml.automation.enabled {
        deps = deps.with_automation(Arc::new(HttpActionHandler::new(transport, store)));
    }

    let session = RunSession::new(deps, SessionSettings::from(&config));
    let mut events = session.subscribe_events();
    session.start()?;

    tracing::info!(
        base_url = %transport.base_url,
        automation = config.toml.automation.enabled,
        "watching backend; press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event consumer lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.destroy();
    Ok(())
}
