use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use swiftpick_sync::client::HttpClient;
use swiftpick_sync::config::SyncConfig;
use swiftpick_sync::engine::SyncEngine;

use crate::output::print_json;
use crate::root;

/// Poll an entity and print its reconciled display state once per interval.
/// Runs forever unless `--ticks` bounds it.
pub fn run(root_dir: &Path, entity: &str, ticks: u64, json: bool) -> anyhow::Result<()> {
    let entity = super::submit::parse_entity(entity)?;
    let config = super::load_config(root_dir)?;
    let interval = config.poll_interval(entity.kind);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let engine = start_engine(root_dir, config).await?;
        let poller = engine.start_polling(entity);

        let mut remaining = ticks;
        loop {
            tokio::time::sleep(interval).await;
            let state = engine.display_state(entity)?;
            if json {
                print_json(&state)?;
            } else {
                let status = state
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let marker = if state.is_optimistic { " (optimistic)" } else { "" };
                match &state.failure {
                    Some(reason) => println!("{entity}: {status}{marker} — failed: {reason}"),
                    None => println!("{entity}: {status}{marker}"),
                }
            }
            if ticks > 0 {
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }

        poller.stop();
        engine.shutdown();
        Ok(())
    })
}

async fn start_engine(
    root_dir: &Path,
    config: SyncConfig,
) -> anyhow::Result<SyncEngine<HttpClient>> {
    let client = Arc::new(
        HttpClient::new(&config.api_base, config.request_timeout())
            .context("failed to build API client")?,
    );
    SyncEngine::start(config, client, &root::queue_path(root_dir)).map_err(Into::into)
}
