use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use swiftpick_sync::client::HttpClient;
use swiftpick_sync::connectivity::ConnectivityMonitor;
use swiftpick_sync::drainer::Drainer;

use crate::output::print_json;

/// Run one drain pass against the configured API and report the outcome.
pub fn run(root_dir: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root_dir)?;
    let queue = Arc::new(super::open_queue(root_dir, &config)?);
    let client = Arc::new(
        HttpClient::new(&config.api_base, config.request_timeout())
            .context("failed to build API client")?,
    );
    let connectivity = ConnectivityMonitor::new(true, config.connectivity_debounce());

    let rt = tokio::runtime::Runtime::new()?;
    let drainer = Drainer::new(
        Arc::clone(&queue),
        client,
        connectivity,
        config.drain_interval(),
    );
    let delivered = rt.block_on(drainer.drain_pass())?;

    let remaining = queue.pending_len()?;
    let dead = queue.dead_actions()?.len();
    if json {
        print_json(&serde_json::json!({
            "delivered": delivered,
            "remaining": remaining,
            "dead": dead,
        }))?;
    } else {
        println!("Delivered {delivered} action(s); {remaining} remaining, {dead} dead");
    }
    Ok(())
}
