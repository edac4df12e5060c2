pub mod drain;
pub mod init;
pub mod pickup;
pub mod queue;
pub mod status;
pub mod submit;
pub mod watch;

use anyhow::Context;
use std::path::Path;
use swiftpick_sync::config::SyncConfig;
use swiftpick_sync::queue::{ActionQueue, RetryPolicy};

use crate::root;

pub fn load_config(root_dir: &Path) -> anyhow::Result<SyncConfig> {
    SyncConfig::load(&root::config_path(root_dir))
        .context("failed to load config — run `swiftpick init` first")
}

pub fn open_queue(root_dir: &Path, config: &SyncConfig) -> anyhow::Result<ActionQueue> {
    let policy = RetryPolicy {
        base: config.backoff_base(),
        cap: config.backoff_cap(),
        max_attempts: config.max_attempts,
    };
    ActionQueue::open(&root::queue_path(root_dir), policy).context("failed to open action queue")
}
