use anyhow::Context;
use std::path::Path;
use swiftpick_sync::config::SyncConfig;

use crate::root;

/// Scaffold `.swiftpick/` with a default config. Idempotent: an existing
/// config is left untouched.
pub fn run(root_dir: &Path, api_base: Option<&str>) -> anyhow::Result<()> {
    let data = root::data_dir(root_dir);
    std::fs::create_dir_all(&data)
        .with_context(|| format!("failed to create {}", data.display()))?;

    let config_path = root::config_path(root_dir);
    if config_path.exists() {
        println!("Already initialized at {}", data.display());
        return Ok(());
    }

    let config = SyncConfig::new(api_base.unwrap_or("http://localhost:3000"));
    config
        .save(&config_path)
        .context("failed to write config")?;

    println!("Initialized SwiftPick sync store at {}", data.display());
    Ok(())
}
