use std::path::Path;
use swiftpick_sync::action::ActionStatus;

use crate::output::{print_json, print_kv};

/// Summarize the durable queue: counts per lifecycle state.
pub fn run(root_dir: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root_dir)?;
    let queue = super::open_queue(root_dir, &config)?;

    let mut pending = 0usize;
    let mut in_flight = 0usize;
    let mut failed = 0usize;
    let mut dead = 0usize;
    let mut done = 0usize;
    for action in queue.list_all()? {
        match action.status {
            ActionStatus::Pending => pending += 1,
            ActionStatus::InFlight => in_flight += 1,
            ActionStatus::Failed { .. } if action.is_dead(config.max_attempts) => dead += 1,
            ActionStatus::Failed { .. } => failed += 1,
            ActionStatus::Done { .. } => done += 1,
        }
    }

    if json {
        print_json(&serde_json::json!({
            "api_base": config.api_base,
            "pending": pending,
            "in_flight": in_flight,
            "failed": failed,
            "dead": dead,
            "done": done,
        }))?;
    } else {
        print_kv(&[
            ("API base", config.api_base.clone()),
            ("Pending", pending.to_string()),
            ("In flight", in_flight.to_string()),
            ("Failed", failed.to_string()),
            ("Dead", dead.to_string()),
            ("Done", done.to_string()),
        ]);
    }
    Ok(())
}
