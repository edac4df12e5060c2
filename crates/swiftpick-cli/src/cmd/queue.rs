use chrono::Utc;
use clap::Subcommand;
use std::path::Path;
use swiftpick_sync::action::{ActionStatus, QueuedAction};

use crate::output::{print_json, print_table};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List every queued action, oldest first
    List,

    /// List actions that exhausted their retries
    Dead,

    /// Drop delivered actions past the retention window
    Gc {
        /// Also drop dead actions (after they have been reported)
        #[arg(long)]
        purge_dead: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root_dir: &Path, subcmd: QueueSubcommand, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root_dir)?;
    let queue = super::open_queue(root_dir, &config)?;

    match subcmd {
        QueueSubcommand::List => {
            let actions = queue.list_all()?;
            print_actions(&actions, json)
        }
        QueueSubcommand::Dead => {
            let actions = queue.dead_actions()?;
            print_actions(&actions, json)
        }
        QueueSubcommand::Gc { purge_dead } => {
            let mut removed = queue.remove_done(config.done_retention(), Utc::now())?;
            if purge_dead {
                removed += queue.purge_dead()?;
            }
            if json {
                print_json(&serde_json::json!({"removed": removed}))?;
            } else {
                println!("Removed {removed} action(s)");
            }
            Ok(())
        }
    }
}

fn print_actions(actions: &[QueuedAction], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                a.method.to_string(),
                a.path.clone(),
                a.attempts.to_string(),
                status_summary(&a.status),
            ]
        })
        .collect();
    print_table(
        &["ID", "CREATED", "METHOD", "PATH", "ATTEMPTS", "STATUS"],
        rows,
    );
    Ok(())
}

fn status_summary(status: &ActionStatus) -> String {
    match status {
        ActionStatus::Pending => "pending".to_string(),
        ActionStatus::InFlight => "in_flight".to_string(),
        ActionStatus::Failed {
            reason,
            next_retry_at,
        } => format!(
            "failed ({reason}), retry {}",
            next_retry_at.format("%H:%M:%S")
        ),
        ActionStatus::Done { completed_at } => {
            format!("done {}", completed_at.format("%H:%M:%S"))
        }
    }
}
