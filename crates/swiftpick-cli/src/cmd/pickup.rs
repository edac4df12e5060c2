use clap::Subcommand;
use std::path::Path;
use swiftpick_sync::types::{EntityRef, Method};

use crate::output::print_json;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum PickupSubcommand {
    /// Queue a pickup request for a student
    Request {
        student_id: i64,
        /// Parent latitude at request time
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Parent longitude at request time
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },

    /// Queue a cancellation for an active pickup
    Cancel { pickup_id: i64 },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root_dir: &Path, subcmd: PickupSubcommand, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root_dir)?;
    let queue = super::open_queue(root_dir, &config)?;

    let (id, label) = match subcmd {
        PickupSubcommand::Request {
            student_id,
            lat,
            lng,
        } => {
            let id = queue.enqueue(
                Method::Post,
                "/parent/pickups",
                serde_json::json!({"student_id": student_id, "lat": lat, "lng": lng}),
                Some(EntityRef::pickup(student_id)),
            )?;
            (id, format!("pickup request for student {student_id}"))
        }
        PickupSubcommand::Cancel { pickup_id } => {
            let id = queue.enqueue(
                Method::Delete,
                format!("/parent/pickups/{pickup_id}"),
                serde_json::Value::Null,
                Some(EntityRef::pickup(pickup_id)),
            )?;
            (id, format!("cancellation for pickup {pickup_id}"))
        }
    };

    if json {
        print_json(&serde_json::json!({"id": id}))?;
    } else {
        println!("Queued {label} as {id}");
    }
    Ok(())
}
