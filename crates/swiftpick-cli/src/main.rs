mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{pickup::PickupSubcommand, queue::QueueSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "swiftpick",
    about = "SwiftPick offline sync queue — inspect, replay, and watch queued actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data root (default: auto-detect from .swiftpick/)
    #[arg(long, global = true, env = "SWIFTPICK_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the sync store in the current directory
    Init {
        /// API base URL, e.g. https://api.swiftpick.example
        #[arg(long)]
        api_base: Option<String>,
    },

    /// Summarize the durable queue
    Status,

    /// Inspect and maintain the durable queue
    Queue {
        #[command(subcommand)]
        subcommand: QueueSubcommand,
    },

    /// Queue pickup requests and cancellations
    Pickup {
        #[command(subcommand)]
        subcommand: PickupSubcommand,
    },

    /// Queue an arbitrary mutating request
    Submit {
        /// HTTP method: POST, PUT, PATCH, or DELETE
        method: String,
        /// Request path relative to the API base, e.g. /parent/pickups
        path: String,
        /// JSON request body
        #[arg(long)]
        payload: Option<String>,
        /// Target entity as kind:id, e.g. pickup:7
        #[arg(long)]
        entity: Option<String>,
    },

    /// Run one drain pass against the configured API
    Drain,

    /// Poll an entity and print its reconciled state each interval
    Watch {
        /// Entity as kind:id, e.g. pickup:7 or bus_location:3
        entity: String,
        /// Stop after this many polls (0 = run until interrupted)
        #[arg(long, default_value = "0")]
        ticks: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch { .. } | Commands::Drain => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root_path = cli.root.as_deref();
    let root = root::resolve_root(root_path);

    let result = match cli.command {
        Commands::Init { api_base } => cmd::init::run(&root, api_base.as_deref()),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Queue { subcommand } => cmd::queue::run(&root, subcommand, cli.json),
        Commands::Pickup { subcommand } => cmd::pickup::run(&root, subcommand, cli.json),
        Commands::Submit {
            method,
            path,
            payload,
            entity,
        } => cmd::submit::run(
            &root,
            &method,
            &path,
            payload.as_deref(),
            entity.as_deref(),
            cli.json,
        ),
        Commands::Drain => cmd::drain::run(&root, cli.json),
        Commands::Watch { entity, ticks } => cmd::watch::run(&root, &entity, ticks, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
