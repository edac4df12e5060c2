pub mod action;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod drainer;
pub mod engine;
pub mod error;
pub mod io;
pub mod poller;
pub mod queue;
pub mod reconcile;
pub mod types;

pub use error::{Result, SyncError};
