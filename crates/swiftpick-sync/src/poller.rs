//! Live status poller.
//!
//! One poller per tracked entity, re-fetching authoritative state on a fixed
//! interval and handing each successful payload to an apply callback (the
//! engine merges it through the reconciler). Poll failures are logged and
//! ignored — the UI keeps last-known-good state plus any overlay.
//!
//! The fetch runs inline in the tick loop with
//! `MissedTickBehavior::Skip`, so a slow response makes the next tick late
//! or skipped, never queued behind it. Cancellation is race-free: the
//! handle's flag is checked after the fetch resolves, so a response that
//! arrives mid-`stop` is discarded unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::client::ApiClient;

// ---------------------------------------------------------------------------
// spawn_poller
// ---------------------------------------------------------------------------

/// Start polling `path` every `interval`, feeding successful payloads to
/// `apply`. The returned handle owns the task; dropping it cancels.
pub fn spawn_poller<C, F>(
    client: Arc<C>,
    path: String,
    interval: Duration,
    apply: F,
) -> PollerHandle
where
    C: ApiClient,
    F: Fn(Value) + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if flag.load(Ordering::SeqCst) {
                return;
            }
            match client.get(&path).await {
                Ok(value) => {
                    // The screen may have closed while the request was on
                    // the wire; a cancelled poller must never apply.
                    if flag.load(Ordering::SeqCst) {
                        return;
                    }
                    apply(value);
                }
                Err(e) => {
                    tracing::debug!(%path, error = %e, "poll failed, retrying on next tick");
                }
            }
        }
    });

    PollerHandle { cancelled, task }
}

// ---------------------------------------------------------------------------
// PollerHandle
// ---------------------------------------------------------------------------

/// Scoped ownership of a polling subscription. Stopping (or dropping) the
/// handle guarantees no further tick fires and no in-flight result is
/// applied.
pub struct PollerHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
