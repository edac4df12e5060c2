//! Connectivity monitor.
//!
//! The platform layer feeds raw online/offline readings into `report`; the
//! monitor publishes a debounced view over a `tokio::sync::watch` channel. A
//! reading must hold for the configured stable duration before it is
//! published, so a flapping link cannot trigger a drain storm. The drainer
//! subscribes and treats every published offline→online edge as a drain
//! trigger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// ConnectivityState
// ---------------------------------------------------------------------------

/// Snapshot shown to the UI layer: the offline banner renders
/// `queued_actions` while `online` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub online: bool,
    pub queued_actions: usize,
}

// ---------------------------------------------------------------------------
// ConnectivityMonitor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    tx: watch::Sender<bool>,
    debounce: Duration,
    /// Candidate state waiting out its stable period, if any.
    pending: Mutex<Option<bool>>,
    /// Bumped on every report; a sleeping commit task only fires if its
    /// generation is still current, so a flap back cancels it.
    generation: AtomicU64,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, debounce: Duration) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                tx,
                debounce,
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The current debounced connectivity.
    pub fn is_online(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// Subscribe to debounced transitions. The receiver's value is the
    /// current state; `changed()` resolves on every published flip.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    /// Feed one raw reading from the platform (reachability callback or
    /// periodic probe). Non-blocking; must be called from within a tokio
    /// runtime because the stable-period timer is a spawned task.
    pub fn report(&self, online: bool) {
        let inner = &self.inner;
        let mut pending = inner.pending.lock().expect("connectivity lock poisoned");

        if online == *inner.tx.borrow() {
            // Reading matches the published state: cancel any pending flip.
            if pending.take().is_some() {
                inner.generation.fetch_add(1, Ordering::SeqCst);
            }
            return;
        }

        if *pending == Some(online) {
            // Same candidate already waiting out its stable period.
            return;
        }

        *pending = Some(online);
        let gen = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if inner.generation.load(Ordering::SeqCst) != gen {
                return;
            }
            let mut pending = inner.pending.lock().expect("connectivity lock poisoned");
            if *pending == Some(online) {
                *pending = None;
                if inner.tx.send_replace(online) != online {
                    tracing::debug!(online, "connectivity transition published");
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
