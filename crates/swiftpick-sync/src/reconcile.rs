//! Status reconciliation.
//!
//! `reconcile` is a pure function from (server observation, optimistic
//! overlay, queue state) to the status a screen should display. The
//! precedence contract:
//!
//! - while a queued action for the entity is still undelivered, the overlay
//!   wins — the parent sees "pending" even though the server has never heard
//!   of the pickup;
//! - once the action is `Done`, the next applied poll discards the overlay
//!   and the server is trusted exclusively;
//! - a terminal server status (`dismissed`, `cancelled`) always wins over
//!   any non-terminal overlay — the server owns terminal transitions.
//!
//! `StatusStore` holds the per-entity state in memory. It is rebuilt from a
//! fresh poll on launch; only the action queue survives restart.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::action::{ActionStatus, QueuedAction};
use crate::types::{EntityRef, PickupStatus, TripStatus};

// ---------------------------------------------------------------------------
// StatusValue
// ---------------------------------------------------------------------------

/// A status drawn from whichever state machine the entity kind uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum StatusValue {
    Pickup(PickupStatus),
    Trip(TripStatus),
}

impl StatusValue {
    pub fn is_terminal(self) -> bool {
        match self {
            StatusValue::Pickup(s) => s.is_terminal(),
            StatusValue::Trip(s) => s.is_terminal(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusValue::Pickup(s) => s.as_str(),
            StatusValue::Trip(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Observation / Overlay
// ---------------------------------------------------------------------------

/// Server-observed state from the last successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: Option<StatusValue>,
    /// Raw `data` payload, kept for screens that render more than a status
    /// (bus coordinates, admin stats).
    pub payload: Value,
    /// Server-reported update time when the payload carries one, otherwise
    /// the local poll time.
    pub last_updated: DateTime<Utc>,
}

impl Observation {
    pub fn new(status: Option<StatusValue>, payload: Value) -> Self {
        Self {
            status,
            payload,
            last_updated: Utc::now(),
        }
    }
}

/// A locally applied, unconfirmed status shown before the server confirms.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub status: StatusValue,
    pub created_at: DateTime<Utc>,
    /// The queued action backing this overlay.
    pub action_id: Uuid,
}

// ---------------------------------------------------------------------------
// DisplayState
// ---------------------------------------------------------------------------

/// What a screen renders for an entity. Always available synchronously;
/// failure is data, not a pop-up — the UI decides presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    pub status: Option<StatusValue>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_optimistic: bool,
    /// Set when the backing action exhausted its retries or was rejected.
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl DisplayState {
    pub fn empty() -> Self {
        Self {
            status: None,
            last_updated: None,
            is_optimistic: false,
            failure: None,
            payload: None,
        }
    }
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

/// True while the queue still owes the server this action.
fn action_undelivered(action: Option<&QueuedAction>, max_attempts: u32) -> bool {
    match action {
        Some(a) => match a.status {
            ActionStatus::Pending | ActionStatus::InFlight => true,
            ActionStatus::Failed { .. } => !a.is_dead(max_attempts),
            ActionStatus::Done { .. } => false,
        },
        None => false,
    }
}

fn action_failure(action: Option<&QueuedAction>, max_attempts: u32) -> Option<String> {
    match action {
        Some(a) if a.is_dead(max_attempts) => match &a.status {
            ActionStatus::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Merge the three sources of truth into one display state.
pub fn reconcile(
    server: Option<&Observation>,
    overlay: Option<&Overlay>,
    action: Option<&QueuedAction>,
    max_attempts: u32,
) -> DisplayState {
    let failure = action_failure(action, max_attempts);

    // Terminal server state beats everything.
    if let Some(obs) = server {
        if obs.status.is_some_and(|s| s.is_terminal()) {
            return DisplayState {
                status: obs.status,
                last_updated: Some(obs.last_updated),
                is_optimistic: false,
                failure,
                payload: Some(obs.payload.clone()),
            };
        }
    }

    // Undelivered intent: the overlay wins.
    if let Some(ov) = overlay {
        if action_undelivered(action, max_attempts) {
            return DisplayState {
                status: Some(ov.status),
                last_updated: Some(ov.created_at),
                is_optimistic: true,
                failure,
                payload: server.map(|o| o.payload.clone()),
            };
        }
    }

    match (server, overlay) {
        (Some(obs), _) => DisplayState {
            status: obs.status,
            last_updated: Some(obs.last_updated),
            is_optimistic: false,
            failure,
            payload: Some(obs.payload.clone()),
        },
        // Delivered but not yet observed by a poll: keep showing the
        // optimistic value until fresh truth arrives.
        (None, Some(ov)) => DisplayState {
            status: Some(ov.status),
            last_updated: Some(ov.created_at),
            is_optimistic: true,
            failure,
            payload: None,
        },
        (None, None) => DisplayState {
            failure,
            ..DisplayState::empty()
        },
    }
}

// ---------------------------------------------------------------------------
// StatusStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TrackedEntity {
    server: Option<Observation>,
    overlay: Option<Overlay>,
}

/// In-memory map of tracked entities. All methods are synchronous and never
/// touch I/O, so `get` is safe to call on every render.
#[derive(Default)]
pub struct StatusStore {
    entities: Mutex<HashMap<EntityRef, TrackedEntity>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an optimistic overlay for a just-submitted intent.
    pub fn apply_intent(&self, entity: EntityRef, status: StatusValue, action_id: Uuid) {
        let mut entities = self.entities.lock().expect("status store lock poisoned");
        let tracked = entities.entry(entity).or_default();
        tracked.overlay = Some(Overlay {
            status,
            created_at: Utc::now(),
            action_id,
        });
    }

    /// Merge a successful poll result.
    ///
    /// Clears the overlay when the observation is newer than the overlay's
    /// creation, or when the backing action is already `Done` (this poll is
    /// the "one subsequent poll" of the invariant), or when the backing
    /// action no longer exists in the queue.
    pub fn apply_poll(
        &self,
        entity: EntityRef,
        observation: Observation,
        backing: Option<&QueuedAction>,
        max_attempts: u32,
    ) {
        let mut entities = self.entities.lock().expect("status store lock poisoned");
        let tracked = entities.entry(entity).or_default();

        if let Some(overlay) = &tracked.overlay {
            let confirmed = observation.last_updated > overlay.created_at;
            let delivered = !action_undelivered(backing, max_attempts);
            if confirmed || delivered {
                tracked.overlay = None;
            }
        }
        tracked.server = Some(observation);
    }

    /// Current display state, reconciled against the backing queue action.
    pub fn display_state(
        &self,
        entity: EntityRef,
        backing: Option<&QueuedAction>,
        max_attempts: u32,
    ) -> DisplayState {
        let entities = self.entities.lock().expect("status store lock poisoned");
        match entities.get(&entity) {
            Some(tracked) => reconcile(
                tracked.server.as_ref(),
                tracked.overlay.as_ref(),
                backing,
                max_attempts,
            ),
            None => reconcile(None, None, backing, max_attempts),
        }
    }

    /// Drop all state for an entity (screen closed, entity finished).
    pub fn forget(&self, entity: EntityRef) {
        self.entities
            .lock()
            .expect("status store lock poisoned")
            .remove(&entity);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
