//! Queued action data model.
//!
//! A `QueuedAction` is one mutating request the device has promised to
//! deliver: an HTTP method and path, an opaque JSON payload, and the entity
//! it targets so the reconciler can match queue state to an overlay. The
//! queue owns every status transition.

use chrono::{DateTime, Duration as CDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::types::{EntityRef, Method};

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a queued action.
///
/// Transitions: `Pending → InFlight → Done | Failed`, and
/// `Failed → InFlight` once the retry time arrives. An action whose attempt
/// count reaches the cap stays `Failed` permanently (a "dead" action) and is
/// surfaced to the caller rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting to be sent.
    Pending,
    /// Request currently on the wire (or the process crashed mid-send).
    InFlight,
    /// Last attempt failed; eligible again at `next_retry_at`.
    Failed {
        reason: String,
        next_retry_at: DateTime<Utc>,
    },
    /// Delivered and acknowledged with a 2xx.
    Done { completed_at: DateTime<Utc> },
}

// ---------------------------------------------------------------------------
// QueuedAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    /// Insertion sequence assigned by the queue; drain order follows it.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub method: Method,
    /// Request path relative to the API base, e.g. `/parent/pickups`.
    pub path: String,
    /// Opaque JSON body; the queue never inspects it.
    pub payload: serde_json::Value,
    /// Entity this action mutates, when known. Used by the reconciler to
    /// decide whether an optimistic overlay is still backed by the queue.
    pub entity: Option<EntityRef>,
    pub attempts: u32,
    pub status: ActionStatus,
}

impl QueuedAction {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        payload: serde_json::Value,
        entity: Option<EntityRef>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            created_at: Utc::now(),
            method,
            path: path.into(),
            payload,
            entity,
            attempts: 0,
            status: ActionStatus::Pending,
        }
    }

    /// True once the attempt count has hit `max_attempts` and the action
    /// will never be retried.
    pub fn is_dead(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts && matches!(self.status, ActionStatus::Failed { .. })
    }

    /// True if a drain pass may send this action at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        match &self.status {
            ActionStatus::Pending => true,
            ActionStatus::Failed { next_retry_at, .. } => {
                self.attempts < max_attempts && *next_retry_at <= now
            }
            ActionStatus::InFlight | ActionStatus::Done { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Retry delay for the given attempt count: exponential with full jitter.
///
/// The deterministic ceiling is `base * 2^(attempt-1)` clamped to `cap`; the
/// actual delay is drawn uniformly from `[0, ceiling]` so simultaneous
/// retries from many devices spread out.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let ceiling = backoff_ceiling(attempt, base, cap);
    let ms = ceiling.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    use rand::Rng;
    Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
}

/// The deterministic (un-jittered) ceiling for the given attempt count.
pub fn backoff_ceiling(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let raw = base.saturating_mul(1u32 << exp);
    raw.min(cap)
}

/// Next retry timestamp for an action that just failed its `attempt`-th try.
pub fn next_retry_at(
    now: DateTime<Utc>,
    attempt: u32,
    base: Duration,
    cap: Duration,
) -> DateTime<Utc> {
    let delay = backoff_delay(attempt, base, cap);
    now + CDuration::milliseconds(delay.as_millis() as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
