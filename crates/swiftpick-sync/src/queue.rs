//! Durable action queue backed by redb.
//!
//! # Table design
//!
//! A single `ACTIONS` table is keyed by an 8-byte big-endian insertion
//! sequence number. The counter is assigned at `enqueue` and persisted in
//! the record, so byte ordering equals FIFO ordering even for actions
//! enqueued within the same timestamp tick (a cancel submitted right after
//! its create must never drain first). On open the counter resumes from the
//! last stored key. A forward scan visits actions oldest first, so
//! `peek_next` needs no sorting in application code.
//!
//! The queue enforces the single-flight discipline: `peek_next` returns
//! `None` whenever any action is `InFlight`, and a `Failed` action waiting
//! for its retry time blocks younger `Pending` actions so request order is
//! preserved across retries. Dead actions (attempt cap reached) are skipped
//! by the scan but retained until `purge_dead` so failures surface as data.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::action::{next_retry_at, ActionStatus, QueuedAction};
use crate::error::{Result, SyncError};
use crate::types::{EntityRef, Method};

/// Key: 8-byte big-endian insertion sequence number
/// Value: JSON-encoded QueuedAction
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");

fn action_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Backoff and attempt-cap parameters applied by `mark_failed`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// ActionQueue
// ---------------------------------------------------------------------------

/// Persistent FIFO queue of `QueuedAction` records.
pub struct ActionQueue {
    db: Database,
    policy: RetryPolicy,
    next_seq: AtomicU64,
}

impl ActionQueue {
    /// Open or create the queue database at `path`.
    ///
    /// Any action left `InFlight` by a previous process (crash mid-send) is
    /// reverted to `Pending` for redelivery — at-least-once, never lost.
    pub fn open(path: &Path, policy: RetryPolicy) -> Result<Self> {
        let db = Database::create(path).map_err(|e| SyncError::Store(e.to_string()))?;
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(|e| SyncError::Store(e.to_string()))?;
        wt.open_table(ACTIONS)
            .map_err(|e| SyncError::Store(e.to_string()))?;
        wt.commit().map_err(|e| SyncError::Store(e.to_string()))?;

        // Resume the insertion counter from the highest stored key.
        let next_seq = {
            let rt = db.begin_read().map_err(|e| SyncError::Store(e.to_string()))?;
            let table = rt
                .open_table(ACTIONS)
                .map_err(|e| SyncError::Store(e.to_string()))?;
            let next = match table.last().map_err(|e| SyncError::Store(e.to_string()))? {
                Some((k, _)) => {
                    let bytes: [u8; 8] = k
                        .value()
                        .try_into()
                        .map_err(|_| SyncError::Store("corrupt queue key".to_string()))?;
                    u64::from_be_bytes(bytes) + 1
                }
                None => 0,
            };
            next
        };

        let queue = Self {
            db,
            policy,
            next_seq: AtomicU64::new(next_seq),
        };
        let recovered = queue.recover_in_flight()?;
        if recovered > 0 {
            tracing::warn!(recovered, "reverted in-flight actions to pending after restart");
        }
        Ok(queue)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append a new `Pending` action. The record is committed to disk before
    /// this returns; a store failure propagates, since silently losing a
    /// queued action would break the durability guarantee.
    pub fn enqueue(
        &self,
        method: Method,
        path: impl Into<String>,
        payload: serde_json::Value,
        entity: Option<EntityRef>,
    ) -> Result<Uuid> {
        let mut action = QueuedAction::new(method, path, payload, entity);
        action.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = action.id;
        self.insert(&action)?;
        Ok(id)
    }

    fn insert(&self, action: &QueuedAction) -> Result<()> {
        let key = action_key(action.seq);
        let value = serde_json::to_vec(action)?;
        let wt = self
            .db
            .begin_write()
            .map_err(|e| SyncError::Store(e.to_string()))?;
        {
            let mut table = wt
                .open_table(ACTIONS)
                .map_err(|e| SyncError::Store(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| SyncError::Store(e.to_string()))?;
        }
        wt.commit().map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }

    /// The next action a drain pass may send at `now`, FIFO by insertion.
    ///
    /// Returns `None` when the queue is empty of live work, when any action
    /// is already `InFlight` (single-flight), or when the head of the queue
    /// is a `Failed` action still waiting for its retry time (order is
    /// preserved by blocking behind it). Dead and `Done` entries are skipped.
    pub fn peek_next(&self, now: DateTime<Utc>) -> Result<Option<QueuedAction>> {
        let max = self.policy.max_attempts;
        for action in self.scan()? {
            match &action.status {
                ActionStatus::InFlight => return Ok(None),
                ActionStatus::Done { .. } => continue,
                _ if action.is_dead(max) => continue,
                _ => {
                    if action.is_eligible(now, max) {
                        return Ok(Some(action));
                    }
                    // Head of the queue is backing off: block younger work.
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Transition `Pending`/`Failed` → `InFlight`. Rejects anything else so
    /// a duplicate drain trigger cannot double-send.
    pub fn mark_in_flight(&self, id: Uuid) -> Result<()> {
        self.update(id, |action| match action.status {
            ActionStatus::Pending | ActionStatus::Failed { .. } => {
                action.status = ActionStatus::InFlight;
                Ok(())
            }
            _ => Err(invalid_transition(&action.status, "in_flight")),
        })
    }

    /// Transition `InFlight` → `Done`.
    pub fn mark_done(&self, id: Uuid) -> Result<()> {
        self.update(id, |action| match action.status {
            ActionStatus::InFlight => {
                action.status = ActionStatus::Done {
                    completed_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(invalid_transition(&action.status, "done")),
        })
    }

    /// Transition `InFlight` → `Failed`, incrementing the attempt count and
    /// scheduling the next retry with exponential backoff and full jitter.
    pub fn mark_failed(&self, id: Uuid, reason: impl Into<String>) -> Result<()> {
        let policy = self.policy;
        let reason = reason.into();
        self.update(id, move |action| match action.status {
            ActionStatus::InFlight => {
                action.attempts += 1;
                action.status = ActionStatus::Failed {
                    reason: reason.clone(),
                    next_retry_at: next_retry_at(
                        Utc::now(),
                        action.attempts,
                        policy.base,
                        policy.cap,
                    ),
                };
                Ok(())
            }
            _ => Err(invalid_transition(&action.status, "failed")),
        })
    }

    /// Fail an action with no further retries: the attempt count is pinned
    /// at the cap so the action is dead immediately. Used for 4xx responses
    /// and undecodable payloads.
    pub fn fail_permanently(&self, id: Uuid, reason: impl Into<String>) -> Result<()> {
        let max = self.policy.max_attempts;
        let reason = reason.into();
        self.update(id, move |action| match action.status {
            // A delivered action is settled; it must never be rewritten.
            ActionStatus::Done { .. } => Err(invalid_transition(&action.status, "failed")),
            _ => {
                action.attempts = action.attempts.max(max);
                action.status = ActionStatus::Failed {
                    reason: reason.clone(),
                    next_retry_at: Utc::now(),
                };
                Ok(())
            }
        })
    }

    /// Garbage-collect `Done` entries older than `retention`. Returns the
    /// number removed.
    pub fn remove_done(&self, retention: Duration, now: DateTime<Utc>) -> Result<u32> {
        let cutoff = now
            - chrono::Duration::from_std(retention)
                .map_err(|e| SyncError::Store(e.to_string()))?;
        let mut removed = 0u32;
        for action in self.scan()? {
            if let ActionStatus::Done { completed_at } = action.status {
                if completed_at < cutoff {
                    self.remove(&action)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Actions that exhausted their retries. Retained until `purge_dead` so
    /// the UI can report them; never silently dropped.
    pub fn dead_actions(&self) -> Result<Vec<QueuedAction>> {
        let max = self.policy.max_attempts;
        Ok(self.scan()?.into_iter().filter(|a| a.is_dead(max)).collect())
    }

    /// Remove all dead actions after the caller has surfaced them.
    pub fn purge_dead(&self) -> Result<u32> {
        let mut purged = 0u32;
        for action in self.dead_actions()? {
            self.remove(&action)?;
            purged += 1;
        }
        Ok(purged)
    }

    /// Number of actions still awaiting delivery (`Pending`, `InFlight`, or
    /// retryable `Failed`). This is the counter shown in the offline banner.
    pub fn pending_len(&self) -> Result<usize> {
        let max = self.policy.max_attempts;
        Ok(self
            .scan()?
            .into_iter()
            .filter(|a| match a.status {
                ActionStatus::Pending | ActionStatus::InFlight => true,
                ActionStatus::Failed { .. } => !a.is_dead(max),
                ActionStatus::Done { .. } => false,
            })
            .count())
    }

    /// The most recent queue state of an action targeting `entity`, if any.
    /// The reconciler uses this to decide whether an optimistic overlay is
    /// still backed by undelivered work.
    pub fn latest_for_entity(&self, entity: EntityRef) -> Result<Option<QueuedAction>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|a| a.entity == Some(entity))
            .last())
    }

    pub fn get(&self, id: Uuid) -> Result<QueuedAction> {
        self.scan()?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or(SyncError::ActionNotFound(id))
    }

    /// All actions in FIFO order.
    pub fn list_all(&self) -> Result<Vec<QueuedAction>> {
        self.scan()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn recover_in_flight(&self) -> Result<u32> {
        let mut count = 0u32;
        for action in self.scan()? {
            if matches!(action.status, ActionStatus::InFlight) {
                self.update(action.id, |a| {
                    a.status = ActionStatus::Pending;
                    Ok(())
                })?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Forward scan in key (= FIFO) order.
    fn scan(&self) -> Result<Vec<QueuedAction>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| SyncError::Store(e.to_string()))?;
        let table = rt
            .open_table(ACTIONS)
            .map_err(|e| SyncError::Store(e.to_string()))?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(|e| SyncError::Store(e.to_string()))? {
            let (_, v) = entry.map_err(|e| SyncError::Store(e.to_string()))?;
            let action: QueuedAction = serde_json::from_slice(v.value())?;
            result.push(action);
        }
        Ok(result)
    }

    fn update<F>(&self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut QueuedAction) -> Result<()>,
    {
        let mut action = self.get(id)?;
        let key = action_key(action.seq);
        mutate(&mut action)?;
        let value = serde_json::to_vec(&action)?;

        let wt = self
            .db
            .begin_write()
            .map_err(|e| SyncError::Store(e.to_string()))?;
        {
            let mut table = wt
                .open_table(ACTIONS)
                .map_err(|e| SyncError::Store(e.to_string()))?;
            // Same key, new value: remove then reinsert
            table
                .remove(key.as_slice())
                .map_err(|e| SyncError::Store(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| SyncError::Store(e.to_string()))?;
        }
        wt.commit().map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, action: &QueuedAction) -> Result<()> {
        let key = action_key(action.seq);
        let wt = self
            .db
            .begin_write()
            .map_err(|e| SyncError::Store(e.to_string()))?;
        {
            let mut table = wt
                .open_table(ACTIONS)
                .map_err(|e| SyncError::Store(e.to_string()))?;
            table
                .remove(key.as_slice())
                .map_err(|e| SyncError::Store(e.to_string()))?;
        }
        wt.commit().map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }
}

fn invalid_transition(from: &ActionStatus, to: &str) -> SyncError {
    SyncError::InvalidTransition {
        from: format!("{from:?}"),
        to: to.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
