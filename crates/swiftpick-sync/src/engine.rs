//! Sync engine facade.
//!
//! `SyncEngine` wires the durable queue, connectivity monitor, drainer,
//! pollers, and status store behind the contract the screens consume:
//! submit an intent, read a display state synchronously, scope a polling
//! subscription to the screen's visible lifetime.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::action::QueuedAction;
use crate::client::ApiClient;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::drainer::{DrainTrigger, Drainer, DrainerHandle};
use crate::error::{Result, SyncError};
use crate::poller::{spawn_poller, PollerHandle};
use crate::queue::{ActionQueue, RetryPolicy};
use crate::reconcile::{DisplayState, Observation, StatusStore, StatusValue};
use crate::types::{EntityKind, EntityRef, Method, PickupStatus, TripStatus};

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

pub struct SyncEngine<C: ApiClient> {
    config: SyncConfig,
    queue: Arc<ActionQueue>,
    client: Arc<C>,
    connectivity: ConnectivityMonitor,
    store: Arc<StatusStore>,
    drain_trigger: DrainTrigger,
    drainer: Option<DrainerHandle>,
}

impl<C: ApiClient> SyncEngine<C> {
    /// Open the queue at `queue_path` and start the drain loop. Must be
    /// called from within a tokio runtime.
    pub fn start(config: SyncConfig, client: Arc<C>, queue_path: &Path) -> Result<Self> {
        let policy = RetryPolicy {
            base: config.backoff_base(),
            cap: config.backoff_cap(),
            max_attempts: config.max_attempts,
        };
        if let Some(parent) = queue_path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let queue = Arc::new(ActionQueue::open(queue_path, policy)?);
        // Assume online until the platform reports otherwise; the first
        // failed send flips to backoff either way.
        let connectivity = ConnectivityMonitor::new(true, config.connectivity_debounce());

        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            connectivity.clone(),
            config.drain_interval(),
        );
        let handle = drainer.spawn();
        let drain_trigger = handle.trigger();

        Ok(Self {
            config,
            queue,
            client,
            connectivity,
            store: Arc::new(StatusStore::new()),
            drain_trigger,
            drainer: Some(handle),
        })
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    /// Submit a mutating intent.
    ///
    /// The action is persisted to the queue before this returns (durable
    /// across restarts), the optimistic overlay is applied, and the drainer
    /// is nudged — when the device is online and nothing else is queued this
    /// amounts to an immediate send.
    pub fn submit_action(
        &self,
        method: Method,
        path: impl Into<String>,
        payload: Value,
        entity: Option<EntityRef>,
        optimistic: Option<StatusValue>,
    ) -> Result<Uuid> {
        let id = self.queue.enqueue(method, path, payload, entity)?;
        if let (Some(entity), Some(status)) = (entity, optimistic) {
            self.store.apply_intent(entity, status, id);
        }
        self.drain_trigger.fire();
        Ok(id)
    }

    /// Parent taps "request pickup": POST with an optimistic `pending`.
    pub fn request_pickup(&self, student_id: i64, lat: f64, lng: f64) -> Result<Uuid> {
        self.submit_action(
            Method::Post,
            "/parent/pickups",
            serde_json::json!({"student_id": student_id, "lat": lat, "lng": lng}),
            Some(EntityRef::pickup(student_id)),
            Some(StatusValue::Pickup(PickupStatus::Pending)),
        )
    }

    /// Cancel an active pickup. Accepted only while the reconciled status is
    /// `pending` or `teacher_notified`; terminal pickups reject locally.
    pub fn cancel_pickup(&self, student_id: i64) -> Result<Uuid> {
        let entity = EntityRef::pickup(student_id);
        let current = self.display_state(entity)?;
        match current.status {
            Some(StatusValue::Pickup(s)) if s.can_cancel() => {}
            Some(StatusValue::Pickup(s)) => {
                return Err(SyncError::InvalidTransition {
                    from: s.to_string(),
                    to: PickupStatus::Cancelled.to_string(),
                })
            }
            _ => return Err(SyncError::EntityNotTracked(entity.to_string())),
        }
        self.submit_action(
            Method::Delete,
            format!("/parent/pickups/{student_id}"),
            Value::Null,
            Some(entity),
            Some(StatusValue::Pickup(PickupStatus::Cancelled)),
        )
    }

    // -----------------------------------------------------------------------
    // Display state
    // -----------------------------------------------------------------------

    /// Last-known display state for an entity. Synchronous; reads the local
    /// store and queue only, never the network.
    pub fn display_state(&self, entity: EntityRef) -> Result<DisplayState> {
        let backing = self.queue.latest_for_entity(entity)?;
        Ok(self
            .store
            .display_state(entity, backing.as_ref(), self.config.max_attempts))
    }

    /// Online flag plus the queued-action counter for the offline banner.
    pub fn connectivity_state(&self) -> Result<ConnectivityState> {
        Ok(ConnectivityState {
            online: self.connectivity.is_online(),
            queued_actions: self.queue.pending_len()?,
        })
    }

    /// Feed a raw platform connectivity reading.
    pub fn report_connectivity(&self, online: bool) {
        self.connectivity.report(online);
    }

    // -----------------------------------------------------------------------
    // Polling lifecycle
    // -----------------------------------------------------------------------

    /// Start polling an entity at its configured interval. The handle is
    /// owned by the screen; dropping it on unfocus guarantees no further
    /// poll result is applied.
    pub fn start_polling(&self, entity: EntityRef) -> PollerHandle {
        self.start_polling_every(entity, self.config.poll_interval(entity.kind))
    }

    pub fn start_polling_every(
        &self,
        entity: EntityRef,
        interval: std::time::Duration,
    ) -> PollerHandle {
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let max_attempts = self.config.max_attempts;
        spawn_poller(
            Arc::clone(&self.client),
            poll_path(entity),
            interval,
            move |value| {
                let observation = observation_from(entity.kind, value);
                let backing = match queue.latest_for_entity(entity) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = %e, "queue read failed while applying poll");
                        None
                    }
                };
                store.apply_poll(entity, observation, backing.as_ref(), max_attempts);
            },
        )
    }

    // -----------------------------------------------------------------------
    // Queue maintenance
    // -----------------------------------------------------------------------

    /// Actions that exhausted their retries, for user-visible reporting.
    pub fn dead_actions(&self) -> Result<Vec<QueuedAction>> {
        self.queue.dead_actions()
    }

    /// GC delivered actions older than the retention window. Dead actions
    /// stay until `queue().purge_dead()` so their failure has been shown.
    pub fn gc(&self) -> Result<u32> {
        self.queue.remove_done(self.config.done_retention(), Utc::now())
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stop the drain loop. Pollers are stopped by their own handles.
    pub fn shutdown(mut self) {
        if let Some(handle) = self.drainer.take() {
            handle.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Poll routing
// ---------------------------------------------------------------------------

fn poll_path(entity: EntityRef) -> String {
    match entity.kind {
        EntityKind::Pickup => format!("/parent/pickups/{}", entity.id),
        EntityKind::Trip => format!("/driver/trips/{}", entity.id),
        EntityKind::BusLocation => format!("/bus/tracking/{}", entity.id),
        EntityKind::AdminStats => "/admin/stats".to_string(),
    }
}

/// Build an `Observation` from a poll payload: parse the status field for
/// kinds that carry one, and prefer the server's `updated_at` timestamp.
fn observation_from(kind: EntityKind, value: Value) -> Observation {
    let status = match kind {
        EntityKind::Pickup => value["status"]
            .as_str()
            .and_then(|s| s.parse::<PickupStatus>().ok())
            .map(StatusValue::Pickup),
        EntityKind::Trip => value["status"]
            .as_str()
            .and_then(|s| s.parse::<TripStatus>().ok())
            .map(StatusValue::Trip),
        EntityKind::BusLocation | EntityKind::AdminStats => None,
    };
    let last_updated = value["updated_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Observation {
        status,
        payload: value,
        last_updated,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Mock API: scripted send results, programmable poll payload.
    struct MockApi {
        send_results: Mutex<VecDeque<Result<Value>>>,
        sends: Mutex<Vec<(Method, String)>>,
        poll_payload: Mutex<Value>,
    }

    impl MockApi {
        fn new() -> Self {
            Self {
                send_results: Mutex::new(VecDeque::new()),
                sends: Mutex::new(Vec::new()),
                poll_payload: Mutex::new(Value::Null),
            }
        }

        fn script_send(&self, result: Result<Value>) {
            self.send_results.lock().unwrap().push_back(result);
        }

        fn set_poll_payload(&self, value: Value) {
            *self.poll_payload.lock().unwrap() = value;
        }

        fn sends(&self) -> Vec<(Method, String)> {
            self.sends.lock().unwrap().clone()
        }
    }

    impl ApiClient for MockApi {
        fn get(&self, _path: &str) -> impl std::future::Future<Output = Result<Value>> + Send {
            let payload = self.poll_payload.lock().unwrap().clone();
            async move {
                if payload.is_null() {
                    Err(SyncError::TransientNetwork("no payload scripted".into()))
                } else {
                    Ok(payload)
                }
            }
        }

        fn send(
            &self,
            method: Method,
            path: &str,
            _payload: &Value,
        ) -> impl std::future::Future<Output = Result<Value>> + Send {
            self.sends.lock().unwrap().push((method, path.to_string()));
            let result = self
                .send_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null));
            async move { result }
        }
    }

    fn engine_in(dir: &TempDir, client: Arc<MockApi>) -> SyncEngine<MockApi> {
        let config = SyncConfig::new("http://mock");
        SyncEngine::start(config, client, &dir.path().join("queue.redb")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn submit_persists_then_sends() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        client.script_send(Ok(serde_json::json!({"id": 1})));
        let engine = engine_in(&dir, Arc::clone(&client));

        let id = engine.request_pickup(7, 1.0, 2.0).unwrap();
        // Persisted before the drainer ever runs.
        assert_eq!(engine.queue().get(id).unwrap().path, "/parent/pickups");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.sends().len(), 1);
        assert_eq!(engine.queue().pending_len().unwrap(), 0);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_pending_shows_before_any_poll() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        client.script_send(Err(SyncError::TransientNetwork("offline".into())));
        let engine = engine_in(&dir, Arc::clone(&client));
        engine.report_connectivity(false);

        engine.request_pickup(7, 1.0, 2.0).unwrap();
        let state = engine.display_state(EntityRef::pickup(7)).unwrap();
        assert_eq!(state.status, Some(StatusValue::Pickup(PickupStatus::Pending)));
        assert!(state.is_optimistic);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_supersedes_optimistic_state_after_delivery() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        client.script_send(Ok(serde_json::json!({"id": 7})));
        let engine = engine_in(&dir, Arc::clone(&client));

        engine.request_pickup(7, 1.0, 2.0).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await; // delivered

        client.set_poll_payload(serde_json::json!({"status": "teacher_notified"}));
        let poller = engine.start_polling(EntityRef::pickup(7));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = engine.display_state(EntityRef::pickup(7)).unwrap();
        assert_eq!(
            state.status,
            Some(StatusValue::Pickup(PickupStatus::TeacherNotified))
        );
        assert!(!state.is_optimistic);
        poller.stop();
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_allowed_only_before_dismissal() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        let engine = engine_in(&dir, Arc::clone(&client));
        engine.report_connectivity(false);

        // Nothing tracked yet: cancel has no target.
        assert!(matches!(
            engine.cancel_pickup(7),
            Err(SyncError::EntityNotTracked(_))
        ));

        engine.request_pickup(7, 1.0, 2.0).unwrap();
        let id = engine.cancel_pickup(7).unwrap();
        assert_eq!(
            engine.queue().get(id).unwrap().path,
            "/parent/pickups/7"
        );
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_rejected_after_terminal_poll() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        let engine = engine_in(&dir, Arc::clone(&client));

        client.set_poll_payload(serde_json::json!({"status": "dismissed"}));
        let poller = engine.start_polling(EntityRef::pickup(7));
        tokio::time::sleep(Duration::from_millis(100)).await;
        poller.stop();

        assert!(matches!(
            engine.cancel_pickup(7),
            Err(SyncError::InvalidTransition { .. })
        ));
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_state_reports_queue_length() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        client.script_send(Err(SyncError::TransientNetwork("offline".into())));
        let engine = engine_in(&dir, Arc::clone(&client));
        engine.report_connectivity(false);
        tokio::time::sleep(Duration::from_secs(3)).await; // debounce elapses

        engine.request_pickup(7, 1.0, 2.0).unwrap();
        let state = engine.connectivity_state().unwrap();
        assert!(!state.online);
        assert_eq!(state.queued_actions, 1);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rejection_surfaces_in_display_state() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockApi::new());
        client.script_send(Err(SyncError::PermanentRequest(
            "student already picked up".into(),
        )));
        let engine = engine_in(&dir, Arc::clone(&client));

        engine.request_pickup(7, 1.0, 2.0).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let state = engine.display_state(EntityRef::pickup(7)).unwrap();
        assert_eq!(state.failure.as_deref(), Some("student already picked up"));
        assert_eq!(engine.dead_actions().unwrap().len(), 1);
        engine.shutdown();
    }

    #[test]
    fn poll_paths_per_kind() {
        assert_eq!(poll_path(EntityRef::pickup(7)), "/parent/pickups/7");
        assert_eq!(poll_path(EntityRef::trip(3)), "/driver/trips/3");
        assert_eq!(
            poll_path(EntityRef::new(EntityKind::BusLocation, 9)),
            "/bus/tracking/9"
        );
        assert_eq!(
            poll_path(EntityRef::new(EntityKind::AdminStats, 0)),
            "/admin/stats"
        );
    }

    #[test]
    fn observation_parses_status_and_timestamp() {
        let obs = observation_from(
            EntityKind::Pickup,
            serde_json::json!({"status": "teacher_notified", "updated_at": "2026-08-26T10:00:00Z"}),
        );
        assert_eq!(
            obs.status,
            Some(StatusValue::Pickup(PickupStatus::TeacherNotified))
        );
        assert_eq!(obs.last_updated.to_rfc3339(), "2026-08-26T10:00:00+00:00");

        let obs = observation_from(EntityKind::BusLocation, serde_json::json!({"lat": 1.0}));
        assert!(obs.status.is_none());
        assert_eq!(obs.payload["lat"], 1.0);
    }
}
