//! Queue drainer.
//!
//! A single cooperative loop replays queued actions against the remote API.
//! Three triggers feed it: the offline→online connectivity edge, a fixed
//! safety-net interval while online, and an explicit nudge after enqueue.
//! Re-entrant triggers coalesce — `Notify` holds at most one permit, which
//! is exactly "run once more after the current pass".
//!
//! A pass preserves order: the first transient failure stops the pass and
//! the failed action backs off at the head of the queue. Permanent failures
//! kill the action immediately (dead, surfaced as data); the next pass
//! proceeds past it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::client::ApiClient;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::queue::ActionQueue;

// ---------------------------------------------------------------------------
// Drainer
// ---------------------------------------------------------------------------

pub struct Drainer<C: ApiClient> {
    queue: Arc<ActionQueue>,
    client: Arc<C>,
    connectivity: ConnectivityMonitor,
    nudge: Arc<Notify>,
    interval: Duration,
}

impl<C: ApiClient> Drainer<C> {
    pub fn new(
        queue: Arc<ActionQueue>,
        client: Arc<C>,
        connectivity: ConnectivityMonitor,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            client,
            connectivity,
            nudge: Arc::new(Notify::new()),
            interval,
        }
    }

    /// Request a drain pass. Safe to call from anywhere; a trigger landing
    /// while a pass is active coalesces into one follow-up pass.
    pub fn trigger(&self) -> DrainTrigger {
        DrainTrigger {
            nudge: Arc::clone(&self.nudge),
        }
    }

    /// Run the drain loop until the task is stopped.
    pub fn spawn(self) -> DrainerHandle {
        let trigger = self.trigger();
        let task = tokio::spawn(async move {
            self.run().await;
        });
        DrainerHandle { trigger, task }
    }

    async fn run(self) {
        let mut online_rx = self.connectivity.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.nudge.notified() => {}
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*online_rx.borrow() {
                        continue;
                    }
                    tracing::debug!("connectivity restored, draining");
                }
                _ = ticker.tick() => {}
            }

            if !self.connectivity.is_online() {
                continue;
            }
            if let Err(e) = self.drain_pass().await {
                tracing::warn!(error = %e, "drain pass aborted on store error");
            }
        }
    }

    /// One drain pass: send eligible actions oldest-first until the queue is
    /// empty, connectivity drops, or an action fails. Returns the number of
    /// actions delivered.
    pub async fn drain_pass(&self) -> Result<u32> {
        let mut delivered = 0u32;

        while self.connectivity.is_online() {
            let Some(action) = self.queue.peek_next(Utc::now())? else {
                break;
            };
            self.queue.mark_in_flight(action.id)?;
            tracing::debug!(id = %action.id, method = %action.method, path = %action.path, "sending queued action");

            match self
                .client
                .send(action.method, &action.path, &action.payload)
                .await
            {
                Ok(_) => {
                    self.queue.mark_done(action.id)?;
                    delivered += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(id = %action.id, error = %e, "transient failure, backing off");
                    self.queue.mark_failed(action.id, e.to_string())?;
                    break;
                }
                Err(SyncError::PermanentRequest(msg)) => {
                    tracing::warn!(id = %action.id, %msg, "action rejected by server");
                    self.queue.fail_permanently(action.id, msg)?;
                    break;
                }
                Err(e) => {
                    // Undeliverable payload or similar defect: fail the one
                    // action, never wedge the queue behind it.
                    tracing::warn!(id = %action.id, error = %e, "action failed permanently");
                    self.queue.fail_permanently(action.id, e.to_string())?;
                    break;
                }
            }
        }
        Ok(delivered)
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cloneable nudge for the drain loop.
#[derive(Clone)]
pub struct DrainTrigger {
    nudge: Arc<Notify>,
}

impl DrainTrigger {
    pub fn fire(&self) {
        self.nudge.notify_one();
    }
}

pub struct DrainerHandle {
    trigger: DrainTrigger,
    task: JoinHandle<()>,
}

impl DrainerHandle {
    pub fn trigger(&self) -> DrainTrigger {
        self.trigger.clone()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for DrainerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RetryPolicy;
    use crate::types::{EntityKind, EntityRef, Method};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted client: pops one response per call, records every call.
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<Vec<(Method, String)>>,
        delay: Duration,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<Value>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<(Method, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ApiClient for ScriptedClient {
        fn get(&self, _path: &str) -> impl std::future::Future<Output = Result<Value>> + Send {
            async { Ok(Value::Null) }
        }

        fn send(
            &self,
            method: Method,
            path: &str,
            _payload: &Value,
        ) -> impl std::future::Future<Output = Result<Value>> + Send {
            self.calls.lock().unwrap().push((method, path.to_string()));
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null));
            let delay = self.delay;
            async move {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                response
            }
        }
    }

    fn online_monitor() -> ConnectivityMonitor {
        ConnectivityMonitor::new(true, Duration::from_secs(2))
    }

    fn queue_in(dir: &TempDir) -> Arc<ActionQueue> {
        Arc::new(ActionQueue::open(&dir.path().join("queue.redb"), RetryPolicy::default()).unwrap())
    }

    fn enqueue(queue: &ActionQueue, path: &str, student_id: i64) {
        queue
            .enqueue(
                Method::Post,
                path,
                serde_json::json!({"student_id": student_id}),
                Some(EntityRef::new(EntityKind::Pickup, student_id)),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn pass_replays_fifo_order() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        enqueue(&queue, "/parent/pickups", 1);
        enqueue(&queue, "/parent/pickups", 2);
        enqueue(&queue, "/parent/pickups", 3);

        let client = Arc::new(ScriptedClient::new(vec![
            Ok(Value::Null),
            Ok(Value::Null),
            Ok(Value::Null),
        ]));
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            online_monitor(),
            Duration::from_secs(5),
        );

        let delivered = drainer.drain_pass().await.unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(client.calls().len(), 3);
        assert_eq!(queue.pending_len().unwrap(), 0);
        // Every action is Done, none dead.
        assert!(queue.dead_actions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_stops_pass_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        enqueue(&queue, "/parent/pickups", 1);
        enqueue(&queue, "/parent/pickups", 2);

        let client = Arc::new(ScriptedClient::new(vec![Err(
            SyncError::TransientNetwork("timeout".into()),
        )]));
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            online_monitor(),
            Duration::from_secs(5),
        );

        let delivered = drainer.drain_pass().await.unwrap();
        assert_eq!(delivered, 0);
        // Only the head was attempted; the second action stayed queued.
        assert_eq!(client.calls().len(), 1);
        assert_eq!(queue.pending_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_kills_action_and_next_pass_moves_on() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        enqueue(&queue, "/parent/pickups", 1);
        enqueue(&queue, "/parent/pickups", 2);

        let client = Arc::new(ScriptedClient::new(vec![
            Err(SyncError::PermanentRequest("422 invalid student".into())),
            Ok(Value::Null),
        ]));
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            online_monitor(),
            Duration::from_secs(5),
        );

        assert_eq!(drainer.drain_pass().await.unwrap(), 0);
        let dead = queue.dead_actions().unwrap();
        assert_eq!(dead.len(), 1);

        // The dead action does not block the second one.
        assert_eq!(drainer.drain_pass().await.unwrap(), 1);
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn offline_pass_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        enqueue(&queue, "/parent/pickups", 1);

        let client = Arc::new(ScriptedClient::new(vec![]));
        let offline = ConnectivityMonitor::new(false, Duration::from_secs(2));
        let drainer = Drainer::new(Arc::clone(&queue), Arc::clone(&client), offline, Duration::from_secs(5));

        assert_eq!(drainer.drain_pass().await.unwrap(), 0);
        assert!(client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_trigger_mid_flight_sends_once() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        enqueue(&queue, "/parent/pickups", 1);

        let client = Arc::new(
            ScriptedClient::new(vec![Ok(Value::Null)]).with_delay(Duration::from_millis(500)),
        );
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            online_monitor(),
            // Long safety net so only explicit triggers matter here.
            Duration::from_secs(3600),
        );
        let handle = drainer.spawn();
        let trigger = handle.trigger();

        trigger.fire();
        tokio::time::sleep(Duration::from_millis(100)).await; // mid-flight
        trigger.fire();
        trigger.fire();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Coalesced triggers ran at most one extra pass over an empty queue.
        assert_eq!(client.calls().len(), 1);
        assert_eq!(queue.pending_len().unwrap(), 0);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_edge_triggers_drain() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        enqueue(&queue, "/parent/pickups", 1);

        let monitor = ConnectivityMonitor::new(false, Duration::from_millis(100));
        let client = Arc::new(ScriptedClient::new(vec![Ok(Value::Null)]));
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            monitor.clone(),
            Duration::from_secs(3600),
        );
        let handle = drainer.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.calls().is_empty());

        monitor.report(true);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(client.calls().len(), 1);
        assert_eq!(queue.pending_len().unwrap(), 0);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn safety_net_interval_drains_while_online() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);

        let client = Arc::new(ScriptedClient::new(vec![Ok(Value::Null)]));
        let drainer = Drainer::new(
            Arc::clone(&queue),
            Arc::clone(&client),
            online_monitor(),
            Duration::from_secs(5),
        );
        let handle = drainer.spawn();

        // Enqueue without a nudge; the periodic tick picks it up.
        enqueue(&queue, "/parent/pickups", 1);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(client.calls().len(), 1);
        handle.stop();
    }
}
