//! Durable, ordered queue of pending mutations
//!
//! Actions are delivered head to tail, one at a time, never concurrently —
//! ordering within an entity matters for update-after-create correctness.
//! A failing action is re-appended at the tail with its retry count bumped,
//! so it does not block the rest of the batch; an action that exhausts its
//! retry budget is removed and reported terminal, never silently dropped.
//! The queue is persisted after every outcome so a process restart resumes
//! mid-queue; an attempt interrupted by a crash is redelivered (at-least-once).

use crate::clock::Clock;
use crate::store::{StateStore, QUEUE_RECORD};
use crate::types::{SyncAction, SyncActionKind};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one `drain` call
#[derive(Debug, Default)]
pub struct DrainReport {
    /// True when a drain was already in flight and this call did nothing
    pub skipped: bool,
    /// Delivery attempts made
    pub attempted: usize,
    /// Ids delivered and removed permanently
    pub delivered: Vec<String>,
    /// Ids that failed and were re-appended for a later drain
    pub retried: Vec<String>,
    /// Actions removed with their retry budget exhausted
    pub terminal: Vec<SyncAction>,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Durable FIFO of pending mutations
pub struct SyncQueue {
    actions: Mutex<VecDeque<SyncAction>>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    draining: AtomicBool,
}

/// Clears the drain flag even if the drain future is dropped mid-flight
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncQueue {
    /// Create an empty queue
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn StateStore>) -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
            store,
            clock,
            draining: AtomicBool::new(false),
        }
    }

    /// Restore pending actions from the durable record
    pub fn load(&self) {
        let bytes = match self.store.read_record(QUEUE_RECORD) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Queue record unreadable, starting empty: {}", e);
                return;
            }
        };

        match serde_json::from_slice::<Vec<SyncAction>>(&bytes) {
            Ok(loaded) => {
                let mut actions = self.actions.lock();
                *actions = loaded.into();
                tracing::debug!("Queue restored: {} pending actions", actions.len());
            }
            Err(e) => {
                tracing::warn!("Queue record corrupt, starting empty: {}", e);
            }
        }
    }

    /// Append a new action at the tail, returning its id
    pub fn enqueue(
        &self,
        kind: SyncActionKind,
        entity_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> String {
        let mut action = SyncAction::new(kind, entity_type, payload, max_retries);
        action.enqueued_at = self.clock.now();
        self.enqueue_action(action)
    }

    /// Append an already-built action at the tail
    pub fn enqueue_action(&self, action: SyncAction) -> String {
        let id = action.id.clone();
        let mut actions = self.actions.lock();
        actions.push_back(action);
        self.persist(&actions);
        id
    }

    /// Pending action count
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    /// Whether no actions are pending
    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    /// Attempt delivery for up to `batch_size` actions
    ///
    /// `deliver` reports success as `true`; anything else — including an
    /// attempt that outlives `timeout` — takes the retry/terminal path. At
    /// most one drain runs at a time: a re-entrant call returns immediately
    /// with `skipped` set and the queue untouched.
    pub async fn drain<F>(&self, batch_size: usize, timeout: Duration, deliver: F) -> DrainReport
    where
        F: for<'a> Fn(&'a SyncAction) -> BoxFuture<'a, bool>,
    {
        if self.draining.swap(true, Ordering::SeqCst) {
            tracing::debug!("Drain already in flight, skipping");
            return DrainReport::skipped();
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        // Ids re-appended during this drain; seeing one at the head again
        // means the batch wrapped around the queue.
        let mut retried_ids: HashSet<String> = HashSet::new();

        while report.attempted < batch_size {
            let action = {
                let mut actions = self.actions.lock();
                match actions.pop_front() {
                    Some(action) if retried_ids.contains(&action.id) => {
                        actions.push_front(action);
                        break;
                    }
                    Some(action) => action,
                    None => break,
                }
            };

            report.attempted += 1;
            let ok = match tokio::time::timeout(timeout, deliver(&action)).await {
                Ok(ok) => ok,
                Err(_) => {
                    tracing::warn!("Delivery attempt timed out for action {}", action.id);
                    false
                }
            };

            if ok {
                tracing::debug!("Delivered action {} ({})", action.id, action.kind);
                report.delivered.push(action.id);
            } else if action.retry_count + 1 >= action.max_retries {
                // This failure spends the last of the budget
                let mut action = action;
                action.retry_count = action.max_retries;
                tracing::warn!(
                    "Action {} failed terminally after {} attempts",
                    action.id,
                    action.retry_count
                );
                report.terminal.push(action);
            } else {
                let mut action = action;
                action.retry_count += 1;
                tracing::debug!(
                    "Action {} failed, retry {}/{}",
                    action.id,
                    action.retry_count,
                    action.max_retries
                );
                retried_ids.insert(action.id.clone());
                report.retried.push(action.id.clone());
                let mut actions = self.actions.lock();
                actions.push_back(action);
            }

            // Persist after every outcome so a restart resumes mid-queue
            let actions = self.actions.lock();
            self.persist(&actions);
        }

        report
    }

    fn persist(&self, actions: &VecDeque<SyncAction>) {
        let snapshot: Vec<&SyncAction> = actions.iter().collect();
        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Queue serialize failed, skipping persist: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.write_record(QUEUE_RECORD, &bytes) {
            tracing::warn!("Queue persist failed, continuing in-memory: {}", e);
        }
    }
}
