//! Reconciliation events and the subscriber registry

use crate::conflict::FieldConflict;
use crate::types::SyncAction;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Entity type that receives every event
pub const WILDCARD: &str = "*";

/// Kinds of events published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorEventKind {
    /// Inbound state merged without any differing field
    DataSynced,
    /// Inbound state merged through the resolver; conflicts attached
    ConflictResolved,
    /// An action exhausted its retry budget
    SyncFailed,
}

/// An event published to sync listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub kind: CoordinatorEventKind,
    /// Entity type the event concerns
    pub entity_type: String,
    /// Entity id, when the event concerns a single entity
    pub entity_id: Option<String>,
    /// Reconciled entity snapshot
    pub data: Option<serde_json::Value>,
    /// Field conflicts resolved during the merge; always attached for
    /// conflict-resolved events, even when every field took the default
    #[serde(default)]
    pub conflicts: Vec<FieldConflict>,
    /// The action that failed terminally (sync-failed only)
    pub failed_action: Option<SyncAction>,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

impl CoordinatorEvent {
    /// Inbound merge with nothing to resolve; `at` comes from the
    /// publisher's clock
    pub fn data_synced(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: CoordinatorEventKind::DataSynced,
            entity_type: entity_type.into(),
            entity_id: Some(entity_id.into()),
            data: Some(data),
            conflicts: Vec::new(),
            failed_action: None,
            timestamp: at,
        }
    }

    /// Inbound merge that went through the resolver
    pub fn conflict_resolved(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: serde_json::Value,
        conflicts: Vec<FieldConflict>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: CoordinatorEventKind::ConflictResolved,
            entity_type: entity_type.into(),
            entity_id: Some(entity_id.into()),
            data: Some(data),
            conflicts,
            failed_action: None,
            timestamp: at,
        }
    }

    /// Terminal delivery failure; `entity_id` identifies the record when
    /// the action's payload carried one
    pub fn sync_failed(action: SyncAction, entity_id: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind: CoordinatorEventKind::SyncFailed,
            entity_type: action.entity_type.clone(),
            entity_id,
            data: None,
            conflicts: Vec::new(),
            failed_action: Some(action),
            timestamp: at,
        }
    }
}

/// Handle for removing a listener
pub type ListenerId = String;

/// A subscriber callback
pub type SyncListener = Arc<dyn Fn(&CoordinatorEvent) + Send + Sync>;

/// Maps entity type (or `"*"`) to subscriber callbacks
///
/// Never persisted; rebuilt at process start.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, SyncListener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning the id used for removal
    pub fn add(&self, entity_type: impl Into<String>, listener: SyncListener) -> ListenerId {
        let id = uuid::Uuid::new_v4().to_string();
        self.listeners
            .write()
            .entry(entity_type.into())
            .or_default()
            .push((id.clone(), listener));
        id
    }

    /// Remove a listener by id; true if it was registered
    pub fn remove(&self, entity_type: &str, id: &str) -> bool {
        let mut listeners = self.listeners.write();
        let Some(bucket) = listeners.get_mut(entity_type) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(listener_id, _)| listener_id != id);
        let removed = bucket.len() < before;
        if bucket.is_empty() {
            listeners.remove(entity_type);
        }
        removed
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Total registered listeners
    pub fn count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Invoke listeners of the event's entity type, then wildcard listeners
    pub fn publish(&self, event: &CoordinatorEvent) {
        let callbacks: Vec<SyncListener> = {
            let listeners = self.listeners.read();
            let mut callbacks = Vec::new();
            if let Some(bucket) = listeners.get(&event.entity_type) {
                callbacks.extend(bucket.iter().map(|(_, l)| l.clone()));
            }
            if event.entity_type != WILDCARD {
                if let Some(bucket) = listeners.get(WILDCARD) {
                    callbacks.extend(bucket.iter().map(|(_, l)| l.clone()));
                }
            }
            callbacks
        };

        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recording_listener() -> (SyncListener, Arc<Mutex<Vec<CoordinatorEventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: SyncListener = Arc::new(move |event| {
            sink.lock().push(event.kind);
        });
        (listener, seen)
    }

    #[test]
    fn test_publish_reaches_type_and_wildcard_listeners() {
        let registry = ListenerRegistry::new();
        let (task_listener, task_seen) = recording_listener();
        let (any_listener, any_seen) = recording_listener();
        let (other_listener, other_seen) = recording_listener();

        registry.add("task", task_listener);
        registry.add(WILDCARD, any_listener);
        registry.add("violation", other_listener);

        registry.publish(&CoordinatorEvent::data_synced(
            "task",
            "t-1",
            json!({}),
            Utc::now(),
        ));

        assert_eq!(task_seen.lock().len(), 1);
        assert_eq!(any_seen.lock().len(), 1);
        assert!(other_seen.lock().is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let registry = ListenerRegistry::new();
        let (listener, seen) = recording_listener();
        let id = registry.add("task", listener);
        assert_eq!(registry.count(), 1);

        assert!(registry.remove("task", &id));
        assert!(!registry.remove("task", &id));
        assert_eq!(registry.count(), 0);

        registry.publish(&CoordinatorEvent::data_synced(
            "task",
            "t-1",
            json!({}),
            Utc::now(),
        ));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = ListenerRegistry::new();
        let (a, _) = recording_listener();
        let (b, _) = recording_listener();
        registry.add("task", a);
        registry.add(WILDCARD, b);

        registry.clear();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_sync_failed_event_carries_action_and_entity_id() {
        let action = crate::types::SyncAction::new(
            crate::types::SyncActionKind::Update,
            "task",
            json!({"id": "t-1"}),
            3,
        );
        let id = action.id.clone();
        let at = Utc::now();

        let event = CoordinatorEvent::sync_failed(action, Some("t-1".to_string()), at);
        assert_eq!(event.kind, CoordinatorEventKind::SyncFailed);
        assert_eq!(event.entity_type, "task");
        assert_eq!(event.entity_id.as_deref(), Some("t-1"));
        assert_eq!(event.timestamp, at);
        assert_eq!(event.failed_action.unwrap().id, id);
    }
}
