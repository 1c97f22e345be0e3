//! Core types for FieldSync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite cache key for an entity: `entity_type:entity_id`
pub fn entity_key(entity_type: &str, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

/// Kind of mutation awaiting delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncActionKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for SyncActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncActionKind::Create => write!(f, "create"),
            SyncActionKind::Update => write!(f, "update"),
            SyncActionKind::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for SyncActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(SyncActionKind::Create),
            "update" => Ok(SyncActionKind::Update),
            "delete" => Ok(SyncActionKind::Delete),
            _ => Err(format!("Unknown sync action kind: {}", s)),
        }
    }
}

/// A pending mutation owned by the sync queue
///
/// The queue owns each action exclusively; the coordinator borrows one per
/// delivery attempt. `id` and `payload` never change across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAction {
    /// Unique identifier, stable for the action's whole lifetime
    pub id: String,
    /// Kind of mutation
    pub kind: SyncActionKind,
    /// Entity type this mutation targets (e.g., "violation", "task")
    pub entity_type: String,
    /// Entity snapshot or delta
    pub payload: serde_json::Value,
    /// When the action was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Caller-supplied retry budget
    pub max_retries: u32,
}

impl SyncAction {
    /// Create a new action with a fresh id and zero retries
    pub fn new(
        kind: SyncActionKind,
        entity_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            entity_type: entity_type.into(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    /// Whether the retry budget is exhausted
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// A change notification, used both as wire payload and internal message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Event kind (e.g., "create", "update", "delete")
    pub kind: String,
    /// Entity identifier
    pub entity_id: String,
    /// Entity type
    pub entity_type: String,
    /// Entity snapshot
    pub data: serde_json::Value,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Who produced the event (device or server id)
    pub origin_id: String,
    /// Informational version number; logged, never gates a merge
    #[serde(default)]
    pub version: i64,
}

impl SyncEvent {
    /// Create an event for an entity snapshot
    pub fn new(
        kind: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: serde_json::Value,
        origin_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            data,
            timestamp: Utc::now(),
            origin_id: origin_id.into(),
            version: 0,
        }
    }

    /// Set the version number
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Cache key for the entity this event concerns
    pub fn entity_key(&self) -> String {
        entity_key(&self.entity_type, &self.entity_id)
    }
}

/// Snapshot of the engine's externally visible state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether the coordinator reached `Ready`
    pub is_initialized: bool,
    /// Transport connectivity at the time of the call
    pub is_connected: bool,
    /// Pending actions in the queue
    pub queue_length: usize,
    /// Registered field policies
    pub conflict_resolver_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_action_kind_round_trip() {
        for kind in [
            SyncActionKind::Create,
            SyncActionKind::Update,
            SyncActionKind::Delete,
        ] {
            let parsed = SyncActionKind::from_str(&kind.to_string()).unwrap();
            assert_eq!(parsed, kind);
        }
        assert!(SyncActionKind::from_str("upsert").is_err());
    }

    #[test]
    fn test_entity_key_format() {
        assert_eq!(entity_key("violation", "v-42"), "violation:v-42");

        let event = SyncEvent::new(
            "update",
            "task",
            "t-7",
            serde_json::json!({"status": "assigned"}),
            "server",
        );
        assert_eq!(event.entity_key(), "task:t-7");
    }

    #[test]
    fn test_new_action_has_budget() {
        let action = SyncAction::new(
            SyncActionKind::Create,
            "task",
            serde_json::json!({"id": "t-1"}),
            3,
        );
        assert_eq!(action.retry_count, 0);
        assert!(!action.retries_exhausted());
        assert!(!action.id.is_empty());
    }
}
