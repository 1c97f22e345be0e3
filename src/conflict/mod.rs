//! Field-level conflict resolution
//!
//! Provides:
//! - A tagged enum of per-field resolution policies
//! - A resolver registry with a remote-wins default
//! - A conflict record per differing field, never silently dropped

mod policy;
mod resolver;

pub use policy::{FieldPolicy, PolicyOutcome, TERMINAL_STATUSES};
pub use resolver::ConflictResolver;

use serde::{Deserialize, Serialize};

/// Which side a resolved field came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// Incoming (remote) value won
    Server,
    /// Local value was kept
    Client,
    /// Both values were combined
    Merged,
}

/// A single field that differed between local and incoming state
///
/// Ephemeral: computed per reconciliation and consumed to produce the
/// resolved snapshot, then reported on the conflict-resolved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Field name
    pub field: String,
    /// Value from the incoming (remote) side
    pub server_value: serde_json::Value,
    /// Value from the local side
    pub client_value: serde_json::Value,
    /// How the difference was resolved
    pub resolution: ResolutionSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_conflict_serializes_resolution() {
        let conflict = FieldConflict {
            field: "status".into(),
            server_value: serde_json::json!("in_progress"),
            client_value: serde_json::json!("completed"),
            resolution: ResolutionSource::Client,
        };

        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["resolution"], "client");
        assert_eq!(json["field"], "status");
    }
}
