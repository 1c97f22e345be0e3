//! Resolver registry and merge entry point

use super::{FieldConflict, FieldPolicy};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Registry of per-field policies with a remote-wins default
///
/// `resolve` reconciles one incoming snapshot against local state. Every
/// field present in the incoming snapshot that differs from local produces
/// a [`FieldConflict`], even when the default policy applied — callers
/// publish the full list so no conflict is silently dropped.
pub struct ConflictResolver {
    policies: RwLock<HashMap<String, FieldPolicy>>,
    default_policy: FieldPolicy,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    /// Create a resolver with the remote-wins default and no field policies
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            default_policy: FieldPolicy::RemoteWins,
        }
    }

    /// Register (or replace) the policy for a field
    pub fn register_field_policy(&self, field: impl Into<String>, policy: FieldPolicy) {
        self.policies.write().insert(field.into(), policy);
    }

    /// Drop all registered field policies
    pub fn clear_field_policies(&self) {
        self.policies.write().clear();
    }

    /// Number of registered field policies
    pub fn policy_count(&self) -> usize {
        self.policies.read().len()
    }

    /// Merge `incoming` into `local`, reporting every differing field
    ///
    /// Fields absent from the incoming snapshot keep their local value.
    /// Fields absent locally are taken from incoming without a conflict
    /// record — there is no client value to conflict with.
    pub fn resolve(
        &self,
        local: &Map<String, Value>,
        incoming: &Map<String, Value>,
    ) -> (Map<String, Value>, Vec<FieldConflict>) {
        let mut merged = local.clone();
        let mut conflicts = Vec::new();
        let policies = self.policies.read();

        for (field, incoming_value) in incoming {
            match local.get(field) {
                None => {
                    merged.insert(field.clone(), incoming_value.clone());
                }
                Some(local_value) if local_value == incoming_value => {}
                Some(local_value) => {
                    let policy = policies.get(field).unwrap_or(&self.default_policy);
                    let outcome = policy.apply(local_value, incoming_value);

                    conflicts.push(FieldConflict {
                        field: field.clone(),
                        server_value: incoming_value.clone(),
                        client_value: local_value.clone(),
                        resolution: outcome.resolution,
                    });
                    merged.insert(field.clone(), outcome.value);
                }
            }
        }

        (merged, conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ResolutionSource;
    use serde_json::json;

    fn entity(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_default_policy_remote_wins() {
        let resolver = ConflictResolver::new();
        let local = entity(json!({"status": "open", "inspector": "kim"}));
        let incoming = entity(json!({"status": "assigned"}));

        let (merged, conflicts) = resolver.resolve(&local, &incoming);

        assert_eq!(merged["status"], json!("assigned"));
        // Field absent from incoming keeps its local value
        assert_eq!(merged["inspector"], json!("kim"));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "status");
        assert_eq!(conflicts[0].resolution, ResolutionSource::Server);
    }

    #[test]
    fn test_registered_policy_overrides_default() {
        let resolver = ConflictResolver::new();
        resolver.register_field_policy("status", FieldPolicy::StickyStatus);

        let local = entity(json!({"status": "completed"}));
        let incoming = entity(json!({"status": "in_progress"}));

        let (merged, conflicts) = resolver.resolve(&local, &incoming);

        assert_eq!(merged["status"], json!("completed"));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolution, ResolutionSource::Client);
    }

    #[test]
    fn test_equal_fields_produce_no_conflict() {
        let resolver = ConflictResolver::new();
        let local = entity(json!({"status": "open"}));
        let incoming = entity(json!({"status": "open"}));

        let (merged, conflicts) = resolver.resolve(&local, &incoming);
        assert_eq!(merged["status"], json!("open"));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_new_field_merges_without_conflict() {
        let resolver = ConflictResolver::new();
        let local = entity(json!({"status": "open"}));
        let incoming = entity(json!({"status": "open", "due_date": "2026-09-01"}));

        let (merged, conflicts) = resolver.resolve(&local, &incoming);
        assert_eq!(merged["due_date"], json!("2026-09-01"));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_every_differing_field_is_reported() {
        let resolver = ConflictResolver::new();
        resolver.register_field_policy("notes", FieldPolicy::ConcatText {
            marker: "/".into(),
        });

        let local = entity(json!({"status": "open", "notes": "a", "floor": 2}));
        let incoming = entity(json!({"status": "assigned", "notes": "b", "floor": 3}));

        let (_, conflicts) = resolver.resolve(&local, &incoming);
        let mut fields: Vec<_> = conflicts.iter().map(|c| c.field.as_str()).collect();
        fields.sort_unstable();
        assert_eq!(fields, vec!["floor", "notes", "status"]);
    }

    #[test]
    fn test_clear_field_policies() {
        let resolver = ConflictResolver::new();
        resolver.register_field_policy("status", FieldPolicy::StickyStatus);
        resolver.register_field_policy("updated_at", FieldPolicy::LatestTimestamp);
        assert_eq!(resolver.policy_count(), 2);

        resolver.clear_field_policies();
        assert_eq!(resolver.policy_count(), 0);

        // Back to remote-wins
        let local = entity(json!({"status": "completed"}));
        let incoming = entity(json!({"status": "in_progress"}));
        let (merged, _) = resolver.resolve(&local, &incoming);
        assert_eq!(merged["status"], json!("in_progress"));
    }
}
