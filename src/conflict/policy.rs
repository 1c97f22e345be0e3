//! Per-field resolution policies

use super::ResolutionSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status values that must not be overwritten backward
pub const TERMINAL_STATUSES: &[&str] = &["completed", "cancelled"];

/// How a differing field is resolved
///
/// A tagged enum rather than registered closures so policy dispatch is a
/// single match and registries stay serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum FieldPolicy {
    /// Incoming value wins (the default policy)
    RemoteWins,
    /// Local value is kept
    LocalWins,
    /// Terminal statuses are sticky: once local is `completed` or
    /// `cancelled`, a non-terminal incoming value cannot overwrite it
    StickyStatus,
    /// Resolve to `max(local, incoming)` for RFC3339 strings or numeric
    /// epoch values
    LatestTimestamp,
    /// Keep both values, joined with an attribution marker
    ConcatText { marker: String },
}

/// Result of applying a policy to one differing field
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    /// The resolved value
    pub value: Value,
    /// Which side it came from
    pub resolution: ResolutionSource,
}

impl PolicyOutcome {
    fn server(value: Value) -> Self {
        Self {
            value,
            resolution: ResolutionSource::Server,
        }
    }

    fn client(value: Value) -> Self {
        Self {
            value,
            resolution: ResolutionSource::Client,
        }
    }

    fn merged(value: Value) -> Self {
        Self {
            value,
            resolution: ResolutionSource::Merged,
        }
    }
}

impl FieldPolicy {
    /// Resolve one field given both sides; only called when they differ
    pub fn apply(&self, local: &Value, incoming: &Value) -> PolicyOutcome {
        match self {
            FieldPolicy::RemoteWins => PolicyOutcome::server(incoming.clone()),
            FieldPolicy::LocalWins => PolicyOutcome::client(local.clone()),
            FieldPolicy::StickyStatus => {
                if is_terminal_status(local) && !is_terminal_status(incoming) {
                    PolicyOutcome::client(local.clone())
                } else {
                    PolicyOutcome::server(incoming.clone())
                }
            }
            FieldPolicy::LatestTimestamp => match (parse_instant(local), parse_instant(incoming)) {
                (Some(l), Some(r)) if l > r => PolicyOutcome::client(local.clone()),
                (Some(_), Some(_)) => PolicyOutcome::server(incoming.clone()),
                // Unparseable on either side falls back to the default
                _ => PolicyOutcome::server(incoming.clone()),
            },
            FieldPolicy::ConcatText { marker } => match (local.as_str(), incoming.as_str()) {
                (Some(l), Some(r)) => {
                    PolicyOutcome::merged(Value::String(format!("{} {} {}", l, marker, r)))
                }
                _ => PolicyOutcome::server(incoming.clone()),
            },
        }
    }
}

/// Whether a value names a terminal status
fn is_terminal_status(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| TERMINAL_STATUSES.contains(&s))
        .unwrap_or(false)
}

/// Read a value as a point in time: RFC3339 string or epoch seconds
fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok();
    }
    if let Some(secs) = value.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    None
}
