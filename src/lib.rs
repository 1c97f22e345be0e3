//! FieldSync - Offline-first synchronization engine
//!
//! Caches entity state locally with expiration, queues local mutations
//! durably while disconnected, replays them once connectivity returns, and
//! reconciles inbound change events with field-level conflict resolution.

pub mod cache;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod reachability;
pub mod store;
pub mod transport;
pub mod types;

pub use config::SyncConfig;
pub use coordinator::SyncCoordinator;
pub use error::{FieldSyncError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
