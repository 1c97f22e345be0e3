//! Sync coordinator
//!
//! Orchestrates the cache, the queue, the reachability observer, and the
//! conflict resolver around one transport. Local mutations are written
//! through to the cache optimistically and either delivered immediately or
//! queued; inbound events are reconciled through the resolver and
//! republished to subscribers; an online transition drains the queue.

mod events;

pub use events::{
    CoordinatorEvent, CoordinatorEventKind, ListenerId, ListenerRegistry, SyncListener, WILDCARD,
};

use crate::cache::LocalCache;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, FieldPolicy};
use crate::error::Result;
use crate::queue::{DrainReport, SyncQueue};
use crate::reachability::ReachabilityObserver;
use crate::store::StateStore;
use crate::transport::Transport;
use crate::types::{entity_key, SyncAction, SyncActionKind, SyncEvent, SyncStatus};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Lifecycle of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Uninitialized,
    Initializing,
    Ready,
}

struct CoordinatorInner {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    cache: LocalCache,
    queue: SyncQueue,
    resolver: ConflictResolver,
    listeners: ListenerRegistry,
    state: RwLock<CoordinatorState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One coordinator per logical connection; explicitly constructed and
/// dependency-injected so tests can run isolated instances
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SyncCoordinator {
    /// Build a coordinator over a durable store and clock
    pub fn new(config: SyncConfig, clock: Arc<dyn Clock>, store: Arc<dyn StateStore>) -> Self {
        let cache = LocalCache::new(clock.clone(), store.clone());
        let queue = SyncQueue::new(clock.clone(), store);
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                clock,
                cache,
                queue,
                resolver: ConflictResolver::new(),
                listeners: ListenerRegistry::new(),
                state: RwLock::new(CoordinatorState::Uninitialized),
                transport: RwLock::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Wire the transport, restore persisted state, and start background
    /// tasks; idempotent — a second call while already running is a no-op
    pub async fn initialize(&self, transport: Arc<dyn Transport>) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if *state != CoordinatorState::Uninitialized {
                tracing::debug!("Coordinator already initialized, ignoring");
                return Ok(());
            }
            *state = CoordinatorState::Initializing;
        }

        if let Err(e) = transport.connect().await {
            // Stay offline; the queue holds mutations until connectivity
            tracing::warn!("Transport connect failed, starting offline: {}", e);
        }

        self.inner.cache.load();
        self.inner.queue.load();

        let observer = Arc::new(ReachabilityObserver::new(
            transport.is_connected().into(),
            self.inner.config.reachability_debounce,
            self.inner.clock.clone(),
        ));

        *self.inner.transport.write() = Some(transport.clone());

        let mut tasks = Vec::new();

        // Inbound events, processed in arrival order
        let inner = self.inner.clone();
        let mut inbound = transport.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(event) => inner.handle_inbound(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Inbound stream lagged, {} events dropped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Reachability transitions: drain on online, log on offline
        let inner = self.inner.clone();
        let mut transitions = observer.subscribe();
        tasks.push(tokio::spawn(async move {
            while transitions.changed().await.is_ok() {
                let online = transitions.borrow_and_update().is_online();
                if online {
                    tracing::info!("Back online, draining sync queue");
                    inner.drain_queue().await;
                } else {
                    tracing::info!("Went offline, {} actions pending", inner.queue.len());
                }
            }
        }));

        // Housekeeping tick: probe connectivity, flush the debouncer,
        // sweep expired cache entries, retry pending deliveries
        let inner = self.inner.clone();
        let probe = transport.clone();
        let tick_observer = observer.clone();
        let tick = self.inner.config.tick_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let connected = probe.is_connected();
                tick_observer.report(connected);
                tick_observer.tick();
                inner.cache.evict_expired();
                // Actions queued by a transient send failure have no
                // online transition to drain them; the tick picks them up
                if connected && !inner.queue.is_empty() {
                    inner.drain_queue().await;
                }
            }
        }));

        self.inner.tasks.lock().extend(tasks);
        *self.inner.state.write() = CoordinatorState::Ready;
        tracing::info!("Sync coordinator ready");

        if transport.is_connected() {
            self.inner.drain_queue().await;
        }
        Ok(())
    }

    /// Stop background tasks and clear registries; idempotent
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.write();
            if *state == CoordinatorState::Uninitialized {
                return;
            }
            *state = CoordinatorState::Uninitialized;
        }

        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        *self.inner.transport.write() = None;
        self.inner.listeners.clear();
        self.inner.resolver.clear_field_policies();
        tracing::info!("Sync coordinator destroyed");
    }

    /// Cache an entity snapshot under an explicit key
    pub fn cache_data(&self, key: impl Into<String>, data: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.config.default_cache_ttl);
        self.inner.cache.put(key, data, ttl);
    }

    /// Read a cached snapshot; misses and expired entries return `None`
    pub fn get_cached_data(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.cache.get(key)
    }

    /// Empty the cache (logout/reset); queued mutations are untouched
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Request a local mutation
    ///
    /// The cache is written through immediately so the UI never blocks on
    /// network state. If online, one immediate delivery is attempted; on
    /// failure or offline the action is queued. Returns the action id.
    pub fn queue_sync_action(
        &self,
        kind: SyncActionKind,
        entity_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> String {
        let entity_type = entity_type.into();
        let mut action = SyncAction::new(kind, entity_type.clone(), payload, max_retries);
        action.enqueued_at = self.inner.clock.now();

        // Optimistic write-through when the payload identifies its entity
        if kind != SyncActionKind::Delete {
            if let Some(entity_id) = payload_entity_id(&action.payload) {
                self.inner.cache.put(
                    entity_key(&entity_type, &entity_id),
                    action.payload.clone(),
                    self.inner.config.default_cache_ttl,
                );
            }
        } else if let Some(entity_id) = payload_entity_id(&action.payload) {
            self.inner.cache.evict(&entity_key(&entity_type, &entity_id));
        }

        let transport = self.inner.transport.read().clone();
        if let Some(transport) = transport {
            if transport.is_connected() {
                let event = self.inner.outbound_event(&action);
                if transport.send(&event) {
                    tracing::debug!("Delivered action {} immediately", action.id);
                    return action.id;
                }
                tracing::debug!("Immediate delivery refused, queuing {}", action.id);
            }
        }

        self.inner.queue.enqueue_action(action)
    }

    /// Trigger a queue drain now (timer tick, manual retry button)
    pub async fn drain_now(&self) -> DrainReport {
        self.inner.drain_queue().await
    }

    /// Subscribe to reconciliation events for one entity type or `"*"`
    pub fn add_sync_listener(
        &self,
        entity_type: impl Into<String>,
        listener: SyncListener,
    ) -> ListenerId {
        self.inner.listeners.add(entity_type, listener)
    }

    /// Remove a previously added listener
    pub fn remove_sync_listener(&self, entity_type: &str, id: &str) -> bool {
        self.inner.listeners.remove(entity_type, id)
    }

    /// Register a per-field conflict policy
    pub fn register_field_policy(&self, field: impl Into<String>, policy: FieldPolicy) {
        self.inner.resolver.register_field_policy(field, policy);
    }

    /// Drop all per-field conflict policies
    pub fn clear_field_policies(&self) {
        self.inner.resolver.clear_field_policies();
    }

    /// Externally visible engine state
    pub fn get_sync_status(&self) -> SyncStatus {
        let is_connected = self
            .inner
            .transport
            .read()
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false);
        SyncStatus {
            is_initialized: *self.inner.state.read() == CoordinatorState::Ready,
            is_connected,
            queue_length: self.inner.queue.len(),
            conflict_resolver_count: self.inner.resolver.policy_count(),
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl CoordinatorInner {
    /// Reconcile one inbound event against local state and republish
    fn handle_inbound(&self, event: SyncEvent) {
        tracing::debug!(
            "Inbound {} for {} (version {}, origin {})",
            event.kind,
            event.entity_key(),
            event.version,
            event.origin_id
        );

        let key = event.entity_key();

        if event.kind == "delete" {
            self.cache.evict(&key);
            self.listeners.publish(&CoordinatorEvent::data_synced(
                event.entity_type,
                event.entity_id,
                event.data,
                self.clock.now(),
            ));
            return;
        }

        let local = self.cache.get(&key);
        let (merged, conflicts) = match local.as_ref().and_then(|v| v.as_object()) {
            Some(local_map) => match event.data.as_object() {
                Some(incoming_map) => {
                    let (merged, conflicts) = self.resolver.resolve(local_map, incoming_map);
                    (serde_json::Value::Object(merged), conflicts)
                }
                // Non-object snapshots cannot be field-merged
                None => (event.data.clone(), Vec::new()),
            },
            // Nothing local (or not an object): merge directly, no
            // conflict possible
            None => (event.data.clone(), Vec::new()),
        };

        self.cache
            .put(key, merged.clone(), self.config.default_cache_ttl);

        let published = if conflicts.is_empty() {
            CoordinatorEvent::data_synced(event.entity_type, event.entity_id, merged, self.clock.now())
        } else {
            CoordinatorEvent::conflict_resolved(
                event.entity_type,
                event.entity_id,
                merged,
                conflicts,
                self.clock.now(),
            )
        };
        self.listeners.publish(&published);
    }

    /// Drain the queue through the transport, publishing terminal failures
    async fn drain_queue(&self) -> DrainReport {
        let Some(transport) = self.transport.read().clone() else {
            return DrainReport::default();
        };

        let deliver_transport = transport.clone();
        let clock = self.clock.clone();
        let report = self
            .queue
            .drain(
                self.config.drain_batch_size,
                self.config.delivery_timeout,
                move |action| {
                    let event = outbound_event(action, clock.now());
                    let ok = deliver_transport.send(&event);
                    async move { ok }.boxed()
                },
            )
            .await;

        if !report.skipped {
            tracing::debug!(
                "Drain finished: {} delivered, {} retried, {} terminal",
                report.delivered.len(),
                report.retried.len(),
                report.terminal.len()
            );
        }

        for action in &report.terminal {
            self.listeners.publish(&CoordinatorEvent::sync_failed(
                action.clone(),
                payload_entity_id(&action.payload),
                self.clock.now(),
            ));
        }
        report
    }

    fn outbound_event(&self, action: &SyncAction) -> SyncEvent {
        outbound_event(action, self.clock.now())
    }
}

/// Build the wire event for one delivery attempt
fn outbound_event(action: &SyncAction, now: chrono::DateTime<chrono::Utc>) -> SyncEvent {
    SyncEvent {
        kind: action.kind.to_string(),
        entity_id: payload_entity_id(&action.payload).unwrap_or_default(),
        entity_type: action.entity_type.clone(),
        data: action.payload.clone(),
        timestamp: now,
        origin_id: "local".to_string(),
        version: 0,
    }
}

/// Pull the entity id out of a mutation payload
fn payload_entity_id(payload: &serde_json::Value) -> Option<String> {
    let id = payload.get("id").or_else(|| payload.get("entity_id"))?;
    if let Some(s) = id.as_str() {
        return Some(s.to_string());
    }
    id.as_i64().map(|n| n.to_string())
}
