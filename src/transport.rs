//! Transport adapter seam
//!
//! The engine never sees wire bytes. A transport delivers inbound change
//! events over a broadcast channel and accepts outbound events with a
//! synchronous enqueue-for-send verdict — `send` returning true means the
//! event was accepted locally, not that the remote confirmed it.

use crate::error::Result;
use crate::types::SyncEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// External transport collaborator
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection
    async fn connect(&self) -> Result<()>;

    /// Current connectivity
    fn is_connected(&self) -> bool;

    /// Enqueue an event for sending; true means accepted locally
    fn send(&self, event: &SyncEvent) -> bool;

    /// Subscribe to the inbound event stream
    fn subscribe(&self) -> broadcast::Receiver<SyncEvent>;
}

/// In-process transport over tokio channels
///
/// Used by tests and demos: connectivity and send failures are scriptable,
/// inbound events are injected directly, and outbound sends are recorded.
pub struct ChannelTransport {
    inbound: broadcast::Sender<SyncEvent>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<SyncEvent>>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(256);
        Self {
            inbound,
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Script connectivity
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every `send` report failure
    pub fn set_send_failures(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Inject an inbound event as if the remote produced it
    pub fn push_inbound(&self, event: SyncEvent) {
        let _ = self.inbound.send(event);
    }

    /// Events accepted by `send`, in order
    pub fn sent_events(&self) -> Vec<SyncEvent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(crate::error::FieldSyncError::Transport(
                "no connectivity".to_string(),
            ))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, event: &SyncEvent) -> bool {
        if !self.is_connected() || self.fail_sends.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(event.clone());
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inbound.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_respects_connectivity_and_failure_toggle() {
        let transport = ChannelTransport::new();
        let event = SyncEvent::new("update", "task", "t-1", json!({}), "client");

        assert!(transport.send(&event));

        transport.set_connected(false);
        assert!(!transport.send(&event));
        assert!(transport.connect().await.is_err());

        transport.set_connected(true);
        transport.set_send_failures(true);
        assert!(!transport.send(&event));

        transport.set_send_failures(false);
        assert!(transport.send(&event));
        assert_eq!(transport.sent_events().len(), 2);
    }

    #[tokio::test]
    async fn test_inbound_events_reach_subscribers() {
        let transport = ChannelTransport::new();
        let mut rx = transport.subscribe();

        transport.push_inbound(SyncEvent::new(
            "update",
            "violation",
            "v-9",
            json!({"status": "open"}),
            "server",
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.entity_key(), "violation:v-9");
    }
}
