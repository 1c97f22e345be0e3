//! Network reachability observer
//!
//! Raw connectivity samples (from the platform or the transport) pass
//! through a debouncer: a state must hold for the configured window before
//! a transition is emitted, so flapping connectivity fires nothing.
//! Committed transitions fan out over a watch channel, one notification per
//! transition.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Binary connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Online,
    Offline,
}

impl Reachability {
    pub fn is_online(self) -> bool {
        matches!(self, Reachability::Online)
    }
}

impl From<bool> for Reachability {
    fn from(online: bool) -> Self {
        if online {
            Reachability::Online
        } else {
            Reachability::Offline
        }
    }
}

/// Stable-for-window transition filter
///
/// Pure state machine: callers feed raw samples through [`offer`] and flush
/// matured pending states through [`poll`]; both return the committed
/// transition, if any.
///
/// [`offer`]: TransitionDebouncer::offer
/// [`poll`]: TransitionDebouncer::poll
pub struct TransitionDebouncer {
    current: Reachability,
    pending: Option<(Reachability, DateTime<Utc>)>,
    window: Duration,
}

impl TransitionDebouncer {
    pub fn new(initial: Reachability, window: Duration) -> Self {
        Self {
            current: initial,
            pending: None,
            window,
        }
    }

    /// The last committed state
    pub fn current(&self) -> Reachability {
        self.current
    }

    /// Feed a raw connectivity sample
    pub fn offer(&mut self, state: Reachability, now: DateTime<Utc>) -> Option<Reachability> {
        if state == self.current {
            // Flapped back before the window elapsed: no transition
            self.pending = None;
            return None;
        }

        match self.pending {
            Some((pending, _)) if pending == state => self.poll(now),
            _ => {
                self.pending = Some((state, now));
                self.poll(now)
            }
        }
    }

    /// Commit a pending state whose window has elapsed
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<Reachability> {
        let (pending, since) = self.pending?;
        let held = now.signed_duration_since(since);
        let window = chrono::Duration::from_std(self.window).ok()?;
        if held >= window {
            self.pending = None;
            self.current = pending;
            Some(pending)
        } else {
            None
        }
    }
}

/// Debounced reachability with watch-channel fan-out
pub struct ReachabilityObserver {
    debouncer: Mutex<TransitionDebouncer>,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Reachability>,
}

impl ReachabilityObserver {
    /// Create an observer seeded with the probed startup state
    pub fn new(initial: Reachability, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            debouncer: Mutex::new(TransitionDebouncer::new(initial, window)),
            clock,
            tx,
        }
    }

    /// The last committed state
    pub fn state(&self) -> Reachability {
        self.debouncer.lock().current()
    }

    /// Subscribe to committed transitions
    pub fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.tx.subscribe()
    }

    /// Ingest a raw connectivity sample
    pub fn report(&self, online: bool) {
        let now = self.clock.now();
        let transition = self.debouncer.lock().offer(online.into(), now);
        self.notify(transition);
    }

    /// Flush a matured pending state; called from the housekeeping tick
    pub fn tick(&self) {
        let now = self.clock.now();
        let transition = self.debouncer.lock().poll(now);
        self.notify(transition);
    }

    fn notify(&self, transition: Option<Reachability>) {
        if let Some(state) = transition {
            tracing::info!("Reachability transition: {:?}", state);
            let _ = self.tx.send(state);
        }
    }
}
