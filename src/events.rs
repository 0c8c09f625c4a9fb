//! Decoupled event bus for bridge lifecycle notifications.
//!
//! Components emit events via [`EventBus::emit`] and subscribe via
//! [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`], whose send
//! never blocks, so the execution thread can emit without waiting.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::journal::LateCompletion;

/// Events that flow out of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The listener is bound and accepting.
    Started { addr: SocketAddr },
    /// A waiter gave up on its job and answered 504.
    WaitTimedOut { job_id: u64, path: String },
    /// The driver published an outcome nobody was waiting for anymore.
    LateCompletion(LateCompletion),
    /// The bridge stopped; `drained` queued jobs were answered with 503.
    Stopped { drained: usize },
}

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Returns a receiver that yields all
    /// future events (does not replay past ones).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}
