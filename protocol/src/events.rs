//! Relay lifecycle events.
//!
//! The protocol layer publishes these on a `tokio::sync::broadcast` channel.
//! The node subscribes to drive Prometheus metrics; tests subscribe to
//! observe timer-driven transitions without polling. Publishing never
//! blocks and never fails the operation that triggered it.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::session::{ConnectionId, SessionId};

/// Capacity of the event channel. Slow subscribers see `Lagged` rather
/// than slowing the relay down.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something observable happened inside the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    ConnectionOpened {
        connection_id: ConnectionId,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
    },
    SessionCreated {
        session_id: SessionId,
    },
    SessionJoined {
        session_id: SessionId,
    },
    SessionExpired {
        session_id: SessionId,
    },
    /// A tombstone reached the end of its retention window.
    SessionPurged {
        session_id: SessionId,
    },
    SubmissionStarted {
        session_id: SessionId,
    },
    SubmissionFinished {
        session_id: SessionId,
        success: bool,
        elapsed: Duration,
    },
    ProtocolViolation {
        connection_id: ConnectionId,
        code: &'static str,
    },
}

/// Cheap cloneable publisher. A bus with no subscribers swallows events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: RelayEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
