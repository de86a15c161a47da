//! Connection registry and outbound delivery.
//!
//! Every live connection gets a [`ConnectionId`] and an unbounded outbound
//! queue. The transport task (the node's WebSocket handler, or a test)
//! drains the queue and writes frames; the relay only ever enqueues. A
//! send to a connection that is gone is logged and dropped, never an
//! error for the caller, so fan-out to one side can't fail the other.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::ConnectionId;

use super::envelope::ServerMessage;

/// Something for the transport to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame.
    Frame(String),
    /// Close the connection with this code. Nothing follows a close.
    Close { code: u16, reason: String },
}

pub struct ConnectionRouter {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
}

impl ConnectionRouter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
        }
    }

    /// Register a new connection. The receiver is the transport's outbound
    /// queue.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        debug!(connection_id = %id, "connection registered");
        (id, rx)
    }

    /// Forget a connection. Returns whether it was still registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Serialize and enqueue a message. Returns whether it was enqueued.
    pub fn send(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(frame) => self.push(id, Outbound::Frame(frame)),
            Err(e) => {
                warn!(connection_id = %id, action = message.action(), error = %e, "failed to serialize message");
                false
            }
        }
    }

    /// Send the same message to each connection independently.
    pub fn fan_out(&self, recipients: &[ConnectionId], message: &ServerMessage) -> usize {
        recipients
            .iter()
            .filter(|id| self.send(**id, message))
            .count()
    }

    /// Enqueue a close frame and forget the connection.
    pub fn close(&self, id: ConnectionId, code: u16, reason: &str) -> bool {
        let sent = self.push(
            id,
            Outbound::Close {
                code,
                reason: reason.to_string(),
            },
        );
        self.unregister(id);
        sent
    }

    /// Close every connection. Used on shutdown.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.close(*id, code, reason))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn push(&self, id: ConnectionId, outbound: Outbound) -> bool {
        let Some(tx) = self.connections.get(&id).map(|e| e.value().clone()) else {
            debug!(connection_id = %id, "dropping message for unknown connection");
            return false;
        };
        if tx.send(outbound).is_err() {
            warn!(connection_id = %id, "outbound queue closed, dropping message");
            return false;
        }
        true
    }
}

impl Default for ConnectionRouter {
    fn default() -> Self {
        Self::new()
    }
}
