//! Connection (C4): per-socket state machine and the bounded, drop-newest
//! outbound queue that decouples a slow client from the hub that feeds it.
//!
//! Grounded on the split sender/receiver/heartbeat task layout of the
//! teacher's `realtime/websocket.rs`, with the unbounded `BroadcastStream`
//! fan-out replaced by a per-connection bounded `mpsc` channel and an
//! explicit drop-newest backpressure policy (the teacher relied on
//! broadcast's own lagged-receiver semantics, which drops the *oldest*
//! buffered item instead).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Dialed,
    Authenticated,
    Joined,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message {
        conversation_id: Uuid,
        message_id: i64,
        sender_id: Uuid,
        content: String,
        ts: DateTime<Utc>,
    },
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    Presence {
        user_id: Uuid,
        online: bool,
    },
    Notification {
        payload: serde_json::Value,
    },
    Error {
        code: &'static str,
        message: String,
    },
    Pong,
}

/// A registered connection's send side, held by the hub. Cloning is cheap;
/// the mpsc sender is the only shared state.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    sender: mpsc::Sender<OutboundEvent>,
}

impl ConnectionHandle {
    pub fn new(conn_id: Uuid, user_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                conn_id,
                user_id,
                sender,
            },
            receiver,
        )
    }

    /// Enqueues an event for delivery. Under backpressure (the bounded
    /// channel is full) the newest event is dropped rather than blocking the
    /// hub's single mailbox loop on a slow reader.
    pub fn send(&self, event: OutboundEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(event) {
            metrics::counter!("ws_backpressure_drops_total", 1);
            tracing::debug!(conn_id = %self.conn_id, "dropping outbound event: queue full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_newest_without_blocking() {
        let (handle, mut rx) = ConnectionHandle::new(Uuid::new_v4(), Uuid::new_v4(), 1);
        handle.send(OutboundEvent::Pong);
        handle.send(OutboundEvent::Pong); // queue full, dropped
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
