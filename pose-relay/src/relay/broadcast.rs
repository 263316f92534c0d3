//! Broadcast engine
//!
//! An envelope is serialized exactly once and the resulting bytes are shared
//! by every recipient's outbound queue. Sends never wait: a closed connection
//! is skipped and a full queue drops the frame for that recipient only.
//! Backlog drops are logged; `messages_dropped` counts rate limiting alone.
//!
//! # Example
//!
//! ```rust,ignore
//! let delivered = broadcaster.fan_out(room.members(), &envelope, Some(&sender_id));
//! ```

use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};

use crate::ids::SessionId;
use crate::metrics::Metrics;
use crate::relay::connection::{ConnectionHandle, Delivery, SessionHandle};
use crate::relay::protocol::ServerMessage;

/// Writes envelopes to connection queues and counts what went out
#[derive(Debug, Clone)]
pub struct Broadcaster {
    metrics: Arc<Metrics>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    fn encode(message: &ServerMessage) -> Option<Utf8Bytes> {
        match message.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "Failed to serialize envelope");
                None
            }
        }
    }

    /// Send one envelope to one connection
    pub fn send_to(&self, connection: &ConnectionHandle, message: &ServerMessage) -> Delivery {
        let Some(bytes) = Self::encode(message) else {
            return Delivery::Closed;
        };
        let delivery = connection.deliver(Message::Text(bytes));
        match delivery {
            Delivery::Sent => self.metrics.messages_sent(1),
            Delivery::Backlogged => tracing::warn!(
                connection_id = %connection.id(),
                kind = message.kind(),
                "Outbound queue full, dropping frame"
            ),
            Delivery::Closed => {}
        }
        delivery
    }

    /// Send one envelope to every open recipient except `exclude`.
    ///
    /// Returns the number of recipients the frame was queued for.
    pub fn fan_out<'a, I>(
        &self,
        recipients: I,
        message: &ServerMessage,
        exclude: Option<&SessionId>,
    ) -> usize
    where
        I: IntoIterator<Item = &'a SessionHandle>,
    {
        let Some(bytes) = Self::encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        for recipient in recipients {
            if exclude == Some(&recipient.id) || !recipient.connection.is_open() {
                continue;
            }
            match recipient.connection.deliver(Message::Text(bytes.clone())) {
                Delivery::Sent => delivered += 1,
                Delivery::Backlogged => tracing::warn!(
                    session_id = %recipient.id,
                    kind = message.kind(),
                    "Outbound queue full, dropping frame"
                ),
                Delivery::Closed => {}
            }
        }

        self.metrics.messages_sent(delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DeviceClass;
    use tokio::sync::mpsc;

    fn member(name: &str, capacity: usize) -> (SessionHandle, mpsc::Receiver<Message>) {
        let (connection, rx) = ConnectionHandle::channel(capacity);
        let handle = SessionHandle {
            id: SessionId::from_requested(name).unwrap(),
            device: DeviceClass::Mobile,
            connection,
        };
        (handle, rx)
    }

    fn text(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_fan_out_reaches_everyone() {
        let metrics = Arc::new(Metrics::new());
        let broadcaster = Broadcaster::new(Arc::clone(&metrics));
        let (a, mut rx_a) = member("a", 4);
        let (b, mut rx_b) = member("b", 4);

        let sent = broadcaster.fan_out([&a, &b], &ServerMessage::error("hello"), None);

        assert_eq!(sent, 2);
        assert_eq!(text(&mut rx_a)["message"], "hello");
        assert_eq!(text(&mut rx_b)["message"], "hello");
        assert_eq!(metrics.snapshot().messages_sent, 2);
    }

    #[test]
    fn test_fan_out_skips_excluded_sender() {
        let broadcaster = Broadcaster::new(Arc::new(Metrics::new()));
        let (a, mut rx_a) = member("a", 4);
        let (b, mut rx_b) = member("b", 4);

        let sent = broadcaster.fan_out([&a, &b], &ServerMessage::error("x"), Some(&a.id));

        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(text(&mut rx_b)["type"], "error");
    }

    #[test]
    fn test_fan_out_skips_closed_connections_silently() {
        let broadcaster = Broadcaster::new(Arc::new(Metrics::new()));
        let (a, rx_a) = member("a", 4);
        let (b, mut rx_b) = member("b", 4);
        drop(rx_a);

        let sent = broadcaster.fan_out([&a, &b], &ServerMessage::error("x"), None);

        assert_eq!(sent, 1);
        assert_eq!(text(&mut rx_b)["type"], "error");
    }

    #[test]
    fn test_slow_peer_does_not_block_others() {
        let broadcaster = Broadcaster::new(Arc::new(Metrics::new()));
        let (slow, _rx_slow) = member("slow", 1);
        let (fast, mut rx_fast) = member("fast", 8);

        for _ in 0..3 {
            broadcaster.fan_out([&slow, &fast], &ServerMessage::error("tick"), None);
        }

        for _ in 0..3 {
            assert_eq!(text(&mut rx_fast)["message"], "tick");
        }
    }

    #[test]
    fn test_backlog_drop_is_not_counted_as_sent_or_dropped() {
        let metrics = Arc::new(Metrics::new());
        let broadcaster = Broadcaster::new(Arc::clone(&metrics));
        let (slow, _rx_slow) = member("slow", 1);
        let (fast, _rx_fast) = member("fast", 8);

        assert_eq!(broadcaster.fan_out([&slow, &fast], &ServerMessage::error("1"), None), 2);
        assert_eq!(broadcaster.fan_out([&slow, &fast], &ServerMessage::error("2"), None), 1);
        assert_eq!(
            broadcaster.send_to(&slow.connection, &ServerMessage::error("3")),
            Delivery::Backlogged
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 3);
        assert_eq!(snapshot.messages_dropped, 0);
    }

    #[test]
    fn test_send_to_single() {
        let broadcaster = Broadcaster::new(Arc::new(Metrics::new()));
        let (a, mut rx_a) = member("a", 4);

        let delivery = broadcaster.send_to(&a.connection, &ServerMessage::error("direct"));

        assert_eq!(delivery, Delivery::Sent);
        assert_eq!(text(&mut rx_a)["message"], "direct");
    }
}
