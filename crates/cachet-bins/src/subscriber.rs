//! Subscriber delivery capability.
//!
//! A bin holds subscribers only as [`SubscriberHandle`]s: a bounded channel
//! sender with a delivery deadline. The connection task owns the receiving
//! end and the underlying transport, so routing state and transport state
//! never reference each other.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::message::Message;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// How long one delivery may block before the subscriber is considered dead.
const SEND_DEADLINE: Duration = Duration::from_secs(5);

/// A failed delivery to one subscriber.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber queue closed")]
    Closed,

    #[error("subscriber send deadline elapsed")]
    Timeout,
}

/// Capability to deliver one message to a subscribed client.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    tx: mpsc::Sender<Message>,
}

impl SubscriberHandle {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Create a handle together with the receiver the owning connection
    /// drains.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { tx }, rx)
    }

    /// Deliver one message, bounded by the send deadline.
    pub async fn send(&self, msg: Message) -> Result<(), DeliveryError> {
        self.tx.send_timeout(msg, SEND_DEADLINE).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
            SendTimeoutError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (handle, mut rx) = SubscriberHandle::channel(4);

        handle.send(Message::new(1, "m", vec![])).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.message_id, "m");
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_fails() {
        let (handle, rx) = SubscriberHandle::channel(4);
        drop(rx);

        let result = handle.send(Message::new(1, "m", vec![])).await;
        assert!(matches!(result, Err(DeliveryError::Closed)));
    }
}
