//! Broadcast message type.
//!
//! A message carries a payload serialized once and shared by every mailbox.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique message identifier.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique, increasing message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A message fanned out to subscribers.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Encoded payload (cheap to clone).
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(b"hello".to_vec());
        assert_eq!(&msg.payload[..], b"hello");
        assert!(msg.id > 0);
    }

    #[test]
    fn test_message_ids_increase() {
        let first = Message::new(Bytes::new());
        let second = Message::new(Bytes::new());
        assert!(second.id > first.id);
    }
}
