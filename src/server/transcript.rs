//! In-memory transcript of every broadcast message
//!
//! Append-only for the life of the server. New participants receive a
//! point-in-time snapshot before they become visible to the fan-out, so a
//! snapshot never needs deduplication against live delivery.

use tokio::sync::RwLock;

use crate::protocol::Message;

/// Ordered history of admitted messages
#[derive(Debug, Default)]
pub struct Transcript {
    messages: RwLock<Vec<Message>>,
}

impl Transcript {
    /// Create an empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Only the dispatcher writes here.
    pub async fn append(&self, msg: Message) {
        self.messages.write().await.push(msg);
    }

    /// Point-in-time copy of the history, in admission order.
    ///
    /// No sender filter: a rejoining participant sees their own prior
    /// messages in the replay.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// Number of messages admitted so far
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// True if no message has been admitted yet
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
