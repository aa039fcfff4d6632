//! Topic-keyed in-process event bus.
//!
//! A thin wrapper over `tokio::sync::broadcast` channels, one per topic.
//! Senders are created lazily when the first subscriber arrives and pruned
//! when a publish finds nobody listening. Ordering is per-topic FIFO only;
//! slow subscribers observe `Lagged` and must treat redelivery as idempotent.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

/// A topic-keyed broadcast bus carrying messages of type `E`.
pub struct EventBus<E: Clone> {
    buffer: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<E>>>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus. `buffer` is the per-topic backlog for slow subscribers.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic. The receiver sees messages published after this
    /// call; earlier messages are not replayed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<E> {
        let mut topics = self.topics.write().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Publish a message to a topic. Returns the number of receivers reached;
    /// a topic with no subscribers is a no-op.
    pub fn publish(&self, topic: &str, message: E) -> usize {
        let delivered = {
            let topics = self.topics.read().unwrap();
            match topics.get(topic) {
                Some(tx) => tx.send(message).unwrap_or(0),
                None => return 0,
            }
        };

        if delivered == 0 {
            // Last receiver went away; drop the sender so the map stays small.
            let mut topics = self.topics.write().unwrap();
            if let Some(tx) = topics.get(topic) {
                if tx.receiver_count() == 0 {
                    topics.remove(topic);
                    tracing::debug!(topic, "pruned idle topic");
                }
            }
        }

        delivered
    }

    /// Number of topics with a live sender.
    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}
