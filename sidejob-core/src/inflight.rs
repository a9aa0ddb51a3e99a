use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::message::Message;

/// The set of messages this process currently has in flight, shared across
/// every [`crate::fetcher::Fetcher`] so the heartbeat can publish an
/// accurate snapshot and the metrics snapshot can report `in_flight` counts.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<HashMap<String, Message>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, msg: Message) {
        self.inner.lock().await.insert(msg.jid().to_string(), msg);
    }

    pub async fn remove(&self, jid: &str) {
        self.inner.lock().await.remove(jid);
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Count of in-flight messages destined for a particular queue.
    pub async fn len_for_queue(&self, queue: &str) -> usize {
        self.inner.lock().await.values().filter(|m| m.queue() == queue).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_remove_and_len_for_queue_track_membership_per_queue() {
        let registry = InFlightRegistry::new();
        let a = Message::new("Echo", "default", vec![]);
        let b = Message::new("Echo", "critical", vec![]);
        registry.insert(a.clone()).await;
        registry.insert(b.clone()).await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.len_for_queue("default").await, 1);
        assert_eq!(registry.len_for_queue("critical").await, 1);
        assert_eq!(registry.len_for_queue("other").await, 0);

        registry.remove(a.jid()).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.len_for_queue("default").await, 0);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].jid(), b.jid());
    }
}
