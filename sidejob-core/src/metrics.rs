//! Read-only counters snapshot exposed to the embedding process. This is
//! the data a metrics HTTP endpoint would serve; serving it is out of scope
//! here, building the snapshot is not.

use std::collections::BTreeMap;

use crate::store::Store;

/// Per-queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub in_flight: u64,
}

/// The full metrics snapshot described in the wire spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub queues: BTreeMap<String, QueueMetrics>,
    pub processed: u64,
    pub failed: u64,
    pub processed_today: u64,
    pub failed_today: u64,
    pub dead: u64,
    pub retry: u64,
    pub scheduled: u64,
}

/// Build a [`Snapshot`] by reading every counter the `Store` exposes.
///
/// `in_flight` is left at zero here: it is a per-process quantity (each
/// worker process only knows its own in-flight list), so the manager fills
/// it in from its own bookkeeping before handing the snapshot to callers.
pub async fn snapshot<S: Store>(store: &S) -> Result<Snapshot, S::Error> {
    let stats = store.get_stats().await?;
    let sets = store.set_sizes().await?;
    let queue_names = store.known_queues().await?;

    let mut queues = BTreeMap::new();
    for name in queue_names {
        let enqueued = store.queue_len(&name).await?;
        queues.insert(name, QueueMetrics { enqueued, in_flight: 0 });
    }

    Ok(Snapshot {
        queues,
        processed: stats.processed,
        failed: stats.failed,
        processed_today: stats.processed_today,
        failed_today: stats.failed_today,
        dead: sets.dead,
        retry: sets.retry,
        scheduled: sets.scheduled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Outcome, Store};
    use crate::test_support::MemoryStore;

    #[tokio::test]
    async fn snapshot_reads_every_counter_the_store_exposes() {
        let store = MemoryStore::new();
        store.create_queue("default").await.unwrap();
        store.enqueue_message_now("default", "payload-1").await.unwrap();
        store.enqueue_message_now("default", "payload-2").await.unwrap();
        store.enqueue_scheduled_message(100.0, "later").await.unwrap();
        store.increment_stats(Outcome::Success).await.unwrap();
        store.increment_stats(Outcome::Failure).await.unwrap();
        store.bury("dead-payload", 50.0).await.unwrap();

        let snapshot = snapshot(&store).await.unwrap();
        assert_eq!(snapshot.queues["default"].enqueued, 2);
        assert_eq!(snapshot.queues["default"].in_flight, 0);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.scheduled, 1);
        assert_eq!(snapshot.dead, 1);
    }
}
