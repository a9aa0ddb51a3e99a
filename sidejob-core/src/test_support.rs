//! An in-memory [`Store`] for tests that need a working backend without a
//! Redis instance. Not wire-compatible with anything — it only has to
//! satisfy the same contract the trait documents, so unit tests elsewhere
//! in this crate (and in downstream crates, via the `test-utils` feature)
//! can exercise the Fetcher/Producer/poller/Manager against something real
//! without a network dependency.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::store::{Outcome, SetSizes, Stats, Store};

#[derive(Debug, Clone, thiserror::Error)]
#[error("memory store error: {0}")]
pub struct MemoryError(String);

#[derive(Default)]
struct Inner {
    queues: HashMap<String, Vec<String>>,
    known_queues: HashSet<String>,
    schedule: Vec<(f64, String)>,
    retry: Vec<(f64, String)>,
    dead: Vec<(f64, String)>,
    inflight: HashMap<String, Vec<String>>,
    unique_keys: HashMap<String, Instant>,
    heartbeats: HashMap<String, (Value, f64, bool)>,
    processes: HashSet<String>,
    stats_processed: u64,
    stats_failed: u64,
    stats_processed_today: u64,
    stats_failed_today: u64,
}

/// A single-process, in-memory stand-in for a real backend.
///
/// `dequeue_message` does not actually block on `timeout`: it checks the
/// queue once and returns `Ok(None)` immediately if empty, since tests
/// control ordering explicitly (enqueue before dequeue) rather than racing
/// a producer against a blocked consumer.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a live queue's contents, head first. Test-only helper,
    /// not part of the `Store` contract.
    pub async fn queue_snapshot(&self, queue: &str) -> Vec<String> {
        self.inner.lock().await.queues.get(queue).cloned().unwrap_or_default()
    }

    pub async fn dead_snapshot(&self) -> Vec<String> {
        self.inner.lock().await.dead.iter().map(|(_, p)| p.clone()).collect()
    }

    pub async fn retry_snapshot(&self) -> Vec<(f64, String)> {
        self.inner.lock().await.retry.clone()
    }

    pub async fn inflight_snapshot(&self, inflight_key: &str) -> Vec<String> {
        self.inner.lock().await.inflight.get(inflight_key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Error = MemoryError;

    async fn create_queue(&self, queue: &str) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.known_queues.insert(queue.to_string());
        inner.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn enqueue_message(
        &self,
        queue: &str,
        at: Option<f64>,
        payload: &str,
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        match at {
            Some(at) => inner.schedule.push((at, payload.to_string())),
            None => {
                inner.known_queues.insert(queue.to_string());
                inner.queues.entry(queue.to_string()).or_default().push(payload.to_string());
            }
        }
        Ok(())
    }

    async fn enqueue_message_now(&self, queue: &str, payload: &str) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.known_queues.insert(queue.to_string());
        inner.queues.entry(queue.to_string()).or_default().push(payload.to_string());
        Ok(())
    }

    async fn enqueue_scheduled_message(&self, at: f64, payload: &str) -> Result<(), Self::Error> {
        self.inner.lock().await.schedule.push((at, payload.to_string()));
        Ok(())
    }

    async fn enqueue_retried_message(&self, at: f64, payload: &str) -> Result<(), Self::Error> {
        self.inner.lock().await.retry.push((at, payload.to_string()));
        Ok(())
    }

    async fn dequeue_message(
        &self,
        queue: &str,
        inflight_key: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, Self::Error> {
        let mut inner = self.inner.lock().await;
        let Some(list) = inner.queues.get_mut(queue) else {
            return Ok(None);
        };
        if list.is_empty() {
            return Ok(None);
        }
        let payload = list.remove(0);
        inner.inflight.entry(inflight_key.to_string()).or_default().push(payload.clone());
        Ok(Some(payload))
    }

    async fn dequeue_scheduled_message(&self, now: f64) -> Result<Option<String>, Self::Error> {
        pop_due(&mut self.inner.lock().await.schedule, now)
    }

    async fn dequeue_retried_message(&self, now: f64) -> Result<Option<String>, Self::Error> {
        pop_due(&mut self.inner.lock().await.retry, now)
    }

    async fn ack_inflight(&self, inflight_key: &str, payload: &str) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        if let Some(list) = inner.inflight.get_mut(inflight_key) {
            if let Some(pos) = list.iter().position(|p| p == payload) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn enqueue_unique_message(
        &self,
        queue: &str,
        unique_hash: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.lock().await;
        let key = format!("unique:{queue}:{unique_hash}");
        let now = Instant::now();
        let live = inner.unique_keys.get(&key).is_some_and(|expiry| *expiry > now);
        if live {
            return Ok(false);
        }
        inner.unique_keys.insert(key, now + ttl);
        inner.known_queues.insert(queue.to_string());
        inner.queues.entry(queue.to_string()).or_default().push(payload.to_string());
        Ok(true)
    }

    async fn bury(&self, payload: &str, now: f64) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.dead.push((now, payload.to_string()));
        const MAX_DEAD: usize = 10_000;
        const MAX_AGE_SECS: f64 = 180.0 * 24.0 * 60.0 * 60.0;
        inner.dead.retain(|(scored_at, _)| now - scored_at <= MAX_AGE_SECS);
        if inner.dead.len() > MAX_DEAD {
            let excess = inner.dead.len() - MAX_DEAD;
            inner.dead.drain(0..excess);
        }
        Ok(())
    }

    async fn publish_heartbeat(
        &self,
        identity: &str,
        info: &Value,
        beat: f64,
        quiet: bool,
        _inflight: &[String],
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.heartbeats.insert(identity.to_string(), (info.clone(), beat, quiet));
        inner.processes.insert(identity.to_string());
        Ok(())
    }

    async fn remove_heartbeat(&self, identity: &str) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.heartbeats.remove(identity);
        inner.processes.remove(identity);
        Ok(())
    }

    async fn increment_stats(&self, outcome: Outcome) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        match outcome {
            Outcome::Success => {
                inner.stats_processed += 1;
                inner.stats_processed_today += 1;
            }
            Outcome::Failure => {
                inner.stats_failed += 1;
                inner.stats_failed_today += 1;
            }
        }
        Ok(())
    }

    async fn get_stats(&self) -> Result<Stats, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(Stats {
            processed: inner.stats_processed,
            failed: inner.stats_failed,
            processed_today: inner.stats_processed_today,
            failed_today: inner.stats_failed_today,
        })
    }

    async fn requeue(&self, inflight_key: &str, queue: &str) -> Result<usize, Self::Error> {
        let mut inner = self.inner.lock().await;
        let Some(list) = inner.inflight.remove(inflight_key) else {
            return Ok(0);
        };
        let count = list.len();
        let dest = inner.queues.entry(queue.to_string()).or_default();
        for payload in list.into_iter().rev() {
            dest.insert(0, payload);
        }
        Ok(count)
    }

    async fn known_queues(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.inner.lock().await.known_queues.iter().cloned().collect())
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, Self::Error> {
        Ok(self.inner.lock().await.queues.get(queue).map(|q| q.len() as u64).unwrap_or(0))
    }

    async fn set_sizes(&self) -> Result<SetSizes, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(SetSizes {
            scheduled: inner.schedule.len() as u64,
            retry: inner.retry.len() as u64,
            dead: inner.dead.len() as u64,
        })
    }
}

fn pop_due(set: &mut Vec<(f64, String)>, now: f64) -> Result<Option<String>, MemoryError> {
    let Some(pos) = set.iter().position(|(at, _)| *at <= now) else {
        return Ok(None);
    };
    Ok(Some(set.remove(pos).1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips_the_payload() {
        let store = MemoryStore::new();
        let msg = Message::new("Echo", "default", vec![Value::from("hi")]);
        store.create_queue("default").await.unwrap();
        store.enqueue_message("default", None, &msg.to_json()).await.unwrap();
        let dequeued = store
            .dequeue_message("default", "id:default:inprogress", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dequeued, msg.to_json());
        assert_eq!(store.inflight_snapshot("id:default:inprogress").await, vec![dequeued.clone()]);
        store.ack_inflight("id:default:inprogress", &dequeued).await.unwrap();
        assert!(store.inflight_snapshot("id:default:inprogress").await.is_empty());
    }

    #[tokio::test]
    async fn scheduled_entries_are_only_due_at_or_after_their_score() {
        let store = MemoryStore::new();
        store.enqueue_scheduled_message(100.0, "a").await.unwrap();
        assert_eq!(store.dequeue_scheduled_message(50.0).await.unwrap(), None);
        assert_eq!(store.dequeue_scheduled_message(100.0).await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn unique_enqueue_only_succeeds_once_within_ttl() {
        let store = MemoryStore::new();
        let first = store
            .enqueue_unique_message("default", "hash1", "payload", Duration::from_secs(60))
            .await
            .unwrap();
        let second = store
            .enqueue_unique_message("default", "hash1", "payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(store.queue_len("default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn requeue_moves_inflight_entries_back_to_the_head_of_their_queue() {
        let store = MemoryStore::new();
        store.enqueue_message_now("default", "existing").await.unwrap();
        store
            .dequeue_message("default", "id:default:inprogress", Duration::from_secs(1))
            .await
            .unwrap();
        store.enqueue_message_now("default", "other").await.unwrap();
        let recovered = store.requeue("id:default:inprogress", "default").await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(store.queue_snapshot("default").await, vec!["existing", "other"]);
    }
}
