use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Lifetime + per-day processed/failed counters, as kept at
/// `stat:processed[:YYYY-MM-DD]` / `stat:failed[:YYYY-MM-DD]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub processed: u64,
    pub failed: u64,
    pub processed_today: u64,
    pub failed_today: u64,
}

/// Which counter an execution outcome should bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Sizes of the time-indexed and terminal sets, for the metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetSizes {
    pub scheduled: u64,
    pub retry: u64,
    pub dead: u64,
}

/// Narrow façade over the key/value backend (Redis or a Redis-protocol
/// compatible store). Every operation that touches more than one key is
/// required to be atomic against the backend — see the `sidejob-redis`
/// implementation, which uses Lua scripting for this.
///
/// Payloads cross this boundary as the raw JSON text that goes out on the
/// wire; parsing that text into a [`crate::message::Message`] (and
/// rejecting malformed payloads) is the caller's job, not the Store's —
/// the Store only ever moves bytes between keys.
///
/// `inflight_key` is always the full per-process in-flight list key
/// (`<namespace><identity>:<pid>:<tag>:inprogress`); callers (the
/// [`crate::fetcher::Fetcher`], [`crate::manager::Manager`]) own identity
/// formatting, the Store just treats it as an opaque key.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Backend-specific error type (e.g. `redis::RedisError`).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Idempotently register `queue` in the set of known queues.
    async fn create_queue(&self, queue: &str) -> Result<(), Self::Error>;

    /// Enqueue `payload`. If `at` is `Some`, it is scored into the
    /// one-shot `schedule` set instead of pushed to a live queue.
    async fn enqueue_message(
        &self,
        queue: &str,
        at: Option<f64>,
        payload: &str,
    ) -> Result<(), Self::Error>;

    /// Push straight to the tail of a live queue (used by the scheduled
    /// poller when promoting a due entry).
    async fn enqueue_message_now(&self, queue: &str, payload: &str) -> Result<(), Self::Error>;

    /// Add to the one-shot `schedule` set, scored at `at`.
    async fn enqueue_scheduled_message(&self, at: f64, payload: &str) -> Result<(), Self::Error>;

    /// Add to the `retry` set, scored at `at`.
    async fn enqueue_retried_message(&self, at: f64, payload: &str) -> Result<(), Self::Error>;

    /// Blocking move from the head of `queue` into `inflight_key`. `Ok(None)`
    /// means the call timed out with nothing available (not an error).
    async fn dequeue_message(
        &self,
        queue: &str,
        inflight_key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, Self::Error>;

    /// Atomically pop one entry from `schedule` scored `<= now`.
    async fn dequeue_scheduled_message(&self, now: f64) -> Result<Option<String>, Self::Error>;

    /// Atomically pop one entry from `retry` scored `<= now`.
    async fn dequeue_retried_message(&self, now: f64) -> Result<Option<String>, Self::Error>;

    /// Remove this exact payload from `inflight_key`.
    async fn ack_inflight(&self, inflight_key: &str, payload: &str) -> Result<(), Self::Error>;

    /// Insert only if no `unique:<queue>:<hash>` key exists yet; sets that
    /// key with `ttl`. Returns whether this call was the one that enqueued.
    async fn enqueue_unique_message(
        &self,
        queue: &str,
        unique_hash: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error>;

    /// Bury a message whose retry budget is exhausted: insert into `dead`
    /// scored at `now`, then trim to the bounded cap and max age.
    async fn bury(&self, payload: &str, now: f64) -> Result<(), Self::Error>;

    /// Publish/refresh this process's heartbeat hash and processes-set
    /// membership, along with the messages it currently has in flight.
    async fn publish_heartbeat(
        &self,
        identity: &str,
        info: &Value,
        beat: f64,
        quiet: bool,
        inflight: &[String],
    ) -> Result<(), Self::Error>;

    /// Remove the heartbeat hash and drop this identity from the processes set.
    async fn remove_heartbeat(&self, identity: &str) -> Result<(), Self::Error>;

    /// Bump the lifetime and per-day processed/failed counters.
    async fn increment_stats(&self, outcome: Outcome) -> Result<(), Self::Error>;

    /// Snapshot the lifetime and today's processed/failed counters.
    async fn get_stats(&self) -> Result<Stats, Self::Error>;

    /// Move every message sitting in `inflight_key` back to the head of
    /// `queue`. Called at startup with the previous run's identity.
    async fn requeue(&self, inflight_key: &str, queue: &str) -> Result<usize, Self::Error>;

    /// Every queue name currently known (via `queues`).
    async fn known_queues(&self) -> Result<Vec<String>, Self::Error>;

    /// Length of a live queue.
    async fn queue_len(&self, queue: &str) -> Result<u64, Self::Error>;

    /// Sizes of the scheduled/retry/dead sets.
    async fn set_sizes(&self) -> Result<SetSizes, Self::Error>;
}
