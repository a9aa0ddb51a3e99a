//! Redis [`Store`](sidejob_core::Store) implementation: a Sidekiq-wire-compatible
//! backend over a Redis-protocol connection.
//!
//! Keys are formed exactly as §3/§6 of the wire spec describe them:
//! `<namespace>queue:<name>`, `<namespace>queues`, `<namespace>schedule`,
//! `<namespace>retry`, `<namespace>dead`, `<namespace>processes:<identity>`,
//! `<namespace>processes`, `<namespace>stat:processed[:YYYY-MM-DD]`,
//! `<namespace>stat:failed[:YYYY-MM-DD]`, `<namespace>unique:<queue>:<hash>`.
//! Every multi-key operation is a Lua script (`lua/*.lua`, embedded at
//! compile time) so it runs atomically against the server.

use std::time::Duration;

use async_trait::async_trait;
use log::*;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo, RedisError, Script};
use serde_json::Value;
use sidejob_core::store::{Outcome, SetSizes, Stats, Store};

mod keys;

use keys::Keys;

/// Pre-compiled Lua scripts for the operations that touch more than one key.
#[derive(Clone, Debug)]
struct Scripts {
    bury: Script,
    enqueue_now: Script,
    heartbeat: Script,
    increment_stats: Script,
    pop_due: Script,
    remove_heartbeat: Script,
    requeue: Script,
    unique_enqueue: Script,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            bury: Script::new(include_str!("../lua/bury.lua")),
            enqueue_now: Script::new(include_str!("../lua/enqueue_now.lua")),
            heartbeat: Script::new(include_str!("../lua/heartbeat.lua")),
            increment_stats: Script::new(include_str!("../lua/increment_stats.lua")),
            pop_due: Script::new(include_str!("../lua/pop_due.lua")),
            remove_heartbeat: Script::new(include_str!("../lua/remove_heartbeat.lua")),
            requeue: Script::new(include_str!("../lua/requeue.lua")),
            unique_enqueue: Script::new(include_str!("../lua/unique_enqueue.lua")),
        }
    }
}

/// Bounded cap and max age for the dead set, per §4.6/§6.
const DEAD_SET_MAX_ENTRIES: u64 = 10_000;
const DEAD_SET_MAX_AGE_SECS: f64 = 180.0 * 24.0 * 60.0 * 60.0;

/// A Redis-backed [`Store`]. Cheap to clone: the underlying
/// [`ConnectionManager`] is a shared, auto-reconnecting multiplexed
/// connection, so there is no traditional connection pool to size — one
/// `RedisStore` handles arbitrary concurrent callers.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: Keys,
    scripts: Scripts,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("namespace", &self.keys.namespace()).finish()
    }
}

impl RedisStore {
    /// Connect to `addr` (any form `redis::IntoConnectionInfo` accepts —
    /// `redis://[:password@]host[:port][/db]`, or a `ConnectionInfo` you
    /// built yourself for TLS/Sentinel) and apply `namespace` to every key.
    pub async fn connect<A: IntoConnectionInfo>(
        addr: A,
        namespace: impl Into<String>,
    ) -> Result<Self, RedisError> {
        let client = Client::open(addr.into_connection_info()?)?;
        let conn = client.get_connection_manager().await.map_err(|e| {
            error!("failed to establish redis connection manager: {e}");
            e
        })?;
        info!("connected to redis");
        Ok(Self::from_connection_manager(conn, namespace))
    }

    /// Wrap an already-established [`ConnectionManager`] — e.g. one built
    /// through a Sentinel-aware `redis::sentinel::SentinelClient`, which
    /// this crate does not construct directly.
    pub fn from_connection_manager(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self { conn, keys: Keys::new(namespace.into()), scripts: Scripts::default() }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl Store for RedisStore {
    type Error = RedisError;

    async fn create_queue(&self, queue: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(self.keys.queues_set(), queue).await
    }

    async fn enqueue_message(
        &self,
        queue: &str,
        at: Option<f64>,
        payload: &str,
    ) -> Result<(), Self::Error> {
        match at {
            Some(at) => self.enqueue_scheduled_message(at, payload).await,
            None => self.enqueue_message_now(queue, payload).await,
        }
    }

    async fn enqueue_message_now(&self, queue: &str, payload: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        self.scripts
            .enqueue_now
            .key(self.keys.queue(queue))
            .key(self.keys.queues_set())
            .arg(queue)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
    }

    async fn enqueue_scheduled_message(&self, at: f64, payload: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(self.keys.schedule_set(), payload, at).await
    }

    async fn enqueue_retried_message(&self, at: f64, payload: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(self.keys.retry_set(), payload, at).await
    }

    async fn dequeue_message(
        &self,
        queue: &str,
        inflight_key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, Self::Error> {
        let mut conn = self.conn();
        // BLMOVE atomically pops the head of `queue` and pushes it to the
        // tail of `inflight_key`, so a process that dies between the pop
        // and bookkeeping never silently drops the message.
        let result: Option<String> = redis::cmd("BLMOVE")
            .arg(self.keys.queue(queue))
            .arg(inflight_key)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }

    async fn dequeue_scheduled_message(&self, now: f64) -> Result<Option<String>, Self::Error> {
        self.pop_due(self.keys.schedule_set(), now).await
    }

    async fn dequeue_retried_message(&self, now: f64) -> Result<Option<String>, Self::Error> {
        self.pop_due(self.keys.retry_set(), now).await
    }

    async fn ack_inflight(&self, inflight_key: &str, payload: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        conn.lrem::<_, _, ()>(inflight_key, 1, payload).await
    }

    async fn enqueue_unique_message(
        &self,
        queue: &str,
        unique_hash: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let mut conn = self.conn();
        let enqueued: i64 = self
            .scripts
            .unique_enqueue
            .key(self.keys.unique(queue, unique_hash))
            .key(self.keys.queue(queue))
            .key(self.keys.queues_set())
            .arg(ttl.as_secs().max(1))
            .arg(payload)
            .arg(queue)
            .invoke_async(&mut conn)
            .await?;
        Ok(enqueued == 1)
    }

    async fn bury(&self, payload: &str, now: f64) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        self.scripts
            .bury
            .key(self.keys.dead_set())
            .arg(now)
            .arg(payload)
            .arg(DEAD_SET_MAX_AGE_SECS)
            .arg(DEAD_SET_MAX_ENTRIES)
            .invoke_async(&mut conn)
            .await
    }

    async fn publish_heartbeat(
        &self,
        identity: &str,
        info: &Value,
        beat: f64,
        quiet: bool,
        inflight: &[String],
    ) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        let info_json = serde_json::to_string(info).unwrap_or_else(|_| "{}".to_string());
        let inflight_json = serde_json::to_string(inflight).unwrap_or_else(|_| "[]".to_string());
        self.scripts
            .heartbeat
            .key(self.keys.process_hash(identity))
            .key(self.keys.processes_set())
            .arg(identity)
            .arg(info_json)
            .arg(beat)
            .arg(if quiet { "1" } else { "0" })
            .arg(inflight_json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!("failed to publish heartbeat for {identity}: {e}");
                e
            })
    }

    async fn remove_heartbeat(&self, identity: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        self.scripts
            .remove_heartbeat
            .key(self.keys.process_hash(identity))
            .key(self.keys.processes_set())
            .arg(identity)
            .invoke_async(&mut conn)
            .await
    }

    async fn increment_stats(&self, outcome: Outcome) -> Result<(), Self::Error> {
        let mut conn = self.conn();
        let (lifetime, today) = match outcome {
            Outcome::Success => (self.keys.stat_processed(), self.keys.stat_processed_today()),
            Outcome::Failure => (self.keys.stat_failed(), self.keys.stat_failed_today()),
        };
        self.scripts.increment_stats.key(lifetime).key(today).invoke_async(&mut conn).await
    }

    async fn get_stats(&self) -> Result<Stats, Self::Error> {
        let mut conn = self.conn();
        let (processed, failed, processed_today, failed_today): (
            Option<u64>,
            Option<u64>,
            Option<u64>,
            Option<u64>,
        ) = redis::pipe()
            .get(self.keys.stat_processed())
            .get(self.keys.stat_failed())
            .get(self.keys.stat_processed_today())
            .get(self.keys.stat_failed_today())
            .query_async(&mut conn)
            .await?;
        Ok(Stats {
            processed: processed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            processed_today: processed_today.unwrap_or(0),
            failed_today: failed_today.unwrap_or(0),
        })
    }

    async fn requeue(&self, inflight_key: &str, queue: &str) -> Result<usize, Self::Error> {
        let mut conn = self.conn();
        self.scripts
            .requeue
            .key(inflight_key)
            .key(self.keys.queue(queue))
            .invoke_async(&mut conn)
            .await
    }

    async fn known_queues(&self) -> Result<Vec<String>, Self::Error> {
        let mut conn = self.conn();
        conn.smembers(self.keys.queues_set()).await
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, Self::Error> {
        let mut conn = self.conn();
        conn.llen(self.keys.queue(queue)).await
    }

    async fn set_sizes(&self) -> Result<SetSizes, Self::Error> {
        let mut conn = self.conn();
        let (scheduled, retry, dead): (u64, u64, u64) = redis::pipe()
            .zcard(self.keys.schedule_set())
            .zcard(self.keys.retry_set())
            .zcard(self.keys.dead_set())
            .query_async(&mut conn)
            .await?;
        Ok(SetSizes { scheduled, retry, dead })
    }
}

impl RedisStore {
    async fn pop_due(&self, key: String, now: f64) -> Result<Option<String>, RedisError> {
        let mut conn = self.conn();
        self.scripts.pop_due.key(key).arg(now).invoke_async(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_apply_namespace_consistently() {
        let keys = Keys::new("myapp:".to_string());
        assert_eq!(keys.queue("default"), "myapp:queue:default");
        assert_eq!(keys.queues_set(), "myapp:queues");
        assert_eq!(keys.schedule_set(), "myapp:schedule");
        assert_eq!(keys.retry_set(), "myapp:retry");
        assert_eq!(keys.dead_set(), "myapp:dead");
        assert_eq!(keys.process_hash("host:1:abcd1234"), "myapp:processes:host:1:abcd1234");
        assert_eq!(keys.processes_set(), "myapp:processes");
        assert_eq!(keys.unique("default", "deadbeef"), "myapp:unique:default:deadbeef");
    }

    #[test]
    fn keys_with_empty_namespace_do_not_prefix() {
        let keys = Keys::new(String::new());
        assert_eq!(keys.queue("default"), "queue:default");
        assert_eq!(keys.stat_processed(), "stat:processed");
    }

    #[test]
    fn stat_keys_carry_todays_date_suffix() {
        let keys = Keys::new(String::new());
        let today = keys.stat_processed_today();
        assert!(today.starts_with("stat:processed:"));
        assert_eq!(today.len(), "stat:processed:".len() + "YYYY-MM-DD".len());
    }
}
