use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::message::{now_f64, Message};
use crate::store::Store;

/// Write-side API for enqueuing messages: immediate, delayed, or
/// per-queue unique. Every variant fails with `encode-error` on
/// unserializable arguments and `backend-error` on a Store failure.
pub struct Producer<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Producer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Enqueue for immediate processing. Returns the job id.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
    ) -> Result<String, Error> {
        let msg = Message::new(class, queue, args);
        let jid = msg.jid().to_string();
        self.store
            .create_queue(queue)
            .await
            .map_err(Error::backend)?;
        self.store
            .enqueue_message(queue, None, &msg.to_json())
            .await
            .map_err(Error::backend)?;
        Ok(jid)
    }

    /// Enqueue to run no sooner than `delay` from now.
    pub async fn enqueue_in(
        &self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        delay: Duration,
    ) -> Result<String, Error> {
        self.enqueue_at(queue, class, args, now_f64() + delay.as_secs_f64()).await
    }

    /// Enqueue to run no sooner than the given epoch-seconds timestamp.
    pub async fn enqueue_at(
        &self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        at: f64,
    ) -> Result<String, Error> {
        let msg = Message::new_at(class, queue, args, at);
        let jid = msg.jid().to_string();
        self.store
            .enqueue_message(queue, Some(at), &msg.to_json())
            .await
            .map_err(Error::backend)?;
        Ok(jid)
    }

    /// Enqueue only if no job with the same `(class, args, queue)` has been
    /// enqueued within the last `ttl`. Returns `(jid, enqueued)`.
    pub async fn enqueue_unique(
        &self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        ttl: Duration,
    ) -> Result<(String, bool), Error> {
        let hash = unique_hash(class, &args, queue)?;
        let msg = Message::new(class, queue, args);
        let jid = msg.jid().to_string();
        self.store
            .create_queue(queue)
            .await
            .map_err(Error::backend)?;
        let enqueued = self
            .store
            .enqueue_unique_message(queue, &hash, &msg.to_json(), ttl)
            .await
            .map_err(Error::backend)?;
        Ok((jid, enqueued))
    }
}

/// `SHA-256(class NUL canonical(args) NUL queue)`, hex-encoded.
/// `canonical(args)` is the args array serialized with no whitespace and
/// object keys left in their input order (enabled by `serde_json`'s
/// `preserve_order` feature, without which a `BTreeMap`-backed `Map` would
/// silently re-sort keys and change the hash).
fn unique_hash(class: &str, args: &[Value], queue: &str) -> Result<String, Error> {
    let canonical = serde_json::to_string(args).map_err(|e| Error::Encode(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(class.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hasher.update([0u8]);
    hasher.update(queue.as_bytes());
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_hash_is_stable_for_identical_input() {
        let a = unique_hash("Echo", &[Value::from("hi"), Value::from(7)], "default").unwrap();
        let b = unique_hash("Echo", &[Value::from("hi"), Value::from(7)], "default").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn unique_hash_differs_on_queue_or_args() {
        let base = unique_hash("Echo", &[Value::from("hi")], "default").unwrap();
        let other_queue = unique_hash("Echo", &[Value::from("hi")], "critical").unwrap();
        let other_args = unique_hash("Echo", &[Value::from("bye")], "default").unwrap();
        assert_ne!(base, other_queue);
        assert_ne!(base, other_args);
    }
}
