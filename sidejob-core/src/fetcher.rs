use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio_util::sync::CancellationToken;

use crate::inflight::InFlightRegistry;
use crate::message::Message;
use crate::middleware::Chain;
use crate::store::{Outcome, Store};
use crate::worker_pool::WorkerPool;

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One per configured queue per process: blocking-pops `queue`, hands each
/// payload to a bounded [`WorkerPool`] slot running the registered
/// [`Chain`], and keeps the in-flight bookkeeping for crash recovery.
pub struct Fetcher<S: Store> {
    store: Arc<S>,
    queue: String,
    inflight_key: String,
    pool: WorkerPool,
    chain: Arc<Chain>,
    quiet: Arc<AtomicBool>,
    cancel: CancellationToken,
    inflight: InFlightRegistry,
}

impl<S: Store> Fetcher<S> {
    pub fn new(
        store: Arc<S>,
        queue: impl Into<String>,
        inflight_key: impl Into<String>,
        pool: WorkerPool,
        chain: Arc<Chain>,
        quiet: Arc<AtomicBool>,
        cancel: CancellationToken,
        inflight: InFlightRegistry,
    ) -> Self {
        Self {
            store,
            queue: queue.into(),
            inflight_key: inflight_key.into(),
            pool,
            chain,
            quiet,
            cancel,
            inflight,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Drive the fetch loop until the cancellation token trips. While
    /// `quiet` is set, new dequeues stop but already-running handlers (held
    /// by the worker pool's semaphore permits) are left to drain.
    pub async fn run(&self) {
        let mut backoff = MIN_BACKOFF;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            if self.quiet.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
                }
            }

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return,
                permit = self.pool.acquire() => permit,
            };

            if self.quiet.load(Ordering::SeqCst) {
                drop(permit);
                continue;
            }

            match self
                .store
                .dequeue_message(&self.queue, &self.inflight_key, DEQUEUE_TIMEOUT)
                .await
            {
                Ok(None) => {
                    drop(permit);
                }
                Ok(Some(raw)) => {
                    backoff = MIN_BACKOFF;
                    match Message::from_json(&raw) {
                        Ok(msg) => {
                            self.inflight.insert(msg.clone()).await;
                            let store = self.store.clone();
                            let chain = self.chain.clone();
                            let inflight_key = self.inflight_key.clone();
                            let registry = self.inflight.clone();
                            let jid = msg.jid().to_string();
                            tokio::spawn(async move {
                                let _permit = permit;
                                let _ = chain.run(msg.clone()).await;
                                if let Err(e) = store.ack_inflight(&inflight_key, &msg.to_json()).await {
                                    error!(target: "sidejob::fetcher", "ack_inflight failed for jid={jid}: {e}");
                                }
                                registry.remove(&jid).await;
                            });
                        }
                        Err(decode_err) => {
                            // §7: discarded, counted as failed, never retried.
                            error!(target: "sidejob::fetcher", "decode error on queue={}: {decode_err} raw={raw:?}", self.queue);
                            if let Err(e) = self.store.ack_inflight(&self.inflight_key, &raw).await {
                                error!(target: "sidejob::fetcher", "ack_inflight failed for malformed payload: {e}");
                            }
                            if let Err(e) = self.store.increment_stats(Outcome::Failure).await {
                                warn!(target: "sidejob::fetcher", "failed to record decode-error stat: {e}");
                            }
                            drop(permit);
                        }
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(target: "sidejob::fetcher", "dequeue error on queue={}: {e}, backing off {backoff:?}", self.queue);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::middleware::handler_fn;
    use crate::store::Store;
    use crate::test_support::MemoryStore;

    fn noop_chain() -> Arc<Chain> {
        Arc::new(Chain::new(Vec::new(), handler_fn(|_msg| async move { Ok(()) })))
    }

    /// A malformed payload is discarded from in-flight, counted as failed,
    /// and never retried — it never reappears in the queue.
    #[tokio::test]
    async fn malformed_payload_is_discarded_and_counted_as_failure() {
        let store = Arc::new(MemoryStore::new());
        store.create_queue("default").await.unwrap();
        store.enqueue_message_now("default", "not json").await.unwrap();

        let cancel = CancellationToken::new();
        let fetcher = Fetcher::new(
            store.clone(),
            "default",
            "inflight:key",
            WorkerPool::new(1),
            noop_chain(),
            Arc::new(AtomicBool::new(false)),
            cancel.clone(),
            InFlightRegistry::new(),
        );

        let run = tokio::spawn(async move { fetcher.run().await });
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        cancel.cancel();
        run.await.unwrap();

        assert!(store.inflight_snapshot("inflight:key").await.is_empty());
        assert_eq!(store.queue_len("default").await.unwrap(), 0);
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
    }

    /// While quiet, the fetcher stops issuing new dequeues — a message left
    /// on the queue is not picked up until quiet is cleared.
    #[tokio::test]
    async fn quiescent_fetcher_does_not_admit_new_work() {
        let store = Arc::new(MemoryStore::new());
        store.create_queue("default").await.unwrap();
        store.enqueue_message_now("default", r#"{"class":"Echo"}"#).await.unwrap();

        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();
        let chain = Arc::new(Chain::new(
            Vec::new(),
            handler_fn(move |_msg| {
                let processed = processed_clone.clone();
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ));

        let quiet = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let fetcher = Fetcher::new(
            store.clone(),
            "default",
            "inflight:quiet",
            WorkerPool::new(1),
            chain,
            quiet,
            cancel.clone(),
            InFlightRegistry::new(),
        );

        let run = tokio::spawn(async move { fetcher.run().await });
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        cancel.cancel();
        run.await.unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 0);
        assert_eq!(store.queue_len("default").await.unwrap(), 1);
    }
}
