use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::heartbeat::{Heartbeat, ProcessInfo};
use crate::identity::Identity;
use crate::inflight::InFlightRegistry;
use crate::message::now_f64;
use crate::middleware::{Chain, LoggingMiddleware, Middleware, NextFn, RetryMiddleware, StatsMiddleware};
use crate::poller::ScheduledPoller;
use crate::producer::Producer;
use crate::store::Store;
use crate::worker_pool::{catch_panic, WorkerPool};

struct Registration {
    queue: String,
    concurrency: usize,
    chain: Arc<Chain>,
}

/// Owns every moving part described in §4.11: the Store, the Producer, the
/// registered queue/handler pairs, the scheduled poller, the heartbeat, and
/// every queue's Fetcher. `Manager::run` is the only entry point that
/// actually drives the system; everything before it is registration.
pub struct Manager<S: Store> {
    store: Arc<S>,
    config: ManagerConfig,
    producer: Producer<S>,
    identity: Identity,
    registrations: Vec<Registration>,
    quiet: Arc<AtomicBool>,
    inflight: InFlightRegistry,
    started_at: f64,
}

impl<S: Store> Manager<S> {
    /// New: validate options, construct the Store handle and Producer.
    pub fn new(store: S, config: ManagerConfig) -> Result<Self, Error> {
        config.validate()?;
        let store = Arc::new(store);
        let identity = Identity::for_process(config.process_id());
        Ok(Self {
            producer: Producer::new(store.clone()),
            store,
            identity,
            config,
            registrations: Vec::new(),
            quiet: Arc::new(AtomicBool::new(false)),
            inflight: InFlightRegistry::new(),
            started_at: now_f64(),
        })
    }

    pub fn producer(&self) -> &Producer<S> {
        &self.producer
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Read-only counters snapshot for the embedding process (§6's "API
    /// surface"): every counter [`crate::metrics::snapshot`] reads from the
    /// `Store`, with `in_flight` filled in from this process's own
    /// [`InFlightRegistry`] — a per-process quantity no `Store` call can see.
    pub async fn metrics(&self) -> Result<crate::metrics::Snapshot, S::Error> {
        let mut snapshot = crate::metrics::snapshot(self.store.as_ref()).await?;
        for (queue, metrics) in snapshot.queues.iter_mut() {
            metrics.in_flight = self.inflight.len_for_queue(queue).await as u64;
        }
        Ok(snapshot)
    }

    /// Register a queue/handler pair. `middlewares` are layered innermost,
    /// between the built-in stats middleware and the handler itself — the
    /// default order (logging wraps retry wraps stats wraps the user
    /// function) always wins the outer slots, per §4.5.
    pub fn add_worker(
        &mut self,
        queue: impl Into<String>,
        concurrency: usize,
        handler: NextFn,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) {
        let mut chain_middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(LoggingMiddleware::new()),
            Arc::new(RetryMiddleware::new(self.store.clone())),
            Arc::new(StatsMiddleware::new(self.store.clone())),
        ];
        chain_middlewares.extend(middlewares);
        let chain = Arc::new(Chain::new(chain_middlewares, catch_panic(handler)));
        self.registrations.push(Registration { queue: queue.into(), concurrency, chain });
    }

    /// The full in-flight key for one queue: `<namespace><identity>:<queue>:inprogress`.
    ///
    /// §3/§4.1 specify the literal form `<namespace><identity>:<pid>:<tag>:inprogress`,
    /// but `Identity` (see [`crate::identity`]) already embeds the pid, and the only
    /// sense in which `Store::requeue(inflight_key, queue)` can pair a key with a
    /// single queue is if each Fetcher owns a distinct key — so the `tag` slot is
    /// resolved here to the queue name rather than carried as a separate config knob.
    fn inflight_key(&self, queue: &str) -> String {
        self.config.namespaced(&format!("{}:{queue}:inprogress", self.identity))
    }

    fn process_info(&self) -> ProcessInfo {
        let hostname = gethostname::gethostname().into_string().unwrap_or_else(|_| "unknown".into());
        ProcessInfo {
            hostname,
            pid: std::process::id(),
            started_at: self.started_at,
            queues: self.registrations.iter().map(|r| r.queue.clone()).collect(),
            concurrency: self.registrations.iter().map(|r| r.concurrency).sum(),
            tag: self.config.tag().map(str::to_string),
            labels: Vec::new(),
            identity: self.identity.to_string(),
        }
    }

    /// Run until `shutdown` is tripped, then Quiesce → Stop, then return.
    ///
    /// Internally, a second token gates the long-running loops (Fetchers,
    /// poller, heartbeat): it stays live through Quiescing (so the poller
    /// and heartbeat keep working, per §4.11) and is only cancelled once
    /// the Stopping grace period elapses.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), Error> {
        let loops_cancel = CancellationToken::new();

        // Running: recovery first, then start everything.
        for reg in &self.registrations {
            let key = self.inflight_key(&reg.queue);
            match self.store.requeue(&key, &reg.queue).await {
                Ok(0) => {}
                Ok(n) => info!(target: "sidejob::manager", "recovered {n} in-flight message(s) on queue={} for identity={}", reg.queue, self.identity),
                Err(e) => warn!(target: "sidejob::manager", "recovery requeue failed for queue={}: {e}", reg.queue),
            }
        }

        let heartbeat = Heartbeat::new(
            self.store.clone(),
            self.process_info(),
            self.quiet.clone(),
            self.inflight.clone(),
            loops_cancel.clone(),
        );
        if let Err(e) = heartbeat.start().await {
            warn!(target: "sidejob::manager", "failed to publish initial heartbeat: {e}");
        }

        let poller = ScheduledPoller::new(self.store.clone(), self.config.poll_interval(), loops_cancel.clone());

        let mut join_set = tokio::task::JoinSet::new();
        join_set.spawn(async move { heartbeat.run().await });
        join_set.spawn(async move { poller.run().await });

        for reg in &self.registrations {
            let pool = WorkerPool::new(reg.concurrency);
            let fetcher = Fetcher::new(
                self.store.clone(),
                reg.queue.clone(),
                self.inflight_key(&reg.queue),
                pool,
                reg.chain.clone(),
                self.quiet.clone(),
                loops_cancel.clone(),
                self.inflight.clone(),
            );
            join_set.spawn(async move { fetcher.run().await });
        }

        // Block here until the caller trips shutdown.
        shutdown.cancelled().await;

        // Quiescing: stop admitting new work; poller and heartbeat keep running.
        info!(target: "sidejob::manager", "quiescing identity={}", self.identity);
        self.quiet.store(true, Ordering::SeqCst);

        // Stopping: wait up to ShutdownTimeout for in-flight handlers to drain.
        let deadline = self.config.shutdown_timeout();
        let poll_every = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while self.inflight.len().await > 0 && waited < deadline {
            tokio::time::sleep(poll_every).await;
            waited += poll_every;
        }
        let remaining = self.inflight.len().await;
        if remaining > 0 {
            warn!(
                target: "sidejob::manager",
                "shutdown timeout elapsed with {remaining} message(s) still in flight for identity={}; left in place for next start to recover",
                self.identity
            );
        }

        // Stopping the loops drives the heartbeat's own Quiet → Stopped
        // transition (it removes its own heartbeat record as it exits).
        loops_cancel.cancel();
        while join_set.join_next().await.is_some() {}

        info!(target: "sidejob::manager", "stopped identity={}", self.identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::middleware::handler_fn;
    use crate::test_support::MemoryStore;

    /// S1: Producer.Enqueue("default", "Echo", ["hi", 7]) is picked up by a
    /// registered handler, which sees the same class/args, and `processed`
    /// increments by 1.
    #[tokio::test]
    async fn s1_enqueue_is_processed_and_counted() {
        let store = MemoryStore::new();
        let mut manager = Manager::new(store.clone(), ManagerConfig::new("s1-worker")).unwrap();

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        manager.add_worker(
            "default",
            1,
            handler_fn(move |msg| {
                let seen = seen_clone.clone();
                async move {
                    *seen.lock().unwrap() = Some((msg.class().to_string(), msg.args().to_vec()));
                    Ok(())
                }
            }),
            Vec::new(),
        );

        manager
            .producer()
            .enqueue("default", "Echo", vec![Value::from("hi"), Value::from(7)])
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let run = tokio::spawn(manager.run(shutdown_clone));

        wait_until(|| async { seen.lock().unwrap().is_some() }).await;

        shutdown.cancel();
        run.await.unwrap().unwrap();

        let (class, args) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(class, "Echo");
        assert_eq!(args, vec![Value::from("hi"), Value::from(7)]);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
    }

    /// S6: concurrency 2 with 5 queued messages never runs more than 2
    /// handlers at once; on shutdown signal, everything in flight drains
    /// within `ShutdownTimeout`.
    #[tokio::test]
    async fn s6_bounded_concurrency_never_exceeds_the_configured_limit() {
        let store = MemoryStore::new();
        let mut manager = Manager::new(store.clone(), ManagerConfig::new("s6-worker")).unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));

        let in_flight_clone = in_flight.clone();
        let max_observed_clone = max_observed.clone();
        let completed_clone = completed.clone();
        let gate_clone = gate.clone();
        manager.add_worker(
            "q1",
            2,
            handler_fn(move |_msg| {
                let in_flight = in_flight_clone.clone();
                let max_observed = max_observed_clone.clone();
                let completed = completed_clone.clone();
                let gate = gate_clone.clone();
                async move {
                    let now = in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    max_observed.fetch_max(now, AtomicOrdering::SeqCst);
                    let _ = gate.acquire().await.unwrap();
                    in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
                    completed.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            }),
            Vec::new(),
        );

        for i in 0..5 {
            manager.producer().enqueue("q1", "Work", vec![Value::from(i)]).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let run = tokio::spawn(manager.run(shutdown_clone));

        wait_until(|| {
            let max_observed = max_observed.clone();
            async move { max_observed.load(AtomicOrdering::SeqCst) == 2 }
        })
        .await;
        assert_eq!(max_observed.load(AtomicOrdering::SeqCst), 2);

        gate.add_permits(5);
        wait_until(|| {
            let completed = completed.clone();
            async move { completed.load(AtomicOrdering::SeqCst) == 5 }
        })
        .await;

        shutdown.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(max_observed.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn metrics_reports_in_flight_counts_from_this_processs_registry() {
        let store = MemoryStore::new();
        let manager = Manager::new(store, ManagerConfig::new("metrics-worker")).unwrap();
        manager.producer().enqueue("default", "Echo", vec![]).await.unwrap();

        let before = manager.metrics().await.unwrap();
        assert_eq!(before.queues["default"].enqueued, 1);
        assert_eq!(before.queues["default"].in_flight, 0);

        manager.inflight.insert(crate::message::Message::new("Echo", "default", vec![])).await;
        let after = manager.metrics().await.unwrap();
        assert_eq!(after.queues["default"].in_flight, 1);
    }

    async fn wait_until<F, Fut>(mut predicate: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if predicate().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true within the test timeout");
    }
}
