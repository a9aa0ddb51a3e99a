use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::message::{now_f64, Message};
use crate::store::Store;

/// One per Manager. On every tick, drains `schedule` then `retry` down to
/// empty, promoting each due entry straight to the head of its destination
/// queue. Never loses a message between the zset pop and the queue push —
/// but can duplicate one if the process dies in between, which is the
/// documented compatibility tradeoff (§4.8's atomicity note: enqueue
/// strictly follows a successful dequeue, never the reverse).
pub struct ScheduledPoller<S: Store> {
    store: Arc<S>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<S: Store> ScheduledPoller<S> {
    pub fn new(store: Arc<S>, poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self { store, poll_interval, cancel }
    }

    /// Drive the tick loop until the cancellation token trips. Runs
    /// regardless of quiescence — §4.11 keeps the poller alive through
    /// Quiescing so already-scheduled work keeps flowing to its queue.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(jittered(self.poll_interval)) => {}
            }
            self.tick().await;
        }
    }

    /// Drain both time-indexed sets once. Exposed for tests that want to
    /// force a tick without waiting on the jittered sleep.
    pub async fn tick(&self) {
        self.drain_scheduled().await;
        self.drain_retried().await;
    }

    async fn drain_scheduled(&self) {
        loop {
            match self.store.dequeue_scheduled_message(now_f64()).await {
                Ok(Some(raw)) => self.promote(raw).await,
                Ok(None) => return,
                Err(e) => {
                    warn!(target: "sidejob::poller", "dequeue_scheduled_message failed: {e}");
                    return;
                }
            }
        }
    }

    async fn drain_retried(&self) {
        loop {
            match self.store.dequeue_retried_message(now_f64()).await {
                Ok(Some(raw)) => self.promote(raw).await,
                Ok(None) => return,
                Err(e) => {
                    warn!(target: "sidejob::poller", "dequeue_retried_message failed: {e}");
                    return;
                }
            }
        }
    }

    async fn promote(&self, raw: String) {
        let mut msg = match Message::from_json(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                error!(target: "sidejob::poller", "dropping malformed scheduled payload: {e} raw={raw:?}");
                return;
            }
        };
        msg.refresh_enqueued_at(now_f64());
        let queue = msg.queue().to_string();
        if let Err(e) = self.store.enqueue_message_now(&queue, &msg.to_json()).await {
            error!(target: "sidejob::poller", "failed to promote jid={} to queue={queue}: {e}", msg.jid());
        }
    }
}

/// `base`, jittered uniformly within ±50%.
fn jittered(base: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}
