use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};
use rand::Rng;

use super::{Middleware, NextFn};
use crate::error::Error;
use crate::message::{now_f64, Message, RetryPolicy};
use crate::store::Store;

/// `base(n) = n^4 + 15`, the deterministic part of the retry backoff.
pub fn base_delay_seconds(n: u32) -> f64 {
    (n as f64).powi(4) + 15.0
}

/// `base(n) + jitter`, `jitter` uniform in `[0, 30)`.
pub fn retry_delay_seconds(n: u32) -> f64 {
    let jitter: f64 = rand::thread_rng().gen_range(0.0..30.0);
    base_delay_seconds(n) + jitter
}

/// Decides, on handler failure, whether to bury a message or reschedule it
/// with exponential-with-jitter backoff. Always re-raises the original
/// error so the stats middleware still counts the attempt as failed.
pub struct RetryMiddleware<S: Store> {
    store: Arc<S>,
}

impl<S: Store> RetryMiddleware<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store> Middleware for RetryMiddleware<S> {
    async fn call(&self, msg: Message, next: NextFn) -> Result<(), Error> {
        let mut msg = msg;
        let result = next(msg.clone()).await;
        if let Err(err) = &result {
            match msg.retry_policy() {
                RetryPolicy::Disabled => {
                    // do not schedule, do not bump retry_count
                }
                policy => {
                    let max = policy.max_attempts().expect("non-Disabled policy has a cap");
                    let n = msg.retry_count();
                    let now = now_f64();
                    if n >= max {
                        msg.record_failure(err.kind(), err.message(), now);
                        if let Err(store_err) = self.store.bury(&msg.to_json(), now).await {
                            error!(target: "sidejob::retry", "failed to bury jid={}: {store_err}", msg.jid());
                        }
                    } else {
                        msg.record_failure(err.kind(), err.message(), now);
                        let delay = retry_delay_seconds(n);
                        if let Err(store_err) = self
                            .store
                            .enqueue_retried_message(now + delay, &msg.to_json())
                            .await
                        {
                            warn!(target: "sidejob::retry", "failed to schedule retry for jid={}: {store_err}", msg.jid());
                        }
                    }
                }
            }
        }
        result
    }
}
