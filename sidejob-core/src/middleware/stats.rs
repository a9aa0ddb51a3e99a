use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use super::{Middleware, NextFn};
use crate::error::Error;
use crate::message::Message;
use crate::store::{Outcome, Store};

/// Increments `processed`/`failed` counters (lifetime and per-day) for
/// every execution attempt. Registered innermost of the built-in
/// middlewares by default, so it counts the post-retry-decision outcome:
/// a failure is counted here exactly once per attempt, independent of
/// whether the retry middleware went on to schedule a retry.
pub struct StatsMiddleware<S: Store> {
    store: Arc<S>,
}

impl<S: Store> StatsMiddleware<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store> Middleware for StatsMiddleware<S> {
    async fn call(&self, msg: Message, next: NextFn) -> Result<(), Error> {
        let result = next(msg).await;
        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };
        if let Err(e) = self.store.increment_stats(outcome).await {
            warn!(target: "sidejob::stats", "failed to record stats: {e}");
        }
        result
    }
}
