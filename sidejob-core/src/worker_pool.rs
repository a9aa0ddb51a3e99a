use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Error;
use crate::message::Message;
use crate::middleware::{BoxFuture, NextFn};

/// Bounded concurrency for a single queue: `N` slots, configured at
/// registration. A [`Fetcher`](crate::fetcher::Fetcher) acquires a permit
/// before every dequeue and holds it until the handler chain has run.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("WorkerPool semaphore is never closed")
    }
}

/// Wrap the terminal handler so a panic inside it is recovered and turned
/// into a `panic`-kind [`Error`] instead of unwinding past the middleware
/// chain — the retry middleware needs to see it as an ordinary error to
/// decide whether to schedule a retry.
pub fn catch_panic(handler: NextFn) -> NextFn {
    Arc::new(move |msg: Message| {
        let handler = handler.clone();
        Box::pin(async move {
            match AssertUnwindSafe(handler(msg)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Error::Panic(describe_panic(payload))),
            }
        }) as BoxFuture<'static, Result<(), Error>>
    })
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;

    #[tokio::test]
    async fn catch_panic_converts_str_panic_to_panic_error() {
        let handler = handler_fn(|_msg| async move { panic!("X") });
        let wrapped = catch_panic(handler);
        let err = wrapped(Message::new("Boom", "default", vec![])).await.unwrap_err();
        assert_eq!(err.kind(), "panic");
        assert_eq!(err.to_string(), "handler panicked: X");
    }

    #[tokio::test]
    async fn catch_panic_passes_through_ok() {
        let handler = handler_fn(|_msg| async move { Ok(()) });
        let wrapped = catch_panic(handler);
        assert!(wrapped(Message::new("Echo", "default", vec![])).await.is_ok());
    }
}
