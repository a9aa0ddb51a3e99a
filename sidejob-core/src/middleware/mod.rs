//! The middleware pipeline: a fixed, registration-ordered chain of
//! cross-cutting wrappers around the user job function.
//!
//! A middleware is "a function taking the next-in-chain function and
//! returning a function with the same signature `(Message) -> error`"
//! (the chain is invoked left to right with the user handler as the
//! terminal element). The default order — logging wraps retry wraps stats
//! wraps the user function — is built by [`Chain::new`] from a
//! registration-order `Vec`.

pub mod logging;
pub mod retry;
pub mod stats;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::message::Message;

pub use logging::LoggingMiddleware;
pub use retry::RetryMiddleware;
pub use stats::StatsMiddleware;

/// A boxed future, the shape every link in the chain deals in.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The next function in the chain (or, innermost, the user handler itself).
pub type NextFn = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// A single cross-cutting wrapper around the chain.
///
/// Implementations must not swallow the inner error: they may translate it,
/// but `call` has to propagate whatever it decides to return up the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, msg: Message, next: NextFn) -> Result<(), Error>;
}

/// Wrap a plain async closure as a [`NextFn`].
pub fn handler_fn<F, Fut>(f: F) -> NextFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)) as BoxFuture<'static, Result<(), Error>>)
}

/// The composed call chain: middlewares applied outer to inner, in
/// registration order, wrapping a terminal handler.
#[derive(Clone)]
pub struct Chain {
    entry: NextFn,
}

impl Chain {
    /// `middlewares` is given in registration (outermost-first) order, e.g.
    /// `[logging, retry, stats]` yields `logging(retry(stats(handler)))`.
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, handler: NextFn) -> Self {
        let mut next = handler;
        for mw in middlewares.into_iter().rev() {
            let inner = next;
            next = Arc::new(move |msg: Message| {
                let mw = mw.clone();
                let inner = inner.clone();
                Box::pin(async move { mw.call(msg, inner).await }) as BoxFuture<'static, Result<(), Error>>
            });
        }
        Chain { entry: next }
    }

    pub async fn run(&self, msg: Message) -> Result<(), Error> {
        (self.entry)(msg).await
    }
}
