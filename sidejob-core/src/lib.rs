//! Worker runtime for a Sidekiq-wire-compatible background job processor.
//!
//! This crate is backend-agnostic: it is driven entirely through the
//! [`store::Store`] trait. `sidejob-redis` is the Redis-backed
//! implementation; tests here exercise an in-memory fake behind the
//! `test-utils` feature (see [`test_support`]).
//!
//! Wiring a process together looks like:
//!
//! ```ignore
//! let store = sidejob_redis::RedisStore::connect("redis://localhost").await?;
//! let mut manager = Manager::new(store, ManagerConfig::new("worker-1"))?;
//! manager.add_worker("default", 10, handler_fn(|msg| async move { Ok(()) }), vec![]);
//! manager.run(shutdown_token).await?;
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod args;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod heartbeat;
pub mod identity;
pub mod inflight;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod middleware;
pub mod poller;
pub mod producer;
pub mod store;
pub mod worker_pool;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use fetcher::Fetcher;
pub use heartbeat::{Heartbeat, HeartbeatState, ProcessInfo};
pub use identity::Identity;
pub use manager::Manager;
pub use message::{Message, RetryPolicy};
pub use metrics::{QueueMetrics, Snapshot};
pub use middleware::{handler_fn, BoxFuture, Chain, Middleware, NextFn};
pub use poller::ScheduledPoller;
pub use producer::Producer;
pub use store::{Outcome, SetSizes, Stats, Store};
pub use worker_pool::WorkerPool;
