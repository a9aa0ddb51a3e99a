use std::time::Instant;

use async_trait::async_trait;
use log::{error, info};

use super::{Middleware, NextFn};
use crate::error::Error;
use crate::message::Message;

/// Logs the start and outcome of processing a message. Registered
/// outermost by default, so its span covers retry scheduling too.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn call(&self, msg: Message, next: NextFn) -> Result<(), Error> {
        let jid = msg.jid().to_string();
        let class = msg.class().to_string();
        let queue = msg.queue().to_string();
        info!(target: "sidejob::job", "start jid={jid} class={class} queue={queue}");
        let start = Instant::now();
        let result = next(msg).await;
        let elapsed = start.elapsed();
        match &result {
            Ok(()) => {
                info!(
                    target: "sidejob::job",
                    "done jid={jid} class={class} queue={queue} elapsed_ms={}",
                    elapsed.as_millis()
                );
            }
            Err(err) => {
                error!(
                    target: "sidejob::job",
                    "fail jid={jid} class={class} queue={queue} elapsed_ms={} error_class={} error={err}",
                    elapsed.as_millis(),
                    err.kind()
                );
            }
        }
        result
    }
}
