use std::time::Duration;

/// Manager configuration. Connection options (`ServerAddr`, `Password`,
/// `Database`, `PoolSize`, `TLSConfig`, `SentinelAddrs`, `MasterName`) are
/// not modeled here — they belong to the concrete `Store` (e.g.
/// `sidejob-redis::RedisStore::connect`), which this crate never constructs
/// directly.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    process_id: String,
    namespace: String,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    tag: Option<String>,
}

impl ManagerConfig {
    /// `process_id` is required and must be unique per process; it forms
    /// part of the process identity alongside hostname and a random suffix.
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            namespace: String::new(),
            poll_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(8),
            tag: None,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn set_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Validate required options, producing a `config-error` if missing.
    pub(crate) fn validate(&self) -> Result<(), crate::error::Error> {
        if self.process_id.trim().is_empty() {
            return Err(crate::error::Error::Config(
                "ProcessID is required and must be non-empty".into(),
            ));
        }
        Ok(())
    }

    /// Prefix `key` with the namespace, the way every backend key is formed.
    pub fn namespaced(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.namespace, key)
        }
    }
}
