//! Key naming, centralized so every operation in `lib.rs` applies the
//! namespace prefix the same way. See §3/§6 of the wire spec for the
//! literal key forms.

use chrono::Utc;

#[derive(Clone, Debug)]
pub(crate) struct Keys {
    namespace: String,
}

impl Keys {
    pub(crate) fn new(namespace: String) -> Self {
        Self { namespace }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    fn prefixed(&self, key: impl std::fmt::Display) -> String {
        format!("{}{}", self.namespace, key)
    }

    pub(crate) fn queue(&self, name: &str) -> String {
        self.prefixed(format_args!("queue:{name}"))
    }

    pub(crate) fn queues_set(&self) -> String {
        self.prefixed("queues")
    }

    pub(crate) fn schedule_set(&self) -> String {
        self.prefixed("schedule")
    }

    pub(crate) fn retry_set(&self) -> String {
        self.prefixed("retry")
    }

    pub(crate) fn dead_set(&self) -> String {
        self.prefixed("dead")
    }

    pub(crate) fn process_hash(&self, identity: &str) -> String {
        self.prefixed(format_args!("processes:{identity}"))
    }

    pub(crate) fn processes_set(&self) -> String {
        self.prefixed("processes")
    }

    pub(crate) fn stat_processed(&self) -> String {
        self.prefixed("stat:processed")
    }

    pub(crate) fn stat_failed(&self) -> String {
        self.prefixed("stat:failed")
    }

    pub(crate) fn stat_processed_today(&self) -> String {
        self.prefixed(format_args!("stat:processed:{}", today()))
    }

    pub(crate) fn stat_failed_today(&self) -> String {
        self.prefixed(format_args!("stat:failed:{}", today()))
    }

    pub(crate) fn unique(&self, queue: &str, hash: &str) -> String {
        self.prefixed(format_args!("unique:{queue}:{hash}"))
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
