/// A process's stable identity: `<hostname>:<pid>:<process_id>`.
///
/// `process_id` comes straight from [`crate::config::ManagerConfig`] — the
/// spec requires it be "unique per process" and doubles as the identity
/// suffix, which is what makes crash recovery work: a restarted process
/// that reuses the same `ProcessID` (and, in practice, runs under the same
/// pid — e.g. pid 1 in a restarted container) gets back the exact identity
/// its previous run published, so [`crate::manager::Manager`] can find and
/// requeue that run's leftover in-flight list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    /// Derive this process's identity from its hostname, pid, and the
    /// configured `ProcessID`.
    pub fn for_process(process_id: &str) -> Self {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "unknown".to_string());
        let pid = std::process::id();
        Identity(format!("{hostname}:{pid}:{process_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_embeds_hostname_pid_and_process_id() {
        let id = Identity::for_process("worker-1");
        let parts: Vec<&str> = id.as_str().splitn(3, ':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], std::process::id().to_string());
        assert_eq!(parts[2], "worker-1");
    }

    #[test]
    fn same_process_id_in_same_process_yields_the_same_identity() {
        let a = Identity::for_process("worker-1");
        let b = Identity::for_process("worker-1");
        assert_eq!(a, b);
    }
}
