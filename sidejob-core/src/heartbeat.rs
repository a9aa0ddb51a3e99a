use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::inflight::InFlightRegistry;
use crate::message::now_f64;
use crate::store::Store;

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// §4.10's state machine. `Heartbeat` itself only ever inhabits
/// Starting/Running/Quiet/Stopped in that order — there is no path back
/// from Quiet to Running, matching the Manager lifecycle that drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Starting,
    Running,
    Quiet,
    Stopped,
}

/// The static-for-the-process-lifetime fields of a heartbeat's `info` blob.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub hostname: String,
    pub pid: u32,
    pub started_at: f64,
    pub queues: Vec<String>,
    pub concurrency: usize,
    pub tag: Option<String>,
    pub labels: Vec<String>,
    pub identity: String,
}

impl ProcessInfo {
    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("hostname".into(), Value::String(self.hostname.clone()));
        map.insert("pid".into(), Value::from(self.pid));
        map.insert(
            "started_at".into(),
            serde_json::Number::from_f64(self.started_at)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        map.insert(
            "queues".into(),
            Value::Array(self.queues.iter().cloned().map(Value::String).collect()),
        );
        map.insert("concurrency".into(), Value::from(self.concurrency as u64));
        map.insert("tag".into(), self.tag.clone().map(Value::String).unwrap_or(Value::Null));
        map.insert(
            "labels".into(),
            Value::Array(self.labels.iter().cloned().map(Value::String).collect()),
        );
        map.insert("identity".into(), Value::String(self.identity.clone()));
        Value::Object(map)
    }
}

/// Publishes this process's liveness and in-flight snapshot on a 5s tick,
/// driving itself through §4.10's {Starting, Running, Quiet, Stopped}
/// states as it goes: `new` starts in `Starting`, `start`/`publish` settle
/// into `Running` or `Quiet` depending on the shared `quiet` flag the
/// Manager flips at `Quiesce()`, and `run` moves to `Stopped` once the
/// cancellation token trips and the heartbeat record has been removed.
pub struct Heartbeat<S: Store> {
    store: Arc<S>,
    identity: String,
    info: ProcessInfo,
    quiet: Arc<AtomicBool>,
    inflight: InFlightRegistry,
    cancel: CancellationToken,
    state: std::sync::Mutex<HeartbeatState>,
}

impl<S: Store> Heartbeat<S> {
    pub fn new(
        store: Arc<S>,
        info: ProcessInfo,
        quiet: Arc<AtomicBool>,
        inflight: InFlightRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            identity: info.identity.clone(),
            info,
            quiet,
            inflight,
            cancel,
            state: std::sync::Mutex::new(HeartbeatState::Starting),
        }
    }

    /// Current position in the §4.10 state machine.
    pub fn state(&self) -> HeartbeatState {
        *self.state.lock().unwrap()
    }

    /// Starting → Running (or → Quiet if already quiesced): emit the first
    /// heartbeat immediately so the process is visible to observers before
    /// the first 5s tick elapses.
    pub async fn start(&self) -> Result<(), S::Error> {
        self.publish().await
    }

    /// Drive the 5s refresh loop until the cancellation token trips, then
    /// remove the heartbeat record and settle in `Stopped`.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
            }
            if let Err(e) = self.publish().await {
                warn!(target: "sidejob::heartbeat", "failed to publish heartbeat: {e}");
            }
        }
        if let Err(e) = self.stop().await {
            warn!(target: "sidejob::heartbeat", "failed to remove heartbeat on stop: {e}");
        }
    }

    async fn publish(&self) -> Result<(), S::Error> {
        let beat = now_f64();
        let quiet = self.quiet.load(Ordering::SeqCst);
        *self.state.lock().unwrap() =
            if quiet { HeartbeatState::Quiet } else { HeartbeatState::Running };
        let inflight: Vec<String> =
            self.inflight.snapshot().await.iter().map(|msg| msg.to_json()).collect();
        self.store
            .publish_heartbeat(&self.identity, &self.info.to_json(), beat, quiet, &inflight)
            .await
    }

    /// Quiet → Stopped: remove the heartbeat hash and drop this identity
    /// from the processes set.
    pub async fn stop(&self) -> Result<(), S::Error> {
        let result = self.store.remove_heartbeat(&self.identity).await;
        if let Err(e) = &result {
            error!(target: "sidejob::heartbeat", "failed to remove heartbeat for identity={}: {e}", self.identity);
        }
        *self.state.lock().unwrap() = HeartbeatState::Stopped;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_info_json_carries_every_well_known_field() {
        let info = ProcessInfo {
            hostname: "host1".into(),
            pid: 42,
            started_at: 100.0,
            queues: vec!["default".into()],
            concurrency: 5,
            tag: Some("worker".into()),
            labels: vec!["gpu".into()],
            identity: "host1:42:worker-1".into(),
        };
        let json = info.to_json();
        assert_eq!(json["hostname"], Value::String("host1".into()));
        assert_eq!(json["pid"], Value::from(42));
        assert_eq!(json["queues"][0], Value::String("default".into()));
        assert_eq!(json["concurrency"], Value::from(5));
        assert_eq!(json["tag"], Value::String("worker".into()));
        assert_eq!(json["identity"], Value::String("host1:42:worker-1".into()));
    }

    #[test]
    fn process_info_json_nulls_absent_tag() {
        let info = ProcessInfo {
            hostname: "host1".into(),
            pid: 1,
            started_at: 0.0,
            queues: vec![],
            concurrency: 1,
            tag: None,
            labels: vec![],
            identity: "host1:1:w".into(),
        };
        assert_eq!(info.to_json()["tag"], Value::Null);
    }

    fn test_info() -> ProcessInfo {
        ProcessInfo {
            hostname: "host1".into(),
            pid: 1,
            started_at: 0.0,
            queues: vec!["default".into()],
            concurrency: 1,
            tag: None,
            labels: vec![],
            identity: "host1:1:test".into(),
        }
    }

    /// §4.10: Starting → Running on the first publish, Running → Quiet once
    /// the shared `quiet` flag is set, and Quiet → Stopped on `stop`.
    #[tokio::test]
    async fn state_moves_through_starting_running_quiet_stopped() {
        use crate::test_support::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let quiet = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let hb = Heartbeat::new(store, test_info(), quiet.clone(), InFlightRegistry::new(), cancel);

        assert_eq!(hb.state(), HeartbeatState::Starting);

        hb.start().await.unwrap();
        assert_eq!(hb.state(), HeartbeatState::Running);

        quiet.store(true, Ordering::SeqCst);
        hb.start().await.unwrap();
        assert_eq!(hb.state(), HeartbeatState::Quiet);

        hb.stop().await.unwrap();
        assert_eq!(hb.state(), HeartbeatState::Stopped);
    }

    /// `run` drives Quiet → Stopped itself once cancelled, removing the
    /// heartbeat record without the caller having to call `stop` separately.
    #[tokio::test]
    async fn run_settles_in_stopped_and_removes_the_heartbeat_on_cancel() {
        use crate::test_support::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let quiet = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let hb = Arc::new(Heartbeat::new(
            store.clone(),
            test_info(),
            quiet,
            InFlightRegistry::new(),
            cancel.clone(),
        ));
        hb.start().await.unwrap();

        let hb_clone = hb.clone();
        let run = tokio::spawn(async move { hb_clone.run().await });
        cancel.cancel();
        run.await.unwrap();

        assert_eq!(hb.state(), HeartbeatState::Stopped);
    }
}
