use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Number, Value};

use crate::error::Error;

/// How many times a message may be retried, decoded from its `retry` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// `retry: false` or absent — a failure is terminal, never scheduled.
    Disabled,
    /// `retry: true` — bounded at the default of 25 attempts.
    Default,
    /// `retry: <n>` — bounded at `n` attempts.
    Max(u32),
}

impl RetryPolicy {
    /// The effective attempt cap, or `None` if retries are disabled.
    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            RetryPolicy::Disabled => None,
            RetryPolicy::Default => Some(25),
            RetryPolicy::Max(n) => Some(*n),
        }
    }
}

/// Current wall-clock time as fractional seconds since the epoch.
///
/// Sidekiq encodes `created_at`/`enqueued_at`/`at` as decimal seconds
/// (e.g. `1712345678.123456789`); we keep the same representation so the
/// wire format round-trips with other-language producers/consumers.
pub fn now_f64() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1_000_000_000.0
}

/// A fresh 24-hex-character job id, the Sidekiq convention (12 random bytes).
pub fn new_jid() -> String {
    let bytes: [u8; 12] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The job envelope: a JSON object with well-known fields plus whatever
/// extra fields a producer or consumer chooses to stash on it.
///
/// Field values are never lossily re-encoded: integers stay
/// [`serde_json::Number`] integers, floats stay floats, because other
/// processes on the wire may be written in languages that care.
#[derive(Debug, Clone, PartialEq)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Build a fresh message ready for enqueuing. `created_at`/`enqueued_at`
    /// are stamped with the current time; `jid` is freshly generated.
    pub fn new(class: impl Into<String>, queue: impl Into<String>, args: Vec<Value>) -> Self {
        let now = now_f64();
        let mut map = Map::new();
        map.insert("jid".into(), Value::String(new_jid()));
        map.insert("class".into(), Value::String(class.into()));
        map.insert("queue".into(), Value::String(queue.into()));
        map.insert("args".into(), Value::Array(args));
        map.insert("created_at".into(), json_f64(now));
        map.insert("enqueued_at".into(), json_f64(now));
        Message(map)
    }

    /// Build a message scheduled for `at` (seconds since epoch); presence of
    /// the `at` field is what routes an enqueue to the scheduled set.
    pub fn new_at(class: impl Into<String>, queue: impl Into<String>, args: Vec<Value>, at: f64) -> Self {
        let mut msg = Self::new(class, queue, args);
        msg.set("at", json_f64(at));
        msg
    }

    /// Parse a message off the wire. Rejects malformed JSON or a payload
    /// missing `class`, per the Sidekiq decode contract.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| Error::Decode(format!("invalid JSON: {e}")))?;
        let map = match value {
            Value::Object(map) => map,
            _ => return Err(Error::Decode("payload is not a JSON object".into())),
        };
        if !map.contains_key("class") {
            return Err(Error::Decode("payload is missing `class`".into()));
        }
        Ok(Message(map))
    }

    /// Re-encode without reordering the fields as they currently stand.
    /// Field values keep their original numeric representation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&Value::Object(self.0.clone()))
            .expect("a Map<String, Value> always serializes")
    }

    /// Raw field access.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Raw field mutation.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// `jid`: always present once constructed via [`Message::new`] or parsed
    /// from a payload that had one.
    pub fn jid(&self) -> &str {
        self.0.get("jid").and_then(Value::as_str).unwrap_or("")
    }

    pub fn class(&self) -> &str {
        self.0.get("class").and_then(Value::as_str).unwrap_or("")
    }

    /// Destination queue, without any namespace prefix.
    pub fn queue(&self) -> &str {
        self.0.get("queue").and_then(Value::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[Value] {
        self.0
            .get("args")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn created_at(&self) -> f64 {
        self.0.get("created_at").and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn enqueued_at(&self) -> Option<f64> {
        self.0.get("enqueued_at").and_then(Value::as_f64)
    }

    /// Earliest execution time; presence routes an enqueue to a scheduled set.
    pub fn at(&self) -> Option<f64> {
        self.0.get("at").and_then(Value::as_f64)
    }

    /// Number of prior failed attempts recorded on this message.
    pub fn retry_count(&self) -> u32 {
        self.0
            .get("retry_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// Decode the `retry` field into a [`RetryPolicy`].
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.0.get("retry") {
            Some(Value::Bool(true)) => RetryPolicy::Default,
            Some(Value::Bool(false)) | None => RetryPolicy::Disabled,
            Some(v) => match v.as_u64() {
                Some(n) => RetryPolicy::Max(n as u32),
                None => RetryPolicy::Disabled,
            },
        }
    }

    /// `unique_for`, in seconds, if per-queue uniqueness applies to this job.
    pub fn unique_for(&self) -> Option<u64> {
        self.0.get("unique_for").and_then(Value::as_u64)
    }

    /// Set `enqueued_at` to `now`, as every promotion into a live queue does.
    pub fn refresh_enqueued_at(&mut self, now: f64) {
        self.set("enqueued_at", json_f64(now));
    }

    /// Record a failed attempt: bumps `retry_count`, stamps
    /// `failed_at`/`retried_at`, and fills in `error_class`/`error_message`.
    /// `failed_at` is set once, on the first failure; subsequent failures
    /// only update `retried_at`.
    pub fn record_failure(&mut self, error_class: &str, error_message: &str, now: f64) {
        if !self.0.contains_key("failed_at") {
            self.set("failed_at", json_f64(now));
        } else {
            self.set("retried_at", json_f64(now));
        }
        self.set("error_class", error_class.to_string());
        self.set("error_message", error_message.to_string());
        let next = self.retry_count() + 1;
        self.set("retry_count", Value::Number(Number::from(next)));
    }
}

fn json_f64(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}
