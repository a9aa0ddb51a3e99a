use std::fmt;

/// The error kinds a job handler, the store, or the producer can surface.
///
/// Matches the wire-level error classes a Sidekiq-compatible consumer
/// records on a message (`error_class`): `decode-error`, `handler-error`,
/// `panic`, `backend-error`, `encode-error`, `config-error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The payload pulled off the queue was not valid JSON, or lacked `class`.
    #[error("decode error: {0}")]
    Decode(String),
    /// The user job function returned an error.
    #[error("{0}")]
    Handler(String),
    /// The user job function panicked.
    #[error("handler panicked: {0}")]
    Panic(String),
    /// A Store call failed.
    #[error("backend error: {0}")]
    Backend(String),
    /// The producer could not serialize a job's arguments.
    #[error("encode error: {0}")]
    Encode(String),
    /// Manager construction was rejected (missing/conflicting options).
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// The wire-level `error_class` name for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Decode(_) => "decode-error",
            Error::Handler(_) => "handler-error",
            Error::Panic(_) => "panic",
            Error::Backend(_) => "backend-error",
            Error::Encode(_) => "encode-error",
            Error::Config(_) => "config-error",
        }
    }

    pub(crate) fn backend(err: impl fmt::Display) -> Self {
        Error::Backend(err.to_string())
    }

    /// The bare inner message, without the `kind()`-derived prefix that
    /// `Display` adds (e.g. `"handler panicked: "`). This is what belongs
    /// in a wire-level `error_message` field — `Display`'s prefixed form is
    /// for logs, not for the recorded message.
    pub fn message(&self) -> &str {
        match self {
            Error::Decode(s)
            | Error::Handler(s)
            | Error::Panic(s)
            | Error::Backend(s)
            | Error::Encode(s)
            | Error::Config(s) => s,
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
