use thiserror::Error;

use crate::event::EventId;

// ─── Error taxonomy ──────────────────────────────────────────────

/// Everything the timing API can refuse to do.
///
/// All variants describe misuse of the instrumentation (or a bad
/// configuration), never a transient condition, so none of them are
/// worth retrying.
#[derive(Debug, Error)]
pub enum TimingError {
    /// `stop` was called with a handle that is not open anywhere:
    /// already stopped, never started, or cleared by `reset`.
    #[error("unknown span handle {id} for \"{name}\"")]
    UnknownHandle { id: EventId, name: String },

    /// Strict mode only: the handle is open but something was started
    /// after it in the same context and is still running.
    #[error("cannot stop \"{name}\": innermost open span in its context is \"{innermost}\"")]
    OutOfOrderStop { name: String, innermost: String },

    /// No renderer is registered under this identifier.
    #[error("unsupported report format \"{0}\"")]
    UnsupportedFormat(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("histogram error: {0}")]
    Histogram(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TimingResult<T> = Result<T, TimingError>;
