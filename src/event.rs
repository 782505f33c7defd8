//! Timing events, their identifiers, and the metadata they carry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MetadataLimits;
use crate::error::{TimingError, TimingResult};

// ─── Identifiers ─────────────────────────────────────────────────

/// Unique per `start` call, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT: ContextId = ContextId::fresh();
}

/// Key of one nesting stack. Threads get one lazily through
/// [`ContextId::current_thread`]; async tasks should allocate their own
/// with [`ContextId::fresh`] and pass it explicitly, since a task may hop
/// between worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u64);

impl ContextId {
    pub fn fresh() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn current_thread() -> Self {
        THREAD_CONTEXT.with(|ctx| *ctx)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Opaque token returned by `start`. Identifies one span instance, not
/// its name: the same name may be open several times at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanHandle {
    pub(crate) id: EventId,
    pub(crate) context: ContextId,
    pub(crate) name: String,
}

impl SpanHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ─── Metadata ────────────────────────────────────────────────────

/// Scalar (or nested map) value attached to an event. Opaque to the
/// library beyond the sanity limits in [`MetadataLimits`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, MetadataValue>),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}
impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}
impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        Self::Integer(v as i64)
    }
}
/// Values above `i64::MAX` fall back to `Float`.
impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::Float(v as f64), Self::Integer)
    }
}
impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}
impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}
impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
impl From<Metadata> for MetadataValue {
    fn from(v: Metadata) -> Self {
        Self::Map(v)
    }
}

/// Build a [`Metadata`] map inline.
///
/// ```rust
/// use tim_the_enchanter::metadata;
///
/// let meta = metadata! { "rows" => 120, "cached" => false };
/// assert_eq!(meta.len(), 2);
/// ```
#[macro_export]
macro_rules! metadata {
    () => {
        $crate::Metadata::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Metadata::new();
        $(
            map.insert(::std::string::String::from($key), $crate::MetadataValue::from($value));
        )+
        map
    }};
}

/// Check `metadata` against `limits`, recursing into nested maps.
pub(crate) fn validate_metadata(metadata: &Metadata, limits: &MetadataLimits) -> TimingResult<()> {
    validate_map(metadata, limits, 0)
}

fn validate_map(map: &Metadata, limits: &MetadataLimits, depth: usize) -> TimingResult<()> {
    if map.len() > limits.max_entries {
        return Err(TimingError::InvalidMetadata(format!(
            "{} entries exceeds the limit of {}",
            map.len(),
            limits.max_entries
        )));
    }

    for (key, value) in map {
        if key.is_empty() || key.len() > limits.max_key_len {
            return Err(TimingError::InvalidMetadata(format!(
                "key length must be 1..={}, got {}",
                limits.max_key_len,
                key.len()
            )));
        }
        match value {
            MetadataValue::Float(x) if !x.is_finite() => {
                return Err(TimingError::InvalidMetadata(format!(
                    "\"{key}\" is not a finite number"
                )));
            }
            MetadataValue::String(s) if s.len() > limits.max_string_len => {
                return Err(TimingError::InvalidMetadata(format!(
                    "\"{key}\" is longer than {} bytes",
                    limits.max_string_len
                )));
            }
            MetadataValue::Map(nested) => {
                if depth + 1 > limits.max_depth {
                    return Err(TimingError::InvalidMetadata(format!(
                        "\"{key}\" nests deeper than {} levels",
                        limits.max_depth
                    )));
                }
                validate_map(nested, limits, depth + 1)?;
            }
            _ => {}
        }
    }
    Ok(())
}

// ─── Timing event ────────────────────────────────────────────────

/// Where a span is in its life. See [`Snapshot::state_of`].
///
/// [`Snapshot::state_of`]: crate::Snapshot::state_of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Open,
    Closed,
}

/// One span that has been stopped. Immutable once built; open spans
/// never materialize as a `TimingEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingEvent {
    pub id: EventId,
    pub name: String,
    pub context: ContextId,
    /// Global start order
    pub sequence: u64,
    #[serde(with = "duration_nanos")]
    pub start: Duration,
    #[serde(with = "duration_nanos")]
    pub end: Duration,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    pub parent: Option<EventId>,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Closed implicitly by the auto-close stop policy
    #[serde(default)]
    pub abandoned: bool,
}

/// A span that was still running when a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSpan {
    pub id: EventId,
    pub name: String,
    pub sequence: u64,
    #[serde(with = "duration_nanos")]
    pub start: Duration,
    /// Time since `start` at snapshot time
    #[serde(with = "duration_nanos")]
    pub elapsed: Duration,
    pub parent: Option<EventId>,
    pub depth: usize,
}

/// Serde adapter: `Duration` as integer nanoseconds.
pub(crate) mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_nanos() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
