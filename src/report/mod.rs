//! Report rendering. Every renderer is a pure function of a [`Snapshot`].

mod chronological;
mod hierarchical;
mod plain;
mod structured;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{TimingError, TimingResult};
use crate::metrics::{Snapshot, Stats};

pub use structured::StructuredReport;

// ─── Formats ─────────────────────────────────────────────────────

/// Built-in report formats and their stable identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Aligned table, one row per name
    PlainText,
    /// JSON document with every `Stats` field
    Structured,
    /// Call-path tree rebuilt from retained events
    Hierarchical,
    /// Retained events in start order
    Chronological,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 4] = [
        Self::PlainText,
        Self::Structured,
        Self::Hierarchical,
        Self::Chronological,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::Structured => "structured",
            Self::Hierarchical => "hierarchical",
            Self::Chronological => "chronological",
        }
    }
}

impl AsRef<str> for ReportFormat {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = TimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = normalize_id(s);
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == id)
            .ok_or_else(|| TimingError::UnsupportedFormat(s.to_owned()))
    }
}

/// `PLAIN_TEXT`, `plain-text` and `plain_text` all name the same format.
fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase().replace('-', "_")
}

// ─── Options ─────────────────────────────────────────────────────

/// Row ordering for tabular output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Total,
    Mean,
    Count,
    Min,
    Max,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOptions {
    #[serde(default)]
    pub sort_by: SortKey,
    /// Defaults to descending
    #[serde(default)]
    pub ascending: bool,
    /// Keep only the first `limit` rows after sorting
    #[serde(default)]
    pub limit: Option<usize>,
    /// Attach retained raw events to the structured report
    #[serde(default)]
    pub include_events: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            sort_by: SortKey::Total,
            ascending: false,
            limit: None,
            include_events: false,
        }
    }
}

impl ReportOptions {
    pub fn sorted_by(mut self, key: SortKey) -> Self {
        self.sort_by = key;
        self
    }

    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_events(mut self) -> Self {
        self.include_events = true;
        self
    }

    /// Order two rows by the configured key and direction. Ties fall back
    /// to the name so output is deterministic.
    pub(crate) fn compare<R: SortRow>(&self, a: &R, b: &R) -> std::cmp::Ordering {
        let primary = match self.sort_by {
            SortKey::Total => a.total().cmp(&b.total()),
            SortKey::Mean => a.mean().cmp(&b.mean()),
            SortKey::Count => a.count().cmp(&b.count()),
            SortKey::Min => a.min().cmp(&b.min()),
            SortKey::Max => a.max().cmp(&b.max()),
            SortKey::Name => a.name().cmp(b.name()),
        };
        let primary = if self.ascending {
            primary
        } else {
            primary.reverse()
        };
        primary.then_with(|| a.name().cmp(b.name()))
    }
}

/// Anything a report can sort by [`SortKey`].
pub(crate) trait SortRow {
    fn name(&self) -> &str;
    fn count(&self) -> u64;
    fn total(&self) -> Duration;
    fn min(&self) -> Duration;
    fn max(&self) -> Duration;

    fn mean(&self) -> Duration {
        match self.count() {
            0 => Duration::ZERO,
            n => Duration::from_nanos((self.total().as_nanos() / n as u128) as u64),
        }
    }
}

impl SortRow for Stats {
    fn name(&self) -> &str {
        &self.name
    }
    fn count(&self) -> u64 {
        self.count
    }
    fn total(&self) -> Duration {
        self.total
    }
    fn min(&self) -> Duration {
        self.min
    }
    fn max(&self) -> Duration {
        self.max
    }
    fn mean(&self) -> Duration {
        self.mean
    }
}

/// Stats rows ordered and truncated per `options`.
pub(crate) fn sorted_stats<'a>(snapshot: &'a Snapshot, options: &ReportOptions) -> Vec<&'a Stats> {
    let mut rows: Vec<&Stats> = snapshot.stats.values().collect();
    rows.sort_by(|a, b| options.compare(*a, *b));
    if let Some(limit) = options.limit {
        rows.truncate(limit);
    }
    rows
}

// ─── Output ──────────────────────────────────────────────────────

/// Rendered report: text for humans, a JSON value for machines.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Text(String),
    Structured(serde_json::Value),
}

impl Report {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Structured(value) => match serde_json::to_string_pretty(value) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

// ─── Renderer registry ───────────────────────────────────────────

/// One report format. Implementations must read only the snapshot they
/// are given.
pub trait Renderer: Send + Sync {
    /// Identifier callers pass to `report`, matched case-insensitively.
    fn id(&self) -> &str;

    fn render(&self, snapshot: &Snapshot, options: &ReportOptions) -> TimingResult<Report>;
}

/// Renderers keyed by normalized identifier.
pub(crate) struct Formatter {
    renderers: RwLock<HashMap<String, Arc<dyn Renderer>>>,
}

impl Formatter {
    /// A formatter with every built-in [`ReportFormat`] registered.
    pub fn with_builtins() -> Self {
        let formatter = Self {
            renderers: RwLock::new(HashMap::new()),
        };
        formatter.register(Arc::new(plain::PlainText));
        formatter.register(Arc::new(structured::Structured));
        formatter.register(Arc::new(hierarchical::Hierarchical));
        formatter.register(Arc::new(chronological::Chronological));
        formatter
    }

    /// Add or replace a renderer. Returns the one it displaced, if any.
    pub fn register(&self, renderer: Arc<dyn Renderer>) -> Option<Arc<dyn Renderer>> {
        let id = normalize_id(renderer.id());
        self.renderers.write().insert(id, renderer)
    }

    pub fn render(
        &self,
        snapshot: &Snapshot,
        format: &str,
        options: &ReportOptions,
    ) -> TimingResult<Report> {
        let renderer = self
            .renderers
            .read()
            .get(&normalize_id(format))
            .cloned()
            .ok_or_else(|| TimingError::UnsupportedFormat(format.to_owned()))?;
        renderer.render(snapshot, options)
    }

    pub fn formats(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.renderers.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ─── Shared helpers ──────────────────────────────────────────────

/// Human-readable duration with an automatically chosen unit.
pub(crate) fn fmt_duration(d: Duration) -> String {
    let ns = d.as_nanos();
    if ns < 1_000 {
        format!("{ns}ns")
    } else if ns < 1_000_000 {
        format!("{:.2}µs", ns as f64 / 1e3)
    } else if ns < 1_000_000_000 {
        format!("{:.2}ms", ns as f64 / 1e6)
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

pub(crate) const EMPTY_REPORT: &str = "No timing data recorded.";
