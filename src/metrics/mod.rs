pub(crate) mod collector;
pub mod percentiles;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{duration_nanos, ActiveSpan, ContextId, EventId, EventState, TimingEvent};

pub use percentiles::PercentileValue;

/// Aggregated statistics for one event name.
/// Durations serialize as integer nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub name: String,
    pub count: u64,
    #[serde(with = "duration_nanos")]
    pub total: Duration,
    /// `total / count`, truncated to whole nanoseconds
    #[serde(with = "duration_nanos")]
    pub mean: Duration,
    #[serde(with = "duration_nanos")]
    pub min: Duration,
    #[serde(with = "duration_nanos")]
    pub max: Duration,
    /// Spans that were closed implicitly by the auto-close policy
    #[serde(default)]
    pub abandoned: u64,
    #[serde(default)]
    pub percentiles: Vec<PercentileValue>,
}

impl Stats {
    /// Value of a configured percentile, if it was requested.
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.percentiles
            .iter()
            .find(|p| p.percentile == percentile)
            .map(|p| p.value)
    }
}

/// Spans still running in one context at snapshot time, innermost last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStack {
    pub context: ContextId,
    pub spans: Vec<ActiveSpan>,
}

impl OpenStack {
    /// Span names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.spans.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Point-in-time copy of everything a report can show. Renderers read
/// nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Events folded into the aggregates since the last reset. Always the
    /// sum of `stats[*].count`, so it never disagrees with the rows.
    pub version: u64,
    /// Wall-clock label for report headers; never used for timing
    pub generated_at: DateTime<Utc>,
    pub stats: BTreeMap<String, Stats>,
    #[serde(default)]
    pub open: Vec<OpenStack>,
    /// Retained closed events, oldest first. Empty when retention is off.
    /// Every event listed here is already counted in `stats`.
    #[serde(default)]
    pub events: Vec<TimingEvent>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Sum of every bucket's total.
    pub fn total_time(&self) -> Duration {
        self.stats.values().map(|s| s.total).sum()
    }

    /// `Closed` if the span is among the retained events, `Open` if it was
    /// running at snapshot time, `None` if this snapshot does not know it.
    pub fn state_of(&self, id: EventId) -> Option<EventState> {
        if self.events.iter().any(|e| e.id == id) {
            Some(EventState::Closed)
        } else if self
            .open
            .iter()
            .any(|stack| stack.spans.iter().any(|s| s.id == id))
        {
            Some(EventState::Open)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot_of(rows: Vec<Stats>) -> Snapshot {
        Snapshot {
            version: rows.iter().map(|s| s.count).sum(),
            generated_at: Utc::now(),
            stats: rows.into_iter().map(|s| (s.name.clone(), s)).collect(),
            open: Vec::new(),
            events: Vec::new(),
        }
    }

    fn stats(name: &str, total_ms: u64) -> Stats {
        let total = Duration::from_millis(total_ms);
        Stats {
            name: name.into(),
            count: 1,
            total,
            mean: total,
            min: total,
            max: total,
            abandoned: 0,
            percentiles: Vec::new(),
        }
    }

    #[test]
    fn test_total_time_sums_buckets() {
        let snap = snapshot_of(vec![stats("a", 3), stats("b", 4)]);
        assert_eq!(snap.total_time(), Duration::from_millis(7));
        assert_eq!(snapshot_of(Vec::new()).total_time(), Duration::ZERO);
    }

    #[test]
    fn test_open_stack_names() {
        let span = |name: &str, depth| ActiveSpan {
            id: EventId::new(),
            name: name.into(),
            sequence: depth as u64,
            start: Duration::ZERO,
            elapsed: Duration::ZERO,
            parent: None,
            depth,
        };
        let stack = OpenStack {
            context: ContextId::fresh(),
            spans: vec![span("request", 0), span("db", 1)],
        };
        assert_eq!(stack.names(), vec!["request", "db"]);
    }
}
