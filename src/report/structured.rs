use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{sorted_stats, Renderer, Report, ReportOptions};
use crate::error::TimingResult;
use crate::event::TimingEvent;
use crate::metrics::{OpenStack, Snapshot, Stats};

/// Document shape of the `structured` format. Parse a rendered report back
/// with [`StructuredReport::from_json_str`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReport {
    pub generated_at: DateTime<Utc>,
    pub version: u64,
    pub stats: BTreeMap<String, Stats>,
    #[serde(default)]
    pub open: Vec<OpenStack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TimingEvent>,
}

impl StructuredReport {
    pub fn from_snapshot(snapshot: &Snapshot, options: &ReportOptions) -> Self {
        Self {
            generated_at: snapshot.generated_at,
            version: snapshot.version,
            stats: sorted_stats(snapshot, options)
                .into_iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
            open: snapshot.open.clone(),
            events: if options.include_events {
                snapshot.events.clone()
            } else {
                Vec::new()
            },
        }
    }

    pub fn from_json_str(json: &str) -> TimingResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> TimingResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

pub(super) struct Structured;

impl Renderer for Structured {
    fn id(&self) -> &str {
        "structured"
    }

    fn render(&self, snapshot: &Snapshot, options: &ReportOptions) -> TimingResult<Report> {
        let doc = StructuredReport::from_snapshot(snapshot, options);
        Ok(Report::Structured(serde_json::to_value(&doc)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PercentileValue;
    use crate::report::tests::snapshot_of;
    use std::time::Duration;

    fn stats() -> Stats {
        Stats {
            name: "parse".into(),
            count: 3,
            total: Duration::from_nanos(3_000_001),
            mean: Duration::from_nanos(1_000_000),
            min: Duration::from_nanos(999_999),
            max: Duration::from_nanos(1_000_002),
            abandoned: 0,
            percentiles: vec![PercentileValue {
                percentile: 99.0,
                value: Duration::from_nanos(1_000_002),
            }],
        }
    }

    #[test]
    fn test_document_fields_in_nanos() {
        let snap = snapshot_of(vec![stats()]);
        let report = Structured.render(&snap, &ReportOptions::default()).unwrap();
        let doc = report.as_json().unwrap();

        assert_eq!(doc["stats"]["parse"]["count"], 3);
        assert_eq!(doc["stats"]["parse"]["min"], 999_999);
        assert_eq!(doc["stats"]["parse"]["max"], 1_000_002);
        assert_eq!(doc["stats"]["parse"]["mean"], 1_000_000);
        assert_eq!(doc["stats"]["parse"]["percentiles"][0]["percentile"], 99.0);
        assert!(doc.get("events").is_none());
    }

    #[test]
    fn test_text_round_trip() {
        let snap = snapshot_of(vec![stats()]);
        let text = Structured
            .render(&snap, &ReportOptions::default())
            .unwrap()
            .to_string();
        let back = StructuredReport::from_json_str(&text).unwrap();
        assert_eq!(back.stats["parse"], snap.stats["parse"]);
        assert_eq!(back.version, snap.version);
    }

    #[test]
    fn test_limit_applies() {
        let mut other = stats();
        other.name = "other".into();
        other.total = Duration::from_nanos(1);
        let snap = snapshot_of(vec![stats(), other]);
        let doc = StructuredReport::from_snapshot(&snap, &ReportOptions::default().limit(1));
        assert_eq!(doc.stats.keys().collect::<Vec<_>>(), vec!["parse"]);
    }
}
