use std::fmt::Write as _;

use super::{fmt_duration, Renderer, Report, ReportOptions, EMPTY_REPORT};
use crate::error::TimingResult;
use crate::event::TimingEvent;
use crate::metrics::Snapshot;

/// Retained events in the order they started, indented by depth.
pub(super) struct Chronological;

impl Renderer for Chronological {
    fn id(&self) -> &str {
        "chronological"
    }

    fn render(&self, snapshot: &Snapshot, options: &ReportOptions) -> TimingResult<Report> {
        Ok(Report::Text(render_timeline(snapshot, options)))
    }
}

fn render_timeline(snapshot: &Snapshot, options: &ReportOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Timeline · {} · {} events",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.version
    );

    if snapshot.events.is_empty() {
        if snapshot.is_empty() {
            out.push_str(EMPTY_REPORT);
        } else {
            out.push_str("Raw event retention is off; nothing to place on a timeline.");
        }
        out.push('\n');
        return out;
    }

    let mut events: Vec<&TimingEvent> = snapshot.events.iter().collect();
    events.sort_by_key(|e| e.sequence);
    if let Some(limit) = options.limit {
        events.truncate(limit);
    }

    let origin = events.iter().map(|e| e.start).min().unwrap_or_default();
    for event in events {
        let offset = event.start.saturating_sub(origin);
        let _ = write!(
            out,
            "+{:>12}  {}{}  {}",
            fmt_duration(offset),
            "  ".repeat(event.depth),
            event.name,
            fmt_duration(event.duration)
        );
        if event.abandoned {
            out.push_str("  [abandoned]");
        }
        if !event.metadata.is_empty() {
            let meta: Vec<String> = event
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let _ = write!(out, "  {{{}}}", meta.join(", "));
        }
        out.push('\n');
    }
    out
}
