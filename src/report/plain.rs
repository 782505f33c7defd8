use std::fmt::Write as _;

use super::{fmt_duration, sorted_stats, Renderer, Report, ReportOptions, EMPTY_REPORT};
use crate::error::TimingResult;
use crate::metrics::Snapshot;

/// Aligned table, one row per name.
pub(super) struct PlainText;

impl Renderer for PlainText {
    fn id(&self) -> &str {
        "plain_text"
    }

    fn render(&self, snapshot: &Snapshot, options: &ReportOptions) -> TimingResult<Report> {
        Ok(Report::Text(render_table(snapshot, options)))
    }
}

fn render_table(snapshot: &Snapshot, options: &ReportOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Timing report · {} · {} events",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.version
    );

    if snapshot.is_empty() {
        out.push_str(EMPTY_REPORT);
        out.push('\n');
        append_open(&mut out, snapshot);
        return out;
    }

    let rows = sorted_stats(snapshot, options);

    // Percentile columns come from the first row; every bucket is built
    // from the same configured list.
    let pct_labels: Vec<String> = rows
        .first()
        .map(|s| s.percentiles.iter().map(|p| p.label()).collect())
        .unwrap_or_default();
    let show_abandoned = rows.iter().any(|s| s.abandoned > 0);

    let mut header = vec![
        "name".to_string(),
        "count".into(),
        "total".into(),
        "mean".into(),
        "min".into(),
        "max".into(),
    ];
    header.extend(pct_labels.iter().cloned());
    if show_abandoned {
        header.push("abandoned".into());
    }

    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|s| {
            let mut cells = vec![
                s.name.clone(),
                s.count.to_string(),
                fmt_duration(s.total),
                fmt_duration(s.mean),
                fmt_duration(s.min),
                fmt_duration(s.max),
            ];
            cells.extend(s.percentiles.iter().map(|p| fmt_duration(p.value)));
            if show_abandoned {
                cells.push(s.abandoned.to_string());
            }
            cells
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            body.iter()
                .filter_map(|row| row.get(col))
                .chain(std::iter::once(&header[col]))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    write_row(&mut out, &header, &widths);
    let rule_len = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    let _ = writeln!(out, "{}", "─".repeat(rule_len));
    for row in &body {
        write_row(&mut out, row, &widths);
    }

    append_open(&mut out, snapshot);
    out
}

/// Name column left-aligned, numbers right-aligned.
fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let mut line = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        let pad = width.saturating_sub(cell.chars().count());
        if i == 0 {
            line.push_str(cell);
            line.push_str(&" ".repeat(pad));
        } else {
            line.push_str(&" ".repeat(pad));
            line.push_str(cell);
        }
    }
    let _ = writeln!(out, "{}", line.trim_end());
}

fn append_open(out: &mut String, snapshot: &Snapshot) {
    if snapshot.open.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nStill open:");
    for stack in &snapshot.open {
        let _ = writeln!(out, "  {}: {}", stack.context, stack.names().join(" > "));
    }
}
