//! Call-path tree rebuilt from retained events.
//!
//! Events are folded by path: every `tokenize` that ran under a `parse`
//! lands in the same node, no matter how many times either ran. Spans
//! still open at snapshot time become placeholder nodes, so a report taken
//! mid-flight nests finished children under their running ancestors.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::Duration;

use super::{fmt_duration, sorted_stats, Renderer, Report, ReportOptions, SortRow, EMPTY_REPORT};
use crate::error::TimingResult;
use crate::event::{ActiveSpan, EventId, TimingEvent};
use crate::metrics::{OpenStack, Snapshot};

pub(super) struct Hierarchical;

impl Renderer for Hierarchical {
    fn id(&self) -> &str {
        "hierarchical"
    }

    fn render(&self, snapshot: &Snapshot, options: &ReportOptions) -> TimingResult<Report> {
        Ok(Report::Text(render_tree(snapshot, options)))
    }
}

// ─── Tree ────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct Node {
    pub name: String,
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Instances still running at snapshot time
    pub open: u64,
    /// Time those instances had been running
    pub running: Duration,
    pub children: Vec<usize>,
}

impl Node {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            count: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            open: 0,
            running: Duration::ZERO,
            children: Vec::new(),
        }
    }

    /// Base for a child's share: finished time plus time still running.
    fn span(&self) -> Duration {
        self.total + self.running
    }
}

/// One span to place in the tree, finished or not.
#[derive(Clone, Copy)]
enum Entry<'a> {
    Closed(&'a TimingEvent),
    Open(&'a ActiveSpan),
}

impl Entry<'_> {
    fn sequence(&self) -> u64 {
        match self {
            Self::Closed(e) => e.sequence,
            Self::Open(s) => s.sequence,
        }
    }
}

impl SortRow for Node {
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
}

/// Arena of path nodes; index 0 is a synthetic root.
#[derive(Debug)]
pub(crate) struct CallTree {
    pub nodes: Vec<Node>,
}

impl CallTree {
    pub const ROOT: usize = 0;

    pub fn build(events: &[TimingEvent], open: &[OpenStack]) -> Self {
        let mut nodes = vec![Node::new("")];
        // (parent node, child name) → child node
        let mut by_path: HashMap<(usize, &str), usize> = HashMap::new();
        let mut node_of: HashMap<EventId, usize> = HashMap::new();

        // A span that closed while the snapshot was taken can be listed
        // both ways; the closed event wins.
        let closed: HashSet<EventId> = events.iter().map(|e| e.id).collect();
        let mut entries: Vec<Entry<'_>> = events.iter().map(Entry::Closed).collect();
        entries.extend(
            open.iter()
                .flat_map(|stack| &stack.spans)
                .filter(|span| !closed.contains(&span.id))
                .map(Entry::Open),
        );

        // Start order guarantees a parent is placed before its children.
        entries.sort_by_key(|entry| entry.sequence());

        for entry in entries {
            let (id, name, parent) = match entry {
                Entry::Closed(e) => (e.id, e.name.as_str(), e.parent),
                Entry::Open(s) => (s.id, s.name.as_str(), s.parent),
            };

            // A parent evicted from the retained log makes this a root.
            let parent = parent
                .and_then(|id| node_of.get(&id).copied())
                .unwrap_or(Self::ROOT);

            let idx = match by_path.get(&(parent, name)) {
                Some(&idx) => idx,
                None => {
                    let idx = nodes.len();
                    nodes.push(Node::new(name));
                    nodes[parent].children.push(idx);
                    by_path.insert((parent, name), idx);
                    idx
                }
            };

            let node = &mut nodes[idx];
            match entry {
                Entry::Closed(e) => {
                    node.count += 1;
                    node.total += e.duration;
                    node.min = node.min.min(e.duration);
                    node.max = node.max.max(e.duration);
                }
                Entry::Open(s) => {
                    node.open += 1;
                    node.running += s.elapsed;
                }
            }
            node_of.insert(id, idx);
        }

        let root_total: Duration = nodes[Self::ROOT]
            .children
            .iter()
            .map(|&c| nodes[c].total)
            .sum();
        nodes[Self::ROOT].total = root_total;

        Self { nodes }
    }

    /// Time spent in a node outside any of its children.
    pub fn self_time(&self, idx: usize) -> Duration {
        let node = &self.nodes[idx];
        let in_children: Duration = node.children.iter().map(|&c| self.nodes[c].total).sum();
        node.total.saturating_sub(in_children)
    }

    #[cfg(test)]
    pub fn child(&self, parent: usize, name: &str) -> Option<usize> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }
}

// ─── Rendering ───────────────────────────────────────────────────

fn render_tree(snapshot: &Snapshot, options: &ReportOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Call tree · {} · {} events",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.version
    );

    if snapshot.is_empty() && snapshot.open.is_empty() {
        out.push_str(EMPTY_REPORT);
        out.push('\n');
        return out;
    }

    if snapshot.events.is_empty() && !snapshot.is_empty() {
        // Without raw events there are no parent links to follow.
        out.push_str("Raw event retention is off; showing names without nesting.\n");
        for s in sorted_stats(snapshot, options) {
            let _ = writeln!(
                out,
                "{}  {}×  total {}",
                s.name,
                s.count,
                fmt_duration(s.total)
            );
        }
        return out;
    }

    let tree = CallTree::build(&snapshot.events, &snapshot.open);
    let mut roots = tree.nodes[CallTree::ROOT].children.clone();
    roots.sort_by(|&a, &b| options.compare(&tree.nodes[a], &tree.nodes[b]));
    if let Some(limit) = options.limit {
        roots.truncate(limit);
    }

    for &root in &roots {
        write_node(&mut out, &tree, root, None, options);
    }
    out
}

/// Where a node sits in the drawing: the prefix inherited from its
/// ancestors and whether it is the last of its siblings.
struct Branch<'a> {
    prefix: &'a str,
    last: bool,
    parent: usize,
}

fn write_node(
    out: &mut String,
    tree: &CallTree,
    idx: usize,
    branch: Option<Branch<'_>>,
    options: &ReportOptions,
) {
    let node = &tree.nodes[idx];
    let (line_prefix, child_prefix, share) = match &branch {
        None => (String::new(), String::new(), String::new()),
        Some(b) => {
            let parent = &tree.nodes[b.parent];
            let share = if parent.span().is_zero() {
                String::new()
            } else {
                format!(
                    "  ({:.1}% of {})",
                    share_of(node.span(), parent.span()),
                    parent.name
                )
            };
            if b.last {
                (format!("{}└─ ", b.prefix), format!("{}   ", b.prefix), share)
            } else {
                (format!("{}├─ ", b.prefix), format!("{}│  ", b.prefix), share)
            }
        }
    };

    if node.count == 0 {
        let _ = writeln!(
            out,
            "{line_prefix}{}  (open)  running {}{share}",
            node.name,
            fmt_duration(node.running),
        );
    } else {
        let still_open = match node.open {
            0 => String::new(),
            n => format!("  +{n} open"),
        };
        let _ = writeln!(
            out,
            "{line_prefix}{}  {}×  total {}  self {}  mean {}{still_open}{share}",
            node.name,
            node.count,
            fmt_duration(node.total),
            fmt_duration(tree.self_time(idx)),
            fmt_duration(node.mean()),
        );
    }

    let mut children = node.children.clone();
    children.sort_by(|&a, &b| options.compare(&tree.nodes[a], &tree.nodes[b]));
    for (i, &child) in children.iter().enumerate() {
        let branch = Branch {
            prefix: &child_prefix,
            last: i + 1 == children.len(),
            parent: idx,
        };
        write_node(out, tree, child, Some(branch), options);
    }
}

fn share_of(part: Duration, whole: Duration) -> f64 {
    if whole.is_zero() {
        0.0
    } else {
        part.as_secs_f64() / whole.as_secs_f64() * 100.0
    }
}
