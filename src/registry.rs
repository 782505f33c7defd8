//! Open-span bookkeeping: one nesting stack per context, plus the sink
//! that closed events flow into.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::clock::Clock;
use crate::config::{EnchanterConfig, MetadataLimits, StopPolicy};
use crate::error::{TimingError, TimingResult};
use crate::event::{
    validate_metadata, ActiveSpan, ContextId, EventId, Metadata, SpanHandle, TimingEvent,
};
use crate::metrics::collector::Aggregator;
use crate::metrics::{OpenStack, Snapshot};

/// A started span. Lives only on its context's stack.
struct OpenSpan {
    id: EventId,
    name: String,
    sequence: u64,
    start: Duration,
    parent: Option<EventId>,
    depth: usize,
    metadata: Metadata,
}

impl OpenSpan {
    fn view(&self, now: Duration) -> ActiveSpan {
        ActiveSpan {
            id: self.id,
            name: self.name.clone(),
            sequence: self.sequence,
            start: self.start,
            elapsed: now.saturating_sub(self.start),
            parent: self.parent,
            depth: self.depth,
        }
    }

    fn close(self, context: ContextId, end: Duration, abandoned: bool) -> TimingEvent {
        TimingEvent {
            id: self.id,
            name: self.name,
            context,
            sequence: self.sequence,
            start: self.start,
            end,
            duration: end.saturating_sub(self.start),
            parent: self.parent,
            depth: self.depth,
            metadata: self.metadata,
            abandoned,
        }
    }
}

pub(crate) struct Registry {
    policy: StopPolicy,
    limits: MetadataLimits,
    clock: Arc<dyn Clock>,
    aggregator: Aggregator,
    /// The map lock is held (shared) for the whole of every stack operation,
    /// so an empty stack can be pruned without racing a concurrent push.
    stacks: RwLock<HashMap<ContextId, Mutex<Vec<OpenSpan>>>>,
    retain_events: bool,
    max_retained_events: usize,
    retained: Mutex<VecDeque<TimingEvent>>,
    sequence: AtomicU64,
}

impl Registry {
    pub fn new(config: &EnchanterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy: config.stop_policy,
            limits: config.metadata_limits.clone(),
            clock,
            aggregator: Aggregator::new(config.percentile_mode, config.percentiles.clone()),
            stacks: RwLock::new(HashMap::new()),
            retain_events: config.retain_events,
            max_retained_events: config.max_retained_events,
            retained: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    // ── Start ───────────────────────────────────────────────────

    pub fn start(
        &self,
        context: ContextId,
        name: &str,
        metadata: Metadata,
    ) -> TimingResult<SpanHandle> {
        validate_metadata(&metadata, &self.limits)?;

        {
            let map = self.stacks.read();
            if let Some(stack) = map.get(&context) {
                return Ok(self.push(&mut stack.lock(), context, name, metadata));
            }
        }

        let mut map = self.stacks.write();
        let stack = map.entry(context).or_default();
        Ok(self.push(stack.get_mut(), context, name, metadata))
    }

    fn push(
        &self,
        stack: &mut Vec<OpenSpan>,
        context: ContextId,
        name: &str,
        metadata: Metadata,
    ) -> SpanHandle {
        let id = EventId::new();
        let depth = stack.len();
        let parent = stack.last().map(|top| top.id);
        stack.push(OpenSpan {
            id,
            name: name.to_owned(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            start: self.clock.now(),
            parent,
            depth,
            metadata,
        });

        tracing::trace!(
            target: "tim_the_enchanter::registry",
            name,
            %context,
            depth,
            "span started"
        );

        SpanHandle {
            id,
            context,
            name: name.to_owned(),
        }
    }

    // ── Stop ────────────────────────────────────────────────────

    /// Close the span behind `handle`, merging `extra` into its metadata.
    pub fn stop(&self, handle: &SpanHandle, extra: Metadata) -> TimingResult<TimingEvent> {
        let end = self.clock.now();

        let (event, abandoned, now_empty) = {
            let map = self.stacks.read();
            let stack = map
                .get(&handle.context)
                .ok_or_else(|| unknown(handle))?;
            let mut stack = stack.lock();

            let pos = stack
                .iter()
                .position(|span| span.id == handle.id)
                .ok_or_else(|| unknown(handle))?;

            if pos + 1 != stack.len() && self.policy == StopPolicy::Strict {
                let innermost = stack.last().map(|s| s.name.clone()).unwrap_or_default();
                return Err(TimingError::OutOfOrderStop {
                    name: handle.name.clone(),
                    innermost,
                });
            }

            let merged = if extra.is_empty() {
                None
            } else {
                let mut merged = stack[pos].metadata.clone();
                merged.extend(extra);
                validate_metadata(&merged, &self.limits)?;
                Some(merged)
            };

            // Innermost first, so abandoned children close before parents.
            let abandoned: Vec<TimingEvent> = stack
                .drain(pos + 1..)
                .rev()
                .map(|span| span.close(handle.context, end, true))
                .collect();

            let mut target = stack.pop().ok_or_else(|| unknown(handle))?;
            if let Some(merged) = merged {
                target.metadata = merged;
            }

            (
                target.close(handle.context, end, false),
                abandoned,
                stack.is_empty(),
            )
        };

        if now_empty {
            self.prune(handle.context);
        }

        for event in &abandoned {
            tracing::warn!(
                target: "tim_the_enchanter::registry",
                name = %event.name,
                stopped = %handle.name,
                duration_ns = event.duration.as_nanos() as u64,
                "span abandoned: closed implicitly by an out-of-order stop"
            );
            self.sink(event)?;
        }
        self.sink(&event)?;

        Ok(event)
    }

    /// Record a closed event whose duration was measured elsewhere. It is
    /// parented to the context's innermost open span, if any.
    pub fn record(
        &self,
        context: ContextId,
        name: &str,
        duration: Duration,
        metadata: Metadata,
    ) -> TimingResult<TimingEvent> {
        validate_metadata(&metadata, &self.limits)?;

        let (parent, depth) = {
            let map = self.stacks.read();
            match map.get(&context) {
                Some(stack) => {
                    let stack = stack.lock();
                    (stack.last().map(|s| s.id), stack.len())
                }
                None => (None, 0),
            }
        };

        let end = self.clock.now();
        let event = TimingEvent {
            id: EventId::new(),
            name: name.to_owned(),
            context,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            start: end.saturating_sub(duration),
            end,
            duration,
            parent,
            depth,
            metadata,
            abandoned: false,
        };
        self.sink(&event)?;
        Ok(event)
    }

    /// Forward one closed event to the aggregator and the retained log.
    /// The aggregator goes first: a retained event is always counted.
    fn sink(&self, event: &TimingEvent) -> TimingResult<()> {
        self.aggregator.record(event)?;
        if self.retain_events {
            let mut log = self.retained.lock();
            if log.len() >= self.max_retained_events {
                log.pop_front();
            }
            log.push_back(event.clone());
        }
        Ok(())
    }

    fn prune(&self, context: ContextId) {
        let mut map = self.stacks.write();
        if map.get(&context).is_some_and(|s| s.lock().is_empty()) {
            map.remove(&context);
        }
    }

    // ── Introspection ───────────────────────────────────────────

    /// Names of the spans open in `context`, innermost last.
    pub fn currently_open(&self, context: ContextId) -> Vec<String> {
        self.stacks
            .read()
            .get(&context)
            .map(|stack| stack.lock().iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Contexts with at least one open span.
    pub fn open_contexts(&self) -> usize {
        self.stacks
            .read()
            .values()
            .filter(|stack| !stack.lock().is_empty())
            .count()
    }

    pub fn open_stacks(&self) -> Vec<OpenStack> {
        let now = self.clock.now();
        let mut stacks: Vec<OpenStack> = self
            .stacks
            .read()
            .iter()
            .map(|(context, stack)| OpenStack {
                context: *context,
                spans: stack.lock().iter().map(|s| s.view(now)).collect(),
            })
            .filter(|open| !open.spans.is_empty())
            .collect();
        stacks.sort_by_key(|open| open.context);
        stacks
    }

    /// Aggregates, open stacks and retained events in one value.
    ///
    /// Open stacks are copied first and the aggregates last, so every
    /// retained event is already counted in `stats`. A span closing
    /// mid-snapshot can appear both open and retained.
    pub fn snapshot(&self) -> Snapshot {
        let open = self.open_stacks();
        let events = if self.retain_events {
            self.retained.lock().iter().cloned().collect()
        } else {
            Vec::new()
        };
        let mut snapshot = self.aggregator.snapshot();
        snapshot.open = open;
        snapshot.events = events;
        snapshot
    }

    pub fn reset(&self) {
        self.stacks.write().clear();
        self.retained.lock().clear();
        self.aggregator.reset();

        tracing::debug!(target: "tim_the_enchanter::registry", "registry reset");
    }
}

fn unknown(handle: &SpanHandle) -> TimingError {
    TimingError::UnknownHandle {
        id: handle.id,
        name: handle.name.clone(),
    }
}
