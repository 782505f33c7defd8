use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::config::EnchanterConfig;
use crate::error::{TimingError, TimingResult};
use crate::event::{ContextId, Metadata, SpanHandle, TimingEvent};
use crate::metrics::Snapshot;
use crate::registry::Registry;
use crate::report::{Formatter, Renderer, Report, ReportOptions};
use crate::scope::ScopeGuard;

/// The timing API. Owns a registry, its aggregates and the report
/// formatter; clones share the same state.
///
/// Calls without an explicit context use [`ContextId::current_thread`].
/// Async tasks should allocate a [`ContextId::fresh`] and use the `_in`
/// variants.
#[derive(Clone)]
pub struct Enchanter {
    inner: Arc<Inner>,
}

struct Inner {
    config: EnchanterConfig,
    registry: Registry,
    formatter: Formatter,
}

impl Default for Enchanter {
    fn default() -> Self {
        Self::build(EnchanterConfig::default(), Arc::new(MonotonicClock::new()))
    }
}

impl Enchanter {
    pub fn new(config: EnchanterConfig) -> TimingResult<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Use an injected time source, e.g. a `ManualClock` in tests.
    pub fn with_clock(config: EnchanterConfig, clock: Arc<dyn Clock>) -> TimingResult<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: EnchanterConfig, clock: Arc<dyn Clock>) -> Self {
        tracing::debug!(
            target: "tim_the_enchanter",
            stop_policy = ?config.stop_policy,
            percentile_mode = ?config.percentile_mode,
            retain_events = config.retain_events,
            "enchanter created"
        );
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(&config, clock),
                formatter: Formatter::with_builtins(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EnchanterConfig {
        &self.inner.config
    }

    // ── Start / stop ────────────────────────────────────────────

    pub fn start(&self, name: &str) -> TimingResult<SpanHandle> {
        self.start_in(ContextId::current_thread(), name, Metadata::new())
    }

    pub fn start_with(&self, name: &str, metadata: Metadata) -> TimingResult<SpanHandle> {
        self.start_in(ContextId::current_thread(), name, metadata)
    }

    pub fn start_in(
        &self,
        context: ContextId,
        name: &str,
        metadata: Metadata,
    ) -> TimingResult<SpanHandle> {
        self.inner.registry.start(context, name, metadata)
    }

    /// Stop the span behind `handle`. The handle carries its context, so
    /// this may be called from any thread.
    pub fn stop(&self, handle: &SpanHandle) -> TimingResult<TimingEvent> {
        self.stop_with(handle, Metadata::new())
    }

    /// Stop and merge `metadata` into what was attached at start.
    pub fn stop_with(&self, handle: &SpanHandle, metadata: Metadata) -> TimingResult<TimingEvent> {
        self.inner.registry.stop(handle, metadata)
    }

    /// Record a duration that was measured elsewhere.
    pub fn record(
        &self,
        name: &str,
        duration: Duration,
        metadata: Metadata,
    ) -> TimingResult<TimingEvent> {
        self.inner
            .registry
            .record(ContextId::current_thread(), name, duration, metadata)
    }

    // ── Scoped timing ───────────────────────────────────────────

    pub fn scope(&self, name: &str) -> TimingResult<ScopeGuard> {
        self.scope_in(ContextId::current_thread(), name, Metadata::new())
    }

    pub fn scope_with(&self, name: &str, metadata: Metadata) -> TimingResult<ScopeGuard> {
        self.scope_in(ContextId::current_thread(), name, metadata)
    }

    pub fn scope_in(
        &self,
        context: ContextId,
        name: &str,
        metadata: Metadata,
    ) -> TimingResult<ScopeGuard> {
        let handle = self.start_in(context, name, metadata)?;
        Ok(ScopeGuard::new(self.clone(), handle))
    }

    /// Time `f`. The span is stopped even if `f` panics.
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> TimingResult<T> {
        let guard = self.scope(name)?;
        let value = f();
        guard.finish()?;
        Ok(value)
    }

    /// Time a fallible `f`. An error from `f` is returned unchanged; a
    /// failure to stop the span is only logged in that case.
    ///
    /// Under [`StopPolicy::Strict`], if `f` leaves an inner span open the
    /// stop fails and this span stays open: later spans on the same context
    /// nest beneath it until [`Enchanter::reset`]. Use
    /// [`StopPolicy::AutoClose`] to have the leftover spans closed instead.
    ///
    /// [`StopPolicy::Strict`]: crate::StopPolicy::Strict
    /// [`StopPolicy::AutoClose`]: crate::StopPolicy::AutoClose
    pub fn time_result<T, E>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<TimingError>,
    {
        let guard = self.scope(name)?;
        match f() {
            Ok(value) => {
                guard.finish()?;
                Ok(value)
            }
            // Dropping the guard stops the span and logs any stop error.
            Err(err) => {
                drop(guard);
                Err(err)
            }
        }
    }

    /// Time a future. Cancelling it (dropping before completion) still
    /// stops the span.
    pub async fn time_async_in<F>(
        &self,
        context: ContextId,
        name: &str,
        fut: F,
    ) -> TimingResult<F::Output>
    where
        F: Future,
    {
        let guard = self.scope_in(context, name, Metadata::new())?;
        let output = fut.await;
        guard.finish()?;
        Ok(output)
    }

    // ── Introspection / reports ─────────────────────────────────

    /// Spans open on the calling thread, innermost last.
    pub fn currently_open(&self) -> Vec<String> {
        self.currently_open_in(ContextId::current_thread())
    }

    pub fn currently_open_in(&self, context: ContextId) -> Vec<String> {
        self.inner.registry.currently_open(context)
    }

    /// Number of contexts with at least one open span.
    pub fn open_contexts(&self) -> usize {
        self.inner.registry.open_contexts()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.registry.snapshot()
    }

    /// Render the current snapshot. `format` is a [`ReportFormat`] or the
    /// identifier of a registered custom renderer.
    ///
    /// [`ReportFormat`]: crate::ReportFormat
    pub fn report(&self, format: impl AsRef<str>, options: &ReportOptions) -> TimingResult<Report> {
        let format = format.as_ref();
        let snapshot = self.snapshot();
        self.inner.formatter.render(&snapshot, format, options)
    }

    /// Add a report format. Returns the renderer it replaced, if any.
    pub fn register_format(&self, renderer: Arc<dyn Renderer>) -> Option<Arc<dyn Renderer>> {
        self.inner.formatter.register(renderer)
    }

    pub fn formats(&self) -> Vec<String> {
        self.inner.formatter.formats()
    }

    /// Drop all open spans, aggregates and retained events.
    pub fn reset(&self) {
        self.inner.registry.reset();
    }
}
