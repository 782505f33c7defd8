use std::mem;

use crate::enchanter::Enchanter;
use crate::error::TimingResult;
use crate::event::{Metadata, MetadataValue, SpanHandle, TimingEvent};

/// Stops its span when dropped: normal return, early return, `?`, or a
/// panic unwinding through the scope.
///
/// If the stop fails, which under the strict policy happens when the scope
/// left an inner span open, the span stays open and the error is logged
/// with the context's open stack.
///
/// ```rust
/// use tim_the_enchanter::Enchanter;
///
/// let enchanter = Enchanter::default();
/// {
///     let _guard = enchanter.scope("load_config").unwrap();
///     // ... work ...
/// } // stopped here
/// assert_eq!(enchanter.snapshot().stats["load_config"].count, 1);
/// ```
#[must_use = "the span stops as soon as the guard is dropped"]
pub struct ScopeGuard {
    enchanter: Enchanter,
    handle: SpanHandle,
    pending: Metadata,
    finished: bool,
}

impl ScopeGuard {
    pub(crate) fn new(enchanter: Enchanter, handle: SpanHandle) -> Self {
        Self {
            enchanter,
            handle,
            pending: Metadata::new(),
            finished: false,
        }
    }

    pub fn handle(&self) -> &SpanHandle {
        &self.handle
    }

    /// Queue a metadata entry to attach when the span stops.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.pending.insert(key.into(), value.into());
    }

    /// Stop now and surface any error instead of logging it.
    pub fn finish(mut self) -> TimingResult<TimingEvent> {
        self.finished = true;
        let pending = mem::take(&mut self.pending);
        self.enchanter.stop_with(&self.handle, pending)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let pending = mem::take(&mut self.pending);
        if let Err(err) = self.enchanter.stop_with(&self.handle, pending) {
            // Drop cannot return the error, and it must never replace a
            // panic or error already leaving the scope.
            tracing::warn!(
                target: "tim_the_enchanter::scope",
                name = %self.handle.name(),
                context = %self.handle.context(),
                open = ?self.enchanter.currently_open_in(self.handle.context()),
                error = %err,
                "scoped span could not be stopped; it stays open"
            );
        }
    }
}

/// Time the rest of the enclosing block.
///
/// ```rust
/// use tim_the_enchanter::{time_scope, Enchanter};
///
/// fn layout(enchanter: &Enchanter) {
///     time_scope!(enchanter, "layout");
///     // ... layout code ...
/// }
///
/// let enchanter = Enchanter::default();
/// layout(&enchanter);
/// assert_eq!(enchanter.snapshot().stats["layout"].count, 1);
/// ```
#[macro_export]
macro_rules! time_scope {
    ($enchanter:expr, $name:expr) => {
        let _scope_guard = match $enchanter.scope($name) {
            Ok(guard) => Some(guard),
            Err(err) => {
                $crate::__tracing::warn!(error = %err, "time_scope could not start");
                None
            }
        };
    };
}
