//! Tim the Enchanter: in-process performance timing.
//!
//! Mark the start and end of named, possibly nested operations and read
//! the aggregated statistics back as a table, a JSON document, a call
//! tree, or a timeline.
//!
//! - Spans nest per context (a thread, or an explicit [`ContextId`] for
//!   async tasks) and must be stopped innermost first unless
//!   [`StopPolicy::AutoClose`] is configured.
//! - Each name gets a bucket with count, total, mean, min, max and the
//!   configured percentiles.
//! - Reports are rendered from an immutable [`Snapshot`], never from live
//!   state.
//!
//! # Example
//!
//! ```rust
//! use tim_the_enchanter::{Enchanter, ReportFormat, ReportOptions};
//!
//! let enchanter = Enchanter::default();
//!
//! let parse = enchanter.start("parse").unwrap();
//! enchanter.time("tokenize", || { /* ... */ }).unwrap();
//! enchanter.stop(&parse).unwrap();
//!
//! let report = enchanter
//!     .report(ReportFormat::Hierarchical, &ReportOptions::default())
//!     .unwrap();
//! println!("{report}");
//! ```

mod clock;
mod config;
mod enchanter;
mod error;
mod event;
mod metrics;
mod registry;
mod report;
mod scope;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{EnchanterConfig, MetadataLimits, PercentileMode, StopPolicy};
pub use enchanter::Enchanter;
pub use error::{TimingError, TimingResult};
pub use event::{
    ActiveSpan, ContextId, EventId, EventState, Metadata, MetadataValue, SpanHandle, TimingEvent,
};
pub use metrics::{OpenStack, PercentileValue, Snapshot, Stats};
pub use report::{Renderer, Report, ReportFormat, ReportOptions, SortKey, StructuredReport};
pub use scope::ScopeGuard;

#[doc(hidden)]
pub use tracing as __tracing;
