use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::percentiles::{PercentileTracker, Readout};
use super::{Snapshot, Stats};
use crate::config::PercentileMode;
use crate::error::TimingResult;
use crate::event::TimingEvent;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe per-name statistics engine.
/// The registry calls `record()` on every close, reports call `snapshot()`.
///
/// Each bucket has its own lock; the name → bucket map is only written
/// when a name is seen for the first time.
pub(crate) struct Aggregator {
    mode: PercentileMode,
    percentiles: Vec<f64>,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

// ─── Internal state ──────────────────────────────────────────────

/// Running totals for one name.
struct Bucket {
    count: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    abandoned: u64,
    tracker: PercentileTracker,
}

/// What `snapshot` copies out of a bucket while holding its lock.
struct BucketCopy {
    count: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    abandoned: u64,
    readout: Readout,
}

// ─── Aggregator impl ─────────────────────────────────────────────

impl Aggregator {
    pub fn new(mode: PercentileMode, percentiles: Vec<f64>) -> Self {
        Self {
            mode,
            percentiles,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one closed event into its bucket.
    pub fn record(&self, event: &TimingEvent) -> TimingResult<()> {
        let bucket = self.bucket(&event.name)?;
        bucket.lock().record(event.duration, event.abandoned);

        tracing::trace!(
            target: "tim_the_enchanter::aggregate",
            name = %event.name,
            duration_ns = event.duration.as_nanos() as u64,
            "event recorded"
        );
        Ok(())
    }

    /// Wipe all buckets.
    pub fn reset(&self) {
        self.buckets.write().clear();
    }

    /// Copy the bucket list under a short read lock, then copy each bucket
    /// under its own lock. Percentiles are computed after the lock is
    /// released, so `record` callers wait only for the copy.
    pub fn snapshot(&self) -> Snapshot {
        let buckets: Vec<(String, Arc<Mutex<Bucket>>)> = self
            .buckets
            .read()
            .iter()
            .map(|(name, bucket)| (name.clone(), Arc::clone(bucket)))
            .collect();

        let stats = buckets
            .into_iter()
            .filter_map(|(name, bucket)| {
                let copy = bucket.lock().copy(&self.percentiles)?;
                let stats = copy.into_stats(&name, &self.percentiles);
                Some((name, stats))
            })
            .collect::<BTreeMap<_, _>>();

        // Derived from the copied counts so the label always matches the rows.
        let version = stats.values().map(|s| s.count).sum();

        Snapshot {
            version,
            generated_at: Utc::now(),
            stats,
            open: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Find or lazily create the bucket for `name`.
    fn bucket(&self, name: &str) -> TimingResult<Arc<Mutex<Bucket>>> {
        if let Some(bucket) = self.buckets.read().get(name) {
            return Ok(Arc::clone(bucket));
        }

        let mut map = self.buckets.write();
        if let Some(bucket) = map.get(name) {
            return Ok(Arc::clone(bucket));
        }
        let bucket = Arc::new(Mutex::new(Bucket::new(self.mode)?));
        map.insert(name.to_owned(), Arc::clone(&bucket));
        Ok(bucket)
    }
}

// ─── Bucket impl ─────────────────────────────────────────────────

impl Bucket {
    fn new(mode: PercentileMode) -> TimingResult<Self> {
        Ok(Self {
            count: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            abandoned: 0,
            tracker: PercentileTracker::new(mode)?,
        })
    }

    fn record(&mut self, duration: Duration, abandoned: bool) {
        let ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.count += 1;
        self.total_ns = self.total_ns.saturating_add(ns);
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        if abandoned {
            self.abandoned += 1;
        }
        self.tracker.record(ns);
    }

    /// `None` for a bucket that was created but not yet written.
    fn copy(&self, percentiles: &[f64]) -> Option<BucketCopy> {
        if self.count == 0 {
            return None;
        }

        Some(BucketCopy {
            count: self.count,
            total_ns: self.total_ns,
            min_ns: self.min_ns,
            max_ns: self.max_ns,
            abandoned: self.abandoned,
            readout: self.tracker.readout(percentiles, self.min_ns, self.max_ns),
        })
    }
}

impl BucketCopy {
    fn into_stats(self, name: &str, percentiles: &[f64]) -> Stats {
        Stats {
            name: name.to_owned(),
            count: self.count,
            total: Duration::from_nanos(self.total_ns),
            mean: Duration::from_nanos(self.total_ns / self.count),
            min: Duration::from_nanos(self.min_ns),
            max: Duration::from_nanos(self.max_ns),
            abandoned: self.abandoned,
            percentiles: self
                .readout
                .resolve(percentiles, self.min_ns, self.max_ns),
        }
    }
}
