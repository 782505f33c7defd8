use hdrhistogram::Histogram;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PercentileMode;
use crate::error::{TimingError, TimingResult};
use crate::event::duration_nanos;

/// HdrHistogram range: 1 ns → 1 hour. Longer spans saturate at the top.
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 3_600_000_000_000;

/// One requested percentile and its value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    /// In (0, 100]
    pub percentile: f64,
    #[serde(with = "duration_nanos")]
    pub value: Duration,
}

impl PercentileValue {
    /// Short column label: `p50`, `p99.9`.
    pub fn label(&self) -> String {
        format!("p{}", self.percentile)
    }
}

// ─── Tracker ─────────────────────────────────────────────────────

/// Per-bucket percentile state, one variant per [`PercentileMode`].
pub(crate) enum PercentileTracker {
    Histogram(Histogram<u64>),
    Reservoir {
        samples: Vec<u64>,
        capacity: usize,
        seen: u64,
        rng: StdRng,
    },
    Exact(Vec<u64>),
}

impl PercentileTracker {
    pub fn new(mode: PercentileMode) -> TimingResult<Self> {
        Ok(match mode {
            PercentileMode::Histogram {
                significant_figures,
            } => Self::Histogram(
                Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, significant_figures)
                    .map_err(|e| TimingError::Histogram(e.to_string()))?,
            ),
            PercentileMode::Reservoir { capacity } => Self::Reservoir {
                samples: Vec::with_capacity(capacity.min(4096)),
                capacity,
                seen: 0,
                rng: StdRng::from_entropy(),
            },
            PercentileMode::Exact => Self::Exact(Vec::new()),
        })
    }

    pub fn record(&mut self, nanos: u64) {
        match self {
            Self::Histogram(hist) => hist.saturating_record(nanos),
            Self::Reservoir {
                samples,
                capacity,
                seen,
                rng,
            } => {
                // Algorithm R: the k-th sample replaces a random slot with
                // probability capacity / k.
                *seen += 1;
                if samples.len() < *capacity {
                    samples.push(nanos);
                } else {
                    let slot = rng.gen_range(0..*seen);
                    if (slot as usize) < *capacity {
                        samples[slot as usize] = nanos;
                    }
                }
            }
            Self::Exact(samples) => samples.push(nanos),
        }
    }

    /// What a snapshot takes while the bucket is locked. Histogram queries
    /// cost the same at any sample count, so they run here; sample modes
    /// only copy, and sorting is left to [`Readout::resolve`].
    pub fn readout(&self, wanted: &[f64], min: u64, max: u64) -> Readout {
        match self {
            Self::Histogram(hist) => Readout::Ready(collect(wanted, min, max, |p| {
                hist.value_at_percentile(p)
            })),
            Self::Reservoir { samples, .. } | Self::Exact(samples) => {
                Readout::Samples(samples.clone())
            }
        }
    }
}

/// Percentile state copied out of a bucket.
pub(crate) enum Readout {
    Ready(Vec<PercentileValue>),
    Samples(Vec<u64>),
}

impl Readout {
    /// Values for each requested percentile, clamped into `[min, max]` so
    /// histogram bucket rounding never escapes the exact extremes.
    pub fn resolve(self, wanted: &[f64], min: u64, max: u64) -> Vec<PercentileValue> {
        match self {
            Self::Ready(values) => values,
            Self::Samples(mut samples) => {
                samples.sort_unstable();
                collect(wanted, min, max, |p| nearest_rank(&samples, p))
            }
        }
    }
}

fn collect(wanted: &[f64], min: u64, max: u64, at: impl Fn(f64) -> u64) -> Vec<PercentileValue> {
    wanted
        .iter()
        .map(|&p| PercentileValue {
            percentile: p,
            value: Duration::from_nanos(at(p).clamp(min, max)),
        })
        .collect()
}

/// Nearest-rank percentile over an ascending slice.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(tracker: &PercentileTracker, wanted: &[f64], min: u64, max: u64) -> Vec<PercentileValue> {
        tracker.readout(wanted, min, max).resolve(wanted, min, max)
    }

    fn values(tracker: &PercentileTracker, wanted: &[f64], max: u64) -> Vec<u64> {
        read(tracker, wanted, 1, max)
            .iter()
            .map(|p| p.value.as_nanos() as u64)
            .collect()
    }

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(nearest_rank(&sorted, 50.0), 50);
        assert_eq!(nearest_rank(&sorted, 99.0), 99);
        assert_eq!(nearest_rank(&sorted, 100.0), 100);
        assert_eq!(nearest_rank(&[7], 1.0), 7);
        assert_eq!(nearest_rank(&[], 50.0), 0);
    }

    #[test]
    fn test_exact_mode() {
        let mut tracker = PercentileTracker::new(PercentileMode::Exact).unwrap();
        for v in (1..=1000).rev() {
            tracker.record(v);
        }
        assert_eq!(values(&tracker, &[50.0, 90.0, 99.0], 1000), vec![500, 900, 990]);
    }

    #[test]
    fn test_exact_readout_is_a_copy() {
        let mut tracker = PercentileTracker::new(PercentileMode::Exact).unwrap();
        for v in [30, 10, 20] {
            tracker.record(v);
        }
        let readout = tracker.readout(&[50.0, 100.0], 10, 30);
        // Samples recorded after the copy do not leak into it.
        tracker.record(1_000);

        let got: Vec<u64> = readout
            .resolve(&[50.0, 100.0], 10, 30)
            .iter()
            .map(|p| p.value.as_nanos() as u64)
            .collect();
        assert_eq!(got, vec![20, 30]);
    }

    #[test]
    fn test_histogram_mode_relative_error() {
        let mut tracker = PercentileTracker::new(PercentileMode::Histogram {
            significant_figures: 3,
        })
        .unwrap();
        for v in 1..=10_000u64 {
            tracker.record(v * 1_000);
        }
        let p50 = values(&tracker, &[50.0], 10_000_000)[0] as f64;
        let expected = 5_000_000.0;
        assert!((p50 - expected).abs() / expected <= 0.001, "p50 = {p50}");
    }

    #[test]
    fn test_reservoir_stays_bounded() {
        let mut tracker =
            PercentileTracker::new(PercentileMode::Reservoir { capacity: 64 }).unwrap();
        for v in 1..=10_000 {
            tracker.record(v);
        }
        match &tracker {
            PercentileTracker::Reservoir { samples, seen, .. } => {
                assert_eq!(samples.len(), 64);
                assert_eq!(*seen, 10_000);
            }
            _ => unreachable!(),
        }
        let p100 = values(&tracker, &[100.0], 10_000)[0];
        assert!(p100 <= 10_000);
    }

    #[test]
    fn test_percentiles_clamped_to_extremes() {
        let mut tracker = PercentileTracker::new(PercentileMode::Histogram {
            significant_figures: 1,
        })
        .unwrap();
        tracker.record(1_234_567);
        let got = read(&tracker, &[50.0, 100.0], 1_234_567, 1_234_567);
        assert!(got
            .iter()
            .all(|p| p.value == Duration::from_nanos(1_234_567)));
    }

    #[test]
    fn test_label() {
        let p = PercentileValue {
            percentile: 99.9,
            value: Duration::ZERO,
        };
        assert_eq!(p.label(), "p99.9");
        let p = PercentileValue {
            percentile: 50.0,
            value: Duration::ZERO,
        };
        assert_eq!(p.label(), "p50");
    }
}
