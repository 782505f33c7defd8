use serde::{Deserialize, Serialize};

use crate::error::{TimingError, TimingResult};

// ─── Policies ────────────────────────────────────────────────────

/// What `stop` does when the handle is open but not innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Refuse with `OutOfOrderStop`; nothing is closed.
    #[default]
    Strict,
    /// Close every span above the target at the same instant, flag them
    /// `abandoned`, then close the target.
    AutoClose,
}

/// How each bucket answers percentile queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PercentileMode {
    /// HdrHistogram. Bounded memory; relative error at most
    /// 10^-significant_figures of the reported value.
    Histogram { significant_figures: u8 },
    /// Uniform random sample of at most `capacity` durations.
    Reservoir { capacity: usize },
    /// Every duration is kept. Exact, unbounded memory.
    Exact,
}

impl Default for PercentileMode {
    fn default() -> Self {
        Self::Histogram {
            significant_figures: 3,
        }
    }
}

/// Sanity limits for caller-supplied metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLimits {
    /// Keys per map, checked at every nesting level
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,

    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,

    /// Nested maps allowed below the top level
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for MetadataLimits {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_key_len: default_max_key_len(),
            max_string_len: default_max_string_len(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_entries() -> usize {
    32
}
fn default_max_key_len() -> usize {
    64
}
fn default_max_string_len() -> usize {
    1024
}
fn default_max_depth() -> usize {
    4
}

// ─── Top-level configuration ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnchanterConfig {
    #[serde(default)]
    pub stop_policy: StopPolicy,

    #[serde(default)]
    pub percentile_mode: PercentileMode,

    /// Percentiles reported per name, each in (0, 100]
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,

    /// Keep closed events for the hierarchical and chronological reports
    #[serde(default = "default_retain_events")]
    pub retain_events: bool,

    /// Ring size of the retained-event log; oldest events drop first
    #[serde(default = "default_max_retained_events")]
    pub max_retained_events: usize,

    #[serde(default)]
    pub metadata_limits: MetadataLimits,
}

fn default_percentiles() -> Vec<f64> {
    vec![50.0, 90.0, 99.0]
}
fn default_retain_events() -> bool {
    true
}
fn default_max_retained_events() -> usize {
    10_000
}

impl Default for EnchanterConfig {
    fn default() -> Self {
        Self {
            stop_policy: StopPolicy::default(),
            percentile_mode: PercentileMode::default(),
            percentiles: default_percentiles(),
            retain_events: default_retain_events(),
            max_retained_events: default_max_retained_events(),
            metadata_limits: MetadataLimits::default(),
        }
    }
}

impl EnchanterConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> TimingResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    pub fn with_percentile_mode(mut self, mode: PercentileMode) -> Self {
        self.percentile_mode = mode;
        self
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn with_event_retention(mut self, retain: bool) -> Self {
        self.retain_events = retain;
        self
    }

    pub fn validate(&self) -> TimingResult<()> {
        match self.percentile_mode {
            PercentileMode::Histogram {
                significant_figures,
            } if significant_figures > 5 => {
                return Err(TimingError::InvalidConfig(
                    "significant_figures must be between 0 and 5".into(),
                ));
            }
            PercentileMode::Reservoir { capacity } if capacity == 0 => {
                return Err(TimingError::InvalidConfig(
                    "reservoir capacity must be at least 1".into(),
                ));
            }
            _ => {}
        }

        if let Some(bad) = self
            .percentiles
            .iter()
            .find(|p| !p.is_finite() || **p <= 0.0 || **p > 100.0)
        {
            return Err(TimingError::InvalidConfig(format!(
                "percentile {bad} must be in (0, 100]"
            )));
        }

        if self.retain_events && self.max_retained_events == 0 {
            return Err(TimingError::InvalidConfig(
                "max_retained_events must be at least 1 when retention is on".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EnchanterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stop_policy, StopPolicy::Strict);
        assert_eq!(config.percentiles, vec![50.0, 90.0, 99.0]);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EnchanterConfig::from_json_str(
            r#"{
                "stop_policy": "auto_close",
                "percentile_mode": { "kind": "reservoir", "capacity": 256 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.stop_policy, StopPolicy::AutoClose);
        assert_eq!(
            config.percentile_mode,
            PercentileMode::Reservoir { capacity: 256 }
        );
        assert!(config.retain_events);
        assert_eq!(config.metadata_limits, MetadataLimits::default());
    }

    #[test]
    fn test_rejects_out_of_range_percentile() {
        let err = EnchanterConfig::default()
            .with_percentiles(vec![50.0, 101.0])
            .validate()
            .unwrap_err();
        assert!(matches!(err, TimingError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_empty_reservoir() {
        let result = EnchanterConfig::from_json_str(
            r#"{ "percentile_mode": { "kind": "reservoir", "capacity": 0 } }"#,
        );
        assert!(matches!(result, Err(TimingError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_too_many_significant_figures() {
        let config = EnchanterConfig::default().with_percentile_mode(
            PercentileMode::Histogram {
                significant_figures: 6,
            },
        );
        assert!(config.validate().is_err());
    }
}
