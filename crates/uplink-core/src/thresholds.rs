//! # Scenario Threshold Profiles
//!
//! Named scenarios map to fixed threshold presets. Exactly one profile is
//! active at a time, held behind an [`ArcSwap`]: switching replaces the whole
//! profile in one pointer store, and a tick that loads the profile once
//! can never observe a mixture of old and new values.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metrics::MetricsSnapshot;

/// Operating context the thresholds are tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Normal,
    Humanitarian,
    Medical,
    Disaster,
    Conflict,
    Custom,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scenario::Normal => "normal",
            Scenario::Humanitarian => "humanitarian",
            Scenario::Medical => "medical",
            Scenario::Disaster => "disaster",
            Scenario::Conflict => "conflict",
            Scenario::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Scenario {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Scenario::Normal),
            "humanitarian" => Ok(Scenario::Humanitarian),
            "medical" => Ok(Scenario::Medical),
            "disaster" => Ok(Scenario::Disaster),
            "conflict" => Ok(Scenario::Conflict),
            "custom" => Ok(Scenario::Custom),
            _ => Err(ConfigError::UnknownScenario(s.to_string())),
        }
    }
}

/// Which metric a threshold guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Latency,
    Downlink,
    Uplink,
    Obstruction,
    Snr,
}

/// A single threshold violation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub metric: Metric,
    pub value: f64,
    pub limit: f64,
}

impl Breach {
    /// How far past the limit the value is, as a ratio ≥ 1.
    ///
    /// Ceilings (latency, obstruction) use `value / limit`; floors
    /// (bandwidth, SNR) use `limit / value`.
    pub fn ratio(&self) -> f64 {
        match self.metric {
            Metric::Latency | Metric::Obstruction => self.value / self.limit,
            Metric::Downlink | Metric::Uplink | Metric::Snr => {
                if self.value <= 0.0 {
                    f64::INFINITY
                } else {
                    self.limit / self.value
                }
            }
        }
    }
}

/// Acceptable-performance limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_latency_ms: f64,
    pub min_downlink_mbps: f64,
    pub min_uplink_mbps: f64,
    /// Fraction of sky view, [0, 1].
    pub max_obstruction_fraction: f64,
    pub min_snr_db: f64,
}

impl Thresholds {
    /// Preset for a named scenario. `Custom` has no preset.
    pub fn preset(scenario: Scenario) -> Option<Thresholds> {
        let (latency, down, up, obstruction, snr) = match scenario {
            Scenario::Normal => (100.0, 20.0, 5.0, 0.05, 7.0),
            Scenario::Humanitarian => (200.0, 10.0, 2.0, 0.15, 5.0),
            Scenario::Medical => (150.0, 15.0, 5.0, 0.10, 6.0),
            Scenario::Disaster => (300.0, 5.0, 1.0, 0.25, 4.0),
            Scenario::Conflict => (250.0, 8.0, 2.0, 0.20, 4.5),
            Scenario::Custom => return None,
        };
        Some(Thresholds {
            max_latency_ms: latency,
            min_downlink_mbps: down,
            min_uplink_mbps: up,
            max_obstruction_fraction: obstruction,
            min_snr_db: snr,
        })
    }

    /// Reject out-of-range values instead of clamping them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_latency_ms", self.max_latency_ms),
            ("min_downlink_mbps", self.min_downlink_mbps),
            ("min_uplink_mbps", self.min_uplink_mbps),
        ];
        for (key, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive { key, value });
            }
        }
        if !(0.0..=1.0).contains(&self.max_obstruction_fraction) {
            return Err(ConfigError::FractionOutOfRange {
                key: "max_obstruction_fraction",
                value: self.max_obstruction_fraction,
            });
        }
        if !self.min_snr_db.is_finite() || self.min_snr_db < 0.0 {
            return Err(ConfigError::Negative {
                key: "min_snr_db",
                value: self.min_snr_db,
            });
        }
        Ok(())
    }

    /// Every threshold `metrics` violates, evaluated independently.
    pub fn breaches(&self, metrics: &MetricsSnapshot) -> Vec<Breach> {
        let mut out = Vec::new();
        if metrics.latency_ms > self.max_latency_ms {
            out.push(Breach {
                metric: Metric::Latency,
                value: metrics.latency_ms,
                limit: self.max_latency_ms,
            });
        }
        if metrics.downlink_mbps < self.min_downlink_mbps {
            out.push(Breach {
                metric: Metric::Downlink,
                value: metrics.downlink_mbps,
                limit: self.min_downlink_mbps,
            });
        }
        if metrics.uplink_mbps < self.min_uplink_mbps {
            out.push(Breach {
                metric: Metric::Uplink,
                value: metrics.uplink_mbps,
                limit: self.min_uplink_mbps,
            });
        }
        if metrics.obstruction_fraction > self.max_obstruction_fraction {
            out.push(Breach {
                metric: Metric::Obstruction,
                value: metrics.obstruction_fraction,
                limit: self.max_obstruction_fraction,
            });
        }
        if metrics.snr_db < self.min_snr_db {
            out.push(Breach {
                metric: Metric::Snr,
                value: metrics.snr_db,
                limit: self.min_snr_db,
            });
        }
        out
    }

    pub fn satisfied_by(&self, metrics: &MetricsSnapshot) -> bool {
        self.breaches(metrics).is_empty()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            max_latency_ms: 100.0,
            min_downlink_mbps: 20.0,
            min_uplink_mbps: 5.0,
            max_obstruction_fraction: 0.05,
            min_snr_db: 7.0,
        }
    }
}

/// Partial threshold override. Only supplied keys are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdOverrides {
    pub max_latency_ms: Option<f64>,
    pub min_downlink_mbps: Option<f64>,
    pub min_uplink_mbps: Option<f64>,
    pub max_obstruction_fraction: Option<f64>,
    pub min_snr_db: Option<f64>,
}

impl ThresholdOverrides {
    pub fn is_empty(&self) -> bool {
        self.max_latency_ms.is_none()
            && self.min_downlink_mbps.is_none()
            && self.min_uplink_mbps.is_none()
            && self.max_obstruction_fraction.is_none()
            && self.min_snr_db.is_none()
    }

    /// Merge onto `base`, validating the result.
    pub fn merge_onto(&self, base: &Thresholds) -> Result<Thresholds, ConfigError> {
        let merged = Thresholds {
            max_latency_ms: self.max_latency_ms.unwrap_or(base.max_latency_ms),
            min_downlink_mbps: self.min_downlink_mbps.unwrap_or(base.min_downlink_mbps),
            min_uplink_mbps: self.min_uplink_mbps.unwrap_or(base.min_uplink_mbps),
            max_obstruction_fraction: self
                .max_obstruction_fraction
                .unwrap_or(base.max_obstruction_fraction),
            min_snr_db: self.min_snr_db.unwrap_or(base.min_snr_db),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// A scenario and the thresholds in force for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub scenario: Scenario,
    pub thresholds: Thresholds,
}

impl ThresholdProfile {
    pub fn for_scenario(scenario: Scenario) -> Self {
        let thresholds = Thresholds::preset(scenario).unwrap_or_default();
        ThresholdProfile {
            scenario,
            thresholds,
        }
    }
}

/// Shared, atomically switchable active profile.
pub struct ProfileHandle {
    current: ArcSwap<ThresholdProfile>,
}

impl ProfileHandle {
    pub fn new(profile: ThresholdProfile) -> Result<Self, ConfigError> {
        profile.thresholds.validate()?;
        Ok(ProfileHandle {
            current: ArcSwap::from_pointee(profile),
        })
    }

    /// Start from `scenario`, then merge `overrides` if any were supplied.
    pub fn from_config(
        scenario: Scenario,
        overrides: &ThresholdOverrides,
    ) -> Result<Self, ConfigError> {
        let handle = Self::new(ThresholdProfile::for_scenario(scenario))?;
        if !overrides.is_empty() {
            handle.apply_overrides(overrides)?;
        }
        Ok(handle)
    }

    /// Consistent snapshot of the active profile.
    pub fn load(&self) -> Arc<ThresholdProfile> {
        self.current.load_full()
    }

    /// Replace the whole mapping with the preset for `scenario`.
    ///
    /// Selecting `Custom` keeps the current values and relabels them.
    pub fn set_scenario(&self, scenario: Scenario) -> Arc<ThresholdProfile> {
        let next = match Thresholds::preset(scenario) {
            Some(thresholds) => Arc::new(ThresholdProfile {
                scenario,
                thresholds,
            }),
            None => Arc::new(ThresholdProfile {
                scenario: Scenario::Custom,
                thresholds: self.load().thresholds,
            }),
        };
        self.current.store(next.clone());
        tracing::info!(scenario = %scenario, "threshold scenario switched");
        next
    }

    /// Merge supplied keys into the active mapping and mark it custom.
    ///
    /// The merged mapping is validated before it is published; on error the
    /// active profile is unchanged.
    pub fn apply_overrides(
        &self,
        overrides: &ThresholdOverrides,
    ) -> Result<Arc<ThresholdProfile>, ConfigError> {
        loop {
            let current = self.current.load_full();
            let thresholds = overrides.merge_onto(&current.thresholds)?;
            let next = Arc::new(ThresholdProfile {
                scenario: Scenario::Custom,
                thresholds,
            });
            let prev = self.current.compare_and_swap(&current, next.clone());
            if Arc::ptr_eq(&*prev, &current) {
                tracing::info!(?overrides, "custom thresholds applied");
                return Ok(next);
            }
        }
    }
}
