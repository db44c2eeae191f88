//! # Diagnostics Baseline
//!
//! Rolling percentile baselines per link over the most recent samples:
//! p90 of downlink, uplink and SNR, p10 of latency. A baseline exists once
//! `min_samples` have accumulated. Each new sample is first checked against
//! the baseline as it stood, then folded in, so a recompute never rewrites
//! alerts that were already raised.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::percentile;
use crate::metrics::MetricsSnapshot;
use crate::registry::LinkId;

/// Raised alerts kept for review.
const ALERT_RETENTION: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineConfig {
    pub window: usize,
    pub min_samples: usize,
    /// Drift fires when downlink falls below `ratio × baseline`.
    pub drift_ratio: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        BaselineConfig {
            window: 100,
            min_samples: 10,
            drift_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub downlink_mbps: f64,
    pub uplink_mbps: f64,
    pub snr_db: f64,
    pub latency_ms: f64,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BaselineStatus {
    NotEstablished { samples: usize, required: usize },
    Established(Baseline),
}

impl BaselineStatus {
    pub fn is_established(&self) -> bool {
        matches!(self, BaselineStatus::Established(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub link: LinkId,
    pub detected_at: DateTime<Utc>,
    pub observed_downlink_mbps: f64,
    pub baseline_downlink_mbps: f64,
    pub acknowledged: bool,
}

/// What a single sample changed.
#[derive(Debug, Default, PartialEq)]
pub struct BaselineUpdate {
    pub drift: Option<DriftAlert>,
    /// The link's baseline became established with this sample.
    pub established: Option<Baseline>,
}

#[derive(Debug, Default)]
struct RollingBaseline {
    samples: VecDeque<MetricsSnapshot>,
    current: Option<Baseline>,
}

impl RollingBaseline {
    fn recompute(&mut self, now: DateTime<Utc>) -> Baseline {
        let column = |f: fn(&MetricsSnapshot) -> f64| {
            let mut v: Vec<f64> = self.samples.iter().map(f).collect();
            v.sort_by(f64::total_cmp);
            v
        };
        let baseline = Baseline {
            downlink_mbps: percentile(&column(|m| m.downlink_mbps), 90.0),
            uplink_mbps: percentile(&column(|m| m.uplink_mbps), 90.0),
            snr_db: percentile(&column(|m| m.snr_db), 90.0),
            latency_ms: percentile(&column(|m| m.latency_ms), 10.0),
            sample_count: self.samples.len(),
            computed_at: now,
        };
        self.current = Some(baseline);
        baseline
    }
}

pub struct DiagnosticsBaseline {
    config: BaselineConfig,
    links: BTreeMap<LinkId, RollingBaseline>,
    alerts: VecDeque<DriftAlert>,
}

impl DiagnosticsBaseline {
    pub fn new(config: BaselineConfig) -> Self {
        DiagnosticsBaseline {
            config,
            links: BTreeMap::new(),
            alerts: VecDeque::new(),
        }
    }

    /// Check `metrics` for drift, then fold it into the link's window.
    pub fn record(
        &mut self,
        link: &LinkId,
        metrics: &MetricsSnapshot,
        now: DateTime<Utc>,
    ) -> BaselineUpdate {
        let mut update = BaselineUpdate::default();
        let state = self.links.entry(link.clone()).or_default();

        if let Some(baseline) = &state.current {
            if metrics.downlink_mbps < baseline.downlink_mbps * self.config.drift_ratio {
                let alert = DriftAlert {
                    link: link.clone(),
                    detected_at: now,
                    observed_downlink_mbps: metrics.downlink_mbps,
                    baseline_downlink_mbps: baseline.downlink_mbps,
                    acknowledged: false,
                };
                tracing::warn!(
                    link = %link,
                    observed = metrics.downlink_mbps,
                    baseline = baseline.downlink_mbps,
                    "downlink drifted below baseline"
                );
                update.drift = Some(alert.clone());
                self.alerts.push_back(alert);
                while self.alerts.len() > ALERT_RETENTION {
                    self.alerts.pop_front();
                }
            }
        }

        state.samples.push_back(metrics.clone());
        while state.samples.len() > self.config.window {
            state.samples.pop_front();
        }

        if state.samples.len() >= self.config.min_samples {
            let was_established = state.current.is_some();
            let baseline = state.recompute(now);
            if !was_established {
                tracing::info!(
                    link = %link,
                    samples = baseline.sample_count,
                    downlink = baseline.downlink_mbps,
                    latency = baseline.latency_ms,
                    "baseline established"
                );
                update.established = Some(baseline);
            }
        }
        update
    }

    pub fn status(&self, link: &LinkId) -> BaselineStatus {
        let state = self.links.get(link);
        match state.and_then(|s| s.current) {
            Some(baseline) => BaselineStatus::Established(baseline),
            None => BaselineStatus::NotEstablished {
                samples: state.map_or(0, |s| s.samples.len()),
                required: self.config.min_samples,
            },
        }
    }

    pub fn alerts(&self) -> impl Iterator<Item = &DriftAlert> {
        self.alerts.iter()
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.acknowledged).count()
    }

    /// Acknowledge the alert at `index` (oldest first).
    pub fn acknowledge(&mut self, index: usize) -> bool {
        match self.alerts.get_mut(index) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_acknowledged(&mut self) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|a| !a.acknowledged);
        before - self.alerts.len()
    }

    /// Operator reset: forget every sample and baseline. Alerts are kept.
    pub fn reset(&mut self) {
        self.links.clear();
        tracing::info!("diagnostics baselines reset");
    }
}
