//! # Performance History
//!
//! Time- and count-bounded series of per-tick samples for the active link,
//! plus windowed summary reports. A tick on which the active link could not
//! be probed is kept as an outage sample and counts against availability.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::saturating_sub;
use crate::metrics::MetricsSnapshot;
use crate::registry::LinkId;

/// One tick's record for the active link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub link: LinkId,
    /// `None` when the active link's probe failed on this tick.
    pub metrics: Option<MetricsSnapshot>,
    /// Active issues at capture time.
    pub issue_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub window_secs: i64,
    pub sample_count: usize,
    /// Samples that carried metrics.
    pub available_count: usize,
    pub availability_pct: f64,
    /// Metric stats cover available samples only; all zero during a full outage.
    pub latency_ms: LatencyStats,
    pub downlink_mbps: ThroughputStats,
    pub uplink_mbps: ThroughputStats,
    /// Samples per link within the window.
    pub samples_by_link: BTreeMap<LinkId, usize>,
    pub max_issue_count: usize,
}

/// Windowed report. An empty window is reported explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PerformanceReport {
    NoData { window_secs: i64 },
    Summary(PerformanceSummary),
}

pub struct PerformanceHistory {
    samples: VecDeque<PerformanceSample>,
    retention: chrono::Duration,
    max_samples: usize,
}

impl PerformanceHistory {
    pub fn new(retention: chrono::Duration, max_samples: usize) -> Self {
        PerformanceHistory {
            samples: VecDeque::new(),
            retention,
            max_samples: max_samples.max(1),
        }
    }

    /// Append a sample and drop whatever falls outside either bound.
    pub fn record(&mut self, sample: PerformanceSample) {
        let horizon = saturating_sub(sample.timestamp, self.retention);
        self.samples.push_back(sample);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        while self
            .samples
            .front()
            .is_some_and(|s| s.timestamp < horizon)
        {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    /// Samples captured at or after `now - window`.
    pub fn window(
        &self,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &PerformanceSample> {
        let since = saturating_sub(now, window);
        self.samples.iter().filter(move |s| s.timestamp >= since)
    }

    pub fn report(&self, window: chrono::Duration, now: DateTime<Utc>) -> PerformanceReport {
        let window_secs = window.num_seconds();
        let in_window: Vec<&PerformanceSample> = self.window(window, now).collect();
        if in_window.is_empty() {
            return PerformanceReport::NoData { window_secs };
        }

        let available: Vec<&MetricsSnapshot> =
            in_window.iter().filter_map(|s| s.metrics.as_ref()).collect();
        let latency: Vec<f64> = available.iter().map(|m| m.latency_ms).collect();
        let down: Vec<f64> = available.iter().map(|m| m.downlink_mbps).collect();
        let up: Vec<f64> = available.iter().map(|m| m.uplink_mbps).collect();

        let mut sorted = latency.clone();
        sorted.sort_by(f64::total_cmp);
        let range = throughput(&latency);

        let mut samples_by_link = BTreeMap::new();
        for s in &in_window {
            *samples_by_link.entry(s.link.clone()).or_insert(0) += 1;
        }

        PerformanceReport::Summary(PerformanceSummary {
            window_secs,
            sample_count: in_window.len(),
            available_count: available.len(),
            availability_pct: available.len() as f64 * 100.0 / in_window.len() as f64,
            latency_ms: LatencyStats {
                avg: range.avg,
                min: range.min,
                max: range.max,
                p50: percentile(&sorted, 50.0),
                p95: percentile(&sorted, 95.0),
            },
            downlink_mbps: throughput(&down),
            uplink_mbps: throughput(&up),
            samples_by_link,
            max_issue_count: in_window.iter().map(|s| s.issue_count).max().unwrap_or(0),
        })
    }
}

fn throughput(values: &[f64]) -> ThroughputStats {
    if values.is_empty() {
        return ThroughputStats {
            avg: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    ThroughputStats {
        avg: values.iter().sum::<f64>() / values.len() as f64,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Percentile of an ascending slice, linearly interpolated between ranks.
/// Returns 0 for an empty slice.
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(at: DateTime<Utc>, latency: f64, down: f64) -> PerformanceSample {
        PerformanceSample {
            timestamp: at,
            link: LinkId::from("starlink"),
            metrics: Some(MetricsSnapshot::new(latency, down, 10.0, 0.0, 9.0, 0.0, at)),
            issue_count: 0,
        }
    }

    fn outage(at: DateTime<Utc>) -> PerformanceSample {
        PerformanceSample {
            timestamp: at,
            link: LinkId::from("starlink"),
            metrics: None,
            issue_count: 1,
        }
    }

    #[test]
    fn percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 4.0);
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 90.0) - 3.7).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn empty_window_is_no_data() {
        let h = PerformanceHistory::new(Duration::hours(24), 1000);
        assert_eq!(
            h.report(Duration::hours(1), Utc::now()),
            PerformanceReport::NoData { window_secs: 3600 }
        );
    }

    #[test]
    fn summary_over_window() {
        let mut h = PerformanceHistory::new(Duration::hours(24), 1000);
        let now = Utc::now();
        // Outside the one-hour window.
        h.record(sample(now - Duration::hours(2), 900.0, 1.0));
        for (i, latency) in [40.0, 50.0, 60.0, 70.0, 80.0].into_iter().enumerate() {
            h.record(sample(now - Duration::minutes(50 - i as i64 * 10), latency, 100.0 + i as f64));
        }

        let PerformanceReport::Summary(s) = h.report(Duration::hours(1), now) else {
            panic!("expected summary");
        };
        assert_eq!(s.sample_count, 5);
        assert_eq!(s.latency_ms.min, 40.0);
        assert_eq!(s.latency_ms.max, 80.0);
        assert!((s.latency_ms.avg - 60.0).abs() < 1e-9);
        assert!((s.latency_ms.p50 - 60.0).abs() < 1e-9);
        assert!((s.latency_ms.p95 - 78.0).abs() < 1e-9);
        assert_eq!(s.downlink_mbps.min, 100.0);
        assert_eq!(s.downlink_mbps.max, 104.0);
        assert_eq!(s.samples_by_link[&LinkId::from("starlink")], 5);
        assert_eq!(s.available_count, 5);
        assert_eq!(s.availability_pct, 100.0);
    }

    #[test]
    fn outage_ticks_count_against_availability() {
        let mut h = PerformanceHistory::new(Duration::hours(24), 1000);
        let now = Utc::now();
        h.record(sample(now - Duration::minutes(3), 40.0, 100.0));
        h.record(outage(now - Duration::minutes(2)));
        h.record(outage(now - Duration::minutes(1)));
        h.record(sample(now, 60.0, 120.0));

        let PerformanceReport::Summary(s) = h.report(Duration::hours(1), now) else {
            panic!("expected summary");
        };
        assert_eq!(s.sample_count, 4);
        assert_eq!(s.available_count, 2);
        assert_eq!(s.availability_pct, 50.0);
        assert!((s.latency_ms.avg - 50.0).abs() < 1e-9);
        assert_eq!(s.downlink_mbps.min, 100.0);
        assert_eq!(s.max_issue_count, 1);
    }

    #[test]
    fn full_outage_reports_zeroed_stats() {
        let mut h = PerformanceHistory::new(Duration::hours(24), 1000);
        let now = Utc::now();
        h.record(outage(now));

        let PerformanceReport::Summary(s) = h.report(Duration::hours(1), now) else {
            panic!("expected summary");
        };
        assert_eq!(s.availability_pct, 0.0);
        assert_eq!(s.latency_ms.max, 0.0);
        assert_eq!(s.uplink_mbps.min, 0.0);
    }

    #[test]
    fn unbounded_window_covers_everything() {
        let mut h = PerformanceHistory::new(chrono::TimeDelta::MAX, 1000);
        let now = Utc::now();
        h.record(sample(now - Duration::days(3), 40.0, 100.0));
        h.record(sample(now, 60.0, 100.0));
        assert_eq!(h.len(), 2);

        let PerformanceReport::Summary(s) = h.report(chrono::TimeDelta::MAX, now) else {
            panic!("expected summary");
        };
        assert_eq!(s.sample_count, 2);
    }

    #[test]
    fn bounded_by_count_and_age() {
        let mut h = PerformanceHistory::new(Duration::seconds(100), 3);
        let t0 = Utc::now();
        for i in 0..5 {
            h.record(sample(t0 + Duration::seconds(i), 40.0, 100.0));
        }
        assert_eq!(h.len(), 3);

        h.record(sample(t0 + Duration::seconds(500), 40.0, 100.0));
        assert_eq!(h.len(), 1);
    }
}
