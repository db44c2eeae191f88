//! # Link Health Scoring
//!
//! Composite health score in [0, 1] from a single metrics snapshot.
//!
//! $$\text{Score} = 0.3 \cdot (1 - \tfrac{latency}{1000})^+ + 0.4 \cdot \min(1, \tfrac{down}{200}) + 0.2 \cdot (1 - \tfrac{loss}{100})^+ + 0.1 \cdot \text{clamp}(\tfrac{dBm_{eq} + 100}{60}) + \text{bonus}$$
//!
//! SNR is placed on a dBm-equivalent scale first, `dBm_eq = -100 + 4 · snr`:
//! 0 dB sits on the floor and 15 dB reaches the top of the span.
//!
//! Satellite links tracking more than five satellites earn an additive bonus
//! of `0.1 · min(count, 10) / 10`. Weights are fixed and independent of the
//! active scenario.

use std::cmp::Ordering;

use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::registry::{LinkId, LinkKind};

pub const W_LATENCY: f64 = 0.3;
pub const W_BANDWIDTH: f64 = 0.4;
pub const W_LOSS: f64 = 0.2;
pub const W_SIGNAL: f64 = 0.1;

/// Latency at which the latency term reaches zero.
const LATENCY_CEILING_MS: f64 = 1000.0;
/// Downlink at which the bandwidth term saturates.
const BANDWIDTH_CEILING_MBPS: f64 = 200.0;
/// Signal normalization: `(dbm + OFFSET) / SPAN`.
const SIGNAL_OFFSET_DBM: f64 = 100.0;
const SIGNAL_SPAN_DB: f64 = 60.0;
/// dBm-equivalent of a 0 dB SNR.
const SNR_FLOOR_DBM: f64 = -100.0;
const DBM_PER_SNR_DB: f64 = 4.0;

/// Maximum additive satellite bonus.
pub const SATELLITE_BONUS: f64 = 0.1;
/// Bonus applies only above this many connected satellites.
const SATELLITE_BONUS_MIN: u32 = 5;
const SATELLITE_BONUS_CAP: u32 = 10;

/// Per-term contributions, mainly for logs and status output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub latency: f64,
    pub bandwidth: f64,
    pub loss: f64,
    pub signal: f64,
    pub bonus: f64,
    pub total: f64,
}

/// Place an SNR reading on the dBm-equivalent scale used by the signal term.
pub fn snr_dbm_equivalent(snr_db: f64) -> f64 {
    SNR_FLOOR_DBM + snr_db * DBM_PER_SNR_DB
}

/// Compute each weighted term for `metrics` on a link of `kind`.
pub fn breakdown(metrics: &MetricsSnapshot, kind: LinkKind) -> ScoreBreakdown {
    let latency = (1.0 - metrics.latency_ms / LATENCY_CEILING_MS).max(0.0) * W_LATENCY;
    let bandwidth = (metrics.downlink_mbps / BANDWIDTH_CEILING_MBPS).min(1.0) * W_BANDWIDTH;
    let loss = (1.0 - metrics.packet_loss_pct / 100.0).max(0.0) * W_LOSS;
    let signal = ((snr_dbm_equivalent(metrics.snr_db) + SIGNAL_OFFSET_DBM) / SIGNAL_SPAN_DB)
        .clamp(0.0, 1.0)
        * W_SIGNAL;

    let bonus = match metrics.satellites_connected {
        Some(count) if kind.is_satellite() && count > SATELLITE_BONUS_MIN => {
            SATELLITE_BONUS * f64::from(count.min(SATELLITE_BONUS_CAP))
                / f64::from(SATELLITE_BONUS_CAP)
        }
        _ => 0.0,
    };

    let raw = latency + bandwidth + loss + signal + bonus;

    ScoreBreakdown {
        latency,
        bandwidth,
        loss,
        signal,
        bonus,
        total: raw.clamp(0.0, 1.0),
    }
}

/// Health score in [0, 1]. Higher = healthier.
pub fn score(metrics: &MetricsSnapshot, kind: LinkKind) -> f64 {
    breakdown(metrics, kind).total
}

/// Inputs to the candidate ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: LinkId,
    pub score: f64,
    pub priority: u32,
    pub failure_count: u32,
    pub is_active: bool,
}

/// Order two candidates, best first.
///
/// Higher score wins; equal scores fall back to higher static priority, then
/// fewer consecutive failures, then the currently active link.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.failure_count.cmp(&b.failure_count))
        .then_with(|| b.is_active.cmp(&a.is_active))
}

/// Sort candidates best first.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(compare);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn metrics(latency: f64, down: f64, loss: f64, snr: f64) -> MetricsSnapshot {
        MetricsSnapshot::new(latency, down, 10.0, loss, snr, 0.0, Utc::now())
    }

    fn candidate(id: &str, score: f64, priority: u32, failures: u32, active: bool) -> Candidate {
        Candidate {
            id: LinkId::from(id),
            score,
            priority,
            failure_count: failures,
            is_active: active,
        }
    }

    // ─── Weighted Terms ─────────────────────────────────────────────────

    #[test]
    fn known_snapshot_scores_as_expected() {
        // 0.27 + 0.20 + 0.198 + 0.06
        let s = score(&metrics(100.0, 100.0, 1.0, 9.0), LinkKind::Cellular);
        assert!((s - 0.728).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn signal_term_separates_typical_snr() {
        let signal = |snr| breakdown(&metrics(100.0, 100.0, 1.0, snr), LinkKind::Cellular).signal;
        assert_eq!(signal(0.0), 0.0);
        assert!((signal(7.5) - 0.05).abs() < 1e-9);
        assert!((signal(15.0) - W_SIGNAL).abs() < 1e-9);
        assert_eq!(signal(30.0), W_SIGNAL);
        assert!(signal(4.0) < signal(9.0));
        assert_eq!(snr_dbm_equivalent(9.0), -64.0);
    }

    #[test]
    fn perfect_link_scores_one() {
        let s = score(&metrics(0.0, 500.0, 0.0, 20.0), LinkKind::Cellular);
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dead_link_scores_low() {
        let s = score(&metrics(2000.0, 0.0, 100.0, -200.0), LinkKind::Cellular);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn latency_term_floors_at_zero() {
        let b = breakdown(&metrics(5000.0, 100.0, 0.0, 9.0), LinkKind::Other);
        assert_eq!(b.latency, 0.0);
    }

    // ─── Satellite Bonus ────────────────────────────────────────────────

    #[test]
    fn satellite_bonus_scales_with_count() {
        let m = metrics(100.0, 100.0, 1.0, 9.0).with_satellites(8);
        let b = breakdown(&m, LinkKind::PrimarySatellite);
        assert!((b.bonus - 0.08).abs() < 1e-9);
        assert!((b.total - 0.808).abs() < 1e-9);
    }

    #[test]
    fn satellite_bonus_requires_more_than_five() {
        let m = metrics(100.0, 100.0, 1.0, 9.0).with_satellites(5);
        assert_eq!(breakdown(&m, LinkKind::PrimarySatellite).bonus, 0.0);
    }

    #[test]
    fn satellite_bonus_capped_at_ten() {
        let m = metrics(100.0, 100.0, 1.0, 9.0).with_satellites(40);
        let b = breakdown(&m, LinkKind::AlternateSatellite);
        assert!((b.bonus - SATELLITE_BONUS).abs() < 1e-9);
    }

    #[test]
    fn no_bonus_for_cellular() {
        let m = metrics(100.0, 100.0, 1.0, 9.0).with_satellites(9);
        assert_eq!(breakdown(&m, LinkKind::Cellular).bonus, 0.0);
    }

    #[test]
    fn total_clamped_with_bonus() {
        let m = metrics(0.0, 500.0, 0.0, 20.0).with_satellites(10);
        assert_eq!(score(&m, LinkKind::PrimarySatellite), 1.0);
    }

    // ─── Tie-break ──────────────────────────────────────────────────────

    #[test]
    fn higher_score_wins() {
        let mut c = vec![
            candidate("a", 0.5, 100, 0, true),
            candidate("b", 0.7, 1, 9, false),
        ];
        rank(&mut c);
        assert_eq!(c[0].id.as_str(), "b");
    }

    #[test]
    fn equal_score_prefers_priority_then_failures_then_active() {
        let mut c = vec![
            candidate("low", 0.6, 10, 0, false),
            candidate("high", 0.6, 50, 0, false),
        ];
        rank(&mut c);
        assert_eq!(c[0].id.as_str(), "high");

        let mut c = vec![
            candidate("flaky", 0.6, 50, 2, false),
            candidate("steady", 0.6, 50, 1, false),
        ];
        rank(&mut c);
        assert_eq!(c[0].id.as_str(), "steady");

        let mut c = vec![
            candidate("standby", 0.6, 50, 1, false),
            candidate("current", 0.6, 50, 1, true),
        ];
        rank(&mut c);
        assert_eq!(c[0].id.as_str(), "current");
    }

    // ─── Bounds ─────────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn score_always_in_unit_interval(
            latency in 0.0f64..10_000.0,
            down in 0.0f64..2_000.0,
            loss in 0.0f64..=100.0,
            snr in -200.0f64..200.0,
            sats in proptest::option::of(0u32..64),
            satellite in any::<bool>(),
        ) {
            let mut m = metrics(latency, down, loss, snr);
            m.satellites_connected = sats;
            let kind = if satellite { LinkKind::PrimarySatellite } else { LinkKind::Cellular };
            let s = score(&m, kind);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn more_latency_never_scores_higher(
            base in 0.0f64..2_000.0,
            extra in 0.0f64..2_000.0,
        ) {
            let a = score(&metrics(base, 100.0, 1.0, 9.0), LinkKind::Cellular);
            let b = score(&metrics(base + extra, 100.0, 1.0, 9.0), LinkKind::Cellular);
            prop_assert!(b <= a);
        }

        #[test]
        fn more_snr_never_scores_lower(
            base in -20.0f64..40.0,
            extra in 0.0f64..40.0,
        ) {
            let a = score(&metrics(100.0, 100.0, 1.0, base), LinkKind::Cellular);
            let b = score(&metrics(100.0, 100.0, 1.0, base + extra), LinkKind::Cellular);
            prop_assert!(b >= a);
        }
    }
}
