//! Metrics snapshot reported by a health probe.
//!
//! A snapshot is immutable once captured. It is validated at the probe
//! boundary: unknown fields, missing required fields and out-of-range values
//! fail the probe instead of being defaulted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::registry::LinkId;

/// One probe cycle's worth of link telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSnapshot {
    /// Round-trip latency in milliseconds.
    pub latency_ms: f64,
    /// Downlink throughput in Mbps.
    pub downlink_mbps: f64,
    /// Uplink throughput in Mbps.
    pub uplink_mbps: f64,
    /// Packet loss in percent [0, 100].
    pub packet_loss_pct: f64,
    /// Signal-to-noise ratio in dB.
    pub snr_db: f64,
    /// Fraction of sky view obstructed [0, 1].
    pub obstruction_fraction: f64,
    /// Satellites currently tracked, when the terminal reports it.
    #[serde(default)]
    pub satellites_connected: Option<u32>,
    /// Active hardware alert codes (e.g. `MOTORS_STUCK`).
    #[serde(default)]
    pub hardware_alerts: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Snapshot with the given core figures and no satellite/alert data.
    pub fn new(
        latency_ms: f64,
        downlink_mbps: f64,
        uplink_mbps: f64,
        packet_loss_pct: f64,
        snr_db: f64,
        obstruction_fraction: f64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        MetricsSnapshot {
            latency_ms,
            downlink_mbps,
            uplink_mbps,
            packet_loss_pct,
            snr_db,
            obstruction_fraction,
            satellites_connected: None,
            hardware_alerts: Vec::new(),
            captured_at,
        }
    }

    pub fn with_satellites(mut self, count: u32) -> Self {
        self.satellites_connected = Some(count);
        self
    }

    pub fn with_alert(mut self, code: impl Into<String>) -> Self {
        self.hardware_alerts.push(code.into());
        self
    }

    /// Check value ranges. Returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = [
            ("latency_ms", self.latency_ms),
            ("downlink_mbps", self.downlink_mbps),
            ("uplink_mbps", self.uplink_mbps),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be finite and non-negative, got {value}"));
            }
        }
        if !self.snr_db.is_finite() {
            return Err(format!("snr_db must be finite, got {}", self.snr_db));
        }
        if !(0.0..=100.0).contains(&self.packet_loss_pct) {
            return Err(format!(
                "packet_loss_pct must be within [0, 100], got {}",
                self.packet_loss_pct
            ));
        }
        if !(0.0..=1.0).contains(&self.obstruction_fraction) {
            return Err(format!(
                "obstruction_fraction must be within [0, 1], got {}",
                self.obstruction_fraction
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON snapshot relayed for `link`.
    pub fn from_json(link: &LinkId, data: &[u8]) -> Result<Self, ProbeError> {
        let snapshot: MetricsSnapshot =
            serde_json::from_slice(data).map_err(|e| ProbeError::Malformed {
                link: link.clone(),
                reason: e.to_string(),
            })?;
        snapshot.validate().map_err(|reason| ProbeError::Malformed {
            link: link.clone(),
            reason,
        })?;
        Ok(snapshot)
    }
}
