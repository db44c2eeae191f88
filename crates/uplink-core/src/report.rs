//! Read-only export of the monitor's recent history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::DriftAlert;
use crate::failover::FailoverEvent;
use crate::history::{PerformanceReport, PerformanceSample};
use crate::issues::Issue;
use crate::thresholds::{Scenario, Thresholds};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub generated_at: DateTime<Utc>,
    pub active_scenario: Scenario,
    pub thresholds: Thresholds,
    pub window_secs: i64,
    pub summary: PerformanceReport,
    pub samples: Vec<PerformanceSample>,
    pub active_issues: Vec<Issue>,
    pub resolved_issues: Vec<Issue>,
    pub failover_history: Vec<FailoverEvent>,
    #[serde(default)]
    pub drift_alerts: Vec<DriftAlert>,
}

impl ExportReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}
