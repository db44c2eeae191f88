//! # Issue Tracking
//!
//! Turns threshold breaches on the active link into deduplicated, escalating
//! issues. At most one unresolved issue exists per kind; a repeat breach
//! bumps its occurrence count and refreshes its detection time. When the
//! count reaches the persistence threshold the kind is handed back to the
//! caller for recovery, exactly once per crossing.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::recovery;
use crate::registry::LinkId;
use crate::thresholds::{Breach, Metric, Thresholds};

/// Resolved issues kept for reporting.
const RESOLVED_RETENTION: usize = 1000;

/// Category of detected problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighLatency,
    LowBandwidth,
    Obstruction,
    Disconnection,
    SignalDegradation,
    HardwareAlert,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::HighLatency => "high_latency",
            IssueKind::LowBandwidth => "low_bandwidth",
            IssueKind::Obstruction => "obstruction",
            IssueKind::Disconnection => "disconnection",
            IssueKind::SignalDegradation => "signal_degradation",
            IssueKind::HardwareAlert => "hardware_alert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A detected, possibly recurring, problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    pub link: Option<LinkId>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_action: Option<String>,
    pub occurrence_count: u32,
    pub metrics: Option<MetricsSnapshot>,
    /// Operator advice, ending with the automatic recovery steps.
    #[serde(default)]
    pub recommendation: String,
}

impl Issue {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Per-kind breach ratio above which an issue is critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeverityPolicy {
    pub latency: f64,
    pub bandwidth: f64,
    pub obstruction: f64,
    pub signal: f64,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        SeverityPolicy {
            latency: 1.5,
            bandwidth: 2.0,
            obstruction: 2.0,
            signal: 1.5,
        }
    }
}

impl SeverityPolicy {
    fn multiplier(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Latency => self.latency,
            Metric::Downlink | Metric::Uplink => self.bandwidth,
            Metric::Obstruction => self.obstruction,
            Metric::Snr => self.signal,
        }
    }

    /// Critical once the breach exceeds the per-kind multiplier.
    pub fn classify(&self, breach: &Breach) -> Severity {
        if breach.ratio() > self.multiplier(breach.metric) {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }
}

/// Overall health summary derived from the active issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

/// Something the tracker wants the rest of the system to know.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueEvent {
    Detected(Issue),
    Recurred { kind: IssueKind, occurrence_count: u32 },
    Escalated { kind: IssueKind, severity: Severity },
    Resolved(Issue),
}

/// Result of feeding one observation round into the tracker.
#[derive(Debug, Default)]
pub struct IssueUpdate {
    pub events: Vec<IssueEvent>,
    /// Kinds that just reached the persistence threshold.
    pub recover: Vec<IssueKind>,
}

impl IssueUpdate {
    fn merge(&mut self, other: IssueUpdate) {
        self.events.extend(other.events);
        self.recover.extend(other.recover);
    }
}

struct Observation {
    kind: IssueKind,
    severity: Severity,
    description: String,
    recommendation: String,
}

/// Active and resolved issue collections.
pub struct IssueTracker {
    active: Vec<Issue>,
    resolved: VecDeque<Issue>,
    persistence_threshold: u32,
    auto_recovery: bool,
    policy: SeverityPolicy,
}

impl IssueTracker {
    pub fn new(persistence_threshold: u32, auto_recovery: bool, policy: SeverityPolicy) -> Self {
        IssueTracker {
            active: Vec::new(),
            resolved: VecDeque::new(),
            persistence_threshold: persistence_threshold.max(1),
            auto_recovery,
            policy,
        }
    }

    pub fn set_auto_recovery(&mut self, enabled: bool) {
        self.auto_recovery = enabled;
    }

    pub fn auto_recovery(&self) -> bool {
        self.auto_recovery
    }

    /// Evaluate the active link's snapshot against `thresholds`.
    pub fn evaluate(
        &mut self,
        link: &LinkId,
        metrics: &MetricsSnapshot,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> IssueUpdate {
        let mut update = IssueUpdate::default();
        for obs in self.classify(metrics, thresholds) {
            update.merge(self.observe(obs, Some(link), Some(metrics), now));
        }
        update
    }

    /// Record that the active link could not be reached (or none exists).
    pub fn record_disconnection(
        &mut self,
        link: Option<&LinkId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> IssueUpdate {
        let description = match link {
            Some(id) => format!("Link {id} unreachable: {reason}"),
            None => format!("No active connection: {reason}"),
        };
        self.observe(
            Observation {
                kind: IssueKind::Disconnection,
                severity: Severity::Critical,
                description,
                recommendation: recommend(IssueKind::Disconnection, &[]),
            },
            link,
            None,
            now,
        )
    }

    /// Mark the unresolved issue of `kind` resolved by `action`.
    pub fn resolve(&mut self, kind: IssueKind, action: &str, now: DateTime<Utc>) -> Option<Issue> {
        let idx = self.active.iter().position(|i| i.kind == kind)?;
        let mut issue = self.active.remove(idx);
        issue.resolved_at = Some(now);
        issue.resolution_action = Some(action.to_string());
        tracing::info!(kind = %kind, action, "issue resolved");
        self.resolved.push_back(issue.clone());
        while self.resolved.len() > RESOLVED_RETENTION {
            self.resolved.pop_front();
        }
        Some(issue)
    }

    pub fn get(&self, kind: IssueKind) -> Option<&Issue> {
        self.active.iter().find(|i| i.kind == kind)
    }

    pub fn active(&self) -> &[Issue] {
        &self.active
    }

    pub fn resolved(&self) -> impl Iterator<Item = &Issue> {
        self.resolved.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// `critical` if anything is critical, `degraded` past two warnings.
    pub fn overall_status(&self) -> OverallStatus {
        if self.active.is_empty() {
            return OverallStatus::Healthy;
        }
        if self.active.iter().any(|i| i.severity == Severity::Critical) {
            return OverallStatus::Critical;
        }
        let warnings = self
            .active
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        if warnings > 2 {
            OverallStatus::Degraded
        } else {
            OverallStatus::Warning
        }
    }

    // ─── Internal ───────────────────────────────────────────────────────

    fn classify(&self, metrics: &MetricsSnapshot, thresholds: &Thresholds) -> Vec<Observation> {
        let mut out: Vec<Observation> = Vec::new();
        for breach in thresholds.breaches(metrics) {
            let kind = match breach.metric {
                Metric::Latency => IssueKind::HighLatency,
                Metric::Downlink | Metric::Uplink => IssueKind::LowBandwidth,
                Metric::Obstruction => IssueKind::Obstruction,
                Metric::Snr => IssueKind::SignalDegradation,
            };
            let severity = self.policy.classify(&breach);
            let description = describe(&breach);
            // Downlink and uplink breaches fold into one bandwidth observation.
            if let Some(existing) = out.iter_mut().find(|o| o.kind == kind) {
                existing.severity = existing.severity.max(severity);
                existing.description = format!("{}; {}", existing.description, description);
            } else {
                out.push(Observation {
                    kind,
                    severity,
                    description,
                    recommendation: recommend(kind, &[]),
                });
            }
        }

        if !metrics.hardware_alerts.is_empty() {
            let critical = metrics
                .hardware_alerts
                .iter()
                .any(|a| a.contains("SHUTDOWN") || a.contains("STUCK"));
            out.push(Observation {
                kind: IssueKind::HardwareAlert,
                severity: if critical {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                description: format!("Hardware alert: {}", metrics.hardware_alerts.join(", ")),
                recommendation: recommend(IssueKind::HardwareAlert, &metrics.hardware_alerts),
            });
        }
        out
    }

    fn observe(
        &mut self,
        obs: Observation,
        link: Option<&LinkId>,
        metrics: Option<&MetricsSnapshot>,
        now: DateTime<Utc>,
    ) -> IssueUpdate {
        let mut update = IssueUpdate::default();

        let count = match self.active.iter_mut().find(|i| i.kind == obs.kind) {
            Some(existing) => {
                existing.occurrence_count = existing.occurrence_count.saturating_add(1);
                existing.detected_at = now;
                existing.description = obs.description;
                existing.recommendation = obs.recommendation;
                existing.link = link.cloned().or(existing.link.take());
                if let Some(m) = metrics {
                    existing.metrics = Some(m.clone());
                }
                tracing::debug!(
                    kind = %obs.kind,
                    count = existing.occurrence_count,
                    "issue recurred"
                );
                update.events.push(IssueEvent::Recurred {
                    kind: obs.kind,
                    occurrence_count: existing.occurrence_count,
                });
                if obs.severity > existing.severity {
                    existing.severity = obs.severity;
                    tracing::warn!(kind = %obs.kind, severity = ?obs.severity, "issue escalated");
                    update.events.push(IssueEvent::Escalated {
                        kind: obs.kind,
                        severity: obs.severity,
                    });
                }
                existing.occurrence_count
            }
            None => {
                let issue = Issue {
                    kind: obs.kind,
                    severity: obs.severity,
                    description: obs.description,
                    link: link.cloned(),
                    detected_at: now,
                    resolved_at: None,
                    resolution_action: None,
                    occurrence_count: 1,
                    metrics: metrics.cloned(),
                    recommendation: obs.recommendation,
                };
                tracing::warn!(
                    kind = %issue.kind,
                    severity = ?issue.severity,
                    description = %issue.description,
                    "new issue detected"
                );
                update.events.push(IssueEvent::Detected(issue.clone()));
                self.active.push(issue);
                1
            }
        };

        if count == self.persistence_threshold && self.auto_recovery {
            update.recover.push(obs.kind);
        }
        update
    }
}

const SUPPORT_ADVICE: &str = "Contact support for assistance";

/// Advice for a terminal alert code.
fn alert_advice(code: &str) -> &'static str {
    match code {
        "MOTORS_STUCK" => "Reboot the dish or check for mechanical obstructions",
        "THERMAL_THROTTLE" => "Ensure adequate ventilation around the dish",
        "THERMAL_SHUTDOWN" => "Cool down the dish and check ventilation",
        "MAST_NOT_NEAR_VERTICAL" => "Adjust the mounting to be more vertical",
        "SLOW_ETHERNET_SPEEDS" => "Check the ethernet cable and connections",
        "SOFTWARE_INSTALL_PENDING" => "Allow the dish to complete its software update",
        _ => SUPPORT_ADVICE,
    }
}

fn recommend(kind: IssueKind, alerts: &[String]) -> String {
    let advice = match kind {
        IssueKind::HighLatency => "Check for obstructions or network congestion".to_string(),
        IssueKind::LowBandwidth => "Check for obstructions or signal interference".to_string(),
        IssueKind::Obstruction => "Clear the dish's field of view or relocate it".to_string(),
        IssueKind::Disconnection => "Check power and cabling to the terminal".to_string(),
        IssueKind::SignalDegradation => "Check dish alignment and remove any obstructions".to_string(),
        IssueKind::HardwareAlert => {
            let mut advice: Vec<&str> = alerts.iter().map(|a| alert_advice(a)).collect();
            advice.dedup();
            if advice.is_empty() {
                SUPPORT_ADVICE.to_string()
            } else {
                advice.join("; ")
            }
        }
    };
    let steps: Vec<&str> = recovery::action_for(kind)
        .steps()
        .iter()
        .map(|s| s.name())
        .collect();
    format!("{advice} (automatic: {})", steps.join(" then "))
}

fn describe(breach: &Breach) -> String {
    match breach.metric {
        Metric::Latency => format!(
            "High latency: {:.1}ms (threshold: {}ms)",
            breach.value, breach.limit
        ),
        Metric::Downlink => format!(
            "Low downlink: {:.1} Mbps (threshold: {} Mbps)",
            breach.value, breach.limit
        ),
        Metric::Uplink => format!(
            "Low uplink: {:.1} Mbps (threshold: {} Mbps)",
            breach.value, breach.limit
        ),
        Metric::Obstruction => format!(
            "Obstruction detected: {:.1}% (threshold: {:.1}%)",
            breach.value * 100.0,
            breach.limit * 100.0
        ),
        Metric::Snr => format!(
            "Low SNR: {:.1} dB (threshold: {} dB)",
            breach.value, breach.limit
        ),
    }
}
