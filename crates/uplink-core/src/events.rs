//! Events published by the coordinator on its broadcast channel.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::baseline::{Baseline, DriftAlert};
use crate::failover::{FailoverEvent, FailoverState};
use crate::issues::{Issue, IssueKind, Severity};
use crate::registry::LinkId;
use crate::thresholds::ThresholdProfile;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    IssueDetected {
        issue: Issue,
    },
    IssueEscalated {
        kind: IssueKind,
        severity: Severity,
    },
    IssueResolved {
        issue: Issue,
    },
    /// Fired for every recovery outcome, including suppressed ones.
    RecoveryAttempted {
        kind: Option<IssueKind>,
        link: LinkId,
        action: String,
        success: bool,
        error: Option<String>,
    },
    FailoverCompleted {
        failover: FailoverEvent,
    },
    StateChanged {
        from: FailoverState,
        to: FailoverState,
    },
    DriftDetected {
        alert: DriftAlert,
    },
    BaselineEstablished {
        link: LinkId,
        baseline: Baseline,
    },
    ScenarioChanged {
        profile: ThresholdProfile,
    },
    NoViableLink {
        at: DateTime<Utc>,
    },
}
