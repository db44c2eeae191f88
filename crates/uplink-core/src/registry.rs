//! # Link Registry
//!
//! Owns the candidate links and their mutable health state. Links are kept
//! ordered by static priority (highest first, registration order breaking
//! ties). At most one link is active at any time: the active id is stored
//! once and every link's [`LinkStatus`] is kept consistent with it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metrics::MetricsSnapshot;

/// Stable identifier of a link (e.g. `starlink-roof`, `lte-0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LinkId {
    fn from(s: &str) -> Self {
        LinkId(s.to_string())
    }
}

impl From<String> for LinkId {
    fn from(s: String) -> Self {
        LinkId(s)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical kind of uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    PrimarySatellite,
    AlternateSatellite,
    Cellular,
    Other,
}

impl LinkKind {
    pub fn is_satellite(self) -> bool {
        matches!(self, LinkKind::PrimarySatellite | LinkKind::AlternateSatellite)
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::PrimarySatellite => write!(f, "primary_satellite"),
            LinkKind::AlternateSatellite => write!(f, "alternate_satellite"),
            LinkKind::Cellular => write!(f, "cellular"),
            LinkKind::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for LinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "primary_satellite" => Ok(LinkKind::PrimarySatellite),
            "alternate_satellite" => Ok(LinkKind::AlternateSatellite),
            "cellular" => Ok(LinkKind::Cellular),
            "other" => Ok(LinkKind::Other),
            _ => Err(ConfigError::UnknownLinkKind(s.to_string())),
        }
    }
}

/// Static configuration of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub id: LinkId,
    pub kind: LinkKind,
    /// Higher is preferred.
    pub priority: u32,
}

/// Per-link status as seen by the failover controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Standby,
    Active,
    /// Last probe failed.
    Failed,
    /// Rebooted, waiting out the settle period before probing again.
    Settling,
}

/// Result of the most recent probe cycle for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Never probed.
    Pending,
    Ok,
    Failed,
    /// Not probed this cycle (settling after a reboot).
    Skipped,
}

/// A candidate uplink and its current health state.
#[derive(Debug, Clone, Serialize)]
pub struct Link {
    id: LinkId,
    kind: LinkKind,
    priority: u32,
    status: LinkStatus,
    failure_count: u32,
    last_metrics: Option<MetricsSnapshot>,
    last_probe_at: Option<DateTime<Utc>>,
    last_outcome: ProbeOutcome,
    settle_until: Option<DateTime<Utc>>,
}

impl Link {
    fn new(config: LinkConfig) -> Self {
        Link {
            id: config.id,
            kind: config.kind,
            priority: config.priority,
            status: LinkStatus::Standby,
            failure_count: 0,
            last_metrics: None,
            last_probe_at: None,
            last_outcome: ProbeOutcome::Pending,
            settle_until: None,
        }
    }

    pub fn id(&self) -> &LinkId {
        &self.id
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_metrics(&self) -> Option<&MetricsSnapshot> {
        self.last_metrics.as_ref()
    }

    pub fn last_probe_at(&self) -> Option<DateTime<Utc>> {
        self.last_probe_at
    }

    pub fn last_outcome(&self) -> ProbeOutcome {
        self.last_outcome
    }

    /// Whether this cycle produced fresh metrics for the link.
    pub fn has_fresh_metrics(&self) -> bool {
        self.last_outcome == ProbeOutcome::Ok && self.last_metrics.is_some()
    }

    pub fn is_settling(&self, now: DateTime<Utc>) -> bool {
        self.settle_until.is_some_and(|until| now < until)
    }
}

/// The set of candidate links.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: Vec<Link>,
    active: Option<LinkId>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link. Ids must be unique.
    pub fn register(&mut self, config: LinkConfig) -> Result<LinkId, ConfigError> {
        if self.links.iter().any(|l| l.id == config.id) {
            return Err(ConfigError::DuplicateLink(config.id));
        }
        let id = config.id.clone();
        let link = Link::new(config);
        // Insert after every link of equal or higher priority.
        let pos = self
            .links
            .iter()
            .position(|l| l.priority < link.priority)
            .unwrap_or(self.links.len());
        self.links.insert(pos, link);
        Ok(id)
    }

    /// Links ordered by priority, highest first.
    pub fn list(&self) -> &[Link] {
        &self.links
    }

    pub fn ids(&self) -> Vec<LinkId> {
        self.links.iter().map(|l| l.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: &LinkId) -> Option<&Link> {
        self.links.iter().find(|l| &l.id == id)
    }

    /// The currently active link, if any.
    pub fn active(&self) -> Option<&Link> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<&LinkId> {
        self.active.as_ref()
    }

    /// The highest-priority link, i.e. where the site prefers to be.
    pub fn home(&self) -> Option<&Link> {
        self.links.first()
    }

    /// Number of links whose status is `Active`. Always 0 or 1.
    pub fn active_count(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::Active)
            .count()
    }

    // ─── Probe ingestion ────────────────────────────────────────────────

    /// Store a successful probe. The failure count is left untouched.
    pub fn record_probe_success(
        &mut self,
        id: &LinkId,
        metrics: MetricsSnapshot,
        now: DateTime<Utc>,
    ) {
        let is_active = self.active.as_ref() == Some(id);
        if let Some(link) = self.get_mut(id) {
            link.last_metrics = Some(metrics);
            link.last_probe_at = Some(now);
            link.last_outcome = ProbeOutcome::Ok;
            link.settle_until = None;
            link.status = if is_active {
                LinkStatus::Active
            } else {
                LinkStatus::Standby
            };
        }
    }

    /// Record a probe error. Returns the new consecutive-failure count.
    pub fn record_probe_failure(&mut self, id: &LinkId, now: DateTime<Utc>) -> u32 {
        let is_active = self.active.as_ref() == Some(id);
        match self.get_mut(id) {
            Some(link) => {
                link.failure_count = link.failure_count.saturating_add(1);
                link.last_probe_at = Some(now);
                link.last_outcome = ProbeOutcome::Failed;
                if !is_active {
                    link.status = LinkStatus::Failed;
                }
                link.failure_count
            }
            None => 0,
        }
    }

    /// Record that a link was deliberately not probed this cycle.
    pub fn record_probe_skipped(&mut self, id: &LinkId) {
        if let Some(link) = self.get_mut(id) {
            link.last_outcome = ProbeOutcome::Skipped;
        }
    }

    // ─── Controller-owned mutation ──────────────────────────────────────

    /// Make `id` the single active link. Returns false for unknown ids.
    pub(crate) fn set_active(&mut self, id: &LinkId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        for link in &mut self.links {
            if &link.id == id {
                link.status = LinkStatus::Active;
            } else if link.status == LinkStatus::Active {
                link.status = LinkStatus::Standby;
            }
        }
        self.active = Some(id.clone());
        true
    }

    pub(crate) fn increment_failures(&mut self, id: &LinkId) -> u32 {
        match self.get_mut(id) {
            Some(link) => {
                link.failure_count = link.failure_count.saturating_add(1);
                link.failure_count
            }
            None => 0,
        }
    }

    /// Decay the failure count by one, floored at zero.
    pub(crate) fn decay_failures(&mut self, id: &LinkId) -> u32 {
        match self.get_mut(id) {
            Some(link) => {
                link.failure_count = link.failure_count.saturating_sub(1);
                link.failure_count
            }
            None => 0,
        }
    }

    pub(crate) fn reset_failures(&mut self, id: &LinkId) {
        if let Some(link) = self.get_mut(id) {
            link.failure_count = 0;
        }
    }

    /// Hold off probing `id` until `until` (post-reboot settle).
    pub(crate) fn begin_settle(&mut self, id: &LinkId, until: DateTime<Utc>) {
        if let Some(link) = self.get_mut(id) {
            link.settle_until = Some(until);
            if link.status != LinkStatus::Active {
                link.status = LinkStatus::Settling;
            }
        }
    }

    fn get_mut(&mut self, id: &LinkId) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| &l.id == id)
    }

    #[cfg(test)]
    pub(crate) fn set_failure_count(&mut self, id: &LinkId, count: u32) {
        if let Some(link) = self.get_mut(id) {
            link.failure_count = count;
        }
    }
}
