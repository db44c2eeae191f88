//! # Failover Controller
//!
//! Top-level link state machine, evaluated once per tick after the probe
//! round has been ingested and scored.
//!
//! ```text
//!   FAILED ──connect──▶ PRIMARY (home link) / BACKUP (any other)
//!   PRIMARY|BACKUP ──breach──▶ DEGRADED ──failures decay to 0──▶ PRIMARY|BACKUP
//!   DEGRADED ──failures ≥ threshold, candidate > active·(1+h)──▶ BACKUP|PRIMARY
//!   any ──no viable link──▶ FAILED
//! ```
//!
//! The controller only decides. Switching requires the recovery
//! orchestrator's establish step to succeed first; [`FailoverController::commit`]
//! is then called to move the active link and record the event.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::saturating_add;
use crate::registry::{LinkId, LinkRegistry};
use crate::scoring::{self, Candidate};
use crate::thresholds::Thresholds;

/// Reason recorded for automatic failovers driven by the failure count.
pub const REASON_PERSISTENT_FAILURES: &str = "persistent failures";
/// Reason recorded when the first link is brought up.
pub const REASON_INITIAL_CONNECT: &str = "initial connect";

/// This tick's health score per link. Links missing from the map score 0.
pub type Scores = HashMap<LinkId, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    /// Active link is the home link and healthy.
    Primary,
    /// Active link is breaching but below the failover threshold.
    Degraded,
    /// Switched away from the home link.
    Backup,
    /// No link meets minimum viability (or none connected yet).
    Failed,
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverState::Primary => write!(f, "PRIMARY"),
            FailoverState::Degraded => write!(f, "DEGRADED"),
            FailoverState::Backup => write!(f, "BACKUP"),
            FailoverState::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverConfig {
    /// Consecutive failures on the active link before switching is considered.
    pub threshold: u32,
    /// Required relative score advantage of the candidate, e.g. 0.2 = 20%.
    pub hysteresis: f64,
    /// Minimum time between automatic failovers.
    pub cooldown: chrono::Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        FailoverConfig {
            threshold: 3,
            hysteresis: 0.2,
            cooldown: chrono::Duration::seconds(300),
        }
    }
}

/// Audit record of one change of the active link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub timestamp: DateTime<Utc>,
    /// `None` for the initial connect.
    pub from: Option<LinkId>,
    pub to: LinkId,
    pub reason: String,
    /// Failure count of the link switched away from.
    pub failure_count: u32,
}

/// What the tick should do about the active link.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Stay on the current link.
    Hold,
    /// Nothing active yet; bring up `to`.
    Connect { to: LinkId },
    /// Switch away from the active link.
    Failover { to: LinkId, reason: String },
    /// Nothing is usable.
    NoViableLink,
}

/// Whether `candidate` clears the hysteresis margin over `active`.
pub fn exceeds_hysteresis(active: f64, candidate: f64, hysteresis: f64) -> bool {
    candidate > active * (1.0 + hysteresis)
}

pub struct FailoverController {
    config: FailoverConfig,
    state: FailoverState,
    last_failover_at: Option<DateTime<Utc>>,
    history: Vec<FailoverEvent>,
}

impl FailoverController {
    pub fn new(config: FailoverConfig) -> Self {
        FailoverController {
            config,
            state: FailoverState::Failed,
            last_failover_at: None,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Append-only log of active-link transitions.
    pub fn history(&self) -> &[FailoverEvent] {
        &self.history
    }

    pub fn last_failover_at(&self) -> Option<DateTime<Utc>> {
        self.last_failover_at
    }

    /// Time left before another automatic failover is allowed.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let last = self.last_failover_at?;
        let until = saturating_add(last, self.config.cooldown);
        (now < until).then(|| until - now)
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(now).is_some()
    }

    /// Per-tick failure accounting for every link with fresh metrics:
    /// a breach adds one failure, a clean snapshot decays one.
    pub fn account(&self, registry: &mut LinkRegistry, thresholds: &Thresholds) {
        let updates: Vec<(LinkId, bool)> = registry
            .list()
            .iter()
            .filter_map(|link| {
                let metrics = link.last_metrics()?;
                link.has_fresh_metrics()
                    .then(|| (link.id().clone(), thresholds.satisfied_by(metrics)))
            })
            .collect();

        for (id, satisfied) in updates {
            if satisfied {
                registry.decay_failures(&id);
            } else {
                let count = registry.increment_failures(&id);
                tracing::debug!(link = %id, failures = count, "threshold breach");
            }
        }
    }

    /// Decide what to do with the active link this tick.
    ///
    /// Updates the state for everything that does not require a switch.
    /// A `Connect`/`Failover` decision leaves the state alone until
    /// [`commit`](Self::commit) or [`abort`](Self::abort) is called.
    pub fn evaluate(
        &mut self,
        registry: &LinkRegistry,
        scores: &Scores,
        now: DateTime<Utc>,
    ) -> Decision {
        let Some(active) = registry.active() else {
            self.state = FailoverState::Failed;
            return match best_viable(registry, scores, None) {
                Some(to) => Decision::Connect { to },
                None => Decision::NoViableLink,
            };
        };

        if active.is_settling(now) {
            self.state = FailoverState::Degraded;
            return Decision::Hold;
        }

        let active_viable = is_viable(registry, scores, active.id());
        if !active_viable && best_viable(registry, scores, None).is_none() {
            self.state = FailoverState::Failed;
            return Decision::NoViableLink;
        }

        let failures = active.failure_count();
        if failures >= self.config.threshold {
            if let Some(to) = self.propose(registry, scores, now) {
                return Decision::Failover {
                    to,
                    reason: REASON_PERSISTENT_FAILURES.to_string(),
                };
            }
            // Another link is viable here, so a blocked switch is DEGRADED.
            self.state = FailoverState::Degraded;
            return Decision::Hold;
        }

        self.state = if failures == 0 && active_viable {
            self.settled_state(registry, active.id())
        } else {
            FailoverState::Degraded
        };
        Decision::Hold
    }

    /// Best candidate that passes the automatic failover gate, if any.
    ///
    /// The gate: active failure count at or above the threshold, candidate
    /// score strictly above `active · (1 + hysteresis)`, and outside the
    /// cooldown window of the previous failover.
    pub fn propose(
        &self,
        registry: &LinkRegistry,
        scores: &Scores,
        now: DateTime<Utc>,
    ) -> Option<LinkId> {
        let active = registry.active()?;
        if active.failure_count() < self.config.threshold {
            return None;
        }
        if let Some(remaining) = self.cooldown_remaining(now) {
            tracing::debug!(
                link = %active.id(),
                remaining_secs = remaining.num_seconds(),
                "failover suppressed by cooldown"
            );
            return None;
        }
        let active_score = score_of(scores, active.id());
        let best = best_viable(registry, scores, Some(active.id()))?;
        let best_score = score_of(scores, &best);
        if exceeds_hysteresis(active_score, best_score, self.config.hysteresis) {
            Some(best)
        } else {
            tracing::debug!(
                link = %active.id(),
                active_score,
                candidate = %best,
                candidate_score = best_score,
                "candidate within hysteresis margin"
            );
            None
        }
    }

    /// Make `to` active after its establish step succeeded.
    pub fn commit(
        &mut self,
        registry: &mut LinkRegistry,
        to: &LinkId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<FailoverEvent> {
        let from = registry.active_id().cloned();
        if from.as_ref() == Some(to) {
            return None;
        }
        let failure_count = from
            .as_ref()
            .and_then(|id| registry.get(id))
            .map_or(0, |l| l.failure_count());

        if !registry.set_active(to) {
            return None;
        }
        registry.reset_failures(to);
        self.state = self.settled_state(registry, to);

        let event = FailoverEvent {
            timestamp: now,
            from,
            to: to.clone(),
            reason: reason.to_string(),
            failure_count,
        };
        if let Some(from) = &event.from {
            self.last_failover_at = Some(now);
            tracing::warn!(
                from = %from,
                to = %to,
                reason,
                failures = failure_count,
                state = %self.state,
                "failover completed"
            );
        } else {
            tracing::info!(link = %to, state = %self.state, "link connected");
        }
        self.history.push(event.clone());
        Some(event)
    }

    /// The establish step failed. Stay put and retry next tick.
    pub fn abort(&mut self, registry: &LinkRegistry) {
        self.state = if registry.active().is_some() {
            FailoverState::Degraded
        } else {
            FailoverState::Failed
        };
    }

    fn settled_state(&self, registry: &LinkRegistry, id: &LinkId) -> FailoverState {
        match registry.home() {
            Some(home) if home.id() == id => FailoverState::Primary,
            _ => FailoverState::Backup,
        }
    }
}

fn score_of(scores: &Scores, id: &LinkId) -> f64 {
    scores.get(id).copied().unwrap_or(0.0)
}

/// Probed successfully this tick and scoring above zero.
pub fn is_viable(registry: &LinkRegistry, scores: &Scores, id: &LinkId) -> bool {
    registry
        .get(id)
        .is_some_and(|l| l.has_fresh_metrics() && score_of(scores, id) > 0.0)
}

/// Highest-ranked viable link, optionally excluding one.
pub fn best_viable(
    registry: &LinkRegistry,
    scores: &Scores,
    exclude: Option<&LinkId>,
) -> Option<LinkId> {
    let active = registry.active_id();
    let mut candidates: Vec<Candidate> = registry
        .list()
        .iter()
        .filter(|l| Some(l.id()) != exclude && is_viable(registry, scores, l.id()))
        .map(|l| Candidate {
            id: l.id().clone(),
            score: score_of(scores, l.id()),
            priority: l.priority(),
            failure_count: l.failure_count(),
            is_active: Some(l.id()) == active,
        })
        .collect();
    scoring::rank(&mut candidates);
    candidates.into_iter().next().map(|c| c.id)
}
