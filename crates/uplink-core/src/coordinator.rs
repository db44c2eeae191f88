//! # Monitor Coordinator
//!
//! Owns every piece of monitoring state and drives the per-tick pipeline:
//!
//! 1. Probe every non-settling link concurrently, each bounded by the probe
//!    timeout, with no lock held.
//! 2. Under the write lock: ingest results, score, account failures,
//!    evaluate the failover controller, track issues on the active link and
//!    record the baseline and history sample. Recovery work is queued.
//! 3. Run queued recovery jobs one at a time with no lock held, re-taking
//!    the write lock briefly to apply each outcome.
//!
//! Status and report readers take the read lock and never observe a tick
//! half-applied. The threshold profile is loaded once per tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::MissedTickBehavior;

use crate::baseline::{BaselineStatus, DiagnosticsBaseline, DriftAlert};
use crate::config::{to_chrono, MonitorConfig};
use crate::error::{ConfigError, ProbeError, RecoveryError, StartupError};
use crate::events::MonitorEvent;
use crate::failover::{
    Decision, FailoverController, FailoverEvent, FailoverState, Scores, REASON_INITIAL_CONNECT,
};
use crate::history::{PerformanceHistory, PerformanceReport, PerformanceSample};
use crate::issues::{Issue, IssueEvent, IssueKind, IssueTracker, IssueUpdate, OverallStatus};
use crate::metrics::MetricsSnapshot;
use crate::probe::{probe_with_timeout, HealthProbe};
use crate::recovery::{
    plan, RecoveryAction, RecoveryCommands, RecoveryOrchestrator, RecoveryRequest,
};
use crate::registry::{LinkId, LinkKind, LinkRegistry, LinkStatus, ProbeOutcome};
use crate::report::ExportReport;
use crate::scoring;
use crate::thresholds::{ProfileHandle, Scenario, ThresholdOverrides, ThresholdProfile, Thresholds};

const EVENT_CAPACITY: usize = 256;

/// Everything a tick mutates, behind one lock.
pub struct MonitorState {
    pub registry: LinkRegistry,
    pub controller: FailoverController,
    pub issues: IssueTracker,
    pub baseline: DiagnosticsBaseline,
    pub history: PerformanceHistory,
    scores: Scores,
    no_viable: bool,
    ticks: u64,
    last_tick_at: Option<DateTime<Utc>>,
}

/// Per-link view for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct LinkView {
    pub id: LinkId,
    pub kind: LinkKind,
    pub priority: u32,
    pub status: LinkStatus,
    pub failure_count: u32,
    pub score: f64,
    pub last_outcome: ProbeOutcome,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_metrics: Option<MetricsSnapshot>,
    pub baseline: BaselineStatus,
    pub reboot_cooldown_secs: Option<u64>,
}

/// Point-in-time snapshot of the monitor. Always well-formed.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub generated_at: DateTime<Utc>,
    pub state: FailoverState,
    pub overall: OverallStatus,
    pub no_viable_link: bool,
    pub active_link: Option<LinkId>,
    pub scenario: Scenario,
    pub thresholds: Thresholds,
    pub auto_recovery: bool,
    pub links: Vec<LinkView>,
    pub active_issues: Vec<Issue>,
    pub resolved_issue_count: usize,
    pub failover_count: usize,
    pub last_failover: Option<FailoverEvent>,
    pub failover_cooldown_secs: Option<i64>,
    pub unacknowledged_drift_alerts: usize,
    pub ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Recovery work decided during a tick, run after the lock is released.
#[derive(Debug)]
enum Job {
    Switch {
        from: Option<LinkId>,
        to: LinkId,
        reason: String,
    },
    Recover {
        kinds: Vec<IssueKind>,
        request: RecoveryRequest,
    },
}

pub struct Coordinator<P, C> {
    config: MonitorConfig,
    probe: Arc<P>,
    commands: Arc<C>,
    profile: ProfileHandle,
    orchestrator: RecoveryOrchestrator,
    state: RwLock<MonitorState>,
    events: broadcast::Sender<MonitorEvent>,
}

impl<P: HealthProbe, C: RecoveryCommands> Coordinator<P, C> {
    /// Build a coordinator. Fails on an empty link set or invalid thresholds.
    pub fn new(config: MonitorConfig, probe: Arc<P>, commands: Arc<C>) -> Result<Self, StartupError> {
        if config.links.is_empty() {
            return Err(StartupError::EmptyRegistry);
        }
        let mut registry = LinkRegistry::new();
        for link in &config.links {
            registry.register(link.clone())?;
        }
        let profile = ProfileHandle::from_config(config.scenario, &config.thresholds)?;
        let orchestrator = RecoveryOrchestrator::new(config.recovery, registry.ids());

        let state = MonitorState {
            registry,
            controller: FailoverController::new(config.failover),
            issues: IssueTracker::new(
                config.issue_persistence_threshold,
                config.auto_recovery,
                config.severity,
            ),
            baseline: DiagnosticsBaseline::new(config.baseline),
            history: PerformanceHistory::new(
                to_chrono(config.history_retention),
                config.history_max_samples,
            ),
            scores: Scores::new(),
            no_viable: false,
            ticks: 0,
            last_tick_at: None,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::info!(
            links = config.links.len(),
            scenario = %config.scenario,
            interval_secs = config.poll_interval.as_secs(),
            "coordinator ready"
        );

        Ok(Coordinator {
            config,
            probe,
            commands,
            profile,
            orchestrator,
            state: RwLock::new(state),
            events,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Tick every poll interval until `shutdown` flips to true.
    ///
    /// A tick that overruns the interval delays the next one; ticks never
    /// overlap. In-flight probes finish (or time out) before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick_until(Utc::now(), Some(&shutdown)).await;
        }
        tracing::info!("coordinator stopped");
    }

    /// Run a single tick at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> FailoverState {
        self.tick_until(now, None).await
    }

    async fn tick_until(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> FailoverState {
        let targets: Vec<(LinkId, bool)> = {
            let st = self.state.read().await;
            st.registry
                .list()
                .iter()
                .map(|l| (l.id().clone(), l.is_settling(now)))
                .collect()
        };

        let probes = targets.iter().map(|(id, settling)| async move {
            if *settling {
                None
            } else {
                Some(probe_with_timeout(&*self.probe, id, self.config.probe_timeout).await)
            }
        });
        let results = join_all(probes).await;

        if shutdown.is_some_and(|s| *s.borrow()) {
            tracing::debug!("shutdown requested, skipping decision phase");
            return self.state.read().await.controller.state();
        }

        let probed = targets.into_iter().map(|(id, _)| id).zip(results).collect();
        let jobs = {
            let mut guard = self.state.write().await;
            self.decide(&mut guard, probed, now)
        };

        for job in jobs {
            self.run_job(job, now).await;
        }

        self.state.read().await.controller.state()
    }

    // ─── Decision Phase ─────────────────────────────────────────────────

    fn decide(
        &self,
        st: &mut MonitorState,
        probed: Vec<(LinkId, Option<Result<MetricsSnapshot, ProbeError>>)>,
        now: DateTime<Utc>,
    ) -> Vec<Job> {
        let profile = self.profile.load();
        let thresholds = &profile.thresholds;
        let mut events = Vec::new();

        let active_before = st.registry.active_id().cloned();
        let failures_before = active_before
            .as_ref()
            .and_then(|id| st.registry.get(id))
            .map_or(0, |l| l.failure_count());
        let mut active_probe_error = None;

        for (id, result) in probed {
            match result {
                None => st.registry.record_probe_skipped(&id),
                Some(Ok(metrics)) => st.registry.record_probe_success(&id, metrics, now),
                Some(Err(e)) => {
                    let failures = st.registry.record_probe_failure(&id, now);
                    if active_before.as_ref() == Some(&id) {
                        tracing::warn!(link = %id, failures, error = %e, "active link probe failed");
                        active_probe_error = Some(e);
                    } else {
                        tracing::debug!(link = %id, failures, error = %e, "probe failed");
                    }
                }
            }
        }

        st.scores = st
            .registry
            .list()
            .iter()
            .map(|l| {
                let score = match l.last_metrics() {
                    Some(m) if l.has_fresh_metrics() => scoring::score(m, l.kind()),
                    _ => 0.0,
                };
                (l.id().clone(), score)
            })
            .collect();

        st.controller.account(&mut st.registry, thresholds);

        let prev_state = st.controller.state();
        let decision = st.controller.evaluate(&st.registry, &st.scores, now);
        push_state_change(&mut events, prev_state, st.controller.state());

        let mut jobs = Vec::new();
        let no_viable = decision == Decision::NoViableLink;
        match decision {
            Decision::Hold => {}
            Decision::Connect { to } => jobs.push(Job::Switch {
                from: None,
                to,
                reason: REASON_INITIAL_CONNECT.to_string(),
            }),
            Decision::Failover { to, reason } => jobs.push(Job::Switch {
                from: active_before.clone(),
                to,
                reason,
            }),
            Decision::NoViableLink => {
                if !st.no_viable {
                    tracing::error!("no viable link available");
                    events.push(MonitorEvent::NoViableLink { at: now });
                }
            }
        }
        st.no_viable = no_viable;

        // Issues are tracked against the active link only.
        let update = match st.registry.active() {
            Some(active) if active.has_fresh_metrics() => match active.last_metrics() {
                Some(metrics) => st.issues.evaluate(active.id(), metrics, thresholds, now),
                None => IssueUpdate::default(),
            },
            Some(active) => match &active_probe_error {
                Some(e) => st
                    .issues
                    .record_disconnection(Some(active.id()), &e.to_string(), now),
                None => IssueUpdate::default(),
            },
            None if no_viable => st.issues.record_disconnection(None, "no viable link", now),
            None => IssueUpdate::default(),
        };
        push_issue_events(&mut events, update.events);

        if let Some(active) = st.registry.active() {
            let link = active.id().clone();
            let failures = active.failure_count();
            let reboot_threshold = self.orchestrator.config().reboot_failure_threshold;
            let switching = !jobs.is_empty();

            let mut reboot_kinds = Vec::new();
            let mut reboot_due = st.issues.auto_recovery()
                && !active.is_settling(now)
                && failures_before < reboot_threshold
                && failures >= reboot_threshold;

            for kind in update.recover {
                let action = plan(kind, failures, reboot_threshold);
                if action == RecoveryAction::Reboot {
                    reboot_kinds.push(kind);
                    reboot_due = true;
                    continue;
                }
                // A switch already queued this tick covers the failover step.
                let target = if action.needs_target() && !switching {
                    st.controller.propose(&st.registry, &st.scores, now)
                } else {
                    None
                };
                jobs.push(Job::Recover {
                    kinds: vec![kind],
                    request: RecoveryRequest {
                        link: link.clone(),
                        action,
                        target,
                    },
                });
            }

            if reboot_due && !switching {
                jobs.push(Job::Recover {
                    kinds: reboot_kinds,
                    request: RecoveryRequest {
                        link: link.clone(),
                        action: RecoveryAction::Reboot,
                        target: None,
                    },
                });
            }

            let fresh = active
                .last_metrics()
                .filter(|_| active.has_fresh_metrics())
                .cloned();
            if let Some(metrics) = &fresh {
                let baseline = st.baseline.record(&link, metrics, now);
                if let Some(b) = baseline.established {
                    events.push(MonitorEvent::BaselineEstablished {
                        link: link.clone(),
                        baseline: b,
                    });
                }
                if let Some(alert) = baseline.drift {
                    events.push(MonitorEvent::DriftDetected { alert });
                }
            }
            // Settling links are skipped; a failed probe is an outage sample.
            if fresh.is_some() || active_probe_error.is_some() {
                st.history.record(PerformanceSample {
                    timestamp: now,
                    link,
                    metrics: fresh,
                    issue_count: st.issues.active_count(),
                });
            }
        } else if !update.recover.is_empty() {
            tracing::debug!(kinds = ?update.recover, "no active link to recover");
        }

        st.ticks += 1;
        st.last_tick_at = Some(now);
        tracing::debug!(
            tick = st.ticks,
            state = %st.controller.state(),
            active = ?st.registry.active_id(),
            jobs = jobs.len(),
            "tick decided"
        );

        self.publish(events);
        jobs
    }

    // ─── Recovery Phase ─────────────────────────────────────────────────

    async fn run_job(&self, job: Job, now: DateTime<Utc>) {
        match job {
            Job::Switch { from, to, reason } => {
                let result = self.orchestrator.establish(&*self.commands, &to).await;
                let mut guard = self.state.write().await;
                let st = &mut *guard;
                let mut events = Vec::new();
                let action = if from.is_some() { "failover" } else { "connect" };
                match result {
                    Ok(()) if st.registry.active_id() == from.as_ref() => {
                        self.commit_switch(st, &to, &reason, action, now, &mut events);
                    }
                    Ok(()) => {
                        tracing::debug!(link = %to, "active link changed while establishing");
                    }
                    Err(e) => {
                        tracing::error!(link = %to, error = %e, "link establishment failed");
                        let prev = st.controller.state();
                        st.controller.abort(&st.registry);
                        push_state_change(&mut events, prev, st.controller.state());
                        events.push(MonitorEvent::RecoveryAttempted {
                            kind: None,
                            link: to,
                            action: action.to_string(),
                            success: false,
                            error: Some(e.to_string()),
                        });
                    }
                }
                self.publish(events);
            }
            Job::Recover { kinds, request } => {
                let kinds: Vec<IssueKind> = {
                    let st = self.state.read().await;
                    if st.registry.active_id() != Some(&request.link) {
                        return;
                    }
                    kinds
                        .into_iter()
                        .filter(|k| st.issues.get(*k).is_some())
                        .collect()
                };
                // Every issue it was queued for got resolved by an earlier job.
                if kinds.is_empty() && request.action != RecoveryAction::Reboot {
                    return;
                }

                let result = self
                    .orchestrator
                    .execute(&*self.commands, &request, now)
                    .await;

                let mut guard = self.state.write().await;
                let st = &mut *guard;
                let mut events = Vec::new();
                match result {
                    Ok(outcome) => {
                        let action = outcome.step.name();
                        if let Some(to) = &outcome.switched_to {
                            if st.registry.active_id() == Some(&request.link) {
                                let reason = match kinds.first() {
                                    Some(kind) => format!("recovery: {kind}"),
                                    None => "recovery".to_string(),
                                };
                                self.commit_switch(st, to, &reason, action, now, &mut events);
                            }
                        }
                        if let Some(until) = outcome.settle_until {
                            st.registry.begin_settle(&request.link, until);
                        }
                        for kind in &kinds {
                            if let Some(issue) = st.issues.resolve(*kind, action, now) {
                                events.push(MonitorEvent::IssueResolved { issue });
                            }
                        }
                        push_attempts(&mut events, &kinds, &request.link, action, None);
                    }
                    Err(e) => {
                        tracing::error!(
                            link = %request.link,
                            kinds = ?kinds,
                            error = %e,
                            "recovery failed, issue stays active"
                        );
                        let action = request
                            .action
                            .steps()
                            .last()
                            .map_or("recovery", |s| s.name());
                        push_attempts(&mut events, &kinds, &request.link, action, Some(e));
                    }
                }
                self.publish(events);
            }
        }
    }

    /// Move the active link and close out the issues raised on the old one.
    fn commit_switch(
        &self,
        st: &mut MonitorState,
        to: &LinkId,
        reason: &str,
        action: &str,
        now: DateTime<Utc>,
        events: &mut Vec<MonitorEvent>,
    ) -> Option<FailoverEvent> {
        let prev = st.controller.state();
        let failover = st.controller.commit(&mut st.registry, to, reason, now)?;
        push_state_change(events, prev, st.controller.state());
        st.no_viable = false;

        let kinds: Vec<IssueKind> = st.issues.active().iter().map(|i| i.kind).collect();
        for kind in kinds {
            if let Some(issue) = st.issues.resolve(kind, action, now) {
                events.push(MonitorEvent::IssueResolved { issue });
            }
        }
        events.push(MonitorEvent::FailoverCompleted {
            failover: failover.clone(),
        });
        Some(failover)
    }

    fn publish(&self, events: Vec<MonitorEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    // ─── Operator Surface ───────────────────────────────────────────────

    /// Switch to `to` now, bypassing hysteresis and the failover cooldown.
    pub async fn manual_failover(
        &self,
        to: &LinkId,
        reason: &str,
    ) -> Result<Option<FailoverEvent>, RecoveryError> {
        {
            let st = self.state.read().await;
            if st.registry.get(to).is_none() {
                return Err(RecoveryError::UnknownLink(to.clone()));
            }
            if st.registry.active_id() == Some(to) {
                return Ok(None);
            }
        }
        self.orchestrator.establish(&*self.commands, to).await?;

        let now = Utc::now();
        let mut guard = self.state.write().await;
        let mut events = Vec::new();
        let reason = format!("manual: {reason}");
        let failover = self.commit_switch(&mut guard, to, &reason, "manual_failover", now, &mut events);
        drop(guard);
        self.publish(events);
        Ok(failover)
    }

    /// Operator reboot. Subject to the per-link guard and reboot cooldown.
    pub async fn reboot_link(&self, link: &LinkId) -> Result<DateTime<Utc>, RecoveryError> {
        let now = Utc::now();
        let result = self.orchestrator.reboot(&*self.commands, link, now).await;
        let mut events = Vec::new();
        if let Ok(until) = &result {
            self.state.write().await.registry.begin_settle(link, *until);
        }
        push_attempts(
            &mut events,
            &[],
            link,
            "reboot",
            result.as_ref().err().cloned(),
        );
        self.publish(events);
        result
    }

    pub async fn stow_link(&self, link: &LinkId) -> Result<(), RecoveryError> {
        self.orchestrator.stow(&*self.commands, link).await
    }

    pub async fn unstow_link(&self, link: &LinkId) -> Result<(), RecoveryError> {
        self.orchestrator.unstow(&*self.commands, link).await
    }

    pub async fn reset_baseline(&self) {
        self.state.write().await.baseline.reset();
    }

    pub async fn set_auto_recovery(&self, enabled: bool) {
        self.state.write().await.issues.set_auto_recovery(enabled);
        tracing::info!(enabled, "automatic recovery toggled");
    }

    pub async fn acknowledge_drift(&self, index: usize) -> bool {
        self.state.write().await.baseline.acknowledge(index)
    }

    pub async fn clear_acknowledged_drift(&self) -> usize {
        self.state.write().await.baseline.clear_acknowledged()
    }

    // ─── Scenario ───────────────────────────────────────────────────────

    pub fn profile(&self) -> Arc<ThresholdProfile> {
        self.profile.load()
    }

    pub fn set_scenario(&self, scenario: Scenario) -> Arc<ThresholdProfile> {
        let profile = self.profile.set_scenario(scenario);
        self.publish(vec![MonitorEvent::ScenarioChanged { profile: *profile }]);
        profile
    }

    pub fn apply_overrides(
        &self,
        overrides: &ThresholdOverrides,
    ) -> Result<Arc<ThresholdProfile>, ConfigError> {
        let profile = self.profile.apply_overrides(overrides)?;
        self.publish(vec![MonitorEvent::ScenarioChanged { profile: *profile }]);
        Ok(profile)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub async fn status(&self) -> MonitorStatus {
        let now = Utc::now();
        let profile = self.profile.load();
        let st = self.state.read().await;

        let links = st
            .registry
            .list()
            .iter()
            .map(|l| LinkView {
                id: l.id().clone(),
                kind: l.kind(),
                priority: l.priority(),
                status: l.status(),
                failure_count: l.failure_count(),
                score: st.scores.get(l.id()).copied().unwrap_or(0.0),
                last_outcome: l.last_outcome(),
                last_probe_at: l.last_probe_at(),
                last_metrics: l.last_metrics().cloned(),
                baseline: st.baseline.status(l.id()),
                reboot_cooldown_secs: self
                    .orchestrator
                    .reboot_cooldown_remaining(l.id(), now)
                    .map(|d| d.as_secs()),
            })
            .collect();

        let state = st.controller.state();
        let overall = if state == FailoverState::Failed {
            OverallStatus::Critical
        } else {
            st.issues.overall_status()
        };

        MonitorStatus {
            generated_at: now,
            state,
            overall,
            no_viable_link: st.no_viable,
            active_link: st.registry.active_id().cloned(),
            scenario: profile.scenario,
            thresholds: profile.thresholds,
            auto_recovery: st.issues.auto_recovery(),
            links,
            active_issues: st.issues.active().to_vec(),
            resolved_issue_count: st.issues.resolved_count(),
            failover_count: st.controller.history().len(),
            last_failover: st.controller.history().last().cloned(),
            failover_cooldown_secs: st
                .controller
                .cooldown_remaining(now)
                .map(|d| d.num_seconds()),
            unacknowledged_drift_alerts: st.baseline.unacknowledged_count(),
            ticks: st.ticks,
            last_tick_at: st.last_tick_at,
        }
    }

    pub async fn performance_report(&self, window: Duration, now: DateTime<Utc>) -> PerformanceReport {
        self.state.read().await.history.report(to_chrono(window), now)
    }

    pub async fn drift_alerts(&self) -> Vec<DriftAlert> {
        self.state.read().await.baseline.alerts().cloned().collect()
    }

    pub async fn export_report(&self, window: Duration, now: DateTime<Utc>) -> ExportReport {
        let profile = self.profile.load();
        let st = self.state.read().await;
        let window = to_chrono(window);
        ExportReport {
            generated_at: now,
            active_scenario: profile.scenario,
            thresholds: profile.thresholds,
            window_secs: window.num_seconds(),
            summary: st.history.report(window, now),
            samples: st.history.window(window, now).cloned().collect(),
            active_issues: st.issues.active().to_vec(),
            resolved_issues: st.issues.resolved().cloned().collect(),
            failover_history: st.controller.history().to_vec(),
            drift_alerts: st.baseline.alerts().cloned().collect(),
        }
    }
}

fn push_state_change(events: &mut Vec<MonitorEvent>, from: FailoverState, to: FailoverState) {
    if from != to {
        tracing::info!(from = %from, to = %to, "failover state changed");
        events.push(MonitorEvent::StateChanged { from, to });
    }
}

fn push_issue_events(events: &mut Vec<MonitorEvent>, issue_events: Vec<IssueEvent>) {
    for event in issue_events {
        match event {
            IssueEvent::Detected(issue) => events.push(MonitorEvent::IssueDetected { issue }),
            IssueEvent::Escalated { kind, severity } => {
                events.push(MonitorEvent::IssueEscalated { kind, severity })
            }
            IssueEvent::Resolved(issue) => events.push(MonitorEvent::IssueResolved { issue }),
            IssueEvent::Recurred { .. } => {}
        }
    }
}

fn push_attempts(
    events: &mut Vec<MonitorEvent>,
    kinds: &[IssueKind],
    link: &LinkId,
    action: &str,
    error: Option<RecoveryError>,
) {
    if error.is_none() {
        tracing::info!(link = %link, action, kinds = ?kinds, "recovery succeeded");
    }
    let error = error.map(|e| e.to_string());
    let attempt = |kind| MonitorEvent::RecoveryAttempted {
        kind,
        link: link.clone(),
        action: action.to_string(),
        success: error.is_none(),
        error: error.clone(),
    };
    if kinds.is_empty() {
        events.push(attempt(None));
    } else {
        events.extend(kinds.iter().map(|k| attempt(Some(*k))));
    }
}
