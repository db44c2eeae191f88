//! # Recovery Orchestration
//!
//! Maps an issue kind to a fixed sequence of recovery steps and runs them
//! against the external command interface.
//!
//! | issue kind           | steps                         |
//! |----------------------|-------------------------------|
//! | `high_latency`       | failover                      |
//! | `low_bandwidth`      | reconnect → failover          |
//! | `obstruction`        | failover                      |
//! | `disconnection`      | reconnect → reestablish       |
//! | `signal_degradation` | reconnect                     |
//! | `hardware_alert`     | reboot                        |
//!
//! Any kind escalates to a reboot once the link's failure count reaches the
//! reboot threshold. Actions are exclusive per link: a second action on a
//! link whose guard is held fails fast with [`RecoveryError::InProgress`].
//! Reboots are further rate limited to one per `settle + grace` window.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::saturating_add;
use crate::error::RecoveryError;
use crate::issues::IssueKind;
use crate::registry::LinkId;

/// Device/link control surface. Every call may block up to the
/// orchestrator's command timeout and must be safe to repeat.
pub trait RecoveryCommands: Send + Sync + 'static {
    fn reconnect(&self, link: &LinkId) -> impl Future<Output = bool> + Send;
    fn reboot(&self, link: &LinkId) -> impl Future<Output = bool> + Send;
    fn stow(&self, link: &LinkId) -> impl Future<Output = bool> + Send;
    fn unstow(&self, link: &LinkId) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    /// Link-level reconnect of the affected link.
    Reconnect,
    /// Switch to the gated failover candidate.
    Failover,
    /// Bring up the best available link from scratch.
    Reestablish,
    /// Device-level reboot, followed by a settle period.
    Reboot,
}

impl RecoveryStep {
    pub fn name(self) -> &'static str {
        match self {
            RecoveryStep::Reconnect => "reconnect",
            RecoveryStep::Failover => "failover",
            RecoveryStep::Reestablish => "reestablish",
            RecoveryStep::Reboot => "reboot",
        }
    }

    /// Whether the step switches the active link.
    pub fn switches_link(self) -> bool {
        matches!(self, RecoveryStep::Failover | RecoveryStep::Reestablish)
    }
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Failover,
    Reconnect,
    ReconnectThenFailover,
    ReconnectThenReestablish,
    Reboot,
}

impl RecoveryAction {
    /// Steps tried in order until one succeeds.
    pub fn steps(self) -> &'static [RecoveryStep] {
        match self {
            RecoveryAction::Failover => &[RecoveryStep::Failover],
            RecoveryAction::Reconnect => &[RecoveryStep::Reconnect],
            RecoveryAction::ReconnectThenFailover => {
                &[RecoveryStep::Reconnect, RecoveryStep::Failover]
            }
            RecoveryAction::ReconnectThenReestablish => {
                &[RecoveryStep::Reconnect, RecoveryStep::Reestablish]
            }
            RecoveryAction::Reboot => &[RecoveryStep::Reboot],
        }
    }

    /// Whether any step needs a failover target chosen up front.
    pub fn needs_target(self) -> bool {
        self.steps().iter().any(|s| s.switches_link())
    }
}

const RECOVERY_TABLE: [(IssueKind, RecoveryAction); 6] = [
    (IssueKind::HighLatency, RecoveryAction::Failover),
    (IssueKind::LowBandwidth, RecoveryAction::ReconnectThenFailover),
    (IssueKind::Obstruction, RecoveryAction::Failover),
    (IssueKind::Disconnection, RecoveryAction::ReconnectThenReestablish),
    (IssueKind::SignalDegradation, RecoveryAction::Reconnect),
    (IssueKind::HardwareAlert, RecoveryAction::Reboot),
];

/// Default action for an issue kind.
pub fn action_for(kind: IssueKind) -> RecoveryAction {
    RECOVERY_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or(RecoveryAction::Reconnect, |(_, action)| *action)
}

/// Action for `kind` given the link's failure count.
pub fn plan(kind: IssueKind, failure_count: u32, reboot_threshold: u32) -> RecoveryAction {
    if failure_count >= reboot_threshold {
        RecoveryAction::Reboot
    } else {
        action_for(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryConfig {
    pub command_timeout: Duration,
    /// Failure count at which any recovery becomes a reboot.
    pub reboot_failure_threshold: u32,
    /// Time after a reboot before the link is probed again.
    pub reboot_settle: chrono::Duration,
    /// Extra time after the settle before another reboot is allowed.
    pub reboot_grace: chrono::Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            command_timeout: Duration::from_secs(30),
            reboot_failure_threshold: 5,
            reboot_settle: chrono::Duration::seconds(60),
            reboot_grace: chrono::Duration::seconds(120),
        }
    }
}

/// One recovery to run.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRequest {
    /// Link the issue was raised on.
    pub link: LinkId,
    pub action: RecoveryAction,
    /// Failover candidate, chosen under the state lock before execution.
    pub target: Option<LinkId>,
}

/// What the successful step did.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub step: RecoveryStep,
    /// Set when the step established a different link.
    pub switched_to: Option<LinkId>,
    /// Set after a reboot.
    pub settle_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LinkRecoveryState {
    last_reboot: Option<DateTime<Utc>>,
}

pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    links: HashMap<LinkId, Arc<Mutex<LinkRecoveryState>>>,
}

impl RecoveryOrchestrator {
    pub fn new(config: RecoveryConfig, links: impl IntoIterator<Item = LinkId>) -> Self {
        RecoveryOrchestrator {
            config,
            links: links
                .into_iter()
                .map(|id| (id, Arc::new(Mutex::new(LinkRecoveryState::default()))))
                .collect(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Run `request`'s steps in order, holding the link's guard throughout.
    pub async fn execute<C: RecoveryCommands>(
        &self,
        commands: &C,
        request: &RecoveryRequest,
        now: DateTime<Utc>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let mut guard = self.acquire(&request.link)?;
        let mut last_err = RecoveryError::NoCandidate;

        for &step in request.action.steps() {
            tracing::info!(link = %request.link, step = %step, "recovery step");
            let result = match step {
                RecoveryStep::Reconnect => self
                    .run_command(
                        &request.link,
                        "reconnect",
                        commands.reconnect(&request.link),
                    )
                    .await
                    .map(|()| RecoveryOutcome {
                        step,
                        switched_to: None,
                        settle_until: None,
                    }),
                RecoveryStep::Failover | RecoveryStep::Reestablish => {
                    match &request.target {
                        Some(target) => {
                            self.establish(commands, target)
                                .await
                                .map(|()| RecoveryOutcome {
                                    step,
                                    switched_to: Some(target.clone()),
                                    settle_until: None,
                                })
                        }
                        None => Err(RecoveryError::NoCandidate),
                    }
                }
                RecoveryStep::Reboot => self
                    .reboot_locked(commands, &request.link, &mut guard, now)
                    .await
                    .map(|until| RecoveryOutcome {
                        step,
                        switched_to: None,
                        settle_until: Some(until),
                    }),
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(link = %request.link, step = %step, error = %e, "recovery step failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Link-establishment step for a switch to `target`.
    pub async fn establish<C: RecoveryCommands>(
        &self,
        commands: &C,
        target: &LinkId,
    ) -> Result<(), RecoveryError> {
        let _guard = self.acquire(target)?;
        self.run_command(target, "reconnect", commands.reconnect(target))
            .await
    }

    /// Operator-issued reboot. Still subject to the guard and cooldown.
    /// Returns the end of the settle period.
    pub async fn reboot<C: RecoveryCommands>(
        &self,
        commands: &C,
        link: &LinkId,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RecoveryError> {
        let mut guard = self.acquire(link)?;
        self.reboot_locked(commands, link, &mut guard, now).await
    }

    pub async fn stow<C: RecoveryCommands>(
        &self,
        commands: &C,
        link: &LinkId,
    ) -> Result<(), RecoveryError> {
        let _guard = self.acquire(link)?;
        self.run_command(link, "stow", commands.stow(link)).await
    }

    pub async fn unstow<C: RecoveryCommands>(
        &self,
        commands: &C,
        link: &LinkId,
    ) -> Result<(), RecoveryError> {
        let _guard = self.acquire(link)?;
        self.run_command(link, "unstow", commands.unstow(link)).await
    }

    /// Time left before `link` may be rebooted again. `None` when a reboot
    /// is allowed now, or when an action currently holds the link.
    pub fn reboot_cooldown_remaining(&self, link: &LinkId, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.links.get(link)?.try_lock().ok()?;
        self.remaining(&state, now)
    }

    // ─── Internal ───────────────────────────────────────────────────────

    fn acquire(&self, link: &LinkId) -> Result<OwnedMutexGuard<LinkRecoveryState>, RecoveryError> {
        let lock = self
            .links
            .get(link)
            .ok_or_else(|| RecoveryError::UnknownLink(link.clone()))?;
        lock.clone()
            .try_lock_owned()
            .map_err(|_| RecoveryError::InProgress(link.clone()))
    }

    fn remaining(&self, state: &LinkRecoveryState, now: DateTime<Utc>) -> Option<Duration> {
        let last = state.last_reboot?;
        let until = saturating_add(
            saturating_add(last, self.config.reboot_settle),
            self.config.reboot_grace,
        );
        if now < until {
            (until - now).to_std().ok()
        } else {
            None
        }
    }

    async fn reboot_locked<C: RecoveryCommands>(
        &self,
        commands: &C,
        link: &LinkId,
        state: &mut LinkRecoveryState,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RecoveryError> {
        if let Some(remaining) = self.remaining(state, now) {
            tracing::warn!(link = %link, remaining_secs = remaining.as_secs(), "reboot suppressed by cooldown");
            return Err(RecoveryError::CooldownActive {
                link: link.clone(),
                remaining,
            });
        }
        // The cooldown starts when the reboot is issued, whatever it reports.
        state.last_reboot = Some(now);
        self.run_command(link, "reboot", commands.reboot(link)).await?;
        let settle_until = saturating_add(now, self.config.reboot_settle);
        tracing::info!(link = %link, %settle_until, "reboot issued, link settling");
        Ok(settle_until)
    }

    async fn run_command<F>(
        &self,
        link: &LinkId,
        action: &'static str,
        command: F,
    ) -> Result<(), RecoveryError>
    where
        F: Future<Output = bool>,
    {
        match tokio::time::timeout(self.config.command_timeout, command).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RecoveryError::CommandFailed {
                link: link.clone(),
                action,
            }),
            Err(_) => Err(RecoveryError::CommandTimeout {
                link: link.clone(),
                action,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockCommands {
        reconnect_fails: bool,
        hang: bool,
        calls: StdMutex<Vec<(&'static str, String)>>,
    }

    impl MockCommands {
        async fn call(&self, name: &'static str, link: &LinkId) -> bool {
            self.calls.lock().unwrap().push((name, link.to_string()));
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            !(name == "reconnect" && self.reconnect_fails)
        }

        fn calls(&self) -> Vec<(&'static str, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RecoveryCommands for MockCommands {
        async fn reconnect(&self, link: &LinkId) -> bool {
            self.call("reconnect", link).await
        }
        async fn reboot(&self, link: &LinkId) -> bool {
            self.call("reboot", link).await
        }
        async fn stow(&self, link: &LinkId) -> bool {
            self.call("stow", link).await
        }
        async fn unstow(&self, link: &LinkId) -> bool {
            self.call("unstow", link).await
        }
    }

    fn orchestrator() -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(
            RecoveryConfig::default(),
            [LinkId::from("a"), LinkId::from("b")],
        )
    }

    fn request(action: RecoveryAction, target: Option<&str>) -> RecoveryRequest {
        RecoveryRequest {
            link: LinkId::from("a"),
            action,
            target: target.map(LinkId::from),
        }
    }

    // ─── Plan Table ─────────────────────────────────────────────────────

    #[test]
    fn table_covers_every_kind() {
        assert_eq!(action_for(IssueKind::HighLatency), RecoveryAction::Failover);
        assert_eq!(
            action_for(IssueKind::LowBandwidth),
            RecoveryAction::ReconnectThenFailover
        );
        assert_eq!(action_for(IssueKind::Obstruction), RecoveryAction::Failover);
        assert_eq!(
            action_for(IssueKind::Disconnection),
            RecoveryAction::ReconnectThenReestablish
        );
        assert_eq!(
            action_for(IssueKind::SignalDegradation),
            RecoveryAction::Reconnect
        );
        assert_eq!(action_for(IssueKind::HardwareAlert), RecoveryAction::Reboot);
    }

    #[test]
    fn high_failure_count_escalates_to_reboot() {
        assert_eq!(plan(IssueKind::HighLatency, 4, 5), RecoveryAction::Failover);
        assert_eq!(plan(IssueKind::HighLatency, 5, 5), RecoveryAction::Reboot);
        assert!(!RecoveryAction::Reboot.needs_target());
        assert!(RecoveryAction::ReconnectThenFailover.needs_target());
    }

    // ─── Execution ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn reconnect_success_stops_the_sequence() {
        let orch = orchestrator();
        let cmds = MockCommands::default();
        let out = orch
            .execute(&cmds, &request(RecoveryAction::ReconnectThenFailover, Some("b")), Utc::now())
            .await
            .unwrap();
        assert_eq!(out.step, RecoveryStep::Reconnect);
        assert_eq!(out.switched_to, None);
        assert_eq!(cmds.calls(), vec![("reconnect", "a".to_string())]);
    }

    #[tokio::test]
    async fn failed_step_falls_through_to_next() {
        let orch = orchestrator();
        let cmds = MockCommands {
            reconnect_fails: true,
            ..Default::default()
        };
        let err = orch
            .execute(&cmds, &request(RecoveryAction::ReconnectThenFailover, None), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, RecoveryError::NoCandidate);
        assert_eq!(cmds.calls().len(), 1);
    }

    #[tokio::test]
    async fn failover_step_establishes_target() {
        let orch = orchestrator();
        let cmds = MockCommands::default();
        let out = orch
            .execute(&cmds, &request(RecoveryAction::Failover, Some("b")), Utc::now())
            .await
            .unwrap();
        assert_eq!(out.switched_to, Some(LinkId::from("b")));
        assert_eq!(cmds.calls(), vec![("reconnect", "b".to_string())]);
    }

    #[tokio::test]
    async fn guard_rejects_concurrent_action() {
        let orch = orchestrator();
        let cmds = MockCommands::default();
        let _held = orch.acquire(&LinkId::from("a")).unwrap();
        let err = orch
            .execute(&cmds, &request(RecoveryAction::Reconnect, None), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, RecoveryError::InProgress(LinkId::from("a")));
        assert!(cmds.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_link_rejected() {
        let orch = orchestrator();
        let cmds = MockCommands::default();
        let err = orch.stow(&cmds, &LinkId::from("zz")).await.unwrap_err();
        assert_eq!(err, RecoveryError::UnknownLink(LinkId::from("zz")));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_command_times_out() {
        let orch = orchestrator();
        let cmds = MockCommands {
            hang: true,
            ..Default::default()
        };
        let err = orch
            .execute(&cmds, &request(RecoveryAction::Reconnect, None), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::CommandTimeout {
                action: "reconnect",
                ..
            }
        ));
    }

    // ─── Reboot Cooldown ────────────────────────────────────────────────

    #[tokio::test]
    async fn second_reboot_suppressed_until_settle_plus_grace() {
        let orch = orchestrator();
        let cmds = MockCommands::default();
        let link = LinkId::from("a");
        let t0 = Utc::now();

        let settle_until = orch.reboot(&cmds, &link, t0).await.unwrap();
        assert_eq!(settle_until, t0 + chrono::Duration::seconds(60));

        let t1 = t0 + chrono::Duration::seconds(100);
        let err = orch
            .execute(&cmds, &request(RecoveryAction::Reboot, None), t1)
            .await
            .unwrap_err();
        let RecoveryError::CooldownActive { remaining, .. } = err else {
            panic!("expected cooldown, got {err:?}");
        };
        assert_eq!(remaining, Duration::from_secs(80));
        assert_eq!(
            orch.reboot_cooldown_remaining(&link, t1),
            Some(Duration::from_secs(80))
        );

        let t2 = t0 + chrono::Duration::seconds(181);
        orch.reboot(&cmds, &link, t2).await.unwrap();
        let reboots = cmds.calls().iter().filter(|(n, _)| *n == "reboot").count();
        assert_eq!(reboots, 2);
    }
}
