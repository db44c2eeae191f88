//! Property-based tests for the coordinator over random probe sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use proptest::prelude::*;

use uplink_core::failover::FailoverState;
use uplink_core::registry::{LinkConfig, LinkStatus, ProbeOutcome};
use uplink_core::{
    Coordinator, HealthProbe, LinkId, LinkKind, MetricsSnapshot, MonitorConfig, ProbeError,
    RecoveryCommands,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

const LINKS: [&str; 3] = ["a", "b", "c"];

#[derive(Default)]
struct ScriptedProbe {
    next: Mutex<HashMap<String, Option<MetricsSnapshot>>>,
}

impl HealthProbe for ScriptedProbe {
    async fn probe(&self, link: &LinkId) -> Result<MetricsSnapshot, ProbeError> {
        let scripted = self.next.lock().unwrap().get(link.as_str()).cloned().flatten();
        scripted.ok_or_else(|| ProbeError::Unavailable {
            link: link.clone(),
            reason: "scripted outage".into(),
        })
    }
}

struct Succeeds;

impl RecoveryCommands for Succeeds {
    async fn reconnect(&self, _link: &LinkId) -> bool {
        true
    }
    async fn reboot(&self, _link: &LinkId) -> bool {
        true
    }
    async fn stow(&self, _link: &LinkId) -> bool {
        true
    }
    async fn unstow(&self, _link: &LinkId) -> bool {
        true
    }
}

/// 0 = unreachable, then healthy, marginal, high latency, hardware alert.
fn sample(code: u8) -> Option<MetricsSnapshot> {
    let base = MetricsSnapshot::new(40.0, 150.0, 15.0, 0.0, 9.0, 0.01, Utc::now());
    match code {
        0 => None,
        1 => Some(base),
        2 => Some(MetricsSnapshot::new(90.0, 25.0, 6.0, 1.0, 7.5, 0.04, Utc::now())),
        3 => Some(MetricsSnapshot {
            latency_ms: 450.0,
            ..base
        }),
        _ => Some(base.with_alert("MOTORS_STUCK")),
    }
}

fn config() -> MonitorConfig {
    let kinds = [LinkKind::PrimarySatellite, LinkKind::AlternateSatellite, LinkKind::Cellular];
    MonitorConfig {
        links: LINKS
            .iter()
            .zip(kinds)
            .enumerate()
            .map(|(i, (id, kind))| LinkConfig {
                id: LinkId::from(*id),
                kind,
                priority: 100 - i as u32 * 10,
            })
            .collect(),
        ..MonitorConfig::default()
    }
}

// ─── Active Link Invariants ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// At most one link is active, FAILED only when nothing is viable, the
    /// failover log chains from link to link, and automatic failovers
    /// respect the cooldown.
    #[test]
    fn active_link_stays_consistent(
        script in prop::collection::vec(prop::array::uniform3(0u8..5), 1..80),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        rt.block_on(async {
            let probe = Arc::new(ScriptedProbe::default());
            let coordinator =
                Coordinator::new(config(), probe.clone(), Arc::new(Succeeds)).unwrap();
            let cooldown = coordinator.config().failover.cooldown;
            let t0 = Utc::now();

            for (tick, codes) in script.iter().enumerate() {
                {
                    let mut next = probe.next.lock().unwrap();
                    for (id, code) in LINKS.iter().zip(codes) {
                        next.insert(id.to_string(), sample(*code));
                    }
                }
                let now = t0 + chrono::Duration::seconds(tick as i64 * 10);
                let state = coordinator.tick(now).await;

                let status = coordinator.status().await;
                let active: Vec<&LinkId> = status
                    .links
                    .iter()
                    .filter(|l| l.status == LinkStatus::Active)
                    .map(|l| &l.id)
                    .collect();
                prop_assert!(active.len() <= 1);
                if let Some(id) = active.first() {
                    prop_assert_eq!(Some(*id), status.active_link.as_ref());
                }
                if state == FailoverState::Primary {
                    prop_assert_eq!(status.active_link.clone(), Some(LinkId::from("a")));
                }
                if state == FailoverState::Failed {
                    prop_assert!(status.no_viable_link);
                    for link in &status.links {
                        prop_assert!(
                            link.last_outcome != ProbeOutcome::Ok || link.score <= 0.0,
                            "{} viable while FAILED", link.id
                        );
                    }
                }
                for link in &status.links {
                    prop_assert!(link.failure_count as usize <= tick + 1);
                }
            }

            let report = coordinator
                .export_report(std::time::Duration::from_secs(3600), t0)
                .await;
            let history = report.failover_history;
            for pair in history.windows(2) {
                prop_assert_eq!(pair[1].from.as_ref(), Some(&pair[0].to));
                if pair[0].from.is_some() {
                    prop_assert!(pair[1].timestamp - pair[0].timestamp >= cooldown);
                }
            }
            if let Some(first) = history.first() {
                prop_assert!(first.from.is_none());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
