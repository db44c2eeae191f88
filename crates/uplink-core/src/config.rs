use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::baseline::BaselineConfig;
use crate::error::ConfigError;
use crate::failover::FailoverConfig;
use crate::issues::SeverityPolicy;
use crate::recovery::RecoveryConfig;
use crate::registry::{LinkConfig, LinkId, LinkKind};
use crate::thresholds::{Scenario, ThresholdOverrides, ThresholdProfile};

pub const CONFIG_VERSION: u32 = 1;

/// Upper bound for every configured time span (30 days).
pub const MAX_SPAN_SECS: u64 = 30 * 86_400;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfigInput {
    pub version: u32,
    pub poll_interval_secs: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub failover_threshold: Option<u32>,
    pub failover_hysteresis: Option<f64>,
    pub failover_cooldown_secs: Option<u64>,
    pub issue_persistence_threshold: Option<u32>,
    pub auto_recovery: Option<bool>,
    pub reboot_failure_threshold: Option<u32>,
    pub reboot_settle_secs: Option<u64>,
    pub reboot_grace_secs: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub baseline_window: Option<usize>,
    pub baseline_min_samples: Option<usize>,
    pub drift_ratio: Option<f64>,
    pub history_retention_secs: Option<u64>,
    pub history_max_samples: Option<usize>,
    pub scenario: Option<String>,
    pub thresholds: ThresholdOverrides,
    pub severity: SeverityPolicy,
    pub links: Vec<LinkConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkConfigInput {
    pub id: String,
    pub kind: Option<String>,
    pub priority: Option<u32>,
}

/// Validated monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub version: u32,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub failover: FailoverConfig,
    pub issue_persistence_threshold: u32,
    pub auto_recovery: bool,
    pub recovery: RecoveryConfig,
    pub baseline: BaselineConfig,
    pub history_retention: Duration,
    pub history_max_samples: usize,
    pub scenario: Scenario,
    pub thresholds: ThresholdOverrides,
    pub severity: SeverityPolicy,
    pub links: Vec<LinkConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            poll_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_millis(5000),
            failover: FailoverConfig::default(),
            issue_persistence_threshold: 3,
            auto_recovery: true,
            recovery: RecoveryConfig::default(),
            baseline: BaselineConfig::default(),
            history_retention: Duration::from_secs(86_400),
            history_max_samples: 1000,
            scenario: Scenario::Normal,
            thresholds: ThresholdOverrides::default(),
            severity: SeverityPolicy::default(),
            links: Vec::new(),
        }
    }
}

impl MonitorConfigInput {
    pub fn resolve(self) -> Result<MonitorConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }
        let d = MonitorConfig::default();

        let poll_interval = self
            .poll_interval_secs
            .map(|v| span_secs("poll_interval_secs", v))
            .transpose()?
            .unwrap_or(d.poll_interval);
        let probe_timeout = self
            .probe_timeout_ms
            .map(|v| span_millis("probe_timeout_ms", v))
            .transpose()?
            .unwrap_or(d.probe_timeout);
        non_zero_duration("poll_interval_secs", poll_interval)?;
        non_zero_duration("probe_timeout_ms", probe_timeout)?;
        if probe_timeout > poll_interval {
            return Err(ConfigError::ProbeTimeoutTooLong {
                timeout: probe_timeout,
                interval: poll_interval,
            });
        }

        let hysteresis = self.failover_hysteresis.unwrap_or(d.failover.hysteresis);
        if !hysteresis.is_finite() || hysteresis < 0.0 {
            return Err(ConfigError::Negative {
                key: "failover_hysteresis",
                value: hysteresis,
            });
        }
        let failover = FailoverConfig {
            threshold: non_zero(
                "failover_threshold",
                self.failover_threshold.unwrap_or(d.failover.threshold),
            )?,
            hysteresis,
            cooldown: self
                .failover_cooldown_secs
                .map(|v| span_secs("failover_cooldown_secs", v).map(to_chrono))
                .transpose()?
                .unwrap_or(d.failover.cooldown),
        };

        let recovery = RecoveryConfig {
            command_timeout: self
                .command_timeout_ms
                .map(|v| span_millis("command_timeout_ms", v))
                .transpose()?
                .unwrap_or(d.recovery.command_timeout),
            reboot_failure_threshold: non_zero(
                "reboot_failure_threshold",
                self.reboot_failure_threshold
                    .unwrap_or(d.recovery.reboot_failure_threshold),
            )?,
            reboot_settle: self
                .reboot_settle_secs
                .map(|v| span_secs("reboot_settle_secs", v).map(to_chrono))
                .transpose()?
                .unwrap_or(d.recovery.reboot_settle),
            reboot_grace: self
                .reboot_grace_secs
                .map(|v| span_secs("reboot_grace_secs", v).map(to_chrono))
                .transpose()?
                .unwrap_or(d.recovery.reboot_grace),
        };
        non_zero_duration("command_timeout_ms", recovery.command_timeout)?;

        let drift_ratio = self.drift_ratio.unwrap_or(d.baseline.drift_ratio);
        if !(0.0..=1.0).contains(&drift_ratio) {
            return Err(ConfigError::FractionOutOfRange {
                key: "drift_ratio",
                value: drift_ratio,
            });
        }
        let baseline = BaselineConfig {
            window: non_zero(
                "baseline_window",
                self.baseline_window.unwrap_or(d.baseline.window),
            )?,
            min_samples: non_zero(
                "baseline_min_samples",
                self.baseline_min_samples.unwrap_or(d.baseline.min_samples),
            )?,
            drift_ratio,
        };

        let severity = self.severity;
        for (key, value) in [
            ("severity.latency", severity.latency),
            ("severity.bandwidth", severity.bandwidth),
            ("severity.obstruction", severity.obstruction),
            ("severity.signal", severity.signal),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive { key, value });
            }
        }

        let scenario = match self.scenario {
            Some(name) => name.parse()?,
            None => d.scenario,
        };
        // Validate the overrides against the selected preset up front.
        if !self.thresholds.is_empty() {
            let base = ThresholdProfile::for_scenario(scenario);
            self.thresholds.merge_onto(&base.thresholds)?;
        }

        let mut used = HashSet::new();
        let mut links = Vec::with_capacity(self.links.len());
        for link in self.links {
            let id = link.id.trim().to_string();
            if id.is_empty() {
                continue;
            }
            if !used.insert(id.clone()) {
                return Err(ConfigError::DuplicateLink(LinkId::from(id)));
            }
            let kind = match link.kind {
                Some(kind) => kind.parse()?,
                None => LinkKind::Other,
            };
            links.push(LinkConfig {
                id: LinkId::from(id),
                kind,
                priority: link.priority.unwrap_or(0),
            });
        }

        let history_retention = self
            .history_retention_secs
            .map(|v| span_secs("history_retention_secs", v))
            .transpose()?
            .unwrap_or(d.history_retention);

        Ok(MonitorConfig {
            version,
            poll_interval,
            probe_timeout,
            failover,
            issue_persistence_threshold: non_zero(
                "issue_persistence_threshold",
                self.issue_persistence_threshold
                    .unwrap_or(d.issue_persistence_threshold),
            )?,
            auto_recovery: self.auto_recovery.unwrap_or(d.auto_recovery),
            recovery,
            baseline,
            history_retention,
            history_max_samples: non_zero(
                "history_max_samples",
                self.history_max_samples.unwrap_or(d.history_max_samples),
            )?,
            scenario,
            thresholds: self.thresholds,
            severity,
            links,
        })
    }
}

impl MonitorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(MonitorConfig::default());
        }
        let parsed: MonitorConfigInput =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        parsed.resolve()
    }
}

/// Convert a wall-clock span for comparisons against `DateTime<Utc>`.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}

/// `at + d`, pinned to the latest representable instant on overflow.
pub(crate) fn saturating_add(at: DateTime<Utc>, d: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - d`, pinned to the earliest representable instant on overflow.
pub(crate) fn saturating_sub(at: DateTime<Utc>, d: chrono::Duration) -> DateTime<Utc> {
    at.checked_sub_signed(d).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn span_secs(key: &'static str, value: u64) -> Result<Duration, ConfigError> {
    at_most(key, value, MAX_SPAN_SECS).map(Duration::from_secs)
}

fn span_millis(key: &'static str, value: u64) -> Result<Duration, ConfigError> {
    at_most(key, value, MAX_SPAN_SECS * 1000).map(Duration::from_millis)
}

fn at_most(key: &'static str, value: u64, max: u64) -> Result<u64, ConfigError> {
    if value > max {
        Err(ConfigError::TooLarge { key, value, max })
    } else {
        Ok(value)
    }
}

fn non_zero<T: Default + PartialEq>(key: &'static str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        Err(ConfigError::Zero(key))
    } else {
        Ok(value)
    }
}

fn non_zero_duration(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::Zero(key))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_full() {
        let toml = r#"
            version = 1
            poll_interval_secs = 5
            probe_timeout_ms = 2000
            failover_threshold = 4
            failover_cooldown_secs = 120
            auto_recovery = false
            scenario = "medical"

            [thresholds]
            max_latency_ms = 180.0

            [severity]
            latency = 2.0

            [[links]]
            id = "starlink"
            kind = "primary-satellite"
            priority = 100

            [[links]]
            id = "lte"
            kind = "cellular"
            priority = 10
        "#;

        let cfg = MonitorConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.probe_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.failover.threshold, 4);
        assert_eq!(cfg.failover.cooldown, chrono::Duration::seconds(120));
        assert!((cfg.failover.hysteresis - 0.2).abs() < 1e-12);
        assert!(!cfg.auto_recovery);
        assert_eq!(cfg.scenario, Scenario::Medical);
        assert_eq!(cfg.thresholds.max_latency_ms, Some(180.0));
        assert_eq!(cfg.severity.latency, 2.0);
        assert_eq!(cfg.severity.obstruction, 2.0);
        assert_eq!(cfg.links.len(), 2);
        assert_eq!(cfg.links[0].kind, LinkKind::PrimarySatellite);
        assert_eq!(cfg.links[1].priority, 10);
    }

    #[test]
    fn empty_input_is_default() {
        let cfg = MonitorConfig::from_toml_str("   ").unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.issue_persistence_threshold, 3);
        assert_eq!(cfg.recovery.reboot_failure_threshold, 5);
        assert_eq!(cfg.baseline.min_samples, 10);
        assert!(cfg.links.is_empty());
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ("version = 2", ConfigError::UnsupportedVersion(2)),
            ("failover_threshold = 0", ConfigError::Zero("failover_threshold")),
            (
                "scenario = \"wartime\"",
                ConfigError::UnknownScenario("wartime".into()),
            ),
            (
                "[thresholds]\nmax_obstruction_fraction = 1.5",
                ConfigError::FractionOutOfRange {
                    key: "max_obstruction_fraction",
                    value: 1.5,
                },
            ),
            (
                "[thresholds]\nmin_downlink_mbps = -1.0",
                ConfigError::NonPositive {
                    key: "min_downlink_mbps",
                    value: -1.0,
                },
            ),
        ];
        for (toml, expected) in cases {
            assert_eq!(MonitorConfig::from_toml_str(toml).unwrap_err(), expected, "{toml}");
        }
    }

    #[test]
    fn rejects_spans_beyond_thirty_days() {
        for key in [
            "history_retention_secs",
            "failover_cooldown_secs",
            "reboot_settle_secs",
            "reboot_grace_secs",
            "poll_interval_secs",
        ] {
            let toml = format!("{key} = {}", i64::MAX);
            assert_eq!(
                MonitorConfig::from_toml_str(&toml).unwrap_err(),
                ConfigError::TooLarge {
                    key,
                    value: i64::MAX as u64,
                    max: MAX_SPAN_SECS,
                },
                "{toml}"
            );
        }

        let err = MonitorConfig::from_toml_str("command_timeout_ms = 9223372036854775807")
            .unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge { key: "command_timeout_ms", .. }));

        let cfg = MonitorConfig::from_toml_str("history_retention_secs = 2592000").unwrap();
        assert_eq!(cfg.history_retention, Duration::from_secs(MAX_SPAN_SECS));
    }

    #[test]
    fn saturating_arithmetic_pins_to_range() {
        let now = Utc::now();
        assert_eq!(saturating_sub(now, chrono::TimeDelta::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(saturating_add(now, chrono::TimeDelta::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            saturating_add(now, chrono::Duration::seconds(5)),
            now + chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn probe_timeout_must_fit_interval() {
        let err = MonitorConfig::from_toml_str("poll_interval_secs = 2\nprobe_timeout_ms = 3000")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ProbeTimeoutTooLong { .. }));
    }

    #[test]
    fn duplicate_links_rejected() {
        let toml = r#"
            [[links]]
            id = "a"
            [[links]]
            id = "a"
        "#;
        assert_eq!(
            MonitorConfig::from_toml_str(toml).unwrap_err(),
            ConfigError::DuplicateLink(LinkId::from("a"))
        );
    }

    #[test]
    fn unknown_threshold_key_is_a_parse_error() {
        let err = MonitorConfig::from_toml_str("[thresholds]\nmax_jitter_ms = 5.0").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
