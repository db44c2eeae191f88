//! Error kinds surfaced by the monitoring core.
//!
//! Only [`ConfigError`] and [`StartupError`] ever reach a caller as a hard
//! failure. Probe and recovery errors are contained inside a tick and reduce
//! to state updates, issues and events.

use std::time::Duration;

use thiserror::Error;

use crate::registry::LinkId;

// ── Configuration ───────────────────────────────────────────────────

/// A configuration value was rejected. Nothing is clamped silently.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("threshold `{key}` must be positive, got {value}")]
    NonPositive { key: &'static str, value: f64 },
    #[error("threshold `{key}` must be within [0, 1], got {value}")]
    FractionOutOfRange { key: &'static str, value: f64 },
    #[error("threshold `{key}` must be finite and non-negative, got {value}")]
    Negative { key: &'static str, value: f64 },
    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),
    #[error("unknown link kind `{0}`")]
    UnknownLinkKind(String),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("`{key}` must be at most {max}, got {value}")]
    TooLarge {
        key: &'static str,
        value: u64,
        max: u64,
    },
    #[error("probe timeout ({timeout:?}) must not exceed the poll interval ({interval:?})")]
    ProbeTimeoutTooLong {
        timeout: Duration,
        interval: Duration,
    },
    #[error("duplicate link id `{0}`")]
    DuplicateLink(LinkId),
    #[error("invalid config TOML: {0}")]
    Parse(String),
}

// ── Probing ─────────────────────────────────────────────────────────

/// A health probe did not produce a usable snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("probe of {link} timed out after {after:?}")]
    Timeout { link: LinkId, after: Duration },
    #[error("probe of {link} unavailable: {reason}")]
    Unavailable { link: LinkId, reason: String },
    #[error("probe of {link} returned malformed metrics: {reason}")]
    Malformed { link: LinkId, reason: String },
}

// ── Recovery ────────────────────────────────────────────────────────

/// A recovery action did not complete. The issue stays active.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryError {
    #[error("a recovery action is already running for {0}")]
    InProgress(LinkId),
    #[error("reboot of {link} suppressed, cooldown has {remaining:?} left")]
    CooldownActive { link: LinkId, remaining: Duration },
    #[error("{action} on {link} reported failure")]
    CommandFailed { link: LinkId, action: &'static str },
    #[error("{action} on {link} timed out")]
    CommandTimeout { link: LinkId, action: &'static str },
    #[error("no failover candidate qualifies")]
    NoCandidate,
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
}

// ── Startup ─────────────────────────────────────────────────────────

/// The coordinator refused to start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no links registered")]
    EmptyRegistry,
}
