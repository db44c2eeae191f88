//! # Uplink Core
//!
//! Keeps a site online across redundant satellite/cellular uplinks.
//!
//! - **Registry**: candidate links, their priority and mutable health state
//! - **Scoring**: fixed-weight health score in [0, 1] per metrics snapshot
//! - **Thresholds**: scenario profiles (normal, medical, disaster, ...),
//!   swapped atomically
//! - **Failover**: PRIMARY/DEGRADED/BACKUP/FAILED state machine with
//!   hysteresis and a cooldown window
//! - **Issues**: deduplicated, escalating issue tracking with a persistence
//!   threshold that triggers recovery exactly once per crossing
//! - **Recovery**: static issue-kind → action table, per-link guards and a
//!   reboot cooldown
//! - **Baseline / History**: rolling percentile baselines with drift alerts,
//!   and a time-bounded sample series for reporting and export
//! - **Coordinator**: the tick loop tying it all together

pub mod baseline;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod failover;
pub mod history;
pub mod issues;
pub mod metrics;
pub mod probe;
pub mod recovery;
pub mod registry;
pub mod report;
pub mod scoring;
pub mod thresholds;

pub use config::MonitorConfig;
pub use coordinator::{Coordinator, MonitorStatus};
pub use error::{ConfigError, ProbeError, RecoveryError, StartupError};
pub use metrics::MetricsSnapshot;
pub use probe::HealthProbe;
pub use recovery::RecoveryCommands;
pub use registry::{LinkId, LinkKind};
