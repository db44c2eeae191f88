//! Agent configuration.
//!
//! The agent reads the same site file as the monitor. Top-level monitor keys
//! and `[[links]]` are resolved by [`uplink_core::MonitorConfig`]; this module
//! only looks at the `[telemetry]`, `[commands]` and `[portal]` tables.
//!
//! ```toml
//! [telemetry]
//! listen_addr = "127.0.0.1:9100"
//! stale_after_ms = 15000
//!
//! [commands]
//! reconnect = "starlinkctl reconnect {link}"
//! reboot = "starlinkctl reboot {link}"
//!
//! [portal]
//! listen_addr = "0.0.0.0:3001"
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_TELEMETRY_ADDR: &str = "127.0.0.1:9100";
pub const DEFAULT_PORTAL_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_STALE_AFTER_MS: u64 = 15_000;

#[derive(Debug, Error)]
pub enum AgentConfigError {
    #[error("failed to parse agent config: {0}")]
    Parse(String),
    #[error("{key} is not a socket address: {value:?}")]
    Address { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("commands.{0} is empty")]
    EmptyCommand(&'static str),
}

// ─── Input (TOML) ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfigInput {
    pub telemetry: TelemetryInput,
    pub commands: CommandsInput,
    pub portal: PortalInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryInput {
    pub listen_addr: Option<String>,
    pub stale_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsInput {
    pub reconnect: Option<String>,
    pub reboot: Option<String>,
    pub stow: Option<String>,
    pub unstow: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortalInput {
    pub enabled: Option<bool>,
    pub listen_addr: Option<String>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub listen_addr: SocketAddr,
    /// A relayed snapshot older than this no longer answers a probe.
    pub stale_after: Duration,
}

/// Shell command templates. `{link}` is replaced by the quoted link id.
/// A missing template makes that action report failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandTemplates {
    pub reconnect: Option<String>,
    pub reboot: Option<String>,
    pub stow: Option<String>,
    pub unstow: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub telemetry: TelemetryConfig,
    pub commands: CommandTemplates,
    /// `None` when the portal is disabled.
    pub portal_addr: Option<SocketAddr>,
}

impl AgentConfigInput {
    pub fn resolve(self) -> Result<AgentConfig, AgentConfigError> {
        let listen_addr = parse_addr(
            "telemetry.listen_addr",
            self.telemetry.listen_addr.as_deref(),
            DEFAULT_TELEMETRY_ADDR,
        )?;
        let stale_after_ms = self
            .telemetry
            .stale_after_ms
            .unwrap_or(DEFAULT_STALE_AFTER_MS);
        if stale_after_ms == 0 {
            return Err(AgentConfigError::Zero("telemetry.stale_after_ms"));
        }

        let commands = CommandTemplates {
            reconnect: template("reconnect", self.commands.reconnect)?,
            reboot: template("reboot", self.commands.reboot)?,
            stow: template("stow", self.commands.stow)?,
            unstow: template("unstow", self.commands.unstow)?,
        };

        let portal_addr = if self.portal.enabled.unwrap_or(true) {
            Some(parse_addr(
                "portal.listen_addr",
                self.portal.listen_addr.as_deref(),
                DEFAULT_PORTAL_ADDR,
            )?)
        } else {
            None
        };

        Ok(AgentConfig {
            telemetry: TelemetryConfig {
                listen_addr,
                stale_after: Duration::from_millis(stale_after_ms),
            },
            commands,
            portal_addr,
        })
    }
}

impl AgentConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, AgentConfigError> {
        let parsed: AgentConfigInput =
            toml::from_str(input).map_err(|e| AgentConfigError::Parse(e.to_string()))?;
        parsed.resolve()
    }
}

fn parse_addr(
    key: &'static str,
    value: Option<&str>,
    default: &str,
) -> Result<SocketAddr, AgentConfigError> {
    let raw = value.unwrap_or(default);
    raw.trim().parse().map_err(|_| AgentConfigError::Address {
        key,
        value: raw.to_string(),
    })
}

fn template(key: &'static str, value: Option<String>) -> Result<Option<String>, AgentConfigError> {
    match value {
        Some(t) if t.trim().is_empty() => Err(AgentConfigError::EmptyCommand(key)),
        other => Ok(other),
    }
}
