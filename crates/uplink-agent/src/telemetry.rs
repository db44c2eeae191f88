//! Telemetry relay: receives terminal metrics over UDP and answers probes.
//!
//! A local poller (dish gRPC bridge, modem scraper, ...) pushes one JSON
//! datagram per link, or a batch:
//!
//! ```json
//! {"link": "starlink", "metrics": {"latency_ms": 41.0, ...}}
//! {"links": [{"link": "starlink", "metrics": {...}}, {"link": "lte", "metrics": {...}}]}
//! ```
//!
//! The relay keeps the latest payload per link. A probe answers with that
//! payload while it is younger than `stale_after`; malformed metrics are kept
//! too, so the next probe of that link fails instead of silently reusing an
//! older snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use uplink_core::{HealthProbe, LinkId, MetricsSnapshot, ProbeError};

struct Relayed {
    received_at: Instant,
    payload: Result<MetricsSnapshot, ProbeError>,
}

pub struct TelemetryRelay {
    stale_after: Duration,
    latest: RwLock<HashMap<LinkId, Relayed>>,
}

impl TelemetryRelay {
    pub fn new(stale_after: Duration) -> Self {
        TelemetryRelay {
            stale_after,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Store every link payload found in one datagram. Returns how many
    /// links were updated.
    pub async fn ingest(&self, data: &[u8]) -> usize {
        let entries = match parse_relay(data) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unparseable telemetry datagram");
                return 0;
            }
        };
        let now = Instant::now();
        let mut latest = self.latest.write().await;
        let count = entries.len();
        for (link, payload) in entries {
            if let Err(e) = &payload {
                tracing::warn!(link = %link, error = %e, "malformed telemetry");
            }
            latest.insert(
                link,
                Relayed {
                    received_at: now,
                    payload,
                },
            );
        }
        count
    }
}

impl HealthProbe for TelemetryRelay {
    async fn probe(&self, link: &LinkId) -> Result<MetricsSnapshot, ProbeError> {
        let latest = self.latest.read().await;
        let Some(entry) = latest.get(link) else {
            return Err(ProbeError::Unavailable {
                link: link.clone(),
                reason: "no telemetry received".into(),
            });
        };
        let age = entry.received_at.elapsed();
        if age > self.stale_after {
            return Err(ProbeError::Unavailable {
                link: link.clone(),
                reason: format!("telemetry stale for {}s", age.as_secs()),
            });
        }
        entry.payload.clone()
    }
}

/// Listen for relay datagrams until `shutdown` flips to true.
pub async fn run(
    relay: Arc<TelemetryRelay>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let socket = tokio::net::UdpSocket::bind(addr).await?;
    tracing::info!(%addr, "telemetry UDP listener bound");

    let mut recv_buf = [0u8; 8192];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut recv_buf) => {
                match received {
                    Ok((n, peer)) => {
                        let links = relay.ingest(&recv_buf[..n]).await;
                        tracing::trace!(%peer, bytes = n, links, "telemetry datagram");
                    }
                    Err(e) => tracing::warn!(error = %e, "telemetry recv failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("telemetry listener stopped");
    Ok(())
}

type Entry = (LinkId, Result<MetricsSnapshot, ProbeError>);

/// Split a datagram into per-link payloads.
///
/// The envelope itself must be valid JSON naming each link; only then can a
/// bad `metrics` object be pinned on the link it belongs to.
fn parse_relay(data: &[u8]) -> Result<Vec<Entry>, String> {
    let v: serde_json::Value = serde_json::from_slice(data).map_err(|e| e.to_string())?;
    match v.get("links") {
        Some(serde_json::Value::Array(items)) => items.iter().map(parse_entry).collect(),
        Some(_) => Err("`links` must be an array".into()),
        None => parse_entry(&v).map(|e| vec![e]),
    }
}

fn parse_entry(v: &serde_json::Value) -> Result<Entry, String> {
    let link = v
        .get("link")
        .and_then(|l| l.as_str())
        .filter(|l| !l.is_empty())
        .map(LinkId::from)
        .ok_or("missing `link`")?;
    let payload = match v.get("metrics") {
        Some(metrics) => MetricsSnapshot::deserialize(metrics)
            .map_err(|e| e.to_string())
            .and_then(|m| m.validate().map(|()| m)),
        None => Err("missing `metrics`".to_string()),
    }
    .map_err(|reason| ProbeError::Malformed {
        link: link.clone(),
        reason,
    });
    Ok((link, payload))
}
