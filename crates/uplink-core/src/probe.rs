//! Health probe contract.
//!
//! The telemetry acquisition mechanism is external. The core only requires
//! that a probe resolves to a [`MetricsSnapshot`] or a [`ProbeError`]; the
//! coordinator enforces the timeout so a hung probe surfaces as
//! [`ProbeError::Timeout`] instead of stalling the tick.

use std::future::Future;
use std::time::Duration;

use crate::error::ProbeError;
use crate::metrics::MetricsSnapshot;
use crate::registry::LinkId;

/// Source of per-link telemetry.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe(
        &self,
        link: &LinkId,
    ) -> impl Future<Output = Result<MetricsSnapshot, ProbeError>> + Send;
}

/// Run one probe bounded by `timeout`, validating the snapshot it returns.
pub async fn probe_with_timeout<P: HealthProbe>(
    probe: &P,
    link: &LinkId,
    timeout: Duration,
) -> Result<MetricsSnapshot, ProbeError> {
    let snapshot = match tokio::time::timeout(timeout, probe.probe(link)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProbeError::Timeout {
                link: link.clone(),
                after: timeout,
            });
        }
    };
    snapshot.validate().map_err(|reason| ProbeError::Malformed {
        link: link.clone(),
        reason,
    })?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct SlowProbe;

    impl HealthProbe for SlowProbe {
        async fn probe(&self, _link: &LinkId) -> Result<MetricsSnapshot, ProbeError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(MetricsSnapshot::new(40.0, 100.0, 10.0, 0.0, 9.0, 0.0, Utc::now()))
        }
    }

    struct BadProbe;

    impl HealthProbe for BadProbe {
        async fn probe(&self, _link: &LinkId) -> Result<MetricsSnapshot, ProbeError> {
            Ok(MetricsSnapshot::new(40.0, 100.0, 10.0, 250.0, 9.0, 0.0, Utc::now()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out() {
        let link = LinkId::from("a");
        let err = probe_with_timeout(&SlowProbe, &link, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn invalid_snapshot_is_malformed() {
        let link = LinkId::from("a");
        let err = probe_with_timeout(&BadProbe, &link, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Malformed { .. }));
    }
}
