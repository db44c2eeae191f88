//! Site portal: local HTTP API over the coordinator.
//!
//! - `GET  /api/status`: monitor status snapshot
//! - `GET  /api/report?window_secs=N`: full export report
//! - `GET  /api/performance?window_secs=N`: windowed performance summary
//! - `GET  /api/drift`: drift alerts
//! - `POST /api/scenario`: switch scenario and/or apply threshold overrides
//! - `POST /api/failover`: manual failover
//! - `POST /api/links/{id}/reboot|stow|unstow`: device actions
//! - `POST /api/auto-recovery`, `/api/baseline/reset`,
//!   `/api/drift/{index}/ack`, `/api/drift/clear`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::watch;

use uplink_core::config::MAX_SPAN_SECS;
use uplink_core::thresholds::{Scenario, ThresholdOverrides};
use uplink_core::{Coordinator, HealthProbe, LinkId, RecoveryCommands, RecoveryError};

type ApiError = (StatusCode, Json<serde_json::Value>);
type Shared<P, C> = State<Arc<Coordinator<P, C>>>;

const DEFAULT_WINDOW_SECS: u64 = 3600;

pub fn router<P: HealthProbe, C: RecoveryCommands>(monitor: Arc<Coordinator<P, C>>) -> Router {
    Router::new()
        .route("/api/status", get(api_status::<P, C>))
        .route("/api/report", get(api_report::<P, C>))
        .route("/api/performance", get(api_performance::<P, C>))
        .route("/api/drift", get(api_drift::<P, C>))
        .route("/api/drift/{index}/ack", post(api_drift_ack::<P, C>))
        .route("/api/drift/clear", post(api_drift_clear::<P, C>))
        .route("/api/scenario", post(api_scenario::<P, C>))
        .route("/api/failover", post(api_failover::<P, C>))
        .route("/api/links/{id}/{action}", post(api_link_action::<P, C>))
        .route("/api/auto-recovery", post(api_auto_recovery::<P, C>))
        .route("/api/baseline/reset", post(api_baseline_reset::<P, C>))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(monitor)
}

/// Serve the portal until `shutdown` flips to true.
pub async fn run<P: HealthProbe, C: RecoveryCommands>(
    monitor: Arc<Coordinator<P, C>>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(monitor);
    tracing::info!("site portal on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

fn error(status: StatusCode, message: impl ToString) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.to_string() })))
}

fn recovery_error(e: RecoveryError) -> ApiError {
    let status = match &e {
        RecoveryError::UnknownLink(_) => StatusCode::NOT_FOUND,
        RecoveryError::InProgress(_)
        | RecoveryError::CooldownActive { .. }
        | RecoveryError::NoCandidate => StatusCode::CONFLICT,
        RecoveryError::CommandFailed { .. } | RecoveryError::CommandTimeout { .. } => {
            StatusCode::BAD_GATEWAY
        }
    };
    error(status, e)
}

#[derive(Debug, Default, Deserialize)]
struct WindowQuery {
    window_secs: Option<u64>,
}

impl WindowQuery {
    /// Requested window, at most the longest configurable retention.
    fn window(&self) -> Result<Duration, ApiError> {
        match self.window_secs.unwrap_or(DEFAULT_WINDOW_SECS) {
            0 => Err(error(StatusCode::BAD_REQUEST, "window_secs must be positive")),
            secs if secs > MAX_SPAN_SECS => Err(error(
                StatusCode::BAD_REQUEST,
                format!("window_secs must be at most {MAX_SPAN_SECS}"),
            )),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}

// ── GET /api/status ─────────────────────────────────────────────────

async fn api_status<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
) -> Json<uplink_core::MonitorStatus> {
    Json(monitor.status().await)
}

// ── GET /api/report ─────────────────────────────────────────────────

async fn api_report<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<uplink_core::report::ExportReport>, ApiError> {
    let window = query.window()?;
    Ok(Json(monitor.export_report(window, Utc::now()).await))
}

// ── GET /api/performance ────────────────────────────────────────────

async fn api_performance<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<uplink_core::history::PerformanceReport>, ApiError> {
    let window = query.window()?;
    Ok(Json(monitor.performance_report(window, Utc::now()).await))
}

// ── Drift alerts ────────────────────────────────────────────────────

async fn api_drift<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
) -> Json<Vec<uplink_core::baseline::DriftAlert>> {
    Json(monitor.drift_alerts().await)
}

async fn api_drift_ack<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Path(index): Path<usize>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if monitor.acknowledge_drift(index).await {
        Ok(Json(serde_json::json!({ "acknowledged": index })))
    } else {
        Err(error(StatusCode::NOT_FOUND, format!("no drift alert at {index}")))
    }
}

async fn api_drift_clear<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
) -> Json<serde_json::Value> {
    let cleared = monitor.clear_acknowledged_drift().await;
    Json(serde_json::json!({ "cleared": cleared }))
}

// ── POST /api/scenario ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioRequest {
    scenario: Option<Scenario>,
    #[serde(default)]
    thresholds: ThresholdOverrides,
}

async fn api_scenario<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Json(body): Json<ScenarioRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.scenario.is_none() && body.thresholds.is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "expected `scenario` and/or `thresholds`",
        ));
    }
    // Validate the overrides before switching so a bad request changes nothing.
    if !body.thresholds.is_empty() {
        let base = match body.scenario {
            Some(s) => uplink_core::thresholds::Thresholds::preset(s)
                .unwrap_or(monitor.profile().thresholds),
            None => monitor.profile().thresholds,
        };
        body.thresholds
            .merge_onto(&base)
            .map_err(|e| error(StatusCode::BAD_REQUEST, e))?;
    }

    let mut profile = monitor.profile();
    if let Some(scenario) = body.scenario {
        profile = monitor.set_scenario(scenario);
    }
    if !body.thresholds.is_empty() {
        profile = monitor
            .apply_overrides(&body.thresholds)
            .map_err(|e| error(StatusCode::BAD_REQUEST, e))?;
    }
    tracing::info!(scenario = %profile.scenario, "scenario updated via portal");
    Ok(Json(serde_json::json!({
        "scenario": profile.scenario,
        "thresholds": profile.thresholds,
    })))
}

// ── POST /api/failover ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FailoverRequest {
    link: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn api_failover<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Json(body): Json<FailoverRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let link = LinkId::from(body.link);
    let reason = body.reason.as_deref().unwrap_or("operator request");
    let event = monitor
        .manual_failover(&link, reason)
        .await
        .map_err(recovery_error)?;
    Ok(Json(serde_json::json!({
        "active_link": link,
        "switched": event.is_some(),
        "failover": event,
    })))
}

// ── POST /api/links/{id}/{action} ───────────────────────────────────

async fn api_link_action<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let link = LinkId::from(id);
    match action.as_str() {
        "reboot" => {
            let settle_until = monitor.reboot_link(&link).await.map_err(recovery_error)?;
            Ok(Json(serde_json::json!({
                "link": link,
                "action": "reboot",
                "settle_until": settle_until,
            })))
        }
        "stow" => {
            monitor.stow_link(&link).await.map_err(recovery_error)?;
            Ok(Json(serde_json::json!({ "link": link, "action": "stow" })))
        }
        "unstow" => {
            monitor.unstow_link(&link).await.map_err(recovery_error)?;
            Ok(Json(serde_json::json!({ "link": link, "action": "unstow" })))
        }
        other => Err(error(
            StatusCode::NOT_FOUND,
            format!("unknown link action {other:?}"),
        )),
    }
}

// ── POST /api/auto-recovery ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AutoRecoveryRequest {
    enabled: bool,
}

async fn api_auto_recovery<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
    Json(body): Json<AutoRecoveryRequest>,
) -> Json<serde_json::Value> {
    monitor.set_auto_recovery(body.enabled).await;
    Json(serde_json::json!({ "auto_recovery": body.enabled }))
}

// ── POST /api/baseline/reset ────────────────────────────────────────

async fn api_baseline_reset<P: HealthProbe, C: RecoveryCommands>(
    State(monitor): Shared<P, C>,
) -> Json<serde_json::Value> {
    monitor.reset_baseline().await;
    tracing::info!("baselines reset via portal");
    Json(serde_json::json!({ "status": "reset" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use uplink_core::registry::LinkConfig;
    use uplink_core::{LinkKind, MetricsSnapshot, MonitorConfig, ProbeError};

    // ─── Helpers ────────────────────────────────────────────────────────

    struct Healthy;

    impl HealthProbe for Healthy {
        async fn probe(&self, _link: &LinkId) -> Result<MetricsSnapshot, ProbeError> {
            Ok(MetricsSnapshot::new(40.0, 150.0, 15.0, 0.0, 9.0, 0.01, Utc::now()))
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

    fn monitor() -> Arc<Coordinator<Healthy, Succeeds>> {
        let config = MonitorConfig {
            links: vec![
                LinkConfig {
                    id: LinkId::from("starlink"),
                    kind: LinkKind::PrimarySatellite,
                    priority: 100,
                },
                LinkConfig {
                    id: LinkId::from("lte"),
                    kind: LinkKind::Cellular,
                    priority: 10,
                },
            ],
            ..MonitorConfig::default()
        };
        Arc::new(Coordinator::new(config, Arc::new(Healthy), Arc::new(Succeeds)).unwrap())
    }

    async fn call(
        monitor: &Arc<Coordinator<Healthy, Succeeds>>,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(monitor.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn status_before_and_after_tick() {
        let monitor = monitor();
        let (status, body) = call(&monitor, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "failed");
        assert_eq!(body["links"].as_array().unwrap().len(), 2);

        monitor.tick(Utc::now()).await;
        let (_, body) = call(&monitor, "GET", "/api/status", None).await;
        assert_eq!(body["state"], "primary");
        assert_eq!(body["active_link"], "starlink");
    }

    #[tokio::test]
    async fn report_uses_requested_window() {
        let monitor = monitor();
        let (status, body) = call(&monitor, "GET", "/api/report?window_secs=600", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["window_secs"], 600);
        assert_eq!(body["summary"]["status"], "no_data");
    }

    #[tokio::test]
    async fn out_of_range_window_is_rejected() {
        let monitor = monitor();
        // The first tick connects; the second records a sample.
        monitor.tick(Utc::now()).await;
        monitor.tick(Utc::now()).await;

        for uri in [
            "/api/performance?window_secs=18446744073709551615",
            "/api/report?window_secs=18446744073709551615",
            "/api/performance?window_secs=0",
        ] {
            let (status, body) = call(&monitor, "GET", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].as_str().unwrap().contains("window_secs"));
        }

        let uri = format!("/api/performance?window_secs={MAX_SPAN_SECS}");
        let (status, body) = call(&monitor, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "summary");
        assert_eq!(body["sample_count"], 1);
    }

    // ─── Operator actions ───────────────────────────────────────────────

    #[tokio::test]
    async fn manual_failover_and_unknown_link() {
        let monitor = monitor();
        monitor.tick(Utc::now()).await;

        let (status, body) = call(
            &monitor,
            "POST",
            "/api/failover",
            Some(serde_json::json!({ "link": "lte", "reason": "maintenance" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["switched"], true);
        assert_eq!(body["failover"]["reason"], "manual: maintenance");

        let (status, _) = call(
            &monitor,
            "POST",
            "/api/failover",
            Some(serde_json::json!({ "link": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn second_reboot_hits_cooldown() {
        let monitor = monitor();
        let (status, _) = call(&monitor, "POST", "/api/links/lte/reboot", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&monitor, "POST", "/api/links/lte/reboot", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("cooldown"));

        let (status, _) = call(&monitor, "POST", "/api/links/lte/explode", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_overrides_change_nothing() {
        let monitor = monitor();
        let (status, _) = call(
            &monitor,
            "POST",
            "/api/scenario",
            Some(serde_json::json!({
                "scenario": "medical",
                "thresholds": { "max_obstruction_fraction": 1.5 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(monitor.profile().scenario, Scenario::Normal);

        let (status, body) = call(
            &monitor,
            "POST",
            "/api/scenario",
            Some(serde_json::json!({ "scenario": "medical" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["thresholds"]["max_latency_ms"], 150.0);
    }

    #[tokio::test]
    async fn drift_ack_out_of_range() {
        let monitor = monitor();
        let (status, _) = call(&monitor, "POST", "/api/drift/0/ack", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = call(&monitor, "POST", "/api/drift/clear", None).await;
        assert_eq!(body["cleared"], 0);
    }
}
