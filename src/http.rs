use crate::metrics::Metrics;
use crate::state::StateStore;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{debug, info};

const COMMAND_FIELD: &str = "actuator_commanded_on";
// legacy field name accepted by `/set_fan`
const LEGACY_COMMAND_FIELD: &str = "manual_state";

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

#[derive(Debug, Clone)]
pub struct DashboardInfo {
    pub label: String,
    pub threshold_celsius: f64,
    pub poll_interval_ms: u64,
}

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub store: Arc<StateStore>,
    pub dashboard: Arc<DashboardInfo>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CommandAck {
    pub ok: bool,
    pub actuator_commanded_on: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandError {
    pub error: &'static str,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    store: Arc<StateStore>,
    dashboard: DashboardInfo,
) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/status", get(status_handler))
        .route("/api/actuator", post(command_handler))
        .route("/set_fan", post(command_handler))
        .with_state(HttpAppState {
            metrics,
            store,
            dashboard: Arc::new(dashboard),
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    // Gauges are refreshed from the store on every scrape, never from a
    // snapshot that may already be stale.
    state.metrics.update_from_snapshot(&state.store.read().await);
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(state.store.read().await)
}

async fn dashboard_handler(State(state): State<HttpAppState>) -> Html<String> {
    Html(render_dashboard(&state.dashboard))
}

// The body is parsed whatever the Content-Type says.
async fn command_handler(State(state): State<HttpAppState>, body: Bytes) -> Response {
    let requested = match parse_command(&body) {
        Ok(on) => on,
        Err(error) => {
            state.metrics.inc_command("rejected");
            debug!(error, "actuator command rejected");
            return (StatusCode::BAD_REQUEST, Json(CommandError { error })).into_response();
        }
    };

    let snapshot = state.store.set_commanded(requested).await;
    state.metrics.inc_command("accepted");
    info!(
        commanded = snapshot.actuator_commanded_on,
        effective = snapshot.actuator_effective_on,
        "actuator command applied"
    );

    Json(CommandAck {
        ok: true,
        actuator_commanded_on: snapshot.actuator_commanded_on,
    })
    .into_response()
}

fn parse_command(body: &[u8]) -> Result<bool, &'static str> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| "request body must be a JSON object")?;
    let fields = value
        .as_object()
        .ok_or("request body must be a JSON object")?;
    let field = fields
        .get(COMMAND_FIELD)
        .or_else(|| fields.get(LEGACY_COMMAND_FIELD))
        .ok_or("actuator_commanded_on required")?;
    field
        .as_bool()
        .ok_or("actuator_commanded_on must be a boolean")
}

fn render_dashboard(info: &DashboardInfo) -> String {
    DASHBOARD_HTML
        .replace("{{label}}", &escape_html(&info.label))
        .replace("{{threshold}}", &format!("{:.1}", info.threshold_celsius))
        .replace("{{poll_ms}}", &info.poll_interval_ms.to_string())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::RecordingPin;
    use crate::state::{HostReading, SystemSnapshot};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<StateStore>, RecordingPin, Arc<Metrics>) {
        let metrics = Metrics::new(55.0).expect("инициализация метрик");
        let pin = RecordingPin::default();
        let store = Arc::new(StateStore::new(Box::new(pin.clone())));
        let router = build_router(
            metrics.clone(),
            store.clone(),
            DashboardInfo {
                label: "FAN".to_string(),
                threshold_celsius: 55.0,
                poll_interval_ms: 2000,
            },
        );
        (router, store, pin, metrics)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (app, _, _, _) = app();
        let (status, body) = send(&app, get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn metrics_contains_uptime() {
        let (app, _, _, _) = app();
        let (status, body) = send(&app, get_req("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("pimon_uptime_seconds"));
        assert!(body.contains("pimon_scrape_count_total 1"));
    }

    #[tokio::test]
    async fn status_exposes_snapshot_fields() {
        let (app, _, _, _) = app();
        let (status, body) = send(&app, get_req("/api/status")).await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        let fields = value.as_object().unwrap();
        let mut keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "actuator_commanded_on",
                "actuator_effective_on",
                "actuator_forced_on",
                "cpu_load_percent",
                "cpu_temperature_celsius",
                "disk_total_bytes",
                "disk_used_bytes",
                "memory_total_bytes",
                "memory_used_bytes",
            ]
        );
        assert!(fields["cpu_temperature_celsius"].is_null());
        assert_eq!(fields["actuator_effective_on"], false);
    }

    #[tokio::test]
    async fn status_reports_numbers_natively() {
        let (app, store, _, _) = app();
        store
            .apply_sample(
                HostReading {
                    cpu_load_percent: 7.5,
                    cpu_temperature_celsius: Some(61.0),
                    memory_used_bytes: 100,
                    memory_total_bytes: 400,
                    disk_used_bytes: 1,
                    disk_total_bytes: 2,
                },
                true,
            )
            .await;

        let (_, body) = send(&app, get_req("/status")).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["cpu_temperature_celsius"], 61.0);
        assert_eq!(value["memory_total_bytes"], 400);
        assert_eq!(value["actuator_forced_on"], true);
    }

    #[tokio::test]
    async fn command_round_trips_through_status() {
        let (app, _, pin, _) = app();
        let (status, body) = send(
            &app,
            post_req("/api/actuator", r#"{"actuator_commanded_on": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true,"actuator_commanded_on":true}"#);
        assert_eq!(pin.last(), Some(true));

        let (_, body) = send(&app, get_req("/api/status")).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["actuator_commanded_on"], true);
        assert_eq!(value["actuator_effective_on"], true);
    }

    #[tokio::test]
    async fn repeated_command_gives_same_ack() {
        let (app, store, _, _) = app();
        let body = r#"{"actuator_commanded_on": false}"#;
        let first = send(&app, post_req("/api/actuator", body)).await;
        let snap_after_first = store.read().await;
        let second = send(&app, post_req("/api/actuator", body)).await;
        assert_eq!(first, second);
        assert_eq!(store.read().await, snap_after_first);
    }

    #[tokio::test]
    async fn missing_field_is_rejected_without_mutation() {
        let (app, store, pin, metrics) = app();
        store.set_commanded(true).await;
        let before = store.read().await;
        let writes_before = pin.writes().len();

        for body in [r#"{}"#, r#"{"state": false}"#, "", "not json", "[true]"] {
            let (status, text) = send(&app, post_req("/api/actuator", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
            assert!(text.contains("\"error\""));
        }

        assert_eq!(store.read().await, before);
        assert_eq!(pin.writes().len(), writes_before);
        assert_eq!(
            metrics
                .pimon_commands_total
                .with_label_values(&["rejected"])
                .get(),
            5.0
        );
    }

    #[tokio::test]
    async fn non_boolean_value_is_rejected() {
        let (app, store, _, _) = app();
        let (status, text) = send(
            &app,
            post_req("/api/actuator", r#"{"actuator_commanded_on": "yes"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("must be a boolean"));
        assert_eq!(store.read().await, SystemSnapshot::default());
    }

    #[tokio::test]
    async fn legacy_route_accepts_manual_state() {
        let (app, store, _, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/set_fan")
            .body(Body::from(r#"{"manual_state": true}"#))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.read().await.actuator_commanded_on);
    }

    #[tokio::test]
    async fn command_while_forced_keeps_actuator_on() {
        let (app, store, pin, _) = app();
        store
            .apply_sample(
                HostReading {
                    cpu_temperature_celsius: Some(70.0),
                    ..HostReading::default()
                },
                true,
            )
            .await;

        let (status, body) = send(
            &app,
            post_req("/api/actuator", r#"{"actuator_commanded_on": false}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"actuator_commanded_on\":false"));
        assert!(store.read().await.actuator_effective_on);
        assert_eq!(pin.last(), Some(true));
    }

    #[tokio::test]
    async fn dashboard_embeds_settings() {
        let (app, _, _, _) = app();
        let (status, body) = send(&app, get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("55.0"));
        assert!(body.contains("2000"));
        assert!(!body.contains("{{"));
    }

    #[tokio::test]
    async fn dashboard_escapes_label() {
        let metrics = Metrics::new(55.0).expect("инициализация метрик");
        let store = Arc::new(StateStore::new(Box::new(RecordingPin::default())));
        let app = build_router(
            metrics,
            store,
            DashboardInfo {
                label: "<script>alert(1)</script> & co".to_string(),
                threshold_celsius: 55.0,
                poll_interval_ms: 2000,
            },
        );
        let (status, body) = send(&app, get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("<script>alert(1)"));
        assert!(body.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; co"));
    }

    #[tokio::test]
    async fn scrape_reflects_latest_store_state() {
        let (app, store, _, _) = app();
        let (status, _) = send(
            &app,
            post_req("/api/actuator", r#"{"actuator_commanded_on": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // a sampler cycle lands after the command
        store
            .apply_sample(
                HostReading {
                    cpu_load_percent: 42.0,
                    cpu_temperature_celsius: Some(70.0),
                    ..HostReading::default()
                },
                true,
            )
            .await;

        let (_, body) = send(&app, get_req("/metrics")).await;
        assert!(body.contains("pimon_cpu_load_percent 42"));
        assert!(body.contains("pimon_actuator_forced_on 1"));
        assert!(body.contains("pimon_actuator_commanded_on 1"));
        assert!(body.contains("pimon_actuator_effective_on 1"));
    }
}
