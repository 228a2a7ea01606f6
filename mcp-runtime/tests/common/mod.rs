//! In-process stand-in for the OpsRamp API.
//!
//! Serves the OAuth and MetricsQL endpoints, rejects range queries with more
//! points than `point_limit` with 406, and records every request it sees.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opsramp_core::config::{AppConfig, PlatformConfig, TenantConfig};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    pub fn step(&self) -> u64 {
        self.param("step").and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    pub fn window(&self) -> (u64, u64) {
        let parse = |key: &str| self.param(key).and_then(|s| s.parse().ok()).unwrap_or(0);
        (parse("start"), parse("end"))
    }
}

#[derive(Debug, Clone)]
pub struct Behavior {
    /// Largest `(end - start) / step` answered without a 406.
    pub point_limit: u64,
    /// Answer every MetricsQL query with this status instead.
    pub metrics_status: Option<u16>,
    pub token_status: u16,
    /// Replaces the default `{access_token: "tok-N", expires_in: "3600"}` body.
    pub token_body: Option<Value>,
    /// Status and text/plain body for the v2 metric endpoint.
    pub metric_text_error: Option<(u16, &'static str)>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            point_limit: u64::MAX,
            metrics_status: None,
            token_status: 200,
            token_body: None,
            metric_text_error: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    behavior: Behavior,
    token_forms: Vec<HashMap<String, String>>,
    calls: Vec<RecordedCall>,
}

#[derive(Clone, Default)]
pub struct FakeUpstream {
    inner: Arc<Mutex<Inner>>,
}

impl FakeUpstream {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                behavior,
                ..Inner::default()
            })),
        }
    }

    /// Bind to an ephemeral port and return the base URL.
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/tenancy/auth/oauth/token", post(token))
            .route("/metricsql/api/v3/tenants/{tenant}/metrics", get(metrics))
            .route("/api/v2/tenants/{tenant}/metrics/{metric}", get(plain_text))
            .fallback(echo)
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.inner.lock().unwrap().token_forms.clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn metric_steps(&self) -> Vec<u64> {
        self.calls()
            .iter()
            .filter(|c| c.path.starts_with("/metricsql/"))
            .map(RecordedCall::step)
            .collect()
    }
}

fn record(up: &FakeUpstream, method: Method, uri: &Uri, params: HashMap<String, String>, headers: HeaderMap, body: String) {
    up.inner.lock().unwrap().calls.push(RecordedCall {
        method,
        path: uri.path().to_string(),
        params,
        headers,
        body,
    });
}

async fn token(State(up): State<FakeUpstream>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut inner = up.inner.lock().unwrap();
    inner.token_forms.push(form);
    let issued = inner.token_forms.len();
    let status = StatusCode::from_u16(inner.behavior.token_status).unwrap();
    let body = inner.behavior.token_body.clone().unwrap_or_else(|| {
        json!({
            "access_token": format!("tok-{issued}"),
            "token_type": "bearer",
            "expires_in": "3600"
        })
    });
    (status, Json(body)).into_response()
}

async fn metrics(
    State(up): State<FakeUpstream>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    record(&up, Method::GET, &uri, params.clone(), headers, String::new());
    let behavior = up.inner.lock().unwrap().behavior.clone();

    if let Some(status) = behavior.metrics_status {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, Json(json!({"error": "boom", "status": status.as_u16()}))).into_response();
    }

    let parse = |key: &str| params.get(key).and_then(|v| v.parse::<u64>().ok());
    let step = parse("step").unwrap_or(60).max(1);
    // Relative expressions count as unbounded so the limit can still trigger.
    let points = match (parse("start"), parse("end")) {
        (Some(start), Some(end)) => end.saturating_sub(start) / step,
        (None, None) if !params.contains_key("start") => 0,
        _ => u64::MAX,
    };
    let start = parse("start").unwrap_or(0);
    let end = parse("end").unwrap_or(start);
    if points > behavior.point_limit {
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(json!({
                "message": "query exceeds point limit",
                "points": points,
                "limit": behavior.point_limit
            })),
        )
            .into_response();
    }

    let values: Vec<Value> = (start..=end)
        .step_by(step as usize)
        .map(|ts| json!([ts, ts.to_string()]))
        .collect();
    Json(json!({
        "status": "success",
        "data": {
            "resultType": "matrix",
            "result": [
                { "metric": { "__name__": "up", "instance": "a" }, "values": values }
            ]
        }
    }))
    .into_response()
}

async fn plain_text(State(up): State<FakeUpstream>, uri: Uri, headers: HeaderMap) -> Response {
    record(&up, Method::GET, &uri, HashMap::new(), headers, String::new());
    let error = up.inner.lock().unwrap().behavior.metric_text_error;
    if let Some((status, body)) = error {
        return (
            StatusCode::from_u16(status).unwrap(),
            [(header::CONTENT_TYPE, "text/plain")],
            body,
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "metric definitions moved",
    )
        .into_response()
}

async fn echo(
    State(up): State<FakeUpstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    record(&up, method.clone(), &uri, params.clone(), headers, body);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "params": params
    }))
    .into_response()
}

pub fn platform(base_url: &str) -> PlatformConfig {
    PlatformConfig {
        name: "fake".to_string(),
        api_base_url: base_url.to_string(),
        client_id: "cid".to_string(),
        client_secret: "csecret".to_string(),
        verify_tls: true,
        timeout_seconds: 5.0,
        default_tenant: "main".to_string(),
        tenants: BTreeMap::from([(
            "main".to_string(),
            TenantConfig {
                name: "main".to_string(),
                id: "client_1".to_string(),
                additional_headers: BTreeMap::from([
                    ("X-Scope".to_string(), "ops".to_string()),
                    ("X-Team".to_string(), "infra".to_string()),
                ]),
            },
        )]),
    }
}

pub fn app_config(base_url: &str) -> AppConfig {
    AppConfig {
        default_platform: "fake".to_string(),
        platforms: BTreeMap::from([("fake".to_string(), platform(base_url))]),
        config_path: "/tmp/opsramp.toml".to_string(),
        config_hash: "0123abcd".to_string(),
    }
}
