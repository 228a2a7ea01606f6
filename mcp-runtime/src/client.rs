//! Authenticated access to the OpsRamp REST APIs.
//!
//! [`OpsRampClient`] owns one HTTP connection pool and one cached OAuth
//! credential per platform. Every endpoint goes through [`OpsRampClient::request`],
//! which classifies failures into [`ApiError`] exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use opsramp_core::config::PlatformConfig;
use opsramp_core::error::ApiError;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::util::{self, Credential, TokenResponse};

const JSON_MIME: &str = "application/json";
const TOKEN_PATH: &str = "/tenancy/auth/oauth/token";

pub type QueryParams = Vec<(String, String)>;
pub type Headers = [(String, String)];

/// URL path relative to the platform base URL.
///
/// Literal parts are split on `/`; caller-supplied values are pushed as single
/// segments and percent-encoded when the URL is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPath {
    segments: Vec<String>,
}

impl ApiPath {
    pub fn new(literal: &str) -> Self {
        Self {
            segments: literal
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segment(mut self, value: impl Into<String>) -> Self {
        self.segments.push(value.into());
        self
    }

    pub fn literal(mut self, literal: &str) -> Self {
        self.segments
            .extend(literal.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        self
    }
}

impl fmt::Display for ApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn push_param(params: &mut QueryParams, key: &str, value: Option<impl ToString>) {
    if let Some(value) = value {
        params.push((key.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Parameters of a plain MetricsQL range query. Absent fields are not sent.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub query: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub step: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelFilter {
    pub start: Option<String>,
    pub end: Option<String>,
    pub query: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LabelFilter {
    fn params(&self) -> QueryParams {
        let mut params = Vec::new();
        push_param(&mut params, "start", self.start.as_deref());
        push_param(&mut params, "end", self.end.as_deref());
        push_param(&mut params, "query", self.query.as_deref());
        push_param(&mut params, "limit", self.limit);
        push_param(&mut params, "offset", self.offset);
        params
    }
}

#[derive(Debug, Clone)]
pub struct TraceWindow {
    pub query: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone)]
pub struct InsightsOptions {
    pub page_no: u64,
    pub page_size: u64,
    pub limit: u64,
    pub sort_by: String,
    pub sort_by_option: String,
}

impl Default for InsightsOptions {
    fn default() -> Self {
        Self {
            page_no: 1,
            page_size: 100,
            limit: 100,
            sort_by: "averageLatency".to_string(),
            sort_by_option: "desc".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSearch {
    pub page_no: u64,
    pub page_size: u64,
    pub query_string: Option<String>,
    pub metric_name: Option<String>,
    pub group_name: Option<String>,
    pub display_name: Option<String>,
    pub scope: Option<String>,
}

impl Default for MetricSearch {
    fn default() -> Self {
        Self {
            page_no: 1,
            page_size: 100,
            query_string: None,
            metric_name: None,
            group_name: None,
            display_name: None,
            scope: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportingAppSearch {
    pub page_no: u64,
    pub page_size: u64,
    pub query_string: Option<String>,
    pub category: Option<String>,
}

impl Default for ReportingAppSearch {
    fn default() -> Self {
        Self {
            page_no: 1,
            page_size: 100,
            query_string: None,
            category: None,
        }
    }
}

pub struct OpsRampClient {
    platform: PlatformConfig,
    http: reqwest::Client,
    credential: Mutex<Option<Credential>>,
}

impl OpsRampClient {
    pub fn new(platform: PlatformConfig) -> Result<Self, ApiError> {
        let http = util::client(&platform)?;
        Ok(Self {
            platform,
            http,
            credential: Mutex::new(None),
        })
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    pub async fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.lock().await.as_ref().map(|c| c.expires_at)
    }

    /// Cached bearer token, refreshed when missing, near expiry, or forced.
    ///
    /// The lock is held across the exchange so concurrent callers share one refresh.
    pub async fn access_token(&self, force_refresh: bool) -> Result<String, ApiError> {
        let mut cached = self.credential.lock().await;
        if !force_refresh {
            if let Some(credential) = cached.as_ref().filter(|c| c.is_valid_at(Utc::now())) {
                return Ok(credential.access_token.clone());
            }
        }

        let credential = self.exchange_credentials().await?;
        tracing::info!(
            platform = %self.platform.name,
            expires_at = %credential.expires_at,
            forced = force_refresh,
            "refreshed OpsRamp access token"
        );
        let token = credential.access_token.clone();
        *cached = Some(credential);
        Ok(token)
    }

    async fn exchange_credentials(&self) -> Result<Credential, ApiError> {
        let url = self.url_for(&ApiPath::new(TOKEN_PATH), &[])?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.platform.client_id.as_str()),
            ("client_secret", self.platform.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(url)
            .header(ACCEPT, JSON_MIME)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if status != 200 {
            return Err(ApiError::auth(
                format!("OpsRamp token request failed with status {status}"),
                status,
                util::body_details(&content_type, &text),
            ));
        }

        let parsed: TokenResponse = serde_json::from_str(&text).map_err(|_| {
            ApiError::auth(
                "OpsRamp token response is not a JSON object",
                status,
                util::body_details(&content_type, &text),
            )
        })?;
        let access_token = parsed
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::auth(
                    "OpsRamp token response missing access_token",
                    status,
                    util::body_details(&content_type, &text),
                )
            })?;

        Ok(Credential::issued_at(
            access_token,
            Utc::now(),
            parsed.lifetime_seconds(),
        ))
    }

    fn url_for(&self, path: &ApiPath, params: &[(String, String)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.platform.api_base_url).map_err(|e| {
            ApiError::shape(format!(
                "Invalid api_base_url '{}': {e}",
                self.platform.api_base_url
            ))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ApiError::shape(format!(
                    "api_base_url '{}' cannot carry a path",
                    self.platform.api_base_url
                ))
            })?;
            segments.pop_if_empty();
            segments.extend(path.segments.iter());
        }
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        let reason = if err.is_timeout() { "timed out" } else { "failed" };
        ApiError::transport(format!(
            "Request to OpsRamp platform '{}' ({}) {reason}: {err}",
            self.platform.name, self.platform.api_base_url
        ))
    }

    /// Authenticated request.
    ///
    /// Sends `Authorization`, `Accept` and (with a body) `Content-Type` defaults;
    /// caller headers override them. Returns parsed JSON for JSON responses and
    /// `{status_code, content_type, text}` for anything else.
    pub async fn request(
        &self,
        method: Method,
        path: &ApiPath,
        params: &[(String, String)],
        body: Option<&Value>,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let url = self.url_for(path, params)?;
        let token = self.access_token(false).await?;

        let mut header_map = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ApiError::shape("Access token is not a valid header value"))?;
        header_map.insert(AUTHORIZATION, bearer);
        header_map.insert(ACCEPT, HeaderValue::from_static(JSON_MIME));
        if body.is_some() {
            header_map.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_MIME));
        }
        util::merge_headers(&mut header_map, headers)?;

        let mut builder = self.http.request(method.clone(), url).headers(header_map);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        tracing::debug!(method = %method, path = %path, status, "OpsRamp API response");

        if status >= 400 {
            return Err(ApiError::from_response(
                method.as_str(),
                &path.to_string(),
                status,
                util::body_details(&content_type, &text),
            ));
        }

        if util::is_json_content_type(&content_type) {
            if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                return Ok(parsed);
            }
        }
        Ok(json!({
            "status_code": status,
            "content_type": content_type,
            "text": text,
        }))
    }

    async fn get(&self, path: &ApiPath, params: &[(String, String)], headers: &Headers) -> Result<Value, ApiError> {
        self.request(Method::GET, path, params, None, headers).await
    }

    pub async fn list_dashboard_collections(&self, page: &Page, headers: &Headers) -> Result<Value, ApiError> {
        let mut params = Vec::new();
        push_param(&mut params, "limit", page.limit);
        push_param(&mut params, "offset", page.offset);
        self.get(&ApiPath::new("/dashboards/api/v3/collections"), &params, headers)
            .await
    }

    pub async fn list_collection_dashboards(
        &self,
        collection_id: &str,
        page: &Page,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let mut params = Vec::new();
        push_param(&mut params, "limit", page.limit);
        push_param(&mut params, "offset", page.offset);
        let path = ApiPath::new("/dashboards/api/v3/collections")
            .segment(collection_id)
            .literal("dashboards");
        self.get(&path, &params, headers).await
    }

    pub async fn get_dashboard(
        &self,
        collection_id: &str,
        dashboard_id: &str,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let path = ApiPath::new("/dashboards/api/v3/collections")
            .segment(collection_id)
            .literal("dashboards")
            .segment(dashboard_id);
        self.get(&path, &[], headers).await
    }

    /// Plain range query: one request, no step adjustment, no sharding.
    pub async fn query_metricsql(
        &self,
        tenant_id: &str,
        query: &MetricsQuery,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let mut params = vec![("query".to_string(), query.query.clone())];
        push_param(&mut params, "start", query.start.as_deref());
        push_param(&mut params, "end", query.end.as_deref());
        push_param(&mut params, "step", query.step);
        self.get(&metricsql_path(tenant_id), &params, headers).await
    }

    pub async fn list_metricsql_labels(
        &self,
        tenant_id: &str,
        filter: &LabelFilter,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let path = metricsql_path(tenant_id).literal("labels");
        self.get(&path, &filter.params(), headers).await
    }

    pub async fn list_metricsql_label_values(
        &self,
        tenant_id: &str,
        label_name: &str,
        filter: &LabelFilter,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let path = metricsql_path(tenant_id).literal("labels").segment(label_name);
        self.get(&path, &filter.params(), headers).await
    }

    pub async fn push_metrics_data(
        &self,
        client_id: &str,
        payload: &Value,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let path = metricsql_path(client_id).literal("data");
        self.request(Method::POST, &path, &[], Some(payload), headers)
            .await
    }

    pub async fn tracing_top_operations(
        &self,
        tenant_id: &str,
        window: &TraceWindow,
        sort_by: &str,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let path = tracing_path(tenant_id).literal("top-operations");
        let mut params = window_params(window);
        params.push(("sortBy".to_string(), sort_by.to_string()));
        self.get(&path, &params, headers).await
    }

    pub async fn tracing_operation_insights(
        &self,
        tenant_id: &str,
        window: &TraceWindow,
        options: &InsightsOptions,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let path = tracing_path(tenant_id).literal("operation-insights");
        let mut params = window_params(window);
        params.extend([
            ("pageNo".to_string(), options.page_no.to_string()),
            ("pageSize".to_string(), options.page_size.to_string()),
            ("limit".to_string(), options.limit.to_string()),
            ("sortBy".to_string(), options.sort_by.clone()),
            ("sortByOption".to_string(), options.sort_by_option.clone()),
        ]);
        self.get(&path, &params, headers).await
    }

    pub async fn list_metrics_v2(
        &self,
        tenant_id: &str,
        search: &MetricSearch,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let mut params = vec![
            ("pageNo".to_string(), search.page_no.to_string()),
            ("pageSize".to_string(), search.page_size.to_string()),
        ];
        push_param(&mut params, "queryString", search.query_string.as_deref());
        push_param(&mut params, "metricName", search.metric_name.as_deref());
        push_param(&mut params, "groupName", search.group_name.as_deref());
        push_param(&mut params, "displayName", search.display_name.as_deref());
        push_param(&mut params, "scope", search.scope.as_deref());
        self.get(&v2_path(tenant_id).literal("metrics"), &params, headers)
            .await
    }

    pub async fn get_metric_v2(&self, tenant_id: &str, metric_name: &str, headers: &Headers) -> Result<Value, ApiError> {
        let path = v2_path(tenant_id).literal("metrics").segment(metric_name);
        self.get(&path, &[], headers).await
    }

    pub async fn list_reporting_apps_v2(
        &self,
        tenant_id: &str,
        search: &ReportingAppSearch,
        headers: &Headers,
    ) -> Result<Value, ApiError> {
        let mut params = vec![
            ("pageNo".to_string(), search.page_no.to_string()),
            ("pageSize".to_string(), search.page_size.to_string()),
        ];
        push_param(&mut params, "queryString", search.query_string.as_deref());
        push_param(&mut params, "category", search.category.as_deref());
        let path = v2_path(tenant_id).literal("reporting-apps/available/search");
        self.get(&path, &params, headers).await
    }
}

fn content_type_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn metricsql_path(tenant_id: &str) -> ApiPath {
    ApiPath::new("/metricsql/api/v3/tenants")
        .segment(tenant_id)
        .literal("metrics")
}

fn tracing_path(tenant_id: &str) -> ApiPath {
    ApiPath::new("/tracing-query/api/v1/tenants").segment(tenant_id)
}

fn v2_path(tenant_id: &str) -> ApiPath {
    ApiPath::new("/api/v2/tenants").segment(tenant_id)
}

fn window_params(window: &TraceWindow) -> QueryParams {
    vec![
        ("query".to_string(), window.query.clone()),
        ("start".to_string(), window.start.clone()),
        ("end".to_string(), window.end.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn platform(base: &str) -> PlatformConfig {
        PlatformConfig {
            name: "prod".to_string(),
            api_base_url: base.to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            verify_tls: true,
            timeout_seconds: 5.0,
            default_tenant: String::new(),
            tenants: BTreeMap::new(),
        }
    }

    #[test]
    fn api_path_displays_raw_segments() {
        let path = ApiPath::new("/dashboards/api/v3/collections/")
            .segment("a b")
            .literal("dashboards");
        assert_eq!(path.to_string(), "/dashboards/api/v3/collections/a b/dashboards");
    }

    #[test]
    fn caller_segments_are_percent_encoded() {
        let client = OpsRampClient::new(platform("https://acme.api.opsramp.com")).unwrap();
        let url = client
            .url_for(
                &v2_path("client 1").literal("metrics").segment("cpu/usage?x"),
                &[("queryString".to_string(), "a&b".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.api.opsramp.com/api/v2/tenants/client%201/metrics/cpu%2Fusage%3Fx?queryString=a%26b"
        );
    }

    #[test]
    fn base_url_path_prefix_is_kept() {
        let client = OpsRampClient::new(platform("https://gw.example.com/opsramp")).unwrap();
        let url = client
            .url_for(&metricsql_path("t1"), &[])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gw.example.com/opsramp/metricsql/api/v3/tenants/t1/metrics"
        );
    }

    #[test]
    fn invalid_base_url_is_a_shape_error() {
        let client = OpsRampClient::new(platform("not a url")).unwrap();
        let err = client.url_for(&ApiPath::new("/x"), &[]).unwrap_err();
        assert_eq!(err.kind, opsramp_core::error::ApiErrorKind::Shape);
    }

    #[test]
    fn label_filter_sends_only_present_fields() {
        let filter = LabelFilter {
            start: Some("100".to_string()),
            limit: Some(10),
            ..LabelFilter::default()
        };
        assert_eq!(
            filter.params(),
            vec![
                ("start".to_string(), "100".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn fresh_client_has_no_token_expiry() {
        let client = OpsRampClient::new(platform("https://acme.api.opsramp.com")).unwrap();
        assert!(client.token_expires_at().await.is_none());
    }
}
