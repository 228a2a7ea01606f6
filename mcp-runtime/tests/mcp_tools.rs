mod common;

use common::{Behavior, FakeUpstream};
use opsramp_mcp_runtime::handle_jsonrpc;
use serde_json::{Value, json};

async fn call_tool(base_url: &str, name: &str, arguments: Value) -> Value {
    let mut responses = handle_jsonrpc(
        common::app_config(base_url),
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }),
    )
    .await;
    assert_eq!(responses.len(), 1);
    responses.remove(0)["result"].take()
}

#[tokio::test]
async fn smart_query_tool_returns_meta_in_envelope() {
    let upstream = FakeUpstream::new(Behavior {
        point_limit: 100,
        ..Behavior::default()
    });
    let base_url = upstream.start().await;

    let result = call_tool(
        &base_url,
        "opsramp_metricsql_query_smart",
        json!({
            "query": "up",
            "start": 0,
            "end": "604800",
            "max_points_per_slice": 100
        }),
    )
    .await;

    assert!(result.get("isError").is_none());
    let envelope = &result["structuredContent"];
    assert_eq!(envelope["status"], "complete");
    assert_eq!(envelope["tool"], "opsramp_metricsql_query_smart");
    assert_eq!(envelope["data"]["meta"]["mode"], "sharded");
    assert_eq!(envelope["data"]["meta"]["slice_count"], 2);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("\"sharded\""));
}

#[tokio::test]
async fn tenant_and_caller_headers_are_merged() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    call_tool(
        &base_url,
        "opsramp_metricsql_query",
        json!({
            "query": "up",
            "start": "0",
            "end": "600",
            "step": 60,
            "additional_headers": { "X-Team": "sre" }
        }),
    )
    .await;

    let call = &upstream.calls()[0];
    assert_eq!(call.path, "/metricsql/api/v3/tenants/client_1/metrics");
    assert_eq!(call.header("x-scope"), Some("ops"));
    assert_eq!(call.header("x-team"), Some("sre"));
    assert_eq!(call.param("step"), Some("60"));
}

#[tokio::test]
async fn explicit_tenant_id_wins_over_alias() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    call_tool(
        &base_url,
        "opsramp_v2_list_metrics",
        json!({ "tenant_id": "client_99", "metric_name": "cpu" }),
    )
    .await;

    let call = &upstream.calls()[0];
    assert_eq!(call.path, "/api/v2/tenants/client_99/metrics");
    assert_eq!(call.param("metricName"), Some("cpu"));
    assert_eq!(call.param("pageNo"), Some("1"));
    assert_eq!(call.param("pageSize"), Some("100"));
}

#[tokio::test]
async fn data_limit_error_reaches_caller_verbatim() {
    let upstream = FakeUpstream::new(Behavior {
        point_limit: 0,
        ..Behavior::default()
    });
    let base_url = upstream.start().await;

    let result = call_tool(
        &base_url,
        "opsramp_metricsql_query",
        json!({ "query": "up", "start": "0", "end": "3600" }),
    )
    .await;

    assert_eq!(result["isError"], true);
    let error = &result["structuredContent"]["error"];
    assert_eq!(error["error"], "data_limit_exceeded");
    assert_eq!(error["status_code"], 406);
    assert_eq!(error["details"]["message"], "query exceeds point limit");
    assert_eq!(upstream.calls().len(), 1);
}

#[tokio::test]
async fn auth_test_forces_refresh_and_masks_token() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    let result = call_tool(&base_url, "opsramp_auth_test", json!({})).await;

    let data = &result["structuredContent"]["data"];
    assert_eq!(data["ok"], true);
    assert_eq!(data["platform"], "fake");
    assert_eq!(data["token_preview"], "tok-1...");
    assert!(data["token_expires_at"].is_string());
    assert_eq!(data["tenants"], json!(["main"]));
    assert_eq!(upstream.token_requests().len(), 1);
}

#[tokio::test]
async fn operation_insights_sends_paging_defaults() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    call_tool(
        &base_url,
        "opsramp_tracing_operation_insights",
        json!({ "query": "service.name = \"checkout\"", "start": "1700000000", "end": "1700003600" }),
    )
    .await;

    let call = &upstream.calls()[0];
    assert_eq!(call.path, "/tracing-query/api/v1/tenants/client_1/operation-insights");
    assert_eq!(call.param("query"), Some("service.name = \"checkout\""));
    assert_eq!(call.param("pageNo"), Some("1"));
    assert_eq!(call.param("pageSize"), Some("100"));
    assert_eq!(call.param("limit"), Some("100"));
    assert_eq!(call.param("sortBy"), Some("averageLatency"));
    assert_eq!(call.param("sortByOption"), Some("desc"));
}

#[tokio::test]
async fn dashboard_variables_tool_reads_dashboard() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    let result = call_tool(
        &base_url,
        "opsramp_dashboard_get_variables",
        json!({ "collection_id": "c/1", "dashboard_id": "d1", "variables_map": { "host": "web-2" } }),
    )
    .await;

    // The fake echoes instead of returning a dashboard, so no variables are found.
    let data = &result["structuredContent"]["data"];
    assert_eq!(data["collection_id"], "c/1");
    assert_eq!(data["variables"], json!([]));
    assert_eq!(data["resolved_variables_map"], json!({"host": "web-2"}));
    assert_eq!(
        upstream.calls()[0].path,
        "/dashboards/api/v3/collections/c%2F1/dashboards/d1"
    );
}

#[tokio::test]
async fn push_data_uses_client_id_override() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    let result = call_tool(
        &base_url,
        "opsramp_metricsql_push_data",
        json!({ "client_id": "client_7", "payload": [{ "metric": "m", "value": 1 }] }),
    )
    .await;

    assert_eq!(result["structuredContent"]["status"], "complete");
    let call = &upstream.calls()[0];
    assert_eq!(call.path, "/metricsql/api/v3/tenants/client_7/metrics/data");
    assert_eq!(call.method, "POST");
}

#[tokio::test]
async fn plain_query_tool_defaults_range_and_step() {
    let upstream = FakeUpstream::new(Behavior::default());
    let base_url = upstream.start().await;

    let result = call_tool(&base_url, "opsramp_metricsql_query", json!({ "query": "up" })).await;

    assert_eq!(result["structuredContent"]["status"], "complete");
    let call = &upstream.calls()[0];
    assert_eq!(call.param("start"), Some("0"));
    assert_eq!(call.param("end"), Some("0"));
    assert_eq!(call.param("step"), Some("60"));
}

#[tokio::test]
async fn text_error_details_survive_in_envelope() {
    let upstream = FakeUpstream::new(Behavior {
        metric_text_error: Some((502, "null")),
        ..Behavior::default()
    });
    let base_url = upstream.start().await;

    let result = call_tool(&base_url, "opsramp_v2_get_metric", json!({ "metric_name": "cpu" })).await;

    assert_eq!(result["isError"], true);
    let error = &result["structuredContent"]["error"];
    assert_eq!(error["status_code"], 502);
    assert_eq!(error["details"], "null");
}
