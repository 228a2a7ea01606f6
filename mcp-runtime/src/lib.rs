use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use clap::{Args, Subcommand};
use opsramp_core::config::{AppConfig, PlatformConfig};
use opsramp_core::query::DEFAULT_STEP_SECONDS;
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncWrite, BufReader};
use uuid::Uuid;

pub mod client;
mod framing;
pub mod smart_query;
mod tools;
mod util;

pub use client::{ApiPath, OpsRampClient};
pub use smart_query::SmartQueryRequest;

use client::{
    InsightsOptions, LabelFilter, MetricSearch, MetricsQuery, Page, ReportingAppSearch, TraceWindow,
};
use framing::{Framing, Incoming, read_message, write_message};
use tools::{
    ToolError, arg_bool, arg_object_array, arg_optional_string, arg_optional_u64, arg_string,
    arg_string_map, arg_u64, required_string, tool_definitions,
};
pub use util::to_pretty_json;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "opsramp-mcp";
const TOKEN_PREVIEW_CHARS: usize = 8;

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the OpsRamp MCP server over stdio
    Serve(McpServeArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct McpServeArgs {
    /// Platform used when a tool call names none (overrides default_platform)
    #[arg(long)]
    pub platform: Option<String>,
}

pub async fn run(config: AppConfig, command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let mut config = config;
            if let Some(platform) = args.platform.as_deref() {
                match config.platform(Some(platform)) {
                    Ok(resolved) => config.default_platform = resolved.name.clone(),
                    Err(err) => {
                        let payload = json!({
                            "error": "config_error",
                            "message": err.to_string(),
                            "field": "platform",
                        });
                        eprintln!("{}", to_pretty_json(&payload));
                        return 4;
                    }
                }
            }
            let server = McpServer::new(config);
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
    }
}

/// Answer one JSON-RPC message (or batch) without a stdio loop.
pub async fn handle_jsonrpc(config: AppConfig, incoming: Value) -> Vec<Value> {
    McpServer::new(config).handle_incoming_message(incoming).await
}

/// Serve MCP over arbitrary streams until the reader reaches EOF.
pub async fn serve<R, W>(config: AppConfig, reader: &mut R, writer: &mut W) -> Result<(), String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    McpServer::new(config).serve(reader, writer).await
}

struct McpServer {
    config: AppConfig,
    clients: Mutex<HashMap<String, Arc<OpsRampClient>>>,
    session_id: String,
}

/// Platform, client and headers resolved from a tool call's selector arguments.
struct ToolScope<'a> {
    platform: &'a PlatformConfig,
    client: Arc<OpsRampClient>,
    tenant: Option<String>,
    headers: Vec<(String, String)>,
}

impl ToolScope<'_> {
    fn tenant_id(&self, explicit: Option<&str>) -> Result<String, ToolError> {
        Ok(self
            .platform
            .resolve_tenant_id(self.tenant.as_deref(), explicit)?)
    }
}

impl McpServer {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
            session_id: format!("stdio-{}", Uuid::now_v7()),
        }
    }

    async fn serve_stdio(&self) -> Result<(), String> {
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(&mut reader, &mut stdout).await
    }

    async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            session_id = %self.session_id,
            config_path = %self.config.config_path,
            platforms = self.config.platforms.len(),
            default_platform = %self.config.default_platform,
            "MCP server started"
        );

        loop {
            let next = read_message(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some((incoming, framing)) = next else {
                break;
            };

            let (responses, batch) = match incoming {
                Incoming::Message(value) => {
                    let batch = value.is_array();
                    (self.handle_incoming_message(value).await, batch)
                }
                Incoming::Malformed(reason) => {
                    tracing::warn!(%reason, "discarding malformed MCP message");
                    (
                        vec![error_response(Value::Null, RpcError::parse_error(reason))],
                        false,
                    )
                }
            };
            write_responses(writer, responses, batch, framing).await?;
        }

        tracing::info!(session_id = %self.session_id, "MCP client closed the stream");
        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        // Responses to requests we never send.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(match self.handle_request(method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            }),
            None => {
                tracing::debug!(method, "ignoring MCP notification");
                None
            }
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Query OpsRamp dashboards, MetricsQL time series, traces and metric metadata. Use opsramp_list_platforms to see configured platforms and tenants. Prefer opsramp_metricsql_query_smart over opsramp_metricsql_query for time-series data: it downsamples long ranges and shards queries the server rejects for size. Pass start/end as epoch seconds."
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        tracing::debug!(tool = name, "tool call");
        Ok(match self.execute_tool(name, &args).await {
            Ok(payload) => build_tool_call_response(
                json!({
                    "status": "complete",
                    "tool": name,
                    "data": payload
                }),
                false,
            ),
            Err(err) => {
                tracing::warn!(tool = name, error = %err.code, message = %err.message, "tool call failed");
                build_tool_call_response(
                    json!({
                        "status": "error",
                        "tool": name,
                        "error": err.to_value()
                    }),
                    true,
                )
            }
        })
    }

    async fn execute_tool(&self, tool_name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        match tool_name {
            "opsramp_server_info" => Ok(self.tool_server_info()),
            "opsramp_list_platforms" => Ok(self.tool_list_platforms()),
            "opsramp_auth_test" => self.tool_auth_test(args).await,
            "opsramp_dashboard_list_collections" => self.tool_dashboard_list_collections(args).await,
            "opsramp_dashboard_list_dashboards" => self.tool_dashboard_list_dashboards(args).await,
            "opsramp_dashboard_get" => self.tool_dashboard_get(args).await,
            "opsramp_dashboard_get_variables" => self.tool_dashboard_get_variables(args).await,
            "opsramp_metricsql_query" => self.tool_metricsql_query(args).await,
            "opsramp_metricsql_query_smart" => self.tool_metricsql_query_smart(args).await,
            "opsramp_metricsql_labels" => self.tool_metricsql_labels(args).await,
            "opsramp_metricsql_label_values" => self.tool_metricsql_label_values(args).await,
            "opsramp_metricsql_push_data" => self.tool_metricsql_push_data(args).await,
            "opsramp_tracing_top_operations" => self.tool_tracing_top_operations(args).await,
            "opsramp_tracing_operation_insights" => self.tool_tracing_operation_insights(args).await,
            "opsramp_v2_list_metrics" => self.tool_v2_list_metrics(args).await,
            "opsramp_v2_get_metric" => self.tool_v2_get_metric(args).await,
            "opsramp_v2_list_reporting_apps" => self.tool_v2_list_reporting_apps(args).await,
            _ => Err(ToolError::new(
                "unknown_tool",
                format!("Unknown tool '{tool_name}'"),
            )
            .with_field("name")
            .with_docs_hint("Call tools/list to see available tools.")),
        }
    }

    fn client_for(&self, platform: &PlatformConfig) -> Result<Arc<OpsRampClient>, ToolError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&platform.name) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(OpsRampClient::new(platform.clone())?);
        clients.insert(platform.name.clone(), Arc::clone(&client));
        Ok(client)
    }

    fn scope(&self, args: &Map<String, Value>) -> Result<ToolScope<'_>, ToolError> {
        let platform_name = arg_optional_string(args, "platform")?;
        let platform = self.config.platform(platform_name.as_deref())?;
        let tenant = arg_optional_string(args, "tenant")?;
        let extra = arg_string_map(args, "additional_headers")?;
        let headers = platform.resolve_headers(tenant.as_deref(), &extra)?;
        Ok(ToolScope {
            platform,
            client: self.client_for(platform)?,
            tenant,
            headers,
        })
    }

    fn tool_server_info(&self) -> Value {
        json!({
            "ok": true,
            "server": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "config_path": self.config.config_path,
            "config_hash": self.config.config_hash,
            "default_platform": self.config.default_platform,
            "platform_count": self.config.platforms.len(),
            "platforms": self.config.platforms.keys().collect::<Vec<_>>(),
        })
    }

    fn tool_list_platforms(&self) -> Value {
        platforms_summary(&self.config)
    }

    async fn tool_auth_test(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let platform_name = arg_optional_string(args, "platform")?;
        let platform = self.config.platform(platform_name.as_deref())?;
        let client = self.client_for(platform)?;
        let token = client.access_token(true).await?;
        let expires_at = client.token_expires_at().await;
        Ok(json!({
            "ok": true,
            "version": env!("CARGO_PKG_VERSION"),
            "config_path": self.config.config_path,
            "config_hash": self.config.config_hash,
            "platform": platform.name,
            "api_base_url": platform.api_base_url,
            "default_tenant": platform.default_tenant,
            "tenants": platform.tenants.keys().collect::<Vec<_>>(),
            "token_preview": token_preview(&token),
            "token_expires_at": expires_at.map(|t| t.to_rfc3339()),
            "token_expires_at_epoch": expires_at.map(|t| t.timestamp()),
        }))
    }

    async fn tool_dashboard_list_collections(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let scope = self.scope(args)?;
        let page = Page {
            limit: arg_optional_u64(args, "limit")?,
            offset: arg_optional_u64(args, "offset")?,
        };
        Ok(scope
            .client
            .list_dashboard_collections(&page, &scope.headers)
            .await?)
    }

    async fn tool_dashboard_list_dashboards(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let collection_id = required_string(args, "collection_id")?;
        let scope = self.scope(args)?;
        let page = Page {
            limit: arg_optional_u64(args, "limit")?,
            offset: arg_optional_u64(args, "offset")?,
        };
        Ok(scope
            .client
            .list_collection_dashboards(&collection_id, &page, &scope.headers)
            .await?)
    }

    async fn tool_dashboard_get(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let collection_id = required_string(args, "collection_id")?;
        let dashboard_id = required_string(args, "dashboard_id")?;
        let scope = self.scope(args)?;
        Ok(scope
            .client
            .get_dashboard(&collection_id, &dashboard_id, &scope.headers)
            .await?)
    }

    async fn tool_dashboard_get_variables(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let collection_id = required_string(args, "collection_id")?;
        let dashboard_id = required_string(args, "dashboard_id")?;
        let overrides = arg_string_map(args, "variables_map")?;
        let scope = self.scope(args)?;
        let dashboard = scope
            .client
            .get_dashboard(&collection_id, &dashboard_id, &scope.headers)
            .await?;

        let mut summary = dashboard_variables(&dashboard, &overrides);
        summary["collection_id"] = Value::String(collection_id);
        summary["dashboard_id"] = Value::String(dashboard_id);
        Ok(summary)
    }

    async fn tool_metricsql_query(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let query = required_string(args, "query")?;
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        let request = MetricsQuery {
            query,
            start: Some(arg_string(args, "start", "0")?),
            end: Some(arg_string(args, "end", "0")?),
            step: Some(arg_u64(args, "step", DEFAULT_STEP_SECONDS)?),
        };
        Ok(scope
            .client
            .query_metricsql(&tenant_id, &request, &scope.headers)
            .await?)
    }

    async fn tool_metricsql_query_smart(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let query = required_string(args, "query")?;
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        let defaults = SmartQueryRequest::new(
            tenant_id,
            query,
            arg_string(args, "start", "0")?,
            arg_string(args, "end", "0")?,
        );
        let request = SmartQueryRequest {
            step: arg_u64(args, "step", defaults.step)?,
            auto_downsample: arg_bool(args, "auto_downsample", defaults.auto_downsample)?,
            enable_sharding: arg_bool(args, "enable_sharding", defaults.enable_sharding)?,
            max_points_per_slice: arg_u64(args, "max_points_per_slice", defaults.max_points_per_slice)?,
            ..defaults
        };
        Ok(scope.client.smart_query(&request, &scope.headers).await?)
    }

    async fn tool_metricsql_labels(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        let filter = label_filter(args)?;
        Ok(scope
            .client
            .list_metricsql_labels(&tenant_id, &filter, &scope.headers)
            .await?)
    }

    async fn tool_metricsql_label_values(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let label_name = required_string(args, "label_name")?;
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        let filter = label_filter(args)?;
        Ok(scope
            .client
            .list_metricsql_label_values(&tenant_id, &label_name, &filter, &scope.headers)
            .await?)
    }

    async fn tool_metricsql_push_data(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let payload = Value::Array(arg_object_array(args, "payload")?);
        let scope = self.scope(args)?;
        let client_id = scope.tenant_id(arg_optional_string(args, "client_id")?.as_deref())?;
        Ok(scope
            .client
            .push_metrics_data(&client_id, &payload, &scope.headers)
            .await?)
    }

    async fn tool_tracing_top_operations(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let window = trace_window(args)?;
        let sort_by = arg_string(args, "sort_by", "maxLatency")?;
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        Ok(scope
            .client
            .tracing_top_operations(&tenant_id, &window, &sort_by, &scope.headers)
            .await?)
    }

    async fn tool_tracing_operation_insights(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let window = trace_window(args)?;
        let defaults = InsightsOptions::default();
        let options = InsightsOptions {
            page_no: arg_u64(args, "page_no", defaults.page_no)?,
            page_size: arg_u64(args, "page_size", defaults.page_size)?,
            limit: arg_u64(args, "limit", defaults.limit)?,
            sort_by: arg_string(args, "sort_by", &defaults.sort_by)?,
            sort_by_option: arg_string(args, "sort_by_option", &defaults.sort_by_option)?,
        };
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        Ok(scope
            .client
            .tracing_operation_insights(&tenant_id, &window, &options, &scope.headers)
            .await?)
    }

    async fn tool_v2_list_metrics(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let defaults = MetricSearch::default();
        let search = MetricSearch {
            page_no: arg_u64(args, "page_no", defaults.page_no)?,
            page_size: arg_u64(args, "page_size", defaults.page_size)?,
            query_string: arg_optional_string(args, "query_string")?,
            metric_name: arg_optional_string(args, "metric_name")?,
            group_name: arg_optional_string(args, "group_name")?,
            display_name: arg_optional_string(args, "display_name")?,
            scope: arg_optional_string(args, "scope")?,
        };
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        Ok(scope
            .client
            .list_metrics_v2(&tenant_id, &search, &scope.headers)
            .await?)
    }

    async fn tool_v2_get_metric(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let metric_name = required_string(args, "metric_name")?;
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        Ok(scope
            .client
            .get_metric_v2(&tenant_id, &metric_name, &scope.headers)
            .await?)
    }

    async fn tool_v2_list_reporting_apps(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let defaults = ReportingAppSearch::default();
        let search = ReportingAppSearch {
            page_no: arg_u64(args, "page_no", defaults.page_no)?,
            page_size: arg_u64(args, "page_size", defaults.page_size)?,
            query_string: arg_optional_string(args, "query_string")?,
            category: arg_optional_string(args, "category")?,
        };
        let scope = self.scope(args)?;
        let tenant_id = scope.tenant_id(arg_optional_string(args, "tenant_id")?.as_deref())?;
        Ok(scope
            .client
            .list_reporting_apps_v2(&tenant_id, &search, &scope.headers)
            .await?)
    }
}

/// A batch is answered with one array; anything else message by message.
async fn write_responses<W>(
    writer: &mut W,
    responses: Vec<Value>,
    batch: bool,
    framing: Framing,
) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    if responses.is_empty() {
        return Ok(());
    }
    let outgoing = if batch {
        vec![Value::Array(responses)]
    } else {
        responses
    };
    for response in &outgoing {
        write_message(writer, response, framing)
            .await
            .map_err(|e| format!("Failed to write MCP response: {e}"))?;
    }
    Ok(())
}

fn label_filter(args: &Map<String, Value>) -> Result<LabelFilter, ToolError> {
    Ok(LabelFilter {
        start: arg_optional_string(args, "start")?,
        end: arg_optional_string(args, "end")?,
        query: arg_optional_string(args, "query")?,
        limit: arg_optional_u64(args, "limit")?,
        offset: arg_optional_u64(args, "offset")?,
    })
}

fn trace_window(args: &Map<String, Value>) -> Result<TraceWindow, ToolError> {
    Ok(TraceWindow {
        query: required_string(args, "query")?,
        start: required_string(args, "start")?,
        end: required_string(args, "end")?,
    })
}

/// Platform and tenant listing. Client secrets are never included.
pub fn platforms_summary(config: &AppConfig) -> Value {
    let platforms: Vec<Value> = config
        .platforms
        .values()
        .map(|platform| {
            let tenants: Vec<Value> = platform
                .tenants
                .values()
                .map(|tenant| {
                    json!({
                        "name": tenant.name,
                        "id": tenant.id,
                        "additional_headers": tenant.additional_headers,
                    })
                })
                .collect();
            json!({
                "name": platform.name,
                "api_base_url": platform.api_base_url,
                "default_tenant": platform.default_tenant,
                "verify_tls": platform.verify_tls,
                "timeout_seconds": platform.timeout_seconds,
                "tenants": tenants,
            })
        })
        .collect();
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config_path": config.config_path,
        "config_hash": config.config_hash,
        "default_platform": config.default_platform,
        "platforms": platforms,
    })
}

pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREVIEW_CHARS).collect();
    format!("{prefix}...")
}

/// `$host` and `${host}` both name the variable `host`.
fn variable_name(raw: &str) -> &str {
    let name = raw.trim();
    let name = name
        .strip_prefix("${")
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    name.strip_prefix('$').unwrap_or(name)
}

fn variable_default(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Template variables declared on a dashboard, their defaults, and the
/// defaults after applying caller overrides.
fn dashboard_variables(dashboard: &Value, overrides: &BTreeMap<String, String>) -> Value {
    let variables: Vec<Value> = dashboard
        .get("variables")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter(|v| v.is_object()).cloned().collect())
        .unwrap_or_default();

    let mut names = Vec::new();
    let mut defaults = BTreeMap::new();
    for variable in &variables {
        let name = variable
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        if defaults
            .insert(name.to_string(), variable_default(variable.get("defaultValue")))
            .is_none()
        {
            names.push(name.to_string());
        }
    }

    let mut resolved = defaults.clone();
    for (raw, value) in overrides {
        let name = variable_name(raw);
        if !name.is_empty() {
            resolved.insert(name.to_string(), value.clone());
        }
    }

    let placeholders: Vec<String> = names.iter().map(|name| format!("${name}")).collect();
    json!({
        "dashboard_title": dashboard.get("title").cloned().unwrap_or(Value::Null),
        "variables": variables,
        "default_variables_map": defaults,
        "resolved_variables_map": resolved,
        "placeholders": placeholders,
    })
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    let text = to_pretty_json(&envelope);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn parse_error(reason: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: format!("Parse error: {}", reason.into()),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}
