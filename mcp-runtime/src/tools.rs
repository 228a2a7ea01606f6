use std::collections::BTreeMap;

use opsramp_core::error::{ApiError, ApiErrorKind, ConfigError};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone)]
pub(crate) struct ToolError {
    pub(crate) code: String,
    pub(crate) message: String,
    pub(crate) field: Option<String>,
    pub(crate) docs_hint: Option<String>,
    pub(crate) status_code: Option<u16>,
    pub(crate) details: Option<Value>,
}

impl ToolError {
    pub(crate) fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            status_code: None,
            details: None,
        }
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new("validation_failed", message).with_field(field)
    }

    pub(crate) fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub(crate) fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        if let Some(status_code) = self.status_code {
            payload["status_code"] = json!(status_code);
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

impl From<ApiError> for ToolError {
    fn from(err: ApiError) -> Self {
        let docs_hint = match err.kind {
            ApiErrorKind::Auth => {
                Some("Check client_id and client_secret for this platform in the TOML config.")
            }
            ApiErrorKind::DataLimitExceeded => Some(
                "Narrow the time range, raise step, or use opsramp_metricsql_query_smart.",
            ),
            ApiErrorKind::Transport => Some("Check api_base_url, network reachability and verify_tls."),
            ApiErrorKind::Http | ApiErrorKind::Shape => None,
        };
        let mut tool_error = ToolError::new(err.kind.as_str(), err.message);
        tool_error.status_code = err.status_code;
        if !err.details.is_null() {
            tool_error.details = Some(err.details);
        }
        if let Some(hint) = docs_hint {
            tool_error = tool_error.with_docs_hint(hint);
        }
        tool_error
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        let field = match &err {
            ConfigError::UnknownPlatform { .. } => Some("platform"),
            ConfigError::UnknownTenant { .. } => Some("tenant"),
            _ => None,
        };
        let tool_error = ToolError::new("config_error", err.to_string());
        match field {
            Some(field) => tool_error.with_field(field),
            None => tool_error,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: Value,
}

/// Object schema with the platform/tenant selectors every OpsRamp tool accepts.
fn scoped_schema(mut properties: Value, required: &[&str]) -> Value {
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            "platform".to_string(),
            json!({ "type": "string", "description": "Platform alias from config; defaults to default_platform" }),
        );
        map.insert(
            "tenant".to_string(),
            json!({ "type": "string", "description": "Tenant alias on the platform; defaults to default_tenant" }),
        );
        map.insert(
            "additional_headers".to_string(),
            json!({
                "type": "object",
                "additionalProperties": { "type": "string" },
                "description": "Extra HTTP headers; override tenant headers with the same name"
            }),
        );
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn tenant_schema(mut properties: Value, required: &[&str]) -> Value {
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            "tenant_id".to_string(),
            json!({ "type": "string", "description": "Explicit tenant id; wins over the tenant alias" }),
        );
    }
    scoped_schema(properties, required)
}

pub(crate) fn tool_definitions() -> Vec<ToolDefinition> {
    let time_window = json!({
        "start": { "type": "string", "description": "Epoch seconds" },
        "end": { "type": "string", "description": "Epoch seconds" }
    });
    let label_filter = |extra: Value| {
        let mut props = json!({
            "start": { "type": "string" },
            "end": { "type": "string" },
            "query": { "type": "string", "description": "Series selector to restrict labels" },
            "limit": { "type": "integer", "minimum": 0 },
            "offset": { "type": "integer", "minimum": 0 }
        });
        if let (Some(map), Some(extra)) = (props.as_object_mut(), extra.as_object()) {
            map.extend(extra.clone());
        }
        props
    };

    vec![
        ToolDefinition {
            name: "opsramp_server_info",
            description: "Server version, active config path and hash, and configured platform names.",
            input_schema: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        },
        ToolDefinition {
            name: "opsramp_list_platforms",
            description: "List configured platforms and their tenants. Secrets are never returned.",
            input_schema: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        },
        ToolDefinition {
            name: "opsramp_auth_test",
            description: "Force an OAuth token refresh for a platform and return masked token metadata.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "platform": { "type": "string" }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "opsramp_dashboard_list_collections",
            description: "List dashboard collections.",
            input_schema: scoped_schema(
                json!({
                    "limit": { "type": "integer", "minimum": 0 },
                    "offset": { "type": "integer", "minimum": 0 }
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "opsramp_dashboard_list_dashboards",
            description: "List dashboards in a collection.",
            input_schema: scoped_schema(
                json!({
                    "collection_id": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 0 },
                    "offset": { "type": "integer", "minimum": 0 }
                }),
                &["collection_id"],
            ),
        },
        ToolDefinition {
            name: "opsramp_dashboard_get",
            description: "Fetch one dashboard definition including tiles and variables.",
            input_schema: scoped_schema(
                json!({
                    "collection_id": { "type": "string" },
                    "dashboard_id": { "type": "string" }
                }),
                &["collection_id", "dashboard_id"],
            ),
        },
        ToolDefinition {
            name: "opsramp_dashboard_get_variables",
            description: "List a dashboard's template variables, their defaults, and the values after applying overrides.",
            input_schema: scoped_schema(
                json!({
                    "collection_id": { "type": "string" },
                    "dashboard_id": { "type": "string" },
                    "variables_map": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Overrides keyed by variable name, e.g. {\"host\": \"server-1\"}"
                    }
                }),
                &["collection_id", "dashboard_id"],
            ),
        },
        ToolDefinition {
            name: "opsramp_metricsql_query",
            description: "Run one MetricsQL range query as-is. Prefer opsramp_metricsql_query_smart for long ranges.",
            input_schema: tenant_schema(
                json!({
                    "query": { "type": "string" },
                    "start": { "type": "string", "description": "Epoch seconds", "default": "0" },
                    "end": { "type": "string", "description": "Epoch seconds", "default": "0" },
                    "step": { "type": "integer", "minimum": 1, "default": 60 }
                }),
                &["query"],
            ),
        },
        ToolDefinition {
            name: "opsramp_metricsql_query_smart",
            description: "Run a MetricsQL range query with auto-downsampling and, when the server rejects it for size, time-range sharding. Result carries a meta object describing the execution.",
            input_schema: tenant_schema(
                json!({
                    "query": { "type": "string" },
                    "start": { "type": "string", "description": "Epoch seconds, e.g. 1708473600", "default": "0" },
                    "end": { "type": "string", "description": "Epoch seconds, e.g. 1708560000", "default": "0" },
                    "step": { "type": "integer", "minimum": 1, "default": 60 },
                    "auto_downsample": { "type": "boolean", "default": true },
                    "enable_sharding": { "type": "boolean", "default": true },
                    "max_points_per_slice": { "type": "integer", "minimum": 1, "default": 8000 }
                }),
                &["query"],
            ),
        },
        ToolDefinition {
            name: "opsramp_metricsql_labels",
            description: "List label names available in the time-series database.",
            input_schema: tenant_schema(label_filter(json!({})), &[]),
        },
        ToolDefinition {
            name: "opsramp_metricsql_label_values",
            description: "List values observed for one label, e.g. all hosts for 'instance'.",
            input_schema: tenant_schema(
                label_filter(json!({ "label_name": { "type": "string" } })),
                &["label_name"],
            ),
        },
        ToolDefinition {
            name: "opsramp_metricsql_push_data",
            description: "Push custom samples to the MetricsQL ingest API.",
            input_schema: scoped_schema(
                json!({
                    "payload": { "type": "array", "items": { "type": "object" } },
                    "client_id": { "type": "string", "description": "Explicit client id; wins over the tenant alias" }
                }),
                &["payload"],
            ),
        },
        ToolDefinition {
            name: "opsramp_tracing_top_operations",
            description: "Top traced operations for a time window.",
            input_schema: tenant_schema(
                {
                    let mut props = time_window.clone();
                    if let Some(map) = props.as_object_mut() {
                        map.insert("query".to_string(), json!({ "type": "string" }));
                        map.insert(
                            "sort_by".to_string(),
                            json!({ "type": "string", "default": "maxLatency" }),
                        );
                    }
                    props
                },
                &["query", "start", "end"],
            ),
        },
        ToolDefinition {
            name: "opsramp_tracing_operation_insights",
            description: "Per-operation latency and error insights for a time window.",
            input_schema: tenant_schema(
                {
                    let mut props = time_window;
                    if let Some(map) = props.as_object_mut() {
                        map.insert("query".to_string(), json!({ "type": "string" }));
                        map.insert("page_no".to_string(), json!({ "type": "integer", "default": 1 }));
                        map.insert("page_size".to_string(), json!({ "type": "integer", "default": 100 }));
                        map.insert("limit".to_string(), json!({ "type": "integer", "default": 100 }));
                        map.insert(
                            "sort_by".to_string(),
                            json!({ "type": "string", "default": "averageLatency" }),
                        );
                        map.insert(
                            "sort_by_option".to_string(),
                            json!({ "type": "string", "enum": ["asc", "desc"], "default": "desc" }),
                        );
                    }
                    props
                },
                &["query", "start", "end"],
            ),
        },
        ToolDefinition {
            name: "opsramp_v2_list_metrics",
            description: "Search metric definitions.",
            input_schema: tenant_schema(
                json!({
                    "query_string": { "type": "string" },
                    "metric_name": { "type": "string" },
                    "group_name": { "type": "string" },
                    "display_name": { "type": "string" },
                    "scope": { "type": "string" },
                    "page_no": { "type": "integer", "default": 1 },
                    "page_size": { "type": "integer", "default": 100 }
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "opsramp_v2_get_metric",
            description: "Fetch one metric definition by name.",
            input_schema: tenant_schema(
                json!({ "metric_name": { "type": "string" } }),
                &["metric_name"],
            ),
        },
        ToolDefinition {
            name: "opsramp_v2_list_reporting_apps",
            description: "Search reporting apps available to the tenant.",
            input_schema: tenant_schema(
                json!({
                    "query_string": { "type": "string" },
                    "category": { "type": "string" },
                    "page_no": { "type": "integer", "default": 1 },
                    "page_size": { "type": "integer", "default": 100 }
                }),
                &[],
            ),
        },
    ]
}

pub(crate) fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(ToolError::validation(key, format!("'{key}' must be a boolean"))),
    }
}

pub(crate) fn arg_string(args: &Map<String, Value>, key: &str, default: &str) -> Result<String, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(v)) => Ok(v.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ToolError::validation(key, format!("'{key}' must be a string"))),
    }
}

pub(crate) fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args
        .get(key)
        .ok_or_else(|| ToolError::validation(key, format!("Missing required field '{key}'")))?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(ToolError::validation(key, format!("'{key}' must not be empty"))),
        // Epoch timestamps often arrive as JSON numbers.
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ToolError::validation(key, format!("'{key}' must be a string"))),
    }
}

pub(crate) fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ToolError::validation(key, format!("'{key}' must be a string"))),
    }
}

pub(crate) fn arg_optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ToolError::validation(key, format!("'{key}' must be an unsigned integer")))
            .map(Some),
        Some(_) => Err(ToolError::validation(
            key,
            format!("'{key}' must be an unsigned integer"),
        )),
    }
}

pub(crate) fn arg_u64(args: &Map<String, Value>, key: &str, default: u64) -> Result<u64, ToolError> {
    Ok(arg_optional_u64(args, key)?.unwrap_or(default))
}

/// Object of scalars, e.g. header or variable maps. Scalars are stringified.
pub(crate) fn arg_string_map(args: &Map<String, Value>, key: &str) -> Result<BTreeMap<String, String>, ToolError> {
    let object = match args.get(key) {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(object)) => object,
        Some(_) => {
            return Err(ToolError::validation(key, format!("'{key}' must be an object")));
        }
    };
    let mut out = BTreeMap::new();
    for (name, value) in object {
        let text = scalar_to_string(value).ok_or_else(|| {
            ToolError::validation(key, format!("'{key}.{name}' must be a string, number or boolean"))
        })?;
        out.insert(name.clone(), text);
    }
    Ok(out)
}

pub(crate) fn arg_object_array(args: &Map<String, Value>, key: &str) -> Result<Vec<Value>, ToolError> {
    let items = match args.get(key) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => {
            return Err(ToolError::validation(key, format!("Missing required field '{key}'")));
        }
        Some(_) => {
            return Err(ToolError::validation(key, format!("'{key}' must be an array of objects")));
        }
    };
    if items.iter().any(|item| !item.is_object()) {
        return Err(ToolError::validation(key, format!("'{key}' items must be objects")));
    }
    Ok(items.clone())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn tool_names_are_unique_and_schemas_are_objects() {
        let tools = tool_definitions();
        let mut names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len());
        for tool in &tools {
            assert!(tool.name.starts_with("opsramp_"));
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn tenant_scoped_tools_accept_selectors() {
        let tools = tool_definitions();
        let smart = tools
            .iter()
            .find(|t| t.name == "opsramp_metricsql_query_smart")
            .unwrap();
        let props = smart.input_schema["properties"].as_object().unwrap();
        for key in ["platform", "tenant", "tenant_id", "additional_headers", "max_points_per_slice"] {
            assert!(props.contains_key(key), "{key}");
        }
        assert_eq!(smart.input_schema["required"], json!(["query"]));
    }

    #[test]
    fn required_string_rejects_missing_and_blank() {
        let err = required_string(&args(json!({})), "query").unwrap_err();
        assert_eq!(err.code, "validation_failed");
        assert_eq!(err.field.as_deref(), Some("query"));
        assert!(required_string(&args(json!({"query": "  "})), "query").is_err());
        assert!(required_string(&args(json!({"query": true})), "query").is_err());
        assert_eq!(
            required_string(&args(json!({"start": 1708473600})), "start").unwrap(),
            "1708473600"
        );
    }

    #[test]
    fn optional_helpers_treat_null_as_absent() {
        let a = args(json!({"limit": null, "tenant": "", "step": 30, "flag": null}));
        assert_eq!(arg_optional_u64(&a, "limit").unwrap(), None);
        assert_eq!(arg_optional_string(&a, "tenant").unwrap(), None);
        assert_eq!(arg_u64(&a, "step", 60).unwrap(), 30);
        assert_eq!(arg_u64(&a, "missing", 60).unwrap(), 60);
        assert!(arg_bool(&a, "flag", true).unwrap());
        assert!(arg_optional_u64(&args(json!({"limit": -1})), "limit").is_err());
    }

    #[test]
    fn string_map_stringifies_scalars() {
        let a = args(json!({"additional_headers": {"X-A": "1", "X-B": 2, "X-C": false}}));
        let map = arg_string_map(&a, "additional_headers").unwrap();
        assert_eq!(map.get("X-B").map(String::as_str), Some("2"));
        assert_eq!(map.get("X-C").map(String::as_str), Some("false"));

        let bad = args(json!({"additional_headers": {"X-A": {"nested": 1}}}));
        assert!(arg_string_map(&bad, "additional_headers").is_err());
        assert!(arg_string_map(&args(json!({"additional_headers": [1]})), "additional_headers").is_err());
    }

    #[test]
    fn object_array_requires_objects() {
        assert!(arg_object_array(&args(json!({"payload": [{"a": 1}]})), "payload").is_ok());
        assert!(arg_object_array(&args(json!({"payload": [1]})), "payload").is_err());
        assert!(arg_object_array(&args(json!({})), "payload").is_err());
    }

    #[test]
    fn api_error_keeps_status_and_details() {
        let api = ApiError::from_response("GET", "/x", 406, json!({"limit": 30000}));
        let value = ToolError::from(api).to_value();
        assert_eq!(value["error"], "data_limit_exceeded");
        assert_eq!(value["status_code"], 406);
        assert_eq!(value["details"], json!({"limit": 30000}));
        assert!(value["docs_hint"].as_str().unwrap().contains("query_smart"));
    }

    #[test]
    fn config_error_names_field() {
        let err = ConfigError::UnknownPlatform {
            name: "qa".to_string(),
            available: "prod".to_string(),
        };
        let value = ToolError::from(err).to_value();
        assert_eq!(value["error"], "config_error");
        assert_eq!(value["field"], "platform");
    }
}
