use std::collections::BTreeMap;

use opsramp_core::config::{AppConfig, PlatformConfig};
use opsramp_core::error::{ApiError, ApiErrorKind, ConfigError};
use opsramp_mcp_runtime::{OpsRampClient, to_pretty_json};
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const EXIT_API_ERROR: i32 = 1;
pub const EXIT_USAGE_ERROR: i32 = 4;

/// Failure of a CLI command, printed as JSON on stderr.
#[derive(Debug)]
pub enum CliError {
    Api(ApiError),
    Config(ConfigError),
    Usage { message: String, docs_hint: Option<String> },
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            docs_hint: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Api(_) => EXIT_API_ERROR,
            Self::Config(_) | Self::Usage { .. } => EXIT_USAGE_ERROR,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Api(err) => {
                let mut payload = err.to_value();
                if let Some(hint) = api_docs_hint(err.kind) {
                    payload["docs_hint"] = json!(hint);
                }
                payload
            }
            Self::Config(err) => json!({
                "error": "config_error",
                "message": err.to_string(),
                "docs_hint": "Pass --config or set OPSRAMP_MCP_CONFIG to a TOML file with [platforms.<name>]."
            }),
            Self::Usage { message, docs_hint } => {
                let mut payload = json!({
                    "error": "cli_error",
                    "message": message
                });
                if let Some(hint) = docs_hint {
                    payload["docs_hint"] = json!(hint);
                }
                payload
            }
        }
    }

    /// Print the error and return the process exit code.
    pub fn report(&self) -> i32 {
        eprintln!("{}", to_pretty_json(&self.to_value()));
        self.exit_code()
    }
}

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

fn api_docs_hint(kind: ApiErrorKind) -> Option<&'static str> {
    match kind {
        ApiErrorKind::Auth => Some("Check client_id and client_secret for this platform."),
        ApiErrorKind::DataLimitExceeded => {
            Some("Use query-smart, a shorter range, or a larger --step.")
        }
        ApiErrorKind::Transport => Some("Is api_base_url reachable? Check verify_tls and timeout_seconds."),
        ApiErrorKind::Http | ApiErrorKind::Shape => None,
    }
}

pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "opsramp_cli=info,opsramp_mcp_runtime=info".into());
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    }
}

pub fn print_json(value: &Value) -> i32 {
    println!("{}", to_pretty_json(value));
    0
}

pub fn client_for(platform: &PlatformConfig) -> Result<OpsRampClient, CliError> {
    Ok(OpsRampClient::new(platform.clone())?)
}

pub fn resolve_platform<'a>(
    config: &'a AppConfig,
    name: Option<&str>,
) -> Result<&'a PlatformConfig, CliError> {
    Ok(config.platform(name)?)
}

/// Parse repeatable `Key:Value` header flags.
pub fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    let mut headers = BTreeMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            return Err(CliError::Usage {
                message: format!("Invalid header '{entry}'"),
                docs_hint: Some("Use -H 'Key: Value'.".to_string()),
            });
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::usage(format!("Header name is empty in '{entry}'")));
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}
