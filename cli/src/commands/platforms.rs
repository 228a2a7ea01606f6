use opsramp_core::config::AppConfig;
use opsramp_mcp_runtime::platforms_summary;
use serde_json::Value;

/// Configured platforms and tenants. Credentials are never printed.
pub fn run(config: &AppConfig) -> Value {
    platforms_summary(config)
}
