use opsramp_core::config::AppConfig;
use opsramp_mcp_runtime::token_preview;
use serde_json::{Value, json};

use crate::util::{CliError, client_for, resolve_platform};

/// Force a token exchange against one platform and report masked token metadata.
pub async fn test(config: &AppConfig, platform: Option<&str>) -> Result<Value, CliError> {
    let platform = resolve_platform(config, platform)?;
    let client = client_for(platform)?;
    let token = client.access_token(true).await?;
    let expires_at = client.token_expires_at().await;
    tracing::info!(platform = %platform.name, "token exchange succeeded");

    Ok(json!({
        "ok": true,
        "platform": platform.name,
        "api_base_url": platform.api_base_url,
        "default_tenant": platform.default_tenant,
        "token_preview": token_preview(&token),
        "token_expires_at": expires_at.map(|t| t.to_rfc3339()),
    }))
}
