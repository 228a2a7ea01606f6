use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use opsramp_core::config::PlatformConfig;
use opsramp_core::error::ApiError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

/// Tokens are treated as expired this long before the server says so.
pub const TOKEN_EXPIRY_MARGIN_SECONDS: i64 = 30;
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Lifetimes that overflow the calendar fall back to the default lifetime.
    pub fn issued_at(access_token: String, now: DateTime<Utc>, lifetime_seconds: i64) -> Self {
        let expires_at = TimeDelta::try_seconds(lifetime_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| now + TimeDelta::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS));
        Self {
            access_token,
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let refresh_at = self
            .expires_at
            .checked_sub_signed(TimeDelta::seconds(TOKEN_EXPIRY_MARGIN_SECONDS))
            .unwrap_or(self.expires_at);
        !self.access_token.is_empty() && now < refresh_at
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExpiresIn {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            ExpiresIn::Seconds(s) => Some(*s),
            ExpiresIn::Fractional(s) => Some(*s as i64),
            ExpiresIn::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<ExpiresIn>,
}

impl TokenResponse {
    pub fn lifetime_seconds(&self) -> i64 {
        self.expires_in
            .as_ref()
            .and_then(ExpiresIn::seconds)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS)
    }
}

/// One HTTP client per platform; TLS verification and timeout come from config.
pub fn client(platform: &PlatformConfig) -> Result<reqwest::Client, ApiError> {
    let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(!platform.verify_tls);
    if platform.timeout_seconds.is_finite() && platform.timeout_seconds > 0.0 {
        builder = builder.timeout(Duration::from_secs_f64(platform.timeout_seconds));
    }
    builder.build().map_err(|e| {
        ApiError::transport(format!(
            "Failed to build HTTP client for platform '{}': {e}",
            platform.name
        ))
    })
}

/// Later entries replace earlier ones with the same (case-insensitive) name.
pub fn merge_headers(base: &mut HeaderMap, extra: &[(String, String)]) -> Result<(), ApiError> {
    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::shape(format!("Invalid header name '{name}'")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::shape(format!("Invalid value for header '{name}'")))?;
        base.insert(header_name, header_value);
    }
    Ok(())
}

pub fn is_json_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("application/json")
}

/// Parsed JSON for a JSON content type that parses, the raw text otherwise.
pub fn body_details(content_type: &str, text: &str) -> Value {
    if is_json_content_type(content_type) {
        if let Ok(parsed) = serde_json::from_str(text) {
            return parsed;
        }
    }
    Value::String(text.to_string())
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
