use std::path::PathBuf;

use serde_json::{Value, json};

/// Status the MetricsQL API answers with when a query would return more
/// data points than the server permits in one call.
pub const DATA_LIMIT_STATUS: u16 = 406;

/// What went wrong, decided once where the failure is produced.
///
/// Retry and shard policies branch on this instead of re-reading status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Credential exchange failed or returned an unusable token.
    Auth,
    /// Upstream rejected the query for exceeding its point limit (406).
    DataLimitExceeded,
    /// Any other non-2xx response.
    Http,
    /// Caller input that cannot be represented in a request.
    Shape,
    /// The request never produced an HTTP status (connect, timeout, body read).
    Transport,
}

impl ApiErrorKind {
    pub fn from_status(status: u16) -> Self {
        if status == DATA_LIMIT_STATUS {
            ApiErrorKind::DataLimitExceeded
        } else {
            ApiErrorKind::Http
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorKind::Auth => "auth_failed",
            ApiErrorKind::DataLimitExceeded => "data_limit_exceeded",
            ApiErrorKind::Http => "api_error",
            ApiErrorKind::Shape => "invalid_shape",
            ApiErrorKind::Transport => "connection_error",
        }
    }
}

/// Failure raised by the OpsRamp client.
///
/// `details` holds the upstream body verbatim: parsed JSON when the server
/// sent JSON, the raw text otherwise, `null` when there was no response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Value,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            details: Value::Null,
        }
    }

    pub fn auth(message: impl Into<String>, status_code: u16, details: Value) -> Self {
        Self {
            kind: ApiErrorKind::Auth,
            message: message.into(),
            status_code: Some(status_code),
            details,
        }
    }

    /// Error for a non-2xx response to `method path`.
    pub fn from_response(method: &str, path: &str, status_code: u16, details: Value) -> Self {
        Self {
            kind: ApiErrorKind::from_status(status_code),
            message: format!("OpsRamp API request failed: {method} {path} -> {status_code}"),
            status_code: Some(status_code),
            details,
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Shape, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transport, message)
    }

    pub fn is_data_limit(&self) -> bool {
        self.kind == ApiErrorKind::DataLimitExceeded
    }

    pub fn to_value(&self) -> Value {
        json!({
            "error": self.kind.as_str(),
            "message": self.message,
            "status_code": self.status_code,
            "details": self.details,
        })
    }
}

/// Configuration loading and lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "TOML config file not found. Searched: {}. Create config.toml (or pass an explicit path) and retry.",
        display_paths(.searched)
    )]
    NotFound { searched: Vec<PathBuf> },
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
    #[error("Unknown platform '{name}'. Available: {available}")]
    UnknownPlatform { name: String, available: String },
    #[error("Unknown tenant '{name}' on platform '{platform}'. Available: {available}")]
    UnknownTenant {
        name: String,
        platform: String,
        available: String,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
