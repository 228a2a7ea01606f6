use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;

/// Tenant-level settings under a platform.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantConfig {
    pub name: String,
    pub id: String,
    pub additional_headers: BTreeMap<String, String>,
}

/// One OpsRamp instance and the OAuth client used against it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub name: String,
    pub api_base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub verify_tls: bool,
    pub timeout_seconds: f64,
    pub default_tenant: String,
    pub tenants: BTreeMap<String, TenantConfig>,
}

impl PlatformConfig {
    /// Resolve a tenant alias, falling back to `default_tenant`.
    pub fn tenant(&self, name: Option<&str>) -> Result<&TenantConfig, ConfigError> {
        let tenant_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_tenant.trim());
        if tenant_name.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Platform '{}' has no default_tenant. Provide a tenant alias explicitly.",
                self.name
            )));
        }
        self.tenants
            .get(tenant_name)
            .ok_or_else(|| ConfigError::UnknownTenant {
                name: tenant_name.to_string(),
                platform: self.name.clone(),
                available: available_names(self.tenants.keys()),
            })
    }

    /// An explicit tenant id wins over alias resolution.
    pub fn resolve_tenant_id(
        &self,
        tenant: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Result<String, ConfigError> {
        if let Some(id) = tenant_id.map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        Ok(self.tenant(tenant)?.id.clone())
    }

    /// Tenant headers first, caller headers on top.
    pub fn resolve_headers(
        &self,
        tenant: Option<&str>,
        extra: &BTreeMap<String, String>,
    ) -> Result<Vec<(String, String)>, ConfigError> {
        let mut merged = BTreeMap::new();
        let tenant_name = tenant
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_tenant.trim());
        if !tenant_name.is_empty() {
            for (k, v) in &self.tenant(Some(tenant_name))?.additional_headers {
                merged.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in extra {
            merged.insert(k.clone(), v.clone());
        }
        Ok(merged.into_iter().collect())
    }
}

/// Top-level configuration holding every platform.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub default_platform: String,
    pub platforms: BTreeMap<String, PlatformConfig>,
    pub config_path: String,
    pub config_hash: String,
}

impl AppConfig {
    pub fn platform(&self, name: Option<&str>) -> Result<&PlatformConfig, ConfigError> {
        let platform_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_platform.trim());
        if platform_name.is_empty() {
            return Err(ConfigError::Invalid(
                "No platform specified and no default_platform configured".to_string(),
            ));
        }
        self.platforms
            .get(platform_name)
            .ok_or_else(|| ConfigError::UnknownPlatform {
                name: platform_name.to_string(),
                available: available_names(self.platforms.keys()),
            })
    }

    /// Parse TOML text. `config_path` and `config_hash` are left to the caller.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.platforms.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "No [platforms] configured in TOML: {}",
                path.display()
            )));
        }

        let mut platforms = BTreeMap::new();
        for (name, info) in raw.platforms {
            let platform = parse_platform(&name, info)?;
            platforms.insert(name, platform);
        }

        let mut default_platform = raw.default_platform.unwrap_or_default().trim().to_string();
        if default_platform.is_empty() {
            default_platform = platforms.keys().next().cloned().unwrap_or_default();
        }
        if !platforms.contains_key(&default_platform) {
            return Err(ConfigError::Invalid(format!(
                "default_platform '{default_platform}' not found in [platforms]"
            )));
        }

        Ok(Self {
            default_platform,
            platforms,
            config_path: String::new(),
            config_hash: String::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    default_platform: Option<String>,
    #[serde(default)]
    platforms: BTreeMap<String, RawPlatform>,
}

#[derive(Debug, Deserialize)]
struct RawPlatform {
    #[serde(default)]
    api_base_url: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    verify_tls: Option<Flag>,
    timeout_seconds: Option<f64>,
    #[serde(default)]
    default_tenant: String,
    #[serde(default)]
    tenants: BTreeMap<String, RawTenant>,
}

#[derive(Debug, Deserialize)]
struct RawTenant {
    #[serde(default)]
    id: String,
    #[serde(default)]
    additional_headers: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn as_bool(&self) -> bool {
        match self {
            Flag::Bool(v) => *v,
            Flag::Text(raw) => matches!(
                raw.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            ),
        }
    }
}

fn parse_platform(name: &str, info: RawPlatform) -> Result<PlatformConfig, ConfigError> {
    let api_base_url = info.api_base_url.trim().trim_end_matches('/').to_string();
    let client_id = info.client_id.trim().to_string();
    let client_secret = info.client_secret.trim().to_string();
    for (key, value) in [
        ("api_base_url", &api_base_url),
        ("client_id", &client_id),
        ("client_secret", &client_secret),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "platforms.{name}.{key} is required"
            )));
        }
    }

    let timeout_seconds = info.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    if !timeout_seconds.is_finite() || timeout_seconds <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "platforms.{name}.timeout_seconds must be a positive number"
        )));
    }

    let mut tenants = BTreeMap::new();
    for (tenant_name, tenant) in info.tenants {
        let id = tenant.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "platforms.{name}.tenants.{tenant_name}.id is required"
            )));
        }
        let additional_headers = tenant
            .additional_headers
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();
        tenants.insert(
            tenant_name.clone(),
            TenantConfig {
                name: tenant_name,
                id,
                additional_headers,
            },
        );
    }

    Ok(PlatformConfig {
        name: name.to_string(),
        api_base_url,
        client_id,
        client_secret,
        verify_tls: info.verify_tls.as_ref().is_none_or(Flag::as_bool),
        timeout_seconds,
        default_tenant: info.default_tenant.trim().to_string(),
        tenants,
    })
}

fn available_names<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let joined = names.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}

/// Paths tried in order when no explicit path resolves.
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![expand_home(path)];
    }
    let mut paths = vec![PathBuf::from("opsramp.toml"), PathBuf::from("config.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("opsramp-mcp").join("config.toml"));
    }
    paths
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Load configuration.
///
/// Search order:
/// 1. explicit path
/// 2. `./opsramp.toml`
/// 3. `./config.toml`
/// 4. `~/.config/opsramp-mcp/config.toml`
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let searched = candidate_paths(explicit);
    let path = searched
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound {
            searched: searched.clone(),
        })?;

    let content = std::fs::read(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let text = String::from_utf8_lossy(&content);

    let mut config = AppConfig::from_toml_str(&text, &path)?;
    config.config_hash = hex::encode(Sha256::digest(&content));
    config.config_path = path
        .canonicalize()
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_platform = "prod"

[platforms.prod]
api_base_url = "https://acme.api.opsramp.com/"
client_id = "cid"
client_secret = "secret"
default_tenant = "main"

[platforms.prod.tenants.main]
id = "client_123"
additional_headers = { "X-Scope" = "ops", "X-Retry" = 3 }

[platforms.prod.tenants.edge]
id = "client_456"

[platforms.staging]
api_base_url = "https://staging.api.opsramp.com"
client_id = "cid2"
client_secret = "secret2"
verify_tls = "no"
timeout_seconds = 5
"#;

    fn sample() -> AppConfig {
        AppConfig::from_toml_str(SAMPLE, Path::new("sample.toml")).unwrap()
    }

    #[test]
    fn parses_platforms_and_tenants() {
        let config = sample();
        assert_eq!(config.default_platform, "prod");

        let prod = config.platform(None).unwrap();
        assert_eq!(prod.api_base_url, "https://acme.api.opsramp.com");
        assert!(prod.verify_tls);
        assert_eq!(prod.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(prod.tenants.len(), 2);
        assert_eq!(prod.tenants["main"].additional_headers["X-Retry"], "3");

        let staging = config.platform(Some("staging")).unwrap();
        assert!(!staging.verify_tls);
        assert_eq!(staging.timeout_seconds, 5.0);
    }

    #[test]
    fn default_platform_falls_back_to_first_by_name() {
        let raw = SAMPLE.replace("default_platform = \"prod\"", "");
        let config = AppConfig::from_toml_str(&raw, Path::new("x.toml")).unwrap();
        assert_eq!(config.default_platform, "prod");
    }

    #[test]
    fn missing_required_key_names_dotted_path() {
        let raw = r#"
[platforms.prod]
api_base_url = "https://x"
client_id = "cid"
"#;
        let err = AppConfig::from_toml_str(raw, Path::new("x.toml")).unwrap_err();
        assert_eq!(err.to_string(), "platforms.prod.client_secret is required");
    }

    #[test]
    fn tenant_without_id_is_rejected() {
        let raw = r#"
[platforms.prod]
api_base_url = "https://x"
client_id = "cid"
client_secret = "s"

[platforms.prod.tenants.main]
additional_headers = {}
"#;
        let err = AppConfig::from_toml_str(raw, Path::new("x.toml")).unwrap_err();
        assert_eq!(err.to_string(), "platforms.prod.tenants.main.id is required");
    }

    #[test]
    fn unknown_default_platform_is_rejected() {
        let raw = SAMPLE.replace("default_platform = \"prod\"", "default_platform = \"dev\"");
        let err = AppConfig::from_toml_str(&raw, Path::new("x.toml")).unwrap_err();
        assert!(err.to_string().contains("default_platform 'dev'"));
    }

    #[test]
    fn unknown_platform_lists_available() {
        let err = sample().platform(Some("qa")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown platform 'qa'. Available: prod, staging"
        );
    }

    #[test]
    fn tenant_resolution_prefers_explicit_id() {
        let config = sample();
        let prod = config.platform(Some("prod")).unwrap();
        assert_eq!(prod.resolve_tenant_id(None, None).unwrap(), "client_123");
        assert_eq!(prod.resolve_tenant_id(Some("edge"), None).unwrap(), "client_456");
        assert_eq!(
            prod.resolve_tenant_id(Some("edge"), Some(" client_999 ")).unwrap(),
            "client_999"
        );
        assert!(prod.resolve_tenant_id(Some("nope"), Some("  ")).is_err());

        let staging = config.platform(Some("staging")).unwrap();
        let err = staging.resolve_tenant_id(None, None).unwrap_err();
        assert!(err.to_string().contains("has no default_tenant"));
    }

    #[test]
    fn caller_headers_override_tenant_headers() {
        let config = sample();
        let prod = config.platform(None).unwrap();
        let extra = BTreeMap::from([
            ("X-Scope".to_string(), "caller".to_string()),
            ("X-Trace".to_string(), "1".to_string()),
        ]);
        let headers = prod.resolve_headers(None, &extra).unwrap();
        assert_eq!(
            headers,
            vec![
                ("X-Retry".to_string(), "3".to_string()),
                ("X-Scope".to_string(), "caller".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ]
        );

        let staging = config.platform(Some("staging")).unwrap();
        assert!(staging.resolve_headers(None, &BTreeMap::new()).unwrap().is_empty());
    }

    #[test]
    fn load_config_hashes_file_content() {
        let dir = std::env::temp_dir().join(format!("opsramp-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("opsramp.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.config_hash, hex::encode(Sha256::digest(SAMPLE.as_bytes())));
        assert!(config.config_path.ends_with("opsramp.toml"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_config_reports_searched_paths() {
        let missing = PathBuf::from("/nonexistent/opsramp-mcp/config.toml");
        match load_config(Some(&missing)) {
            Err(ConfigError::NotFound { searched }) => assert_eq!(searched, vec![missing]),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
