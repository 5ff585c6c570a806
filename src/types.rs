use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `masterKey` from the config file.
pub const MASTER_KEY_ENV: &str = "OPSDASH_MASTER_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write config: {0}")]
    Write(std::io::Error),

    #[error("No master key configured. Set OPSDASH_MASTER_KEY or masterKey in config.json")]
    MissingMasterKey,
}

/// Configuration stored in ~/.opsdash/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Defaults to ~/.opsdash/opsdash.db.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    /// Base64 or hex 32-byte key sealing integration settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    /// Minutes a finished job stays in the live progress registry.
    #[serde(default = "default_progress_ttl_minutes")]
    pub progress_ttl_minutes: u64,
    /// Per-provider overrides of the built-in rate limits.
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitSetting>,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_progress_ttl_minutes() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            master_key: None,
            progress_ttl_minutes: default_progress_ttl_minutes(),
            rate_limits: HashMap::new(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    /// The master key, preferring the environment over the file.
    pub fn resolved_master_key(&self) -> Result<String, ConfigError> {
        std::env::var(MASTER_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.master_key.clone())
            .ok_or(ConfigError::MissingMasterKey)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSetting {
    pub requests: u32,
    pub window_secs: f64,
}

/// Where each provider lives and, for OAuth providers, the app credentials
/// used to refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEndpoint {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default = "default_harvest")]
    pub harvest: ProviderEndpoint,
    #[serde(default = "default_hubspot")]
    pub hubspot: ProviderEndpoint,
    #[serde(default = "default_sheets")]
    pub sheets: ProviderEndpoint,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            harvest: default_harvest(),
            hubspot: default_hubspot(),
            sheets: default_sheets(),
        }
    }
}

fn default_harvest() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.harvestapp.com".to_string(),
        token_url: None,
        client_id: None,
        client_secret: None,
    }
}

fn default_hubspot() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.hubapi.com".to_string(),
        token_url: Some("https://api.hubapi.com/oauth/v1/token".to_string()),
        client_id: None,
        client_secret: None,
    }
}

fn default_sheets() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://sheets.googleapis.com".to_string(),
        token_url: Some("https://oauth2.googleapis.com/token".to_string()),
        client_id: None,
        client_secret: None,
    }
}

/// Get the canonical config file path (~/.opsdash/config.json)
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".opsdash").join("config.json"))
}

/// Load configuration from ~/.opsdash/config.json, or defaults when the
/// file does not exist.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the config back, creating ~/.opsdash if needed.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ConfigError::Write)?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Write(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(path, json).map_err(ConfigError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.progress_ttl_minutes, 5);
        assert_eq!(config.providers.hubspot.base_url, "https://api.hubapi.com");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "progressTtlMinutes": 10,
                "rateLimits": { "harvest": { "requests": 50, "windowSecs": 15 } },
                "providers": { "sheets": { "baseUrl": "http://localhost:9000", "clientId": "cid" } }
            }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.progress_ttl_minutes, 10);
        assert_eq!(config.rate_limits["harvest"].requests, 50);
        assert_eq!(config.providers.sheets.base_url, "http://localhost:9000");
        assert_eq!(config.providers.sheets.client_id.as_deref(), Some("cid"));
        assert_eq!(config.providers.harvest.base_url, "https://api.harvestapp.com");
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.master_key = Some("k".into());
        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path).unwrap().master_key.as_deref(), Some("k"));
    }
}
