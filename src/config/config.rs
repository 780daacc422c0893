//! Configuration loading
//!
//! Settings come from an optional TOML file and the process environment
//! (`.env` included). Environment variables win over the file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "GRAPH_MCP_CONFIG";

/// Config file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "defender-graph-mcp.toml";

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Configuration errors. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Raw configuration as it appears in the TOML file
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub azure: AzureSection,
    pub graph: GraphSection,
    pub hunting: HuntingSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AzureSection {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authority_host: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub base_url: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct HuntingSection {
    pub max_lookback_days: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub poll_timeout_secs: Option<u64>,
    pub max_display_rows: Option<usize>,
}

/// Validated configuration used by the running server
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: String,
    pub graph_base_url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub request_timeout: Duration,
    pub max_pages: usize,
    pub max_lookback_days: u32,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_display_rows: usize,
}

impl Config {
    /// Load `.env`, the config file (if any) and environment overrides
    pub fn load_default() -> Result<Self, ConfigError> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let mut config = match Self::default_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Read a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay environment variables on top of file values
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("AZURE_TENANT_ID") {
            self.azure.tenant_id = Some(v);
        }
        if let Some(v) = non_empty("AZURE_CLIENT_ID") {
            self.azure.client_id = Some(v);
        }
        if let Some(v) = non_empty("AZURE_CLIENT_SECRET") {
            self.azure.client_secret = Some(v);
        }
        if let Some(v) = non_empty("AZURE_AUTHORITY_HOST") {
            self.azure.authority_host = Some(v);
        }
        if let Some(v) = non_empty("GRAPH_BASE_URL") {
            self.graph.base_url = Some(v);
        }
    }

    /// Validate and fill in defaults
    pub fn to_runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        let required = |value: &Option<String>, name: &'static str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or(ConfigError::Missing(name))
        };

        let tenant_id = required(&self.azure.tenant_id, "AZURE_TENANT_ID")?;
        let client_id = required(&self.azure.client_id, "AZURE_CLIENT_ID")?;
        let client_secret = required(&self.azure.client_secret, "AZURE_CLIENT_SECRET")?;

        let graph_base_url = self
            .graph
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string());
        if !graph_base_url.starts_with("http://") && !graph_base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "graph.base_url",
                message: format!("'{}' is not an http(s) URL", graph_base_url),
            });
        }

        let max_retries = self.graph.max_retries.unwrap_or(3);
        if max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "graph.max_retries",
                message: "must be at least 1".to_string(),
            });
        }

        let max_pages = self.graph.max_pages.unwrap_or(10);
        if max_pages == 0 {
            return Err(ConfigError::Invalid {
                key: "graph.max_pages",
                message: "must be at least 1".to_string(),
            });
        }

        let max_lookback_days = self.hunting.max_lookback_days.unwrap_or(30);
        if max_lookback_days == 0 {
            return Err(ConfigError::Invalid {
                key: "hunting.max_lookback_days",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(RuntimeConfig {
            tenant_id,
            client_id,
            client_secret,
            authority_host: self
                .azure
                .authority_host
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            graph_base_url,
            max_retries,
            retry_delay_ms: self.graph.retry_delay_ms.unwrap_or(2000),
            max_retry_delay_ms: self.graph.max_retry_delay_ms.unwrap_or(60_000),
            request_timeout: Duration::from_secs(self.graph.request_timeout_secs.unwrap_or(120)),
            max_pages,
            max_lookback_days,
            poll_interval: Duration::from_millis(self.hunting.poll_interval_ms.unwrap_or(2000)),
            poll_timeout: Duration::from_secs(self.hunting.poll_timeout_secs.unwrap_or(120)),
            max_display_rows: self.hunting.max_display_rows.unwrap_or(100),
        })
    }
}
