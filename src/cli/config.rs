use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::channel::transport::{http_to_ws_url, StreamEndpoint};

/// Environment variable overriding `service.base_url`
pub const SERVICE_URL_ENV: &str = "SEARCH_SERVICE_URL";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub service: ServiceSettings,
    pub search: SearchSettings,
    pub reconnect: ReconnectSettings,
}

/// Where the task-launching and task-execution services live
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceSettings {
    /// HTTP base; tasks are created with `POST {base_url}/search`
    pub base_url: String,

    /// WebSocket base; derived from `base_url` when absent
    pub stream_url: Option<String>,

    pub request_timeout_secs: u64,
}

/// Options sent with every task-creation request
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub max_results: u32,
    pub use_ai_analysis: bool,
}

/// Reconnect policy for the progress channel
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64, // attempt n waits n * base_delay_ms
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            stream_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 20,
            use_ai_analysis: true,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
        }
    }
}

impl SearchConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "super-search", "super-search") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.yaml")
    }

    /// Load the configuration.
    ///
    /// An explicit path must exist; the default path falls back to built-in
    /// defaults when missing. `SEARCH_SERVICE_URL` is applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    info!("No configuration at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };

        let config = config.with_service_url(std::env::var(SERVICE_URL_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Replace the service base URL when an override is present
    pub fn with_service_url(mut self, base_url: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|u| !u.trim().is_empty()) {
            debug!("Service URL overridden to {}", base_url);
            self.service.base_url = base_url;
        }
        self
    }

    /// Check the URLs and limits before anything connects
    pub fn validate(&self) -> Result<()> {
        self.service_url()?;
        self.stream_endpoint()?;
        if self.search.max_results == 0 {
            anyhow::bail!("search.max_results must be at least 1");
        }
        Ok(())
    }

    /// Parsed HTTP base of the task-launching service
    pub fn service_url(&self) -> Result<Url> {
        let url = Url::parse(&self.service.base_url)
            .context(format!("Invalid service.base_url: {}", self.service.base_url))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => anyhow::bail!("service.base_url must be http or https, got '{}'", other),
        }
    }

    /// Base of the progress channel
    pub fn stream_endpoint(&self) -> Result<StreamEndpoint> {
        let url = match &self.service.stream_url {
            Some(stream_url) => Url::parse(stream_url)
                .context(format!("Invalid service.stream_url: {}", stream_url))?,
            None => http_to_ws_url(&self.service_url()?),
        };
        match url.scheme() {
            "ws" | "wss" => Ok(StreamEndpoint::new(url)),
            other => anyhow::bail!("service.stream_url must be ws or wss, got '{}'", other),
        }
    }
}
