//! Client configuration: where to send chat requests and how long to wait.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RegenError;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api/chat";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Chat endpoint that accepts `POST {messages}` and streams frames back.
    pub endpoint: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Overall per-request timeout. `None` lets long answers stream freely.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Create a config with sensible defaults.
    ///
    /// - connect_timeout: 5 s
    /// - request_timeout: none
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Parse a TOML document. Missing keys fall back to the defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, RegenError> {
        let file: ConfigFile =
            toml::from_str(s).map_err(|e| RegenError::Config { detail: e.to_string() })?;
        Ok(file.into_config())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegenError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|e| RegenError::Config {
            detail: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&s)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// On-disk shape of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    endpoint: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig::new(self.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()));
        if let Some(secs) = self.connect_timeout_secs {
            config = config.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.request_timeout(Duration::from_secs(secs));
        }
        config
    }
}
