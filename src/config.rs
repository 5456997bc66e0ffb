use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;
use serde::Deserialize;

use crate::transport::http::HttpSettings;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
pub const DEFAULT_ANALYTICS_URL: &str = "http://localhost:5001";

/// Ticks must land inside every minute or whole minutes go unmatched.
pub const MAX_TICK_INTERVAL_MS: u64 = 59_999;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub backend_url: String,
    pub analytics_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            analytics_url: DEFAULT_ANALYTICS_URL.to_string(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend_url: Option<String>,
    pub analytics_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(url) = overrides.backend_url {
            self.backend_url = url;
        }
        if let Some(url) = overrides.analytics_url {
            self.analytics_url = url;
        }
        if let Some(timeout) = overrides.request_timeout_ms {
            self.request_timeout_ms = timeout;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn backend_http(&self) -> HttpSettings {
        self.http_settings(&self.backend_url)
    }

    pub fn analytics_http(&self) -> HttpSettings {
        self.http_settings(&self.analytics_url)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn http_settings(&self, base_url: &str) -> HttpSettings {
        HttpSettings {
            base_url: base_url.to_string(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_url("backend_url", &self.backend_url)?;
        validate_url("analytics_url", &self.analytics_url)?;
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            bail!(
                "tick_interval_ms {} is too long; it must be below one minute",
                self.tick_interval_ms
            );
        }
        Ok(())
    }
}

/// A missing file is not an error: the defaults point at a backend on localhost.
pub fn load_client_config(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        debug!("{} not found, using default configuration", path.display());
        return Ok(ClientConfig::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    parse_client_config_text(&content)
}

pub fn parse_client_config_text(content: &str) -> Result<ClientConfig> {
    let raw = serde_json::from_str::<ClientConfigFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported config version {}; expected version 1",
            raw.version
        );
    }

    let config = ClientConfig {
        backend_url: raw.backend_url,
        analytics_url: raw.analytics_url,
        request_timeout_ms: raw.request_timeout_ms,
        connect_timeout_ms: raw.connect_timeout_ms,
        tick_interval_ms: raw.tick_interval_ms,
    };
    config.validate()?;
    Ok(config)
}

fn validate_url(name: &str, url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        bail!("{name} must not be empty");
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        bail!("{name} '{trimmed}' must start with http:// or https://");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientConfigFile {
    version: u32,
    #[serde(default = "default_backend_url")]
    backend_url: String,
    #[serde(default = "default_analytics_url")]
    analytics_url: String,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    tick_interval_ms: u64,
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_analytics_url() -> String {
    DEFAULT_ANALYTICS_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}
