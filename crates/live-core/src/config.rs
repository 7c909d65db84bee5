//! Configuration loading and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LiveError, Result};

/// Top-level configuration, read from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// WebSocket endpoint path.
    #[serde(default = "default_path")]
    pub path: String,

    /// Idle interval before a keep-alive ping, in milliseconds. Zero is
    /// clamped to 1 ms.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// Serve the embedded browser client alongside the endpoint.
    #[serde(default = "default_true")]
    pub assets: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            path: default_path(),
            keep_alive_ms: default_keep_alive_ms(),
            assets: true,
        }
    }
}

fn default_port() -> u16 {
    9292
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_path() -> String {
    "/live".into()
}

fn default_keep_alive_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-target log level overrides (e.g. "live_core::page=trace").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns with their environment values. Unset
/// variables become empty strings.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| LiveError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| LiveError::Config(e.to_string()))
    }

    /// Server settings, or the defaults when the section is absent.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn bind(&self) -> String {
        self.server
            .as_ref()
            .map(|s| s.bind.clone())
            .unwrap_or_else(default_bind)
    }

    pub fn live_path(&self) -> String {
        self.server
            .as_ref()
            .map(|s| s.path.clone())
            .unwrap_or_else(default_path)
    }

    /// Keep-alive interval, never shorter than 1 ms.
    pub fn keep_alive(&self) -> Duration {
        let ms = self
            .server
            .as_ref()
            .map(|s| s.keep_alive_ms)
            .unwrap_or_else(default_keep_alive_ms);
        Duration::from_millis(ms.max(1))
    }

    pub fn serve_assets(&self) -> bool {
        self.server.as_ref().is_none_or(|s| s.assets)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
            if !server.path.starts_with('/') {
                errors.push(format!("Live path must start with '/': {}", server.path));
            }
            if server.path == "/health" {
                errors.push("Live path conflicts with /health".to_string());
            }
            if server.bind.parse::<std::net::IpAddr>().is_err() {
                errors.push(format!("Invalid bind address: {}", server.bind));
            }
            if server.keep_alive_ms == 0 {
                warnings.push("keep_alive_ms is 0; pinging every millisecond".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown log format '{}', using plain",
                    logging.format
                ));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                warnings.push(format!(
                    "Unknown log output '{}', using stderr",
                    logging.output
                ));
            }
        }

        (warnings, errors)
    }

    /// Save config to a file as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
