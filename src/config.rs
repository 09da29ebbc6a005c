use crate::extensions::BUILTIN_NAMES;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MIN_WINDOW_MS: u64 = 1000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(default = "default_window_ms")]
    pub cpu_window_ms: u64,
    #[serde(default = "default_disk_io")]
    pub disk_io: bool,
    #[serde(default = "default_window_ms")]
    pub disk_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cpu_window_ms: default_window_ms(),
            disk_io: default_disk_io(),
            disk_window_ms: default_window_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl SamplingConfig {
    pub fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.cpu_window_ms)
    }

    pub fn disk_io_window(&self) -> Option<Duration> {
        self.disk_io
            .then(|| Duration::from_millis(self.disk_window_ms))
    }
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
    #[error("API secret is not set: export {env} or set api_secret in the config file")]
    MissingSecret { env: String },
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;
        Self::from_yaml(&text, path_display)
    }

    fn from_yaml(text: &str, path: String) -> Result<Self, ConfigError> {
        let cfg: Config =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse { path, source })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a host:port socket address".to_string(),
            ));
        }
        validate_sampling(&self.sampling)?;
        validate_stream(&self.stream)?;
        validate_extensions(&self.extensions)?;
        Ok(())
    }

    /// The environment variable named by `api_secret_env` wins over the file value.
    pub fn resolve_api_secret(&self) -> Result<String, ConfigError> {
        let from_env = std::env::var(&self.api_secret_env)
            .ok()
            .filter(|v| !v.trim().is_empty());
        let from_file = self
            .api_secret
            .clone()
            .filter(|v| !v.trim().is_empty());
        from_env
            .or(from_file)
            .ok_or_else(|| ConfigError::MissingSecret {
                env: self.api_secret_env.clone(),
            })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        SocketAddr::from_str(&self.listen)
            .map_err(|err| ConfigError::Validation(format!("listen: {err}")))
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_sampling(cfg: &SamplingConfig) -> Result<(), ConfigError> {
    if cfg.cpu_window_ms < MIN_WINDOW_MS {
        return Err(ConfigError::Validation(format!(
            "sampling.cpu_window_ms must be >= {MIN_WINDOW_MS}"
        )));
    }
    if cfg.disk_io && cfg.disk_window_ms < MIN_WINDOW_MS {
        return Err(ConfigError::Validation(format!(
            "sampling.disk_window_ms must be >= {MIN_WINDOW_MS}"
        )));
    }
    Ok(())
}

fn validate_stream(cfg: &StreamConfig) -> Result<(), ConfigError> {
    if cfg.interval_secs < 1 {
        return Err(ConfigError::Validation(
            "stream.interval_secs must be >= 1".to_string(),
        ));
    }
    if cfg.allowed_origins.is_empty() {
        return Err(ConfigError::Validation(
            "stream.allowed_origins must not be empty; use \"*\" to allow any origin".to_string(),
        ));
    }
    if cfg.allowed_origins.iter().any(|o| o.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "stream.allowed_origins must not contain empty entries".to_string(),
        ));
    }
    Ok(())
}

fn validate_extensions(names: &[String]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !BUILTIN_NAMES.contains(&name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown extension '{name}', expected one of {}",
                BUILTIN_NAMES.join(", ")
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "extension '{name}' is listed more than once"
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:42000".to_string()
}

fn default_api_secret_env() -> String {
    "API_SECRET".to_string()
}

const fn default_window_ms() -> u64 {
    1000
}

const fn default_disk_io() -> bool {
    true
}

const fn default_interval_secs() -> u64 {
    2
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_extensions() -> Vec<String> {
    vec!["loadavg".to_string()]
}
