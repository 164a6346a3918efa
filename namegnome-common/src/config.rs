//! Configuration loading and cache path resolution
//!
//! Layered resolution, highest priority first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file (`~/.config/namegnome/config.toml`)
//! 4. Compiled default
//!
//! Provider API keys come from the environment only and are never logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// TOML configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub cache_path: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    #[serde(default)]
    pub providers: ProviderTunables,
}

/// Per-provider retry and rate-limit tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTunables {
    /// Maximum retry attempts for transient failures
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds; attempt k waits `base * 2^k`
    pub backoff_base_ms: u64,
    /// Token bucket capacity
    pub bucket_capacity: u32,
    /// Token bucket refill rate, tokens per second
    pub bucket_refill_per_sec: f64,
    /// Per-call timeout in seconds
    pub call_timeout_secs: u64,
}

impl Default for ProviderTunables {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            bucket_capacity: 10,
            bucket_refill_per_sec: 0.67,
            call_timeout_secs: 10,
        }
    }
}

/// Resolved runtime configuration shared by the server and the CLI.
///
/// Passed by reference into the pipeline; the cache pool and provider
/// registry are the only process-wide singletons.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache_path: PathBuf,
    pub bind_address: String,
    pub offline: bool,
    pub debug_paths: bool,
    pub ollama_url: String,
    pub ollama_model: String,
    pub providers: ProviderTunables,
    pub llm_timeout: Duration,
    pub lock_timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI argument, environment, and TOML file.
    pub fn resolve(cache_path_arg: Option<&str>, offline: bool) -> Result<Self> {
        let toml_config = load_toml_config().unwrap_or_default();

        let cache_path = resolve_cache_path(cache_path_arg, &toml_config);

        let debug_paths = std::env::var("NAMEGNOME_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let ollama_url = std::env::var("OLLAMA_BASE_URL")
            .ok()
            .or_else(|| toml_config.ollama_url.clone())
            .unwrap_or_else(|| "http://127.0.0.1:11434".to_string());

        let ollama_model = std::env::var("OLLAMA_MODEL")
            .ok()
            .or_else(|| toml_config.ollama_model.clone())
            .unwrap_or_else(|| "llama3.2".to_string());

        let bind_address = toml_config
            .bind_address
            .clone()
            .unwrap_or_else(|| "127.0.0.1:8410".to_string());

        Ok(Self {
            cache_path,
            bind_address,
            offline,
            debug_paths,
            ollama_url,
            ollama_model,
            providers: toml_config.providers,
            llm_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
        })
    }

    /// Render a path for log output; redacted unless `NAMEGNOME_DEBUG=1`.
    pub fn display_path(&self, path: &std::path::Path) -> String {
        if self.debug_paths {
            path.display().to_string()
        } else {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "<redacted>".to_string())
        }
    }

    /// Required provider API keys; missing keys are a startup failure.
    pub fn require_api_key(env_var: &str) -> Result<String> {
        std::env::var(env_var).map_err(|_| {
            Error::Config(format!(
                "{} not set. Provider API keys must come from the environment.",
                env_var
            ))
        })
    }
}

/// Cache DB path: CLI arg, then `NAMEGNOME_CACHE_PATH`, then TOML, then
/// `./.cache/namegnome.db`.
pub fn resolve_cache_path(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("NAMEGNOME_CACHE_PATH") {
        return PathBuf::from(path);
    }
    if let Some(path) = &toml_config.cache_path {
        return path.clone();
    }
    PathBuf::from(".cache").join("namegnome.db")
}

fn load_toml_config() -> Option<TomlConfig> {
    let path = dirs::config_dir()?.join("namegnome").join("config.toml");
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Ignoring malformed config file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_prefers_cli_arg() {
        let toml = TomlConfig {
            cache_path: Some(PathBuf::from("/from/toml.db")),
            ..Default::default()
        };
        assert_eq!(
            resolve_cache_path(Some("/from/cli.db"), &toml),
            PathBuf::from("/from/cli.db")
        );
    }

    #[test]
    fn cache_path_falls_back_to_toml_then_default() {
        let toml = TomlConfig {
            cache_path: Some(PathBuf::from("/from/toml.db")),
            ..Default::default()
        };
        // Only meaningful when the env var is absent in the test environment.
        if std::env::var("NAMEGNOME_CACHE_PATH").is_err() {
            assert_eq!(resolve_cache_path(None, &toml), PathBuf::from("/from/toml.db"));
            assert_eq!(
                resolve_cache_path(None, &TomlConfig::default()),
                PathBuf::from(".cache/namegnome.db")
            );
        }
    }

    #[test]
    fn provider_tunables_defaults() {
        let t = ProviderTunables::default();
        assert_eq!(t.max_attempts, 3);
        assert!(t.bucket_capacity > 0);
    }
}
