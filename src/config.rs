//! Configuration management for the order coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default staleness threshold for queued orders (milliseconds)
pub const DEFAULT_STALENESS_THRESHOLD_MS: u64 = 30_000;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    /// Absent selects the in-memory ledger
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,
    /// Upper bound on the prerequisite wait. Unset waits indefinitely.
    pub max_prerequisite_wait_secs: Option<u64>,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Extra headers sent with every order post
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub confirmation_blocks: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    pub enabled: bool,
}

fn default_staleness_threshold_ms() -> u64 {
    DEFAULT_STALENESS_THRESHOLD_MS
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

impl CoordinatorConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn max_prerequisite_wait(&self) -> Option<Duration> {
        self.max_prerequisite_wait_secs.map(Duration::from_secs)
    }
}

impl Settings {
    /// Load settings from the file named by `ORDER_COORDINATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORDER_COORDINATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.coordinator.staleness_threshold_ms == 0 {
            anyhow::bail!("coordinator.staleness_threshold_ms must be greater than zero");
        }

        if self.submission.base_url.trim().is_empty() {
            anyhow::bail!("submission.base_url must be set");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        if self.enabled_chains().is_empty() {
            tracing::warn!("No chains enabled - prerequisites must be resolved through the API");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [coordinator]
        staleness_threshold_ms = 45000

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090

        [submission]
        base_url = "https://orders.example.com/v1"
    "#;

    /// Settings with no database and no chains
    pub(crate) fn minimal_settings() -> Settings {
        Settings::parse(MINIMAL).unwrap()
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("ORDER_COORDINATOR_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${ORDER_COORDINATOR_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings = minimal_settings();
        assert!(settings.database.is_none());
        assert!(settings.chains.is_empty());
        assert_eq!(
            settings.coordinator.staleness_threshold(),
            Duration::from_secs(45)
        );
        assert_eq!(settings.coordinator.max_prerequisite_wait(), None);
        assert_eq!(settings.submission.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_zero_staleness_rejected() {
        let raw = MINIMAL.replace("45000", "0");
        assert!(Settings::parse(&raw).is_err());
    }

    #[test]
    fn test_enabled_chain_requires_rpc() {
        let raw = format!(
            "{}\n[chains.mainnet]\nchain_id = 1\nname = \"mainnet\"\nrpc_urls = []\nconfirmation_blocks = 1\nenabled = true\n",
            MINIMAL
        );
        assert!(Settings::parse(&raw).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.api.port, 8080);
        assert_eq!(settings.submission.base_url, "https://orders.example.com/v1");
    }
}
