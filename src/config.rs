//! Configuration management for the transfer pipeline
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timing knobs of the pipeline itself
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Quiet period before edited input is prepared
    pub debounce_ms: u64,
    /// Delay between two receipt polls
    pub confirmation_poll_interval_ms: u64,
    /// Give up on a submitted transaction after this long
    pub confirmation_timeout_secs: u64,
    /// Consecutive failed receipt polls tolerated before giving up
    pub max_consecutive_poll_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            confirmation_poll_interval_ms: 4_000,
            confirmation_timeout_secs: 600,
            max_consecutive_poll_failures: 3,
        }
    }
}

impl PipelineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_gas_price_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_gas_limit_buffer")]
    pub gas_limit_buffer_percent: u64,
    #[serde(default = "default_gas_price_buffer")]
    pub gas_price_buffer_percent: u64,
    /// Blocks a receipt must be buried under before it counts as included
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Name of the environment variable holding the signing key
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "TRANSFER_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Print the Prometheus text export when the binary exits
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

fn default_gas_price_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Eip1559
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_gas_limit_buffer() -> u64 {
    20
}

fn default_gas_price_buffer() -> u64 {
    10
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_send_timeout() -> u64 {
    30
}

impl Settings {
    /// Load settings from the file named by `TRANSFER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TRANSFER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.pipeline.confirmation_poll_interval_ms == 0 {
            anyhow::bail!("confirmation_poll_interval_ms must be positive");
        }

        if self.pipeline.confirmation_timeout_secs == 0 {
            anyhow::bail!("confirmation_timeout_secs must be positive");
        }

        if self.pipeline.max_consecutive_poll_failures == 0 {
            anyhow::bail!("max_consecutive_poll_failures must be at least 1");
        }

        if self.chain.confirmation_blocks == 0 {
            tracing::warn!(
                "Chain {} requires 0 confirmations - treating as 1",
                self.chain.name
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures<'_>| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
