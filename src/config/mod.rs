//! Configuration management for PriceFeeder
//!
//! Loads from TOML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Providers to poll (binance, coinbase)
    pub providers: Vec<String>,
    /// Base symbols subscribed at startup
    pub symbols: Vec<String>,
    /// Stable quotes each base symbol is paired with
    pub stable_quotes: Vec<String>,
    /// Tick period in milliseconds
    pub tick_period_ms: u64,
    /// Available pairs reload period in seconds
    pub available_pairs_reload_secs: u64,
    /// Deviation threshold in standard deviations
    pub deviation_threshold: f64,
    /// Provider request timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// How often the binary logs the canonical prices, in seconds
    pub interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEFEEDER_*)
            .add_source(
                Environment::with_prefix("PRICEFEEDER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("oracle.providers")
                    .with_list_parse_key("oracle.symbols")
                    .with_list_parse_key("oracle.stable_quotes")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Builder pre-populated with every default
    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            // Oracle defaults
            .set_default("oracle.providers", vec!["binance", "coinbase"])?
            .set_default("oracle.symbols", vec!["ATOM", "ETH"])?
            .set_default("oracle.stable_quotes", vec!["USD", "USDT", "UST"])?
            .set_default("oracle.tick_period_ms", 1000)?
            .set_default("oracle.available_pairs_reload_secs", 86400)?
            .set_default("oracle.deviation_threshold", 2.0)?
            .set_default("oracle.request_timeout_ms", 5000)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Report defaults
            .set_default("report.interval_secs", 30)?)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "providers={:?} symbols={:?} quotes={:?} tick_ms={} reload_secs={} threshold={}",
            self.oracle.providers,
            self.oracle.symbols,
            self.oracle.stable_quotes,
            self.oracle.tick_period_ms,
            self.oracle.available_pairs_reload_secs,
            self.oracle.deviation_threshold
        )
    }
}

impl OracleConfig {
    /// Validate and convert into runtime settings
    pub fn settings(&self) -> Result<OracleSettings> {
        if self.providers.is_empty() {
            bail!("oracle.providers must name at least one provider");
        }
        if self.stable_quotes.is_empty() {
            bail!("oracle.stable_quotes must not be empty");
        }
        if self.tick_period_ms == 0 {
            bail!("oracle.tick_period_ms must be greater than zero");
        }
        if self.available_pairs_reload_secs == 0 {
            bail!("oracle.available_pairs_reload_secs must be greater than zero");
        }
        if !self.deviation_threshold.is_finite() || self.deviation_threshold <= 0.0 {
            bail!(
                "oracle.deviation_threshold must be a positive number, got {}",
                self.deviation_threshold
            );
        }

        let deviation_threshold = Decimal::try_from(self.deviation_threshold)
            .context("oracle.deviation_threshold is not representable as a decimal")?;

        Ok(OracleSettings {
            providers: self.providers.iter().map(|p| p.trim().to_lowercase()).collect(),
            tick_period: Duration::from_millis(self.tick_period_ms),
            available_pairs_reload: Duration::from_secs(self.available_pairs_reload_secs),
            deviation_threshold,
            stable_quotes: self
                .stable_quotes
                .iter()
                .map(|q| q.trim().to_uppercase())
                .collect(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        })
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
