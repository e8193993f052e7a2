//! Runtime settings derived from the loaded configuration

use rust_decimal::Decimal;
use std::time::Duration;

/// Validated oracle settings used by the scheduler and registry
#[derive(Debug, Clone)]
pub struct OracleSettings {
    /// Configured provider names
    pub providers: Vec<String>,
    /// Period between price ticks, also the collection deadline
    pub tick_period: Duration,
    /// Period between available-pairs refreshes
    pub available_pairs_reload: Duration,
    /// How many σ a provider can be away from the mean
    pub deviation_threshold: Decimal,
    /// Stable quotes a base symbol is expanded against (uppercase)
    pub stable_quotes: Vec<String>,
    /// Per-request timeout for provider adapters
    pub request_timeout: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            tick_period: Duration::from_millis(1000),
            available_pairs_reload: Duration::from_secs(24 * 60 * 60),
            deviation_threshold: Decimal::TWO,
            stable_quotes: vec!["USD".to_string(), "USDT".to_string(), "UST".to_string()],
            request_timeout: Duration::from_millis(5000),
        }
    }
}
