//! Error types for the oracle
//!
//! Provider I/O failures stay `anyhow::Error` inside the adapters and are
//! swallowed at the collection boundary. Everything that can reach a caller of
//! the oracle is an [`OracleError`].

use thiserror::Error;

/// Errors surfaced by the oracle facade and its price computation.
#[derive(Error, Debug)]
pub enum OracleError {
    /// No canonical price is published for this base symbol.
    #[error("error getting price for {0}")]
    PriceUnavailable(String),

    /// A provider rejected a subscription request.
    /// Nothing was recorded for that provider; the call may be retried.
    #[error("subscribing to new currency pairs in provider {provider}: {source}")]
    Subscription {
        /// The provider that failed
        provider: String,
        /// Error returned by the provider adapter
        #[source]
        source: anyhow::Error,
    },

    /// Malformed input to the statistics or weighting functions.
    #[error("statistics error: {0}")]
    Statistics(String),

    /// Neither candles nor tickers produced a single price this tick.
    #[error("no prices available from any provider")]
    NoPrices,

    /// The configured provider name has no adapter.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The adapter for a known provider could not be built.
    #[error("initializing provider {provider}: {source}")]
    ProviderInit {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

impl OracleError {
    /// Whether the failure only affects the current tick.
    pub fn is_tick_local(&self) -> bool {
        matches!(self, OracleError::Statistics(_) | OracleError::NoPrices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_unavailable_names_base() {
        let err = OracleError::PriceUnavailable("ATOM".to_string());
        assert_eq!(err.to_string(), "error getting price for ATOM");
        assert!(!err.is_tick_local());
    }

    #[test]
    fn test_subscription_error_keeps_source() {
        let err = OracleError::Subscription {
            provider: "kraken".to_string(),
            source: anyhow::anyhow!("rate limited"),
        };
        assert!(err.to_string().contains("kraken"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_tick_local_errors() {
        assert!(OracleError::NoPrices.is_tick_local());
        assert!(OracleError::Statistics("divide by zero".into()).is_tick_local());
    }
}
