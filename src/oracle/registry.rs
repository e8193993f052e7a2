//! Subscription registry - which pairs each provider lists and polls
//!
//! A pair is polled only when it is both available and subscribed for that
//! provider. Available sets come from the adapters on a slow cadence; the
//! subscribed sets grow as base symbols are subscribed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;

use crate::error::OracleError;
use crate::oracle::sources::ProviderAdapter;
use crate::types::{CurrencyPair, ProviderName};

/// Per-provider subscription state
pub struct ProviderState {
    pub adapter: Arc<dyn ProviderAdapter>,
    /// Pair keys the provider lists ("ATOM/USDT")
    pub available_pairs: HashSet<String>,
    /// Pair key => pair currently being polled
    pub subscribed_pairs: BTreeMap<String, CurrencyPair>,
}

impl ProviderState {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            available_pairs: HashSet::new(),
            subscribed_pairs: BTreeMap::new(),
        }
    }

    /// Subscribed pairs in key order
    pub fn subscribed(&self) -> Vec<CurrencyPair> {
        self.subscribed_pairs.values().cloned().collect()
    }
}

/// Provider name => state, iterated in name order
pub type ProviderStates = BTreeMap<ProviderName, ProviderState>;

/// Candidate pairs for a base symbol quoted by each stable quote
pub fn stablecoin_pairs(base: &str, stable_quotes: &[String]) -> Vec<CurrencyPair> {
    stable_quotes
        .iter()
        .map(|quote| CurrencyPair::new(base, quote))
        .collect()
}

/// Subscribe the candidate pairs in every provider that lists them
///
/// One batched adapter call per provider with something new to subscribe. A
/// failing provider aborts the call; pairs accepted by providers before it
/// stay recorded, nothing is recorded for the failing one.
pub async fn subscribe_providers(
    providers: &mut ProviderStates,
    currency_pairs: &[CurrencyPair],
) -> Result<(), OracleError> {
    for (provider_name, provider) in providers.iter_mut() {
        let mut pairs_to_subscribe = Vec::new();

        for currency_pair in currency_pairs {
            let symbol = currency_pair.key();

            if provider.subscribed_pairs.contains_key(&symbol) {
                continue;
            }

            if !provider.available_pairs.contains(&symbol) {
                tracing::debug!(provider = %provider_name, symbol = %symbol, "symbol is not available");
                continue;
            }

            pairs_to_subscribe.push(currency_pair.clone());
        }

        if pairs_to_subscribe.is_empty() {
            continue;
        }

        if let Err(e) = provider.adapter.subscribe(&pairs_to_subscribe).await {
            tracing::error!(provider = %provider_name, error = %e, "subscribing to new currency pairs");
            return Err(OracleError::Subscription {
                provider: provider_name.clone(),
                source: e,
            });
        }

        tracing::info!(
            provider = %provider_name,
            pairs = ?pairs_to_subscribe.iter().map(|p| p.key()).collect::<Vec<_>>(),
            "Subscribed pairs"
        );

        for pair in pairs_to_subscribe {
            provider.subscribed_pairs.insert(pair.key(), pair);
        }
    }

    Ok(())
}

/// Query every adapter for its available pairs concurrently
///
/// Failed or empty results are left out so callers keep the last-known set.
pub async fn fetch_available_pairs(
    adapters: Vec<(ProviderName, Arc<dyn ProviderAdapter>)>,
) -> HashMap<ProviderName, HashSet<String>> {
    let results = join_all(adapters.into_iter().map(|(name, adapter)| async move {
        let result = adapter.available_pairs().await;
        (name, result)
    }))
    .await;

    let mut available = HashMap::new();
    for (name, result) in results {
        match result {
            Ok(pairs) if pairs.is_empty() => {
                tracing::debug!(provider = %name, "provider returned no available pairs");
            }
            Ok(pairs) => {
                tracing::debug!(provider = %name, count = pairs.len(), "loaded available pairs");
                available.insert(name, pairs);
            }
            Err(e) => {
                tracing::debug!(provider = %name, error = %e, "Error getting available pairs for provider");
            }
        }
    }
    available
}

/// Replace the available sets of the providers that answered
pub fn apply_available_pairs(
    providers: &mut ProviderStates,
    available: HashMap<ProviderName, HashSet<String>>,
) {
    for (name, pairs) in available {
        if let Some(provider) = providers.get_mut(&name) {
            provider.available_pairs = pairs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandlePrice, TickerPrice};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Adapter that records subscribe calls and optionally fails them
    struct RecordingAdapter {
        name: String,
        available: Option<HashSet<String>>,
        fail_subscribe: bool,
        calls: Mutex<Vec<Vec<CurrencyPair>>>,
    }

    impl RecordingAdapter {
        fn new(name: &str, available: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                available: Some(available.iter().map(|s| s.to_string()).collect()),
                fail_subscribe: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProviderAdapter for RecordingAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn available_pairs(&self) -> Result<HashSet<String>> {
            match &self.available {
                Some(pairs) => Ok(pairs.clone()),
                None => bail!("exchange down"),
            }
        }

        async fn subscribe(&self, pairs: &[CurrencyPair]) -> Result<()> {
            if self.fail_subscribe {
                bail!("subscription rejected");
            }
            self.calls.lock().unwrap().push(pairs.to_vec());
            Ok(())
        }

        async fn ticker_prices(&self, _: &[CurrencyPair]) -> Result<HashMap<String, TickerPrice>> {
            Ok(HashMap::new())
        }

        async fn candle_prices(
            &self,
            _: &[CurrencyPair],
        ) -> Result<HashMap<String, Vec<CandlePrice>>> {
            Ok(HashMap::new())
        }
    }

    fn quotes() -> Vec<String> {
        vec!["USD".to_string(), "USDT".to_string(), "UST".to_string()]
    }

    fn state_with(adapter: Arc<RecordingAdapter>) -> ProviderState {
        let mut state = ProviderState::new(adapter.clone());
        state.available_pairs = adapter.available.clone().unwrap_or_default();
        state
    }

    #[test]
    fn test_stablecoin_pairs() {
        let pairs = stablecoin_pairs("umee", &quotes());
        let keys: Vec<String> = pairs.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["UMEE/USD", "UMEE/USDT", "UMEE/UST"]);
    }

    #[tokio::test]
    async fn test_subscribes_only_available_pairs() {
        let adapter = Arc::new(RecordingAdapter::new("binance", &["ATOM/USDT", "ETH/USDT"]));
        let mut providers = ProviderStates::new();
        providers.insert("binance".into(), state_with(adapter.clone()));

        subscribe_providers(&mut providers, &stablecoin_pairs("ATOM", &quotes()))
            .await
            .unwrap();

        let calls = adapter.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![CurrencyPair::new("ATOM", "USDT")]]);
        let subscribed: Vec<&String> = providers["binance"].subscribed_pairs.keys().collect();
        assert_eq!(subscribed, vec!["ATOM/USDT"]);
    }

    #[tokio::test]
    async fn test_resubscribe_makes_no_calls() {
        let adapter = Arc::new(RecordingAdapter::new("binance", &["ATOM/USDT"]));
        let mut providers = ProviderStates::new();
        providers.insert("binance".into(), state_with(adapter.clone()));
        let pairs = stablecoin_pairs("ATOM", &quotes());

        subscribe_providers(&mut providers, &pairs).await.unwrap();
        subscribe_providers(&mut providers, &pairs).await.unwrap();

        assert_eq!(adapter.call_count(), 1);
        assert_eq!(providers["binance"].subscribed_pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_records_nothing_for_provider() {
        let good = Arc::new(RecordingAdapter::new("binance", &["ATOM/USDT"]));
        let mut bad = RecordingAdapter::new("coinbase", &["ATOM/USD"]);
        bad.fail_subscribe = true;
        let bad = Arc::new(bad);

        let mut providers = ProviderStates::new();
        providers.insert("binance".into(), state_with(good));
        providers.insert("coinbase".into(), state_with(bad));

        let err = subscribe_providers(&mut providers, &stablecoin_pairs("ATOM", &quotes()))
            .await
            .unwrap_err();

        assert!(matches!(err, OracleError::Subscription { ref provider, .. } if provider == "coinbase"));
        assert!(providers["coinbase"].subscribed_pairs.is_empty());
        assert_eq!(providers["binance"].subscribed_pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_pairs() {
        let up = Arc::new(RecordingAdapter::new("binance", &["ATOM/USDT", "ETH/USDT"]));
        let mut down = RecordingAdapter::new("coinbase", &[]);
        down.available = None;
        let down = Arc::new(down);

        let mut providers = ProviderStates::new();
        providers.insert("binance".into(), ProviderState::new(up.clone()));
        let mut down_state = ProviderState::new(down.clone());
        down_state.available_pairs = HashSet::from(["ATOM/USD".to_string()]);
        providers.insert("coinbase".into(), down_state);

        let adapters: Vec<(ProviderName, Arc<dyn ProviderAdapter>)> = vec![
            ("binance".into(), up as Arc<dyn ProviderAdapter>),
            ("coinbase".into(), down as Arc<dyn ProviderAdapter>),
        ];
        let available = fetch_available_pairs(adapters).await;
        apply_available_pairs(&mut providers, available);

        assert_eq!(providers["binance"].available_pairs.len(), 2);
        assert_eq!(
            providers["coinbase"].available_pairs,
            HashSet::from(["ATOM/USD".to_string()])
        );
    }
}
