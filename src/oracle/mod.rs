//! Oracle module - multi-provider price aggregation
//!
//! Polls every configured provider on a fixed cadence, drops outliers with a
//! deviation filter and publishes one canonical price per base symbol.
//! Consumers only see the [`Oracle`] facade (or the [`PriceFeeder`] trait).

pub mod filter;
pub mod registry;
mod scheduler;
pub mod selector;
pub mod sources;
pub mod stats;

pub use filter::{DeviationFilter, Filtered, Rejection};
pub use selector::{PriceSelection, PriceSelector};
pub use sources::{new_provider, ProviderAdapter};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::OracleSettings;
use crate::error::OracleError;
use registry::{
    apply_available_pairs, fetch_available_pairs, stablecoin_pairs, subscribe_providers,
    ProviderState, ProviderStates,
};
use scheduler::Scheduler;

/// Contract for anything that serves canonical prices
#[async_trait]
pub trait PriceFeeder: Send + Sync {
    /// Prices for every requested base, or an error naming the first missing one
    async fn get_prices(&self, base_symbols: &[&str]) -> Result<HashMap<String, Decimal>, OracleError>;

    /// Price for one base symbol (e.g. "UMEE", "ETH")
    async fn get_price(&self, base_symbol: &str) -> Result<Decimal, OracleError>;

    /// Subscribe the base symbols in all providers
    async fn subscribe_symbols(&self, base_symbols: &[&str]) -> Result<(), OracleError>;
}

/// State guarded by the oracle lock
pub(crate) struct OracleState {
    pub providers: ProviderStates,
    /// Base symbol => canonical price
    pub prices: HashMap<String, Decimal>,
    pub subscribed_base_symbols: HashSet<String>,
}

/// Everything the scheduler and the facade share
pub(crate) struct OracleContext {
    pub settings: OracleSettings,
    pub state: RwLock<OracleState>,
}

impl OracleContext {
    fn new(settings: OracleSettings, adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let mut providers = ProviderStates::new();
        for adapter in adapters {
            let name = adapter.name().to_string();
            if providers.contains_key(&name) {
                tracing::warn!(provider = %name, "provider configured twice, keeping the last one");
            }
            providers.insert(name, ProviderState::new(adapter));
        }

        Self {
            settings,
            state: RwLock::new(OracleState {
                providers,
                prices: HashMap::new(),
                subscribed_base_symbols: HashSet::new(),
            }),
        }
    }

    /// Refresh every provider's available pairs
    ///
    /// Adapters are queried without holding the lock.
    pub async fn load_available_pairs(&self) {
        let adapters = {
            let state = self.state.read().await;
            state
                .providers
                .iter()
                .map(|(name, provider)| (name.clone(), provider.adapter.clone()))
                .collect()
        };

        let available = fetch_available_pairs(adapters).await;

        let mut state = self.state.write().await;
        apply_available_pairs(&mut state.providers, available);
    }

    /// Swap in a tick's prices
    pub async fn publish(&self, selection: &PriceSelection) {
        let mut state = self.state.write().await;
        state.prices = selection.prices.clone();

        let missing = selection.missing(&state.subscribed_base_symbols);
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "no price for subscribed symbols this tick");
        }

        tracing::debug!(
            source = %selection.source,
            assets = state.prices.len(),
            rejected = selection.rejected.len(),
            "published prices"
        );
    }
}

/// Price oracle facade
///
/// Owns the polling loop. Reads take the shared lock; publication and
/// subscription changes take the exclusive one.
pub struct Oracle {
    ctx: Arc<OracleContext>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Oracle {
    /// Build adapters for the configured providers and start the loop
    pub async fn new(settings: OracleSettings) -> Result<Self, OracleError> {
        let adapters = settings
            .providers
            .iter()
            .map(|name| new_provider(name, settings.request_timeout))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_providers(settings, adapters).await)
    }

    /// Start the loop over the given adapters
    ///
    /// Available pairs are loaded once before the first tick.
    pub async fn with_providers(
        settings: OracleSettings,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
    ) -> Self {
        let ctx = Arc::new(OracleContext::new(settings, adapters));
        ctx.load_available_pairs().await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = Scheduler::new(ctx.clone());
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        Self {
            ctx,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Price for one base symbol
    pub async fn get_price(&self, base_symbol: &str) -> Result<Decimal, OracleError> {
        let base = normalize(base_symbol);
        let state = self.ctx.state.read().await;

        state
            .prices
            .get(&base)
            .copied()
            .ok_or(OracleError::PriceUnavailable(base))
    }

    /// Prices for all requested base symbols, never a partial map
    pub async fn get_prices(
        &self,
        base_symbols: &[&str],
    ) -> Result<HashMap<String, Decimal>, OracleError> {
        let state = self.ctx.state.read().await;
        let mut prices = HashMap::with_capacity(base_symbols.len());

        for base_symbol in base_symbols {
            let base = normalize(base_symbol);
            match state.prices.get(&base) {
                Some(price) => {
                    prices.insert(base, *price);
                }
                None => return Err(OracleError::PriceUnavailable(base)),
            }
        }

        Ok(prices)
    }

    /// Subscribe base symbols (e.g. ["UMEE", "ATOM"]) in all providers
    ///
    /// Stops at the first provider error; symbols handled before it stay
    /// subscribed and the failing one can be retried.
    pub async fn subscribe_symbols(&self, base_symbols: &[&str]) -> Result<(), OracleError> {
        let mut guard = self.ctx.state.write().await;
        let state = &mut *guard;

        for base_symbol in base_symbols {
            let base = normalize(base_symbol);
            if state.subscribed_base_symbols.contains(&base) {
                // already subscribed
                continue;
            }

            let currency_pairs = stablecoin_pairs(&base, &self.ctx.settings.stable_quotes);
            subscribe_providers(&mut state.providers, &currency_pairs).await?;
            state.subscribed_base_symbols.insert(base);
        }

        Ok(())
    }

    /// Snapshot of the current canonical prices
    pub async fn prices(&self) -> HashMap<String, Decimal> {
        self.ctx.state.read().await.prices.clone()
    }

    /// Subscribed base symbols, sorted
    pub async fn subscribed_symbols(&self) -> Vec<String> {
        let state = self.ctx.state.read().await;
        let mut symbols: Vec<String> = state.subscribed_base_symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Stop the loop and wait for it to exit
    ///
    /// A tick already running finishes and publishes first. Calling this more
    /// than once is harmless.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "oracle loop exited abnormally");
            }
        }
    }
}

#[async_trait]
impl PriceFeeder for Oracle {
    async fn get_prices(&self, base_symbols: &[&str]) -> Result<HashMap<String, Decimal>, OracleError> {
        Oracle::get_prices(self, base_symbols).await
    }

    async fn get_price(&self, base_symbol: &str) -> Result<Decimal, OracleError> {
        Oracle::get_price(self, base_symbol).await
    }

    async fn subscribe_symbols(&self, base_symbols: &[&str]) -> Result<(), OracleError> {
        Oracle::subscribe_symbols(self, base_symbols).await
    }
}

fn normalize(base_symbol: &str) -> String {
    base_symbol.trim().to_uppercase()
}
