//! Aggregation scheduler - the fixed-cadence polling loop
//!
//! Every tick spawns one collection task per provider with subscriptions,
//! joins them (or aborts the stragglers when the tick period runs out),
//! merges their samples and hands them to the price selector. The result is
//! published in one write so readers never see a half-updated map.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};

use crate::error::OracleError;
use crate::oracle::filter::DeviationFilter;
use crate::oracle::selector::{PriceSelection, PriceSelector};
use crate::oracle::sources::ProviderAdapter;
use crate::oracle::OracleContext;
use crate::types::{
    now_millis, AggregatedProviderCandles, AggregatedProviderPrices, CandlePrice, CurrencyPair,
    ProviderName, TickerPrice,
};

/// One provider's samples for a tick, keyed by base symbol
#[derive(Debug, Default)]
pub(crate) struct ProviderSnapshot {
    pub tickers: HashMap<String, TickerPrice>,
    pub candles: HashMap<String, Vec<CandlePrice>>,
}

pub(crate) struct Scheduler {
    ctx: Arc<OracleContext>,
    selector: PriceSelector,
}

impl Scheduler {
    pub fn new(ctx: Arc<OracleContext>) -> Self {
        let filter = DeviationFilter::new(ctx.settings.deviation_threshold);
        Self {
            ctx,
            selector: PriceSelector::new(filter),
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    ///
    /// Shutdown is only observed between ticks, so an in-flight tick always
    /// finishes and publishes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let tick_period = self.ctx.settings.tick_period;
        let reload_period = self.ctx.settings.available_pairs_reload;

        let mut ticker = interval_at(Instant::now() + tick_period, tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reload = interval_at(Instant::now() + reload_period, reload_period);
        reload.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_ms = tick_period.as_millis() as u64,
            reload_secs = reload_period.as_secs(),
            "Oracle loop started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = reload.tick() => {
                    self.ctx.load_available_pairs().await;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(_) => {}
                        Err(e) if e.is_tick_local() => {
                            tracing::warn!(error = %e, "oracle tick produced no prices, keeping previous");
                        }
                        Err(e) => tracing::error!(error = %e, "oracle tick failed"),
                    }
                }
            }
        }

        tracing::info!("Oracle loop stopped");
    }

    /// Collect, select and publish one set of canonical prices
    pub async fn tick(&self) -> Result<PriceSelection, OracleError> {
        let (tickers, candles) = self.collect().await;
        let selection = self.selector.select(&tickers, &candles, now_millis())?;
        self.ctx.publish(&selection).await;
        Ok(selection)
    }

    /// Fan out one task per provider and merge what comes back
    async fn collect(&self) -> (AggregatedProviderPrices, AggregatedProviderCandles) {
        let jobs: Vec<(ProviderName, Arc<dyn ProviderAdapter>, Vec<CurrencyPair>)> = {
            let state = self.ctx.state.read().await;
            state
                .providers
                .iter()
                .filter(|(_, provider)| !provider.subscribed_pairs.is_empty())
                .map(|(name, provider)| (name.clone(), provider.adapter.clone(), provider.subscribed()))
                .collect()
        };

        let deadline = Instant::now() + self.ctx.settings.tick_period;
        let tasks: Vec<(ProviderName, JoinHandle<anyhow::Result<ProviderSnapshot>>)> = jobs
            .into_iter()
            .map(|(name, adapter, pairs)| (name, tokio::spawn(fetch_provider(adapter, pairs))))
            .collect();

        let results = join_all(tasks.into_iter().map(|(name, mut handle)| async move {
            let outcome = timeout_at(deadline, &mut handle).await;
            if outcome.is_err() {
                handle.abort();
            }
            (name, outcome)
        }))
        .await;

        let mut tickers = AggregatedProviderPrices::new();
        let mut candles = AggregatedProviderCandles::new();

        for (name, outcome) in results {
            match outcome {
                Ok(Ok(Ok(snapshot))) => {
                    tickers.insert(name.clone(), snapshot.tickers);
                    candles.insert(name, snapshot.candles);
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(provider = %name, error = %e, "failed to get ticker prices from provider");
                }
                Ok(Err(e)) => {
                    tracing::error!(provider = %name, error = %e, "provider collection task failed");
                }
                Err(_) => {
                    tracing::warn!(provider = %name, "provider did not respond within the tick period");
                }
            }
        }

        (tickers, candles)
    }
}

/// Fetch tickers and candles for one provider's subscribed pairs
///
/// Either call failing drops the provider for this tick.
async fn fetch_provider(
    adapter: Arc<dyn ProviderAdapter>,
    pairs: Vec<CurrencyPair>,
) -> anyhow::Result<ProviderSnapshot> {
    let (prices, candles) =
        tokio::try_join!(adapter.ticker_prices(&pairs), adapter.candle_prices(&pairs))?;

    // flatten by base currency; first pair in key order wins
    let mut snapshot = ProviderSnapshot::default();
    for pair in &pairs {
        let key = pair.key();
        if let Some(tp) = prices.get(&key) {
            snapshot.tickers.entry(pair.base.clone()).or_insert(*tp);
        }
        if let Some(cp) = candles.get(&key) {
            snapshot
                .candles
                .entry(pair.base.clone())
                .or_insert_with(|| cp.clone());
        }
    }

    Ok(snapshot)
}
