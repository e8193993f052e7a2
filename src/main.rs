//! PriceFeeder - standalone oracle process
//!
//! Subscribes the configured symbols, logs the canonical prices on an
//! interval and shuts down cleanly on Ctrl+C.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pricefeeder::config::{AppConfig, LoggingConfig};
use pricefeeder::Oracle;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    tracing::info!("🚀 Starting PriceFeeder");
    tracing::info!("📋 Config: {}", config.digest());

    let settings = config.oracle.settings()?;
    let oracle = Oracle::new(settings)
        .await
        .context("Failed to start oracle")?;

    let symbols: Vec<&str> = config.oracle.symbols.iter().map(String::as_str).collect();
    if let Err(e) = oracle.subscribe_symbols(&symbols).await {
        oracle.stop().await;
        return Err(e).context("Failed to subscribe symbols");
    }
    tracing::info!(symbols = ?oracle.subscribed_symbols().await, "✅ Symbols subscribed");

    let report_period = Duration::from_secs(config.report.interval_secs.max(1));
    let mut report = tokio::time::interval(report_period);
    report.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Shutdown signal received");
                break;
            }
            _ = report.tick() => {
                report_prices(&oracle, &symbols).await;
            }
        }
    }

    oracle.stop().await;
    tracing::info!("👋 PriceFeeder stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn report_prices(oracle: &Oracle, symbols: &[&str]) {
    match oracle.get_prices(symbols).await {
        Ok(prices) => {
            let mut prices: Vec<_> = prices.into_iter().collect();
            prices.sort();
            for (base, price) in prices {
                tracing::info!(base = %base, price = %price, "📊 Price");
            }
        }
        Err(e) => {
            // Partial maps are never returned, show what is there
            let available = oracle.prices().await;
            tracing::warn!(error = %e, available = available.len(), "⚠️ Prices incomplete");
        }
    }
}
