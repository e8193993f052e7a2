//! Price statistics - VWAP, TVWAP and cross-provider standard deviation
//!
//! Pure functions over the per-tick aggregates. All arithmetic stays in
//! `Decimal` so results are reproducible across runs.

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use std::collections::HashMap;

use crate::error::OracleError;
use crate::types::{AggregatedProviderCandles, AggregatedProviderPrices, ProviderName};

/// Candles older than this are ignored by TVWAP (5 minutes)
pub const TVWAP_CANDLE_PERIOD_MS: i64 = 5 * 60 * 1000;

/// Weight given to the oldest candle of a provider's window
const MINIMUM_TIME_WEIGHT: Decimal = dec!(0.2);

/// Minimum number of samples for a meaningful deviation
pub const MIN_DEVIATION_SAMPLES: usize = 2;

/// Per-base standard deviations and means
pub type DeviationStats = (HashMap<String, Decimal>, HashMap<String, Decimal>);

/// Volume weighted average price across providers
///
/// Bases whose total volume is zero are left out of the result.
pub fn compute_vwap(prices: &AggregatedProviderPrices) -> Result<HashMap<String, Decimal>, OracleError> {
    let mut weighted_prices: HashMap<String, Decimal> = HashMap::new();
    let mut volume_sum: HashMap<String, Decimal> = HashMap::new();

    for provider_prices in prices.values() {
        for (base, tp) in provider_prices {
            let weighted = checked(tp.price.checked_mul(tp.volume), "VWAP", base)?;
            accumulate(&mut weighted_prices, base, weighted, "VWAP")?;
            accumulate(&mut volume_sum, base, tp.volume, "VWAP")?;
        }
    }

    vwap(weighted_prices, &volume_sum, "VWAP")
}

/// Time-and-volume weighted average price across providers
///
/// Each provider's candles are weighted linearly from `MINIMUM_TIME_WEIGHT`
/// (oldest candle) up to 1 (a candle ending at `now_ms`), then by volume.
/// Only candles inside the last `TVWAP_CANDLE_PERIOD_MS` contribute.
pub fn compute_tvwap(
    candles: &AggregatedProviderCandles,
    now_ms: i64,
) -> Result<HashMap<String, Decimal>, OracleError> {
    let mut weighted_prices: HashMap<String, Decimal> = HashMap::new();
    let mut volume_sum: HashMap<String, Decimal> = HashMap::new();
    let window_start = now_ms - TVWAP_CANDLE_PERIOD_MS;

    for (provider, provider_candles) in candles {
        for (base, cp) in provider_candles {
            if cp.is_empty() {
                continue;
            }

            let oldest = cp.iter().map(|c| c.timestamp).min().unwrap_or(now_ms);
            let period = Decimal::from(now_ms - oldest);
            if period.is_zero() {
                return Err(OracleError::Statistics(format!(
                    "unable to divide by zero: {} candles for {} end at the current time",
                    provider, base
                )));
            }

            // weight_unit = (1 - minimum) / period
            let weight_unit = (Decimal::ONE - MINIMUM_TIME_WEIGHT) / period;

            weighted_prices.entry(base.clone()).or_insert(Decimal::ZERO);
            volume_sum.entry(base.clone()).or_insert(Decimal::ZERO);

            for candle in cp.iter().filter(|c| c.timestamp > window_start) {
                let age = Decimal::from(now_ms - candle.timestamp);
                let time_weight = weight_unit * (period - age) + MINIMUM_TIME_WEIGHT;
                let volume = checked(candle.volume.checked_mul(time_weight), "TVWAP", base)?;
                let weighted = checked(candle.price.checked_mul(volume), "TVWAP", base)?;

                accumulate(&mut volume_sum, base, volume, "TVWAP")?;
                accumulate(&mut weighted_prices, base, weighted, "TVWAP")?;
            }
        }
    }

    vwap(weighted_prices, &volume_sum, "TVWAP")
}

fn vwap(
    weighted_prices: HashMap<String, Decimal>,
    volume_sum: &HashMap<String, Decimal>,
    kind: &str,
) -> Result<HashMap<String, Decimal>, OracleError> {
    let mut prices = HashMap::with_capacity(weighted_prices.len());
    for (base, weighted) in weighted_prices {
        let volume = volume_sum.get(&base).copied().unwrap_or(Decimal::ZERO);
        if volume.is_zero() {
            continue;
        }
        let price = checked(weighted.checked_div(volume), kind, &base)?;
        prices.insert(base, price);
    }
    Ok(prices)
}

/// Population standard deviation and mean per base across providers
///
/// Bases reported by fewer than `MIN_DEVIATION_SAMPLES` providers are absent
/// from both maps.
pub fn standard_deviation(
    prices: &HashMap<ProviderName, HashMap<String, Decimal>>,
) -> Result<DeviationStats, OracleError> {
    let mut samples: HashMap<&str, Vec<Decimal>> = HashMap::new();
    for provider_prices in prices.values() {
        for (base, price) in provider_prices {
            samples.entry(base.as_str()).or_default().push(*price);
        }
    }

    let mut deviations = HashMap::new();
    let mut means = HashMap::new();

    for (base, values) in samples {
        if values.len() < MIN_DEVIATION_SAMPLES {
            continue;
        }

        let count = Decimal::from(values.len());
        let mut sum = Decimal::ZERO;
        for price in &values {
            sum = checked(sum.checked_add(*price), "mean", base)?;
        }
        let mean = sum / count;

        let mut variance_sum = Decimal::ZERO;
        for price in &values {
            let deviation = checked(price.checked_sub(mean), "variance", base)?;
            let squared = checked(deviation.checked_mul(deviation), "variance", base)?;
            variance_sum = checked(variance_sum.checked_add(squared), "variance", base)?;
        }
        let variance = variance_sum / count;

        let deviation = variance.sqrt().ok_or_else(|| {
            OracleError::Statistics(format!("unable to take square root of variance for {}", base))
        })?;

        deviations.insert(base.to_string(), deviation);
        means.insert(base.to_string(), mean);
    }

    Ok((deviations, means))
}

/// Turn an overflowed checked operation into a statistics error
fn checked(value: Option<Decimal>, kind: &str, base: &str) -> Result<Decimal, OracleError> {
    value.ok_or_else(|| OracleError::Statistics(format!("{} overflow for {}", kind, base)))
}

fn accumulate(
    sums: &mut HashMap<String, Decimal>,
    base: &str,
    value: Decimal,
    kind: &str,
) -> Result<(), OracleError> {
    let sum = sums.entry(base.to_string()).or_insert(Decimal::ZERO);
    *sum = checked(sum.checked_add(value), kind, base)?;
    Ok(())
}
