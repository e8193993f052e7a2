//! Deviation filter - drops provider samples far from the cross-provider mean
//!
//! Tickers and candles are filtered independently: a provider may be dropped
//! from one set and kept in the other.

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::OracleError;
use crate::oracle::stats::{compute_tvwap, standard_deviation};
use crate::types::{
    AggregatedProviderCandles, AggregatedProviderPrices, CandlePrice, ProviderName, TickerPrice,
};

/// A provider sample rejected for one base during one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub provider: ProviderName,
    pub base: String,
    pub value: Decimal,
}

/// Surviving samples plus what was dropped
#[derive(Debug, Clone)]
pub struct Filtered<T> {
    pub kept: HashMap<ProviderName, HashMap<String, T>>,
    pub rejected: Vec<Rejection>,
}

/// Outlier filter parameterized by how many σ a provider may stray
#[derive(Debug, Clone, Copy)]
pub struct DeviationFilter {
    threshold: Decimal,
}

impl DeviationFilter {
    pub fn new(threshold: Decimal) -> Self {
        Self { threshold }
    }

    /// Filter ticker samples by their price
    pub fn filter_tickers(
        &self,
        prices: &AggregatedProviderPrices,
    ) -> Result<Filtered<TickerPrice>, OracleError> {
        let scalars: HashMap<ProviderName, HashMap<String, Decimal>> = prices
            .iter()
            .map(|(provider, tickers)| {
                let values = tickers
                    .iter()
                    .map(|(base, tp)| (base.clone(), tp.price))
                    .collect();
                (provider.clone(), values)
            })
            .collect();

        let filtered = self.filter(prices, &scalars, "prices")?;
        Ok(filtered)
    }

    /// Filter candle samples by each provider's own TVWAP
    ///
    /// A provider whose candles produce no TVWAP (stale window, zero volume)
    /// is left out of the result for that base.
    pub fn filter_candles(
        &self,
        candles: &AggregatedProviderCandles,
        now_ms: i64,
    ) -> Result<Filtered<Vec<CandlePrice>>, OracleError> {
        let mut tvwaps: HashMap<ProviderName, HashMap<String, Decimal>> = HashMap::new();

        for (provider, provider_candles) in candles {
            let single: AggregatedProviderCandles =
                HashMap::from([(provider.clone(), provider_candles.clone())]);
            let tvwap = compute_tvwap(&single, now_ms)?;
            if !tvwap.is_empty() {
                tvwaps.insert(provider.clone(), tvwap);
            }
        }

        self.filter(candles, &tvwaps, "candles")
    }

    /// Keep every sample within `mean ± threshold·σ`, or any sample whose
    /// base has no usable σ. Only samples with a scalar are considered.
    fn filter<T: Clone>(
        &self,
        samples: &HashMap<ProviderName, HashMap<String, T>>,
        scalars: &HashMap<ProviderName, HashMap<String, Decimal>>,
        kind: &str,
    ) -> Result<Filtered<T>, OracleError> {
        let (deviations, means) = standard_deviation(scalars)?;

        let mut kept: HashMap<ProviderName, HashMap<String, T>> = HashMap::new();
        let mut rejected = Vec::new();

        for (provider, values) in scalars {
            for (base, value) in values {
                let Some(sample) = samples.get(provider).and_then(|s| s.get(base)) else {
                    continue;
                };

                let accept = match (deviations.get(base), means.get(base)) {
                    (Some(deviation), Some(mean)) if !deviation.is_zero() => {
                        let distance = value.checked_sub(*mean).ok_or_else(|| {
                            OracleError::Statistics(format!("deviation overflow for {}", base))
                        })?;
                        // a bound past the decimal range admits everything
                        match deviation.checked_mul(self.threshold) {
                            Some(bound) => distance.abs() <= bound,
                            None => true,
                        }
                    }
                    _ => true,
                };

                if accept {
                    kept.entry(provider.clone())
                        .or_default()
                        .insert(base.clone(), sample.clone());
                } else {
                    tracing::warn!(
                        base = %base,
                        provider = %provider,
                        price = %value,
                        "provider deviating from other {}", kind
                    );
                    rejected.push(Rejection {
                        provider: provider.clone(),
                        base: base.clone(),
                        value: *value,
                    });
                }
            }
        }

        Ok(Filtered { kept, rejected })
    }
}

impl Default for DeviationFilter {
    fn default() -> Self {
        Self::new(Decimal::TWO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tickers(entries: &[(&str, &str, Decimal)]) -> AggregatedProviderPrices {
        let mut prices = AggregatedProviderPrices::new();
        for (provider, base, price) in entries {
            prices.entry(provider.to_string()).or_default().insert(
                base.to_string(),
                TickerPrice {
                    price: *price,
                    volume: dec!(100),
                },
            );
        }
        prices
    }

    fn kept_providers<T>(filtered: &Filtered<T>, base: &str) -> Vec<String> {
        let mut providers: Vec<String> = filtered
            .kept
            .iter()
            .filter(|(_, values)| values.contains_key(base))
            .map(|(provider, _)| provider.clone())
            .collect();
        providers.sort();
        providers
    }

    #[test]
    fn test_identical_values_never_dropped() {
        let prices = tickers(&[
            ("a", "ATOM", dec!(9.5)),
            ("b", "ATOM", dec!(9.5)),
            ("c", "ATOM", dec!(9.5)),
        ]);

        let filtered = DeviationFilter::new(dec!(0.0001)).filter_tickers(&prices).unwrap();
        assert_eq!(kept_providers(&filtered, "ATOM"), vec!["a", "b", "c"]);
        assert!(filtered.rejected.is_empty());
    }

    #[test]
    fn test_single_provider_is_not_filtered() {
        let prices = tickers(&[("a", "ATOM", dec!(9.5)), ("b", "UMEE", dec!(0.04))]);

        let filtered = DeviationFilter::new(dec!(0.1)).filter_tickers(&prices).unwrap();
        assert_eq!(kept_providers(&filtered, "ATOM"), vec!["a"]);
        assert_eq!(kept_providers(&filtered, "UMEE"), vec!["b"]);
    }

    #[test]
    fn test_three_providers_two_sigma_keeps_all() {
        // mean 11.0166.., population σ 2.8167.., 15.00 sits at √2 σ
        let prices = tickers(&[
            ("a", "ATOM", dec!(9.00)),
            ("b", "ATOM", dec!(9.05)),
            ("c", "ATOM", dec!(15.00)),
        ]);

        let filtered = DeviationFilter::default().filter_tickers(&prices).unwrap();
        assert_eq!(kept_providers(&filtered, "ATOM"), vec!["a", "b", "c"]);
        assert!(filtered.rejected.is_empty());
    }

    #[test]
    fn test_three_providers_one_sigma_rejects_outlier() {
        let prices = tickers(&[
            ("a", "ATOM", dec!(9.00)),
            ("b", "ATOM", dec!(9.05)),
            ("c", "ATOM", dec!(15.00)),
        ]);

        let filtered = DeviationFilter::new(dec!(1)).filter_tickers(&prices).unwrap();
        assert_eq!(kept_providers(&filtered, "ATOM"), vec!["a", "b"]);
        assert_eq!(
            filtered.rejected,
            vec![Rejection {
                provider: "c".to_string(),
                base: "ATOM".to_string(),
                value: dec!(15.00),
            }]
        );
    }

    #[test]
    fn test_outlier_rejected_with_many_providers() {
        let prices = tickers(&[
            ("a", "ATOM", dec!(10.00)),
            ("b", "ATOM", dec!(10.01)),
            ("c", "ATOM", dec!(9.99)),
            ("d", "ATOM", dec!(10.00)),
            ("e", "ATOM", dec!(10.02)),
            ("f", "ATOM", dec!(9.98)),
            ("g", "ATOM", dec!(14.00)),
        ]);

        let filtered = DeviationFilter::default().filter_tickers(&prices).unwrap();
        assert_eq!(
            kept_providers(&filtered, "ATOM"),
            vec!["a", "b", "c", "d", "e", "f"]
        );
        assert_eq!(filtered.rejected.len(), 1);
        assert_eq!(filtered.rejected[0].provider, "g");
    }

    #[test]
    fn test_assets_are_filtered_independently() {
        let prices = tickers(&[
            ("a", "ATOM", dec!(9.00)),
            ("b", "ATOM", dec!(9.05)),
            ("c", "ATOM", dec!(15.00)),
            ("c", "UMEE", dec!(0.05)),
        ]);

        let filtered = DeviationFilter::new(dec!(1)).filter_tickers(&prices).unwrap();
        assert_eq!(kept_providers(&filtered, "ATOM"), vec!["a", "b"]);
        assert_eq!(kept_providers(&filtered, "UMEE"), vec!["c"]);
    }

    #[test]
    fn test_candles_filtered_by_provider_tvwap() {
        let now = 1_700_000_000_000i64;
        let series = |price: Decimal| {
            vec![
                CandlePrice {
                    price,
                    volume: dec!(10),
                    timestamp: now - 120_000,
                },
                CandlePrice {
                    price,
                    volume: dec!(10),
                    timestamp: now - 60_000,
                },
            ]
        };

        let mut candles = AggregatedProviderCandles::new();
        candles.insert("a".into(), HashMap::from([("ATOM".to_string(), series(dec!(9.00)))]));
        candles.insert("b".into(), HashMap::from([("ATOM".to_string(), series(dec!(9.05)))]));
        candles.insert("c".into(), HashMap::from([("ATOM".to_string(), series(dec!(15.00)))]));

        let filtered = DeviationFilter::new(dec!(1)).filter_candles(&candles, now).unwrap();
        assert_eq!(kept_providers(&filtered, "ATOM"), vec!["a", "b"]);
        assert_eq!(filtered.rejected[0].provider, "c");
    }

    #[test]
    fn test_stale_candles_dropped_from_candle_set() {
        let now = 1_700_000_000_000i64;
        let mut candles = AggregatedProviderCandles::new();
        candles.insert(
            "a".into(),
            HashMap::from([(
                "ATOM".to_string(),
                vec![CandlePrice {
                    price: dec!(9),
                    volume: dec!(10),
                    timestamp: now - 3_600_000,
                }],
            )]),
        );

        let filtered = DeviationFilter::default().filter_candles(&candles, now).unwrap();
        assert!(filtered.kept.is_empty());
        assert!(filtered.rejected.is_empty());
    }
}
