//! Binance REST client for ticker and kline data
//!
//! Polls the spot REST API; subscriptions are only recorded locally.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use crate::oracle::sources::{http_client, ProviderAdapter};
use crate::types::{now_millis, CandlePrice, CurrencyPair, TickerPrice};

const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3";
const KLINE_INTERVAL: &str = "1m";
/// One extra kline since the newest one is usually still open
const KLINE_LIMIT: usize = 6;

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    volume: String,
}

#[derive(Debug)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    subscriptions: RwLock<HashSet<CurrencyPair>>,
}

impl BinanceClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(request_timeout)?,
            base_url: BINANCE_REST_URL.to_string(),
            subscriptions: RwLock::new(HashSet::new()),
        })
    }

    /// Native Binance symbol ("ATOMUSDT")
    fn native_symbol(pair: &CurrencyPair) -> String {
        format!("{}{}", pair.base, pair.quote)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {} from Binance", path))?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Binance {} response", path))
    }

    async fn fetch_klines(&self, pair: &CurrencyPair) -> Result<(String, Vec<CandlePrice>)> {
        let klines: Vec<Vec<serde_json::Value>> = self
            .get_json(
                "klines",
                &[
                    ("symbol", Self::native_symbol(pair)),
                    ("interval", KLINE_INTERVAL.to_string()),
                    ("limit", KLINE_LIMIT.to_string()),
                ],
            )
            .await?;

        Ok((pair.key(), parse_klines(&klines, now_millis())))
    }

    fn is_subscribed(&self, pair: &CurrencyPair) -> bool {
        self.subscriptions
            .read()
            .map(|s| s.contains(pair))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ProviderAdapter for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn available_pairs(&self) -> Result<HashSet<String>> {
        let info: ExchangeInfo = self.get_json("exchangeInfo", &[]).await?;
        Ok(parse_exchange_info(info))
    }

    async fn subscribe(&self, pairs: &[CurrencyPair]) -> Result<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| anyhow::anyhow!("Binance subscription lock poisoned"))?;
        subscriptions.extend(pairs.iter().cloned());
        Ok(())
    }

    async fn ticker_prices(&self, pairs: &[CurrencyPair]) -> Result<HashMap<String, TickerPrice>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        for pair in pairs.iter().filter(|p| !self.is_subscribed(p)) {
            tracing::debug!(source = %"Binance", pair = %pair, "Polling pair that was never subscribed");
        }

        let symbols: Vec<String> = pairs.iter().map(Self::native_symbol).collect();
        let tickers: Vec<Ticker24h> = self
            .get_json("ticker/24hr", &[("symbols", serde_json::to_string(&symbols)?)])
            .await?;

        parse_tickers(tickers, pairs)
    }

    async fn candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>> {
        let results = try_join_all(pairs.iter().map(|pair| self.fetch_klines(pair))).await?;

        Ok(results
            .into_iter()
            .filter(|(_, candles)| !candles.is_empty())
            .collect())
    }
}

fn parse_exchange_info(info: ExchangeInfo) -> HashSet<String> {
    info.symbols
        .into_iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| CurrencyPair::new(&s.base_asset, &s.quote_asset).key())
        .collect()
}

fn parse_tickers(
    tickers: Vec<Ticker24h>,
    pairs: &[CurrencyPair],
) -> Result<HashMap<String, TickerPrice>> {
    let by_symbol: HashMap<String, &CurrencyPair> = pairs
        .iter()
        .map(|p| (BinanceClient::native_symbol(p), p))
        .collect();

    let mut prices = HashMap::new();
    for ticker in tickers {
        let Some(pair) = by_symbol.get(&ticker.symbol) else {
            continue;
        };

        let price = Decimal::from_str(&ticker.last_price)
            .with_context(|| format!("Invalid Binance price for {}", ticker.symbol))?;
        let volume = Decimal::from_str(&ticker.volume)
            .with_context(|| format!("Invalid Binance volume for {}", ticker.symbol))?;

        prices.insert(pair.key(), TickerPrice { price, volume });
    }

    Ok(prices)
}

/// Parse klines: [[open_time, open, high, low, close, volume, close_time, ...], ...]
///
/// Klines still open at `now_ms` are skipped.
fn parse_klines(klines: &[Vec<serde_json::Value>], now_ms: i64) -> Vec<CandlePrice> {
    klines
        .iter()
        .filter_map(|kline| {
            if kline.len() < 7 {
                return None;
            }

            let price = Decimal::from_str(kline[4].as_str()?).ok()?;
            let volume = Decimal::from_str(kline[5].as_str()?).ok()?;
            let close_time = kline[6].as_i64()?;

            if close_time >= now_ms {
                return None;
            }

            Some(CandlePrice {
                price,
                volume,
                timestamp: close_time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_exchange_info_keeps_trading_pairs() {
        let info: ExchangeInfo = serde_json::from_value(serde_json::json!({
            "symbols": [
                {"symbol": "ATOMUSDT", "status": "TRADING", "baseAsset": "ATOM", "quoteAsset": "USDT"},
                {"symbol": "LUNAUST", "status": "BREAK", "baseAsset": "LUNA", "quoteAsset": "UST"}
            ]
        }))
        .unwrap();

        let pairs = parse_exchange_info(info);
        assert!(pairs.contains("ATOM/USDT"));
        assert!(!pairs.contains("LUNA/UST"));
    }

    #[test]
    fn test_parse_tickers_maps_to_pair_keys() {
        let tickers: Vec<Ticker24h> = serde_json::from_value(serde_json::json!([
            {"symbol": "ATOMUSDT", "lastPrice": "9.12000000", "volume": "123456.70000000"},
            {"symbol": "BTCUSDT", "lastPrice": "30000.0", "volume": "1.0"}
        ]))
        .unwrap();
        let pairs = vec![CurrencyPair::new("ATOM", "USDT")];

        let prices = parse_tickers(tickers, &pairs).unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["ATOM/USDT"].price, dec!(9.12));
        assert_eq!(prices["ATOM/USDT"].volume, dec!(123456.7));
    }

    #[test]
    fn test_parse_tickers_rejects_bad_decimal() {
        let tickers: Vec<Ticker24h> = serde_json::from_value(serde_json::json!([
            {"symbol": "ATOMUSDT", "lastPrice": "n/a", "volume": "1"}
        ]))
        .unwrap();
        let pairs = vec![CurrencyPair::new("ATOM", "USDT")];

        assert!(parse_tickers(tickers, &pairs).is_err());
    }

    #[test]
    fn test_parse_klines_skips_open_kline() {
        let now = 1_700_000_100_000i64;
        let klines: Vec<Vec<serde_json::Value>> = serde_json::from_value(serde_json::json!([
            [1_699_999_980_000i64, "9.0", "9.2", "8.9", "9.1", "100.0", 1_700_000_039_999i64],
            [1_700_000_040_000i64, "9.1", "9.3", "9.0", "9.2", "50.0", 1_700_000_099_999i64],
            [1_700_000_100_000i64, "9.2", "9.2", "9.2", "9.2", "1.0", 1_700_000_159_999i64]
        ]))
        .unwrap();

        let candles = parse_klines(&klines, now);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].price, dec!(9.1));
        assert_eq!(candles[1].volume, dec!(50));
        assert_eq!(candles[1].timestamp, 1_700_000_099_999);
    }
}
