//! Spot USD prices keyed by asset symbol

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::exchange::transport::{HttpRequest, HttpTransport};

/// Assets priced at exactly one dollar
pub const STABLECOINS: [&str; 8] = ["USDT", "USDC", "BUSD", "FDUSD", "DAI", "TUSD", "USD", "USDE"];

pub fn is_stablecoin(symbol: &str) -> bool {
    STABLECOINS.contains(&symbol.to_ascii_uppercase().as_str())
}

/// Spot price lookup. `None` means no price data, never an error.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_usd(&self, symbol: &str) -> Option<f64>;
}

/// Sum the USD value of `(symbol, amount)` holdings
///
/// Assets without a price are skipped, not fatal.
pub async fn value_holdings(oracle: &dyn PriceOracle, holdings: &[(String, f64)]) -> f64 {
    let mut total = 0.0;
    for (symbol, amount) in holdings {
        if *amount <= 0.0 {
            continue;
        }
        match oracle.price_usd(symbol).await {
            Some(price) => total += amount * price,
            None => debug!("No price for {}, skipping {} units", symbol, amount),
        }
    }
    total
}

#[derive(Clone, Copy)]
struct CachedPrice {
    price: f64,
    cached_at: Instant,
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

/// Binance public `SYMBOLUSDT` ticker with a TTL cache
pub struct BinanceTickerOracle {
    http: Arc<dyn HttpTransport>,
    ticker_url: String,
    ttl: Duration,
    cache: DashMap<String, CachedPrice>,
}

impl BinanceTickerOracle {
    pub fn new(http: Arc<dyn HttpTransport>, ticker_url: &str, ttl: Duration) -> Self {
        Self {
            http,
            ticker_url: ticker_url.trim_end_matches('/').to_string(),
            ttl,
            cache: DashMap::new(),
        }
    }

    async fn fetch(&self, symbol: &str) -> Option<f64> {
        let url = format!("{}?symbol={}USDT", self.ticker_url, symbol);
        let response = match self.http.send(HttpRequest::get(url)).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Price lookup for {} failed: {}", symbol, e);
                return None;
            }
        };
        if !response.is_success() {
            debug!("No USDT ticker for {} (HTTP {})", symbol, response.status);
            return None;
        }
        let ticker: TickerPrice = response.json().ok()?;
        ticker.price.parse::<f64>().ok().filter(|p| *p > 0.0)
    }
}

#[async_trait]
impl PriceOracle for BinanceTickerOracle {
    async fn price_usd(&self, symbol: &str) -> Option<f64> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return None;
        }
        if is_stablecoin(&symbol) {
            return Some(1.0);
        }

        if let Some(entry) = self.cache.get(&symbol) {
            if entry.cached_at.elapsed() < self.ttl {
                return Some(entry.price);
            }
        }

        let price = self.fetch(&symbol).await?;
        self.cache.insert(
            symbol,
            CachedPrice {
                price,
                cached_at: Instant::now(),
            },
        );
        Some(price)
    }
}

/// Fixed price table for offline runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: HashMap<String, f64>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_ascii_uppercase(), price);
        self
    }
}

#[async_trait]
impl PriceOracle for StaticPrices {
    async fn price_usd(&self, symbol: &str) -> Option<f64> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if is_stablecoin(&symbol) {
            return Some(1.0);
        }
        self.prices.get(&symbol).copied()
    }
}
