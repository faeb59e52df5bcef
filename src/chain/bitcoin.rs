//! Bitcoin balance from a mempool.space-compatible explorer

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::exchange::transport::{HttpRequest, HttpTransport};
use crate::price::PriceOracle;

use super::native_usd;

const SATS_PER_BTC: f64 = 1e8;

#[derive(Debug, Deserialize)]
pub struct ChainStats {
    pub funded_txo_sum: u64,
    pub spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: ChainStats,
}

impl ChainStats {
    /// Confirmed balance in satoshis
    pub fn balance_sats(&self) -> u64 {
        self.funded_txo_sum.saturating_sub(self.spent_txo_sum)
    }
}

pub async fn fetch_balance_usd(
    http: &dyn HttpTransport,
    prices: &dyn PriceOracle,
    base_url: &str,
    address: &str,
) -> Result<f64> {
    let url = format!("{}/address/{}", base_url.trim_end_matches('/'), address);
    let response = http.send(HttpRequest::get(url)).await?;
    if !response.is_success() {
        return Err(Error::Chain(format!(
            "explorer HTTP {}: {}",
            response.status,
            response.body.trim()
        )));
    }

    let info: AddressInfo = response.json()?;
    let btc = info.chain_stats.balance_sats() as f64 / SATS_PER_BTC;
    native_usd(prices, "BTC", btc).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::transport::mock::MockTransport;
    use crate::price::StaticPrices;

    #[tokio::test]
    async fn test_funded_minus_spent() {
        let http = MockTransport::new().route(
            "/address/bc1qtest",
            200,
            r#"{"address":"bc1qtest","chain_stats":{"funded_txo_count":2,"funded_txo_sum":150000000,"spent_txo_count":1,"spent_txo_sum":50000000,"tx_count":3},"mempool_stats":{"funded_txo_sum":0,"spent_txo_sum":0}}"#,
        );
        let prices = StaticPrices::new().with("BTC", 50_000.0);
        let usd = fetch_balance_usd(&http, &prices, "https://mempool.space/api/", "bc1qtest")
            .await
            .unwrap();
        assert_eq!(usd, 50_000.0);
        assert_eq!(http.requests()[0].url, "https://mempool.space/api/address/bc1qtest");
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let http = MockTransport::new().route("/address/", 400, "Invalid Bitcoin address");
        let prices = StaticPrices::new().with("BTC", 50_000.0);
        let err = fetch_balance_usd(&http, &prices, "https://mempool.space/api", "nope")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid Bitcoin address"));
    }
}
