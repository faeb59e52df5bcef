//! Native EVM balance through the Etherscan v2 multichain API

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::exchange::transport::{HttpRequest, HttpTransport};
use crate::price::PriceOracle;

use super::native_usd;

const WEI_PER_ETH: f64 = 1e18;

#[derive(Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: String,
}

/// Fetch `address`'s native balance (wei) on `chain_id` and value it in USD
pub async fn fetch_native_balance_usd(
    http: &dyn HttpTransport,
    prices: &dyn PriceOracle,
    base_url: &str,
    chain_id: u64,
    address: &str,
    api_key: &str,
) -> Result<f64> {
    if api_key.is_empty() {
        return Err(Error::MissingConfig("etherscanApiKey".to_string()));
    }

    let url = format!(
        "{}?chainid={}&module=account&action=balance&address={}&tag=latest&apikey={}",
        base_url, chain_id, address, api_key
    );
    let response = http.send(HttpRequest::get(url)).await?;
    if !response.is_success() {
        return Err(Error::Chain(format!("Etherscan HTTP {}", response.status)));
    }

    let body: EtherscanResponse = response.json()?;
    if body.status != "1" {
        return Err(Error::Chain(format!(
            "Etherscan: {} ({})",
            body.message, body.result
        )));
    }

    let wei: f64 = body
        .result
        .parse()
        .map_err(|_| Error::Parse(format!("non-numeric wei balance: {}", body.result)))?;
    let eth = wei / WEI_PER_ETH;
    debug!("{} holds {} ETH", address, eth);

    native_usd(prices, "ETH", eth).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::transport::mock::MockTransport;
    use crate::price::StaticPrices;

    const BASE: &str = "https://api.etherscan.io/v2/api";

    #[tokio::test]
    async fn test_wei_to_usd() {
        let http = MockTransport::new().route(
            "action=balance",
            200,
            r#"{"status":"1","message":"OK","result":"1500000000000000000"}"#,
        );
        let prices = StaticPrices::new().with("ETH", 2000.0);
        let usd = fetch_native_balance_usd(&http, &prices, BASE, 1, "0xabc", "KEY")
            .await
            .unwrap();
        assert_eq!(usd, 3000.0);

        let url = &http.requests()[0].url;
        assert!(url.contains("chainid=1"));
        assert!(url.contains("address=0xabc"));
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let http = MockTransport::new().route(
            "action=balance",
            200,
            r#"{"status":"0","message":"NOTOK","result":"Invalid API Key"}"#,
        );
        let prices = StaticPrices::new().with("ETH", 2000.0);
        let err = fetch_native_balance_usd(&http, &prices, BASE, 1, "0xabc", "BAD")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Chain(ref m) if m.contains("Invalid API Key")));
    }

    #[tokio::test]
    async fn test_missing_key_before_network() {
        let http = MockTransport::new();
        let prices = StaticPrices::new();
        let err = fetch_native_balance_usd(&http, &prices, BASE, 1, "0xabc", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingConfig(_)));
        assert!(http.requests().is_empty());
    }
}
