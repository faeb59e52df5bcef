//! SOL balance over an ordered list of RPC endpoints
//!
//! Endpoints are tried in order until one answers. This fallback list is the
//! only automatic retry in the chain layer.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::config::mask_url;
use crate::error::{Error, Result};
use crate::price::PriceOracle;

use super::native_usd;

const LAMPORTS_PER_SOL: f64 = 1e9;

/// Endpoint order: user RPC, then Helius when keyed, then the defaults
pub fn endpoint_order(
    custom_rpc: &str,
    helius_url: &str,
    helius_key: &str,
    defaults: &[String],
) -> Vec<String> {
    let mut endpoints: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !url.is_empty() && !endpoints.contains(&url) {
            endpoints.push(url);
        }
    };

    push(custom_rpc.trim().to_string());
    if !helius_key.is_empty() {
        push(format!(
            "{}/?api-key={}",
            helius_url.trim_end_matches('/'),
            helius_key
        ));
    }
    for url in defaults {
        push(url.trim().to_string());
    }
    endpoints
}

/// Run `fetch` against each endpoint until one succeeds
pub async fn first_success<T, F, Fut>(endpoints: &[String], mut fetch: F) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if endpoints.is_empty() {
        return Err(Error::Rpc("no Solana RPC endpoints configured".to_string()));
    }

    for url in endpoints {
        match fetch(url.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => warn!("Solana RPC {} failed: {}", mask_url(url), e),
        }
    }

    Err(Error::Rpc(format!(
        "all {} Solana RPC endpoints failed",
        endpoints.len()
    )))
}

async fn get_lamports(url: String, pubkey: Pubkey, timeout: Duration) -> Result<u64> {
    let rpc = RpcClient::new_with_timeout(url, timeout);
    rpc.get_balance(&pubkey)
        .await
        .map_err(|e| Error::Rpc(e.to_string()))
}

pub async fn fetch_balance_usd(
    endpoints: &[String],
    prices: &dyn PriceOracle,
    address: &str,
    timeout: Duration,
) -> Result<f64> {
    let pubkey = Pubkey::from_str(address.trim())
        .map_err(|e| Error::Chain(format!("invalid Solana address {}: {}", address, e)))?;

    let lamports = first_success(endpoints, |url| get_lamports(url, pubkey, timeout)).await?;
    let sol = lamports as f64 / LAMPORTS_PER_SOL;
    debug!("{} holds {} SOL", address, sol);

    native_usd(prices, "SOL", sol).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::StaticPrices;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_custom_rpc_first_and_dedup() {
        let defaults = urls(&["https://a", "https://b"]);
        let order = endpoint_order("https://b", "https://helius", "", &defaults);
        assert_eq!(order, urls(&["https://b", "https://a"]));

        let order = endpoint_order("", "https://helius/", "KEY", &defaults);
        assert_eq!(order, urls(&["https://helius/?api-key=KEY", "https://a", "https://b"]));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_endpoint() {
        let endpoints = urls(&["https://down", "https://also-down", "https://up"]);
        let mut tried = Vec::new();
        let lamports = first_success(&endpoints, |url| {
            tried.push(url.clone());
            async move {
                if url == "https://up" {
                    Ok(2_500_000_000u64)
                } else {
                    Err(Error::Rpc("connection refused".into()))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(lamports, 2_500_000_000);
        assert_eq!(tried.len(), 3);
    }

    #[tokio::test]
    async fn test_all_endpoints_failing() {
        let endpoints = urls(&["https://a", "https://b"]);
        let err = first_success(&endpoints, |_| async {
            Err::<u64, _>(Error::Rpc("timeout".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Rpc(ref m) if m.contains("all 2")));
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_rpc() {
        let prices = StaticPrices::new().with("SOL", 100.0);
        let err = fetch_balance_usd(&[], &prices, "not-a-pubkey", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
    }
}
