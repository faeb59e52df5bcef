//! Binance: consolidated wallet balance with a spot-only fallback
//!
//! `/sapi/v1/asset/wallet/balance` reports every wallet (spot, funding,
//! earn, futures...) already converted to USDT, but needs a key with wider
//! permissions. When it fails the spot account is priced asset by asset.

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::price::value_holdings;
use crate::wallet::CexName;

use super::signing::{build_query, hmac_sha256_hex, millis_timestamp};
use super::transport::HttpRequest;
use super::{num, ApiCredentials, ExchangeBalance, ExchangeClient};

const WALLET_BALANCE_PATH: &str = "/sapi/v1/asset/wallet/balance";
const ACCOUNT_PATH: &str = "/api/v3/account";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletEntry {
    wallet_name: String,
    balance: serde_json::Value,
}

#[derive(Deserialize)]
struct SpotBalance {
    asset: String,
    free: serde_json::Value,
    locked: serde_json::Value,
}

#[derive(Deserialize)]
struct SpotAccount {
    balances: Vec<SpotBalance>,
}

fn signed_request(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    mut params: Vec<(&str, String)>,
) -> Result<HttpRequest> {
    params.push(("recvWindow", client.config().recv_window_ms.to_string()));
    params.push(("timestamp", millis_timestamp().to_string()));
    let query = build_query(&params);
    let signature = hmac_sha256_hex(creds.api_secret, &query)?;

    let url = format!(
        "{}{}?{}&signature={}",
        client.config().binance_url.trim_end_matches('/'),
        path,
        query,
        signature
    );
    Ok(HttpRequest::get(url).header("X-MBX-APIKEY", creds.api_key))
}

async fn consolidated(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<ExchangeBalance> {
    let request = signed_request(
        client,
        creds,
        WALLET_BALANCE_PATH,
        vec![("quoteAsset", "USDT".to_string())],
    )?;
    let json = client.send_json(CexName::Binance, request).await?;
    let wallets: Vec<WalletEntry> = serde_json::from_value(json)?;

    let categories: Vec<(&str, Result<f64>)> = wallets
        .iter()
        .filter_map(|w| {
            let value = num(&w.balance);
            (value > 0.0).then(|| (w.wallet_name.as_str(), Ok(value)))
        })
        .collect();

    if categories.is_empty() {
        return Ok(ExchangeBalance::zero());
    }
    ExchangeBalance::from_categories(CexName::Binance, categories)
}

async fn spot_only(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<ExchangeBalance> {
    let request = signed_request(
        client,
        creds,
        ACCOUNT_PATH,
        vec![("omitZeroBalances", "true".to_string())],
    )?;
    let json = client.send_json(CexName::Binance, request).await?;
    let account: SpotAccount = serde_json::from_value(json)?;

    let holdings: Vec<(String, f64)> = account
        .balances
        .iter()
        .map(|b| (b.asset.clone(), num(&b.free) + num(&b.locked)))
        .collect();
    let total = value_holdings(client.prices(), &holdings).await;

    ExchangeBalance::from_categories(CexName::Binance, vec![("spot", Ok(total))])
}

pub(super) async fn fetch_balance(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
) -> Result<ExchangeBalance> {
    match consolidated(client, creds).await {
        Ok(balance) => Ok(balance),
        Err(e) => {
            warn!("Binance consolidated balance failed, falling back to spot: {}", e);
            spot_only(client, creds).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_support::{client, creds};
    use crate::exchange::transport::mock::MockTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_consolidated_breakdown() {
        let http = Arc::new(MockTransport::new().route(
            WALLET_BALANCE_PATH,
            200,
            r#"[
                {"activate":true,"balance":"1200.5","walletName":"Spot"},
                {"activate":true,"balance":"300","walletName":"Funding"},
                {"activate":true,"balance":"0","walletName":"Cross Margin"}
            ]"#,
        ));
        let balance = fetch_balance(&client(http.clone()), &creds()).await.unwrap();

        assert_eq!(balance.balance, 1500.5);
        assert_eq!(balance.breakdown.get("Spot"), Some(&1200.5));
        assert!(!balance.breakdown.contains_key("Cross Margin"));

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header_value("X-MBX-APIKEY"), Some("test-key"));
        assert!(requests[0].url.contains("quoteAsset=USDT"));
    }

    #[tokio::test]
    async fn test_signature_covers_query() {
        let http = Arc::new(MockTransport::new().route(WALLET_BALANCE_PATH, 200, "[]"));
        fetch_balance(&client(http.clone()), &creds()).await.unwrap();

        let url = http.requests()[0].url.clone();
        let query = url.split_once('?').unwrap().1;
        let (signed, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(hmac_sha256_hex("test-secret", signed).unwrap(), signature);
    }

    #[tokio::test]
    async fn test_falls_back_to_spot() {
        let http = Arc::new(
            MockTransport::new()
                .route(WALLET_BALANCE_PATH, 403, r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions"}"#)
                .route(
                    ACCOUNT_PATH,
                    200,
                    r#"{"balances":[
                        {"asset":"BTC","free":"0.5","locked":"0.25"},
                        {"asset":"USDT","free":"250","locked":"0"},
                        {"asset":"UNLISTED","free":"99","locked":"0"}
                    ]}"#,
                ),
        );
        let balance = fetch_balance(&client(http.clone()), &creds()).await.unwrap();

        assert_eq!(balance.balance, 37750.0);
        assert_eq!(balance.breakdown.get("spot"), Some(&37750.0));
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_both_tiers_failing_is_an_error() {
        let http = Arc::new(
            MockTransport::new()
                .route(WALLET_BALANCE_PATH, 403, r#"{"msg":"no permission"}"#)
                .route(ACCOUNT_PATH, 401, r#"{"msg":"Signature for this request is not valid."}"#),
        );
        let err = fetch_balance(&client(http), &creds()).await.unwrap_err();
        assert!(err.to_string().contains("Signature for this request is not valid."));
    }
}
