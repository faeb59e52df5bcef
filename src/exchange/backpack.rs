//! Backpack: spot capital and borrow/lend positions, ED25519-signed

use serde_json::Value;

use crate::error::Result;
use crate::price::value_holdings;
use crate::wallet::CexName;

use super::signing::{backpack_signing_string, ed25519_sign_base64, millis_timestamp};
use super::transport::HttpRequest;
use super::{num, ApiCredentials, ExchangeBalance, ExchangeClient};

const CAPITAL_PATH: &str = "/api/v1/capital";
const LENDING_PATH: &str = "/api/v1/borrowLend/positions";

fn signed_get(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    instruction: &str,
) -> Result<HttpRequest> {
    let timestamp = millis_timestamp();
    let window = client.config().recv_window_ms;
    let message = backpack_signing_string(instruction, &[], timestamp, window);
    let (signature, _public_key) = ed25519_sign_base64(creds.api_secret, &message)?;

    let url = format!(
        "{}{}",
        client.config().backpack_url.trim_end_matches('/'),
        path
    );
    Ok(HttpRequest::get(url)
        .header("X-API-Key", creds.api_key)
        .header("X-Signature", signature)
        .header("X-Timestamp", timestamp.to_string())
        .header("X-Window", window.to_string()))
}

/// `{"SOL": {"available": "1", "locked": "0", "staked": "0"}, ...}`
async fn spot(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let request = signed_get(client, creds, CAPITAL_PATH, "balanceQuery")?;
    let json = client.send_json(CexName::Backpack, request).await?;

    let holdings: Vec<(String, f64)> = json
        .as_object()
        .map(|assets| {
            assets
                .iter()
                .map(|(symbol, b)| {
                    let amount = num(&b["available"]) + num(&b["locked"]) + num(&b["staked"]);
                    (symbol.clone(), amount)
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(value_holdings(client.prices(), &holdings).await)
}

/// Net lending value: lent quantities add, borrowed quantities subtract
async fn lending(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let request = signed_get(client, creds, LENDING_PATH, "borrowLendPositionQuery")?;
    let json = client.send_json(CexName::Backpack, request).await?;

    let mut lent = Vec::new();
    let mut borrowed = Vec::new();
    for position in json.as_array().into_iter().flatten() {
        let Some(symbol) = position.get("symbol").and_then(Value::as_str) else {
            continue;
        };
        let quantity = num(&position["netQuantity"]);
        if quantity >= 0.0 {
            lent.push((symbol.to_string(), quantity));
        } else {
            borrowed.push((symbol.to_string(), -quantity));
        }
    }

    let prices = client.prices();
    Ok(value_holdings(prices, &lent).await - value_holdings(prices, &borrowed).await)
}

pub(super) async fn fetch_balance(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
) -> Result<ExchangeBalance> {
    let (spot, lending) = futures::join!(spot(client, creds), lending(client, creds));

    ExchangeBalance::from_categories(CexName::Backpack, vec![("spot", spot), ("lending", lending)])
}
