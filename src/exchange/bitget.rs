//! Bitget: spot, USDT-margined futures and earn accounts

use serde_json::Value;

use crate::error::{Error, Result};
use crate::price::value_holdings;
use crate::wallet::CexName;

use super::signing::{hmac_sha256_base64, millis_timestamp};
use super::transport::HttpRequest;
use super::{num, ApiCredentials, ExchangeBalance, ExchangeClient};

const SPOT_PATH: &str = "/api/v2/spot/account/assets";
const FUTURES_PATH: &str = "/api/v2/mix/account/accounts";
const EARN_PATH: &str = "/api/v2/earn/account/assets";

const SUCCESS_CODE: &str = "00000";

/// Pre-hash: `timestamp + METHOD + path[?query] + body`
fn signed_get(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    query: Option<&str>,
) -> Result<HttpRequest> {
    let timestamp = millis_timestamp().to_string();
    let request_path = match query {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    };
    let signature = hmac_sha256_base64(
        creds.api_secret,
        &format!("{}GET{}", timestamp, request_path),
    )?;

    let url = format!(
        "{}{}",
        client.config().bitget_url.trim_end_matches('/'),
        request_path
    );
    Ok(HttpRequest::get(url)
        .header("ACCESS-KEY", creds.api_key)
        .header("ACCESS-SIGN", signature)
        .header("ACCESS-TIMESTAMP", timestamp)
        .header("ACCESS-PASSPHRASE", creds.passphrase)
        .header("locale", "en-US"))
}

async fn get_data(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    query: Option<&str>,
) -> Result<Vec<Value>> {
    let json = client
        .send_json(CexName::Bitget, signed_get(client, creds, path, query)?)
        .await?;
    let code = json.get("code").and_then(Value::as_str).unwrap_or("");
    if code != SUCCESS_CODE {
        let msg = json.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(Error::exchange("bitget", format!("{} (code {})", msg, code)));
    }
    Ok(json
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

async fn spot(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let data = get_data(client, creds, SPOT_PATH, None).await?;
    let holdings: Vec<(String, f64)> = data
        .iter()
        .filter_map(|asset| {
            let coin = asset.get("coin").and_then(Value::as_str)?;
            let amount = num(&asset["available"]) + num(&asset["frozen"]) + num(&asset["locked"]);
            Some((coin.to_string(), amount))
        })
        .collect();
    Ok(value_holdings(client.prices(), &holdings).await)
}

async fn futures_equity(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let data = get_data(client, creds, FUTURES_PATH, Some("productType=USDT-FUTURES")).await?;
    Ok(data.iter().map(|account| num(&account["usdtEquity"])).sum())
}

async fn earn(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let data = get_data(client, creds, EARN_PATH, None).await?;
    let holdings: Vec<(String, f64)> = data
        .iter()
        .filter_map(|asset| {
            let coin = asset.get("coin").and_then(Value::as_str)?;
            Some((coin.to_string(), num(&asset["amount"])))
        })
        .collect();
    Ok(value_holdings(client.prices(), &holdings).await)
}

pub(super) async fn fetch_balance(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
) -> Result<ExchangeBalance> {
    let (spot, futures_usd, earn) = futures::join!(
        spot(client, creds),
        futures_equity(client, creds),
        earn(client, creds),
    );

    ExchangeBalance::from_categories(
        CexName::Bitget,
        vec![("spot", spot), ("futures", futures_usd), ("earn", earn)],
    )
}
