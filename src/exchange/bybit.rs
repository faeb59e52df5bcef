//! Bybit: unified trading, funding and flexible-savings earn accounts

use serde_json::Value;

use crate::error::{Error, Result};
use crate::price::value_holdings;
use crate::wallet::CexName;

use super::signing::{hmac_sha256_hex, millis_timestamp};
use super::transport::HttpRequest;
use super::{num, ApiCredentials, ExchangeBalance, ExchangeClient};

const UNIFIED_PATH: &str = "/v5/account/wallet-balance";
const FUNDING_PATH: &str = "/v5/asset/transfer/query-account-coins-balance";
const EARN_PATH: &str = "/v5/earn/position";

/// Pre-hash: `timestamp + apiKey + recvWindow + queryString`
fn signed_get(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    query: &str,
) -> Result<HttpRequest> {
    let timestamp = millis_timestamp().to_string();
    let recv_window = client.config().recv_window_ms.to_string();
    let signature = hmac_sha256_hex(
        creds.api_secret,
        &format!("{}{}{}{}", timestamp, creds.api_key, recv_window, query),
    )?;

    let url = format!(
        "{}{}?{}",
        client.config().bybit_url.trim_end_matches('/'),
        path,
        query
    );
    Ok(HttpRequest::get(url)
        .header("X-BAPI-API-KEY", creds.api_key)
        .header("X-BAPI-SIGN", signature)
        .header("X-BAPI-TIMESTAMP", timestamp)
        .header("X-BAPI-RECV-WINDOW", recv_window))
}

/// `result` of a `{"retCode":0,"retMsg":"OK","result":{...}}` envelope
async fn get_result(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    query: &str,
) -> Result<Value> {
    let json = client
        .send_json(CexName::Bybit, signed_get(client, creds, path, query)?)
        .await?;
    let code = json.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
    if code != 0 {
        let msg = json.get("retMsg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(Error::exchange("bybit", format!("{} (retCode {})", msg, code)));
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

fn coin_holdings(items: Option<&Vec<Value>>, amount_field: &str) -> Vec<(String, f64)> {
    items
        .map(|list| {
            list.iter()
                .filter_map(|item| {
                    let coin = item.get("coin").and_then(Value::as_str)?;
                    Some((coin.to_string(), num(&item[amount_field])))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn unified(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let result = get_result(client, creds, UNIFIED_PATH, "accountType=UNIFIED").await?;
    Ok(result["list"]
        .as_array()
        .and_then(|l| l.first())
        .map(|account| num(&account["totalEquity"]))
        .unwrap_or(0.0))
}

async fn funding(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let result = get_result(client, creds, FUNDING_PATH, "accountType=FUND").await?;
    let holdings = coin_holdings(result["balance"].as_array(), "walletBalance");
    Ok(value_holdings(client.prices(), &holdings).await)
}

async fn earn(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let result = get_result(client, creds, EARN_PATH, "category=FlexibleSaving").await?;
    let holdings = coin_holdings(result["list"].as_array(), "amount");
    Ok(value_holdings(client.prices(), &holdings).await)
}

pub(super) async fn fetch_balance(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
) -> Result<ExchangeBalance> {
    let (unified, funding, earn) = futures::join!(
        unified(client, creds),
        funding(client, creds),
        earn(client, creds),
    );

    ExchangeBalance::from_categories(
        CexName::Bybit,
        vec![("unified", unified), ("funding", funding), ("earn", earn)],
    )
}
