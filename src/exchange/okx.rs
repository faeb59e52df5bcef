//! OKX: trading, funding and savings accounts

use serde_json::Value;

use crate::error::{Error, Result};
use crate::price::value_holdings;
use crate::wallet::CexName;

use super::signing::{hmac_sha256_base64, iso_timestamp_ms, millis_timestamp};
use super::transport::HttpRequest;
use super::{num, ApiCredentials, ExchangeBalance, ExchangeClient};

const TRADING_PATH: &str = "/api/v5/account/balance";
const FUNDING_PATH: &str = "/api/v5/asset/balances";
const SAVINGS_PATH: &str = "/api/v5/finance/savings/balance";

/// Pre-hash: `timestamp + METHOD + requestPath + body`
fn signed_get(client: &ExchangeClient, creds: &ApiCredentials<'_>, path: &str) -> Result<HttpRequest> {
    let timestamp = iso_timestamp_ms(millis_timestamp());
    let signature = hmac_sha256_base64(creds.api_secret, &format!("{}GET{}", timestamp, path))?;

    let url = format!("{}{}", client.config().okx_url.trim_end_matches('/'), path);
    Ok(HttpRequest::get(url)
        .header("OK-ACCESS-KEY", creds.api_key)
        .header("OK-ACCESS-SIGN", signature)
        .header("OK-ACCESS-TIMESTAMP", timestamp)
        .header("OK-ACCESS-PASSPHRASE", creds.passphrase))
}

/// `data` array of a `{"code":"0","msg":"","data":[...]}` envelope
async fn get_data(client: &ExchangeClient, creds: &ApiCredentials<'_>, path: &str) -> Result<Vec<Value>> {
    let json = client
        .send_json(CexName::Okx, signed_get(client, creds, path)?)
        .await?;
    let code = json.get("code").and_then(Value::as_str).unwrap_or("");
    if code != "0" {
        let msg = json.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(Error::exchange("okx", format!("{} (code {})", msg, code)));
    }
    Ok(json
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

async fn trading(client: &ExchangeClient, creds: &ApiCredentials<'_>) -> Result<f64> {
    let data = get_data(client, creds, TRADING_PATH).await?;
    Ok(data.first().map(|d| num(&d["totalEq"])).unwrap_or(0.0))
}

async fn priced(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
    path: &str,
    amount_field: &str,
) -> Result<f64> {
    let data = get_data(client, creds, path).await?;
    let holdings: Vec<(String, f64)> = data
        .iter()
        .filter_map(|d| {
            let ccy = d.get("ccy").and_then(Value::as_str)?;
            Some((ccy.to_string(), num(&d[amount_field])))
        })
        .collect();
    Ok(value_holdings(client.prices(), &holdings).await)
}

pub(super) async fn fetch_balance(
    client: &ExchangeClient,
    creds: &ApiCredentials<'_>,
) -> Result<ExchangeBalance> {
    let (trading, funding, savings) = futures::join!(
        trading(client, creds),
        priced(client, creds, FUNDING_PATH, "bal"),
        priced(client, creds, SAVINGS_PATH, "amt"),
    );

    ExchangeBalance::from_categories(
        CexName::Okx,
        vec![("trading", trading), ("funding", funding), ("savings", savings)],
    )
}
