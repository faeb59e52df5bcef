//! Exchange balance adapters
//!
//! Each venue exposes several sub-accounts (spot, funding, earn, ...). They
//! are fetched concurrently and independently: a category that fails is logged
//! and left out of the total, since read-only keys often lack permission for
//! some endpoints. Only when every category fails does the call error.

pub mod backpack;
pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod okx;
pub mod signing;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::price::PriceOracle;
use crate::wallet::{CexAccount, CexName, WalletStatus};

use transport::{HttpRequest, HttpTransport};

/// Normalized exchange balance in USD
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeBalance {
    pub balance: f64,
    /// USD per sub-account category
    pub breakdown: BTreeMap<String, f64>,
    pub status: WalletStatus,
}

impl ExchangeBalance {
    /// Account reachable but holding nothing
    pub fn zero() -> Self {
        Self {
            balance: 0.0,
            breakdown: BTreeMap::new(),
            status: WalletStatus::Success,
        }
    }

    /// Sum the categories that succeeded; first error if none did
    pub fn from_categories(exchange: CexName, results: Vec<(&str, Result<f64>)>) -> Result<Self> {
        let mut breakdown = BTreeMap::new();
        let mut first_error = None;

        for (category, result) in results {
            match result {
                Ok(value) => {
                    debug!("{} {}: ${:.2}", exchange, category, value);
                    breakdown.insert(category.to_string(), value);
                }
                Err(e) => {
                    warn!("{} {} balance unavailable: {}", exchange, category, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if breakdown.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| Error::exchange(exchange.to_string(), "no balance categories")));
        }

        Ok(Self {
            balance: breakdown.values().sum(),
            breakdown,
            status: WalletStatus::Success,
        })
    }
}

/// Plaintext credentials for one signed call
pub struct ApiCredentials<'a> {
    pub api_key: &'a str,
    pub api_secret: &'a str,
    pub passphrase: &'a str,
}

impl<'a> ApiCredentials<'a> {
    pub fn from_account(account: &'a CexAccount) -> Self {
        Self {
            api_key: &account.api_key,
            api_secret: &account.api_secret,
            passphrase: &account.passphrase,
        }
    }
}

/// Result of an interactive connection test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CexTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read a JSON number that exchanges may send as a string
pub(crate) fn num(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Best human-readable message from an upstream error body
fn upstream_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for field in ["msg", "retMsg", "message", "error"] {
            if let Some(msg) = json.get(field).and_then(Value::as_str) {
                if !msg.is_empty() {
                    return msg.to_string();
                }
            }
        }
    }
    let trimmed: String = body.trim().chars().take(200).collect();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, trimmed)
    }
}

/// Shared dependencies of every exchange adapter
pub struct ExchangeClient {
    http: Arc<dyn HttpTransport>,
    prices: Arc<dyn PriceOracle>,
    config: ExchangeConfig,
}

impl ExchangeClient {
    pub fn new(http: Arc<dyn HttpTransport>, prices: Arc<dyn PriceOracle>, config: ExchangeConfig) -> Self {
        Self {
            http,
            prices,
            config,
        }
    }

    pub(crate) fn prices(&self) -> &dyn PriceOracle {
        self.prices.as_ref()
    }

    pub(crate) fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Send a signed request; non-2xx becomes an exchange error with the upstream message
    pub(crate) async fn send_json(&self, exchange: CexName, request: HttpRequest) -> Result<Value> {
        let response = self.http.send(request).await?;
        if !response.is_success() {
            return Err(Error::exchange(
                exchange.to_string(),
                upstream_message(response.status, &response.body),
            ));
        }
        serde_json::from_str(&response.body).map_err(|e| {
            Error::exchange(exchange.to_string(), format!("malformed response: {}", e))
        })
    }

    /// Total USD balance for one exchange
    pub async fn get_balance(&self, exchange: CexName, creds: &ApiCredentials<'_>) -> Result<ExchangeBalance> {
        if creds.api_key.is_empty() {
            return Err(Error::MissingConfig("apiKey".to_string()));
        }
        if creds.api_secret.is_empty() {
            return Err(Error::MissingConfig("apiSecret".to_string()));
        }
        if exchange.requires_passphrase() && creds.passphrase.is_empty() {
            return Err(Error::MissingConfig("passphrase".to_string()));
        }

        let balance = match exchange {
            CexName::Binance => binance::fetch_balance(self, creds).await?,
            CexName::Okx => okx::fetch_balance(self, creds).await?,
            CexName::Bybit => bybit::fetch_balance(self, creds).await?,
            CexName::Bitget => bitget::fetch_balance(self, creds).await?,
            CexName::Backpack => backpack::fetch_balance(self, creds).await?,
        };
        info!(
            "{} balance: ${:.2} across {} categories",
            exchange,
            balance.balance,
            balance.breakdown.len()
        );
        Ok(balance)
    }

    /// Balance for a decrypted stored account
    pub async fn get_cex_balance(&self, account: &CexAccount) -> Result<ExchangeBalance> {
        if account.is_encrypted {
            return Err(Error::Internal(
                "exchange adapters need decrypted credentials".to_string(),
            ));
        }
        self.get_balance(account.cex_name, &ApiCredentials::from_account(account))
            .await
    }

    /// Connection test for freshly entered keys; never errors
    pub async fn test_cex_api(
        &self,
        exchange: CexName,
        api_key: &str,
        api_secret: &str,
        passphrase: &str,
    ) -> CexTestResult {
        let creds = ApiCredentials {
            api_key: api_key.trim(),
            api_secret: api_secret.trim(),
            passphrase: passphrase.trim(),
        };
        match self.get_balance(exchange, &creds).await {
            Ok(balance) => CexTestResult {
                success: true,
                balance: Some(balance.balance),
                error: None,
            },
            Err(e) => {
                warn!("{} connection test failed: {}", exchange, e);
                CexTestResult {
                    success: false,
                    balance: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::price::StaticPrices;
    use transport::mock::MockTransport;

    pub fn prices() -> StaticPrices {
        StaticPrices::new()
            .with("BTC", 50_000.0)
            .with("ETH", 2_000.0)
            .with("SOL", 100.0)
    }

    pub fn client(http: Arc<MockTransport>) -> ExchangeClient {
        ExchangeClient::new(http, Arc::new(prices()), ExchangeConfig::default())
    }

    pub fn creds() -> ApiCredentials<'static> {
        ApiCredentials {
            api_key: "test-key",
            api_secret: "test-secret",
            passphrase: "test-pass",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use transport::mock::MockTransport;

    #[test]
    fn test_from_categories_sums_successes() {
        let balance = ExchangeBalance::from_categories(
            CexName::Okx,
            vec![
                ("trading", Ok(100.0)),
                ("funding", Ok(50.0)),
                ("savings", Err(Error::exchange("okx", "forbidden"))),
            ],
        )
        .unwrap();
        assert_eq!(balance.balance, 150.0);
        assert_eq!(balance.breakdown.len(), 2);
        assert!(!balance.breakdown.contains_key("savings"));
    }

    #[test]
    fn test_from_categories_all_failed_returns_first_error() {
        let err = ExchangeBalance::from_categories(
            CexName::Bybit,
            vec![
                ("unified", Err(Error::exchange("bybit", "invalid api key"))),
                ("funding", Err(Error::exchange("bybit", "later"))),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid api key"));
    }

    #[test]
    fn test_upstream_message_extraction() {
        assert_eq!(
            upstream_message(401, r#"{"code":-2015,"msg":"Invalid API-key"}"#),
            "Invalid API-key"
        );
        assert_eq!(
            upstream_message(403, r#"{"retCode":10003,"retMsg":"API key is invalid."}"#),
            "API key is invalid."
        );
        assert_eq!(upstream_message(502, ""), "HTTP 502");
        assert_eq!(upstream_message(500, "oops"), "HTTP 500: oops");
    }

    #[tokio::test]
    async fn test_missing_passphrase_fails_before_network() {
        let http = Arc::new(MockTransport::new());
        let client = client(http.clone());
        let creds = ApiCredentials {
            api_key: "k",
            api_secret: "s",
            passphrase: "",
        };
        let err = client.get_balance(CexName::Bitget, &creds).await.unwrap_err();
        assert!(matches!(err, Error::MissingConfig(f) if f == "passphrase"));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_connection_test_never_errors() {
        let http = Arc::new(
            MockTransport::new()
                .route("/sapi/v1/asset/wallet/balance", 401, r#"{"code":-2015,"msg":"Invalid API-key"}"#)
                .route("/api/v3/account", 401, r#"{"code":-2015,"msg":"Invalid API-key"}"#),
        );
        let result = client(http)
            .test_cex_api(CexName::Binance, "k", "s", "")
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Invalid API-key"));
    }
}
