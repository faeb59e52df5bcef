//! Best-effort valuation of cold holdings described only by their remark
//!
//! "Ledger 1,250.5 USDC" -> 1250.5 USDC. "Trezor 0.3" on a BTC entry -> 0.3 BTC.

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::price::PriceOracle;
use crate::wallet::ChainType;

lazy_static::lazy_static! {
    /// Standalone amount, thousands separators allowed, optionally followed
    /// by a ticker (spaced or glued). Hex literals match the first branch and
    /// are skipped so their digits never count as an amount.
    static ref AMOUNT: Regex = Regex::new(
        r"0[xX][0-9a-fA-F]+\b|(?:^|[^\w.])(\d[\d,]*(?:\.\d+)?)\s*([A-Za-z]{2,10})?\b"
    )
    .expect("Invalid amount regex");
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColdEstimate {
    pub amount: f64,
    pub symbol: String,
    pub usd: f64,
}

/// Extract `(amount, ticker)` from free text
pub fn parse_remark(remark: &str) -> Option<(f64, Option<String>)> {
    AMOUNT.captures_iter(remark).find_map(|captures| {
        let amount: f64 = captures.get(1)?.as_str().replace(',', "").parse().ok()?;
        let symbol = captures.get(2).map(|m| m.as_str().to_ascii_uppercase());
        Some((amount, symbol))
    })
}

/// Value a remark, falling back to the chain's native asset when the ticker
/// is absent or unpriced
///
/// No amount in the remark yields a zero estimate with a warning.
pub async fn estimate_cold_balance(
    remark: &str,
    chain: ChainType,
    prices: &dyn PriceOracle,
) -> Result<ColdEstimate> {
    let Some((amount, ticker)) = parse_remark(remark) else {
        warn!("No amount found in cold wallet remark '{}', using 0", remark);
        return Ok(ColdEstimate {
            amount: 0.0,
            symbol: chain.native_symbol().unwrap_or("USD").to_string(),
            usd: 0.0,
        });
    };

    let candidates = ticker
        .into_iter()
        .chain(chain.native_symbol().map(str::to_string));
    for symbol in candidates {
        if let Some(price) = prices.price_usd(&symbol).await {
            return Ok(ColdEstimate {
                amount,
                usd: amount * price,
                symbol,
            });
        }
    }

    Err(Error::Chain(format!(
        "no price for the asset in cold wallet remark '{}'",
        remark
    )))
}
