//! Daily balance history
//!
//! Flat per-date-per-wallet records plus one synthetic `summary` record
//! holding the day's total.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Wallet, WalletType};

/// Chain label of the synthetic daily-total record
pub const SUMMARY_CHAIN: &str = "summary";

/// One wallet's balance on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// YYYY-MM-DD
    pub date: String,
    #[serde(default)]
    pub address: String,
    /// Chain type, or `summary` for the daily total
    pub chain_type: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_type: Option<WalletType>,
    pub balance: f64,
}

impl HistoryRecord {
    pub fn is_summary(&self) -> bool {
        self.chain_type == SUMMARY_CHAIN
    }
}

/// Replace `date`'s records with a fresh snapshot of `wallets`
///
/// Returns the day's total.
pub fn snapshot(history: &mut Vec<HistoryRecord>, wallets: &[Wallet], date: &str) -> f64 {
    history.retain(|r| r.date != date);

    let mut total = 0.0;
    for wallet in wallets {
        total += wallet.balance;
        history.push(HistoryRecord {
            date: date.to_string(),
            address: wallet.address().to_string(),
            chain_type: wallet.chain_type().to_string(),
            remark: wallet.remark.clone(),
            wallet_type: Some(wallet.wallet_type),
            balance: wallet.balance,
        });
    }

    history.push(HistoryRecord {
        date: date.to_string(),
        address: String::new(),
        chain_type: SUMMARY_CHAIN.to_string(),
        remark: String::new(),
        wallet_type: None,
        balance: total,
    });

    total
}

/// Daily totals sorted by date, from summary records
pub fn daily_totals(history: &[HistoryRecord]) -> Vec<(String, f64)> {
    let totals: BTreeMap<&str, f64> = history
        .iter()
        .filter(|r| r.is_summary())
        .map(|r| (r.date.as_str(), r.balance))
        .collect();
    totals.into_iter().map(|(d, b)| (d.to_string(), b)).collect()
}
