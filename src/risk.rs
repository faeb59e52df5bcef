//! Portfolio concentration and custody heuristics
//!
//! Thresholds come from [`RiskConfig`] and are tunable; nothing here is a
//! correctness rule, only a prompt to look closer.

use std::fmt;

use serde::Serialize;

use crate::config::RiskConfig;
use crate::wallet::{Wallet, WalletStatus, WalletType};

/// USD held under one storage classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeShare {
    pub wallet_type: WalletType,
    pub usd: f64,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LargestWallet {
    pub label: String,
    pub usd: f64,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskWarning {
    Concentration { label: String, pct: f64 },
    HotExposure { pct: f64 },
    CexExposure { pct: f64 },
    StaleBalances { count: usize },
}

impl fmt::Display for RiskWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskWarning::Concentration { label, pct } => {
                write!(f, "{} holds {:.1}% of the portfolio", label, pct)
            }
            RiskWarning::HotExposure { pct } => {
                write!(f, "{:.1}% sits in hot wallets", pct)
            }
            RiskWarning::CexExposure { pct } => {
                write!(f, "{:.1}% is custodied on exchanges", pct)
            }
            RiskWarning::StaleBalances { count } => {
                write!(f, "{} wallet(s) failed their last update; totals may be stale", count)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReport {
    pub total: f64,
    pub by_wallet_type: Vec<TypeShare>,
    pub largest_wallet: Option<LargestWallet>,
    pub warnings: Vec<RiskWarning>,
}

impl RiskReport {
    pub fn share(&self, wallet_type: WalletType) -> f64 {
        self.by_wallet_type
            .iter()
            .find(|s| s.wallet_type == wallet_type)
            .map(|s| s.pct)
            .unwrap_or(0.0)
    }
}

/// Human label for a ledger row
pub fn wallet_label(wallet: &Wallet) -> String {
    if !wallet.remark.is_empty() {
        wallet.remark.clone()
    } else if !wallet.address().is_empty() {
        wallet.address().to_string()
    } else {
        wallet.chain_type().to_string()
    }
}

fn pct(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

pub fn assess(wallets: &[Wallet], thresholds: &RiskConfig) -> RiskReport {
    let total: f64 = wallets.iter().map(|w| w.balance.max(0.0)).sum();

    let by_wallet_type: Vec<TypeShare> = [WalletType::Hot, WalletType::Cold, WalletType::Cex]
        .into_iter()
        .map(|wallet_type| {
            let usd: f64 = wallets
                .iter()
                .filter(|w| w.wallet_type == wallet_type)
                .map(|w| w.balance.max(0.0))
                .sum();
            TypeShare {
                wallet_type,
                usd,
                pct: pct(usd, total),
            }
        })
        .collect();

    let largest_wallet = wallets
        .iter()
        .filter(|w| w.balance > 0.0)
        .max_by(|a, b| a.balance.total_cmp(&b.balance))
        .map(|w| LargestWallet {
            label: wallet_label(w),
            usd: w.balance,
            pct: pct(w.balance, total),
        });

    let mut report = RiskReport {
        total,
        by_wallet_type,
        largest_wallet,
        warnings: Vec::new(),
    };

    if let Some(largest) = &report.largest_wallet {
        // a single-wallet portfolio is trivially 100% concentrated
        if wallets.len() > 1 && largest.pct >= thresholds.single_wallet_concentration_pct {
            report.warnings.push(RiskWarning::Concentration {
                label: largest.label.clone(),
                pct: largest.pct,
            });
        }
    }

    let hot = report.share(WalletType::Hot);
    if total > 0.0 && hot >= thresholds.hot_wallet_warn_pct {
        report.warnings.push(RiskWarning::HotExposure { pct: hot });
    }
    let cex = report.share(WalletType::Cex);
    if total > 0.0 && cex >= thresholds.cex_warn_pct {
        report.warnings.push(RiskWarning::CexExposure { pct: cex });
    }

    let failed = wallets
        .iter()
        .filter(|w| w.status == WalletStatus::Error)
        .count();
    if failed > 0 {
        report.warnings.push(RiskWarning::StaleBalances { count: failed });
    }

    report
}

/// Plain-text holdings summary used as the analysis prompt
pub fn summary_text(wallets: &[Wallet], report: &RiskReport) -> String {
    let mut lines = vec![format!("Total: ${:.2}", report.total)];
    for share in &report.by_wallet_type {
        lines.push(format!(
            "{}: ${:.2} ({:.1}%)",
            share.wallet_type, share.usd, share.pct
        ));
    }
    lines.push("Wallets:".to_string());
    for wallet in wallets {
        lines.push(format!(
            "- {} [{} / {}]: ${:.2}",
            wallet_label(wallet),
            wallet.chain_type(),
            wallet.wallet_type,
            wallet.balance
        ));
        for (category, usd) in &wallet.breakdown {
            lines.push(format!("    {}: ${:.2}", category, usd));
        }
    }
    if !report.warnings.is_empty() {
        lines.push("Flags:".to_string());
        lines.extend(report.warnings.iter().map(|w| format!("- {}", w)));
    }
    lines.join("\n")
}
