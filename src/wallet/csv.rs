//! Single-line wallet codec
//!
//! Format: `address, chain_type, remark, wallet_type`. Remark and wallet type
//! are optional; the type defaults by chain.

use crate::error::{Error, Result};

use super::types::{ChainType, Wallet, WalletType};

/// Parse one `address, chain, remark, type` line into a pending wallet
pub fn parse_wallet_line(line: &str) -> Result<Wallet> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 2 {
        return Err(Error::Parse(format!(
            "expected at least 'address, chain_type', got: {}",
            line.trim()
        )));
    }
    if fields.len() > 4 {
        return Err(Error::Parse(format!(
            "too many fields ({}), remarks cannot contain commas",
            fields.len()
        )));
    }

    let address = fields[0];
    let chain_type: ChainType = fields[1].parse()?;
    let remark = fields.get(2).copied().unwrap_or("");
    let wallet_type = match fields.get(3).copied() {
        Some(t) if !t.is_empty() => t.parse()?,
        _ => WalletType::default_for(chain_type),
    };

    if address.is_empty() && wallet_type != WalletType::Cold {
        return Err(Error::Parse(
            "address may only be empty for cold wallets".to_string(),
        ));
    }

    Ok(Wallet::new(address, chain_type, remark, wallet_type))
}

/// Serialize a wallet back into its line form
pub fn to_wallet_line(wallet: &Wallet) -> String {
    [
        wallet.address().to_string(),
        wallet.chain_type().to_string(),
        wallet.remark.clone(),
        wallet.wallet_type.to_string(),
    ]
    .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::types::{WalletKind, WalletStatus};

    #[test]
    fn test_parse_full_line() {
        let wallet = parse_wallet_line("0xabc, evm, MyWallet, cold").unwrap();
        assert_eq!(wallet.address(), "0xabc");
        assert_eq!(wallet.chain_type(), ChainType::Evm);
        assert_eq!(wallet.remark, "MyWallet");
        assert_eq!(wallet.wallet_type, WalletType::Cold);
        assert_eq!(wallet.balance, 0.0);
        assert_eq!(wallet.status, WalletStatus::Pending);
        assert!(wallet.last_updated.is_none());
    }

    #[test]
    fn test_line_round_trip() {
        let line = "0xabc, evm, MyWallet, cold";
        let wallet = parse_wallet_line(line).unwrap();
        assert_eq!(to_wallet_line(&wallet), line);
        assert_eq!(parse_wallet_line(&to_wallet_line(&wallet)).unwrap(), wallet);
    }

    #[test]
    fn test_defaults_wallet_type() {
        let wallet = parse_wallet_line("bc1qxyz,btc").unwrap();
        assert_eq!(wallet.wallet_type, WalletType::Hot);
        assert_eq!(wallet.remark, "");
    }

    #[test]
    fn test_cold_manual_entry() {
        let wallet = parse_wallet_line(", btc, 0.5 BTC trezor, cold").unwrap();
        assert!(matches!(wallet.kind, WalletKind::Manual { .. }));
        assert_eq!(to_wallet_line(&wallet), ", btc, 0.5 BTC trezor, cold");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_wallet_line("0xabc").is_err());
        assert!(parse_wallet_line("0xabc, tron").is_err());
        assert!(parse_wallet_line("0xabc, evm, x, lukewarm").is_err());
        assert!(parse_wallet_line(", evm, x, hot").is_err());
        assert!(parse_wallet_line("a, evm, b, hot, extra").is_err());
    }
}
