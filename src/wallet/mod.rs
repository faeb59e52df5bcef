//! Portfolio ledger data model
//!
//! Wallet rows (on-chain, manual and exchange-mirrored), exchange account
//! credentials, the user settings bag, and daily history snapshots.

pub mod csv;
pub mod history;
pub mod types;

pub use csv::{parse_wallet_line, to_wallet_line};
pub use history::{daily_totals, snapshot, HistoryRecord};
pub use types::{
    upsert_wallet, AiProvider, CexAccount, CexName, ChainType, EvmSource, Settings, SolSource,
    Wallet, WalletId, WalletKind, WalletStatus, WalletType,
};
