//! Core types for the portfolio ledger
//!
//! Defines tracked wallets, exchange accounts and the user settings bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Network a wallet lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Evm,
    Sol,
    Btc,
    Cex,
}

impl ChainType {
    /// Native asset used to price balances on this chain
    pub fn native_symbol(&self) -> Option<&'static str> {
        match self {
            ChainType::Evm => Some("ETH"),
            ChainType::Sol => Some("SOL"),
            ChainType::Btc => Some("BTC"),
            ChainType::Cex => None,
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainType::Evm => write!(f, "evm"),
            ChainType::Sol => write!(f, "sol"),
            ChainType::Btc => write!(f, "btc"),
            ChainType::Cex => write!(f, "cex"),
        }
    }
}

impl FromStr for ChainType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" | "eth" => Ok(ChainType::Evm),
            "sol" | "solana" => Ok(ChainType::Sol),
            "btc" | "bitcoin" => Ok(ChainType::Btc),
            "cex" => Ok(ChainType::Cex),
            other => Err(Error::Parse(format!("unknown chain type: {}", other))),
        }
    }
}

/// Storage-risk classification, independent of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    /// Software wallet connected to the internet
    Hot,

    /// Hardware / paper wallet
    Cold,

    /// Custodied on a centralized exchange
    Cex,
}

impl WalletType {
    /// Default classification for a chain when none is given
    pub fn default_for(chain: ChainType) -> Self {
        match chain {
            ChainType::Cex => WalletType::Cex,
            _ => WalletType::Hot,
        }
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletType::Hot => write!(f, "hot"),
            WalletType::Cold => write!(f, "cold"),
            WalletType::Cex => write!(f, "cex"),
        }
    }
}

impl FromStr for WalletType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(WalletType::Hot),
            "cold" => Ok(WalletType::Cold),
            "cex" => Ok(WalletType::Cex),
            other => Err(Error::Parse(format!("unknown wallet type: {}", other))),
        }
    }
}

/// Outcome of the most recent balance fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    #[default]
    Pending,
    Success,
    Error,
}

/// Supported centralized exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CexName {
    Binance,
    Okx,
    Bybit,
    Bitget,
    Backpack,
}

impl CexName {
    pub const ALL: [CexName; 5] = [
        CexName::Binance,
        CexName::Okx,
        CexName::Bybit,
        CexName::Bitget,
        CexName::Backpack,
    ];

    /// OKX and Bitget keys are bound to an extra passphrase
    pub fn requires_passphrase(&self) -> bool {
        matches!(self, CexName::Okx | CexName::Bitget)
    }
}

impl std::fmt::Display for CexName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CexName::Binance => write!(f, "binance"),
            CexName::Okx => write!(f, "okx"),
            CexName::Bybit => write!(f, "bybit"),
            CexName::Bitget => write!(f, "bitget"),
            CexName::Backpack => write!(f, "backpack"),
        }
    }
}

impl FromStr for CexName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(CexName::Binance),
            "okx" => Ok(CexName::Okx),
            "bybit" => Ok(CexName::Bybit),
            "bitget" => Ok(CexName::Bitget),
            "backpack" => Ok(CexName::Backpack),
            other => Err(Error::Parse(format!("unknown exchange: {}", other))),
        }
    }
}

/// What a wallet entry points at
///
/// Every consumer matches on this instead of probing optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletKind {
    /// Address queryable through an explorer or RPC
    OnChain {
        address: String,
        chain_type: ChainType,
    },

    /// Holding with no queryable address; balance estimated from the remark
    Manual { chain_type: ChainType },

    /// Exchange account balance mirrored into the ledger
    Cex { cex_name: CexName },
}

/// External identity of a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalletId {
    Chain { address: String, chain_type: ChainType },
    Manual { chain_type: ChainType, remark: String },
    Cex { cex_name: CexName, remark: String },
}

/// A tracked wallet row in the persisted ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(flatten)]
    pub kind: WalletKind,

    /// Display label; for manual entries also carries the amount ("2.5 BTC ledger")
    #[serde(default)]
    pub remark: String,

    pub wallet_type: WalletType,

    /// USD value, overwritten every update cycle
    #[serde(default)]
    pub balance: f64,

    /// Per sub-account USD values (exchange wallets only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdown: BTreeMap<String, f64>,

    /// Null until the first successful fetch
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: WalletStatus,

    /// Last error message, shown as the row's status badge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Wallet {
    /// New on-chain wallet, or a manual entry when the address is empty
    pub fn new(address: &str, chain_type: ChainType, remark: &str, wallet_type: WalletType) -> Self {
        let kind = match (address.trim(), chain_type) {
            (_, ChainType::Cex) => WalletKind::Manual { chain_type },
            ("", chain_type) => WalletKind::Manual { chain_type },
            (address, chain_type) => WalletKind::OnChain {
                address: address.to_string(),
                chain_type,
            },
        };
        Self::with_kind(kind, remark, wallet_type)
    }

    /// New exchange-backed wallet row
    pub fn cex(cex_name: CexName, remark: &str) -> Self {
        Self::with_kind(WalletKind::Cex { cex_name }, remark, WalletType::Cex)
    }

    fn with_kind(kind: WalletKind, remark: &str, wallet_type: WalletType) -> Self {
        Self {
            kind,
            remark: remark.trim().to_string(),
            wallet_type,
            balance: 0.0,
            breakdown: BTreeMap::new(),
            last_updated: None,
            status: WalletStatus::Pending,
            error: None,
        }
    }

    pub fn chain_type(&self) -> ChainType {
        match &self.kind {
            WalletKind::OnChain { chain_type, .. } | WalletKind::Manual { chain_type } => {
                *chain_type
            }
            WalletKind::Cex { .. } => ChainType::Cex,
        }
    }

    /// Address, empty for exchange and manual rows
    pub fn address(&self) -> &str {
        match &self.kind {
            WalletKind::OnChain { address, .. } => address,
            WalletKind::Manual { .. } | WalletKind::Cex { .. } => "",
        }
    }

    pub fn is_cex(&self) -> bool {
        matches!(self.kind, WalletKind::Cex { .. })
    }

    pub fn id(&self) -> WalletId {
        match &self.kind {
            WalletKind::OnChain {
                address,
                chain_type,
            } => WalletId::Chain {
                address: address.clone(),
                chain_type: *chain_type,
            },
            WalletKind::Manual { chain_type } => WalletId::Manual {
                chain_type: *chain_type,
                remark: self.remark.clone(),
            },
            WalletKind::Cex { cex_name } => WalletId::Cex {
                cex_name: *cex_name,
                remark: self.remark.clone(),
            },
        }
    }

    /// Record a successful fetch
    pub fn mark_success(&mut self, balance: f64, breakdown: BTreeMap<String, f64>, at: DateTime<Utc>) {
        self.balance = balance;
        self.breakdown = breakdown;
        self.last_updated = Some(at);
        self.status = WalletStatus::Success;
        self.error = None;
    }

    /// Record a failed fetch; the previous balance is kept
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = WalletStatus::Error;
        self.error = Some(message.into());
    }
}

/// Insert or replace a wallet by identity, returning true if it replaced one
pub fn upsert_wallet(wallets: &mut Vec<Wallet>, wallet: Wallet) -> bool {
    let id = wallet.id();
    match wallets.iter_mut().find(|w| w.id() == id) {
        Some(existing) => {
            *existing = wallet;
            true
        }
        None => {
            wallets.push(wallet);
            false
        }
    }
}

/// Exchange API credentials
///
/// `api_key` is a read-only identifier and stays plaintext. `api_secret` and
/// `passphrase` are ciphertext whenever `is_encrypted` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CexAccount {
    /// Creation-time unique identifier
    pub id: String,

    pub cex_name: CexName,

    pub api_key: String,

    pub api_secret: String,

    /// Only used by OKX and Bitget
    #[serde(default)]
    pub passphrase: String,

    #[serde(default)]
    pub remark: String,

    #[serde(default)]
    pub is_encrypted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_version: Option<u32>,

    pub created_at: DateTime<Utc>,
}

impl CexAccount {
    pub fn new(cex_name: CexName, api_key: &str, api_secret: &str, passphrase: &str, remark: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cex_name,
            api_key: api_key.trim().to_string(),
            api_secret: api_secret.trim().to_string(),
            passphrase: passphrase.trim().to_string(),
            remark: remark.trim().to_string(),
            is_encrypted: false,
            encryption_version: None,
            created_at: Utc::now(),
        }
    }

    /// Label used for the mirrored ledger row
    pub fn display_remark(&self) -> String {
        if self.remark.is_empty() {
            self.cex_name.to_string()
        } else {
            self.remark.clone()
        }
    }
}

/// Source for EVM balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvmSource {
    #[default]
    Etherscan,
    /// Screenshot of the DeBank profile, read by a vision model
    Debank,
}

/// Source for Solana balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolSource {
    #[default]
    Helius,
    /// Screenshot of the Jupiter portfolio page, read by a vision model
    Jup,
}

/// Vision/chat model provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Openrouter,
    Siliconflow,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Openrouter => write!(f, "openrouter"),
            AiProvider::Siliconflow => write!(f, "siliconflow"),
        }
    }
}

/// User settings bag persisted under `settings`
///
/// `etherscan_api_key` and `helius_api_key` are URL-embedded keys and are
/// never encrypted. The AI provider keys are ciphertext whenever
/// `is_encrypted` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub evm_source: EvmSource,

    #[serde(default)]
    pub sol_source: SolSource,

    #[serde(default)]
    pub etherscan_api_key: String,

    #[serde(default)]
    pub helius_api_key: String,

    /// User RPC tried before the public list
    #[serde(default)]
    pub sol_custom_rpc: String,

    #[serde(default)]
    pub ai_provider: AiProvider,

    #[serde(default)]
    pub open_router_api_key: String,

    #[serde(default)]
    pub silicon_flow_api_key: String,

    #[serde(default)]
    pub sync_enabled: bool,

    #[serde(default = "default_true")]
    pub sync_wallets: bool,

    #[serde(default = "default_true")]
    pub sync_cex_accounts: bool,

    #[serde(default)]
    pub is_encrypted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_version: Option<u32>,

    /// Last write time in epoch milliseconds, for cross-device merge
    #[serde(rename = "_timestamp", default)]
    pub timestamp: i64,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            evm_source: EvmSource::default(),
            sol_source: SolSource::default(),
            etherscan_api_key: String::new(),
            helius_api_key: String::new(),
            sol_custom_rpc: String::new(),
            ai_provider: AiProvider::default(),
            open_router_api_key: String::new(),
            silicon_flow_api_key: String::new(),
            sync_enabled: false,
            sync_wallets: true,
            sync_cex_accounts: true,
            is_encrypted: false,
            encryption_version: None,
            timestamp: 0,
        }
    }
}

impl Settings {
    /// Key of the currently selected AI provider (plaintext settings only)
    pub fn active_ai_key(&self) -> &str {
        match self.ai_provider {
            AiProvider::Openrouter => &self.open_router_api_key,
            AiProvider::Siliconflow => &self.silicon_flow_api_key,
        }
    }

    /// Settings field name of the selected provider's key
    pub fn active_ai_key_field(&self) -> &'static str {
        match self.ai_provider {
            AiProvider::Openrouter => "openRouterApiKey",
            AiProvider::Siliconflow => "siliconFlowApiKey",
        }
    }

    /// Stamp the settings with the current time
    pub fn touch(&mut self) {
        self.timestamp = Utc::now().timestamp_millis();
    }
}
