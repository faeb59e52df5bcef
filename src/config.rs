//! Configuration loading and validation
//!
//! This is the application configuration (endpoints, timeouts, storage
//! location, risk thresholds). User-editable data-source choices and API keys
//! live in [`crate::wallet::Settings`] inside the persisted store.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub exchanges: ExchangeConfig,
    #[serde(default)]
    pub chains: ChainConfig,
    #[serde(default)]
    pub prices: PriceConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Byte budget of the cross-device sync area
    #[serde(default = "default_sync_quota")]
    pub sync_quota_bytes: usize,
    /// Number of screenshots kept in the rolling buffer
    #[serde(default = "default_screenshot_buffer")]
    pub screenshot_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_minutes")]
    pub validity_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_binance_url")]
    pub binance_url: String,
    #[serde(default = "default_okx_url")]
    pub okx_url: String,
    #[serde(default = "default_bybit_url")]
    pub bybit_url: String,
    #[serde(default = "default_bitget_url")]
    pub bitget_url: String,
    #[serde(default = "default_backpack_url")]
    pub backpack_url: String,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_etherscan_url")]
    pub etherscan_url: String,
    #[serde(default = "default_evm_chain_id")]
    pub evm_chain_id: u64,
    #[serde(default = "default_mempool_url")]
    pub mempool_url: String,
    /// Public Solana RPCs tried in order after the user's custom RPC
    #[serde(default = "default_solana_rpcs")]
    pub solana_rpcs: Vec<String>,
    #[serde(default = "default_helius_rpc_url")]
    pub helius_rpc_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_ticker_url")]
    pub ticker_url: String,
    #[serde(default = "default_price_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_openrouter_url")]
    pub openrouter_url: String,
    #[serde(default = "default_siliconflow_url")]
    pub siliconflow_url: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,
    #[serde(default = "default_ocr_timeout")]
    pub ocr_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
    /// Fixed wait before each screenshot so the target finishes rendering
    #[serde(default = "default_capture_delay")]
    pub capture_delay_secs: u64,
    #[serde(default = "default_debank_template")]
    pub debank_url_template: String,
    #[serde(default = "default_jup_template")]
    pub jup_url_template: String,
    /// Inbox directory an external capture tool writes screenshots into
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
}

/// Portfolio risk heuristics. Percentages are tunable, not invariants.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_concentration_pct")]
    pub single_wallet_concentration_pct: f64,
    #[serde(default = "default_hot_warn_pct")]
    pub hot_wallet_warn_pct: f64,
    #[serde(default = "default_cex_warn_pct")]
    pub cex_warn_pct: f64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("folio-data")
}

fn default_sync_quota() -> usize {
    102_400
}

fn default_screenshot_buffer() -> usize {
    10
}

fn default_session_minutes() -> i64 {
    30
}

fn default_http_timeout() -> u64 {
    15
}

fn default_binance_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_okx_url() -> String {
    "https://www.okx.com".to_string()
}

fn default_bybit_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_bitget_url() -> String {
    "https://api.bitget.com".to_string()
}

fn default_backpack_url() -> String {
    "https://api.backpack.exchange".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_etherscan_url() -> String {
    "https://api.etherscan.io/v2/api".to_string()
}

fn default_evm_chain_id() -> u64 {
    1
}

fn default_mempool_url() -> String {
    "https://mempool.space/api".to_string()
}

fn default_solana_rpcs() -> Vec<String> {
    vec![
        "https://api.mainnet-beta.solana.com".to_string(),
        "https://solana-rpc.publicnode.com".to_string(),
        "https://solana.drpc.org".to_string(),
    ]
}

fn default_helius_rpc_url() -> String {
    "https://mainnet.helius-rpc.com".to_string()
}

fn default_ticker_url() -> String {
    "https://api.binance.com/api/v3/ticker/price".to_string()
}

fn default_price_ttl() -> u64 {
    60
}

fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_siliconflow_url() -> String {
    "https://api.siliconflow.cn/v1/chat/completions".to_string()
}

fn default_vision_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}

fn default_analysis_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}

fn default_ocr_timeout() -> u64 {
    60
}

fn default_capture_delay() -> u64 {
    5
}

fn default_debank_template() -> String {
    "https://debank.com/profile/{address}".to_string()
}

fn default_jup_template() -> String {
    "https://portfolio.jup.ag/portfolio/{address}".to_string()
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("folio-data/captures")
}

fn default_concentration_pct() -> f64 {
    50.0
}

fn default_hot_warn_pct() -> f64 {
    30.0
}

fn default_cex_warn_pct() -> f64 {
    40.0
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_quota_bytes: default_sync_quota(),
            screenshot_buffer: default_screenshot_buffer(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validity_minutes: default_session_minutes(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            binance_url: default_binance_url(),
            okx_url: default_okx_url(),
            bybit_url: default_bybit_url(),
            bitget_url: default_bitget_url(),
            backpack_url: default_backpack_url(),
            recv_window_ms: default_recv_window(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            etherscan_url: default_etherscan_url(),
            evm_chain_id: default_evm_chain_id(),
            mempool_url: default_mempool_url(),
            solana_rpcs: default_solana_rpcs(),
            helius_rpc_url: default_helius_rpc_url(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            ticker_url: default_ticker_url(),
            cache_ttl_secs: default_price_ttl(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openrouter_url: default_openrouter_url(),
            siliconflow_url: default_siliconflow_url(),
            vision_model: default_vision_model(),
            analysis_model: default_analysis_model(),
            ocr_timeout_secs: default_ocr_timeout(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            capture_delay_secs: default_capture_delay(),
            debank_url_template: default_debank_template(),
            jup_url_template: default_jup_template(),
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            single_wallet_concentration_pct: default_concentration_pct(),
            hot_wallet_warn_pct: default_hot_warn_pct(),
            cex_warn_pct: default_cex_warn_pct(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            http: HttpConfig::default(),
            exchanges: ExchangeConfig::default(),
            chains: ChainConfig::default(),
            prices: PriceConfig::default(),
            ai: AiConfig::default(),
            update: UpdateConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix FOLIO__)
            .add_source(
                config::Environment::with_prefix("FOLIO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.session.validity_minutes <= 0 {
            anyhow::bail!("session.validity_minutes must be positive");
        }

        if self.chains.solana_rpcs.is_empty() {
            anyhow::bail!("chains.solana_rpcs must list at least one endpoint");
        }

        let urls = [
            ("exchanges.binance_url", &self.exchanges.binance_url),
            ("exchanges.okx_url", &self.exchanges.okx_url),
            ("exchanges.bybit_url", &self.exchanges.bybit_url),
            ("exchanges.bitget_url", &self.exchanges.bitget_url),
            ("exchanges.backpack_url", &self.exchanges.backpack_url),
            ("chains.etherscan_url", &self.chains.etherscan_url),
            ("chains.mempool_url", &self.chains.mempool_url),
            ("prices.ticker_url", &self.prices.ticker_url),
            ("ai.openrouter_url", &self.ai.openrouter_url),
            ("ai.siliconflow_url", &self.ai.siliconflow_url),
        ];
        for (name, value) in urls {
            let parsed =
                url::Url::parse(value).with_context(|| format!("Invalid URL for {}", name))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("{} must be an http(s) URL, got {}", name, value);
            }
        }
        for rpc in &self.chains.solana_rpcs {
            url::Url::parse(rpc).with_context(|| format!("Invalid Solana RPC URL: {}", rpc))?;
        }

        let pcts = [
            (
                "risk.single_wallet_concentration_pct",
                self.risk.single_wallet_concentration_pct,
            ),
            ("risk.hot_wallet_warn_pct", self.risk.hot_wallet_warn_pct),
            ("risk.cex_warn_pct", self.risk.cex_warn_pct),
        ];
        for (name, value) in pcts {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 100, got {}", name, value);
            }
        }

        if self.storage.screenshot_buffer == 0 {
            tracing::warn!("storage.screenshot_buffer is 0 - screenshots will not be kept");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Storage:
    data_dir: {}
    sync_quota: {} bytes
  Session:
    validity: {} min
  Exchanges:
    binance: {}
    okx: {}
    bybit: {}
    bitget: {}
    backpack: {}
  Chains:
    etherscan: {} (chain {})
    mempool: {}
    solana_rpcs: {:?}
  AI:
    openrouter: {}
    siliconflow: {}
    vision_model: {}
  Update:
    capture_delay: {}s
    screenshot_dir: {}
  Risk:
    concentration: {}%
    hot_warn: {}%
    cex_warn: {}%
"#,
            self.storage.data_dir.display(),
            self.storage.sync_quota_bytes,
            self.session.validity_minutes,
            mask_url(&self.exchanges.binance_url),
            mask_url(&self.exchanges.okx_url),
            mask_url(&self.exchanges.bybit_url),
            mask_url(&self.exchanges.bitget_url),
            mask_url(&self.exchanges.backpack_url),
            mask_url(&self.chains.etherscan_url),
            self.chains.evm_chain_id,
            mask_url(&self.chains.mempool_url),
            self.chains
                .solana_rpcs
                .iter()
                .map(|u| mask_url(u))
                .collect::<Vec<_>>(),
            mask_url(&self.ai.openrouter_url),
            mask_url(&self.ai.siliconflow_url),
            self.ai.vision_model,
            self.update.capture_delay_secs,
            self.update.screenshot_dir.display(),
            self.risk.single_wallet_concentration_pct,
            self.risk.hot_wallet_warn_pct,
            self.risk.cex_warn_pct,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
pub fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

/// Mask a secret for display, keeping only the first 4 characters
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else if secret.chars().count() <= 8 {
        "***".to_string()
    } else {
        let head: String = secret.chars().take(4).collect();
        format!("{}***", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.validity_minutes, 30);
        assert_eq!(config.storage.sync_quota_bytes, 102_400);
        assert_eq!(config.storage.screenshot_buffer, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_url_scheme() {
        let mut config = Config::default();
        config.exchanges.okx_url = "ftp://www.okx.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_solana_rpcs() {
        let mut config = Config::default();
        config.chains.solana_rpcs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_risk() {
        let mut config = Config::default();
        config.risk.cex_warn_pct = 140.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.exchanges.recv_window_ms, 5000);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(
            &path,
            "[update]\ncapture_delay_secs = 0\n\n[risk]\ncex_warn_pct = 25.0\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.update.capture_delay_secs, 0);
        assert_eq!(config.risk.cex_warn_pct, 25.0);
        assert_eq!(config.session.validity_minutes, 30);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(not set)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-or-v1-abcdef"), "sk-o***");
    }
}
