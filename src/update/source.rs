//! Balance fetching seam used by the orchestrator

use async_trait::async_trait;

use crate::chain::ChainClient;
use crate::error::Result;
use crate::exchange::{ExchangeBalance, ExchangeClient};
use crate::wallet::{CexAccount, ChainType, Settings};

/// Everything the update cycle reads over the network, in USD
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn evm(&self, address: &str, settings: &Settings) -> Result<f64>;

    async fn solana(&self, address: &str, settings: &Settings) -> Result<f64>;

    async fn bitcoin(&self, address: &str) -> Result<f64>;

    /// Value of a manual entry whose amount lives in the remark
    async fn cold(&self, remark: &str, chain_type: ChainType) -> Result<f64>;

    /// `account` must already be decrypted
    async fn exchange(&self, account: &CexAccount) -> Result<ExchangeBalance>;
}

/// Real chain and exchange adapters
pub struct LiveBalanceSource {
    chains: ChainClient,
    exchanges: ExchangeClient,
}

impl LiveBalanceSource {
    pub fn new(chains: ChainClient, exchanges: ExchangeClient) -> Self {
        Self { chains, exchanges }
    }
}

#[async_trait]
impl BalanceSource for LiveBalanceSource {
    async fn evm(&self, address: &str, settings: &Settings) -> Result<f64> {
        self.chains
            .evm_balance(address, &settings.etherscan_api_key)
            .await
    }

    async fn solana(&self, address: &str, settings: &Settings) -> Result<f64> {
        self.chains.solana_balance(address, settings).await
    }

    async fn bitcoin(&self, address: &str) -> Result<f64> {
        self.chains.bitcoin_balance(address).await
    }

    async fn cold(&self, remark: &str, chain_type: ChainType) -> Result<f64> {
        Ok(self.chains.cold_balance(remark, chain_type).await?.usd)
    }

    async fn exchange(&self, account: &CexAccount) -> Result<ExchangeBalance> {
        self.exchanges.get_cex_balance(account).await
    }
}
