//! On-chain balance adapters
//!
//! Each adapter reads a native-unit balance and values it at the spot price.

pub mod bitcoin;
pub mod evm;
pub mod manual;
pub mod solana;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::exchange::transport::HttpTransport;
use crate::price::PriceOracle;
use crate::wallet::{ChainType, Settings};

pub use manual::ColdEstimate;

/// Value a native amount; a missing price fails the wallet
pub async fn native_usd(prices: &dyn PriceOracle, symbol: &str, amount: f64) -> Result<f64> {
    if amount == 0.0 {
        return Ok(0.0);
    }
    prices
        .price_usd(symbol)
        .await
        .map(|price| amount * price)
        .ok_or_else(|| Error::Chain(format!("no {} price available", symbol)))
}

/// Chain adapters bound to their endpoints
pub struct ChainClient {
    http: Arc<dyn HttpTransport>,
    prices: Arc<dyn PriceOracle>,
    config: ChainConfig,
    rpc_timeout: Duration,
}

impl ChainClient {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        prices: Arc<dyn PriceOracle>,
        config: ChainConfig,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            http,
            prices,
            config,
            rpc_timeout,
        }
    }

    pub async fn evm_balance(&self, address: &str, etherscan_api_key: &str) -> Result<f64> {
        evm::fetch_native_balance_usd(
            self.http.as_ref(),
            self.prices.as_ref(),
            &self.config.etherscan_url,
            self.config.evm_chain_id,
            address,
            etherscan_api_key,
        )
        .await
    }

    pub async fn solana_balance(&self, address: &str, settings: &Settings) -> Result<f64> {
        let endpoints = solana::endpoint_order(
            &settings.sol_custom_rpc,
            &self.config.helius_rpc_url,
            &settings.helius_api_key,
            &self.config.solana_rpcs,
        );
        solana::fetch_balance_usd(&endpoints, self.prices.as_ref(), address, self.rpc_timeout).await
    }

    pub async fn bitcoin_balance(&self, address: &str) -> Result<f64> {
        bitcoin::fetch_balance_usd(
            self.http.as_ref(),
            self.prices.as_ref(),
            &self.config.mempool_url,
            address,
        )
        .await
    }

    pub async fn cold_balance(&self, remark: &str, chain: ChainType) -> Result<ColdEstimate> {
        manual::estimate_cold_balance(remark, chain, self.prices.as_ref()).await
    }
}
