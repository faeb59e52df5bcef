//! Command-line front end

pub mod commands;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dialoguer::Password;
use tracing::info;

use crate::chain::ChainClient;
use crate::config::Config;
use crate::exchange::transport::{HttpTransport, ReqwestTransport};
use crate::exchange::ExchangeClient;
use crate::ocr::{FileCapture, OcrBus, VisionClient, VisionOcr};
use crate::price::{BinanceTickerOracle, PriceOracle};
use crate::security::{CredentialService, SessionManager, SessionState, SystemClock};
use crate::store::sync::{load_with_sync, MergeOutcome, SyncStore};
use crate::store::{JsonFileStore, KvStore};
use crate::update::{LiveBalanceSource, Orchestrator, Screenshots};

const LOCAL_FILE: &str = "local.json";
const SYNC_FILE: &str = "sync.json";

/// Stores and services shared by every command
pub struct App {
    pub config: Config,
    pub local: Arc<dyn KvStore>,
    pub sync: Arc<SyncStore>,
    pub credentials: Arc<CredentialService>,
    pub http: Arc<dyn HttpTransport>,
}

impl App {
    /// Open the stores and adopt a newer synced copy if there is one
    pub async fn open(config: Config) -> Result<Self> {
        let data_dir = &config.storage.data_dir;
        let local: Arc<dyn KvStore> = Arc::new(
            JsonFileStore::open(data_dir.join(LOCAL_FILE))
                .await
                .context("Failed to open local store")?,
        );
        let sync_backend = JsonFileStore::open(data_dir.join(SYNC_FILE))
            .await
            .context("Failed to open sync store")?;
        let sync = Arc::new(SyncStore::new(
            Arc::new(sync_backend),
            config.storage.sync_quota_bytes,
        ));

        if load_with_sync(local.as_ref(), sync.as_ref()).await? == MergeOutcome::AdoptedCloud {
            info!("Adopted newer data from the sync area");
        }

        let session = Arc::new(SessionManager::new(
            local.clone(),
            Arc::new(SystemClock),
            config.session.validity_minutes,
        ));
        let credentials = Arc::new(CredentialService::new(local.clone(), session));
        let http: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(Duration::from_secs(
            config.http.timeout_secs,
        ))?);

        Ok(Self {
            config,
            local,
            sync,
            credentials,
            http,
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        self.credentials.session()
    }

    /// Prompt for the master password when one is set and the session is locked
    pub async fn unlock(&self) -> Result<()> {
        if self.session().state().await? != SessionState::Locked {
            return Ok(());
        }
        let password = Password::new()
            .with_prompt("Master password")
            .interact()?;
        self.session().create_session(&password).await?;
        Ok(())
    }

    pub fn prices(&self) -> Arc<dyn PriceOracle> {
        Arc::new(BinanceTickerOracle::new(
            self.http.clone(),
            &self.config.prices.ticker_url,
            Duration::from_secs(self.config.prices.cache_ttl_secs),
        ))
    }

    pub fn exchanges(&self) -> ExchangeClient {
        ExchangeClient::new(
            self.http.clone(),
            self.prices(),
            self.config.exchanges.clone(),
        )
    }

    pub fn vision(&self) -> VisionClient {
        VisionClient::new(self.http.clone(), self.config.ai.clone())
    }

    /// Orchestrator wired to the live adapters, file capture and the OCR worker
    pub fn orchestrator(&self) -> Orchestrator {
        let prices = self.prices();
        let chains = ChainClient::new(
            self.http.clone(),
            prices.clone(),
            self.config.chains.clone(),
            Duration::from_secs(self.config.http.timeout_secs),
        );
        let exchanges = ExchangeClient::new(
            self.http.clone(),
            prices,
            self.config.exchanges.clone(),
        );

        let engine = Arc::new(VisionOcr::new(self.vision(), self.credentials.clone()));
        let (ocr, _worker) = OcrBus::spawn(
            engine,
            Duration::from_secs(self.config.ai.ocr_timeout_secs),
        );

        Orchestrator::new(
            self.local.clone(),
            self.credentials.clone(),
            Arc::new(LiveBalanceSource::new(chains, exchanges)),
            self.config.update.clone(),
            self.config.storage.screenshot_buffer,
        )
        .with_screenshots(Screenshots {
            capture: Arc::new(FileCapture::new(&self.config.update.screenshot_dir)),
            ocr,
        })
    }
}
