//! Update cycle: chain wallets, then exchange accounts, then a history snapshot

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::UpdateConfig;
use crate::error::{Error, Result};
use crate::ocr::capture::record_screenshot;
use crate::ocr::{CaptureTarget, OcrHandle, ScreenCapture, ScreenshotRecord, ScreenshotType};
use crate::security::CredentialService;
use crate::store::{keys, load_vec, save, KvStore};
use crate::wallet::{
    snapshot, upsert_wallet, CexAccount, ChainType, EvmSource, HistoryRecord, Settings,
    SolSource, Wallet, WalletId, WalletKind,
};

use super::events::{CycleReport, StartOutcome, UpdateEvent};
use super::source::BalanceSource;

const EVENT_CAPACITY: usize = 64;

/// Capture backend plus the OCR worker reading its images
pub struct Screenshots {
    pub capture: Arc<dyn ScreenCapture>,
    pub ocr: OcrHandle,
}

/// Holds the busy flag until dropped
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Screenshot source selected for a wallet, if any
fn screenshot_type(wallet: &Wallet, settings: &Settings) -> Option<ScreenshotType> {
    match &wallet.kind {
        WalletKind::OnChain {
            chain_type: ChainType::Evm,
            ..
        } if settings.evm_source == EvmSource::Debank => Some(ScreenshotType::Debank),
        WalletKind::OnChain {
            chain_type: ChainType::Sol,
            ..
        } if settings.sol_source == SolSource::Jup => Some(ScreenshotType::Jup),
        _ => None,
    }
}

/// Fail fast on settings the selected sources cannot work without
///
/// Runs on persisted settings: an encrypted key counts as configured.
pub fn check_required_settings(settings: &Settings, wallets: &[Wallet]) -> Result<()> {
    let has_evm = wallets.iter().any(|w| {
        matches!(
            w.kind,
            WalletKind::OnChain {
                chain_type: ChainType::Evm,
                ..
            }
        )
    });
    if has_evm
        && settings.evm_source == EvmSource::Etherscan
        && settings.etherscan_api_key.trim().is_empty()
    {
        return Err(Error::MissingConfig("etherscanApiKey".to_string()));
    }

    let needs_ai = wallets
        .iter()
        .any(|w| screenshot_type(w, settings).is_some());
    if needs_ai && settings.active_ai_key().trim().is_empty() {
        return Err(Error::MissingConfig(
            settings.active_ai_key_field().to_string(),
        ));
    }
    Ok(())
}

pub struct Orchestrator {
    local: Arc<dyn KvStore>,
    credentials: Arc<CredentialService>,
    balances: Arc<dyn BalanceSource>,
    screenshots: Option<Screenshots>,
    config: UpdateConfig,
    screenshot_buffer: usize,
    events: broadcast::Sender<UpdateEvent>,
    running: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        local: Arc<dyn KvStore>,
        credentials: Arc<CredentialService>,
        balances: Arc<dyn BalanceSource>,
        config: UpdateConfig,
        screenshot_buffer: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local,
            credentials,
            balances,
            screenshots: None,
            config,
            screenshot_buffer,
            events,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_screenshots(mut self, screenshots: Screenshots) -> Self {
        self.screenshots = Some(screenshots);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a cycle in the background unless one is already running
    pub fn start_update(self: &Arc<Self>) -> StartOutcome {
        let Some(guard) = BusyGuard::acquire(&self.running) else {
            info!("Update already in progress");
            return StartOutcome::Busy;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.cycle().await {
                error!("Update cycle failed: {}", e);
            }
        });
        StartOutcome::Started
    }

    /// Run a cycle to completion; `Busy` if one is already running
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = BusyGuard::acquire(&self.running).ok_or(Error::Busy)?;
        self.cycle().await
    }

    fn emit(&self, event: UpdateEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn cycle(&self) -> Result<CycleReport> {
        let wallets: Vec<Wallet> = load_vec(self.local.as_ref(), keys::WALLETS).await?;
        check_required_settings(&self.credentials.raw_settings().await?, &wallets)?;

        let settings = self.credentials.settings_for_read().await?;
        let accounts = self.credentials.raw_cex_accounts().await?;
        let chain_wallets: Vec<Wallet> = wallets.into_iter().filter(|w| !w.is_cex()).collect();
        let total = chain_wallets.len() + accounts.len();
        info!(
            "Update started: {} wallets, {} exchange accounts",
            chain_wallets.len(),
            accounts.len()
        );

        let mut report = CycleReport::default();

        let needs_capture = chain_wallets
            .iter()
            .any(|w| screenshot_type(w, &settings).is_some());
        let capture = if needs_capture {
            self.open_capture().await
        } else {
            None
        };

        let chain_result = self
            .update_chain_wallets(&chain_wallets, &settings, capture.is_some(), total, &mut report)
            .await;
        if let Some(capture) = capture {
            capture.close().await;
        }
        chain_result?;

        self.update_exchange_accounts(&accounts, chain_wallets.len(), total, &mut report)
            .await?;

        report.total_usd = self.record_history().await?;
        self.emit(UpdateEvent::UpdateComplete);
        info!(
            "Update complete: {} ok, {} failed, total ${:.2}",
            report.succeeded, report.failed, report.total_usd
        );
        Ok(report)
    }

    async fn open_capture(&self) -> Option<CaptureGuard> {
        let Some(screenshots) = &self.screenshots else {
            warn!("Screenshot sources selected but no capture backend is configured");
            return None;
        };
        match screenshots.capture.open_context().await {
            Ok(()) => Some(CaptureGuard {
                capture: Some(screenshots.capture.clone()),
            }),
            Err(e) => {
                warn!("Could not open capture context: {}", e);
                None
            }
        }
    }

    async fn update_chain_wallets(
        &self,
        wallets: &[Wallet],
        settings: &Settings,
        capture_open: bool,
        total: usize,
        report: &mut CycleReport,
    ) -> Result<()> {
        for (i, wallet) in wallets.iter().enumerate() {
            self.emit(UpdateEvent::UpdateStatus {
                current: i + 1,
                total,
            });

            let mut updated = wallet.clone();
            match self.fetch_chain_wallet(wallet, settings, capture_open).await {
                Ok(balance) => {
                    debug!("{:?} -> ${:.2}", wallet.id(), balance);
                    updated.mark_success(balance, BTreeMap::new(), Utc::now());
                    report.succeeded += 1;
                }
                Err(e) => {
                    if e.is_soft_failure() {
                        warn!("{:?} failed: {}", wallet.id(), e);
                    } else {
                        error!("{:?} failed unexpectedly: {}", wallet.id(), e);
                    }
                    updated.mark_error(e.to_string());
                    report.failed += 1;
                }
            }

            self.persist_chain_wallet(updated).await?;
            self.emit(UpdateEvent::RefreshData);
        }
        Ok(())
    }

    async fn fetch_chain_wallet(
        &self,
        wallet: &Wallet,
        settings: &Settings,
        capture_open: bool,
    ) -> Result<f64> {
        if let Some(kind) = screenshot_type(wallet, settings) {
            return self
                .screenshot_balance(wallet.address(), kind, capture_open)
                .await;
        }

        match &wallet.kind {
            WalletKind::OnChain {
                address,
                chain_type,
            } => match chain_type {
                ChainType::Evm => self.balances.evm(address, settings).await,
                ChainType::Sol => self.balances.solana(address, settings).await,
                ChainType::Btc => self.balances.bitcoin(address).await,
                ChainType::Cex => Err(Error::Internal(format!(
                    "on-chain wallet {} has chain type cex",
                    address
                ))),
            },
            WalletKind::Manual { chain_type } => {
                self.balances.cold(&wallet.remark, *chain_type).await
            }
            WalletKind::Cex { .. } => Err(Error::Internal(
                "exchange rows are refreshed from their accounts".to_string(),
            )),
        }
    }

    async fn screenshot_balance(
        &self,
        address: &str,
        screenshot_type: ScreenshotType,
        capture_open: bool,
    ) -> Result<f64> {
        let screenshots = self
            .screenshots
            .as_ref()
            .filter(|_| capture_open)
            .ok_or_else(|| Error::Ocr("screenshot capture is unavailable".to_string()))?;

        let template = match screenshot_type {
            ScreenshotType::Debank => &self.config.debank_url_template,
            ScreenshotType::Jup => &self.config.jup_url_template,
        };
        let target = CaptureTarget {
            url: template.replace("{address}", address),
            address: address.to_string(),
            screenshot_type,
        };

        for remaining in (1..=self.config.capture_delay_secs).rev() {
            self.emit(UpdateEvent::Countdown { remaining });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.emit(UpdateEvent::Countdown { remaining: 0 });

        let image = screenshots.capture.capture(&target).await?;
        let balance = screenshots
            .ocr
            .process(image.data_uri(), address, screenshot_type)
            .await?;

        let record = ScreenshotRecord {
            address: address.to_string(),
            screenshot_type,
            captured_at: Utc::now(),
            image_base64: image.base64,
            balance: Some(balance),
        };
        if let Err(e) =
            record_screenshot(self.local.as_ref(), record, self.screenshot_buffer).await
        {
            warn!("Could not keep screenshot of {}: {}", address, e);
        }
        Ok(balance)
    }

    /// Write one row back; rows deleted mid-cycle stay deleted
    async fn persist_chain_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut wallets: Vec<Wallet> = load_vec(self.local.as_ref(), keys::WALLETS).await?;
        let id = wallet.id();
        match wallets.iter_mut().find(|w| w.id() == id) {
            Some(existing) => *existing = wallet,
            None => {
                debug!("{:?} was removed during the update", id);
                return Ok(());
            }
        }
        save(self.local.as_ref(), keys::WALLETS, &wallets).await
    }

    async fn update_exchange_accounts(
        &self,
        raw: &[CexAccount],
        offset: usize,
        total: usize,
        report: &mut CycleReport,
    ) -> Result<()> {
        self.prune_cex_wallets(raw).await?;
        if raw.is_empty() {
            return Ok(());
        }

        let accounts = match self.credentials.decrypted_cex_accounts().await {
            Ok(accounts) => accounts,
            Err(e) if e.is_soft_failure() => {
                warn!("Skipping {} exchange accounts: {}", raw.len(), e);
                report.cex_skipped = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for (i, account) in accounts.iter().enumerate() {
            self.emit(UpdateEvent::UpdateStatus {
                current: offset + i + 1,
                total,
            });

            let remark = account.display_remark();
            let id = WalletId::Cex {
                cex_name: account.cex_name,
                remark: remark.clone(),
            };
            let result = self.balances.exchange(account).await;

            let mut wallets: Vec<Wallet> = load_vec(self.local.as_ref(), keys::WALLETS).await?;
            let mut row = wallets
                .iter()
                .find(|w| w.id() == id)
                .cloned()
                .unwrap_or_else(|| Wallet::cex(account.cex_name, &remark));
            match result {
                Ok(balance) => {
                    info!("{} {}: ${:.2}", account.cex_name, remark, balance.balance);
                    row.mark_success(balance.balance, balance.breakdown, Utc::now());
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("{} {} failed: {}", account.cex_name, remark, e);
                    row.mark_error(e.to_string());
                    report.failed += 1;
                }
            }
            upsert_wallet(&mut wallets, row);
            save(self.local.as_ref(), keys::WALLETS, &wallets).await?;
            self.emit(UpdateEvent::RefreshData);
        }
        Ok(())
    }

    /// Drop exchange rows whose account no longer exists
    async fn prune_cex_wallets(&self, accounts: &[CexAccount]) -> Result<()> {
        let live: HashSet<WalletId> = accounts
            .iter()
            .map(|a| WalletId::Cex {
                cex_name: a.cex_name,
                remark: a.display_remark(),
            })
            .collect();

        let mut wallets: Vec<Wallet> = load_vec(self.local.as_ref(), keys::WALLETS).await?;
        let before = wallets.len();
        wallets.retain(|w| !w.is_cex() || live.contains(&w.id()));
        if wallets.len() == before {
            return Ok(());
        }

        info!("Pruned {} orphaned exchange rows", before - wallets.len());
        save(self.local.as_ref(), keys::WALLETS, &wallets).await?;
        self.emit(UpdateEvent::RefreshData);
        Ok(())
    }

    async fn record_history(&self) -> Result<f64> {
        let wallets: Vec<Wallet> = load_vec(self.local.as_ref(), keys::WALLETS).await?;
        let mut history: Vec<HistoryRecord> = load_vec(self.local.as_ref(), keys::HISTORY).await?;
        let date = Local::now().format("%Y-%m-%d").to_string();
        let total = snapshot(&mut history, &wallets, &date);
        save(self.local.as_ref(), keys::HISTORY, &history).await?;
        Ok(total)
    }
}

/// Open capture context
///
/// Closed by `close`, or from `Drop` on a spawned task when the cycle panics
/// or is cancelled before reaching it.
struct CaptureGuard {
    capture: Option<Arc<dyn ScreenCapture>>,
}

impl CaptureGuard {
    async fn close(mut self) {
        if let Some(capture) = self.capture.take() {
            close_context(capture).await;
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            warn!("Update cycle interrupted, closing capture context");
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(close_context(capture));
            }
        }
    }
}

async fn close_context(capture: Arc<dyn ScreenCapture>) {
    if let Err(e) = capture.close_context().await {
        warn!("Could not close capture context: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::config::ChainConfig;
    use crate::exchange::test_support;
    use crate::exchange::transport::mock::MockTransport;
    use crate::exchange::ExchangeBalance;
    use crate::ocr::{FileCapture, OcrBus, OcrEngine};
    use crate::security::{ManualClock, SessionManager};
    use crate::store::MemoryStore;
    use crate::update::source::LiveBalanceSource;
    use crate::wallet::{CexName, WalletStatus, WalletType};
    use async_trait::async_trait;
    use tokio_test::assert_ok;
    use std::collections::HashMap;

    const PASSWORD: &str = "Tr4cker!Secret";

    #[derive(Default)]
    struct FakeBalances {
        values: HashMap<String, f64>,
        delay: Option<Duration>,
    }

    impl FakeBalances {
        fn with(mut self, key: &str, usd: f64) -> Self {
            self.values.insert(key.to_string(), usd);
            self
        }

        async fn lookup(&self, key: &str) -> Result<f64> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.values
                .get(key)
                .copied()
                .ok_or_else(|| Error::Chain(format!("{} unreachable", key)))
        }
    }

    #[async_trait]
    impl BalanceSource for FakeBalances {
        async fn evm(&self, address: &str, _: &Settings) -> Result<f64> {
            self.lookup(address).await
        }

        async fn solana(&self, address: &str, _: &Settings) -> Result<f64> {
            self.lookup(address).await
        }

        async fn bitcoin(&self, address: &str) -> Result<f64> {
            self.lookup(address).await
        }

        async fn cold(&self, remark: &str, _: ChainType) -> Result<f64> {
            self.lookup(remark).await
        }

        async fn exchange(&self, account: &CexAccount) -> Result<ExchangeBalance> {
            let usd = self.lookup(&account.display_remark()).await?;
            let mut balance = ExchangeBalance::zero();
            balance.balance = usd;
            balance.breakdown.insert("spot".to_string(), usd);
            Ok(balance)
        }
    }

    struct FixedEngine(&'static str);

    #[async_trait]
    impl OcrEngine for FixedEngine {
        async fn recognize(&self, _: &str, _: ScreenshotType) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Harness {
        local: Arc<MemoryStore>,
        credentials: Arc<CredentialService>,
    }

    impl Harness {
        fn new() -> Self {
            let local = Arc::new(MemoryStore::new());
            let session = Arc::new(SessionManager::new(
                local.clone(),
                Arc::new(ManualClock::new(0)),
                30,
            ));
            let credentials = Arc::new(CredentialService::new(local.clone(), session));
            Self { local, credentials }
        }

        async fn seed(&self, wallets: &[Wallet]) {
            save(self.local.as_ref(), keys::WALLETS, wallets).await.unwrap();
        }

        async fn wallets(&self) -> Vec<Wallet> {
            load_vec(self.local.as_ref(), keys::WALLETS).await.unwrap()
        }

        fn orchestrator(&self, balances: impl BalanceSource + 'static) -> Orchestrator {
            let config = UpdateConfig {
                capture_delay_secs: 0,
                ..UpdateConfig::default()
            };
            Orchestrator::new(
                self.local.clone(),
                self.credentials.clone(),
                Arc::new(balances),
                config,
                10,
            )
        }
    }

    fn btc(address: &str) -> Wallet {
        Wallet::new(address, ChainType::Btc, "", WalletType::Cold)
    }

    #[tokio::test]
    async fn test_btc_wallet_end_to_end() {
        let address = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";
        let http = Arc::new(MockTransport::new().route(
            &format!("mempool.space/api/address/{}", address),
            200,
            r#"{"address":"x","chain_stats":{"funded_txo_sum":100000000,"spent_txo_sum":0}}"#,
        ));
        let prices = Arc::new(test_support::prices());
        let chains = ChainClient::new(
            http.clone(),
            prices.clone(),
            ChainConfig::default(),
            Duration::from_secs(1),
        );
        let source = LiveBalanceSource::new(chains, test_support::client(http));

        let harness = Harness::new();
        harness.seed(&[btc(address)]).await;
        let orchestrator = harness.orchestrator(source);
        let mut events = orchestrator.subscribe();

        let report = orchestrator.run_cycle().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.total_usd, 50_000.0);

        let wallets = harness.wallets().await;
        assert_eq!(wallets[0].balance, 50_000.0);
        assert_eq!(wallets[0].status, WalletStatus::Success);
        assert!(wallets[0].last_updated.is_some());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                UpdateEvent::UpdateStatus { current: 1, total: 1 },
                UpdateEvent::RefreshData,
                UpdateEvent::UpdateComplete,
            ]
        );

        let history: Vec<HistoryRecord> =
            load_vec(harness.local.as_ref(), keys::HISTORY).await.unwrap();
        assert!(history.iter().any(|r| r.is_summary() && r.balance == 50_000.0));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let harness = Harness::new();
        let mut stale = btc("bc1-down");
        stale.balance = 7.0;
        harness.seed(&[stale, btc("bc1-up")]).await;

        let orchestrator = harness.orchestrator(FakeBalances::default().with("bc1-up", 100.0));
        let report = orchestrator.run_cycle().await.unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 1));

        let wallets = harness.wallets().await;
        assert_eq!(wallets[0].status, WalletStatus::Error);
        assert_eq!(wallets[0].balance, 7.0);
        assert!(wallets[0].error.as_deref().unwrap().contains("unreachable"));
        assert_eq!(wallets[1].status, WalletStatus::Success);
        assert_eq!(wallets[1].balance, 100.0);
    }

    #[tokio::test]
    async fn test_missing_etherscan_key_blocks_before_fetching() {
        let harness = Harness::new();
        harness
            .seed(&[Wallet::new("0xabc", ChainType::Evm, "", WalletType::Hot)])
            .await;
        let orchestrator = harness.orchestrator(FakeBalances::default().with("0xabc", 1.0));

        let err = orchestrator.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::MissingConfig(ref f) if f == "etherscanApiKey"));
        assert_eq!(harness.wallets().await[0].status, WalletStatus::Pending);
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_busy_guard() {
        let harness = Harness::new();
        harness.seed(&[btc("bc1-slow")]).await;
        let balances = FakeBalances {
            delay: Some(Duration::from_millis(200)),
            ..FakeBalances::default()
        }
        .with("bc1-slow", 1.0);
        let orchestrator = Arc::new(harness.orchestrator(balances));
        let mut events = orchestrator.subscribe();

        assert_eq!(orchestrator.start_update(), StartOutcome::Started);
        assert_eq!(orchestrator.start_update(), StartOutcome::Busy);
        assert!(matches!(orchestrator.run_cycle().await, Err(Error::Busy)));

        loop {
            if events.recv().await.unwrap() == UpdateEvent::UpdateComplete {
                break;
            }
        }
        // flag is released just after the final event
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!orchestrator.is_running());
        tokio_test::assert_ok!(orchestrator.run_cycle().await);
    }

    #[tokio::test]
    async fn test_exchange_accounts_mirrored_and_pruned() {
        let harness = Harness::new();
        let orphan = Wallet::cex(CexName::Okx, "old");
        harness.seed(&[btc("bc1-a"), orphan]).await;
        harness
            .credentials
            .add_cex_account(CexAccount::new(CexName::Binance, "k", "s", "", "main"))
            .await
            .unwrap();

        let orchestrator = harness.orchestrator(
            FakeBalances::default()
                .with("bc1-a", 10.0)
                .with("main", 250.0),
        );
        let report = orchestrator.run_cycle().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(!report.cex_skipped);
        assert_eq!(report.total_usd, 260.0);

        let wallets = harness.wallets().await;
        assert_eq!(wallets.len(), 2);
        let row = wallets.iter().find(|w| w.is_cex()).unwrap();
        assert_eq!(
            row.id(),
            WalletId::Cex {
                cex_name: CexName::Binance,
                remark: "main".to_string()
            }
        );
        assert_eq!(row.breakdown.get("spot"), Some(&250.0));
    }

    #[tokio::test]
    async fn test_locked_session_skips_exchange_phase() {
        let harness = Harness::new();
        harness.seed(&[btc("bc1-a")]).await;
        harness.credentials.session().setup_password(PASSWORD).await.unwrap();
        harness
            .credentials
            .add_cex_account(CexAccount::new(CexName::Binance, "k", "s", "", "main"))
            .await
            .unwrap();
        harness.credentials.session().clear_session().await;

        let orchestrator = harness.orchestrator(
            FakeBalances::default()
                .with("bc1-a", 10.0)
                .with("main", 250.0),
        );
        let report = orchestrator.run_cycle().await.unwrap();
        assert!(report.cex_skipped);
        assert_eq!(report.succeeded, 1);

        let wallets = harness.wallets().await;
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].balance, 10.0);
    }

    #[tokio::test]
    async fn test_unreadable_accounts_skip_exchange_phase() {
        let harness = Harness::new();
        harness.seed(&[btc("bc1-a")]).await;
        harness.credentials.session().setup_password(PASSWORD).await.unwrap();
        harness
            .credentials
            .add_cex_account(CexAccount::new(CexName::Binance, "k", "s", "", "main"))
            .await
            .unwrap();

        let mut raw = harness.credentials.raw_cex_accounts().await.unwrap();
        raw[0].api_secret = "bm90IGEgY2lwaGVydGV4dA==".to_string();
        save(harness.local.as_ref(), keys::CEX_ACCOUNTS, &raw).await.unwrap();

        let orchestrator = harness.orchestrator(
            FakeBalances::default()
                .with("bc1-a", 10.0)
                .with("main", 250.0),
        );
        let report = orchestrator.run_cycle().await.unwrap();
        assert!(report.cex_skipped);
        assert_eq!(report.succeeded, 1);
        assert_eq!(harness.wallets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_screenshot_source() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("0xabc.png"), b"png").await.unwrap();

        let harness = Harness::new();
        harness
            .seed(&[Wallet::new("0xabc", ChainType::Evm, "", WalletType::Hot)])
            .await;
        let mut settings = Settings::default();
        settings.evm_source = EvmSource::Debank;
        settings.open_router_api_key = "sk-or".to_string();
        harness.credentials.save_settings(settings).await.unwrap();

        let capture = Arc::new(FileCapture::new(dir.path()));
        let (ocr, _worker) =
            OcrBus::spawn(Arc::new(FixedEngine("$1,234.50")), Duration::from_secs(1));
        let orchestrator = harness
            .orchestrator(FakeBalances::default())
            .with_screenshots(Screenshots {
                capture: capture.clone(),
                ocr,
            });
        let mut events = orchestrator.subscribe();

        orchestrator.run_cycle().await.unwrap();
        assert_eq!(harness.wallets().await[0].balance, 1234.5);
        assert!(!capture.is_open());

        let shots: Vec<ScreenshotRecord> =
            load_vec(harness.local.as_ref(), keys::SCREENSHOTS).await.unwrap();
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].balance, Some(1234.5));

        let mut countdown = false;
        while let Ok(event) = events.try_recv() {
            countdown |= event == UpdateEvent::Countdown { remaining: 0 };
        }
        assert!(countdown);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_closes_capture() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("0xabc.png"), b"png").await.unwrap();

        let harness = Harness::new();
        harness
            .seed(&[
                Wallet::new("0xabc", ChainType::Evm, "", WalletType::Hot),
                Wallet::new("bc1-slow", ChainType::Btc, "", WalletType::Cold),
            ])
            .await;
        let mut settings = Settings::default();
        settings.evm_source = EvmSource::Debank;
        settings.open_router_api_key = "sk-or".to_string();
        harness.credentials.save_settings(settings).await.unwrap();

        let capture = Arc::new(FileCapture::new(dir.path()));
        let (ocr, _worker) =
            OcrBus::spawn(Arc::new(FixedEngine("$10")), Duration::from_secs(1));
        let slow = FakeBalances {
            delay: Some(Duration::from_secs(5)),
            ..FakeBalances::default()
        };
        let orchestrator = harness.orchestrator(slow).with_screenshots(Screenshots {
            capture: capture.clone(),
            ocr,
        });

        let cycle = tokio::time::timeout(Duration::from_millis(300), orchestrator.run_cycle());
        assert!(cycle.await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!capture.is_open());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_missing_ai_key_blocks_screenshot_sources() {
        let harness = Harness::new();
        harness
            .seed(&[Wallet::new("So1ana", ChainType::Sol, "", WalletType::Hot)])
            .await;
        let mut settings = Settings::default();
        settings.sol_source = SolSource::Jup;
        harness.credentials.save_settings(settings).await.unwrap();

        let orchestrator = harness.orchestrator(FakeBalances::default());
        let err = orchestrator.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::MissingConfig(ref f) if f == "openRouterApiKey"));
    }
}
