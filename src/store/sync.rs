//! Cross-device sync area
//!
//! A size-capped mirror of `settings`, `wallets` and `cexAccounts`. Conflicts
//! resolve last-write-wins on the settings `_timestamp` when loading.
//! Exchange accounts always move as a whole array, so an encrypted batch is
//! never mixed with plaintext entries from the other side.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::wallet::{CexAccount, Settings, Wallet};

use super::{keys, load, load_vec, save, KvStore};

/// Keys mirrored into the sync area
const SYNCED_KEYS: [&str; 3] = [keys::SETTINGS, keys::WALLETS, keys::CEX_ACCOUNTS];

/// Quota-enforcing wrapper around the sync backend
pub struct SyncStore {
    inner: Arc<dyn KvStore>,
    quota_bytes: usize,
}

impl SyncStore {
    pub fn new(inner: Arc<dyn KvStore>, quota_bytes: usize) -> Self {
        Self { inner, quota_bytes }
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    /// Bytes used by every synced key, with `key` replaced by `candidate`
    async fn usage_with(&self, key: &str, candidate: &Value) -> Result<usize> {
        let mut total = key.len() + candidate.to_string().len();
        for other in SYNCED_KEYS.iter().filter(|k| **k != key) {
            if let Some(value) = self.inner.get(other).await? {
                total += other.len() + value.to_string().len();
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl KvStore for SyncStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let size = self.usage_with(key, &value).await?;
        if size > self.quota_bytes {
            return Err(Error::QuotaExceeded {
                key: key.to_string(),
                size,
                limit: self.quota_bytes,
            });
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}

/// What a push actually mirrored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub settings: bool,
    pub wallets: bool,
    pub cex_accounts: bool,
    /// Opted-in keys left out because they did not fit the quota
    pub skipped: Vec<&'static str>,
}

fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}

/// Mirror local data into the sync area according to the opt-in flags
///
/// Every write is planned against the quota before anything is stored.
/// Arrays that do not fit are skipped and their old copy removed, so a newer
/// settings `_timestamp` never sits next to a stale wallet list. Settings go
/// last and are stamped locally too, so the next load sees both sides equal.
pub async fn push(local: &dyn KvStore, sync: &SyncStore) -> Result<PushReport> {
    let mut report = PushReport::default();

    let Some(mut settings) = load::<Settings>(local, keys::SETTINGS).await? else {
        debug!("No local settings, nothing to sync");
        return Ok(report);
    };

    if !settings.sync_enabled {
        debug!("Sync disabled in settings");
        return Ok(report);
    }

    settings.touch();
    let settings_value = serde_json::to_value(&settings)?;
    let mut used = entry_size(keys::SETTINGS, &settings_value);
    if used > sync.quota_bytes {
        return Err(Error::QuotaExceeded {
            key: keys::SETTINGS.to_string(),
            size: used,
            limit: sync.quota_bytes,
        });
    }

    let mut candidates: Vec<(&'static str, Value)> = Vec::new();
    if settings.sync_wallets {
        let wallets: Vec<Wallet> = load_vec(local, keys::WALLETS).await?;
        candidates.push((keys::WALLETS, serde_json::to_value(&wallets)?));
    } else if let Some(value) = sync.inner.get(keys::WALLETS).await? {
        used += entry_size(keys::WALLETS, &value);
    }
    if settings.sync_cex_accounts {
        let accounts: Vec<CexAccount> = load_vec(local, keys::CEX_ACCOUNTS).await?;
        candidates.push((keys::CEX_ACCOUNTS, serde_json::to_value(&accounts)?));
    } else if let Some(value) = sync.inner.get(keys::CEX_ACCOUNTS).await? {
        used += entry_size(keys::CEX_ACCOUNTS, &value);
    }

    // Writes below go straight to the backend: the plan already fits
    for (key, value) in candidates {
        let size = entry_size(key, &value);
        if used + size > sync.quota_bytes {
            warn!(
                "Skipping {} in sync push: {} bytes would exceed the {} byte quota",
                key, size, sync.quota_bytes
            );
            sync.inner.remove(key).await?;
            report.skipped.push(key);
            continue;
        }
        used += size;
        sync.inner.set(key, value).await?;
        if key == keys::WALLETS {
            report.wallets = true;
        } else {
            report.cex_accounts = true;
        }
    }

    sync.inner.set(keys::SETTINGS, settings_value).await?;
    save(local, keys::SETTINGS, &settings).await?;
    report.settings = true;

    info!(
        "Pushed to sync area: settings={}, wallets={}, cex_accounts={}, skipped={:?}",
        report.settings, report.wallets, report.cex_accounts, report.skipped
    );
    Ok(report)
}

/// Which side won the merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No cloud copy, or local is as new or newer
    KeptLocal,
    /// Cloud copy was newer and has been written locally
    AdoptedCloud,
}

/// Load-time merge: adopt the cloud copy when its `_timestamp` is newer
pub async fn load_with_sync(local: &dyn KvStore, sync: &dyn KvStore) -> Result<MergeOutcome> {
    let cloud_settings = match load::<Settings>(sync, keys::SETTINGS).await {
        Ok(Some(s)) => s,
        Ok(None) => return Ok(MergeOutcome::KeptLocal),
        Err(e) => {
            warn!("Ignoring unreadable sync settings: {}", e);
            return Ok(MergeOutcome::KeptLocal);
        }
    };

    let local_ts = load::<Settings>(local, keys::SETTINGS)
        .await?
        .map(|s| s.timestamp)
        .unwrap_or(0);

    if cloud_settings.timestamp <= local_ts {
        debug!(
            "Keeping local data (local _timestamp={} >= cloud _timestamp={})",
            local_ts, cloud_settings.timestamp
        );
        return Ok(MergeOutcome::KeptLocal);
    }

    info!(
        "Adopting cloud data (cloud _timestamp={} > local _timestamp={})",
        cloud_settings.timestamp, local_ts
    );

    if cloud_settings.sync_wallets {
        if let Some(wallets) = load::<Vec<Wallet>>(sync, keys::WALLETS).await? {
            save(local, keys::WALLETS, &wallets).await?;
        }
    }

    if cloud_settings.sync_cex_accounts {
        if let Some(accounts) = load::<Vec<CexAccount>>(sync, keys::CEX_ACCOUNTS).await? {
            save(local, keys::CEX_ACCOUNTS, &accounts).await?;
        }
    }

    save(local, keys::SETTINGS, &cloud_settings).await?;

    Ok(MergeOutcome::AdoptedCloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::wallet::{ChainType, WalletType};

    fn settings(ts: i64) -> Settings {
        Settings {
            timestamp: ts,
            sync_enabled: true,
            ..Settings::default()
        }
    }

    fn wallets(label: &str) -> Vec<Wallet> {
        vec![Wallet::new("0xabc", ChainType::Evm, label, WalletType::Hot)]
    }

    #[tokio::test]
    async fn test_newer_cloud_wins() {
        let local = MemoryStore::new();
        let cloud = MemoryStore::new();
        save(&local, keys::SETTINGS, &settings(100)).await.unwrap();
        save(&local, keys::WALLETS, &wallets("local")).await.unwrap();
        save(&cloud, keys::SETTINGS, &settings(200)).await.unwrap();
        save(&cloud, keys::WALLETS, &wallets("cloud")).await.unwrap();

        let outcome = load_with_sync(&local, &cloud).await.unwrap();
        assert_eq!(outcome, MergeOutcome::AdoptedCloud);

        let merged: Settings = load(&local, keys::SETTINGS).await.unwrap().unwrap();
        assert_eq!(merged.timestamp, 200);
        let merged_wallets: Vec<Wallet> = load_vec(&local, keys::WALLETS).await.unwrap();
        assert_eq!(merged_wallets[0].remark, "cloud");
    }

    #[tokio::test]
    async fn test_newer_local_kept() {
        let local = MemoryStore::new();
        let cloud = MemoryStore::new();
        save(&local, keys::SETTINGS, &settings(300)).await.unwrap();
        save(&local, keys::WALLETS, &wallets("local")).await.unwrap();
        save(&cloud, keys::SETTINGS, &settings(200)).await.unwrap();
        save(&cloud, keys::WALLETS, &wallets("cloud")).await.unwrap();

        let outcome = load_with_sync(&local, &cloud).await.unwrap();
        assert_eq!(outcome, MergeOutcome::KeptLocal);

        let kept: Vec<Wallet> = load_vec(&local, keys::WALLETS).await.unwrap();
        assert_eq!(kept[0].remark, "local");
    }

    #[tokio::test]
    async fn test_cloud_wallets_skipped_when_opted_out() {
        let local = MemoryStore::new();
        let cloud = MemoryStore::new();
        save(&local, keys::SETTINGS, &settings(100)).await.unwrap();
        save(&local, keys::WALLETS, &wallets("local")).await.unwrap();
        let mut cloud_settings = settings(200);
        cloud_settings.sync_wallets = false;
        save(&cloud, keys::SETTINGS, &cloud_settings).await.unwrap();
        save(&cloud, keys::WALLETS, &wallets("cloud")).await.unwrap();

        load_with_sync(&local, &cloud).await.unwrap();
        let kept: Vec<Wallet> = load_vec(&local, keys::WALLETS).await.unwrap();
        assert_eq!(kept[0].remark, "local");
    }

    #[tokio::test]
    async fn test_quota_enforced() {
        let backend: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let sync = SyncStore::new(backend, 64);
        let big: Vec<Wallet> = (0..10)
            .map(|i| Wallet::new(&format!("0x{:040}", i), ChainType::Evm, "", WalletType::Hot))
            .collect();
        let err = save(&sync, keys::WALLETS, &big).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
        assert!(sync.get(keys::WALLETS).await.unwrap().is_none());
    }

    fn sync_area(quota: usize) -> SyncStore {
        SyncStore::new(Arc::new(MemoryStore::new()), quota)
    }

    #[tokio::test]
    async fn test_push_respects_flags() {
        let local = MemoryStore::new();
        let cloud = sync_area(100_000);
        let mut s = settings(1);
        s.sync_cex_accounts = false;
        save(&local, keys::SETTINGS, &s).await.unwrap();
        save(&local, keys::WALLETS, &wallets("local")).await.unwrap();

        let report = push(&local, &cloud).await.unwrap();
        assert!(report.settings && report.wallets && !report.cex_accounts);
        assert!(report.skipped.is_empty());
        assert!(cloud.get(keys::CEX_ACCOUNTS).await.unwrap().is_none());

        let pushed: Settings = load(&cloud, keys::SETTINGS).await.unwrap().unwrap();
        assert!(pushed.timestamp > 1);
    }

    #[tokio::test]
    async fn test_oversize_wallets_skipped_without_stale_copy() {
        let local = MemoryStore::new();
        let cloud = sync_area(2_000);
        save(&local, keys::SETTINGS, &settings(1)).await.unwrap();
        save(&local, keys::WALLETS, &wallets("old")).await.unwrap();
        push(&local, &cloud).await.unwrap();
        let first: Settings = load(&cloud, keys::SETTINGS).await.unwrap().unwrap();

        let big: Vec<Wallet> = (0..40)
            .map(|i| Wallet::new(&format!("0x{:040}", i), ChainType::Evm, "new", WalletType::Hot))
            .collect();
        save(&local, keys::WALLETS, &big).await.unwrap();

        let report = push(&local, &cloud).await.unwrap();
        assert!(report.settings);
        assert!(!report.wallets);
        assert_eq!(report.skipped, vec![keys::WALLETS]);
        assert!(cloud.get(keys::WALLETS).await.unwrap().is_none());

        let second: Settings = load(&cloud, keys::SETTINGS).await.unwrap().unwrap();
        assert!(second.timestamp >= first.timestamp);

        // another device adopts the settings but keeps its own wallets
        let other = MemoryStore::new();
        save(&other, keys::SETTINGS, &settings(0)).await.unwrap();
        save(&other, keys::WALLETS, &wallets("other")).await.unwrap();
        assert_eq!(load_with_sync(&other, &cloud).await.unwrap(), MergeOutcome::AdoptedCloud);
        let kept: Vec<Wallet> = load_vec(&other, keys::WALLETS).await.unwrap();
        assert_eq!(kept[0].remark, "other");
    }

    #[tokio::test]
    async fn test_oversize_settings_write_nothing() {
        let local = MemoryStore::new();
        let cloud = sync_area(10);
        save(&local, keys::SETTINGS, &settings(1)).await.unwrap();

        let err = push(&local, &cloud).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
        assert!(cloud.get(keys::SETTINGS).await.unwrap().is_none());
        let unchanged: Settings = load(&local, keys::SETTINGS).await.unwrap().unwrap();
        assert_eq!(unchanged.timestamp, 1);
    }
}
