//! Key-value persistence
//!
//! Three storage areas back the tracker:
//! - `local`: durable JSON file ([`JsonFileStore`]) holding wallets, exchange
//!   accounts, settings, history and screenshots
//! - `session`: memory-only area for the unlocked session (see
//!   [`crate::security::SessionManager`]), gone when the process exits
//! - `sync`: size-capped mirror for cross-device merge ([`sync::SyncStore`])
//!
//! There is no transactional isolation. During an update cycle the
//! orchestrator is the only writer; readers may observe partial progress.

pub mod sync;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Well-known storage keys
pub mod keys {
    pub const WALLETS: &str = "wallets";
    pub const CEX_ACCOUNTS: &str = "cexAccounts";
    pub const SETTINGS: &str = "settings";
    pub const HISTORY: &str = "history";
    pub const SCREENSHOTS: &str = "screenshots";
    pub const MASTER_PASSWORD_HASH: &str = "masterPasswordHash";
}

/// Async key-value store holding JSON values
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a key, `None` if absent
pub async fn load<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Failed to decode {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Read a list key, empty if absent
pub async fn load_vec<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Vec<T>> {
    Ok(load(store, key).await?.unwrap_or_default())
}

/// Serialize and write a key
pub async fn save<T: Serialize + ?Sized>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, value).await
}

/// In-memory store, used as a scratch sync backend and in tests
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Durable store backed by a single JSON document
///
/// Every write rewrites the document through a temp file and rename so a
/// crash never leaves a half-written file.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
            let entries: BTreeMap<String, Value> = serde_json::from_str(&data)
                .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))?;
            info!("Loaded {} keys from {}", entries.len(), path.display());
            entries
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            debug!("Store {} not found, starting empty", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let data = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}
