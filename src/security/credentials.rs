//! Field-level encryption of settings and exchange accounts
//!
//! Only secrets are encrypted: the AI provider keys in [`Settings`], and
//! `api_secret` / `passphrase` on each [`CexAccount`]. `etherscan_api_key`,
//! `helius_api_key` and exchange `api_key` stay plaintext.
//!
//! The persisted `cexAccounts` array is uniform: either every element is
//! encrypted or none is. Every mutation decrypts the whole batch, applies the
//! change, and re-encrypts the whole batch.

use std::sync::Arc;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::store::{keys, load, load_vec, save, KvStore};
use crate::wallet::{CexAccount, Settings};

use super::crypto::{self, ENCRYPTION_VERSION};
use super::session::SessionManager;

fn seal(value: &str, password: &str, field: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    crypto::encrypt(value, password)
        .ok_or_else(|| Error::Crypto(format!("could not encrypt {}", field)))
}

fn open(value: &str, password: &str, field: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    crypto::decrypt(value, password)
        .ok_or_else(|| Error::Crypto(format!("could not decrypt {}", field)))
}

/// Encrypt the AI keys. Already-encrypted settings pass through unchanged.
pub fn encrypt_settings(settings: &Settings, password: &str) -> Result<Settings> {
    if settings.is_encrypted {
        return Ok(settings.clone());
    }
    let mut out = settings.clone();
    out.open_router_api_key = seal(&settings.open_router_api_key, password, "openRouterApiKey")?;
    out.silicon_flow_api_key = seal(&settings.silicon_flow_api_key, password, "siliconFlowApiKey")?;
    out.is_encrypted = true;
    out.encryption_version = Some(ENCRYPTION_VERSION);
    Ok(out)
}

/// Decrypt the AI keys. Plaintext settings pass through unchanged.
pub fn decrypt_settings(settings: &Settings, password: &str) -> Result<Settings> {
    if !settings.is_encrypted {
        return Ok(settings.clone());
    }
    let mut out = settings.clone();
    out.open_router_api_key = open(&settings.open_router_api_key, password, "openRouterApiKey")?;
    out.silicon_flow_api_key = open(&settings.silicon_flow_api_key, password, "siliconFlowApiKey")?;
    out.is_encrypted = false;
    out.encryption_version = None;
    Ok(out)
}

/// Encrypt one account's secrets. Already-encrypted accounts pass through.
///
/// An account without a secret is still flagged so the batch stays uniform.
pub fn encrypt_cex_account(account: &CexAccount, password: &str) -> Result<CexAccount> {
    if account.is_encrypted {
        return Ok(account.clone());
    }
    let mut out = account.clone();
    out.api_secret = seal(&account.api_secret, password, "apiSecret")?;
    out.passphrase = seal(&account.passphrase, password, "passphrase")?;
    out.is_encrypted = true;
    out.encryption_version = Some(ENCRYPTION_VERSION);
    Ok(out)
}

/// Decrypt one account's secrets. Plaintext accounts pass through.
pub fn decrypt_cex_account(account: &CexAccount, password: &str) -> Result<CexAccount> {
    if !account.is_encrypted {
        return Ok(account.clone());
    }
    let mut out = account.clone();
    out.api_secret = open(&account.api_secret, password, "apiSecret")?;
    out.passphrase = open(&account.passphrase, password, "passphrase")?;
    out.is_encrypted = false;
    out.encryption_version = None;
    Ok(out)
}

/// Encrypt a batch, all or nothing
pub fn encrypt_cex_accounts(accounts: &[CexAccount], password: &str) -> Result<Vec<CexAccount>> {
    accounts
        .iter()
        .map(|a| encrypt_cex_account(a, password))
        .collect()
}

/// Decrypt a batch, all or nothing
pub fn decrypt_cex_accounts(accounts: &[CexAccount], password: &str) -> Result<Vec<CexAccount>> {
    accounts
        .iter()
        .map(|a| decrypt_cex_account(a, password))
        .collect()
}

/// True when every element shares the same `is_encrypted` flag
pub fn is_uniform(accounts: &[CexAccount]) -> bool {
    match accounts.first() {
        Some(first) => accounts.iter().all(|a| a.is_encrypted == first.is_encrypted),
        None => true,
    }
}

/// Single access point for decrypted settings and exchange credentials
///
/// Resolves session state and encryption flags internally so consumers never
/// branch on `is_encrypted` themselves.
pub struct CredentialService {
    local: Arc<dyn KvStore>,
    session: Arc<SessionManager>,
}

impl CredentialService {
    pub fn new(local: Arc<dyn KvStore>, session: Arc<SessionManager>) -> Self {
        Self { local, session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Password to encrypt with, `None` when no master password exists
    async fn write_password(&self) -> Result<Option<Zeroizing<String>>> {
        if !self.session.has_master_password().await? {
            return Ok(None);
        }
        self.session
            .get_master_password()
            .await
            .map(Some)
            .ok_or(Error::SessionLocked)
    }

    /// Settings exactly as persisted
    pub async fn raw_settings(&self) -> Result<Settings> {
        Ok(load::<Settings>(self.local.as_ref(), keys::SETTINGS)
            .await?
            .unwrap_or_default())
    }

    /// Plaintext settings; `SessionLocked` or `Crypto` when secrets are unreadable
    pub async fn decrypted_settings(&self) -> Result<Settings> {
        let raw = self.raw_settings().await?;
        if !raw.is_encrypted {
            return Ok(raw);
        }
        let password = self
            .session
            .get_master_password()
            .await
            .ok_or(Error::SessionLocked)?;
        decrypt_settings(&raw, &password)
    }

    /// Settings for read-only consumers
    ///
    /// When secrets cannot be decrypted the AI keys come back empty and a
    /// warning is logged. Never persist the returned value.
    pub async fn settings_for_read(&self) -> Result<Settings> {
        match self.decrypted_settings().await {
            Ok(settings) => Ok(settings),
            Err(e @ (Error::SessionLocked | Error::Crypto(_))) => {
                warn!("AI keys unavailable: {}", e);
                let mut view = self.raw_settings().await?;
                view.open_router_api_key.clear();
                view.silicon_flow_api_key.clear();
                view.is_encrypted = false;
                view.encryption_version = None;
                Ok(view)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist plaintext settings, encrypting secrets when a password exists
    pub async fn save_settings(&self, mut settings: Settings) -> Result<()> {
        if settings.is_encrypted {
            return Err(Error::Internal(
                "save_settings expects plaintext settings".to_string(),
            ));
        }
        settings.touch();
        let stored = match self.write_password().await? {
            Some(password) => encrypt_settings(&settings, &password)?,
            None => settings,
        };
        save(self.local.as_ref(), keys::SETTINGS, &stored).await?;
        debug!(encrypted = stored.is_encrypted, "Settings saved");
        Ok(())
    }

    /// Key of the selected AI provider, `None` when not configured
    pub async fn ai_api_key(&self) -> Result<Option<Zeroizing<String>>> {
        let settings = self.decrypted_settings().await?;
        let key = settings.active_ai_key();
        if key.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Zeroizing::new(key.to_string())))
        }
    }

    /// Exchange accounts exactly as persisted
    pub async fn raw_cex_accounts(&self) -> Result<Vec<CexAccount>> {
        load_vec(self.local.as_ref(), keys::CEX_ACCOUNTS).await
    }

    /// Whole batch decrypted; `SessionLocked` when any element needs the password
    pub async fn decrypted_cex_accounts(&self) -> Result<Vec<CexAccount>> {
        let raw = self.raw_cex_accounts().await?;
        if !raw.iter().any(|a| a.is_encrypted) {
            return Ok(raw);
        }
        let password = self
            .session
            .get_master_password()
            .await
            .ok_or(Error::SessionLocked)?;
        decrypt_cex_accounts(&raw, &password)
    }

    async fn store_cex_accounts(&self, plaintext: Vec<CexAccount>) -> Result<()> {
        let stored = match self.write_password().await? {
            Some(password) => encrypt_cex_accounts(&plaintext, &password)?,
            None => plaintext,
        };
        if !is_uniform(&stored) {
            return Err(Error::Internal(
                "refusing to persist a mixed encrypted/plaintext account batch".to_string(),
            ));
        }
        save(self.local.as_ref(), keys::CEX_ACCOUNTS, &stored).await
    }

    /// Add an account; the whole batch is re-encrypted together
    pub async fn add_cex_account(&self, account: CexAccount) -> Result<CexAccount> {
        if account.api_key.is_empty() {
            return Err(Error::MissingConfig("apiKey".to_string()));
        }
        if account.api_secret.is_empty() {
            return Err(Error::MissingConfig("apiSecret".to_string()));
        }
        if account.cex_name.requires_passphrase() && account.passphrase.is_empty() {
            return Err(Error::MissingConfig("passphrase".to_string()));
        }

        let mut accounts = self.decrypted_cex_accounts().await?;
        accounts.push(account.clone());
        self.store_cex_accounts(accounts).await?;

        info!("Added {} account '{}'", account.cex_name, account.display_remark());
        Ok(account)
    }

    /// Remove an account by id, returning whether it existed
    pub async fn delete_cex_account(&self, id: &str) -> Result<bool> {
        let mut accounts = self.decrypted_cex_accounts().await?;
        let before = accounts.len();
        accounts.retain(|a| a.id != id);
        if accounts.len() == before {
            return Ok(false);
        }
        self.store_cex_accounts(accounts).await?;
        info!("Deleted exchange account {}", id);
        Ok(true)
    }

    /// Encrypt any plaintext secrets after a master password is first set
    pub async fn encrypt_existing_data(&self) -> Result<()> {
        let settings = self.decrypted_settings().await?;
        self.save_settings(settings).await?;

        let accounts = self.decrypted_cex_accounts().await?;
        let count = accounts.len();
        self.store_cex_accounts(accounts).await?;

        info!("Encrypted stored secrets ({} exchange accounts)", count);
        Ok(())
    }

    /// Change the master password and re-encrypt every secret under it
    ///
    /// Secrets are rewritten under `new` before the new hash is stored. If any
    /// write fails the previous ciphertext is put back, so the stored hash and
    /// the stored secrets always agree.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        let raw_settings = self.raw_settings().await?;
        let raw_accounts = self.raw_cex_accounts().await?;

        let auth_err = |_| Error::Authentication("incorrect master password".to_string());
        let mut settings = decrypt_settings(&raw_settings, old).map_err(auth_err)?;
        let accounts = decrypt_cex_accounts(&raw_accounts, old).map_err(auth_err)?;
        self.session.check_password_change(old, new).await?;

        settings.touch();
        let sealed_settings = encrypt_settings(&settings, new)?;
        let sealed_accounts = encrypt_cex_accounts(&accounts, new)?;

        let result = async {
            save(self.local.as_ref(), keys::SETTINGS, &sealed_settings).await?;
            save(self.local.as_ref(), keys::CEX_ACCOUNTS, &sealed_accounts).await?;
            self.session.change_password(old, new).await
        }
        .await;

        if let Err(e) = result {
            warn!("Password change failed, restoring previous secrets: {}", e);
            if let Err(restore) = save(self.local.as_ref(), keys::SETTINGS, &raw_settings).await {
                warn!("Could not restore settings: {}", restore);
            }
            if let Err(restore) =
                save(self.local.as_ref(), keys::CEX_ACCOUNTS, &raw_accounts).await
            {
                warn!("Could not restore exchange accounts: {}", restore);
            }
            return Err(e);
        }

        info!("Re-encrypted stored secrets under the new master password");
        Ok(())
    }
}
