//! Master password session
//!
//! States: `NoPasswordSet -> Unlocked` (setup), `Locked -> Unlocked`
//! (correct password), `Unlocked -> Locked` (expiry, detected lazily on the
//! next validation), `Unlocked -> Unlocked` (explicit extend).
//!
//! The verified password lives only in process memory and is zeroized on
//! drop. [`SessionManager::get_master_password`] is the single choke point
//! for every consumer of secret fields.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::store::{keys, load, save, KvStore};

use super::crypto;

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoPasswordSet,
    Locked,
    Unlocked { expiry: i64 },
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::NoPasswordSet => write!(f, "no master password set"),
            SessionState::Locked => write!(f, "locked"),
            SessionState::Unlocked { expiry } => {
                match DateTime::<Utc>::from_timestamp_millis(*expiry) {
                    Some(at) => write!(f, "unlocked until {}", at.format("%H:%M:%S UTC")),
                    None => write!(f, "unlocked"),
                }
            }
        }
    }
}

/// In-memory session record
struct Session {
    token: String,
    expiry: i64,
    master_password: Zeroizing<String>,
}

/// Holds the verified master password for a bounded time
pub struct SessionManager {
    /// Persistent store holding the password digest
    local: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    validity_millis: i64,
    session: RwLock<Option<Session>>,
}

impl SessionManager {
    pub fn new(local: Arc<dyn KvStore>, clock: Arc<dyn Clock>, validity_minutes: i64) -> Self {
        Self {
            local,
            clock,
            validity_millis: validity_minutes * 60 * 1000,
            session: RwLock::new(None),
        }
    }

    async fn stored_hash(&self) -> Result<Option<String>> {
        load::<String>(self.local.as_ref(), keys::MASTER_PASSWORD_HASH).await
    }

    /// Whether a master password has been configured
    pub async fn has_master_password(&self) -> Result<bool> {
        Ok(self.stored_hash().await?.is_some())
    }

    /// Current state, clearing an expired session as a side effect
    pub async fn state(&self) -> Result<SessionState> {
        if !self.has_master_password().await? {
            return Ok(SessionState::NoPasswordSet);
        }
        if !self.validate_session().await {
            return Ok(SessionState::Locked);
        }
        match self.session.read().await.as_ref() {
            Some(s) => Ok(SessionState::Unlocked { expiry: s.expiry }),
            None => Ok(SessionState::Locked),
        }
    }

    /// First-time setup: validate strength, store the digest, unlock
    pub async fn setup_password(&self, password: &str) -> Result<()> {
        if self.has_master_password().await? {
            return Err(Error::Authentication(
                "a master password is already set".to_string(),
            ));
        }
        crypto::validate_password_strength(password)?;

        save(
            self.local.as_ref(),
            keys::MASTER_PASSWORD_HASH,
            &crypto::hash_password(password),
        )
        .await?;
        info!("Master password configured");

        self.open_session(password).await;
        Ok(())
    }

    /// Unlock with the master password
    pub async fn create_session(&self, password: &str) -> Result<()> {
        let stored = self.stored_hash().await?.ok_or(Error::PasswordNotSet)?;
        if !crypto::verify_password(password, &stored) {
            warn!("Master password verification failed");
            return Err(Error::Authentication("incorrect master password".to_string()));
        }
        self.open_session(password).await;
        Ok(())
    }

    /// Verify `old` and the strength of `new` without changing anything
    pub async fn check_password_change(&self, old: &str, new: &str) -> Result<()> {
        let stored = self.stored_hash().await?.ok_or(Error::PasswordNotSet)?;
        if !crypto::verify_password(old, &stored) {
            return Err(Error::Authentication("incorrect master password".to_string()));
        }
        crypto::validate_password_strength(new)
    }

    /// Replace the master password; the caller re-encrypts stored secrets first
    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        self.check_password_change(old, new).await?;

        save(
            self.local.as_ref(),
            keys::MASTER_PASSWORD_HASH,
            &crypto::hash_password(new),
        )
        .await?;
        info!("Master password changed");

        self.open_session(new).await;
        Ok(())
    }

    async fn open_session(&self, password: &str) {
        let expiry = self.clock.now_millis() + self.validity_millis;
        let session = Session {
            token: uuid::Uuid::new_v4().to_string(),
            expiry,
            master_password: Zeroizing::new(password.to_string()),
        };
        debug!(token = %session.token, "Session created");
        *self.session.write().await = Some(session);
    }

    /// True while an unexpired session exists; clears it once expired
    pub async fn validate_session(&self) -> bool {
        let now = self.clock.now_millis();
        {
            let guard = self.session.read().await;
            match guard.as_ref() {
                None => return false,
                Some(s) if now < s.expiry => return true,
                Some(_) => {}
            }
        }

        let mut guard = self.session.write().await;
        if let Some(s) = guard.as_ref() {
            if now >= s.expiry {
                info!("Session expired, locking");
                *guard = None;
            }
        }
        guard.is_some()
    }

    /// Push the expiry out by a full validity window
    pub async fn extend_session(&self) -> Result<()> {
        if !self.validate_session().await {
            return Err(Error::SessionLocked);
        }
        let expiry = self.clock.now_millis() + self.validity_millis;
        if let Some(s) = self.session.write().await.as_mut() {
            s.expiry = expiry;
            debug!(token = %s.token, "Session extended");
        }
        Ok(())
    }

    /// Lock immediately
    pub async fn clear_session(&self) {
        if self.session.write().await.take().is_some() {
            info!("Session cleared");
        }
    }

    /// The master password, only while the session is valid
    pub async fn get_master_password(&self) -> Option<Zeroizing<String>> {
        if !self.validate_session().await {
            return None;
        }
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.master_password.clone())
    }

    /// Current session token, for correlating log lines
    pub async fn session_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const PASSWORD: &str = "Str0ng!pass";

    fn manager() -> (SessionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), clock.clone(), 30);
        (manager, clock)
    }

    #[tokio::test]
    async fn test_setup_unlocks() {
        let (manager, _) = manager();
        assert_eq!(manager.state().await.unwrap(), SessionState::NoPasswordSet);

        manager.setup_password(PASSWORD).await.unwrap();
        assert!(manager.validate_session().await);
        assert_eq!(
            manager.get_master_password().await.as_deref().map(String::as_str),
            Some(PASSWORD)
        );
        assert!(matches!(
            manager.state().await.unwrap(),
            SessionState::Unlocked { expiry: 2_800_000 }
        ));
    }

    #[tokio::test]
    async fn test_setup_rejects_weak_password() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.setup_password("weak").await,
            Err(Error::WeakPassword(_))
        ));
        assert!(!manager.has_master_password().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_session_checks_password() {
        let (manager, _) = manager();
        manager.setup_password(PASSWORD).await.unwrap();
        manager.clear_session().await;
        assert!(!manager.validate_session().await);
        assert_eq!(manager.state().await.unwrap(), SessionState::Locked);

        assert!(matches!(
            manager.create_session("Wr0ng!pass").await,
            Err(Error::Authentication(_))
        ));
        assert!(!manager.validate_session().await);

        manager.create_session(PASSWORD).await.unwrap();
        assert!(manager.validate_session().await);
    }

    #[tokio::test]
    async fn test_create_session_without_password_set() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.create_session(PASSWORD).await,
            Err(Error::PasswordNotSet)
        ));
    }

    #[tokio::test]
    async fn test_expiry_locks_lazily() {
        let (manager, clock) = manager();
        manager.setup_password(PASSWORD).await.unwrap();

        clock.advance_millis(30 * 60 * 1000 - 1);
        assert!(manager.validate_session().await);

        clock.advance_millis(1);
        assert!(!manager.validate_session().await);
        assert!(manager.get_master_password().await.is_none());
        assert!(manager.session_token().await.is_none());
    }

    #[tokio::test]
    async fn test_extend_only_when_valid() {
        let (manager, clock) = manager();
        manager.setup_password(PASSWORD).await.unwrap();

        clock.advance_millis(20 * 60 * 1000);
        manager.extend_session().await.unwrap();
        clock.advance_millis(20 * 60 * 1000);
        assert!(manager.validate_session().await);

        clock.advance_millis(11 * 60 * 1000);
        assert!(matches!(
            manager.extend_session().await,
            Err(Error::SessionLocked)
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let (manager, _) = manager();
        manager.setup_password(PASSWORD).await.unwrap();
        assert!(manager.change_password("bad", "N3w!password").await.is_err());
        manager.change_password(PASSWORD, "N3w!password").await.unwrap();

        manager.clear_session().await;
        assert!(manager.create_session(PASSWORD).await.is_err());
        manager.create_session("N3w!password").await.unwrap();
    }
}
