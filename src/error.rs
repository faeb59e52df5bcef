//! Error types for the portfolio tracker

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the portfolio tracker
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required setting: {0}")]
    MissingConfig(String),

    // Master password / session errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("No master password has been set")]
    PasswordNotSet,

    #[error("Session locked: unlock with the master password first")]
    SessionLocked,

    #[error("Crypto error: {0}")]
    Crypto(String),

    // Upstream errors
    #[error("{exchange} API error: {message}")]
    Exchange { exchange: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Chain query failed: {0}")]
    Chain(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sync quota exceeded writing {key}: {size} bytes > {limit} bytes")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    // Pipeline errors
    #[error("An update cycle is already running")]
    Busy,

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Build an exchange error carrying the upstream message
    pub fn exchange(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Exchange {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Check if this error is transient (network / upstream API)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Rpc(_) | Error::Chain(_) | Error::Exchange { .. }
        )
    }

    /// Check if this error should be isolated to a single wallet or account
    ///
    /// Soft failures mark the item as `error` and the cycle moves on.
    pub fn is_soft_failure(&self) -> bool {
        self.is_retryable()
            || matches!(
                self,
                Error::SessionLocked | Error::Ocr(_) | Error::Parse(_) | Error::Crypto(_)
            )
    }

    /// Check if this error must block the action that triggered it
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_)
                | Error::WeakPassword(_)
                | Error::PasswordNotSet
                | Error::MissingConfig(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

// Conversion from config crate errors
impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert!(Error::Rpc("down".into()).is_retryable());
        assert!(Error::SessionLocked.is_soft_failure());
        assert!(Error::Parse("abc".into()).is_soft_failure());
        assert!(!Error::SessionLocked.is_blocking());
        assert!(Error::MissingConfig("etherscanApiKey".into()).is_blocking());
        assert!(Error::Authentication("bad".into()).is_blocking());
        assert!(!Error::Authentication("bad".into()).is_soft_failure());
    }

    #[test]
    fn test_exchange_message() {
        let err = Error::exchange("okx", "Invalid Sign");
        assert_eq!(err.to_string(), "okx API error: Invalid Sign");
    }
}
