//! Folio Tracker Library
//!
//! Portfolio tracking across EVM, Solana and Bitcoin wallets and centralized
//! exchange accounts, with secrets encrypted under a master password.

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod ocr;
pub mod price;
pub mod risk;
pub mod security;
pub mod store;
pub mod update;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
