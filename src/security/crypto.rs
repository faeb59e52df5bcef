//! Password hashing and field-level encryption
//!
//! Encryption derives a 256-bit key with Argon2id from the master password
//! and a per-ciphertext random salt, then seals with AES-256-GCM.
//!
//! Envelope (base64): `version(1) || salt(16) || nonce(12) || ciphertext+tag`
//!
//! `encrypt` and `decrypt` return `None` instead of erroring: a wrong
//! password or corrupt field must never take down the settings-load path.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Version stored next to `isEncrypted` on settings and accounts
pub const ENCRYPTION_VERSION: u32 = 2;

const ENVELOPE_VERSION: u8 = 2;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN;

/// Minimum master password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// One-way SHA-256 digest (lowercase hex), used only to verify the password
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a password against a stored digest in constant time
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let computed = hash_password(password);
    let (a, b) = (computed.as_bytes(), stored_hash.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check master password strength
///
/// At least 8 characters with an uppercase letter, a lowercase letter, a
/// digit and a special character.
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::WeakPassword(format!(
            "must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(Error::WeakPassword("must contain an uppercase letter".into()));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(Error::WeakPassword("must contain a lowercase letter".into()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::WeakPassword("must contain a digit".into()));
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        return Err(Error::WeakPassword("must contain a special character".into()));
    }
    Ok(())
}

fn derive_key(password: &str, salt: &[u8]) -> Option<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(19_456, 2, 1, Some(KEY_LEN)).ok()?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .ok()?;
    Some(key)
}

/// Encrypt a field. `None` on empty input or any failure.
pub fn encrypt(plaintext: &str, password: &str) -> Option<String> {
    if plaintext.is_empty() || password.is_empty() {
        return None;
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..]).ok()?;
    let sealed = match cipher.encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes()) {
        Ok(sealed) => sealed,
        Err(_) => {
            debug!("AES-GCM encryption failed");
            return None;
        }
    };

    let mut envelope = Vec::with_capacity(HEADER_LEN + sealed.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&sealed);

    Some(BASE64_STANDARD.encode(envelope))
}

/// Decrypt a field. `None` on wrong password, corrupt data or empty input.
pub fn decrypt(ciphertext: &str, password: &str) -> Option<String> {
    if ciphertext.is_empty() || password.is_empty() {
        return None;
    }

    let envelope = BASE64_STANDARD.decode(ciphertext.trim()).ok()?;
    if envelope.len() <= HEADER_LEN || envelope[0] != ENVELOPE_VERSION {
        debug!("Ciphertext envelope malformed or unsupported version");
        return None;
    }

    let salt = &envelope[1..1 + SALT_LEN];
    let nonce = Nonce::from_slice(&envelope[1 + SALT_LEN..HEADER_LEN]);
    let sealed = &envelope[HEADER_LEN..];

    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..]).ok()?;
    let plaintext = cipher.decrypt(nonce, sealed).ok()?;

    String::from_utf8(plaintext).ok()
}
