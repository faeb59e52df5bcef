//! Request signing schemes used by the exchanges
//!
//! Every exchange rejects a request whose signature differs by a single bit,
//! so each pre-hash string is assembled exactly as the venue documents it.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use solana_sdk::signer::keypair::keypair_from_seed;
use solana_sdk::signer::Signer;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &str, message: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Crypto(format!("invalid HMAC key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC-SHA256, lowercase hex (Binance, Bybit)
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String> {
    Ok(hex::encode(hmac_sha256(secret, message)?))
}

/// HMAC-SHA256, standard base64 (OKX, Bitget)
pub fn hmac_sha256_base64(secret: &str, message: &str) -> Result<String> {
    Ok(BASE64_STANDARD.encode(hmac_sha256(secret, message)?))
}

/// ED25519 detached signature (Backpack)
///
/// `secret_b64` is the base64 32-byte seed. Returns the base64 signature and
/// the base64 public key derived from the seed.
pub fn ed25519_sign_base64(secret_b64: &str, message: &str) -> Result<(String, String)> {
    let seed = BASE64_STANDARD
        .decode(secret_b64.trim())
        .map_err(|e| Error::Crypto(format!("invalid base64 ED25519 secret: {}", e)))?;
    if seed.len() != 32 {
        return Err(Error::Crypto(format!(
            "ED25519 secret must be 32 bytes, got {}",
            seed.len()
        )));
    }
    let keypair = keypair_from_seed(&seed)
        .map_err(|e| Error::Crypto(format!("invalid ED25519 seed: {}", e)))?;
    let signature = keypair.sign_message(message.as_bytes());
    Ok((
        BASE64_STANDARD.encode(signature.as_ref()),
        BASE64_STANDARD.encode(keypair.pubkey().to_bytes()),
    ))
}

/// Current epoch milliseconds
pub fn millis_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-02T03:04:05.678Z`
pub fn iso_timestamp_ms(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// `k1=v1&k2=v2` in the given order, values form-encoded
pub fn build_query(params: &[(&str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Backpack signing string:
/// `instruction=<name>[&<params sorted by key>]&timestamp=<ms>&window=<ms>`
pub fn backpack_signing_string(
    instruction: &str,
    params: &[(&str, String)],
    timestamp: i64,
    window: u64,
) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = format!("instruction={}", instruction);
    for (key, value) in sorted {
        out.push_str(&format!("&{}={}", key, value));
    }
    out.push_str(&format!("&timestamp={}&window={}", timestamp, window));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOX: &str = "The quick brown fox jumps over the lazy dog";

    #[test]
    fn test_hmac_vectors() {
        assert_eq!(
            hmac_sha256_hex("key", FOX).unwrap(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
        assert_eq!(
            hmac_sha256_base64("key", FOX).unwrap(),
            "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg="
        );
    }

    #[test]
    fn test_ed25519_rfc8032_vector() {
        let (signature, public_key) =
            ed25519_sign_base64("nWGxne/9WmC6hEr0kuwsxERJxWl7MmkZcDusAxyuf2A=", "").unwrap();
        assert_eq!(public_key, "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=");
        assert_eq!(
            signature,
            "5VZDAMNgrHKQhuLMgG6CioSHfx645dl02HPgZSJJAVVfuIIVkKM7rMYeOXAc+bRr0lv18FlbviRlUUFDjnoQCw=="
        );
    }

    #[test]
    fn test_ed25519_rejects_bad_secret() {
        assert!(ed25519_sign_base64("not base64!!", "x").is_err());
        assert!(ed25519_sign_base64(&BASE64_STANDARD.encode([1u8; 16]), "x").is_err());
    }

    #[test]
    fn test_iso_timestamp() {
        assert_eq!(iso_timestamp_ms(1_704_164_645_678), "2024-01-02T03:04:05.678Z");
    }

    #[test]
    fn test_query_keeps_order() {
        let q = build_query(&[
            ("timestamp", "1".to_string()),
            ("quoteAsset", "USDT".to_string()),
        ]);
        assert_eq!(q, "timestamp=1&quoteAsset=USDT");
    }

    #[test]
    fn test_backpack_signing_string_sorts_params() {
        let s = backpack_signing_string(
            "borrowLendPositionQuery",
            &[("symbol", "SOL".to_string()), ("limit", "10".to_string())],
            1700000000000,
            5000,
        );
        assert_eq!(
            s,
            "instruction=borrowLendPositionQuery&limit=10&symbol=SOL&timestamp=1700000000000&window=5000"
        );
        assert_eq!(
            backpack_signing_string("balanceQuery", &[], 1, 5000),
            "instruction=balanceQuery&timestamp=1&window=5000"
        );
    }
}
