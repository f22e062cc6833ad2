//! Session signing.
//!
//! The auth handshake carries an HMAC-SHA256 signature over the pre-hash
//! string `"<unix-seconds>GET<path>"`, keyed with the base64-decoded API
//! secret and base64-encoded for the wire. The path is the streaming
//! endpoint path the server signs against, not the connection URL path.

use crate::error::{StreamError, StreamResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// HTTP verb baked into the pre-hash string.
pub const SIGNING_METHOD: &str = "GET";

/// Endpoint path the server expects in the pre-hash string.
pub const DEFAULT_SIGNING_PATH: &str = "/price.tickers";

/// API credentials for one session.
///
/// The secret is decoded from base64 exactly once and kept as raw bytes
/// in zeroizing storage.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: Zeroizing<Vec<u8>>,
    passphrase: Zeroizing<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a base64-encoded secret.
    ///
    /// # Errors
    /// `StreamError::Configuration` if the secret is empty or not valid base64.
    pub fn new(
        api_key: impl Into<String>,
        secret_b64: &str,
        passphrase: impl Into<String>,
    ) -> StreamResult<Self> {
        let trimmed = secret_b64.trim();
        if trimmed.is_empty() {
            return Err(StreamError::Configuration(
                "secret key is empty".to_string(),
            ));
        }
        let secret = BASE64
            .decode(trimmed)
            .map_err(|e| StreamError::Configuration(format!("secret key is not base64: {e}")))?;

        Ok(Self::from_raw_secret(api_key, secret, passphrase))
    }

    /// Build credentials from already-decoded secret bytes.
    pub fn from_raw_secret(
        api_key: impl Into<String>,
        secret: Vec<u8>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: Zeroizing::new(secret),
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Sign `path` at `timestamp` with this secret.
    pub fn sign(&self, path: &str, timestamp: i64) -> StreamResult<String> {
        sign(&self.secret_key, path, timestamp)
    }
}

/// Canonical pre-hash string: decimal seconds, verb, path.
pub fn pre_hash(timestamp: i64, path: &str) -> String {
    format!("{timestamp}{SIGNING_METHOD}{path}")
}

/// HMAC-SHA256 over the pre-hash string, base64-encoded.
///
/// # Errors
/// `StreamError::Configuration` if the key is rejected by the MAC.
pub fn sign(secret: &[u8], path: &str, timestamp: i64) -> StreamResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| StreamError::Configuration(format!("invalid signing key: {e}")))?;
    mac.update(pre_hash(timestamp, path).as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Wall-clock unix seconds, read fresh on every call.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64("fxstream-test-secret-key-0123456")
    const TEST_SECRET_B64: &str = "ZnhzdHJlYW0tdGVzdC1zZWNyZXQta2V5LTAxMjM0NTY=";

    fn test_credentials() -> Credentials {
        Credentials::new("key-123", TEST_SECRET_B64, "s3cret-pass").unwrap()
    }

    #[test]
    fn test_pre_hash_format() {
        assert_eq!(
            pre_hash(1_700_000_000, "/price.tickers"),
            "1700000000GET/price.tickers"
        );
    }

    #[test]
    fn test_sign_known_answer() {
        let creds = test_credentials();
        assert_eq!(
            creds.sign("/price.tickers", 1_700_000_000).unwrap(),
            "NxMSTLKH7UMfN/29r/CwlpfNSTKdLvAAyw8a2TRU36A="
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        let creds = test_credentials();
        let a = creds.sign(DEFAULT_SIGNING_PATH, 1_700_000_123).unwrap();
        let b = creds.sign(DEFAULT_SIGNING_PATH, 1_700_000_123).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_changes_with_each_input() {
        let creds = test_credentials();
        let base = creds.sign("/price.tickers", 1_700_000_000).unwrap();

        assert_eq!(
            creds.sign("/price.tickers", 1_700_000_001).unwrap(),
            "LT7IwHNdAXWYPMvxbNT6qY1e+jCDfVlpOGNJZAEVb7Q="
        );
        assert_eq!(
            creds.sign("/other", 1_700_000_000).unwrap(),
            "5OUMkS/YwYulyEspEGhT2wgX7Bv3b8Bkr9muiH/Fm5w="
        );

        let other_key = Credentials::from_raw_secret("key", b"another-secret".to_vec(), "phrase");
        assert_ne!(other_key.sign("/price.tickers", 1_700_000_000).unwrap(), base);
    }

    #[test]
    fn test_sign_accepts_empty_and_oversized_keys() {
        // HMAC pads short keys and hashes long ones; neither is an error.
        let short = sign(b"", "/price.tickers", 1_700_000_000).unwrap();
        let long = sign(&[7u8; 200], "/price.tickers", 1_700_000_000).unwrap();
        assert_eq!(BASE64.decode(&short).unwrap().len(), 32);
        assert_eq!(BASE64.decode(&long).unwrap().len(), 32);
        assert_ne!(short, long);
    }

    #[test]
    fn test_invalid_base64_secret_is_configuration_error() {
        let err = Credentials::new("key", "not base64!!", "phrase").unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }

    #[test]
    fn test_empty_secret_is_configuration_error() {
        let err = Credentials::new("key", "   ", "phrase").unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }

    #[test]
    fn test_debug_redacts_secret_material() {
        let rendered = format!("{:?}", test_credentials());
        assert!(rendered.contains("key-123"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("s3cret-pass"));
        assert!(!rendered.contains(TEST_SECRET_B64));
    }
}
