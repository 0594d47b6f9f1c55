//! API key generation and hashing utilities
//!
//! Keys are compared by an HMAC-SHA256 of the plaintext keyed with a server
//! secret, so a leaked store alone cannot be used to verify guesses.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use super::crypto::sha256_hex;
use crate::core::constants::{
    API_KEY_ID_HEX_LEN, API_KEY_ID_PREFIX, API_KEY_MASK_VISIBLE_LEN, API_KEY_PREFIX,
    API_KEY_PREFIX_DISPLAY_LEN, API_KEY_RANDOM_BYTES,
};

type HmacSha256 = Hmac<Sha256>;

/// Generate opaque API key: kg_{64 hex chars}
/// Uses OsRng (CSPRNG) for 256 bits of entropy
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, hex::encode(bytes))
}

/// Stable identifier derived from the plaintext: key_{16 hex chars of SHA-256}
///
/// Unrelated to the comparison hash, which needs the server secret.
pub fn key_id_for(key: &str) -> String {
    let digest = sha256_hex(key);
    format!("{}{}", API_KEY_ID_PREFIX, &digest[..API_KEY_ID_HEX_LEN])
}

/// Extract prefix for display (first 12 chars, e.g., "kg_a1b2c3d4e")
pub fn key_prefix(key: &str) -> String {
    key.chars().take(API_KEY_PREFIX_DISPLAY_LEN).collect()
}

/// Validate key format: kg_{64 lowercase hex chars}
pub fn is_valid_api_key(key: &str) -> bool {
    key.starts_with(API_KEY_PREFIX)
        && key.len() == API_KEY_PREFIX.len() + API_KEY_RANDOM_BYTES * 2
        && key[API_KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Truncate a stored hash for display: first 8 chars followed by an ellipsis
pub fn mask_hash(hash: &str) -> String {
    let visible: String = hash.chars().take(API_KEY_MASK_VISIBLE_LEN).collect();
    format!("{visible}…")
}

/// HMAC-SHA256 hasher keyed with the server secret
#[derive(Clone)]
pub struct ApiKeyHasher {
    mac: HmacSha256,
}

impl ApiKeyHasher {
    pub fn new(server_secret: &[u8]) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(server_secret)
            .map_err(|e| anyhow::anyhow!("Invalid API key secret: {}", e))?;
        Ok(Self { mac })
    }

    /// HMAC-SHA256 of the key (hex encoded)
    pub fn hash(&self, key: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(key.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for ApiKeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKeyHasher(***)")
    }
}

/// Extract a legacy key from a raw `Authorization` value.
///
/// Bearer values are never treated as legacy keys. Basic credentials carry the
/// key as username or password; anything else is taken verbatim.
pub fn extract_legacy_key(header: &str) -> Option<String> {
    let header = header.trim();
    if header.is_empty() || header.starts_with("Bearer ") || header == "Bearer" {
        return None;
    }

    if let Some(encoded) = header.strip_prefix("Basic ") {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())?;

        let key = match decoded.split_once(':') {
            Some((username, password)) => {
                if !username.is_empty() {
                    username
                } else {
                    password
                }
            }
            None => decoded.as_str(),
        };
        return (!key.is_empty()).then(|| key.to_string());
    }

    Some(header.to_string())
}
