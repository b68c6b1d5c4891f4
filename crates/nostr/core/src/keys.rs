//! Secret key handling.

use crate::nip01::{Nip01Error, sign_event_id};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::SecretKey;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

/// Errors that can occur when loading key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}

/// Generate a random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Get the x-only public key as a hex string from a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, KeyError> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// A secp256k1 secret key together with its x-only public key.
#[derive(Clone)]
pub struct Keys {
    secret_key: [u8; 32],
    public_key: String,
}

impl Keys {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        loop {
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(keys) = Self::from_bytes(generate_secret_key()) {
                return keys;
            }
        }
    }

    /// Load keys from raw secret key bytes.
    pub fn from_bytes(secret_key: [u8; 32]) -> Result<Self, KeyError> {
        let public_key = get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Load keys from a 64-character hex secret key.
    pub fn from_hex(secret_key_hex: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(secret_key_hex.trim())
            .map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        let secret_key: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            KeyError::InvalidSecretKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Self::from_bytes(secret_key)
    }

    pub fn public_key_hex(&self) -> &str {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8; 32] {
        &self.secret_key
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key)
    }

    /// Schnorr-sign an event id.
    pub fn sign_id(&self, id: &str) -> Result<String, Nip01Error> {
        sign_event_id(&self.secret_key, id)
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_valid_pubkey() {
        let keys = Keys::generate();
        assert_eq!(keys.public_key_hex().len(), 64);
        assert!(keys.public_key_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hex_roundtrip() {
        let keys = Keys::generate();
        let restored = Keys::from_hex(&keys.secret_key_hex()).unwrap();
        assert_eq!(restored.public_key_hex(), keys.public_key_hex());
    }

    #[test]
    fn test_public_key_is_deterministic() {
        let sk = generate_secret_key();
        let pk = get_public_key_hex(&sk).unwrap();
        for _ in 0..3 {
            assert_eq!(get_public_key_hex(&sk).unwrap(), pk);
        }
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(Keys::from_hex("xyz"), Err(KeyError::InvalidHex(_))));
        assert!(matches!(
            Keys::from_hex("abcd"),
            Err(KeyError::InvalidSecretKey(_))
        ));
        assert!(Keys::from_hex(&"0".repeat(64)).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keys = Keys::generate();
        let debug = format!("{:?}", keys);
        assert!(!debug.contains(&keys.secret_key_hex()));
        assert!(debug.contains(keys.public_key_hex()));
    }
}
