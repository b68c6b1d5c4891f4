//! Crypto capability consumed by the client and the application layer.
//!
//! Signing and encryption are injected through [`CryptoGateway`] so that the
//! relay client never touches secret key material directly. [`Keys`] is the
//! in-process implementation; a hardware signer or remote signer can stand
//! in for it.

use crate::keys::Keys;
use crate::nip01::{self, Event};
use crate::nip04;
use thiserror::Error;

/// Errors reported by a [`CryptoGateway`].
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Sign, verify, encrypt and decrypt on behalf of one identity.
pub trait CryptoGateway: Send + Sync {
    /// Hex x-only public key of the identity.
    fn public_key(&self) -> String;

    /// Sign a hex event id, returning the hex signature.
    fn sign(&self, event_id: &str) -> Result<String, CryptoError>;

    /// Verify an event's id and signature.
    fn verify(&self, event: &Event) -> bool {
        nip01::verify(event)
    }

    /// Encrypt `plaintext` for `peer_pubkey`.
    fn encrypt(&self, peer_pubkey: &str, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt `ciphertext` exchanged with `peer_pubkey`.
    fn decrypt(&self, peer_pubkey: &str, ciphertext: &str) -> Result<String, CryptoError>;
}

impl CryptoGateway for Keys {
    fn public_key(&self) -> String {
        self.public_key_hex().to_string()
    }

    fn sign(&self, event_id: &str) -> Result<String, CryptoError> {
        self.sign_id(event_id)
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    fn encrypt(&self, peer_pubkey: &str, plaintext: &str) -> Result<String, CryptoError> {
        nip04::encrypt(self.secret_key(), peer_pubkey, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    fn decrypt(&self, peer_pubkey: &str, ciphertext: &str) -> Result<String, CryptoError> {
        nip04::decrypt(self.secret_key(), peer_pubkey, ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nip01::{build_unsigned, finalize};
    use std::sync::Arc;

    #[test]
    fn test_gateway_signs_verifiable_events() {
        let gateway: Arc<dyn CryptoGateway> = Arc::new(Keys::generate());

        let unsigned = build_unsigned(1, "via gateway", vec![], gateway.public_key(), 42).unwrap();
        let event = finalize(unsigned, |id| gateway.sign(id)).unwrap();

        assert!(gateway.verify(&event));
    }

    #[test]
    fn test_gateway_encryption_roundtrip() {
        let alice = Keys::generate();
        let bob = Keys::generate();

        let ciphertext = alice.encrypt(&bob.public_key(), "check in?").unwrap();
        assert_eq!(bob.decrypt(&alice.public_key(), &ciphertext).unwrap(), "check in?");
    }

    #[test]
    fn test_gateway_maps_errors() {
        let keys = Keys::generate();
        assert!(matches!(
            keys.sign("not-hex"),
            Err(CryptoError::Signing(_))
        ));
        assert!(matches!(
            keys.decrypt(&keys.public_key(), "garbage"),
            Err(CryptoError::Decryption(_))
        ));
    }
}
