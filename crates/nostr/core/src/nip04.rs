//! NIP-04: Encrypted Direct Message.
//!
//! The shared key is the x coordinate of the ECDH point between our secret
//! key and the peer's x-only public key (lifted with even parity). Content is
//! AES-256-CBC with PKCS#7 padding, encoded as `base64(ciphertext)?iv=base64(iv)`.

use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::secp256k1::{Parity, SecretKey, XOnlyPublicKey, ecdh};
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors that can occur during NIP-04 encryption or decryption.
#[derive(Debug, Error)]
pub enum Nip04Error {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("decrypted content is not valid UTF-8")]
    InvalidUtf8,
}

/// Encrypt `plaintext` for `peer_pubkey` (hex, x-only).
pub fn encrypt(
    secret_key: &[u8; 32],
    peer_pubkey: &str,
    plaintext: &str,
) -> Result<String, Nip04Error> {
    let key = shared_key(secret_key, peer_pubkey)?;

    let mut iv = [0u8; 16];
    rand::rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| Nip04Error::InvalidSecretKey(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!(
        "{}?iv={}",
        BASE64.encode(ciphertext),
        BASE64.encode(iv)
    ))
}

/// Decrypt a `base64?iv=base64` payload sent by (or to) `peer_pubkey`.
pub fn decrypt(
    secret_key: &[u8; 32],
    peer_pubkey: &str,
    payload: &str,
) -> Result<String, Nip04Error> {
    let (ciphertext_b64, iv_b64) = payload
        .split_once("?iv=")
        .ok_or_else(|| Nip04Error::InvalidPayload("missing iv".to_string()))?;

    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| Nip04Error::InvalidPayload(format!("ciphertext: {}", e)))?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|e| Nip04Error::InvalidPayload(format!("iv: {}", e)))?;
    if iv.len() != 16 {
        return Err(Nip04Error::InvalidPayload(format!(
            "iv must be 16 bytes, got {}",
            iv.len()
        )));
    }

    let key = shared_key(secret_key, peer_pubkey)?;
    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| Nip04Error::Decryption(e.to_string()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| Nip04Error::Decryption(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|_| Nip04Error::InvalidUtf8)
}

fn shared_key(secret_key: &[u8; 32], peer_pubkey: &str) -> Result<[u8; 32], Nip04Error> {
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip04Error::InvalidSecretKey(e.to_string()))?;

    let peer_bytes =
        hex::decode(peer_pubkey).map_err(|e| Nip04Error::InvalidPublicKey(e.to_string()))?;
    let xonly = XOnlyPublicKey::from_slice(&peer_bytes)
        .map_err(|e| Nip04Error::InvalidPublicKey(e.to_string()))?;

    let point = ecdh::shared_secret_point(&xonly.public_key(Parity::Even), &sk);
    let mut key = [0u8; 32];
    key.copy_from_slice(&point[..32]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    #[test]
    fn test_encrypt_decrypt_between_peers() {
        let alice = Keys::generate();
        let bob = Keys::generate();

        let payload = encrypt(alice.secret_key(), bob.public_key_hex(), "hello bob").unwrap();
        assert!(payload.contains("?iv="));

        let plaintext = decrypt(bob.secret_key(), alice.public_key_hex(), &payload).unwrap();
        assert_eq!(plaintext, "hello bob");

        // The sender can read its own message back.
        let own = decrypt(alice.secret_key(), bob.public_key_hex(), &payload).unwrap();
        assert_eq!(own, "hello bob");
    }

    #[test]
    fn test_note_to_self() {
        let keys = Keys::generate();
        let payload = encrypt(keys.secret_key(), keys.public_key_hex(), "journal").unwrap();
        let plaintext = decrypt(keys.secret_key(), keys.public_key_hex(), &payload).unwrap();
        assert_eq!(plaintext, "journal");
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let keys = Keys::generate();
        let a = encrypt(keys.secret_key(), keys.public_key_hex(), "same").unwrap();
        let b = encrypt(keys.secret_key(), keys.public_key_hex(), "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_third_party_cannot_decrypt() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let eve = Keys::generate();

        let payload = encrypt(alice.secret_key(), bob.public_key_hex(), "secret").unwrap();
        match decrypt(eve.secret_key(), alice.public_key_hex(), &payload) {
            Ok(text) => assert_ne!(text, "secret"),
            Err(_) => {}
        }
    }

    #[test]
    fn test_malformed_payloads() {
        let keys = Keys::generate();
        let pk = keys.public_key_hex();

        assert!(matches!(
            decrypt(keys.secret_key(), pk, "no-iv-here"),
            Err(Nip04Error::InvalidPayload(_))
        ));
        assert!(matches!(
            decrypt(keys.secret_key(), pk, "!!!?iv=AAAA"),
            Err(Nip04Error::InvalidPayload(_))
        ));
        assert!(matches!(
            decrypt(keys.secret_key(), pk, "AAAA?iv=AAAA"),
            Err(Nip04Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_invalid_peer_pubkey() {
        let keys = Keys::generate();
        assert!(matches!(
            encrypt(keys.secret_key(), "zz", "x"),
            Err(Nip04Error::InvalidPublicKey(_))
        ));
        assert!(matches!(
            encrypt(keys.secret_key(), &"ab".repeat(16), "x"),
            Err(Nip04Error::InvalidPublicKey(_))
        ));
    }
}
