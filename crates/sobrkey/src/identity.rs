//! The user's Nostr identity, persisted in a [`SecureKeyStore`].

use crate::constants::{STORAGE_PRIVATE_KEY, STORAGE_PUBLIC_KEY};
use crate::error::{Result, SobrkeyError};
use crate::keystore::SecureKeyStore;
use nostr::{KeyError, Keys};
use tracing::{info, warn};

/// Load the stored identity, if any.
pub fn load_identity(store: &dyn SecureKeyStore) -> Result<Option<Keys>> {
    let Some(secret) = store.get(STORAGE_PRIVATE_KEY)? else {
        return Ok(None);
    };
    let keys = Keys::from_hex(&secret)?;

    if store.get(STORAGE_PUBLIC_KEY)?.as_deref() != Some(keys.public_key_hex()) {
        warn!("Stored public key does not match the private key, rewriting it");
        store.set(STORAGE_PUBLIC_KEY, keys.public_key_hex())?;
    }
    Ok(Some(keys))
}

/// Load the stored identity or generate and store a new one.
pub fn load_or_generate(store: &dyn SecureKeyStore) -> Result<Keys> {
    if let Some(keys) = load_identity(store)? {
        return Ok(keys);
    }

    let keys = Keys::generate();
    save_identity(store, &keys)?;
    info!("Generated new identity {}", keys.public_key_hex());
    Ok(keys)
}

/// Replace the stored identity with a 64-character hex secret key.
pub fn import_secret_key(store: &dyn SecureKeyStore, secret_key_hex: &str) -> Result<Keys> {
    let secret_key_hex = secret_key_hex.trim();
    if secret_key_hex.len() != 64 {
        return Err(KeyError::InvalidSecretKey(format!(
            "expected 64 hex characters, got {}",
            secret_key_hex.len()
        ))
        .into());
    }

    let keys = Keys::from_hex(secret_key_hex)?;
    save_identity(store, &keys)?;
    info!("Imported identity {}", keys.public_key_hex());
    Ok(keys)
}

/// The stored identity as `(secret_hex, public_hex)`, for backup.
pub fn export_identity(store: &dyn SecureKeyStore) -> Result<(String, String)> {
    let keys = load_identity(store)?.ok_or(SobrkeyError::NoIdentity)?;
    Ok((keys.secret_key_hex(), keys.public_key_hex().to_string()))
}

pub fn has_identity(store: &dyn SecureKeyStore) -> Result<bool> {
    Ok(store.get(STORAGE_PRIVATE_KEY)?.is_some())
}

/// Delete the stored identity. The keys are gone for good.
pub fn forget_identity(store: &dyn SecureKeyStore) -> Result<()> {
    store.delete(STORAGE_PRIVATE_KEY)?;
    store.delete(STORAGE_PUBLIC_KEY)
}

fn save_identity(store: &dyn SecureKeyStore, keys: &Keys) -> Result<()> {
    store.set(STORAGE_PRIVATE_KEY, &keys.secret_key_hex())?;
    store.set(STORAGE_PUBLIC_KEY, keys.public_key_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    #[test]
    fn test_generate_once_then_reload() {
        let store = MemoryKeyStore::new();
        assert!(!has_identity(&store).unwrap());

        let first = load_or_generate(&store).unwrap();
        let second = load_or_generate(&store).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
        assert!(has_identity(&store).unwrap());
        assert_eq!(
            store.get(STORAGE_PUBLIC_KEY).unwrap().as_deref(),
            Some(first.public_key_hex())
        );
    }

    #[test]
    fn test_import_replaces_identity() {
        let store = MemoryKeyStore::new();
        load_or_generate(&store).unwrap();

        let imported = Keys::generate();
        let keys = import_secret_key(&store, &format!(" {} ", imported.secret_key_hex())).unwrap();
        assert_eq!(keys.public_key_hex(), imported.public_key_hex());
        assert_eq!(
            load_identity(&store).unwrap().unwrap().public_key_hex(),
            imported.public_key_hex()
        );
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let store = MemoryKeyStore::new();
        assert!(matches!(
            import_secret_key(&store, "abcd"),
            Err(SobrkeyError::Key(_))
        ));
        assert!(matches!(
            import_secret_key(&store, &"zz".repeat(32)),
            Err(SobrkeyError::Key(_))
        ));
        assert!(!has_identity(&store).unwrap());
    }

    #[test]
    fn test_mismatched_public_key_is_repaired() {
        let store = MemoryKeyStore::new();
        let keys = load_or_generate(&store).unwrap();
        store.set(STORAGE_PUBLIC_KEY, "stale").unwrap();

        load_identity(&store).unwrap();
        assert_eq!(
            store.get(STORAGE_PUBLIC_KEY).unwrap().as_deref(),
            Some(keys.public_key_hex())
        );
    }

    #[test]
    fn test_export_round_trips_through_import() {
        let store = MemoryKeyStore::new();
        assert!(matches!(
            export_identity(&store),
            Err(SobrkeyError::NoIdentity)
        ));

        let keys = load_or_generate(&store).unwrap();
        let (secret, public) = export_identity(&store).unwrap();
        assert_eq!(secret, keys.secret_key_hex());
        assert_eq!(public, keys.public_key_hex());

        let other = MemoryKeyStore::new();
        let restored = import_secret_key(&other, &secret).unwrap();
        assert_eq!(restored.public_key_hex(), public);
    }

    #[test]
    fn test_forget_identity() {
        let store = MemoryKeyStore::new();
        load_or_generate(&store).unwrap();
        forget_identity(&store).unwrap();
        assert!(!has_identity(&store).unwrap());
        assert!(load_identity(&store).unwrap().is_none());
    }
}
