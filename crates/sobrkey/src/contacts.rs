//! Trusted contacts: the people who receive emergency alerts.

use crate::constants::STORAGE_TRUSTED_CONTACTS;
use crate::error::{Result, SobrkeyError};
use crate::keystore::{SecureKeyStore, get_json, set_json};
use std::sync::Arc;

/// Lowercase a 64-character hex public key, rejecting anything else.
pub fn normalize_pubkey(pubkey: &str) -> Result<String> {
    let pubkey = pubkey.trim();
    if pubkey.len() != 64 || !pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SobrkeyError::InvalidContact(pubkey.to_string()));
    }
    Ok(pubkey.to_ascii_lowercase())
}

/// Contact list stored under `sobrkey_trusted_contacts`.
#[derive(Clone)]
pub struct TrustedContacts {
    store: Arc<dyn SecureKeyStore>,
}

impl TrustedContacts {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<String>> {
        Ok(get_json(self.store.as_ref(), STORAGE_TRUSTED_CONTACTS)?.unwrap_or_default())
    }

    pub fn contains(&self, pubkey: &str) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        Ok(self.list()?.contains(&pubkey))
    }

    /// Add a contact. Returns `false` if already trusted.
    pub fn add(&self, pubkey: &str) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        let mut contacts = self.list()?;
        if contacts.contains(&pubkey) {
            return Ok(false);
        }
        contacts.push(pubkey);
        set_json(self.store.as_ref(), STORAGE_TRUSTED_CONTACTS, &contacts)?;
        Ok(true)
    }

    /// Remove a contact. Returns `false` if it was not trusted.
    pub fn remove(&self, pubkey: &str) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        let mut contacts = self.list()?;
        let before = contacts.len();
        contacts.retain(|c| *c != pubkey);
        if contacts.len() == before {
            return Ok(false);
        }
        set_json(self.store.as_ref(), STORAGE_TRUSTED_CONTACTS, &contacts)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;
    use nostr::Keys;

    #[test]
    fn test_normalize_pubkey() {
        let pubkey = Keys::generate().public_key_hex().to_string();
        assert_eq!(
            normalize_pubkey(&pubkey.to_ascii_uppercase()).unwrap(),
            pubkey
        );
        assert!(normalize_pubkey("npub1xyz").is_err());
        assert!(normalize_pubkey(&"g".repeat(64)).is_err());
        assert!(normalize_pubkey("").is_err());
    }

    #[test]
    fn test_add_remove() {
        let contacts = TrustedContacts::new(Arc::new(MemoryKeyStore::new()));
        let a = Keys::generate().public_key_hex().to_string();
        let b = Keys::generate().public_key_hex().to_string();

        assert!(contacts.list().unwrap().is_empty());
        assert!(contacts.add(&a).unwrap());
        assert!(!contacts.add(&a).unwrap());
        assert!(contacts.add(&b).unwrap());
        assert_eq!(contacts.list().unwrap(), vec![a.clone(), b.clone()]);
        assert!(contacts.contains(&b).unwrap());

        assert!(contacts.remove(&a).unwrap());
        assert!(!contacts.remove(&a).unwrap());
        assert_eq!(contacts.list().unwrap(), vec![b]);
    }

    #[test]
    fn test_invalid_contact_is_not_stored() {
        let contacts = TrustedContacts::new(Arc::new(MemoryKeyStore::new()));
        assert!(matches!(
            contacts.add("not-a-key"),
            Err(SobrkeyError::InvalidContact(_))
        ));
        assert!(contacts.list().unwrap().is_empty());
    }
}
