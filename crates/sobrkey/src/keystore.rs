//! Key-value storage for identity material and settings.
//!
//! [`FileKeyStore`] keeps a single JSON document on disk, created readable
//! only by the owner on Unix. With a passphrase the document is sealed with
//! AES-256-GCM under an Argon2id-derived key; without one it is plain JSON
//! and the file mode is the only protection. [`MemoryKeyStore`] backs tests
//! and ephemeral sessions.

use crate::error::{Result, SobrkeyError};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit},
};
use argon2::{
    Argon2,
    password_hash::{SaltString, rand_core::OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Size of the AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

const SEALED_VERSION: u8 = 1;

/// String key-value store for secrets and small settings.
pub trait SecureKeyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SobrkeyError::KeyStore("memory store lock poisoned".to_string()))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// Argon2id cost parameters, stored with the ciphertext so a file stays
/// readable if the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Argon2Params {
    /// Memory cost in KiB
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
}

impl Argon2Params {
    fn current() -> Self {
        let params = argon2::Params::default();
        Self {
            m_cost: params.m_cost(),
            t_cost: params.t_cost(),
            p_cost: params.p_cost(),
        }
    }

    fn to_argon2(self) -> Result<Argon2<'static>> {
        let params = argon2::Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| SobrkeyError::KeyStore(format!("argon2 parameters: {}", e)))?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

/// The whole document, encrypted.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SealedDocument {
    version: u8,
    salt: String,
    /// Base64 nonce
    nonce: String,
    /// Base64 ciphertext of the JSON entries
    ciphertext: String,
    argon2_params: Argon2Params,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Sealed(SealedDocument),
    Plain(BTreeMap<String, String>),
}

struct DerivedKey {
    salt: String,
    params: Argon2Params,
    key: [u8; 32],
}

/// JSON document on disk, rewritten on every change.
pub struct FileKeyStore {
    path: PathBuf,
    passphrase: Option<String>,
    // Last derived key; Argon2 is too slow to run on every read.
    derived: Mutex<Option<DerivedKey>>,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl fmt::Debug for FileKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKeyStore")
            .field("path", &self.path)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

impl FileKeyStore {
    /// Plain JSON store. Secrets are protected by the file mode only.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            passphrase: None,
            derived: Mutex::new(None),
            lock: Mutex::new(()),
        }
    }

    /// Store sealed with `passphrase`. A plain file at `path` is still
    /// readable and gets sealed on the next write.
    pub fn encrypted(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.passphrase.is_some()
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let document: StoredDocument = serde_json::from_str(&content)
            .map_err(|e| SobrkeyError::KeyStore(format!("{}: {}", self.path.display(), e)))?;
        match document {
            StoredDocument::Plain(entries) => Ok(entries),
            StoredDocument::Sealed(sealed) => self.open_sealed(&sealed),
        }
    }

    fn open_sealed(&self, sealed: &SealedDocument) -> Result<BTreeMap<String, String>> {
        let passphrase = self.passphrase.as_deref().ok_or_else(|| {
            SobrkeyError::KeyStore(format!(
                "{} is encrypted and no passphrase was given",
                self.path.display()
            ))
        })?;
        if sealed.version != SEALED_VERSION {
            return Err(SobrkeyError::KeyStore(format!(
                "unsupported key store version {}",
                sealed.version
            )));
        }

        let key = self.derive_key(passphrase, &sealed.salt, sealed.argon2_params)?;
        let nonce = decode(&sealed.nonce)?;
        if nonce.len() != NONCE_SIZE {
            return Err(SobrkeyError::KeyStore("malformed nonce".to_string()));
        }
        let ciphertext = decode(&sealed.ciphertext)?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SobrkeyError::KeyStore(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| {
                SobrkeyError::KeyStore("wrong passphrase or corrupted key store".to_string())
            })?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn seal(&self, passphrase: &str, entries: &BTreeMap<String, String>) -> Result<SealedDocument> {
        let previous = self
            .derived()?
            .as_ref()
            .map(|derived| (derived.salt.clone(), derived.params));
        let (salt, params) = match previous {
            Some(previous) => previous,
            None => (
                SaltString::generate(&mut OsRng).as_str().to_string(),
                Argon2Params::current(),
            ),
        };
        let key = self.derive_key(passphrase, &salt, params)?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SobrkeyError::KeyStore(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, serde_json::to_vec(entries)?.as_ref())
            .map_err(|e| SobrkeyError::KeyStore(format!("encryption failed: {}", e)))?;

        Ok(SealedDocument {
            version: SEALED_VERSION,
            salt,
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
            argon2_params: params,
        })
    }

    fn derived(&self) -> Result<std::sync::MutexGuard<'_, Option<DerivedKey>>> {
        self.derived
            .lock()
            .map_err(|_| SobrkeyError::KeyStore("key cache lock poisoned".to_string()))
    }

    fn derive_key(&self, passphrase: &str, salt: &str, params: Argon2Params) -> Result<[u8; 32]> {
        let mut derived = self.derived()?;
        if let Some(cached) = derived.as_ref()
            && cached.salt == salt
            && cached.params == params
        {
            return Ok(cached.key);
        }

        let mut key = [0u8; 32];
        params
            .to_argon2()?
            .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key)
            .map_err(|e| SobrkeyError::KeyStore(format!("key derivation failed: {}", e)))?;
        *derived = Some(DerivedKey {
            salt: salt.to_string(),
            params,
            key,
        });
        Ok(key)
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = match self.passphrase.as_deref() {
            Some(passphrase) => serde_json::to_string_pretty(&self.seal(passphrase, entries)?)?,
            None => serde_json::to_string_pretty(entries)?,
        };

        // Write a fresh owner-only file, then swap it in.
        let staging = self.path.with_extension("tmp");
        match std::fs::remove_file(&staging) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let mut file = owner_only().open(&staging)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SobrkeyError::KeyStore("file store lock poisoned".to_string()))?;
        let mut entries = self.read()?;
        if f(&mut entries) {
            self.write(&entries)?;
        }
        Ok(())
    }
}

impl SecureKeyStore for FileKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.update(|entries| entries.remove(key).is_some())
    }
}

fn owner_only() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn decode(value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| SobrkeyError::KeyStore(format!("malformed key store: {}", e)))
}

/// Read a JSON value stored under `key`.
pub(crate) fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn SecureKeyStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub(crate) fn set_json<T: serde::Serialize>(
    store: &dyn SecureKeyStore,
    key: &str,
    value: &T,
) -> Result<()> {
    store.set(key, &serde_json::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn SecureKeyStore) {
        assert_eq!(store.get("sobrkey_public_key").unwrap(), None);

        store.set("sobrkey_public_key", "abc").unwrap();
        store.set("sobrkey_relays", "[]").unwrap();
        assert_eq!(
            store.get("sobrkey_public_key").unwrap().as_deref(),
            Some("abc")
        );

        store.set("sobrkey_public_key", "def").unwrap();
        assert_eq!(
            store.get("sobrkey_public_key").unwrap().as_deref(),
            Some("def")
        );

        store.delete("sobrkey_public_key").unwrap();
        store.delete("sobrkey_public_key").unwrap();
        assert_eq!(store.get("sobrkey_public_key").unwrap(), None);
        assert_eq!(store.get("sobrkey_relays").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryKeyStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = TempDir::new().unwrap();
        exercise(&FileKeyStore::new(dir.path().join("keys.json")));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("keys.json");

        FileKeyStore::new(&path).set("k", "v").unwrap();
        assert_eq!(
            FileKeyStore::new(&path).get("k").unwrap().as_deref(),
            Some("v")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys.json"));
        store.set("k", "v").unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_encrypted_file_store() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::encrypted(dir.path().join("keys.json"), "correct horse");
        assert!(store.is_encrypted());
        exercise(&store);
    }

    #[test]
    fn test_encrypted_store_keeps_secrets_off_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        let secret = "5f".repeat(32);

        FileKeyStore::encrypted(&path, "correct horse")
            .set("sobrkey_private_key", &secret)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains(&secret));
        assert!(!raw.contains("sobrkey_private_key"));

        let reopened = FileKeyStore::encrypted(&path, "correct horse");
        assert_eq!(
            reopened.get("sobrkey_private_key").unwrap().as_deref(),
            Some(secret.as_str())
        );
    }

    #[test]
    fn test_encrypted_store_needs_the_right_passphrase() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        FileKeyStore::encrypted(&path, "correct horse")
            .set("k", "v")
            .unwrap();

        assert!(matches!(
            FileKeyStore::encrypted(&path, "battery staple").get("k"),
            Err(SobrkeyError::KeyStore(_))
        ));
        assert!(matches!(
            FileKeyStore::new(&path).get("k"),
            Err(SobrkeyError::KeyStore(_))
        ));
    }

    #[test]
    fn test_plain_store_is_sealed_on_next_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        FileKeyStore::new(&path).set("old", "plain").unwrap();

        let store = FileKeyStore::encrypted(&path, "correct horse");
        assert_eq!(store.get("old").unwrap().as_deref(), Some("plain"));
        store.set("new", "sealed").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("plain"));
        assert_eq!(store.get("old").unwrap().as_deref(), Some("plain"));
        assert_eq!(store.get("new").unwrap().as_deref(), Some("sealed"));
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryKeyStore::new();
        set_json(&store, "list", &vec!["a".to_string()]).unwrap();
        let list: Option<Vec<String>> = get_json(&store, "list").unwrap();
        assert_eq!(list, Some(vec!["a".to_string()]));
    }
}
