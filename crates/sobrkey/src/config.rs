//! Application configuration.
//!
//! Stored as camelCase JSON, by default in `~/.sobrkey/config.json`. Every
//! field has a default, so a partial file (or no file) is valid.

use crate::error::{Result, SobrkeyError};
use nostr_client::{DEFAULT_RELAYS, PoolConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";
pub const KEY_STORE_FILE: &str = "keys.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relays used until the user saves their own list
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_eose_timeout_ms")]
    pub eose_timeout_ms: u64,

    #[serde(default = "default_eose_extended_timeout_ms")]
    pub eose_extended_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub verify_signatures: bool,

    /// Admit `ws://` relays. Only for local development.
    #[serde(default)]
    pub allow_insecure_relays: bool,

    /// Key store location; defaults to `keys.json` next to the config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_store_path: Option<PathBuf>,
}

fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_publish_timeout_ms() -> u64 {
    8_000
}

fn default_query_timeout_ms() -> u64 {
    15_000
}

fn default_eose_timeout_ms() -> u64 {
    10_000
}

fn default_eose_extended_timeout_ms() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            connect_timeout_ms: default_connect_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            eose_timeout_ms: default_eose_timeout_ms(),
            eose_extended_timeout_ms: default_eose_extended_timeout_ms(),
            verify_signatures: true,
            allow_insecure_relays: false,
            key_store_path: None,
        }
    }
}

impl Config {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            eose_timeout: Duration::from_millis(self.eose_timeout_ms),
            eose_extended_timeout: Duration::from_millis(self.eose_extended_timeout_ms),
            verify_signatures: self.verify_signatures,
            allow_insecure_relays: self.allow_insecure_relays,
        }
    }

    /// Key store path, resolved against the directory holding the config.
    pub fn key_store_path(&self, config_dir: &Path) -> PathBuf {
        match &self.key_store_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => config_dir.join(path),
            None => config_dir.join(KEY_STORE_FILE),
        }
    }
}

/// `~/.sobrkey`
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".sobrkey"))
        .ok_or_else(|| SobrkeyError::Config("could not find home directory".to_string()))
}

/// Load the config at `path`, or the defaults if the file does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| SobrkeyError::Config(format!("{}: {}", path.display(), e)))
}

/// Write `config` to `path` as pretty JSON, creating parent directories.
pub fn save_config(path: impl AsRef<Path>, config: &Config) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(
            config.relays,
            vec!["wss://relay.damus.io".to_string(), "wss://nos.lol".to_string()]
        );
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"publishTimeoutMs": 2000, "allowInsecureRelays": true}"#)
            .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.publish_timeout_ms, 2000);
        assert!(config.allow_insecure_relays);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert!(config.verify_signatures);

        let pool = config.to_pool_config();
        assert_eq!(pool.publish_timeout, Duration::from_secs(2));
        assert_eq!(pool.eose_extended_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config {
            relays: vec!["wss://relay.example.com".to_string()],
            query_timeout_ms: 3_000,
            ..Config::default()
        };

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"queryTimeoutMs\": 3000"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(SobrkeyError::Config(_))));
    }

    #[test]
    fn test_key_store_path_resolution() {
        let dir = Path::new("/home/me/.sobrkey");
        assert_eq!(
            Config::default().key_store_path(dir),
            dir.join(KEY_STORE_FILE)
        );
        let relative = Config {
            key_store_path: Some(PathBuf::from("secrets.json")),
            ..Config::default()
        };
        assert_eq!(relative.key_store_path(dir), dir.join("secrets.json"));
    }
}
