//! Application error types

use nostr_client::ClientError;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SobrkeyError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] nostr::CryptoError),

    #[error("Key error: {0}")]
    Key(#[from] nostr::KeyError),

    /// The secure key store could not be read or written
    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not a 64-character hex public key
    #[error("Invalid contact public key: {0}")]
    InvalidContact(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid meeting id: {0}")]
    InvalidMeeting(String),

    #[error("Post content is empty")]
    EmptyPost,

    /// No identity has been generated or imported yet
    #[error("No identity in the key store")]
    NoIdentity,

    #[error("No trusted contacts configured")]
    NoTrustedContacts,

    /// Every emergency alert failed; keyed by contact public key
    #[error("Emergency alert reached none of {} contacts", failed.len())]
    AlertNotDelivered { failed: BTreeMap<String, String> },
}

impl From<nostr::Nip01Error> for SobrkeyError {
    fn from(err: nostr::Nip01Error) -> Self {
        SobrkeyError::Client(err.into())
    }
}

impl From<nostr::FilterError> for SobrkeyError {
    fn from(err: nostr::FilterError) -> Self {
        SobrkeyError::Client(err.into())
    }
}

/// Application result type
pub type Result<T> = std::result::Result<T, SobrkeyError>;
