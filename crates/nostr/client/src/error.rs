//! Client error types

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure (relay unreachable, socket closed)
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation exceeded its time budget
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Relay URL is malformed or not a secure websocket URL
    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Malformed frame from a relay
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Event failed id/signature validation
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Filter could not be built or is unusable
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// No relay acknowledged a publish within the window
    #[error("No relay accepted event {event_id}")]
    NoRelayAccepted {
        event_id: String,
        rejected_by: BTreeMap<String, String>,
    },

    /// Signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] nostr::CryptoError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<nostr::FilterError> for ClientError {
    fn from(err: nostr::FilterError) -> Self {
        ClientError::InvalidFilter(err.to_string())
    }
}

impl From<nostr::Nip01Error> for ClientError {
    fn from(err: nostr::Nip01Error) -> Self {
        match err {
            nostr::Nip01Error::SigningFailed(msg) => ClientError::Signing(msg),
            other => ClientError::InvalidEvent(other.to_string()),
        }
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Receives failures for observability. Never influences control flow.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &ClientError, context: &str);
}

/// Default sink: a structured `tracing` warning per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &ClientError, context: &str) {
        warn!(context, error = %error, "nostr client error");
    }
}
