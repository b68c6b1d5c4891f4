//! NIP-01: Basic protocol flow description.
//!
//! This module implements the event codec used by every other part of the
//! workspace:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical serialization `[0, pubkey, created_at, kind, tags, content]`
//! - Content-addressed ids (sha256 over the canonical serialization)
//! - Schnorr signing and verification
//! - Deterministic ordering for presentation

use bitcoin::hashes::{Hash, sha256};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

/// An event before id computation and signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_RECOMMEND_RELAY: u16 = 2;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u16 = 4;
pub const KIND_EVENT_DELETION: u16 = 5;
pub const KIND_REACTION: u16 = 7;

/// Build an unsigned event, validating every field that ends up in the id.
///
/// `kind` is taken as a signed integer so callers forwarding untrusted input
/// get `InvalidArgument` instead of a silent wrap-around.
pub fn build_unsigned(
    kind: i64,
    content: impl Into<String>,
    tags: Vec<Vec<String>>,
    pubkey: impl Into<String>,
    now: u64,
) -> Result<UnsignedEvent, Nip01Error> {
    let kind = u16::try_from(kind).map_err(|_| {
        Nip01Error::InvalidArgument(format!("kind {} is outside 0..=65535", kind))
    })?;

    if let Some(index) = tags.iter().position(|tag| tag.is_empty()) {
        return Err(Nip01Error::InvalidArgument(format!(
            "tag at index {} is empty",
            index
        )));
    }

    let pubkey = pubkey.into();
    if !is_lower_hex(&pubkey, 64) {
        return Err(Nip01Error::InvalidArgument(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    Ok(UnsignedEvent {
        pubkey,
        created_at: now,
        kind,
        tags,
        content: content.into(),
    })
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Compute the content-addressed id of an event.
///
/// Tag order is part of the hash input and is never normalized.
pub fn compute_id(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Compute the id and attach the signature produced by `sign`.
///
/// `sign` receives the hex id and returns the hex signature. Any error it
/// reports is surfaced as [`Nip01Error::SigningFailed`].
pub fn finalize<F, E>(event: UnsignedEvent, sign: F) -> Result<Event, Nip01Error>
where
    F: FnOnce(&str) -> Result<String, E>,
    E: Display,
{
    let id = compute_id(&event)?;
    let sig = sign(&id).map_err(|e| Nip01Error::SigningFailed(e.to_string()))?;

    Ok(Event {
        id,
        pubkey: event.pubkey,
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags,
        content: event.content,
        sig,
    })
}

/// Produce a BIP-340 signature over an event id with a raw secret key.
pub fn sign_event_id(secret_key: &[u8; 32], id: &str) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::SigningFailed(e.to_string()))?;

    let id_bytes =
        hex::decode(id).map_err(|e| Nip01Error::SigningFailed(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Nip01Error::SigningFailed(format!("invalid message: {}", e)))?;

    let keypair = Keypair::from_secret_key(&secp, &sk);
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);
    Ok(hex::encode(sig.serialize()))
}

/// Check that an event's id matches its content and that the signature is
/// valid for its pubkey. Never panics; any malformation yields `false`.
pub fn verify(event: &Event) -> bool {
    if !is_lower_hex(&event.id, 64)
        || !is_lower_hex(&event.pubkey, 64)
        || !is_lower_hex(&event.sig, 128)
    {
        return false;
    }

    match compute_id(&event.unsigned()) {
        Ok(id) if id == event.id => {}
        _ => return false,
    }

    verify_signature(event).unwrap_or(false)
}

fn verify_signature(event: &Event) -> Option<bool> {
    let secp = Secp256k1::verification_only();

    let message = Message::from_digest_slice(&hex::decode(&event.id).ok()?).ok()?;
    let sig = schnorr::Signature::from_slice(&hex::decode(&event.sig).ok()?).ok()?;
    let pubkey = XOnlyPublicKey::from_slice(&hex::decode(&event.pubkey).ok()?).ok()?;

    Some(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

/// Sort events in reverse-chronological order by created_at,
/// then by id (lexicographically) in case of ties.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| match b.created_at.cmp(&a.created_at) {
        std::cmp::Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}

/// Current unix time in seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl UnsignedEvent {
    /// Content-addressed id of this event.
    pub fn id(&self) -> Result<String, Nip01Error> {
        compute_id(self)
    }
}

impl Event {
    /// The fields covered by the id, without id and signature.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Whether any tag is exactly `[name, value, ..]`.
    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tags.iter().any(|tag| {
            tag.first().map(String::as_str) == Some(name)
                && tag.get(1).map(String::as_str) == Some(value)
        })
    }
}
