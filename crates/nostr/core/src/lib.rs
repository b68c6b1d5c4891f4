//! Nostr protocol primitives for Sobrkey.
//!
//! This crate provides:
//! - NIP-01: Event codec (canonical serialization, ids, signing, verification)
//! - NIP-01: Filters, plus a builder that normalizes loosely formatted tag pairs
//! - NIP-04: Encrypted direct messages
//! - Key handling and the [`CryptoGateway`] capability used by the client
//!
//! # Example
//!
//! ```
//! use nostr::{CryptoGateway, Keys, build_unsigned, finalize, verify};
//!
//! let keys = Keys::generate();
//! let unsigned = build_unsigned(
//!     1,
//!     "Hello Nostr!",
//!     vec![vec!["t".to_string(), "sobrkey".to_string()]],
//!     keys.public_key_hex(),
//!     1_700_000_000,
//! )
//! .unwrap();
//!
//! let event = finalize(unsigned, |id| keys.sign(id)).unwrap();
//! assert!(verify(&event));
//! ```

mod crypto;
mod filter;
mod keys;
pub mod nip01;
pub mod nip04;

pub use crypto::{CryptoError, CryptoGateway};
pub use filter::{
    DEFAULT_LOOKBACK_SECS, Filter, FilterBuilder, FilterError, FilterOptions, HASHTAG_TAG,
    build_filter,
};
pub use keys::{KeyError, Keys, generate_secret_key, get_public_key_hex};
pub use nip01::{
    Event, KIND_CONTACTS, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_EVENT_DELETION, KIND_METADATA,
    KIND_REACTION, KIND_RECOMMEND_RELAY, KIND_SHORT_TEXT_NOTE, Nip01Error, UnsignedEvent,
    build_unsigned, compute_id, finalize, serialize_event, sign_event_id, sort_events,
    unix_timestamp, verify,
};
pub use nip04::Nip04Error;
