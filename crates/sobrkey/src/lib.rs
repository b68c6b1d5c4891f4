//! Sobrkey: a private recovery companion on Nostr.
//!
//! Journal entries and daily check-ins are NIP-04 encrypted to the user's
//! own key. Meeting rooms are public kind-42 messages and the community
//! feed is kind-1 notes tagged `#sobrkey`; direct messages and emergency
//! alerts are NIP-04 messages to other people.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sobrkey::{Config, MemoryKeyStore, Sobrkey};
//!
//! # async fn example() -> sobrkey::Result<()> {
//! let app = Sobrkey::open(&Config::default(), Arc::new(MemoryKeyStore::new())).await?;
//! app.connect().await?;
//!
//! app.save_journal_entry("Day one.").await?;
//! app.daily_check_in().await?;
//! let streak = app.check_in_streak(sobrkey::today()).await?;
//! println!("streak: {streak}");
//! # Ok(())
//! # }
//! ```

mod app;
mod checkin;
mod community;
pub mod config;
pub mod constants;
mod contacts;
mod content;
mod emergency;
mod error;
pub mod identity;
mod journal;
mod keystore;
mod meetings;
mod messages;
mod relays;

pub use app::{Sobrkey, today};
pub use checkin::compute_streak;
pub use community::clean_hashtag;
pub use config::{Config, load_config, save_config};
pub use contacts::{TrustedContacts, normalize_pubkey};
pub use content::{
    CheckIn, CommunityPost, DirectMessage, EntryContent, JournalEntry, MeetingMessage, decrypt_content,
    event_date,
};
pub use emergency::{EmergencyAlertReport, compose_alert_message};
pub use error::{Result, SobrkeyError};
pub use keystore::{FileKeyStore, MemoryKeyStore, SecureKeyStore};
pub use relays::RelaySettings;
