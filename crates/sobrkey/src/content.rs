//! Decoded forms of the events the use-cases read back.

use crate::constants::{
    APP_TAG, DATE_FORMAT, EMERGENCY_ALERT, FAILED_TO_DECRYPT_ENTRY, FAILED_TO_DECRYPT_MESSAGE, TAG_DATE,
    TAG_EMERGENCY, TAG_RECIPIENT,
};
use chrono::{DateTime, NaiveDate};
use nostr::{CryptoGateway, Event, HASHTAG_TAG};
use tracing::debug;

/// Content of an event that may have been encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    /// Plaintext, either decrypted or never encrypted
    Text(String),
    /// Encrypted for us, but decryption failed
    Undecryptable,
    /// Encrypted for someone else; the raw ciphertext
    Encrypted(String),
}

impl EntryContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            EntryContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The plaintext, or `marker` when there is none to show.
    pub fn display_or<'a>(&'a self, marker: &'a str) -> &'a str {
        self.text().unwrap_or(marker)
    }
}

/// Decrypt `ciphertext` exchanged with `peer`, keeping failures as data.
pub fn decrypt_content(crypto: &dyn CryptoGateway, peer: &str, ciphertext: &str) -> EntryContent {
    match crypto.decrypt(peer, ciphertext) {
        Ok(text) => EntryContent::Text(text),
        Err(e) => {
            debug!("Could not decrypt content from {}: {}", peer, e);
            EntryContent::Undecryptable
        }
    }
}

/// Calendar date of an event: its `d` tag, or its UTC creation day.
pub fn event_date(event: &Event) -> Option<NaiveDate> {
    if let Some(date) = event
        .tag_value(TAG_DATE)
        .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
    {
        return Some(date);
    }
    DateTime::from_timestamp(i64::try_from(event.created_at).ok()?, 0).map(|dt| dt.date_naive())
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub event: Event,
    pub date: Option<NaiveDate>,
    pub content: EntryContent,
}

impl JournalEntry {
    pub fn display_text(&self) -> &str {
        self.content.display_or(FAILED_TO_DECRYPT_ENTRY)
    }
}

#[derive(Debug, Clone)]
pub struct CheckIn {
    pub event: Event,
    pub date: Option<NaiveDate>,
    pub content: EntryContent,
}

impl CheckIn {
    pub fn display_text(&self) -> &str {
        self.content.display_or(FAILED_TO_DECRYPT_ENTRY)
    }
}

/// A plaintext message in a meeting room.
#[derive(Debug, Clone)]
pub struct MeetingMessage {
    pub event: Event,
    pub meeting_id: String,
}

impl MeetingMessage {
    pub fn author(&self) -> &str {
        &self.event.pubkey
    }

    pub fn text(&self) -> &str {
        &self.event.content
    }
}

/// A public note in the community feed.
#[derive(Debug, Clone)]
pub struct CommunityPost {
    pub event: Event,
}

impl CommunityPost {
    pub fn author(&self) -> &str {
        &self.event.pubkey
    }

    pub fn text(&self) -> &str {
        &self.event.content
    }

    /// User hashtags, without the app tag.
    pub fn hashtags(&self) -> Vec<&str> {
        self.event
            .tags
            .iter()
            .filter(|tag| tag.len() >= 2 && tag[0] == HASHTAG_TAG)
            .map(|tag| tag[1].trim_start_matches('#'))
            .filter(|name| !name.is_empty() && *name != APP_TAG)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DirectMessage {
    pub event: Event,
    /// `p` tag of the event; absent on malformed messages
    pub recipient: Option<String>,
    /// Sent by us
    pub outgoing: bool,
    pub content: EntryContent,
}

impl DirectMessage {
    /// Decode a kind-4 event as seen by `me`.
    pub fn open(crypto: &dyn CryptoGateway, me: &str, event: Event) -> Self {
        let recipient = event.tag_value(TAG_RECIPIENT).map(str::to_string);
        let outgoing = event.pubkey == me;
        let peer = if outgoing {
            recipient.clone()
        } else {
            Some(event.pubkey.clone())
        };

        let content = match peer {
            Some(peer) => decrypt_content(crypto, &peer, &event.content),
            None => EntryContent::Undecryptable,
        };

        Self {
            event,
            recipient,
            outgoing,
            content,
        }
    }

    pub fn sender(&self) -> &str {
        &self.event.pubkey
    }

    /// The other side of the conversation.
    pub fn peer(&self) -> Option<&str> {
        if self.outgoing {
            self.recipient.as_deref()
        } else {
            Some(&self.event.pubkey)
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.event.has_tag(TAG_EMERGENCY, EMERGENCY_ALERT)
    }

    pub fn display_text(&self) -> &str {
        self.content.display_or(FAILED_TO_DECRYPT_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{Keys, build_unsigned, finalize};

    fn dm(from: &Keys, to: &Keys, text: &str, tags: Vec<Vec<String>>) -> Event {
        let ciphertext = from.encrypt(to.public_key_hex(), text).unwrap();
        let mut all = vec![vec!["p".to_string(), to.public_key_hex().to_string()]];
        all.extend(tags);
        let unsigned = build_unsigned(4, ciphertext, all, from.public_key_hex(), 1_700_000_000).unwrap();
        finalize(unsigned, |id| from.sign(id)).unwrap()
    }

    #[test]
    fn test_direct_message_both_directions() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let event = dm(&alice, &bob, "hang in there", vec![]);

        let sent = DirectMessage::open(&alice, alice.public_key_hex(), event.clone());
        assert!(sent.outgoing);
        assert_eq!(sent.peer(), Some(bob.public_key_hex()));
        assert_eq!(sent.display_text(), "hang in there");

        let received = DirectMessage::open(&bob, bob.public_key_hex(), event);
        assert!(!received.outgoing);
        assert_eq!(received.peer(), Some(alice.public_key_hex()));
        assert_eq!(received.display_text(), "hang in there");
        assert!(!received.is_emergency());
    }

    #[test]
    fn test_undecryptable_message_shows_marker() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let eve = Keys::generate();
        let event = dm(
            &alice,
            &bob,
            "private",
            vec![vec!["emergency".to_string(), "alert".to_string()]],
        );

        let seen_by_eve = DirectMessage::open(&eve, eve.public_key_hex(), event);
        assert_eq!(seen_by_eve.content, EntryContent::Undecryptable);
        assert_eq!(seen_by_eve.display_text(), "[Failed to decrypt message]");
        assert!(seen_by_eve.is_emergency());
    }

    #[test]
    fn test_event_date_prefers_d_tag() {
        let keys = Keys::generate();
        let tagged = build_unsigned(
            30,
            "x",
            vec![vec!["d".to_string(), "2024-03-01".to_string()]],
            keys.public_key_hex(),
            1_700_000_000,
        )
        .unwrap();
        let tagged = finalize(tagged, |id| keys.sign(id)).unwrap();
        assert_eq!(
            event_date(&tagged),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );

        let untagged = build_unsigned(30, "x", vec![], keys.public_key_hex(), 1_700_000_000).unwrap();
        let untagged = finalize(untagged, |id| keys.sign(id)).unwrap();
        // 1_700_000_000 is 2023-11-14T22:13:20Z
        assert_eq!(
            event_date(&untagged),
            NaiveDate::from_ymd_opt(2023, 11, 14)
        );
    }

    #[test]
    fn test_display_or() {
        assert_eq!(EntryContent::Text("hi".into()).display_or("x"), "hi");
        assert_eq!(EntryContent::Undecryptable.display_or("x"), "x");
        assert_eq!(EntryContent::Encrypted("abc?iv=def".into()).display_or("x"), "x");
    }

    #[test]
    fn test_community_post_hashtags() {
        let keys = Keys::generate();
        let tags = vec![
            vec!["t".to_string(), "sobrkey".to_string()],
            vec!["t".to_string(), "#gratitude".to_string()],
            vec!["p".to_string(), "ab".repeat(32)],
            vec!["t".to_string(), "day_one".to_string()],
        ];
        let unsigned = build_unsigned(1, "hello", tags, keys.public_key_hex(), 1_700_000_000).unwrap();
        let post = CommunityPost {
            event: finalize(unsigned, |id| keys.sign_id(id)).unwrap(),
        };

        assert_eq!(post.author(), keys.public_key_hex());
        assert_eq!(post.text(), "hello");
        assert_eq!(post.hashtags(), vec!["gratitude", "day_one"]);
    }
}
