//! Event kinds, tag names and storage keys shared by the use-cases.

pub use nostr::KIND_ENCRYPTED_DIRECT_MESSAGE as KIND_DIRECT_MESSAGE;

/// Journal entries and check-ins (NIP-04 encrypted to self).
pub const KIND_ENCRYPTED_NOTE: u16 = 30;
/// Plaintext messages posted to a meeting room.
pub const KIND_MEETING_MESSAGE: u16 = 42;

/// Hashtag marking community posts published by this app.
pub const APP_TAG: &str = "sobrkey";
/// Most posts a community feed load asks each relay for.
pub const COMMUNITY_FEED_LIMIT: u64 = 100;

pub const TAG_DATE: &str = "d";
pub const TAG_RECIPIENT: &str = "p";
pub const TAG_JOURNAL: &str = "journal";
pub const TAG_CHECK_IN: &str = "check-in";
pub const TAG_MEETING: &str = "meeting";
pub const TAG_EMERGENCY: &str = "emergency";

pub const JOURNAL_ENTRY: &str = "entry";
pub const CHECK_IN_DAILY: &str = "daily";
pub const MEETING_MESSAGE: &str = "message";
pub const EMERGENCY_ALERT: &str = "alert";

pub const FAILED_TO_DECRYPT_ENTRY: &str = "[Failed to decrypt entry]";
pub const FAILED_TO_DECRYPT_MESSAGE: &str = "[Failed to decrypt message]";

pub const STORAGE_PRIVATE_KEY: &str = "sobrkey_private_key";
pub const STORAGE_PUBLIC_KEY: &str = "sobrkey_public_key";
pub const STORAGE_RELAYS: &str = "sobrkey_relays";
pub const STORAGE_TRUSTED_CONTACTS: &str = "sobrkey_trusted_contacts";

/// Date format of the `d` tag on journal entries and check-ins.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Built-in meeting rooms as `(id, display name)`.
pub const MEETINGS: &[(&str, &str)] = &[
    ("aa-general-meeting", "General Recovery Meeting"),
    ("aa-newcomers", "Newcomers Meeting"),
    ("aa-daily-reflections", "Daily Reflections"),
    ("aa-12-steps", "12 Steps Discussion"),
];

/// Display name of a built-in meeting.
pub fn meeting_name(id: &str) -> Option<&'static str> {
    MEETINGS
        .iter()
        .find(|(meeting_id, _)| *meeting_id == id)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meeting_name() {
        assert_eq!(meeting_name("aa-newcomers"), Some("Newcomers Meeting"));
        assert_eq!(meeting_name("aa-12-steps"), Some("12 Steps Discussion"));
        assert_eq!(meeting_name("book-club"), None);
    }
}
