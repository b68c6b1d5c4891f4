//! Private journal: one encrypted note per entry, tagged with its date.

use crate::app::{Sobrkey, tag, today};
use crate::constants::{DATE_FORMAT, JOURNAL_ENTRY, KIND_ENCRYPTED_NOTE, TAG_DATE, TAG_JOURNAL};
use crate::content::{JournalEntry, decrypt_content, event_date};
use crate::error::Result;
use chrono::NaiveDate;
use nostr::{Event, FilterBuilder};

impl Sobrkey {
    pub async fn save_journal_entry(&self, content: &str) -> Result<Event> {
        self.save_journal_entry_for(today(), content).await
    }

    /// Encrypt `content` to ourselves and publish it for `date`.
    pub async fn save_journal_entry_for(&self, date: NaiveDate, content: &str) -> Result<Event> {
        let ciphertext = self.encrypt_for(&self.public_key(), content)?;
        let tags = vec![
            tag(TAG_DATE, date.format(DATE_FORMAT).to_string()),
            tag(TAG_JOURNAL, JOURNAL_ENTRY),
        ];
        Ok(self
            .client
            .sign_and_publish(KIND_ENCRYPTED_NOTE, &ciphertext, tags)
            .await?)
    }

    /// All of our journal entries, newest first.
    pub async fn journal_entries(&self) -> Result<Vec<JournalEntry>> {
        let filter = self.journal_filter().build()?;
        let events = self.query(vec![filter]).await?;
        Ok(events.into_iter().map(|e| self.open_journal_entry(e)).collect())
    }

    /// The latest entry written for `date`.
    pub async fn journal_entry_for_date(&self, date: NaiveDate) -> Result<Option<JournalEntry>> {
        let filter = self
            .journal_filter()
            .tag(TAG_DATE, date.format(DATE_FORMAT).to_string())
            .build()?;
        let events = self.query(vec![filter]).await?;
        Ok(events.into_iter().next().map(|e| self.open_journal_entry(e)))
    }

    fn journal_filter(&self) -> FilterBuilder {
        FilterBuilder::new()
            .kinds(vec![KIND_ENCRYPTED_NOTE])
            .authors(vec![self.public_key()])
            .tag(TAG_JOURNAL, JOURNAL_ENTRY)
            .since(0)
    }

    fn open_journal_entry(&self, event: Event) -> JournalEntry {
        let content = decrypt_content(
            self.client.crypto().as_ref(),
            &self.public_key(),
            &event.content,
        );
        JournalEntry {
            date: event_date(&event),
            event,
            content,
        }
    }
}
