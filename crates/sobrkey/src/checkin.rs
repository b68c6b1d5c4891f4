//! Daily check-ins and the streak they add up to.

use crate::app::{Sobrkey, tag, today};
use crate::constants::{CHECK_IN_DAILY, DATE_FORMAT, KIND_ENCRYPTED_NOTE, TAG_CHECK_IN, TAG_DATE};
use crate::contacts::normalize_pubkey;
use crate::content::{CheckIn, EntryContent, decrypt_content, event_date};
use crate::error::Result;
use chrono::NaiveDate;
use nostr::{Event, FilterBuilder};
use std::collections::BTreeSet;

/// Consecutive days ending today with at least one check-in.
///
/// Zero when there is no check-in today. Several check-ins on one day count
/// once.
pub fn compute_streak(dates: impl IntoIterator<Item = NaiveDate>, today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = dates.into_iter().collect();

    let mut streak = 0;
    let mut day = Some(today);
    while let Some(current) = day
        && days.contains(&current)
    {
        streak += 1;
        day = current.pred_opt();
    }
    streak
}

impl Sobrkey {
    pub async fn daily_check_in(&self) -> Result<Event> {
        self.check_in_on(today()).await
    }

    /// Publish an encrypted check-in for `date`.
    pub async fn check_in_on(&self, date: NaiveDate) -> Result<Event> {
        let date = date.format(DATE_FORMAT).to_string();
        let content = format!("Checked in on {}", date);
        let ciphertext = self.encrypt_for(&self.public_key(), &content)?;
        let tags = vec![tag(TAG_DATE, date), tag(TAG_CHECK_IN, CHECK_IN_DAILY)];
        Ok(self
            .client
            .sign_and_publish(KIND_ENCRYPTED_NOTE, &ciphertext, tags)
            .await?)
    }

    /// Check-ins by `pubkey` (ourselves when `None`), newest first.
    ///
    /// Only our own check-ins can be decrypted; anyone else's come back as
    /// [`EntryContent::Encrypted`].
    pub async fn check_ins(&self, pubkey: Option<&str>) -> Result<Vec<CheckIn>> {
        let me = self.public_key();
        let author = match pubkey {
            Some(pubkey) => normalize_pubkey(pubkey)?,
            None => me.clone(),
        };

        let filter = FilterBuilder::new()
            .kinds(vec![KIND_ENCRYPTED_NOTE])
            .authors(vec![author.clone()])
            .tag(TAG_CHECK_IN, CHECK_IN_DAILY)
            .since(0)
            .build()?;
        let events = self.query(vec![filter]).await?;

        let crypto = self.client.crypto().as_ref();
        Ok(events
            .into_iter()
            .map(|event| {
                let content = if author == me {
                    decrypt_content(crypto, &me, &event.content)
                } else {
                    EntryContent::Encrypted(event.content.clone())
                };
                CheckIn {
                    date: event_date(&event),
                    event,
                    content,
                }
            })
            .collect())
    }

    /// Our current streak as of `today`.
    pub async fn check_in_streak(&self, today: NaiveDate) -> Result<u32> {
        let check_ins = self.check_ins(None).await?;
        Ok(compute_streak(
            check_ins.iter().filter_map(|c| c.date),
            today,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_no_check_ins() {
        assert_eq!(compute_streak(Vec::new(), day("2024-05-10")), 0);
    }

    #[test]
    fn test_streak_needs_today() {
        let dates = [day("2024-05-09"), day("2024-05-08")];
        assert_eq!(compute_streak(dates, day("2024-05-10")), 0);
    }

    #[test]
    fn test_consecutive_days() {
        let dates = [
            day("2024-05-10"),
            day("2024-05-09"),
            day("2024-05-08"),
            day("2024-05-06"),
        ];
        assert_eq!(compute_streak(dates, day("2024-05-10")), 3);
    }

    #[test]
    fn test_duplicates_and_order_do_not_matter() {
        let dates = [
            day("2024-05-09"),
            day("2024-05-10"),
            day("2024-05-10"),
            day("2024-05-09"),
        ];
        assert_eq!(compute_streak(dates, day("2024-05-10")), 2);
    }

    #[test]
    fn test_streak_across_month_boundary() {
        let dates = [day("2024-03-01"), day("2024-02-29"), day("2024-02-28")];
        assert_eq!(compute_streak(dates, day("2024-03-01")), 3);
    }

    #[test]
    fn test_future_check_ins_are_ignored() {
        let dates = [day("2024-05-11"), day("2024-05-10")];
        assert_eq!(compute_streak(dates, day("2024-05-10")), 1);
    }
}
