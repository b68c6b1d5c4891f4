//! Meeting rooms: plaintext messages grouped by meeting id.

use crate::app::{Sobrkey, tag};
use crate::constants::{KIND_MEETING_MESSAGE, MEETING_MESSAGE, TAG_DATE, TAG_MEETING};
use crate::content::MeetingMessage;
use crate::error::{Result, SobrkeyError};
use nostr::{Event, FilterBuilder};
use nostr_client::Subscription;

fn meeting_filter(meeting_id: &str) -> FilterBuilder {
    FilterBuilder::new()
        .kinds(vec![KIND_MEETING_MESSAGE])
        .tag(TAG_DATE, meeting_id)
        .tag(TAG_MEETING, MEETING_MESSAGE)
}

fn validate_meeting_id(meeting_id: &str) -> Result<&str> {
    let meeting_id = meeting_id.trim();
    if meeting_id.is_empty() || meeting_id.chars().any(char::is_whitespace) {
        return Err(SobrkeyError::InvalidMeeting(meeting_id.to_string()));
    }
    Ok(meeting_id)
}

impl Sobrkey {
    pub async fn send_meeting_message(&self, meeting_id: &str, content: &str) -> Result<Event> {
        let meeting_id = validate_meeting_id(meeting_id)?;
        let tags = vec![tag(TAG_DATE, meeting_id), tag(TAG_MEETING, MEETING_MESSAGE)];
        Ok(self
            .client
            .sign_and_publish(KIND_MEETING_MESSAGE, content, tags)
            .await?)
    }

    /// Recent messages in a meeting, newest first.
    pub async fn meeting_messages(&self, meeting_id: &str) -> Result<Vec<MeetingMessage>> {
        let meeting_id = validate_meeting_id(meeting_id)?;
        let events = self.query(vec![meeting_filter(meeting_id).build()?]).await?;
        Ok(events
            .into_iter()
            .map(|event| MeetingMessage {
                event,
                meeting_id: meeting_id.to_string(),
            })
            .collect())
    }

    /// Deliver new messages in a meeting to `on_message` until unsubscribed.
    pub async fn subscribe_meeting<F>(&self, meeting_id: &str, on_message: F) -> Result<Subscription>
    where
        F: Fn(MeetingMessage) + Send + Sync + 'static,
    {
        let meeting_id = validate_meeting_id(meeting_id)?.to_string();
        let filter = meeting_filter(&meeting_id).build()?;
        Ok(self
            .client
            .subscribe_live(vec![filter], move |event| {
                on_message(MeetingMessage {
                    event,
                    meeting_id: meeting_id.clone(),
                })
            })
            .await?)
    }
}
