//! Public community feed: kind-1 notes tagged `#sobrkey`.

use crate::app::{Sobrkey, tag};
use crate::constants::{APP_TAG, COMMUNITY_FEED_LIMIT};
use crate::content::CommunityPost;
use crate::error::{Result, SobrkeyError};
use nostr::{Event, FilterBuilder, HASHTAG_TAG, KIND_SHORT_TEXT_NOTE, unix_timestamp};
use nostr_client::Subscription;
use tracing::debug;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Lowercase `raw` and keep only `[a-z0-9_]`. `None` if nothing is left.
pub fn clean_hashtag(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// `t` tags for a post: the app tag first, then each distinct user hashtag.
fn post_tags(hashtags: &[String]) -> Vec<Vec<String>> {
    let mut names = vec![APP_TAG.to_string()];
    for raw in hashtags {
        match clean_hashtag(raw) {
            Some(name) if !names.contains(&name) => names.push(name),
            Some(_) => {}
            None => debug!("Skipping empty hashtag {:?}", raw),
        }
    }
    names.into_iter().map(|name| tag(HASHTAG_TAG, name)).collect()
}

/// Feed filter; `since` of `None` means the whole history.
fn community_filter(since: Option<u64>) -> FilterBuilder {
    FilterBuilder::new()
        .kinds(vec![KIND_SHORT_TEXT_NOTE])
        .tag(HASHTAG_TAG, APP_TAG)
        .since(since.unwrap_or(0))
        .limit(COMMUNITY_FEED_LIMIT)
}

/// Start of a `days` window ending at `now`. Zero days is the whole history.
fn window_start(days: u32, now: u64) -> Option<u64> {
    (days > 0).then(|| now.saturating_sub(u64::from(days) * SECS_PER_DAY))
}

impl Sobrkey {
    /// Publish a public note to the community feed.
    pub async fn post_note(&self, content: &str, hashtags: &[String]) -> Result<Event> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SobrkeyError::EmptyPost);
        }
        Ok(self
            .client
            .sign_and_publish(KIND_SHORT_TEXT_NOTE, content, post_tags(hashtags))
            .await?)
    }

    /// Community posts from the last `days` days (all of them for 0),
    /// newest first.
    pub async fn community_posts(&self, days: u32) -> Result<Vec<CommunityPost>> {
        let since = window_start(days, unix_timestamp());
        let events = self.query(vec![community_filter(since).build()?]).await?;
        Ok(events
            .into_iter()
            .map(|event| CommunityPost { event })
            .collect())
    }

    /// Deliver new community posts to `on_post` until unsubscribed.
    pub async fn subscribe_community<F>(&self, on_post: F) -> Result<Subscription>
    where
        F: Fn(CommunityPost) + Send + Sync + 'static,
    {
        let filter = community_filter(None).build()?;
        Ok(self
            .client
            .subscribe_live(vec![filter], move |event| on_post(CommunityPost { event }))
            .await?)
    }
}
