//! NIP-04 direct messages.

use crate::app::{Sobrkey, tag};
use crate::constants::{KIND_DIRECT_MESSAGE, TAG_RECIPIENT};
use crate::contacts::normalize_pubkey;
use crate::content::DirectMessage;
use crate::error::Result;
use nostr::{Event, Filter, FilterBuilder};
use nostr_client::Subscription;
use std::sync::Arc;
use tracing::debug;

fn dm_filter(author: Option<&str>, recipient: Option<&str>) -> Result<Filter> {
    let mut builder = FilterBuilder::new().kinds(vec![KIND_DIRECT_MESSAGE]);
    if let Some(author) = author {
        builder = builder.authors(vec![author.to_string()]);
    }
    if let Some(recipient) = recipient {
        builder = builder.tag(TAG_RECIPIENT, recipient);
    }
    Ok(builder.build()?)
}

impl Sobrkey {
    pub async fn send_direct_message(&self, recipient: &str, content: &str) -> Result<Event> {
        let recipient = normalize_pubkey(recipient)?;
        let ciphertext = self.encrypt_for(&recipient, content)?;
        Ok(self
            .client
            .sign_and_publish(
                KIND_DIRECT_MESSAGE,
                &ciphertext,
                vec![tag(TAG_RECIPIENT, recipient)],
            )
            .await?)
    }

    /// Messages we sent and received, newest first. With `other`, only the
    /// conversation with that public key.
    pub async fn direct_messages(&self, other: Option<&str>) -> Result<Vec<DirectMessage>> {
        let me = self.public_key();
        let filters = match other {
            Some(other) => {
                let other = normalize_pubkey(other)?;
                vec![
                    dm_filter(Some(&me), Some(&other))?,
                    dm_filter(Some(&other), Some(&me))?,
                ]
            }
            None => vec![dm_filter(Some(&me), None)?, dm_filter(None, Some(&me))?],
        };

        let events = self.query(filters).await?;
        let crypto = self.client.crypto().as_ref();
        Ok(events
            .into_iter()
            .map(|event| DirectMessage::open(crypto, &me, event))
            .collect())
    }

    /// Deliver new messages from `other` addressed to us, decrypted.
    pub async fn subscribe_direct_messages<F>(
        &self,
        other: &str,
        on_message: F,
    ) -> Result<Subscription>
    where
        F: Fn(DirectMessage) + Send + Sync + 'static,
    {
        let other = normalize_pubkey(other)?;
        let me = self.public_key();
        let filter = dm_filter(Some(&other), Some(&me))?;
        let crypto = Arc::clone(self.client.crypto());

        Ok(self
            .client
            .subscribe_live(vec![filter], move |event| {
                if !event.has_tag(TAG_RECIPIENT, &me) {
                    debug!("Skipping message {} not addressed to us", event.id);
                    return;
                }
                on_message(DirectMessage::open(crypto.as_ref(), &me, event));
            })
            .await?)
    }
}
