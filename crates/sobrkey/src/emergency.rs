//! Emergency alerts: one encrypted direct message per trusted contact.

use crate::app::{Sobrkey, tag};
use crate::constants::{EMERGENCY_ALERT, KIND_DIRECT_MESSAGE, TAG_EMERGENCY, TAG_RECIPIENT};
use crate::contacts::normalize_pubkey;
use crate::error::{Result, SobrkeyError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Per-contact outcome of an alert that reached at least one contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmergencyAlertReport {
    /// Contact public key -> id of the event delivered to them
    pub delivered: BTreeMap<String, String>,
    /// Contact public key -> reason
    pub failed: BTreeMap<String, String>,
}

/// Alert text: the user's message (or a timestamped default) and an
/// optional location line.
pub fn compose_alert_message(
    message: &str,
    location: Option<(f64, f64)>,
    now: DateTime<Utc>,
) -> String {
    let mut text = if message.trim().is_empty() {
        format!("Emergency alert sent at {}", now.format("%Y-%m-%d %H:%M UTC"))
    } else {
        message.trim().to_string()
    };
    if let Some((latitude, longitude)) = location {
        text.push_str(&format!("\n\nLocation: {}, {}", latitude, longitude));
    }
    text
}

impl Sobrkey {
    /// Send `message` to every contact concurrently.
    ///
    /// Succeeds if any contact got the alert; fails with
    /// [`SobrkeyError::AlertNotDelivered`] only if none did.
    pub async fn send_emergency_alert(
        &self,
        message: &str,
        contacts: &[String],
    ) -> Result<EmergencyAlertReport> {
        if contacts.is_empty() {
            return Err(SobrkeyError::NoTrustedContacts);
        }

        let mut report = EmergencyAlertReport::default();
        let mut recipients = Vec::new();
        for contact in contacts {
            match normalize_pubkey(contact) {
                Ok(pubkey) if !recipients.contains(&pubkey) => recipients.push(pubkey),
                Ok(_) => {}
                Err(e) => {
                    report.failed.insert(contact.clone(), e.to_string());
                }
            }
        }

        let sends = recipients.into_iter().map(|contact| async move {
            let result = self.send_alert_to(&contact, message).await;
            (contact, result)
        });
        for (contact, result) in join_all(sends).await {
            match result {
                Ok(event_id) => {
                    report.delivered.insert(contact, event_id);
                }
                Err(e) => {
                    warn!("Emergency alert to {} failed: {}", contact, e);
                    report.failed.insert(contact, e.to_string());
                }
            }
        }

        if report.delivered.is_empty() {
            return Err(SobrkeyError::AlertNotDelivered {
                failed: report.failed,
            });
        }
        info!(
            "Emergency alert delivered to {}/{} contacts",
            report.delivered.len(),
            report.delivered.len() + report.failed.len()
        );
        Ok(report)
    }

    /// Send `message` to the stored trusted contacts.
    pub async fn send_emergency_alert_to_trusted(
        &self,
        message: &str,
    ) -> Result<EmergencyAlertReport> {
        let contacts = self.trusted_contacts().list()?;
        self.send_emergency_alert(message, &contacts).await
    }

    async fn send_alert_to(&self, contact: &str, message: &str) -> Result<String> {
        let ciphertext = self.encrypt_for(contact, message)?;
        let tags = vec![
            tag(TAG_RECIPIENT, contact),
            tag(TAG_EMERGENCY, EMERGENCY_ALERT),
        ];
        let event = self
            .client
            .sign_and_publish(KIND_DIRECT_MESSAGE, &ciphertext, tags)
            .await?;
        Ok(event.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compose_alert_message() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 21, 30, 0).unwrap();

        assert_eq!(compose_alert_message(" I need help ", None, now), "I need help");
        assert_eq!(
            compose_alert_message("", None, now),
            "Emergency alert sent at 2024-05-10 21:30 UTC"
        );
        assert_eq!(
            compose_alert_message("Call me", Some((52.52, 13.405)), now),
            "Call me\n\nLocation: 52.52, 13.405"
        );
    }
}
