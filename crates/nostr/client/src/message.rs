//! Nostr relay message types.
//!
//! This module implements the relay protocol messages as specified in NIP-01:
//! - Client to Relay: EVENT, REQ, CLOSE
//! - Relay to Client: EVENT, OK, EOSE, CLOSED, NOTICE (and AUTH challenges,
//!   which are recognized but not answered)

use crate::error::{ClientError, Result};
use nostr::{Event, Filter};
use serde_json::Value;

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Serialize to the JSON array sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr = Vec::with_capacity(filters.len() + 2);
                arr.push(Value::String("REQ".to_string()));
                arr.push(Value::String(subscription_id.clone()));
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

impl RelayMessage {
    /// Parse a text frame from the relay.
    ///
    /// Any shape problem is a [`ClientError::Protocol`]; the caller decides
    /// whether to drop the frame.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ClientError::Protocol(format!("invalid JSON: {}", e)))?;
        let arr = value
            .as_array()
            .ok_or_else(|| ClientError::Protocol("frame is not an array".to_string()))?;

        let msg_type = str_at(arr, 0, "message type")?;
        match msg_type {
            "EVENT" => {
                let subscription_id = str_at(arr, 1, "EVENT subscription_id")?.to_string();
                let raw = arr
                    .get(2)
                    .ok_or_else(|| ClientError::Protocol("EVENT without event".to_string()))?;
                let event: Event = serde_json::from_value(raw.clone())
                    .map_err(|e| ClientError::Protocol(format!("EVENT payload: {}", e)))?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = str_at(arr, 1, "OK event_id")?.to_string();
                let success = arr.get(2).and_then(Value::as_bool).ok_or_else(|| {
                    ClientError::Protocol("OK accepted field must be a boolean".to_string())
                })?;
                // Some relays omit the message on success.
                let message = arr.get(3).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(arr, 1, "EOSE subscription_id")?.to_string(),
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(arr, 1, "CLOSED subscription_id")?.to_string(),
                message: arr.get(2).and_then(Value::as_str).unwrap_or("").to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(arr, 1, "NOTICE message")?.to_string(),
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: str_at(arr, 1, "AUTH challenge")?.to_string(),
            }),
            other => Err(ClientError::Protocol(format!(
                "unknown message type: {}",
                other
            ))),
        }
    }
}

fn str_at<'a>(arr: &'a [Value], index: usize, field: &str) -> Result<&'a str> {
    arr.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Protocol(format!("{} must be a string", field)))
}
