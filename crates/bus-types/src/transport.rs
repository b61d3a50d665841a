//! # Transport Envelope
//!
//! The unit the transport moves: headers, an opaque body, and the metadata the
//! bus needs to route, expire and correlate it.

use crate::address::Address;
use crate::headers;
use crate::message::MessageType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one send attempt.
pub type MessageId = String;

/// Why a transport message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIntent {
    /// Point-to-point delivery.
    Send,
    /// One copy of a published event.
    Publish,
    /// Control message: add the reply-to address as a subscriber.
    Subscribe,
    /// Control message: remove the reply-to address as a subscriber.
    Unsubscribe,
}

impl MessageIntent {
    /// Whether this intent marks a subscription control message.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Subscribe | Self::Unsubscribe)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Send => "Send",
            Self::Publish => "Publish",
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
        }
    }
}

impl fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Send" => Ok(Self::Send),
            "Publish" => Ok(Self::Publish),
            "Subscribe" => Ok(Self::Subscribe),
            "Unsubscribe" => Ok(Self::Unsubscribe),
            other => Err(format!("unknown message intent: {other}")),
        }
    }
}

/// The message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Unique per send attempt.
    pub id: MessageId,

    /// String headers; see [`crate::headers`] for reserved keys.
    pub headers: HashMap<String, String>,

    /// Serialized logical messages (empty for control messages).
    pub body: Vec<u8>,

    /// Expiry window measured from the send time.
    pub time_to_be_received: Option<Duration>,

    /// Id of the request this message answers.
    pub correlation_id: Option<String>,

    /// Where replies go.
    pub reply_to: Option<Address>,

    /// Why the message was sent.
    pub intent: MessageIntent,

    /// Whether the transport must store the message durably.
    pub recoverable: bool,
}

impl TransportMessage {
    /// Create an empty envelope with a fresh id.
    #[must_use]
    pub fn new(intent: MessageIntent) -> Self {
        let mut headers = HashMap::new();
        headers.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            headers,
            body: Vec::new(),
            time_to_be_received: None,
            correlation_id: None,
            reply_to: None,
            intent,
            recoverable: true,
        }
    }

    /// Build a Subscribe or Unsubscribe control message for `message_type`
    /// on behalf of `subscriber`.
    #[must_use]
    pub fn control(intent: MessageIntent, message_type: &MessageType, subscriber: &Address) -> Self {
        let mut message = Self::new(intent);
        message.set_header(headers::SUBSCRIPTION_MESSAGE_TYPE, message_type.as_str());
        message.set_header(headers::REPLY_TO_ADDRESS, subscriber.to_string());
        message.reply_to = Some(subscriber.clone());
        message
    }

    /// Read a header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Logical message types named by the `EnclosedMessageTypes` header.
    #[must_use]
    pub fn enclosed_message_types(&self) -> Vec<MessageType> {
        self.header(headers::ENCLOSED_MESSAGE_TYPES)
            .map(|value| {
                value
                    .split(headers::MESSAGE_TYPE_SEPARATOR)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(MessageType::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Send time from the `SentTime` header, if present and well-formed.
    #[must_use]
    pub fn sent_time(&self) -> Option<DateTime<Utc>> {
        self.header(headers::SENT_TIME)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|time| time.with_timezone(&Utc))
    }

    /// Whether the time-to-be-received window has elapsed at `now`.
    ///
    /// Messages without a window or without a send time never expire, and
    /// neither does a window that reaches past the last representable time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let (Some(ttbr), Some(sent)) = (self.time_to_be_received, self.sent_time()) else {
            return false;
        };
        chrono::Duration::from_std(ttbr)
            .ok()
            .and_then(|window| sent.checked_add_signed(window))
            .map_or(false, |deadline| deadline < now)
    }

    /// Copy of this envelope with a fresh id, used for each independent send.
    #[must_use]
    pub fn with_new_id(&self) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4().to_string();
        copy
    }
}
