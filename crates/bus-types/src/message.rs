//! # Logical Messages
//!
//! What applications send and handle. A [`TransportMessage`](crate::TransportMessage)
//! body carries one or more of these once serialized.

use crate::errors::BusError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a logical message type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    /// Create a message type identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of a typed message.
    #[must_use]
    pub fn of<M: Message>() -> Self {
        Self::new(M::MESSAGE_TYPE)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A Rust type that travels on the bus under a fixed identifier.
///
/// ```
/// use bus_types::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl Message for OrderPlaced {
///     const MESSAGE_TYPE: &'static str = "Sales.OrderPlaced";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier used for routing, subscriptions and handler lookup.
    const MESSAGE_TYPE: &'static str;
}

/// One application message: its type, its content, and headers the sender
/// wants copied onto the transport envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMessage {
    /// Type identifier.
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Message content.
    pub payload: serde_json::Value,

    /// Headers copied onto the outgoing envelope; not part of the body.
    #[serde(skip)]
    pub headers: BTreeMap<String, String>,
}

impl LogicalMessage {
    /// Build from an identifier and raw content.
    pub fn new(message_type: impl Into<MessageType>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            headers: BTreeMap::new(),
        }
    }

    /// Build from a typed message.
    ///
    /// # Errors
    ///
    /// `BusError::Serialization` if the value cannot be represented as JSON.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, BusError> {
        let payload = serde_json::to_value(message)
            .map_err(|e| BusError::Serialization(format!("{}: {}", M::MESSAGE_TYPE, e)))?;
        Ok(Self::new(MessageType::of::<M>(), payload))
    }

    /// Decode the content into a typed message.
    ///
    /// # Errors
    ///
    /// `BusError::Serialization` if the identifiers differ or the content does
    /// not match the type.
    pub fn decode<M: Message>(&self) -> Result<M, BusError> {
        if self.message_type.as_str() != M::MESSAGE_TYPE {
            return Err(BusError::Serialization(format!(
                "expected {}, found {}",
                M::MESSAGE_TYPE,
                self.message_type
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| BusError::Serialization(format!("{}: {}", M::MESSAGE_TYPE, e)))
    }

    /// Attach a header to be copied onto the transport envelope.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Whether this message carries the given type identifier.
    #[must_use]
    pub fn is<M: Message>(&self) -> bool {
        self.message_type.as_str() == M::MESSAGE_TYPE
    }
}
