//! # Error Types
//!
//! Error taxonomy shared by every bus component.

use crate::address::Address;
use crate::message::MessageType;
use thiserror::Error;

/// Result alias used throughout the bus.
pub type Result<T> = std::result::Result<T, BusError>;

/// Top-level bus error.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Startup-only; the bus refuses to start.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Body cannot be encoded or decoded. Redelivery cannot fix it.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A handler failed while processing a message.
    #[error("Handler failed for {message_type}: {reason}")]
    Handler {
        message_type: MessageType,
        reason: String,
    },

    /// A mutator failed; the whole send or receive is aborted.
    #[error("Mutator {name} failed: {reason}")]
    Mutator { name: String, reason: String },

    /// Send or receive failed at the transport boundary.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Subscription store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// No owner registered for a message sent without an explicit destination.
    #[error("No destination configured for {0}")]
    NoDestination(MessageType),

    /// `reply` called outside of a handler, or the incoming message has no reply-to.
    #[error("No incoming message to reply to")]
    NotReplyable,

    /// Operation not allowed for this kind of message.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl BusError {
    /// Whether redelivering the message may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Serialization(_)
                | Self::Configuration(_)
                | Self::NoDestination(_)
                | Self::NotReplyable
                | Self::InvalidOperation(_)
        )
    }

    /// Short name of the variant, recorded in fault headers and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Serialization(_) => "SerializationError",
            Self::Handler { .. } => "HandlerError",
            Self::Mutator { .. } => "MutatorError",
            Self::Transport(_) => "TransportError",
            Self::Storage(_) => "StorageError",
            Self::NoDestination(_) => "NoDestination",
            Self::NotReplyable => "NotReplyable",
            Self::InvalidOperation(_) => "InvalidOperation",
        }
    }

    /// Convenience constructor for handler failures.
    pub fn handler(message_type: impl Into<MessageType>, reason: impl ToString) -> Self {
        Self::Handler {
            message_type: message_type.into(),
            reason: reason.to_string(),
        }
    }

    /// Convenience constructor for mutator failures.
    pub fn mutator(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Mutator {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Fatal startup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No local address was configured.
    #[error("local address is not configured")]
    MissingLocalAddress,

    /// No message types were registered.
    #[error("message metadata registry is empty")]
    EmptyMessageRegistry,

    /// A mutator names a dependency that is missing or registered after it.
    #[error("mutator {mutator} requires {requires}, which is not registered before it")]
    UnresolvableMutator { mutator: String, requires: String },

    /// A message type names a dispatch strategy that does not exist.
    #[error("message type {message_type} uses unknown dispatch strategy {strategy}")]
    UnknownDispatchStrategy {
        message_type: MessageType,
        strategy: String,
    },

    /// A message type is used without being registered.
    #[error("message type {0} is not registered")]
    UnknownMessageType(MessageType),

    /// No transport was supplied to the builder.
    #[error("transport is not configured")]
    MissingTransport,

    /// A setting is out of range or malformed.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Transport boundary failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The destination queue does not exist or cannot be reached.
    #[error("destination unreachable: {0}")]
    Unreachable(Address),

    /// The transport itself is down or closed.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Malformed address text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Queue segment is blank.
    #[error("address queue name is empty")]
    EmptyQueue,

    /// A segment contains a reserved character.
    #[error("address contains reserved character '{0}'")]
    InvalidCharacter(char),
}
