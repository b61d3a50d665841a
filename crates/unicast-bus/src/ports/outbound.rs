//! Outbound (Driven) ports for the unicast bus.
//!
//! These traits define the external systems the bus depends on: the transport,
//! the subscription store, the body serializer, unit-of-work managers and time.

use async_trait::async_trait;
use bus_types::{Address, BusError, LogicalMessage, MessageType, TransportMessage};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Send side of the transport.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Hand a message to the transport for delivery to `destination`.
    ///
    /// # Errors
    /// `BusError::Transport` when the destination is unreachable or the
    /// transport is unavailable.
    async fn send(&self, message: TransportMessage, destination: &Address) -> Result<(), BusError>;
}

/// Receive side of the transport, bound to the endpoint's local queue.
#[async_trait]
pub trait Transport: MessageSender {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the transport is closed. Must be cancel-safe:
    /// a receive future dropped before completion must not lose a message.
    async fn receive(&self) -> Result<Option<TransportMessage>, BusError>;

    /// Acknowledge a message; it will not be redelivered.
    async fn complete(&self, message_id: &str) -> Result<(), BusError>;

    /// Return a message to the queue for redelivery.
    async fn abandon(&self, message: TransportMessage) -> Result<(), BusError>;

    /// Stop delivering; pending `receive` calls return `Ok(None)`.
    async fn close(&self) -> Result<(), BusError>;
}

/// Crash-durable subscription store.
#[async_trait]
pub trait SubscriptionStorage: Send + Sync {
    /// Current subscribers of one message type.
    async fn load(&self, message_type: &MessageType) -> Result<BTreeSet<Address>, BusError>;

    /// Add a subscriber; saving an existing pair is a no-op.
    async fn save(&self, message_type: &MessageType, subscriber: &Address) -> Result<(), BusError>;

    /// Remove a subscriber; removing a missing pair is a no-op.
    async fn remove(&self, message_type: &MessageType, subscriber: &Address)
        -> Result<(), BusError>;
}

/// Converts logical messages to and from a transport body.
pub trait MessageSerializer: Send + Sync {
    /// Value of the `ContentType` header.
    fn content_type(&self) -> &str;

    fn serialize(&self, messages: &[LogicalMessage]) -> Result<Vec<u8>, BusError>;

    fn deserialize(&self, body: &[u8]) -> Result<Vec<LogicalMessage>, BusError>;
}

/// Scope around the handling of one transport message.
#[async_trait]
pub trait ManageUnitsOfWork: Send + Sync {
    async fn begin(&self, message_id: &str) -> Result<(), BusError>;

    /// Called in reverse registration order with the handling outcome.
    async fn end(&self, message_id: &str, error: Option<&BusError>) -> Result<(), BusError>;
}

/// Time source for consistent timestamp handling.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
