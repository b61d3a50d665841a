//! Inbound (Driving) ports for the unicast bus.
//!
//! [`Bus`] is what application code calls. It is implemented by
//! [`UnicastBus`](crate::UnicastBus) for code running outside a handler and by
//! [`HandlerContext`] for code running inside one, where sends carry causation
//! from the message being handled and `reply` is available.
//!
//! [`MessageHandler`] is what application code implements.

use crate::context::HandlerContext;
use crate::domain::Predicate;
use crate::publisher::PublishOutcome;
use async_trait::async_trait;
use bus_types::{Address, BusError, LogicalMessage, MessageType, TransportMessage};
use chrono::{DateTime, Utc};

/// Messaging operations available to application code.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Send to the owner registered for the message type.
    ///
    /// # Errors
    /// - `NoDestination` if the type has no owner
    /// - `InvalidOperation` if the type is an event
    async fn send(&self, message: LogicalMessage) -> Result<TransportMessage, BusError>;

    /// Send to an explicit destination.
    async fn send_to(
        &self,
        message: LogicalMessage,
        destination: &Address,
    ) -> Result<TransportMessage, BusError>;

    /// Send to this endpoint's own queue.
    async fn send_local(&self, message: LogicalMessage) -> Result<TransportMessage, BusError>;

    /// Send through the gateway to the named remote sites.
    async fn send_to_sites(
        &self,
        message: LogicalMessage,
        sites: &[String],
    ) -> Result<TransportMessage, BusError>;

    /// Publish an event to every interested subscriber.
    ///
    /// Zero subscribers is success.
    async fn publish(&self, message: LogicalMessage) -> Result<PublishOutcome, BusError>;

    /// Deliver `message` to `destination` no earlier than `deliver_at`.
    async fn defer(
        &self,
        message: LogicalMessage,
        destination: &Address,
        deliver_at: DateTime<Utc>,
    ) -> Result<TransportMessage, BusError>;

    /// Reply to the sender of the message being handled.
    ///
    /// # Errors
    /// `NotReplyable` outside a handler or when the sender left no reply-to.
    async fn reply(&self, message: LogicalMessage) -> Result<TransportMessage, BusError>;

    /// Subscribe this endpoint to an event type, optionally filtered.
    async fn subscribe(
        &self,
        message_type: &MessageType,
        predicate: Option<Predicate>,
    ) -> Result<(), BusError>;

    /// Remove this endpoint's subscription to an event type.
    async fn unsubscribe(&self, message_type: &MessageType) -> Result<(), BusError>;
}

/// Application handler for one or more message types.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one logical message. An error fails the whole transport message.
    async fn handle(&self, message: &LogicalMessage, context: &HandlerContext)
        -> Result<(), BusError>;
}
