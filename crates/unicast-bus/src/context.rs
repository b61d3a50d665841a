//! Handler-side view of the bus.
//!
//! Everything sent through a [`HandlerContext`] is stamped with causation from
//! the message being handled, and `reply` goes back to its sender.

use crate::domain::Predicate;
use crate::messaging::Messaging;
use crate::mutators::MutationContext;
use crate::ports::Bus;
use crate::publisher::PublishOutcome;
use async_trait::async_trait;
use bus_types::{Address, BusError, LogicalMessage, MessageType, TransportMessage};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct HandlerContext {
    messaging: Arc<Messaging>,
    mutation: MutationContext,
    incoming: Arc<TransportMessage>,
    stopped: AtomicBool,
}

impl HandlerContext {
    pub fn new(messaging: Arc<Messaging>, incoming: Arc<TransportMessage>) -> Self {
        Self {
            messaging,
            mutation: MutationContext::handling(Arc::clone(&incoming)),
            incoming,
            stopped: AtomicBool::new(false),
        }
    }

    /// The envelope being handled.
    pub fn incoming_message(&self) -> &TransportMessage {
        &self.incoming
    }

    /// Skip the remaining handlers for this transport message. Handlers that
    /// already ran are not undone and the message still counts as handled.
    pub fn do_not_continue_dispatching(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn dispatch_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bus for HandlerContext {
    async fn send(&self, message: LogicalMessage) -> Result<TransportMessage, BusError> {
        self.messaging.send(message, &self.mutation).await
    }

    async fn send_to(
        &self,
        message: LogicalMessage,
        destination: &Address,
    ) -> Result<TransportMessage, BusError> {
        self.messaging
            .send_to(message, destination, &self.mutation)
            .await
    }

    async fn send_local(&self, message: LogicalMessage) -> Result<TransportMessage, BusError> {
        self.messaging.send_local(message, &self.mutation).await
    }

    async fn send_to_sites(
        &self,
        message: LogicalMessage,
        sites: &[String],
    ) -> Result<TransportMessage, BusError> {
        self.messaging
            .send_to_sites(message, sites, &self.mutation)
            .await
    }

    async fn publish(&self, message: LogicalMessage) -> Result<PublishOutcome, BusError> {
        self.messaging.publish(message, &self.mutation).await
    }

    async fn defer(
        &self,
        message: LogicalMessage,
        destination: &Address,
        deliver_at: DateTime<Utc>,
    ) -> Result<TransportMessage, BusError> {
        self.messaging
            .defer(message, destination, deliver_at, &self.mutation)
            .await
    }

    async fn reply(&self, message: LogicalMessage) -> Result<TransportMessage, BusError> {
        self.messaging.reply(message, &self.mutation).await
    }

    async fn subscribe(
        &self,
        message_type: &MessageType,
        predicate: Option<Predicate>,
    ) -> Result<(), BusError> {
        self.messaging
            .subscribe(message_type, predicate, &self.mutation)
            .await
    }

    async fn unsubscribe(&self, message_type: &MessageType) -> Result<(), BusError> {
        self.messaging
            .unsubscribe(message_type, &self.mutation)
            .await
    }
}
