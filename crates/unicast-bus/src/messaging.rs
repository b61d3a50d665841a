//! # Messaging
//!
//! The operations behind [`Bus`](crate::ports::Bus), shared by the bus itself
//! and by every [`HandlerContext`](crate::context::HandlerContext). Callers pass
//! the [`MutationContext`] that says which message, if any, is being handled.

use crate::config::EndpointConfig;
use crate::deferral::Deferral;
use crate::domain::{MessageKind, MessageMetadataRegistry, Predicate};
use crate::mutators::MutationContext;
use crate::outgoing::OutgoingPipeline;
use crate::publisher::{PublishOutcome, Publisher};
use crate::subscriptions::SubscriptionManager;
use bus_types::{
    headers, Address, BusError, LogicalMessage, MessageIntent, MessageType, TransportMessage,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Separator of the site keys in the gateway header.
const SITE_SEPARATOR: &str = ",";

pub struct Messaging {
    config: Arc<EndpointConfig>,
    registry: Arc<MessageMetadataRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    outgoing: Arc<OutgoingPipeline>,
    publisher: Publisher,
    deferral: Deferral,
}

impl Messaging {
    pub fn new(
        config: Arc<EndpointConfig>,
        registry: Arc<MessageMetadataRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        outgoing: Arc<OutgoingPipeline>,
        publisher: Publisher,
        deferral: Deferral,
    ) -> Self {
        Self {
            config,
            registry,
            subscriptions,
            outgoing,
            publisher,
            deferral,
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn registry(&self) -> &MessageMetadataRegistry {
        &self.registry
    }

    // =========================================================================
    // POINT-TO-POINT
    // =========================================================================

    /// Send to the registered owner of the message type.
    pub async fn send(
        &self,
        message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        let metadata = self.registry.require(&message.message_type)?;
        if metadata.kind == MessageKind::Event {
            return Err(BusError::InvalidOperation(format!(
                "{} is an event; publish it instead of sending",
                message.message_type
            )));
        }
        let owner = metadata
            .owner
            .clone()
            .ok_or_else(|| BusError::NoDestination(message.message_type.clone()))?;
        self.send_to(message, &owner, context).await
    }

    pub async fn send_to(
        &self,
        message: LogicalMessage,
        destination: &Address,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        self.outgoing
            .send(vec![message], MessageIntent::Send, destination, None, context)
            .await
    }

    pub async fn send_local(
        &self,
        message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        let local = self.config.local_address.clone();
        self.send_to(message, &local, context).await
    }

    /// Send through the gateway, naming the remote sites in a header.
    pub async fn send_to_sites(
        &self,
        message: LogicalMessage,
        sites: &[String],
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        if sites.is_empty() {
            return Err(BusError::InvalidOperation("no destination sites given".into()));
        }
        let gateway = self.config.gateway_address();

        let envelope = self
            .outgoing
            .prepare_with_headers(
                vec![message],
                MessageIntent::Send,
                &gateway,
                None,
                vec![(headers::DESTINATION_SITES, sites.join(SITE_SEPARATOR))],
                context,
            )
            .await?;
        self.outgoing.transmit(envelope.clone(), &gateway).await?;
        Ok(envelope)
    }

    /// Reply to the sender of the message being handled.
    pub async fn reply(
        &self,
        message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        let incoming = context.incoming().ok_or(BusError::NotReplyable)?;
        let reply_to = incoming.reply_to.clone().ok_or(BusError::NotReplyable)?;
        let correlation_id = incoming.id.clone();
        self.outgoing
            .send(
                vec![message],
                MessageIntent::Send,
                &reply_to,
                Some(correlation_id),
                context,
            )
            .await
    }

    pub async fn defer(
        &self,
        message: LogicalMessage,
        destination: &Address,
        deliver_at: DateTime<Utc>,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        self.deferral
            .defer(message, destination, deliver_at, context)
            .await
    }

    // =========================================================================
    // PUBLISH / SUBSCRIBE
    // =========================================================================

    pub async fn publish(
        &self,
        message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<PublishOutcome, BusError> {
        self.publisher.publish(message, context).await
    }

    /// Subscribe this endpoint to `message_type`.
    ///
    /// The predicate is kept locally and filters both what a local publisher
    /// sends here and what arrives here. A type owned by another endpoint is
    /// subscribed to by sending that endpoint a Subscribe control message.
    pub async fn subscribe(
        &self,
        message_type: &MessageType,
        predicate: Option<Predicate>,
        context: &MutationContext,
    ) -> Result<(), BusError> {
        let metadata = self.registry.require(message_type)?;
        if metadata.kind == MessageKind::Command {
            return Err(BusError::InvalidOperation(format!(
                "{} is a command and cannot be subscribed to",
                message_type
            )));
        }

        let local = &self.config.local_address;
        if let Some(predicate) = predicate {
            self.subscriptions
                .predicates()
                .insert(message_type.clone(), local.clone(), predicate);
        }

        match self.remote_owner(message_type) {
            Some(owner) => {
                self.send_control(MessageIntent::Subscribe, message_type, &owner, context)
                    .await
            }
            None => self.subscriptions.subscribe(message_type, local).await,
        }
    }

    pub async fn unsubscribe(
        &self,
        message_type: &MessageType,
        context: &MutationContext,
    ) -> Result<(), BusError> {
        self.registry.require(message_type)?;
        let local = &self.config.local_address;
        self.subscriptions.predicates().remove(message_type, local);

        match self.remote_owner(message_type) {
            Some(owner) => {
                self.send_control(MessageIntent::Unsubscribe, message_type, &owner, context)
                    .await
            }
            None => self.subscriptions.unsubscribe(message_type, local).await,
        }
    }

    /// Subscribe to every handled non-command type owned by another endpoint.
    pub async fn auto_subscribe<'a>(
        &self,
        handled: impl IntoIterator<Item = &'a MessageType>,
    ) -> Result<usize, BusError> {
        let context = MutationContext::default();
        let mut subscribed = 0;
        for message_type in handled {
            let Some(metadata) = self.registry.get(message_type) else {
                continue;
            };
            if metadata.kind == MessageKind::Command || self.remote_owner(message_type).is_none() {
                continue;
            }
            self.subscribe(message_type, None, &context).await?;
            subscribed += 1;
        }
        if subscribed > 0 {
            info!(count = subscribed, "Auto-subscribed to remotely owned events");
        }
        Ok(subscribed)
    }

    fn remote_owner(&self, message_type: &MessageType) -> Option<Address> {
        self.registry
            .owner(message_type)
            .filter(|owner| **owner != self.config.local_address)
            .cloned()
    }

    async fn send_control(
        &self,
        intent: MessageIntent,
        message_type: &MessageType,
        owner: &Address,
        context: &MutationContext,
    ) -> Result<(), BusError> {
        let control = self
            .outgoing
            .prepare_control(intent, message_type, owner, context)
            .await?;
        self.outgoing.transmit(control, owner).await?;
        debug!(
            intent = %intent,
            message_type = %message_type,
            owner = %owner,
            "Subscription request sent to owner"
        );
        Ok(())
    }
}
