//! # Subscription Manager
//!
//! Tracks, per message type, the set of subscriber addresses.
//!
//! ## Rules
//!
//! - Subscribe and unsubscribe are idempotent; the store has set semantics.
//! - Every read goes to the store, so an unsubscribe is visible to the next
//!   publish as soon as it commits. Nothing is cached.
//! - Subscribe/Unsubscribe control messages received from the transport are
//!   consumed here as an incoming transport mutator; they never reach
//!   handler resolution.

use crate::domain::{Predicate, SubscriptionPredicates};
use crate::mutators::{IncomingAction, MutateIncomingTransportMessages, Mutator};
use crate::ports::SubscriptionStorage;
use async_trait::async_trait;
use bus_telemetry::{metric_inc, SUBSCRIPTION_CHANGES};
use bus_types::{headers, Address, BusError, MessageIntent, MessageType, TransportMessage};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Subscriber bookkeeping backed by a [`SubscriptionStorage`].
pub struct SubscriptionManager {
    storage: Arc<dyn SubscriptionStorage>,
    predicates: Arc<SubscriptionPredicates>,
}

impl SubscriptionManager {
    pub const NAME: &'static str = "SubscriptionManager";

    pub fn new(storage: Arc<dyn SubscriptionStorage>) -> Self {
        Self {
            storage,
            predicates: Arc::new(SubscriptionPredicates::new()),
        }
    }

    /// Add `subscriber` for `message_type`.
    pub async fn subscribe(
        &self,
        message_type: &MessageType,
        subscriber: &Address,
    ) -> Result<(), BusError> {
        self.storage.save(message_type, subscriber).await?;
        metric_inc!(SUBSCRIPTION_CHANGES, &["subscribe"]);
        info!(
            message_type = %message_type,
            subscriber = %subscriber,
            "Subscriber added"
        );
        Ok(())
    }

    /// Add `subscriber` and guard its deliveries with `predicate`.
    pub async fn subscribe_with_predicate(
        &self,
        message_type: &MessageType,
        subscriber: &Address,
        predicate: Predicate,
    ) -> Result<(), BusError> {
        self.subscribe(message_type, subscriber).await?;
        self.predicates
            .insert(message_type.clone(), subscriber.clone(), predicate);
        Ok(())
    }

    /// Remove `subscriber` for `message_type`, together with its predicate.
    pub async fn unsubscribe(
        &self,
        message_type: &MessageType,
        subscriber: &Address,
    ) -> Result<(), BusError> {
        self.storage.remove(message_type, subscriber).await?;
        self.predicates.remove(message_type, subscriber);
        metric_inc!(SUBSCRIPTION_CHANGES, &["unsubscribe"]);
        info!(
            message_type = %message_type,
            subscriber = %subscriber,
            "Subscriber removed"
        );
        Ok(())
    }

    /// Current subscribers of one message type.
    pub async fn subscribers(&self, message_type: &MessageType) -> Result<BTreeSet<Address>, BusError> {
        self.storage.load(message_type).await
    }

    /// Union of the subscribers of every given type; each address once.
    pub async fn subscribers_for(
        &self,
        message_types: &[MessageType],
    ) -> Result<BTreeSet<Address>, BusError> {
        let mut all = BTreeSet::new();
        for message_type in message_types {
            all.extend(self.storage.load(message_type).await?);
        }
        Ok(all)
    }

    pub fn predicates(&self) -> &Arc<SubscriptionPredicates> {
        &self.predicates
    }

    /// Apply a Subscribe or Unsubscribe control message.
    ///
    /// # Errors
    /// `Serialization` when the message lacks the subscribed type or the
    /// subscriber address.
    pub async fn handle_control_message(&self, message: &TransportMessage) -> Result<(), BusError> {
        let message_type = message
            .header(headers::SUBSCRIPTION_MESSAGE_TYPE)
            .map(MessageType::from)
            .ok_or_else(|| missing_header(message, headers::SUBSCRIPTION_MESSAGE_TYPE))?;

        let subscriber = match &message.reply_to {
            Some(address) => address.clone(),
            None => message
                .header(headers::REPLY_TO_ADDRESS)
                .ok_or_else(|| missing_header(message, headers::REPLY_TO_ADDRESS))?
                .parse::<Address>()
                .map_err(|e| BusError::Serialization(e.to_string()))?,
        };

        debug!(
            message_id = %message.id,
            intent = %message.intent,
            message_type = %message_type,
            subscriber = %subscriber,
            "Control message received"
        );

        match message.intent {
            MessageIntent::Subscribe => self.subscribe(&message_type, &subscriber).await,
            MessageIntent::Unsubscribe => self.unsubscribe(&message_type, &subscriber).await,
            other => Err(BusError::InvalidOperation(format!(
                "{} is not a subscription control message",
                other
            ))),
        }
    }
}

fn missing_header(message: &TransportMessage, key: &str) -> BusError {
    BusError::Serialization(format!(
        "control message {} is missing header {}",
        message.id, key
    ))
}

impl Mutator for SubscriptionManager {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[async_trait]
impl MutateIncomingTransportMessages for SubscriptionManager {
    async fn mutate_incoming_transport(
        &self,
        transport: &mut TransportMessage,
    ) -> Result<IncomingAction, BusError> {
        if !transport.intent.is_control() {
            return Ok(IncomingAction::Continue);
        }
        self.handle_control_message(transport).await?;
        Ok(IncomingAction::Consumed)
    }
}
