//! # Publisher
//!
//! Fans an event out to every subscriber of its type and of every type it
//! implies. Each surviving subscriber gets its own copy, built through the full
//! outgoing pipeline with that subscriber as the destination.
//!
//! ## Rules
//!
//! - Zero subscribers is success with nothing sent.
//! - A subscriber whose predicate rejects the event is skipped.
//! - A failed copy is retried and escalated for that subscriber only; the
//!   other subscribers are unaffected.
//! - A copy that can be neither delivered nor escalated is reported in
//!   `PublishOutcome::failed` and the fan-out carries on.

use crate::domain::{MessageKind, MessageMetadataRegistry};
use crate::fault::{Decision, FaultEscalation};
use crate::mutators::MutationContext;
use crate::outgoing::OutgoingPipeline;
use crate::subscriptions::SubscriptionManager;
use bus_telemetry::{log_message_event, PUBLISH_COPIES};
use bus_types::{Address, BusError, LogicalMessage, MessageIntent, TransportMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the copies of one publish went.
#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    /// Subscribers that received a copy.
    pub delivered: Vec<Address>,
    /// Subscribers whose predicate rejected the event.
    pub skipped: Vec<Address>,
    /// Subscribers whose copy ended up in the error queue.
    pub escalated: Vec<Address>,
    /// Subscribers whose copy could not be built, sent or escalated.
    pub failed: Vec<(Address, BusError)>,
}

impl PublishOutcome {
    /// No subscriber was interested.
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
            && self.skipped.is_empty()
            && self.escalated.is_empty()
            && self.failed.is_empty()
    }

    /// Addresses of the subscribers in `failed`.
    pub fn failed_subscribers(&self) -> Vec<Address> {
        self.failed.iter().map(|(address, _)| address.clone()).collect()
    }
}

pub struct Publisher {
    registry: Arc<MessageMetadataRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    outgoing: Arc<OutgoingPipeline>,
    faults: Arc<FaultEscalation>,
}

impl Publisher {
    pub fn new(
        registry: Arc<MessageMetadataRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        outgoing: Arc<OutgoingPipeline>,
        faults: Arc<FaultEscalation>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            outgoing,
            faults,
        }
    }

    /// Publish `message` to its subscribers.
    ///
    /// # Errors
    /// - `InvalidOperation` when the type is a command
    /// - `UnknownMessageType` when the type is not registered
    /// - subscription store failures
    ///
    /// Failures of a single copy never fail the publish; they land in
    /// `PublishOutcome::failed`.
    pub async fn publish(
        &self,
        message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<PublishOutcome, BusError> {
        let metadata = self.registry.require(&message.message_type)?;
        if metadata.kind == MessageKind::Command {
            return Err(BusError::InvalidOperation(format!(
                "{} is a command; send it instead of publishing",
                message.message_type
            )));
        }

        let types = self.registry.implied_types(&message.message_type);
        let subscribers = self.subscriptions.subscribers_for(&types).await?;

        let mut outcome = PublishOutcome::default();
        if subscribers.is_empty() {
            debug!(message_type = %message.message_type, "No subscribers, nothing published");
            return Ok(outcome);
        }

        let predicates = self.subscriptions.predicates();
        for subscriber in subscribers {
            if !predicates.allows(&types, &subscriber, &message) {
                debug!(
                    message_type = %message.message_type,
                    subscriber = %subscriber,
                    "Subscriber skipped by predicate"
                );
                outcome.skipped.push(subscriber);
                continue;
            }

            match self.publish_copy(&message, &subscriber, context).await {
                Ok(true) => outcome.delivered.push(subscriber),
                Ok(false) => outcome.escalated.push(subscriber),
                Err(error) => {
                    warn!(
                        message_type = %message.message_type,
                        subscriber = %subscriber,
                        error = %error,
                        "Copy could not be delivered or escalated"
                    );
                    outcome.failed.push((subscriber, error));
                }
            }
        }

        PUBLISH_COPIES.inc_by(outcome.delivered.len() as u64);
        log_message_event!(
            info,
            "Event published",
            "-",
            message.message_type,
            delivered = outcome.delivered.len(),
            skipped = outcome.skipped.len(),
            escalated = outcome.escalated.len(),
            failed = outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn publish_copy(
        &self,
        message: &LogicalMessage,
        subscriber: &Address,
        context: &MutationContext,
    ) -> Result<bool, BusError> {
        let copy = self
            .outgoing
            .prepare(
                vec![message.clone()],
                MessageIntent::Publish,
                subscriber,
                None,
                context,
            )
            .await?;
        self.deliver(copy, subscriber).await
    }

    /// Send one copy until it goes through (`true`) or is moved to the error
    /// queue (`false`).
    async fn deliver(&self, copy: TransportMessage, subscriber: &Address) -> Result<bool, BusError> {
        loop {
            let Err(error) = self.outgoing.transmit(copy.clone(), subscriber).await else {
                self.faults.clear(&copy.id);
                return Ok(true);
            };
            if self.faults.report_failure(&copy, subscriber, &error).await? == Decision::Escalate {
                return Ok(false);
            }
        }
    }
}
