//! # Mutator Pipeline
//!
//! Ordered transforms applied at the send and receive boundaries.
//!
//! ```text
//!  send:    LogicalMessage ──[outgoing message]──► serialize ──[outgoing transport]──► transport
//!  receive: transport ──[incoming transport]──► deserialize ──[incoming message]──► handlers
//! ```
//!
//! Each chain runs in registration order. A mutator may name mutators it
//! depends on; they must be registered before it, which the builder checks.
//! Outgoing and incoming transport chains work on a copy and write it back
//! only when every mutator succeeded, so a failing mutator never leaves a
//! partially mutated envelope behind.

mod causation;
mod filtering;
mod header_manager;
mod sent_time;

pub use causation::CausationMutator;
pub use filtering::FilteringMutator;
pub use header_manager::HeaderManager;
pub use sent_time::SentTimeMutator;

use async_trait::async_trait;
use bus_types::{BusError, ConfigurationError, LogicalMessage, TransportMessage};
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// MUTATOR TRAITS
// =============================================================================

/// Identity shared by every mutator kind.
pub trait Mutator: Send + Sync {
    /// Unique name, referenced by other mutators' [`requires`](Self::requires).
    fn name(&self) -> &'static str;

    /// Mutators that must be registered before this one.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Transforms a logical message before it is serialized.
#[async_trait]
pub trait MutateOutgoingMessages: Mutator {
    async fn mutate_outgoing_message(
        &self,
        message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<LogicalMessage, BusError>;
}

/// Transforms the envelope after serialization, before the transport send.
#[async_trait]
pub trait MutateOutgoingTransportMessages: Mutator {
    async fn mutate_outgoing_transport(
        &self,
        transport: &mut TransportMessage,
        messages: &[LogicalMessage],
        context: &MutationContext,
    ) -> Result<(), BusError>;
}

/// Inspects or transforms a received envelope before it is deserialized.
#[async_trait]
pub trait MutateIncomingTransportMessages: Mutator {
    /// Return [`IncomingAction::Consumed`] to stop the message here.
    async fn mutate_incoming_transport(
        &self,
        transport: &mut TransportMessage,
    ) -> Result<IncomingAction, BusError>;
}

/// Transforms a received logical message before handlers see it.
#[async_trait]
pub trait MutateIncomingMessages: Mutator {
    /// Return `None` to drop the message.
    async fn mutate_incoming_message(
        &self,
        message: LogicalMessage,
        transport: &TransportMessage,
    ) -> Result<Option<LogicalMessage>, BusError>;
}

/// Outcome of an incoming transport mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingAction {
    Continue,
    /// Fully handled; skip deserialization and handlers.
    Consumed,
}

/// Bus-level context visible to outgoing mutators.
#[derive(Debug, Clone, Default)]
pub struct MutationContext {
    incoming: Option<Arc<TransportMessage>>,
}

impl MutationContext {
    /// Context for a send made while handling `incoming`.
    pub fn handling(incoming: Arc<TransportMessage>) -> Self {
        Self {
            incoming: Some(incoming),
        }
    }

    /// The message currently being handled, if any.
    pub fn incoming(&self) -> Option<&TransportMessage> {
        self.incoming.as_deref()
    }
}

/// One mutator of any kind, in the order it was registered.
#[derive(Clone)]
pub enum MutatorRegistration {
    OutgoingMessage(Arc<dyn MutateOutgoingMessages>),
    OutgoingTransport(Arc<dyn MutateOutgoingTransportMessages>),
    IncomingTransport(Arc<dyn MutateIncomingTransportMessages>),
    IncomingMessage(Arc<dyn MutateIncomingMessages>),
}

impl MutatorRegistration {
    fn name(&self) -> &'static str {
        match self {
            Self::OutgoingMessage(m) => m.name(),
            Self::OutgoingTransport(m) => m.name(),
            Self::IncomingTransport(m) => m.name(),
            Self::IncomingMessage(m) => m.name(),
        }
    }

    fn requires(&self) -> &'static [&'static str] {
        match self {
            Self::OutgoingMessage(m) => m.requires(),
            Self::OutgoingTransport(m) => m.requires(),
            Self::IncomingTransport(m) => m.requires(),
            Self::IncomingMessage(m) => m.requires(),
        }
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// The four mutator chains, fixed after build.
#[derive(Default)]
pub struct MutatorPipeline {
    outgoing_messages: Vec<Arc<dyn MutateOutgoingMessages>>,
    outgoing_transport: Vec<Arc<dyn MutateOutgoingTransportMessages>>,
    incoming_transport: Vec<Arc<dyn MutateIncomingTransportMessages>>,
    incoming_messages: Vec<Arc<dyn MutateIncomingMessages>>,
}

impl MutatorPipeline {
    pub fn builder() -> MutatorPipelineBuilder {
        MutatorPipelineBuilder::default()
    }

    pub async fn apply_outgoing_messages(
        &self,
        mut message: LogicalMessage,
        context: &MutationContext,
    ) -> Result<LogicalMessage, BusError> {
        for mutator in &self.outgoing_messages {
            message = mutator
                .mutate_outgoing_message(message, context)
                .await
                .map_err(|e| wrap(mutator.name(), e))?;
        }
        Ok(message)
    }

    pub async fn apply_outgoing_transport(
        &self,
        transport: &mut TransportMessage,
        messages: &[LogicalMessage],
        context: &MutationContext,
    ) -> Result<(), BusError> {
        let mut working = transport.clone();
        for mutator in &self.outgoing_transport {
            mutator
                .mutate_outgoing_transport(&mut working, messages, context)
                .await
                .map_err(|e| wrap(mutator.name(), e))?;
        }
        *transport = working;
        Ok(())
    }

    pub async fn apply_incoming_transport(
        &self,
        transport: &mut TransportMessage,
    ) -> Result<IncomingAction, BusError> {
        let mut working = transport.clone();
        for mutator in &self.incoming_transport {
            let action = mutator
                .mutate_incoming_transport(&mut working)
                .await
                .map_err(|e| wrap(mutator.name(), e))?;
            if action == IncomingAction::Consumed {
                debug!(
                    message_id = %working.id,
                    mutator = mutator.name(),
                    "Incoming message consumed by mutator"
                );
                *transport = working;
                return Ok(IncomingAction::Consumed);
            }
        }
        *transport = working;
        Ok(IncomingAction::Continue)
    }

    /// Run every logical message through the incoming chain; dropped messages
    /// are left out of the result.
    pub async fn apply_incoming_messages(
        &self,
        messages: Vec<LogicalMessage>,
        transport: &TransportMessage,
    ) -> Result<Vec<LogicalMessage>, BusError> {
        let mut kept = Vec::with_capacity(messages.len());
        'messages: for mut message in messages {
            for mutator in &self.incoming_messages {
                match mutator
                    .mutate_incoming_message(message, transport)
                    .await
                    .map_err(|e| wrap(mutator.name(), e))?
                {
                    Some(next) => message = next,
                    None => {
                        debug!(
                            message_id = %transport.id,
                            mutator = mutator.name(),
                            "Logical message dropped by mutator"
                        );
                        continue 'messages;
                    }
                }
            }
            kept.push(message);
        }
        Ok(kept)
    }
}

fn wrap(name: &str, error: BusError) -> BusError {
    warn!(mutator = name, error = %error, "Mutator failed");
    match error {
        BusError::Mutator { .. } => error,
        other => BusError::mutator(name, other),
    }
}

/// Collects registrations and checks mutator dependencies.
#[derive(Default)]
pub struct MutatorPipelineBuilder {
    registrations: Vec<MutatorRegistration>,
}

impl MutatorPipelineBuilder {
    #[must_use]
    pub fn register(mut self, registration: MutatorRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    #[must_use]
    pub fn outgoing_message(self, mutator: Arc<dyn MutateOutgoingMessages>) -> Self {
        self.register(MutatorRegistration::OutgoingMessage(mutator))
    }

    #[must_use]
    pub fn outgoing_transport(self, mutator: Arc<dyn MutateOutgoingTransportMessages>) -> Self {
        self.register(MutatorRegistration::OutgoingTransport(mutator))
    }

    #[must_use]
    pub fn incoming_transport(self, mutator: Arc<dyn MutateIncomingTransportMessages>) -> Self {
        self.register(MutatorRegistration::IncomingTransport(mutator))
    }

    #[must_use]
    pub fn incoming_message(self, mutator: Arc<dyn MutateIncomingMessages>) -> Self {
        self.register(MutatorRegistration::IncomingMessage(mutator))
    }

    /// # Errors
    /// `UnresolvableMutator` if a mutator requires one that is missing or
    /// registered after it.
    pub fn build(self) -> Result<MutatorPipeline, ConfigurationError> {
        for (position, registration) in self.registrations.iter().enumerate() {
            for required in registration.requires() {
                let satisfied = self.registrations[..position]
                    .iter()
                    .any(|earlier| earlier.name() == *required);
                if !satisfied {
                    return Err(ConfigurationError::UnresolvableMutator {
                        mutator: registration.name().to_string(),
                        requires: (*required).to_string(),
                    });
                }
            }
        }

        let mut pipeline = MutatorPipeline::default();
        for registration in self.registrations {
            match registration {
                MutatorRegistration::OutgoingMessage(m) => pipeline.outgoing_messages.push(m),
                MutatorRegistration::OutgoingTransport(m) => pipeline.outgoing_transport.push(m),
                MutatorRegistration::IncomingTransport(m) => pipeline.incoming_transport.push(m),
                MutatorRegistration::IncomingMessage(m) => pipeline.incoming_messages.push(m),
            }
        }
        Ok(pipeline)
    }
}
