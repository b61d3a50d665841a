//! # Dispatcher
//!
//! Runs one received transport message through the receive path:
//!
//! ```text
//! transport message
//!   │
//!   ├─► incoming transport mutators ──► Consumed (control messages) ──► done
//!   ├─► time-to-be-received check  ──► Expired ──► done
//!   ├─► deserialize (SerializationError, not retryable)
//!   ├─► keep registered types (none left: UnknownMessageType, not retryable)
//!   ├─► incoming message mutators
//!   └─► units of work begin
//!         for each logical message, for each implied type:
//!             handlers in registration order, via the type's dispatch strategy
//!       units of work end (reverse order)
//! ```
//!
//! The dispatcher reports outcomes only. Retry counting and escalation belong
//! to [`FaultEscalation`](crate::fault::FaultEscalation).

use crate::context::HandlerContext;
use crate::domain::{MessageMetadataRegistry, DEFAULT_DISPATCH_STRATEGY};
use crate::handlers::{HandlerRegistration, HandlerRegistry};
use crate::messaging::Messaging;
use crate::mutators::{IncomingAction, MutatorPipeline};
use crate::ports::{ManageUnitsOfWork, MessageSerializer, TimeSource};
use async_trait::async_trait;
use bus_telemetry::{log_message_event, MESSAGES_DISPATCHED, MESSAGES_EXPIRED};
use bus_types::{BusError, ConfigurationError, LogicalMessage, MessageType, TransportMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// DISPATCH STRATEGIES
// =============================================================================

/// How the handlers of one message type are invoked.
#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    async fn invoke(
        &self,
        handlers: &[HandlerRegistration],
        message: &LogicalMessage,
        context: &HandlerContext,
    ) -> Result<(), BusError>;
}

/// One after another in registration order; the first error stops the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeInOrder;

#[async_trait]
impl DispatchStrategy for InvokeInOrder {
    async fn invoke(
        &self,
        handlers: &[HandlerRegistration],
        message: &LogicalMessage,
        context: &HandlerContext,
    ) -> Result<(), BusError> {
        for registration in handlers {
            if context.dispatch_stopped() {
                break;
            }
            debug!(
                message_type = %message.message_type,
                handler = registration.name(),
                "Invoking handler"
            );
            registration.create().handle(message, context).await?;
        }
        Ok(())
    }
}

/// Strategies by name; always contains [`InvokeInOrder`] as `"default"`.
pub fn default_strategies() -> HashMap<String, Arc<dyn DispatchStrategy>> {
    let mut strategies: HashMap<String, Arc<dyn DispatchStrategy>> = HashMap::new();
    strategies.insert(DEFAULT_DISPATCH_STRATEGY.to_string(), Arc::new(InvokeInOrder));
    strategies
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// What happened to a transport message that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handlers ran (possibly none) and every unit of work committed.
    Handled,
    /// An incoming transport mutator took the message.
    Consumed,
    /// Time to be received elapsed before the message was picked up.
    Expired,
}

pub struct Dispatcher {
    messaging: Arc<Messaging>,
    registry: Arc<MessageMetadataRegistry>,
    handlers: HandlerRegistry,
    strategies: HashMap<String, Arc<dyn DispatchStrategy>>,
    mutators: Arc<MutatorPipeline>,
    serializer: Arc<dyn MessageSerializer>,
    units_of_work: Vec<Arc<dyn ManageUnitsOfWork>>,
    time: Arc<dyn TimeSource>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messaging: Arc<Messaging>,
        registry: Arc<MessageMetadataRegistry>,
        handlers: HandlerRegistry,
        strategies: HashMap<String, Arc<dyn DispatchStrategy>>,
        mutators: Arc<MutatorPipeline>,
        serializer: Arc<dyn MessageSerializer>,
        units_of_work: Vec<Arc<dyn ManageUnitsOfWork>>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            messaging,
            registry,
            handlers,
            strategies,
            mutators,
            serializer,
            units_of_work,
            time,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Dispatch one transport message.
    ///
    /// # Errors
    /// - `Serialization` / `Configuration`: the message can never be handled
    /// - `Mutator` / `Handler` / unit of work errors: the attempt failed
    pub async fn dispatch(&self, message: &TransportMessage) -> Result<DispatchOutcome, BusError> {
        let mut transport = message.clone();

        if self.mutators.apply_incoming_transport(&mut transport).await?
            == IncomingAction::Consumed
        {
            return Ok(DispatchOutcome::Consumed);
        }

        if transport.is_expired(self.time.now()) {
            MESSAGES_EXPIRED.inc();
            warn!(
                message_id = %transport.id,
                sent_time = ?transport.sent_time(),
                time_to_be_received = ?transport.time_to_be_received,
                "Message expired before it was received, discarding"
            );
            return Ok(DispatchOutcome::Expired);
        }

        let logical = self.serializer.deserialize(&transport.body)?;
        let messages = self.recognized(logical, &transport)?;
        let messages = self
            .mutators
            .apply_incoming_messages(messages, &transport)
            .await?;

        let incoming = Arc::new(transport);
        let context = HandlerContext::new(Arc::clone(&self.messaging), Arc::clone(&incoming));
        self.run_in_units_of_work(&messages, &context).await?;

        MESSAGES_DISPATCHED.inc();
        log_message_event!(
            debug,
            "Message dispatched",
            incoming.id,
            incoming
                .header(bus_types::headers::ENCLOSED_MESSAGE_TYPES)
                .unwrap_or_default(),
            logical_messages = messages.len()
        );
        Ok(DispatchOutcome::Handled)
    }

    /// Drop logical messages of unregistered types; none left is fatal.
    fn recognized(
        &self,
        logical: Vec<LogicalMessage>,
        transport: &TransportMessage,
    ) -> Result<Vec<LogicalMessage>, BusError> {
        let first_type = logical.first().map(|m| m.message_type.clone());
        let (known, unknown): (Vec<_>, Vec<_>) = logical
            .into_iter()
            .partition(|m| self.registry.contains(&m.message_type));

        for message in &unknown {
            warn!(
                message_id = %transport.id,
                message_type = %message.message_type,
                "Ignoring logical message of unregistered type"
            );
        }

        if known.is_empty() {
            let message_type = first_type
                .or_else(|| transport.enclosed_message_types().into_iter().next())
                .unwrap_or_else(|| MessageType::new(""));
            return Err(ConfigurationError::UnknownMessageType(message_type).into());
        }
        Ok(known)
    }

    async fn run_in_units_of_work(
        &self,
        messages: &[LogicalMessage],
        context: &HandlerContext,
    ) -> Result<(), BusError> {
        let message_id = context.incoming_message().id.as_str();

        let mut begun = 0;
        let mut result = Ok(());
        for unit in &self.units_of_work {
            if let Err(error) = unit.begin(message_id).await {
                result = Err(error);
                break;
            }
            begun += 1;
        }

        if result.is_ok() {
            result = self.invoke_handlers(messages, context).await;
        }

        for unit in self.units_of_work[..begun].iter().rev() {
            if let Err(error) = unit.end(message_id, result.as_ref().err()).await {
                warn!(message_id, error = %error, "Unit of work failed to end");
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }

    async fn invoke_handlers(
        &self,
        messages: &[LogicalMessage],
        context: &HandlerContext,
    ) -> Result<(), BusError> {
        for message in messages {
            for message_type in self.registry.implied_types(&message.message_type) {
                let handlers = self.handlers.handlers_for(&message_type);
                if handlers.is_empty() {
                    continue;
                }

                let strategy_name = self
                    .registry
                    .get(&message_type)
                    .map_or(DEFAULT_DISPATCH_STRATEGY, |m| m.dispatcher.as_str());
                let strategy = self.strategies.get(strategy_name).ok_or_else(|| {
                    ConfigurationError::UnknownDispatchStrategy {
                        message_type: message_type.clone(),
                        strategy: strategy_name.to_string(),
                    }
                })?;

                strategy
                    .invoke(handlers, message, context)
                    .await
                    .map_err(|error| handler_failure(&message_type, error))?;

                if context.dispatch_stopped() {
                    debug!(
                        message_id = %context.incoming_message().id,
                        "Dispatch stopped by handler"
                    );
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Anything a handler raises fails the attempt and is retryable.
fn handler_failure(message_type: &MessageType, error: BusError) -> BusError {
    match error {
        BusError::Handler { .. } => error,
        other => BusError::handler(message_type.clone(), other),
    }
}
