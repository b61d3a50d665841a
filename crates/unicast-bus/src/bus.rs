//! # Unicast Bus
//!
//! Composition root. [`BusBuilder`] collects configuration, message metadata,
//! handlers, mutators and adapters, validates everything once, and returns a
//! fully wired [`UnicastBus`] that never changes afterwards.
//!
//! ## Built-in mutators
//!
//! Registered ahead of user mutators, in this order:
//!
//! | Mutator               | Chains                                   |
//! |-----------------------|------------------------------------------|
//! | `HeaderManager`       | outgoing transport, incoming message     |
//! | `CausationMutator`    | outgoing transport                       |
//! | `SentTimeMutator`     | outgoing transport                       |
//! | `SubscriptionManager` | incoming transport (control messages)    |
//! | `FilteringMutator`    | incoming message (published events)      |

use crate::adapters::{InMemorySubscriptionStorage, JsonMessageSerializer};
use crate::config::{BusConfig, EndpointConfig};
use crate::deferral::Deferral;
use crate::dispatcher::{default_strategies, DispatchStrategy, Dispatcher};
use crate::domain::{MessageMetadata, MessageMetadataRegistry, Predicate};
use crate::fault::FaultEscalation;
use crate::handlers::{HandlerFactory, HandlerRegistry};
use crate::messaging::Messaging;
use crate::mutators::{
    CausationMutator, FilteringMutator, HeaderManager, MutateIncomingMessages,
    MutateIncomingTransportMessages, MutateOutgoingMessages, MutateOutgoingTransportMessages,
    MutationContext, MutatorPipeline, MutatorRegistration, SentTimeMutator,
};
use crate::outgoing::OutgoingPipeline;
use crate::ports::{
    Bus, ManageUnitsOfWork, MessageHandler, MessageSender, MessageSerializer, SubscriptionStorage,
    SystemTimeSource, TimeSource, Transport,
};
use crate::publisher::{PublishOutcome, Publisher};
use crate::subscriptions::SubscriptionManager;
use async_trait::async_trait;
use bus_types::{
    Address, BusError, ConfigurationError, LogicalMessage, MessageType, TransportMessage,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A built, immutable bus endpoint.
pub struct UnicastBus {
    config: Arc<EndpointConfig>,
    messaging: Arc<Messaging>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<SubscriptionManager>,
    faults: Arc<FaultEscalation>,
    transport: Arc<dyn Transport>,
}

impl UnicastBus {
    pub fn builder(config: BusConfig) -> BusBuilder {
        BusBuilder::new(config)
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn local_address(&self) -> &Address {
        &self.config.local_address
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn faults(&self) -> &Arc<FaultEscalation> {
        &self.faults
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn messaging(&self) -> &Arc<Messaging> {
        &self.messaging
    }
}

#[async_trait]
impl Bus for UnicastBus {
    async fn send(&self, message: LogicalMessage) -> Result<TransportMessage, BusError> {
        self.messaging
            .send(message, &MutationContext::default())
            .await
    }

    async fn send_to(
        &self,
        message: LogicalMessage,
        destination: &Address,
    ) -> Result<TransportMessage, BusError> {
        self.messaging
            .send_to(message, destination, &MutationContext::default())
            .await
    }

    async fn send_local(&self, message: LogicalMessage) -> Result<TransportMessage, BusError> {
        self.messaging
            .send_local(message, &MutationContext::default())
            .await
    }

    async fn send_to_sites(
        &self,
        message: LogicalMessage,
        sites: &[String],
    ) -> Result<TransportMessage, BusError> {
        self.messaging
            .send_to_sites(message, sites, &MutationContext::default())
            .await
    }

    async fn publish(&self, message: LogicalMessage) -> Result<PublishOutcome, BusError> {
        self.messaging
            .publish(message, &MutationContext::default())
            .await
    }

    async fn defer(
        &self,
        message: LogicalMessage,
        destination: &Address,
        deliver_at: DateTime<Utc>,
    ) -> Result<TransportMessage, BusError> {
        self.messaging
            .defer(message, destination, deliver_at, &MutationContext::default())
            .await
    }

    async fn reply(&self, _message: LogicalMessage) -> Result<TransportMessage, BusError> {
        Err(BusError::NotReplyable)
    }

    async fn subscribe(
        &self,
        message_type: &MessageType,
        predicate: Option<Predicate>,
    ) -> Result<(), BusError> {
        self.messaging
            .subscribe(message_type, predicate, &MutationContext::default())
            .await
    }

    async fn unsubscribe(&self, message_type: &MessageType) -> Result<(), BusError> {
        self.messaging
            .unsubscribe(message_type, &MutationContext::default())
            .await
    }
}

// =============================================================================
// BUILDER
// =============================================================================

type TransportPair = (Arc<dyn Transport>, Arc<dyn MessageSender>);

pub struct BusBuilder {
    config: BusConfig,
    metadata: Vec<MessageMetadata>,
    handlers: HandlerRegistry,
    transport: Option<TransportPair>,
    storage: Option<Arc<dyn SubscriptionStorage>>,
    serializer: Option<Arc<dyn MessageSerializer>>,
    time: Option<Arc<dyn TimeSource>>,
    units_of_work: Vec<Arc<dyn ManageUnitsOfWork>>,
    strategies: HashMap<String, Arc<dyn DispatchStrategy>>,
    mutators: Vec<MutatorRegistration>,
}

impl BusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            metadata: Vec::new(),
            handlers: HandlerRegistry::new(),
            transport: None,
            storage: None,
            serializer: None,
            time: None,
            units_of_work: Vec::new(),
            strategies: default_strategies(),
            mutators: Vec::new(),
        }
    }

    /// Register routing rules for a message type.
    pub fn message(mut self, metadata: MessageMetadata) -> Self {
        self.metadata.push(metadata);
        self
    }

    /// Register a shared handler instance for `message_type`.
    pub fn handler<H>(self, message_type: impl Into<MessageType>, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let factory: HandlerFactory = Arc::new(move || Arc::clone(&handler));
        self.handler_factory(message_type, std::any::type_name::<H>(), factory)
    }

    /// Register a factory that builds a fresh handler for every dispatch.
    pub fn handler_factory(
        mut self,
        message_type: impl Into<MessageType>,
        name: impl Into<String>,
        factory: HandlerFactory,
    ) -> Self {
        self.handlers.register(message_type.into(), name, factory);
        self
    }

    /// The transport this endpoint receives from and sends through.
    pub fn transport<T>(mut self, transport: Arc<T>) -> Self
    where
        T: Transport + 'static,
    {
        let sender: Arc<dyn MessageSender> = transport.clone();
        let transport: Arc<dyn Transport> = transport;
        self.transport = Some((transport, sender));
        self
    }

    /// Defaults to [`InMemorySubscriptionStorage`].
    pub fn subscription_storage(mut self, storage: Arc<dyn SubscriptionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to [`JsonMessageSerializer`].
    pub fn serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Defaults to [`SystemTimeSource`].
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    /// Units of work begin in registration order and end in reverse order.
    pub fn unit_of_work(mut self, unit: Arc<dyn ManageUnitsOfWork>) -> Self {
        self.units_of_work.push(unit);
        self
    }

    /// Make a dispatch strategy available under `name` for
    /// [`MessageMetadata::dispatched_by`].
    pub fn dispatch_strategy(
        mut self,
        name: impl Into<String>,
        strategy: Arc<dyn DispatchStrategy>,
    ) -> Self {
        self.strategies.insert(name.into(), strategy);
        self
    }

    pub fn outgoing_message_mutator(mut self, mutator: Arc<dyn MutateOutgoingMessages>) -> Self {
        self.mutators.push(MutatorRegistration::OutgoingMessage(mutator));
        self
    }

    pub fn outgoing_transport_mutator(
        mut self,
        mutator: Arc<dyn MutateOutgoingTransportMessages>,
    ) -> Self {
        self.mutators
            .push(MutatorRegistration::OutgoingTransport(mutator));
        self
    }

    pub fn incoming_transport_mutator(
        mut self,
        mutator: Arc<dyn MutateIncomingTransportMessages>,
    ) -> Self {
        self.mutators
            .push(MutatorRegistration::IncomingTransport(mutator));
        self
    }

    pub fn incoming_message_mutator(mut self, mutator: Arc<dyn MutateIncomingMessages>) -> Self {
        self.mutators.push(MutatorRegistration::IncomingMessage(mutator));
        self
    }

    /// Validate and wire the bus.
    ///
    /// # Errors
    /// `BusError::Configuration` for a missing local address or transport, an
    /// empty metadata registry, a handler or strategy naming something
    /// unregistered, or an unresolvable mutator dependency.
    pub fn build(self) -> Result<Arc<UnicastBus>, BusError> {
        let config = Arc::new(self.config.validate()?);
        let registry = Arc::new(MessageMetadataRegistry::new(self.metadata)?);
        let (transport, sender) = self.transport.ok_or(ConfigurationError::MissingTransport)?;

        for message_type in self.handlers.handled_types() {
            registry.require(message_type)?;
        }
        for metadata in registry.iter() {
            if !self.strategies.contains_key(&metadata.dispatcher) {
                return Err(ConfigurationError::UnknownDispatchStrategy {
                    message_type: metadata.message_type.clone(),
                    strategy: metadata.dispatcher.clone(),
                }
                .into());
            }
        }

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemorySubscriptionStorage::new()));
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonMessageSerializer));
        let time = self.time.unwrap_or_else(|| Arc::new(SystemTimeSource));

        let subscriptions = Arc::new(SubscriptionManager::new(storage));
        let header_manager = Arc::new(HeaderManager::new(config.static_headers.clone()));
        let filtering = Arc::new(FilteringMutator::new(
            Arc::clone(subscriptions.predicates()),
            Arc::clone(&registry),
            config.local_address.clone(),
        ));

        let mut pipeline = MutatorPipeline::builder()
            .outgoing_transport(header_manager.clone())
            .incoming_message(header_manager)
            .outgoing_transport(Arc::new(CausationMutator))
            .outgoing_transport(Arc::new(SentTimeMutator::new(Arc::clone(&time))))
            .incoming_transport(subscriptions.clone())
            .incoming_message(filtering);
        for registration in self.mutators {
            pipeline = pipeline.register(registration);
        }
        let mutators = Arc::new(pipeline.build()?);

        let outgoing = Arc::new(OutgoingPipeline::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&mutators),
            Arc::clone(&serializer),
            Arc::clone(&sender),
        ));
        let faults = Arc::new(FaultEscalation::new(
            config.max_retries,
            config.error_queue.clone(),
            sender,
            Arc::clone(&time),
        ));
        let publisher = Publisher::new(
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            Arc::clone(&outgoing),
            Arc::clone(&faults),
        );
        let deferral = Deferral::new(
            config.timeout_manager_address(),
            Arc::clone(&outgoing),
            Arc::clone(&time),
        );
        let messaging = Arc::new(Messaging::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            outgoing,
            publisher,
            deferral,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&messaging),
            Arc::clone(&registry),
            self.handlers,
            self.strategies,
            mutators,
            serializer,
            self.units_of_work,
            time,
        ));

        info!(
            local_address = %config.local_address,
            error_queue = %config.error_queue,
            message_types = registry.len(),
            "Bus built"
        );

        Ok(Arc::new(UnicastBus {
            config,
            messaging,
            dispatcher,
            subscriptions,
            faults,
            transport,
        }))
    }
}
