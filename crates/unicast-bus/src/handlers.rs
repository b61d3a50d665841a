//! Handler registry: message type to an ordered list of handler factories.
//!
//! Populated once while the bus is built; read-only afterwards. A factory is
//! called for every dispatch, so handlers may keep per-message state.
//! Registering the same handler twice for a type makes it run twice.

use crate::ports::MessageHandler;
use bus_types::MessageType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a handler instance for one dispatch.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn MessageHandler> + Send + Sync>;

/// One handler registered for a message type.
#[derive(Clone)]
pub struct HandlerRegistration {
    name: String,
    factory: HandlerFactory,
}

impl HandlerRegistration {
    pub fn new(name: impl Into<String>, factory: HandlerFactory) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self) -> Arc<dyn MessageHandler> {
        (self.factory)()
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Vec<HandlerRegistration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `message_type`; registration order is invocation order.
    pub fn register(
        &mut self,
        message_type: MessageType,
        name: impl Into<String>,
        factory: HandlerFactory,
    ) {
        self.handlers
            .entry(message_type)
            .or_default()
            .push(HandlerRegistration::new(name, factory));
    }

    pub fn handlers_for(&self, message_type: &MessageType) -> &[HandlerRegistration] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn handled_types(&self) -> impl Iterator<Item = &MessageType> {
        self.handlers.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
