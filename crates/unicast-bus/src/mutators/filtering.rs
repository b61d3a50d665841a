use super::{MutateIncomingMessages, Mutator};
use crate::domain::{MessageMetadataRegistry, SubscriptionPredicates};
use async_trait::async_trait;
use bus_types::{Address, BusError, LogicalMessage, MessageIntent, TransportMessage};
use std::sync::Arc;
use tracing::debug;

/// Drops published events the local subscription predicate rejects.
///
/// Point-to-point sends are never filtered.
pub struct FilteringMutator {
    predicates: Arc<SubscriptionPredicates>,
    registry: Arc<MessageMetadataRegistry>,
    local_address: Address,
}

impl FilteringMutator {
    pub const NAME: &'static str = "FilteringMutator";

    pub fn new(
        predicates: Arc<SubscriptionPredicates>,
        registry: Arc<MessageMetadataRegistry>,
        local_address: Address,
    ) -> Self {
        Self {
            predicates,
            registry,
            local_address,
        }
    }
}

impl Mutator for FilteringMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[async_trait]
impl MutateIncomingMessages for FilteringMutator {
    async fn mutate_incoming_message(
        &self,
        message: LogicalMessage,
        transport: &TransportMessage,
    ) -> Result<Option<LogicalMessage>, BusError> {
        if transport.intent != MessageIntent::Publish {
            return Ok(Some(message));
        }

        let types = self.registry.implied_types(&message.message_type);
        if self
            .predicates
            .allows(&types, &self.local_address, &message)
        {
            Ok(Some(message))
        } else {
            debug!(
                message_id = %transport.id,
                message_type = %message.message_type,
                "Event filtered out by subscription predicate"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageMetadata;
    use serde_json::json;

    fn mutator() -> (FilteringMutator, Address) {
        let local = Address::parse("subscriber").unwrap();
        let predicates = Arc::new(SubscriptionPredicates::new());
        predicates.insert(
            "PriceChanged".into(),
            local.clone(),
            Arc::new(|m: &LogicalMessage| m.payload["price"].as_u64().unwrap_or(0) > 10),
        );
        let registry =
            Arc::new(MessageMetadataRegistry::new([MessageMetadata::event("PriceChanged")]).unwrap());
        (FilteringMutator::new(predicates, registry, local.clone()), local)
    }

    #[tokio::test]
    async fn test_rejected_event_is_dropped() {
        let (mutator, _) = mutator();
        let transport = TransportMessage::new(MessageIntent::Publish);
        let cheap = LogicalMessage::new("PriceChanged", json!({"price": 3}));
        let pricey = LogicalMessage::new("PriceChanged", json!({"price": 30}));

        assert!(mutator
            .mutate_incoming_message(cheap, &transport)
            .await
            .unwrap()
            .is_none());
        assert!(mutator
            .mutate_incoming_message(pricey, &transport)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_sends_are_not_filtered() {
        let (mutator, _) = mutator();
        let transport = TransportMessage::new(MessageIntent::Send);
        let cheap = LogicalMessage::new("PriceChanged", json!({"price": 3}));
        assert!(mutator
            .mutate_incoming_message(cheap, &transport)
            .await
            .unwrap()
            .is_some());
    }
}
