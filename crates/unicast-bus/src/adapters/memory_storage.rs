use crate::ports::SubscriptionStorage;
use async_trait::async_trait;
use bus_types::{Address, BusError, MessageType};
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Process-local subscription store.
///
/// Each message type's set is updated under its map entry lock, and `load`
/// returns a snapshot, so concurrent writers never produce a duplicate or a
/// half-updated result.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStorage {
    subscriptions: DashMap<MessageType, BTreeSet<Address>>,
}

impl InMemorySubscriptionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `(type, subscriber)` pairs.
    pub fn len(&self) -> usize {
        self.subscriptions.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriptionStorage for InMemorySubscriptionStorage {
    async fn load(&self, message_type: &MessageType) -> Result<BTreeSet<Address>, BusError> {
        Ok(self
            .subscriptions
            .get(message_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn save(&self, message_type: &MessageType, subscriber: &Address) -> Result<(), BusError> {
        self.subscriptions
            .entry(message_type.clone())
            .or_default()
            .insert(subscriber.clone());
        Ok(())
    }

    async fn remove(
        &self,
        message_type: &MessageType,
        subscriber: &Address,
    ) -> Result<(), BusError> {
        if let Some(mut entry) = self.subscriptions.get_mut(message_type) {
            entry.value_mut().remove(subscriber);
        }
        Ok(())
    }
}
