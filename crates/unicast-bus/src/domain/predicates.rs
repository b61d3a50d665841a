//! Subscription predicates.
//!
//! A predicate guards one `(message type, subscriber)` pair. The publisher skips
//! a subscriber whose predicate rejects the event; the filtering mutator drops
//! incoming events the local predicate rejects. Predicates live in memory only.

use bus_types::{Address, LogicalMessage, MessageType};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Evaluated against the logical message; `false` means "do not deliver".
pub type Predicate = Arc<dyn Fn(&LogicalMessage) -> bool + Send + Sync>;

/// Predicates keyed by `(message type, subscriber address)`.
#[derive(Default)]
pub struct SubscriptionPredicates {
    predicates: DashMap<(MessageType, Address), Predicate>,
}

impl SubscriptionPredicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the predicate for a pair.
    pub fn insert(&self, message_type: MessageType, subscriber: Address, predicate: Predicate) {
        self.predicates.insert((message_type, subscriber), predicate);
    }

    pub fn remove(&self, message_type: &MessageType, subscriber: &Address) {
        self.predicates
            .remove(&(message_type.clone(), subscriber.clone()));
    }

    /// Whether `subscriber` accepts `message` under every predicate registered
    /// for one of `types`. Pairs without a predicate accept everything.
    pub fn allows(
        &self,
        types: &[MessageType],
        subscriber: &Address,
        message: &LogicalMessage,
    ) -> bool {
        types.iter().all(|message_type| {
            // Clone the Arc out so the predicate runs without holding the shard lock.
            let predicate = self
                .predicates
                .get(&(message_type.clone(), subscriber.clone()))
                .map(|entry| Arc::clone(entry.value()));
            predicate.map_or(true, |p| p(message))
        })
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl fmt::Debug for SubscriptionPredicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionPredicates")
            .field("count", &self.predicates.len())
            .finish()
    }
}
