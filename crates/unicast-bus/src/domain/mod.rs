//! Domain layer: message metadata and subscription predicates.

pub mod metadata;
pub mod predicates;

pub use metadata::{MessageKind, MessageMetadata, MessageMetadataRegistry, DEFAULT_DISPATCH_STRATEGY};
pub use predicates::{Predicate, SubscriptionPredicates};
