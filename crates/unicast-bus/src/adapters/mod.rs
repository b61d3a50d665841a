//! Adapters layer: implementations of the outbound ports.
//!
//! - `memory_broker`: queues per address in one process (`MessageSender` + `Transport`)
//! - `memory_storage` / `file_storage`: `SubscriptionStorage`
//! - `json_serializer`: `MessageSerializer`

pub mod file_storage;
pub mod json_serializer;
pub mod memory_broker;
pub mod memory_storage;

pub use file_storage::FileSubscriptionStorage;
pub use json_serializer::JsonMessageSerializer;
pub use memory_broker::{BrokerEndpoint, InMemoryBroker};
pub use memory_storage::InMemorySubscriptionStorage;
