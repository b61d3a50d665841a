//! # Bus Types Crate
//!
//! Value types shared by every component of the unicast bus.
//!
//! ## Design Principles
//!
//! - **Immutable addressing**: an [`Address`] never changes once built; sub-scoped
//!   addresses (timeouts, gateway) are derived, never mutated.
//! - **Opaque bodies**: a [`TransportMessage`] carries bytes; only the configured
//!   serializer turns them into [`LogicalMessage`]s.
//! - **One error taxonomy**: [`BusError`] separates retryable from fatal failures so
//!   fault escalation can branch on a value instead of an exception type.

pub mod address;
pub mod errors;
pub mod headers;
pub mod message;
pub mod transport;

pub use address::Address;
pub use errors::{AddressError, BusError, ConfigurationError, Result, TransportError};
pub use message::{LogicalMessage, Message, MessageType};
pub use transport::{MessageId, MessageIntent, TransportMessage};
