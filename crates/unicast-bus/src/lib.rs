//! # Unicast Bus
//!
//! Point-to-point and publish/subscribe messaging over an external queue
//! transport, with at-least-once delivery, retries, and an error queue.
//!
//! ## Purpose
//!
//! Dispatches received transport messages to application handlers, keeps the
//! subscriber list per event type, fans published events out to subscribers,
//! defers messages through a timeout manager and runs every message through
//! an ordered mutator pipeline on the way in and out.
//!
//! ## Rules
//!
//! | Rule | Enforcement Location |
//! |------|----------------------|
//! | Control messages never reach handlers | `subscriptions.rs` - incoming transport mutator |
//! | Publishing to zero subscribers succeeds | `publisher.rs` - `publish()` |
//! | One copy per subscriber, failures isolated | `publisher.rs` - `deliver()` |
//! | Retry below N failures, escalate at N | `fault.rs` - `report_failure()` |
//! | Malformed bodies skip the retry budget | `fault.rs` - `is_retryable()` check |
//! | Deferral is one redirect send, no timers | `deferral.rs` - `defer()` |
//! | Mutators run in registration order | `mutators/mod.rs` - `MutatorPipeline` |
//! | Nothing starts without a valid configuration | `bus.rs` - `BusBuilder::build()` |
//!
//! ## Receive Path
//!
//! ```text
//! Transport ──► Worker ──► Dispatcher ──► handlers
//!                 │             │
//!                 │             └── Err ──► FaultEscalation ──► Retry | Escalate
//!                 └── complete / abandon
//! ```
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - in-memory broker, subscription stores, JSON codec  │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - Bus, MessageHandler                        │
//! │  ports/outbound.rs - Transport, SubscriptionStorage, ...        │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/metadata.rs   - MessageMetadataRegistry                 │
//! │  domain/predicates.rs - SubscriptionPredicates                  │
//! │  dispatcher, publisher, deferral, fault, mutators, subscriptions│
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let broker = InMemoryBroker::new();
//! let bus = UnicastBus::builder(BusConfig::new(Address::parse("sales@host")?))
//!     .transport(broker.endpoint(Address::parse("sales@host")?))
//!     .message(MessageMetadata::command("PlaceOrder"))
//!     .handler("PlaceOrder", PlaceOrderHandler)
//!     .build()?;
//! let running = bus.start().await?;
//! // ...
//! running.shutdown().await?;
//! ```

pub mod adapters;
pub mod bus;
pub mod config;
pub mod context;
pub mod deferral;
pub mod dispatcher;
pub mod domain;
pub mod fault;
pub mod handlers;
pub mod messaging;
pub mod mutators;
pub mod outgoing;
pub mod ports;
pub mod publisher;
pub mod runtime;
pub mod subscriptions;

pub use adapters::*;
pub use bus::{BusBuilder, UnicastBus};
pub use config::{BusConfig, EndpointConfig};
pub use context::HandlerContext;
pub use dispatcher::{DispatchOutcome, DispatchStrategy, Dispatcher, InvokeInOrder};
pub use domain::*;
pub use fault::{Decision, FaultEscalation};
pub use handlers::{HandlerFactory, HandlerRegistration, HandlerRegistry};
pub use ports::*;
pub use publisher::PublishOutcome;
pub use runtime::RunningBus;
pub use subscriptions::SubscriptionManager;

pub use bus_types::{
    headers, Address, BusError, ConfigurationError, LogicalMessage, Message, MessageIntent,
    MessageType, TransportMessage,
};
