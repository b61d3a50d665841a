//! Ports layer for the unicast bus.
//!
//! Defines the hexagonal architecture port traits:
//! - Inbound (Driving) ports: API exposed to application code
//! - Outbound (Driven) ports: Dependencies on external systems

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
