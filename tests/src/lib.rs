//! # Unicast Bus Test Suite
//!
//! End-to-end flows between endpoints sharing one in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs            # handlers and waits shared by the flows
//!     ├── send_reply.rs         # point-to-point send, reply, correlation
//!     ├── publish_subscribe.rs  # subscribe over the wire, fan-out, predicates
//!     ├── faults.rs             # retry, escalation, error queue
//!     └── lifecycle.rs          # deferral hop, workers, graceful shutdown
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::faults::
//! ```
//!
//! Delivery is asynchronous, so every assertion on a remote endpoint waits
//! with a bounded timeout instead of assuming the message already arrived.

pub mod integration;
