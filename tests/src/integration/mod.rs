//! Cross-endpoint flows.

pub mod faults;
pub mod lifecycle;
pub mod publish_subscribe;
pub mod send_reply;

#[cfg(test)]
pub(crate) mod support;
