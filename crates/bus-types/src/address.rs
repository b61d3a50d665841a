//! # Addressing
//!
//! Logical destinations in the textual form `<queue>@<host>`.
//!
//! Queue and host are normalised to lowercase on construction, so two addresses
//! that differ only in case compare equal.

use crate::errors::AddressError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between the queue and host segments.
const HOST_SEPARATOR: char = '@';

/// Separator inserted between a queue name and a sub-scope qualifier.
const SUB_SCOPE_SEPARATOR: char = '.';

/// Identifies a logical destination: a queue on a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    queue: String,
    host: String,
}

impl Address {
    /// Host used when the textual form carries no `@host` part.
    pub const DEFAULT_HOST: &'static str = "localhost";

    /// Create an address from a queue and host.
    ///
    /// # Errors
    ///
    /// `AddressError::EmptyQueue` if the queue name is blank, and
    /// `AddressError::InvalidCharacter` if either segment contains `@`.
    pub fn new(queue: impl AsRef<str>, host: impl AsRef<str>) -> Result<Self, AddressError> {
        let queue = queue.as_ref().trim();
        let host = host.as_ref().trim();

        if queue.is_empty() {
            return Err(AddressError::EmptyQueue);
        }
        if queue.contains(HOST_SEPARATOR) || host.contains(HOST_SEPARATOR) {
            return Err(AddressError::InvalidCharacter(HOST_SEPARATOR));
        }

        let host = if host.is_empty() {
            Self::DEFAULT_HOST
        } else {
            host
        };

        Ok(Self {
            queue: queue.to_lowercase(),
            host: host.to_lowercase(),
        })
    }

    /// Parse the textual form `<queue>@<host>` (or just `<queue>`).
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        match text.split_once(HOST_SEPARATOR) {
            Some((queue, host)) => Self::new(queue, host),
            None => Self::new(text, Self::DEFAULT_HOST),
        }
    }

    /// Derive a sub-address: the qualifier is appended to the queue segment
    /// only, the host is kept.
    ///
    /// ```
    /// use bus_types::Address;
    ///
    /// let node = Address::new("endpointA", "MasterNode").unwrap();
    /// let timeouts = node.sub_scope("Timeouts");
    /// assert_eq!(timeouts.to_string(), "endpointa.timeouts@masternode");
    /// ```
    #[must_use]
    pub fn sub_scope(&self, qualifier: &str) -> Self {
        Self {
            queue: format!(
                "{}{}{}",
                self.queue,
                SUB_SCOPE_SEPARATOR,
                qualifier.trim().to_lowercase()
            ),
            host: self.host.clone(),
        }
    }

    /// The queue segment.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The host segment.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.queue, HOST_SEPARATOR, self.host)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_host() {
        let address = Address::parse("orders@server1").unwrap();
        assert_eq!(address.queue(), "orders");
        assert_eq!(address.host(), "server1");
    }

    #[test]
    fn test_parse_without_host_uses_default() {
        let address = Address::parse("orders").unwrap();
        assert_eq!(address.host(), Address::DEFAULT_HOST);
    }

    #[test]
    fn test_equality_is_case_insensitive() {
        let a = Address::new("Orders", "Server1").unwrap();
        let b = Address::parse("orders@SERVER1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sub_scope_keeps_host() {
        let node = Address::new("endpointA", "MasterNode").unwrap();
        let gateway = node.sub_scope("gateway");
        assert_eq!(gateway.queue(), "endpointa.gateway");
        assert_eq!(gateway.host(), node.host());
        assert_ne!(gateway, node);
    }

    #[test]
    fn test_empty_queue_rejected() {
        assert_eq!(Address::parse("@host"), Err(AddressError::EmptyQueue));
        assert_eq!(Address::new("  ", "host"), Err(AddressError::EmptyQueue));
    }

    #[test]
    fn test_double_separator_rejected() {
        assert!(matches!(
            Address::parse("a@b@c"),
            Err(AddressError::InvalidCharacter('@'))
        ));
    }

    #[test]
    fn test_serde_uses_textual_form() {
        let address = Address::new("billing", "node2").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"billing@node2\"");

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
