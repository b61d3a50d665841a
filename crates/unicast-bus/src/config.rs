//! Configuration for the unicast bus.
//!
//! [`BusConfig`] is what callers fill in (by hand, from serde, or from the
//! environment). [`BusConfig::validate`] turns it into an [`EndpointConfig`], the
//! immutable, fully resolved settings every component receives by `Arc`.

use bus_types::{Address, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Queue name of the default error destination.
pub const DEFAULT_ERROR_QUEUE: &str = "error";

/// Sub-scope qualifier of the timeout manager.
pub const TIMEOUTS_QUALIFIER: &str = "Timeouts";

/// Sub-scope qualifier of the gateway.
pub const GATEWAY_QUALIFIER: &str = "gateway";

/// Bus configuration as supplied by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Address this endpoint receives on (required)
    pub local_address: Option<Address>,
    /// Address the timeout manager and gateway sub-addresses derive from
    pub node_address: Option<Address>,
    /// Where escalated messages go (default `error@<local host>`)
    pub error_queue: Option<Address>,
    /// Failures per message before escalation
    pub max_retries: u32,
    /// Concurrent receive workers
    pub worker_count: usize,
    /// Subscribe to remotely owned handled events at start
    pub auto_subscribe: bool,
    /// Send every message non-durably
    pub volatile: bool,
    /// Headers stamped on every outgoing message
    pub static_headers: BTreeMap<String, String>,
    /// Pause after a failed receive (milliseconds)
    pub receive_poll_backoff_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            local_address: None,
            node_address: None,
            error_queue: None,
            max_retries: 5,
            worker_count: 1,
            auto_subscribe: true,
            volatile: false,
            static_headers: BTreeMap::new(),
            receive_poll_backoff_ms: 100,
        }
    }
}

impl BusConfig {
    /// Configuration for an endpoint receiving on `local_address`.
    pub fn new(local_address: Address) -> Self {
        Self {
            local_address: Some(local_address),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_LOCAL_ADDRESS`: Local address, `queue@host` (required at validation)
    /// - `BUS_NODE_ADDRESS`: Node address (default: local address)
    /// - `BUS_ERROR_QUEUE`: Error queue (default: `error@<local host>`)
    /// - `BUS_MAX_RETRIES`: Failures before escalation (default: 5)
    /// - `BUS_WORKERS`: Receive workers (default: 1)
    /// - `BUS_AUTO_SUBSCRIBE`: Auto-subscribe at start (default: true)
    /// - `BUS_VOLATILE`: Non-durable messages (default: false)
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();
        Ok(Self {
            local_address: env_parse("BUS_LOCAL_ADDRESS")?,
            node_address: env_parse("BUS_NODE_ADDRESS")?,
            error_queue: env_parse("BUS_ERROR_QUEUE")?,
            max_retries: env_parse("BUS_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            worker_count: env_parse("BUS_WORKERS")?.unwrap_or(defaults.worker_count),
            auto_subscribe: env_flag("BUS_AUTO_SUBSCRIBE").unwrap_or(defaults.auto_subscribe),
            volatile: env_flag("BUS_VOLATILE").unwrap_or(defaults.volatile),
            static_headers: defaults.static_headers,
            receive_poll_backoff_ms: defaults.receive_poll_backoff_ms,
        })
    }

    /// Set the node address.
    #[must_use]
    pub fn with_node_address(mut self, address: Address) -> Self {
        self.node_address = Some(address);
        self
    }

    /// Set the error queue.
    #[must_use]
    pub fn with_error_queue(mut self, address: Address) -> Self {
        self.error_queue = Some(address);
        self
    }

    /// Set the retry threshold.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the number of receive workers.
    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Enable or disable auto-subscribe.
    #[must_use]
    pub fn with_auto_subscribe(mut self, enabled: bool) -> Self {
        self.auto_subscribe = enabled;
        self
    }

    /// Mark every outgoing message non-durable.
    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Add a header stamped on every outgoing message.
    #[must_use]
    pub fn with_static_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_headers.insert(key.into(), value.into());
        self
    }

    /// Check every setting and resolve defaults.
    pub fn validate(&self) -> Result<EndpointConfig, ConfigurationError> {
        let local_address = self
            .local_address
            .clone()
            .ok_or(ConfigurationError::MissingLocalAddress)?;

        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if self.worker_count == 0 {
            return Err(invalid("worker_count", "must be at least 1"));
        }

        let node_address = self
            .node_address
            .clone()
            .unwrap_or_else(|| local_address.clone());

        let error_queue = match &self.error_queue {
            Some(address) => address.clone(),
            None => Address::new(DEFAULT_ERROR_QUEUE, local_address.host())
                .map_err(|e| invalid("error_queue", e))?,
        };

        if error_queue == local_address {
            return Err(invalid("error_queue", "must differ from the local address"));
        }

        Ok(EndpointConfig {
            local_address,
            node_address,
            error_queue,
            max_retries: self.max_retries,
            worker_count: self.worker_count,
            auto_subscribe: self.auto_subscribe,
            volatile: self.volatile,
            static_headers: self.static_headers.clone(),
            receive_poll_backoff: Duration::from_millis(self.receive_poll_backoff_ms),
        })
    }
}

/// Validated, immutable endpoint settings.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub local_address: Address,
    pub node_address: Address,
    pub error_queue: Address,
    pub max_retries: u32,
    pub worker_count: usize,
    pub auto_subscribe: bool,
    pub volatile: bool,
    pub static_headers: BTreeMap<String, String>,
    pub receive_poll_backoff: Duration,
}

impl EndpointConfig {
    /// Address of the timeout manager that holds deferred messages.
    pub fn timeout_manager_address(&self) -> Address {
        self.node_address.sub_scope(TIMEOUTS_QUALIFIER)
    }

    /// Address of the gateway that forwards messages to other sites.
    pub fn gateway_address(&self) -> Address {
        self.node_address.sub_scope(GATEWAY_QUALIFIER)
    }
}

fn invalid(key: &str, reason: impl ToString) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: ToString,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().map(Some).map_err(|e| invalid(key, e)),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}
