use crate::ports::MessageSerializer;
use bus_types::{BusError, LogicalMessage};

/// Serializes a batch of logical messages as a JSON array of
/// `{"type": ..., "payload": ...}` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerializer;

impl JsonMessageSerializer {
    pub const CONTENT_TYPE: &'static str = "application/json";
}

impl MessageSerializer for JsonMessageSerializer {
    fn content_type(&self) -> &str {
        Self::CONTENT_TYPE
    }

    fn serialize(&self, messages: &[LogicalMessage]) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(messages).map_err(|e| BusError::Serialization(e.to_string()))
    }

    fn deserialize(&self, body: &[u8]) -> Result<Vec<LogicalMessage>, BusError> {
        serde_json::from_slice(body).map_err(|e| BusError::Serialization(e.to_string()))
    }
}
