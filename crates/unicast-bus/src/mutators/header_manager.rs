use super::{MutateIncomingMessages, MutateOutgoingTransportMessages, MutationContext, Mutator};
use async_trait::async_trait;
use bus_types::{headers, BusError, LogicalMessage, TransportMessage};
use std::collections::BTreeMap;

/// Copies headers between logical messages and their envelope.
///
/// Outgoing: stamps the endpoint's static headers, then every per-message
/// header (a per-message header wins over a static one with the same key).
/// Reserved envelope headers on a message are skipped, so a received message
/// can be sent on without dragging its old routing headers along.
/// Incoming: exposes the envelope headers on each logical message so
/// handlers can read them; headers already on the message are kept.
#[derive(Debug, Clone, Default)]
pub struct HeaderManager {
    static_headers: BTreeMap<String, String>,
}

impl HeaderManager {
    pub const NAME: &'static str = "HeaderManager";

    pub fn new(static_headers: BTreeMap<String, String>) -> Self {
        Self { static_headers }
    }
}

impl Mutator for HeaderManager {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[async_trait]
impl MutateOutgoingTransportMessages for HeaderManager {
    async fn mutate_outgoing_transport(
        &self,
        transport: &mut TransportMessage,
        messages: &[LogicalMessage],
        _context: &MutationContext,
    ) -> Result<(), BusError> {
        for (key, value) in &self.static_headers {
            transport.set_header(key.as_str(), value.as_str());
        }
        for message in messages {
            for (key, value) in &message.headers {
                if !headers::is_reserved(key) {
                    transport.set_header(key.as_str(), value.as_str());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MutateIncomingMessages for HeaderManager {
    async fn mutate_incoming_message(
        &self,
        mut message: LogicalMessage,
        transport: &TransportMessage,
    ) -> Result<Option<LogicalMessage>, BusError> {
        for (key, value) in &transport.headers {
            message
                .headers
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(Some(message))
    }
}
