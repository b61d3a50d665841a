use super::{MutateOutgoingTransportMessages, MutationContext, Mutator};
use crate::ports::TimeSource;
use async_trait::async_trait;
use bus_types::{headers, BusError, LogicalMessage, TransportMessage};
use std::sync::Arc;

/// Stamps `SentTime` (RFC 3339) on every outgoing message.
pub struct SentTimeMutator {
    time: Arc<dyn TimeSource>,
}

impl SentTimeMutator {
    pub const NAME: &'static str = "SentTimeMutator";

    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self { time }
    }
}

impl Mutator for SentTimeMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[async_trait]
impl MutateOutgoingTransportMessages for SentTimeMutator {
    async fn mutate_outgoing_transport(
        &self,
        transport: &mut TransportMessage,
        _messages: &[LogicalMessage],
        _context: &MutationContext,
    ) -> Result<(), BusError> {
        transport.set_header(headers::SENT_TIME, self.time.now().to_rfc3339());
        Ok(())
    }
}
