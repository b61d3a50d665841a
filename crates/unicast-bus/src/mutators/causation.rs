use super::{MutateOutgoingTransportMessages, MutationContext, Mutator};
use async_trait::async_trait;
use bus_types::{headers, BusError, LogicalMessage, TransportMessage};

/// Links outgoing messages to the message being handled.
///
/// Inside a handler: `CausationId` is the incoming id and `ConversationId` is
/// carried over from the incoming message (or started from its id). Outside a
/// handler a new conversation starts at the outgoing message. An explicit
/// `ConversationId` set by the sender is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct CausationMutator;

impl CausationMutator {
    pub const NAME: &'static str = "CausationMutator";
}

impl Mutator for CausationMutator {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[async_trait]
impl MutateOutgoingTransportMessages for CausationMutator {
    async fn mutate_outgoing_transport(
        &self,
        transport: &mut TransportMessage,
        _messages: &[LogicalMessage],
        context: &MutationContext,
    ) -> Result<(), BusError> {
        let conversation = match context.incoming() {
            Some(incoming) => {
                transport.set_header(headers::CAUSATION_ID, incoming.id.as_str());
                incoming
                    .header(headers::CONVERSATION_ID)
                    .unwrap_or(&incoming.id)
                    .to_string()
            }
            None => transport.id.clone(),
        };

        if transport.header(headers::CONVERSATION_ID).is_none() {
            transport.set_header(headers::CONVERSATION_ID, conversation);
        }
        Ok(())
    }
}
