//! # Outgoing Pipeline
//!
//! Turns logical messages into a transport message for one destination and
//! hands it to the transport. Sends, publish copies, deferrals, replies and
//! control messages all go through here:
//!
//! 1. outgoing message mutators (per logical message)
//! 2. serialize the batch
//! 3. envelope headers: enclosed types, content type, destination, reply-to,
//!    time-to-be-received, durability, plus any routing headers the caller
//!    adds (deferral, gateway)
//! 4. outgoing transport mutators
//! 5. transport send

use crate::config::EndpointConfig;
use crate::domain::MessageMetadataRegistry;
use crate::mutators::{MutationContext, MutatorPipeline};
use crate::ports::{MessageSender, MessageSerializer};
use bus_telemetry::{metric_inc, MESSAGES_SENT};
use bus_types::{
    headers, Address, BusError, LogicalMessage, MessageIntent, MessageType, TransportMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared send path.
pub struct OutgoingPipeline {
    config: Arc<EndpointConfig>,
    registry: Arc<MessageMetadataRegistry>,
    mutators: Arc<MutatorPipeline>,
    serializer: Arc<dyn MessageSerializer>,
    sender: Arc<dyn MessageSender>,
}

impl OutgoingPipeline {
    pub fn new(
        config: Arc<EndpointConfig>,
        registry: Arc<MessageMetadataRegistry>,
        mutators: Arc<MutatorPipeline>,
        serializer: Arc<dyn MessageSerializer>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            config,
            registry,
            mutators,
            serializer,
            sender,
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn registry(&self) -> &MessageMetadataRegistry {
        &self.registry
    }

    /// Build the transport message for `destination` without sending it.
    ///
    /// # Errors
    /// Mutator and serializer failures; `UnknownMessageType` for unregistered types.
    pub async fn prepare(
        &self,
        messages: Vec<LogicalMessage>,
        intent: MessageIntent,
        destination: &Address,
        correlation_id: Option<String>,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        self.prepare_with_headers(
            messages,
            intent,
            destination,
            correlation_id,
            Vec::new(),
            context,
        )
        .await
    }

    /// Like [`prepare`](Self::prepare), with extra envelope headers stamped
    /// before the outgoing transport mutators run, so they can see them.
    pub async fn prepare_with_headers(
        &self,
        messages: Vec<LogicalMessage>,
        intent: MessageIntent,
        destination: &Address,
        correlation_id: Option<String>,
        envelope_headers: Vec<(&'static str, String)>,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        if messages.is_empty() {
            return Err(BusError::InvalidOperation("no messages to send".into()));
        }

        let mut mutated = Vec::with_capacity(messages.len());
        for message in messages {
            mutated.push(self.mutators.apply_outgoing_messages(message, context).await?);
        }

        // Strictest rules of the batch win.
        let mut recoverable = !self.config.volatile;
        let mut time_to_be_received: Option<Duration> = None;
        for message in &mutated {
            let metadata = self.registry.require(&message.message_type)?;
            recoverable &= metadata.recoverable;
            if let Some(ttbr) = metadata.time_to_be_received {
                time_to_be_received = Some(time_to_be_received.map_or(ttbr, |t| t.min(ttbr)));
            }
        }

        let mut transport = TransportMessage::new(intent);
        transport.body = self.serializer.serialize(&mutated)?;
        transport.recoverable = recoverable;
        transport.time_to_be_received = time_to_be_received;
        transport.reply_to = Some(self.config.local_address.clone());

        let enclosed: Vec<&str> = mutated.iter().map(|m| m.message_type.as_str()).collect();
        let separator = headers::MESSAGE_TYPE_SEPARATOR.to_string();
        transport.set_header(
            headers::ENCLOSED_MESSAGE_TYPES,
            enclosed.join(separator.as_str()),
        );
        transport.set_header(headers::CONTENT_TYPE, self.serializer.content_type());
        transport.set_header(headers::DESTINATION, destination.to_string());
        transport.set_header(
            headers::REPLY_TO_ADDRESS,
            self.config.local_address.to_string(),
        );
        if let Some(ttbr) = time_to_be_received {
            transport.set_header(headers::TIME_TO_BE_RECEIVED, ttbr.as_secs().to_string());
        }
        if let Some(correlation_id) = correlation_id {
            transport.set_header(headers::CORRELATION_ID, correlation_id.as_str());
            transport.correlation_id = Some(correlation_id);
        }
        for (key, value) in envelope_headers {
            transport.set_header(key, value);
        }

        self.mutators
            .apply_outgoing_transport(&mut transport, &mutated, context)
            .await?;
        Ok(transport)
    }

    /// Build a Subscribe/Unsubscribe control message on behalf of this endpoint.
    pub async fn prepare_control(
        &self,
        intent: MessageIntent,
        message_type: &MessageType,
        destination: &Address,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        let mut transport =
            TransportMessage::control(intent, message_type, &self.config.local_address);
        transport.recoverable = !self.config.volatile;
        transport.set_header(headers::DESTINATION, destination.to_string());
        self.mutators
            .apply_outgoing_transport(&mut transport, &[], context)
            .await?;
        Ok(transport)
    }

    /// Hand a prepared message to the transport.
    pub async fn transmit(
        &self,
        message: TransportMessage,
        destination: &Address,
    ) -> Result<(), BusError> {
        let intent = message.intent;
        let message_id = message.id.clone();

        if let Err(error) = self.sender.send(message, destination).await {
            warn!(
                message_id = %message_id,
                destination = %destination,
                error = %error,
                "Send failed"
            );
            return Err(error);
        }

        metric_inc!(MESSAGES_SENT, &[intent.to_string().as_str()]);
        debug!(
            message_id = %message_id,
            destination = %destination,
            intent = %intent,
            "Message sent"
        );
        Ok(())
    }

    /// Prepare and transmit; returns the message as sent.
    pub async fn send(
        &self,
        messages: Vec<LogicalMessage>,
        intent: MessageIntent,
        destination: &Address,
        correlation_id: Option<String>,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        let message = self
            .prepare(messages, intent, destination, correlation_id, context)
            .await?;
        self.transmit(message.clone(), destination).await?;
        Ok(message)
    }

    /// Send an already-built envelope as is, bypassing the mutators.
    pub async fn forward(
        &self,
        message: TransportMessage,
        destination: &Address,
    ) -> Result<(), BusError> {
        self.transmit(message, destination).await
    }
}
