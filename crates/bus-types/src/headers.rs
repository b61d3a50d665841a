//! # Reserved Header Keys
//!
//! Header names the bus reads or writes on a [`TransportMessage`](crate::TransportMessage).
//! Application headers must not reuse these keys.

// =============================================================================
// ENVELOPE
// =============================================================================

/// Address the envelope was sent to.
pub const DESTINATION: &str = "Destination";

/// Id of the request a reply answers.
pub const CORRELATION_ID: &str = "CorrelationId";

/// Maximum time the message may wait before it is discarded, in seconds.
pub const TIME_TO_BE_RECEIVED: &str = "TimeToBeReceived";

/// One of `Send`, `Publish`, `Subscribe`, `Unsubscribe`.
pub const MESSAGE_INTENT: &str = "MessageIntent";

/// Content type of the body, set by the serializer.
pub const CONTENT_TYPE: &str = "ContentType";

/// Id of the message being handled when this one was sent.
pub const CAUSATION_ID: &str = "CausationId";

/// Id shared by every message of one conversation.
pub const CONVERSATION_ID: &str = "ConversationId";

/// RFC 3339 send time.
pub const SENT_TIME: &str = "SentTime";

/// `;`-separated logical message types carried in the body.
pub const ENCLOSED_MESSAGE_TYPES: &str = "EnclosedMessageTypes";

/// Address replies and subscription control messages go back to.
pub const REPLY_TO_ADDRESS: &str = "ReplyToAddress";

// =============================================================================
// SUBSCRIPTION CONTROL MESSAGES
// =============================================================================

/// Message type a Subscribe/Unsubscribe control message refers to.
pub const SUBSCRIPTION_MESSAGE_TYPE: &str = "SubscriptionMessageType";

// =============================================================================
// DEFERRAL
// =============================================================================

/// True destination of a deferred message.
pub const DEFER_DESTINATION: &str = "Defer.Destination";

/// RFC 3339 time at which a deferred message is due.
pub const DEFER_DELIVER_AT: &str = "Defer.DeliverAt";

// =============================================================================
// GATEWAY
// =============================================================================

/// `,`-separated site keys a gateway message is routed to.
pub const DESTINATION_SITES: &str = "DestinationSites";

// =============================================================================
// FAULTS
// =============================================================================

/// Error kind that caused the escalation.
pub const FAULT_EXCEPTION_TYPE: &str = "Fault.ExceptionType";

/// Error message that caused the escalation.
pub const FAULT_MESSAGE: &str = "Fault.Message";

/// Number of attempts made before escalation.
pub const FAULT_ATTEMPTS: &str = "Fault.Attempts";

/// Queue the message failed on.
pub const FAULT_FAILED_QUEUE: &str = "Fault.FailedQueue";

/// RFC 3339 time of the escalation.
pub const FAULT_TIME_OF_FAILURE: &str = "Fault.TimeOfFailure";

/// Separator used in [`ENCLOSED_MESSAGE_TYPES`].
pub const MESSAGE_TYPE_SEPARATOR: char = ';';

/// Headers the bus sets on every envelope it builds. Copies of these found on
/// a logical message (for example one received and sent on) are not carried
/// over to the new envelope.
pub fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        DESTINATION
            | CORRELATION_ID
            | TIME_TO_BE_RECEIVED
            | MESSAGE_INTENT
            | CONTENT_TYPE
            | CAUSATION_ID
            | SENT_TIME
            | ENCLOSED_MESSAGE_TYPES
            | REPLY_TO_ADDRESS
            | SUBSCRIPTION_MESSAGE_TYPE
            | DESTINATION_SITES
    ) || key.starts_with("Fault.")
        || key.starts_with("Defer.")
}
