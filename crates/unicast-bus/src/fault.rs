//! # Fault Escalation
//!
//! Counts failures per message id and decides between another attempt and
//! moving the message to the error queue.
//!
//! ```text
//! failure ──► attempts += 1 ──► attempts < N ──► [RETRY]
//!                                   │
//!                                   └── attempts >= N ──► copy to error queue ──► [ESCALATE]
//!                                                              │                 (record cleared)
//!                                                              └── send failed ──► Err
//!                                                                  (record kept)
//! ```
//!
//! Errors that can never succeed on another attempt (malformed bodies,
//! unknown types, invalid operations) skip the counter and escalate at once.
//! The error queue copy keeps the original id and carries `Fault.*` headers
//! describing the failure.

use crate::ports::{MessageSender, TimeSource};
use bus_telemetry::{metric_inc, DISPATCH_FAILURES, MESSAGES_ESCALATED};
use bus_types::{headers, Address, BusError, MessageId, TransportMessage};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// What to do with a message that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Leave the message for another attempt.
    Retry,
    /// The message has been copied to the error queue; drop it from the source.
    Escalate,
}

/// Per-message failure counter in front of the error queue.
pub struct FaultEscalation {
    max_retries: u32,
    error_queue: Address,
    sender: Arc<dyn MessageSender>,
    time: Arc<dyn TimeSource>,
    attempts: DashMap<MessageId, u32>,
}

impl FaultEscalation {
    pub fn new(
        max_retries: u32,
        error_queue: Address,
        sender: Arc<dyn MessageSender>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            max_retries: max_retries.max(1),
            error_queue,
            sender,
            time,
            attempts: DashMap::new(),
        }
    }

    pub fn error_queue(&self) -> &Address {
        &self.error_queue
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Failures recorded so far for `message_id`.
    pub fn attempts(&self, message_id: &str) -> u32 {
        self.attempts.get(message_id).map_or(0, |entry| *entry)
    }

    /// Forget `message_id`, typically after it was processed successfully.
    pub fn clear(&self, message_id: &str) {
        self.attempts.remove(message_id);
    }

    /// Record one failure of `message` while processing it on (or sending it
    /// to) `source`.
    ///
    /// # Errors
    /// The error queue send failed. The failure count is kept, so the next
    /// report for the same message escalates again.
    pub async fn report_failure(
        &self,
        message: &TransportMessage,
        source: &Address,
        failure: &BusError,
    ) -> Result<Decision, BusError> {
        let attempts = {
            let mut entry = self.attempts.entry(message.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if failure.is_retryable() && attempts < self.max_retries {
            metric_inc!(DISPATCH_FAILURES, &["retry"]);
            warn!(
                message_id = %message.id,
                source = %source,
                attempt = attempts,
                max_retries = self.max_retries,
                error = %failure,
                "Message failed, will retry"
            );
            return Ok(Decision::Retry);
        }

        self.move_to_error_queue(message, source, failure, attempts)
            .await?;
        self.attempts.remove(&message.id);
        Ok(Decision::Escalate)
    }

    async fn move_to_error_queue(
        &self,
        message: &TransportMessage,
        source: &Address,
        failure: &BusError,
        attempts: u32,
    ) -> Result<(), BusError> {
        let mut faulted = message.clone();
        faulted.set_header(headers::FAULT_EXCEPTION_TYPE, failure.kind());
        faulted.set_header(headers::FAULT_MESSAGE, failure.to_string());
        faulted.set_header(headers::FAULT_ATTEMPTS, attempts.to_string());
        faulted.set_header(headers::FAULT_FAILED_QUEUE, source.to_string());
        faulted.set_header(
            headers::FAULT_TIME_OF_FAILURE,
            self.time.now().to_rfc3339(),
        );

        if let Err(send_error) = self.sender.send(faulted, &self.error_queue).await {
            error!(
                message_id = %message.id,
                error_queue = %self.error_queue,
                error = %send_error,
                "Could not move message to the error queue"
            );
            return Err(send_error);
        }

        metric_inc!(DISPATCH_FAILURES, &["escalate"]);
        metric_inc!(MESSAGES_ESCALATED, &[failure.kind()]);
        error!(
            message_id = %message.id,
            source = %source,
            error_queue = %self.error_queue,
            attempts,
            error = %failure,
            "Message moved to the error queue"
        );
        Ok(())
    }
}
