//! # Deferral
//!
//! Delayed delivery through the timeout manager.
//!
//! ```text
//! defer(msg, billing, t) ──► <node>.timeouts@<host>
//!                               Defer.Destination = billing@host
//!                               Defer.DeliverAt   = t
//! ```
//!
//! No local timers: the timeout manager holds the message and sends it to the
//! true destination when it is due. A delivery time that has already passed
//! skips the hop and sends straight to the destination.

use crate::mutators::MutationContext;
use crate::outgoing::OutgoingPipeline;
use crate::ports::TimeSource;
use bus_types::{headers, Address, BusError, LogicalMessage, MessageIntent, TransportMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::debug;

pub struct Deferral {
    timeout_manager: Address,
    outgoing: Arc<OutgoingPipeline>,
    time: Arc<dyn TimeSource>,
}

impl Deferral {
    pub fn new(
        timeout_manager: Address,
        outgoing: Arc<OutgoingPipeline>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            timeout_manager,
            outgoing,
            time,
        }
    }

    pub fn timeout_manager(&self) -> &Address {
        &self.timeout_manager
    }

    /// Arrange for `message` to reach `destination` at `deliver_at`.
    ///
    /// Returns the envelope as sent, to the timeout manager or directly.
    pub async fn defer(
        &self,
        message: LogicalMessage,
        destination: &Address,
        deliver_at: DateTime<Utc>,
        context: &MutationContext,
    ) -> Result<TransportMessage, BusError> {
        if deliver_at <= self.time.now() {
            debug!(
                destination = %destination,
                deliver_at = %deliver_at,
                "Delivery time has passed, sending directly"
            );
            return self
                .outgoing
                .send(vec![message], MessageIntent::Send, destination, None, context)
                .await;
        }

        let envelope = self
            .outgoing
            .prepare_with_headers(
                vec![message],
                MessageIntent::Send,
                &self.timeout_manager,
                None,
                vec![
                    (headers::DEFER_DESTINATION, destination.to_string()),
                    (
                        headers::DEFER_DELIVER_AT,
                        deliver_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    ),
                ],
                context,
            )
            .await?;

        self.outgoing
            .transmit(envelope.clone(), &self.timeout_manager)
            .await?;
        debug!(
            message_id = %envelope.id,
            destination = %destination,
            timeout_manager = %self.timeout_manager,
            deliver_at = %deliver_at,
            "Message deferred"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonMessageSerializer;
    use crate::config::BusConfig;
    use crate::domain::{MessageMetadata, MessageMetadataRegistry};
    use crate::mutators::{Mutator, MutateOutgoingTransportMessages, MutatorPipeline};
    use crate::ports::mocks::{MockTimeSource, RecordingSender};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::json;

    fn addr(text: &str) -> Address {
        Address::parse(text).unwrap()
    }

    fn deferral() -> (Deferral, Arc<RecordingSender>, Arc<MockTimeSource>) {
        deferral_with(MutatorPipeline::default())
    }

    fn deferral_with(
        mutators: MutatorPipeline,
    ) -> (Deferral, Arc<RecordingSender>, Arc<MockTimeSource>) {
        let config = Arc::new(
            BusConfig::new(addr("sales@server1"))
                .with_node_address(addr("endpointA@MasterNode"))
                .validate()
                .unwrap(),
        );
        let sender = Arc::new(RecordingSender::new());
        let time = Arc::new(MockTimeSource::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let outgoing = Arc::new(OutgoingPipeline::new(
            config.clone(),
            Arc::new(
                MessageMetadataRegistry::new([MessageMetadata::command("SendReminder")]).unwrap(),
            ),
            Arc::new(mutators),
            Arc::new(JsonMessageSerializer),
            sender.clone(),
        ));
        let deferral = Deferral::new(config.timeout_manager_address(), outgoing, time.clone());
        (deferral, sender, time)
    }

    #[tokio::test]
    async fn test_future_delivery_goes_to_timeout_manager() {
        let (deferral, sender, time) = deferral();
        let due = time.now() + chrono::Duration::minutes(10);

        deferral
            .defer(
                LogicalMessage::new("SendReminder", json!({"order": 7})),
                &addr("billing@server2"),
                due,
                &MutationContext::default(),
            )
            .await
            .unwrap();

        assert!(sender.sent_to(&addr("billing@server2")).is_empty());
        let redirected = sender.sent_to(&addr("endpointA.timeouts@MasterNode"));
        assert_eq!(redirected.len(), 1);
        assert_eq!(
            redirected[0].header(headers::DEFER_DESTINATION),
            Some("billing@server2")
        );
        assert_eq!(
            redirected[0].header(headers::DEFER_DELIVER_AT),
            Some("2024-03-01T12:10:00.000Z")
        );
    }

    #[tokio::test]
    async fn test_past_delivery_is_sent_directly() {
        let (deferral, sender, time) = deferral();
        let due = time.now() - chrono::Duration::seconds(1);

        deferral
            .defer(
                LogicalMessage::new("SendReminder", json!({})),
                &addr("billing@server2"),
                due,
                &MutationContext::default(),
            )
            .await
            .unwrap();

        let direct = sender.sent_to(&addr("billing@server2"));
        assert_eq!(direct.len(), 1);
        assert!(direct[0].header(headers::DEFER_DESTINATION).is_none());
    }

    #[tokio::test]
    async fn test_failed_redirect_is_reported() {
        let (deferral, sender, time) = deferral();
        sender.fail_next(deferral.timeout_manager(), 1);

        let result = deferral
            .defer(
                LogicalMessage::new("SendReminder", json!({})),
                &addr("billing"),
                time.now() + chrono::Duration::hours(1),
                &MutationContext::default(),
            )
            .await;
        assert!(matches!(result, Err(BusError::Transport(_))));
    }

    /// Records the defer headers it sees and rewrites the delivery time.
    #[derive(Default)]
    struct DeferAudit {
        seen: Mutex<Vec<Option<String>>>,
    }

    impl Mutator for DeferAudit {
        fn name(&self) -> &'static str {
            "DeferAudit"
        }
    }

    #[async_trait]
    impl MutateOutgoingTransportMessages for DeferAudit {
        async fn mutate_outgoing_transport(
            &self,
            transport: &mut TransportMessage,
            _messages: &[LogicalMessage],
            _context: &MutationContext,
        ) -> Result<(), BusError> {
            self.seen
                .lock()
                .push(transport.header(headers::DEFER_DESTINATION).map(str::to_string));
            transport.set_header(headers::DEFER_DELIVER_AT, "2024-03-01T13:00:00.000Z");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transport_mutators_see_defer_headers() {
        let audit = Arc::new(DeferAudit::default());
        let pipeline = MutatorPipeline::builder()
            .outgoing_transport(audit.clone())
            .build()
            .unwrap();
        let (deferral, sender, time) = deferral_with(pipeline);

        deferral
            .defer(
                LogicalMessage::new("SendReminder", json!({})),
                &addr("billing@server2"),
                time.now() + chrono::Duration::minutes(10),
                &MutationContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(*audit.seen.lock(), vec![Some("billing@server2".to_string())]);
        let redirected = sender.sent_to(deferral.timeout_manager());
        assert_eq!(
            redirected[0].header(headers::DEFER_DELIVER_AT),
            Some("2024-03-01T13:00:00.000Z")
        );
    }
}
