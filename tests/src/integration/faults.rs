//! # Fault Handling
//!
//! A message that keeps failing is retried until its failure count reaches
//! the configured maximum and then lands in the error queue with fault
//! headers. Malformed bodies skip the retry budget.

#[cfg(test)]
mod tests {
    use crate::integration::support::{addr, next, recorder, Recorder, WAIT};
    use async_trait::async_trait;
    use bus_types::{headers, MessageIntent, TransportMessage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use unicast_bus::{
        Bus, BusConfig, BusError, HandlerContext, InMemoryBroker, LogicalMessage,
        MessageHandler, MessageMetadata, RunningBus, UnicastBus,
    };

    const PLACE_ORDER: &str = "Sales.PlaceOrder";

    /// Fails the first `failures` invocations, then hands off to a recorder.
    struct Flaky {
        failures: usize,
        calls: Arc<AtomicUsize>,
        recorder: Recorder,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(
            &self,
            message: &LogicalMessage,
            context: &HandlerContext,
        ) -> Result<(), BusError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(BusError::handler(PLACE_ORDER, "payment service unavailable"));
            }
            self.recorder.handle(message, context).await
        }
    }

    async fn billing(broker: &Arc<InMemoryBroker>, handler: Flaky) -> RunningBus {
        broker.declare(&addr("error@host"));
        UnicastBus::builder(BusConfig::new(addr("billing@host")).with_max_retries(3))
            .transport(broker.endpoint(addr("billing@host")))
            .message(MessageMetadata::command(PLACE_ORDER).owned_by(addr("billing@host")))
            .handler(PLACE_ORDER, handler)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap()
    }

    fn sales(broker: &Arc<InMemoryBroker>) -> Arc<UnicastBus> {
        UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(MessageMetadata::command(PLACE_ORDER).owned_by(addr("billing@host")))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_persistent_failure_lands_in_error_queue() {
        let broker = InMemoryBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (recorder, mut handled) = recorder();
        let billing = billing(
            &broker,
            Flaky {
                failures: usize::MAX,
                calls: Arc::clone(&calls),
                recorder,
            },
        )
        .await;

        let sent = sales(&broker)
            .send(LogicalMessage::new(PLACE_ORDER, json!({ "order_id": 1 })))
            .await
            .unwrap();

        let failed = broker
            .wait_for_pending(&addr("error@host"), 1, WAIT)
            .await
            .expect("message escalated");
        let failed = &failed[0];
        assert_eq!(failed.id, sent.id);
        assert_eq!(failed.header(headers::FAULT_ATTEMPTS), Some("3"));
        assert_eq!(failed.header(headers::FAULT_EXCEPTION_TYPE), Some("HandlerError"));
        assert_eq!(failed.header(headers::FAULT_FAILED_QUEUE), Some("billing@host"));
        assert!(failed.header(headers::FAULT_TIME_OF_FAILURE).is_some());
        assert_eq!(failed.body, sent.body);

        billing.shutdown().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(handled.try_recv().is_err());
        assert_eq!(broker.in_flight(&addr("billing@host")), 0);
        assert!(broker.pending(&addr("billing@host")).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_escalates_without_retry() {
        let broker = InMemoryBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (recorder, _handled) = recorder();
        let billing = billing(
            &broker,
            Flaky {
                failures: 0,
                calls: Arc::clone(&calls),
                recorder,
            },
        )
        .await;

        let mut garbage = TransportMessage::new(MessageIntent::Send);
        garbage.set_header(headers::ENCLOSED_MESSAGE_TYPES, PLACE_ORDER);
        garbage.body = b"{not json".to_vec();
        broker.deliver(garbage, &addr("billing@host")).unwrap();

        let failed = broker
            .wait_for_pending(&addr("error@host"), 1, WAIT)
            .await
            .expect("message escalated");
        assert_eq!(failed[0].header(headers::FAULT_ATTEMPTS), Some("1"));
        assert_eq!(
            failed[0].header(headers::FAULT_EXCEPTION_TYPE),
            Some("SerializationError")
        );

        billing.shutdown().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_before_limit() {
        let broker = InMemoryBroker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (recorder, mut handled) = recorder();
        let billing = billing(
            &broker,
            Flaky {
                failures: 2,
                calls: Arc::clone(&calls),
                recorder,
            },
        )
        .await;

        let sent = sales(&broker)
            .send(LogicalMessage::new(PLACE_ORDER, json!({ "order_id": 2 })))
            .await
            .unwrap();

        let (_, envelope) = next(&mut handled, WAIT).await.expect("third attempt succeeds");
        assert_eq!(envelope.id, sent.id);

        billing.shutdown().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(broker.pending(&addr("error@host")).is_empty());
        assert_eq!(outstanding(&broker), 0);
    }

    fn outstanding(broker: &Arc<InMemoryBroker>) -> usize {
        broker.in_flight(&addr("billing@host")) + broker.pending(&addr("billing@host")).len()
    }
}
