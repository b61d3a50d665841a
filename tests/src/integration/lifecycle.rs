//! # Endpoint Lifecycle
//!
//! Deferral through an external timeout manager, concurrent receive workers,
//! and graceful shutdown while a handler is still running.

#[cfg(test)]
mod tests {
    use crate::integration::support::{addr, next, recorder, Recorder, WAIT};
    use async_trait::async_trait;
    use bus_types::headers;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use unicast_bus::{
        Bus, BusConfig, BusError, HandlerContext, InMemoryBroker, LogicalMessage,
        MessageHandler, MessageMetadata, UnicastBus,
    };

    const PLACE_ORDER: &str = "Sales.PlaceOrder";

    fn place_order() -> MessageMetadata {
        MessageMetadata::command(PLACE_ORDER).owned_by(addr("billing@host"))
    }

    // -------------------------------------------------------------------------
    // Deferral
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_deferred_message_travels_through_timeout_manager() {
        let broker = InMemoryBroker::new();
        let timeouts = addr("sales.timeouts@host");
        broker.declare(&timeouts);

        let (handler, mut received) = recorder();
        let billing = UnicastBus::builder(BusConfig::new(addr("billing@host")))
            .transport(broker.endpoint(addr("billing@host")))
            .message(place_order())
            .handler(PLACE_ORDER, handler)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let sales = UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(place_order())
            .build()
            .unwrap();

        let deliver_at = Utc::now() + ChronoDuration::hours(1);
        let deferred = sales
            .defer(
                LogicalMessage::new(PLACE_ORDER, json!({ "order_id": 9 })),
                &addr("billing@host"),
                deliver_at,
            )
            .await
            .unwrap();

        // Nothing reaches billing until the timeout manager releases it.
        assert!(next(&mut received, Duration::from_millis(50)).await.is_none());

        let held = broker.drain(&timeouts);
        assert_eq!(held.len(), 1);
        let held = held.into_iter().next().unwrap();
        assert_eq!(held.id, deferred.id);
        assert_eq!(held.header(headers::DEFER_DESTINATION), Some("billing@host"));
        assert!(held.header(headers::DEFER_DELIVER_AT).is_some());

        // Stand-in timeout manager: forward to the recorded destination.
        let destination = held
            .header(headers::DEFER_DESTINATION)
            .unwrap()
            .parse()
            .unwrap();
        broker.deliver(held, &destination).unwrap();

        let (order, envelope) = next(&mut received, WAIT).await.expect("released message");
        assert_eq!(order.payload["order_id"], 9);
        assert_eq!(envelope.id, deferred.id);

        billing.shutdown().await.unwrap();
    }

    // -------------------------------------------------------------------------
    // Workers
    // -------------------------------------------------------------------------

    /// Takes a while, then reports the message.
    struct Slow {
        delay: Duration,
        started: Arc<Notify>,
        finished: Arc<AtomicBool>,
        inner: Recorder,
    }

    #[async_trait]
    impl MessageHandler for Slow {
        async fn handle(
            &self,
            message: &LogicalMessage,
            context: &HandlerContext,
        ) -> Result<(), BusError> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.inner.handle(message, context).await?;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_handle_each_message_once() {
        let broker = InMemoryBroker::new();
        let (inner, mut received) = recorder();
        let billing = UnicastBus::builder(BusConfig::new(addr("billing@host")).with_workers(4))
            .transport(broker.endpoint(addr("billing@host")))
            .message(place_order())
            .handler(
                PLACE_ORDER,
                Slow {
                    delay: Duration::from_millis(10),
                    started: Arc::new(Notify::new()),
                    finished: Arc::new(AtomicBool::new(false)),
                    inner,
                },
            )
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let sales = UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(place_order())
            .build()
            .unwrap();

        let mut sent = HashSet::new();
        for order_id in 0..20 {
            let message = sales
                .send(LogicalMessage::new(PLACE_ORDER, json!({ "order_id": order_id })))
                .await
                .unwrap();
            sent.insert(message.id);
        }

        let mut handled = HashSet::new();
        for _ in 0..20 {
            let (_, envelope) = next(&mut received, WAIT).await.expect("all messages handled");
            assert!(handled.insert(envelope.id), "message handled twice");
        }
        assert_eq!(handled, sent);
        assert!(next(&mut received, Duration::from_millis(50)).await.is_none());

        billing.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_handler() {
        let broker = InMemoryBroker::new();
        let endpoint = broker.endpoint(addr("billing@host"));
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        let (inner, _received) = recorder();

        let billing = UnicastBus::builder(BusConfig::new(addr("billing@host")))
            .transport(Arc::clone(&endpoint))
            .message(place_order())
            .handler(
                PLACE_ORDER,
                Slow {
                    delay: Duration::from_millis(200),
                    started: Arc::clone(&started),
                    finished: Arc::clone(&finished),
                    inner,
                },
            )
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(place_order())
            .build()
            .unwrap()
            .send(LogicalMessage::new(PLACE_ORDER, json!({ "order_id": 1 })))
            .await
            .unwrap();

        tokio::time::timeout(WAIT, started.notified())
            .await
            .expect("handler started");
        billing.shutdown().await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert!(endpoint.is_closed());
        assert_eq!(broker.in_flight(&addr("billing@host")), 0);
        assert!(broker.pending(&addr("billing@host")).is_empty());
    }

    /// Signals that it started, then fails after a pause.
    struct FailsLate {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl MessageHandler for FailsLate {
        async fn handle(&self, _: &LogicalMessage, _: &HandlerContext) -> Result<(), BusError> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err(BusError::handler(PLACE_ORDER, "ledger unavailable"))
        }
    }

    #[tokio::test]
    async fn test_shutdown_settles_failing_in_flight_handler() {
        let broker = InMemoryBroker::new();
        broker.declare(&addr("error@host"));
        let endpoint = broker.endpoint(addr("billing@host"));
        let started = Arc::new(Notify::new());

        let billing =
            UnicastBus::builder(BusConfig::new(addr("billing@host")).with_max_retries(1))
                .transport(Arc::clone(&endpoint))
                .message(place_order())
                .handler(
                    PLACE_ORDER,
                    FailsLate {
                        started: Arc::clone(&started),
                    },
                )
                .build()
                .unwrap()
                .start()
                .await
                .unwrap();

        let sent = UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(place_order())
            .build()
            .unwrap()
            .send(LogicalMessage::new(PLACE_ORDER, json!({ "order_id": 3 })))
            .await
            .unwrap();

        tokio::time::timeout(WAIT, started.notified())
            .await
            .expect("handler started");
        billing.shutdown().await.unwrap();

        // The failure is settled before shutdown returns: escalated, not redelivered.
        let failed = broker.pending(&addr("error@host"));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, sent.id);
        assert_eq!(failed[0].header(headers::FAULT_ATTEMPTS), Some("1"));
        assert!(endpoint.is_closed());
        assert_eq!(broker.in_flight(&addr("billing@host")), 0);
        assert!(broker.pending(&addr("billing@host")).is_empty());
    }
}
