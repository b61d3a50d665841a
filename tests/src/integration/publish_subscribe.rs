//! # Publish and Subscribe
//!
//! The catalog endpoint owns `Catalog.PriceChanged`. Storefront endpoints
//! subscribe to it over the wire and receive one copy per publish.
//!
//! ```text
//! storefront ──Subscribe──► catalog (stores subscriber)
//! catalog ──PriceChanged──► every subscriber whose predicate allows it
//! ```

#[cfg(test)]
mod tests {
    use crate::integration::support::{addr, next, recorder, wait_for_subscription, WAIT};
    use bus_types::{MessageIntent, TransportMessage};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use unicast_bus::{
        Bus, BusConfig, DispatchOutcome, FileSubscriptionStorage, InMemoryBroker,
        LogicalMessage, MessageMetadata, MessageType, RunningBus, UnicastBus,
    };

    const PRICE_CHANGED: &str = "Catalog.PriceChanged";

    fn price_changed() -> MessageMetadata {
        MessageMetadata::event(PRICE_CHANGED).owned_by(addr("catalog@host"))
    }

    fn price(sku: &str, price: u64) -> LogicalMessage {
        LogicalMessage::new(PRICE_CHANGED, json!({ "sku": sku, "price": price }))
    }

    async fn catalog(broker: &Arc<InMemoryBroker>) -> RunningBus {
        UnicastBus::builder(BusConfig::new(addr("catalog@host")))
            .transport(broker.endpoint(addr("catalog@host")))
            .message(price_changed())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_auto_subscribe_then_publish() {
        let broker = InMemoryBroker::new();
        let catalog = catalog(&broker).await;

        let (handler, mut received) = recorder();
        let storefront = UnicastBus::builder(BusConfig::new(addr("storefront@host")))
            .transport(broker.endpoint(addr("storefront@host")))
            .message(price_changed())
            .handler(PRICE_CHANGED, handler)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let message_type = MessageType::new(PRICE_CHANGED);
        assert!(
            wait_for_subscription(
                catalog.bus().subscriptions(),
                &message_type,
                &addr("storefront@host"),
                true
            )
            .await
        );

        let outcome = catalog.bus().publish(price("A-1", 20)).await.unwrap();
        assert_eq!(outcome.delivered, vec![addr("storefront@host")]);

        let (event, envelope) = next(&mut received, WAIT).await.expect("event arrives");
        assert_eq!(event.payload["sku"], "A-1");
        assert_eq!(envelope.intent, MessageIntent::Publish);

        storefront.shutdown().await.unwrap();
        catalog.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_predicate_filters_events() {
        let broker = InMemoryBroker::new();
        let catalog = catalog(&broker).await;

        let (handler, mut received) = recorder();
        let storefront = UnicastBus::builder(
            BusConfig::new(addr("storefront@host")).with_auto_subscribe(false),
        )
        .transport(broker.endpoint(addr("storefront@host")))
        .message(price_changed())
        .handler(PRICE_CHANGED, handler)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

        let message_type = MessageType::new(PRICE_CHANGED);
        storefront
            .bus()
            .subscribe(
                &message_type,
                Some(Arc::new(|m: &LogicalMessage| {
                    m.payload["price"].as_u64().unwrap_or(0) >= 10
                })),
            )
            .await
            .unwrap();
        assert!(
            wait_for_subscription(
                catalog.bus().subscriptions(),
                &message_type,
                &addr("storefront@host"),
                true
            )
            .await
        );

        // Both copies travel; the subscriber drops the cheap one on receipt.
        catalog.bus().publish(price("cheap", 5)).await.unwrap();
        catalog.bus().publish(price("dear", 50)).await.unwrap();

        let (event, _) = next(&mut received, WAIT).await.expect("event arrives");
        assert_eq!(event.payload["sku"], "dear");
        assert!(next(&mut received, Duration::from_millis(100)).await.is_none());

        storefront.shutdown().await.unwrap();
        catalog.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_over_the_wire() {
        let broker = InMemoryBroker::new();
        let catalog = catalog(&broker).await;

        let (handler, _received) = recorder();
        let storefront = UnicastBus::builder(BusConfig::new(addr("storefront@host")))
            .transport(broker.endpoint(addr("storefront@host")))
            .message(price_changed())
            .handler(PRICE_CHANGED, handler)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let message_type = MessageType::new(PRICE_CHANGED);
        let subscriber = addr("storefront@host");
        let subscriptions = catalog.bus().subscriptions();
        assert!(wait_for_subscription(subscriptions, &message_type, &subscriber, true).await);

        storefront.bus().unsubscribe(&message_type).await.unwrap();
        assert!(wait_for_subscription(subscriptions, &message_type, &subscriber, false).await);

        let outcome = catalog.bus().publish(price("A-1", 20)).await.unwrap();
        assert!(outcome.is_empty());

        storefront.shutdown().await.unwrap();
        catalog.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_subscriptions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let broker = InMemoryBroker::new();
        broker.declare(&addr("storefront@host"));

        let build = || {
            UnicastBus::builder(BusConfig::new(addr("catalog@host")))
                .transport(broker.endpoint(addr("catalog@host")))
                .subscription_storage(Arc::new(FileSubscriptionStorage::open(&path).unwrap()))
                .message(price_changed())
                .build()
                .unwrap()
        };

        let first = build();
        let subscribe = TransportMessage::control(
            MessageIntent::Subscribe,
            &MessageType::new(PRICE_CHANGED),
            &addr("storefront@host"),
        );
        let outcome = first.dispatcher().dispatch(&subscribe).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Consumed);
        drop(first);

        let restarted = build();
        let outcome = restarted.publish(price("A-1", 20)).await.unwrap();
        assert_eq!(outcome.delivered, vec![addr("storefront@host")]);
        assert_eq!(broker.pending(&addr("storefront@host")).len(), 1);
    }
}
