//! # Send and Reply
//!
//! Point-to-point flows between two endpoints on one broker:
//!
//! ```text
//! sales ──PlaceOrder──► billing
//!   ▲                      │
//!   └───OrderBilled────────┘  (reply, correlated to PlaceOrder)
//! ```

#[cfg(test)]
mod tests {
    use crate::integration::support::{addr, next, recorder, WAIT};
    use async_trait::async_trait;
    use bus_types::{headers, Message, MessageIntent};
    use serde::{Deserialize, Serialize};
    use unicast_bus::{
        Bus, BusConfig, BusError, HandlerContext, InMemoryBroker, LogicalMessage,
        MessageHandler, MessageMetadata, UnicastBus,
    };

    #[derive(Debug, Serialize, Deserialize)]
    struct PlaceOrder {
        order_id: u64,
    }

    impl Message for PlaceOrder {
        const MESSAGE_TYPE: &'static str = "Sales.PlaceOrder";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderBilled {
        order_id: u64,
        amount: u64,
    }

    impl Message for OrderBilled {
        const MESSAGE_TYPE: &'static str = "Billing.OrderBilled";
    }

    /// Bills every order and replies to the sender.
    struct BillOrder;

    #[async_trait]
    impl MessageHandler for BillOrder {
        async fn handle(
            &self,
            message: &LogicalMessage,
            context: &HandlerContext,
        ) -> Result<(), BusError> {
            let order: PlaceOrder = message.decode()?;
            let billed = OrderBilled {
                order_id: order.order_id,
                amount: order.order_id * 10,
            };
            context.reply(LogicalMessage::from_message(&billed)?).await?;
            Ok(())
        }
    }

    fn metadata() -> [MessageMetadata; 2] {
        [
            MessageMetadata::command(PlaceOrder::MESSAGE_TYPE).owned_by(addr("billing@host")),
            MessageMetadata::message(OrderBilled::MESSAGE_TYPE),
        ]
    }

    #[tokio::test]
    async fn test_request_reply_is_correlated() {
        let broker = InMemoryBroker::new();
        let [place, billed] = metadata();

        let billing = UnicastBus::builder(BusConfig::new(addr("billing@host")))
            .transport(broker.endpoint(addr("billing@host")))
            .message(place.clone())
            .message(billed.clone())
            .handler(PlaceOrder::MESSAGE_TYPE, BillOrder)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let (handler, mut replies) = recorder();
        let sales = UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(place)
            .message(billed)
            .handler(OrderBilled::MESSAGE_TYPE, handler)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let request = sales
            .bus()
            .send(LogicalMessage::from_message(&PlaceOrder { order_id: 7 }).unwrap())
            .await
            .unwrap();

        let (reply, envelope) = next(&mut replies, WAIT).await.expect("reply arrives");
        let billed: OrderBilled = reply.decode().unwrap();
        assert_eq!(billed.order_id, 7);
        assert_eq!(billed.amount, 70);

        assert_eq!(envelope.intent, MessageIntent::Send);
        assert_eq!(envelope.correlation_id.as_deref(), Some(request.id.as_str()));
        assert_eq!(envelope.header(headers::CAUSATION_ID), Some(request.id.as_str()));
        assert_eq!(
            envelope.header(headers::CONVERSATION_ID),
            request.header(headers::CONVERSATION_ID)
        );

        sales.shutdown().await.unwrap();
        billing.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_local_reaches_own_handlers() {
        let broker = InMemoryBroker::new();
        let (handler, mut received) = recorder();

        let sales = UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(MessageMetadata::command("Sales.Recalculate"))
            .handler("Sales.Recalculate", handler)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let sent = sales
            .bus()
            .send_local(LogicalMessage::new("Sales.Recalculate", serde_json::json!({})))
            .await
            .unwrap();

        let (_, envelope) = next(&mut received, WAIT).await.expect("delivered locally");
        assert_eq!(envelope.id, sent.id);
        assert_eq!(envelope.reply_to, Some(addr("sales@host")));

        sales.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_outside_handler_is_rejected() {
        let broker = InMemoryBroker::new();
        let [place, billed] = metadata();
        let sales = UnicastBus::builder(BusConfig::new(addr("sales@host")))
            .transport(broker.endpoint(addr("sales@host")))
            .message(place)
            .message(billed)
            .build()
            .unwrap();

        let result = sales
            .reply(LogicalMessage::new(OrderBilled::MESSAGE_TYPE, serde_json::json!({})))
            .await;
        assert!(matches!(result, Err(BusError::NotReplyable)));
    }
}
