//! Handlers and waits shared by the integration flows.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use unicast_bus::{
    Address, BusError, HandlerContext, LogicalMessage, MessageHandler, MessageType,
    SubscriptionManager, TransportMessage,
};

/// Upper bound for anything that crosses the broker.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn addr(text: &str) -> Address {
    Address::parse(text).expect("valid test address")
}

pub type Delivery = (LogicalMessage, TransportMessage);

/// Forwards every handled message, with its envelope, to a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(
        &self,
        message: &LogicalMessage,
        context: &HandlerContext,
    ) -> Result<(), BusError> {
        // The receiver may already be gone when a test ends early.
        let _ = self
            .tx
            .send((message.clone(), context.incoming_message().clone()));
        Ok(())
    }
}

pub fn recorder() -> (Recorder, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder { tx }, rx)
}

/// Next delivery, or `None` after `within`.
pub async fn next(
    rx: &mut mpsc::UnboundedReceiver<Delivery>,
    within: Duration,
) -> Option<Delivery> {
    timeout(within, rx.recv()).await.ok().flatten()
}

/// Wait until `subscriber` is (or is no longer) subscribed to `message_type`.
pub async fn wait_for_subscription(
    manager: &Arc<SubscriptionManager>,
    message_type: &MessageType,
    subscriber: &Address,
    present: bool,
) -> bool {
    timeout(WAIT, async {
        loop {
            let subscribers = manager
                .subscribers(message_type)
                .await
                .expect("in-memory store does not fail");
            if subscribers.contains(subscriber) == present {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
