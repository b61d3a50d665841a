//! # In-Memory Broker
//!
//! Queues per address inside one process. Suitable for tests and single-process
//! deployments; a networked broker would implement the same ports.
//!
//! ```text
//!   BrokerEndpoint(orders) ──send──►┌──────────────┐
//!                                   │ InMemoryBroker│──receive──► BrokerEndpoint(billing)
//!   BrokerEndpoint(billing) ◄──────│  queues{...}  │
//!                                   └──────────────┘
//! ```
//!
//! Received messages move to an in-flight set until the receiver completes
//! them (gone) or abandons them (back to the front of the queue).

use crate::ports::{MessageSender, Transport};
use async_trait::async_trait;
use bus_types::{Address, BusError, MessageId, TransportError, TransportMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Default)]
struct Queue {
    pending: VecDeque<TransportMessage>,
    in_flight: HashMap<MessageId, TransportMessage>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<Address, Queue>,
    sent: Vec<(Address, TransportMessage)>,
    failures: HashMap<Address, usize>,
    unavailable: bool,
}

/// Shared set of queues.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a queue; sends to undeclared addresses fail as unreachable.
    pub fn declare(&self, address: &Address) {
        self.state.lock().queues.entry(address.clone()).or_default();
    }

    /// Declare `address` and return a transport bound to it.
    pub fn endpoint(self: &Arc<Self>, address: Address) -> Arc<BrokerEndpoint> {
        let notify = {
            let mut state = self.state.lock();
            Arc::clone(&state.queues.entry(address.clone()).or_default().notify)
        };
        Arc::new(BrokerEndpoint {
            broker: Arc::clone(self),
            address,
            notify,
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueue `message` on `destination`.
    pub fn deliver(&self, message: TransportMessage, destination: &Address) -> Result<(), BusError> {
        let mut state = self.state.lock();

        if state.unavailable {
            return Err(TransportError::Unavailable("broker is unavailable".into()).into());
        }
        if let Some(remaining) = state.failures.get_mut(destination) {
            if *remaining > 0 {
                *remaining -= 1;
                warn!(destination = %destination, "Injected send failure");
                return Err(TransportError::Unreachable(destination.clone()).into());
            }
        }

        let Some(queue) = state.queues.get_mut(destination) else {
            return Err(TransportError::Unreachable(destination.clone()).into());
        };
        queue.pending.push_back(message.clone());
        queue.notify.notify_one();

        debug!(
            message_id = %message.id,
            destination = %destination,
            intent = %message.intent,
            "Message enqueued"
        );
        state.sent.push((destination.clone(), message));
        Ok(())
    }

    /// Make the next `times` sends to `address` fail as unreachable.
    pub fn fail_next_sends(&self, address: &Address, times: usize) {
        self.state.lock().failures.insert(address.clone(), times);
    }

    /// Toggle whole-broker availability.
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Snapshot of messages waiting on `address`.
    pub fn pending(&self, address: &Address) -> Vec<TransportMessage> {
        self.state
            .lock()
            .queues
            .get(address)
            .map(|q| q.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every message waiting on `address`.
    pub fn drain(&self, address: &Address) -> Vec<TransportMessage> {
        self.state
            .lock()
            .queues
            .get_mut(address)
            .map(|q| q.pending.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of received but not yet completed messages on `address`.
    pub fn in_flight(&self, address: &Address) -> usize {
        self.state
            .lock()
            .queues
            .get(address)
            .map_or(0, |q| q.in_flight.len())
    }

    /// Every successful send, in order.
    pub fn sent_messages(&self) -> Vec<(Address, TransportMessage)> {
        self.state.lock().sent.clone()
    }

    /// Wait until at least `count` messages are pending on `address`.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait_for_pending(
        &self,
        address: &Address,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<TransportMessage>> {
        tokio::time::timeout(timeout, async {
            loop {
                let pending = self.pending(address);
                if pending.len() >= count {
                    return pending;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .ok()
    }

    fn take_next(&self, address: &Address) -> Option<TransportMessage> {
        let mut state = self.state.lock();
        let queue = state.queues.get_mut(address)?;
        let message = queue.pending.pop_front()?;
        queue.in_flight.insert(message.id.clone(), message.clone());
        Some(message)
    }

    fn complete(&self, address: &Address, message_id: &str) {
        let mut state = self.state.lock();
        if let Some(queue) = state.queues.get_mut(address) {
            if queue.in_flight.remove(message_id).is_none() {
                debug!(message_id, "Complete for unknown message ignored");
            }
        }
    }

    fn requeue(&self, address: &Address, message: TransportMessage) {
        let mut state = self.state.lock();
        if let Some(queue) = state.queues.get_mut(address) {
            queue.in_flight.remove(&message.id);
            queue.pending.push_front(message);
            queue.notify.notify_one();
        }
    }
}

/// Transport bound to one queue of an [`InMemoryBroker`].
pub struct BrokerEndpoint {
    broker: Arc<InMemoryBroker>,
    address: Address,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl BrokerEndpoint {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSender for BrokerEndpoint {
    async fn send(&self, message: TransportMessage, destination: &Address) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(TransportError::Unavailable(format!("{} is closed", self.address)).into());
        }
        self.broker.deliver(message, destination)
    }
}

#[async_trait]
impl Transport for BrokerEndpoint {
    async fn receive(&self) -> Result<Option<TransportMessage>, BusError> {
        loop {
            // Register interest before checking so a notification between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Ok(None);
            }
            if let Some(message) = self.broker.take_next(&self.address) {
                return Ok(Some(message));
            }
            notified.await;
        }
    }

    async fn complete(&self, message_id: &str) -> Result<(), BusError> {
        self.broker.complete(&self.address, message_id);
        Ok(())
    }

    async fn abandon(&self, message: TransportMessage) -> Result<(), BusError> {
        debug!(message_id = %message.id, queue = %self.address, "Message abandoned for redelivery");
        self.broker.requeue(&self.address, message);
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }
}
