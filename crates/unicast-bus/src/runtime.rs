//! # Runtime
//!
//! Receive workers. Each worker pulls one message at a time, runs it through
//! the dispatcher to completion and settles it with the transport before it
//! pulls the next. A message is never held by two workers at once.
//!
//! ```text
//!            ┌─────────────── worker loop ───────────────┐
//!  receive ──► dispatch ──► Ok ───────────────► complete │
//!            │      │                                    │
//!            │      └──► Err ──► FaultEscalation         │
//!            │                    ├─ Retry ──► abandon   │
//!            │                    ├─ Escalate ► complete │
//!            │                    └─ Err ────► abandon   │
//!            └───────────────────────────────────────────┘
//! ```
//!
//! Shutdown stops workers from receiving; a dispatch already under way runs
//! to completion and is settled before the worker exits. The transport is
//! closed once every worker has stopped.

use crate::bus::UnicastBus;
use crate::fault::Decision;
use crate::ports::Transport;
use bus_telemetry::{time_histogram, DISPATCH_DURATION};
use bus_types::{BusError, MessageType, TransportMessage};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

impl UnicastBus {
    /// Auto-subscribe (when enabled) and start the receive workers.
    ///
    /// # Errors
    /// A failed auto-subscription; no worker is started in that case.
    pub async fn start(self: Arc<Self>) -> Result<RunningBus, BusError> {
        if self.config().auto_subscribe {
            let handled: Vec<MessageType> = self
                .dispatcher()
                .handlers()
                .handled_types()
                .cloned()
                .collect();
            self.messaging().auto_subscribe(&handled).await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = (0..self.config().worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    bus: Arc::clone(&self),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            local_address = %self.local_address(),
            workers = self.config().worker_count,
            "Bus started"
        );
        Ok(RunningBus {
            bus: self,
            shutdown_tx,
            workers,
        })
    }
}

/// Handle to a started bus.
pub struct RunningBus {
    bus: Arc<UnicastBus>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl RunningBus {
    pub fn bus(&self) -> &Arc<UnicastBus> {
        &self.bus
    }

    /// Stop receiving, let in-flight dispatches finish, then close the transport.
    pub async fn shutdown(self) -> Result<(), BusError> {
        info!(local_address = %self.bus.local_address(), "Initiating graceful shutdown...");

        if self.shutdown_tx.send(true).is_err() {
            debug!("All workers already stopped");
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }

        self.bus.transport().close().await?;
        info!(local_address = %self.bus.local_address(), "Shutdown complete");
        Ok(())
    }
}

struct Worker {
    id: usize,
    bus: Arc<UnicastBus>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.id, "Worker started");
        let transport = Arc::clone(self.bus.transport());

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            // Only the wait for a message is raced against shutdown.
            let received = tokio::select! {
                _ = self.shutdown.changed() => break,
                received = transport.receive() => received,
            };

            match received {
                Ok(Some(message)) => self.process(transport.as_ref(), message).await,
                Ok(None) => {
                    debug!(worker = self.id, "Transport closed");
                    break;
                }
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Receive failed, backing off");
                    tokio::time::sleep(self.bus.config().receive_poll_backoff).await;
                }
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, transport: &dyn Transport, message: TransportMessage) {
        let _timer = time_histogram!(DISPATCH_DURATION);
        let faults = self.bus.faults();

        let settled = match self.bus.dispatcher().dispatch(&message).await {
            Ok(outcome) => {
                debug!(worker = self.id, message_id = %message.id, ?outcome, "Message processed");
                faults.clear(&message.id);
                transport.complete(&message.id).await
            }
            Err(failure) => {
                match faults
                    .report_failure(&message, self.bus.local_address(), &failure)
                    .await
                {
                    Ok(Decision::Retry) => transport.abandon(message).await,
                    Ok(Decision::Escalate) => transport.complete(&message.id).await,
                    Err(e) => {
                        error!(
                            worker = self.id,
                            message_id = %message.id,
                            error = %e,
                            "Escalation failed, leaving message for redelivery"
                        );
                        transport.abandon(message).await
                    }
                }
            }
        };

        if let Err(e) = settled {
            warn!(worker = self.id, error = %e, "Could not settle message with the transport");
        }
    }
}
