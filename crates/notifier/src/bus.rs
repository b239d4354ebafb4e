//! In-process domain event bus.
//!
//! A thin wrapper over a `tokio::sync::broadcast` channel: every subscriber
//! gets its own copy of each [`DomainEvent`]. Producers (appointment use-cases,
//! the birthday job, password reset) hold a cloned `EventBus` and call
//! [`EventBus::emit`]; consumers either read a raw receiver or register an
//! async handler for one [`EventKind`] with [`EventBus::on`].

use std::future::Future;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use salon_common::types::{DomainEvent, EventKind};

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum BusError {
    /// Nobody was listening, so the event was dropped.
    #[error("No subscribers for event {0}")]
    NoSubscribers(EventKind),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn emit(&self, event: DomainEvent) -> Result<usize, BusError> {
        let kind = event.kind();
        let receivers = self
            .sender
            .send(event)
            .map_err(|_| BusError::NoSubscribers(kind))?;

        tracing::debug!(event = %kind, receivers, "Event emitted");
        Ok(receivers)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `handler` for every event of `kind` until the bus is dropped.
    ///
    /// The subscription is taken before this returns, so events emitted right
    /// after the call are not missed. Handler errors are logged and the
    /// listener keeps going.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F) -> JoinHandle<()>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.kind() == kind => {
                        if let Err(e) = handler(event).await {
                            tracing::warn!(event = %kind, error = %e, "Event handler failed");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(event = %kind, skipped, "Event listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
