//! Event Bus contract (spec §4.E): a durable, at-least-once queue between
//! the Watcher (producer) and the Completion Consumer (consumer).

use async_trait::async_trait;

use crate::event::NormalizedEvent;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus transport error: {0}")]
    Transport(String),

    #[error("event bus is shut down")]
    Closed,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), EventBusError>;
}

/// A received message plus the ack/nack decision the consumer owes the
/// broker once it has durably advanced the corresponding Job (spec §4.F:
/// "ack only after the store transaction commits").
#[async_trait]
pub trait Delivery: Send {
    fn event(&self) -> &NormalizedEvent;

    async fn ack(self: Box<Self>) -> Result<(), EventBusError>;

    /// `requeue = true` puts the message back for redelivery (transient
    /// failure); `requeue = false` drops it (the consumer has already
    /// logged and given up, e.g. unknown `container_ref`).
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), EventBusError>;
}

#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Block until the next message arrives, or return `None` once the bus
    /// has been drained for shutdown (spec §5).
    async fn receive(&self) -> Result<Option<Box<dyn Delivery>>, EventBusError>;
}
