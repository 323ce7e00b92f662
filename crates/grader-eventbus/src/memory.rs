//! In-process Event Bus.
//!
//! Spec §4.E allows a single-node deployment to fold Watcher and Consumer
//! into one process; this is the channel that connects them without a
//! broker. It is also the fake the other crates use in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{Delivery, EventBusError, EventConsumer, EventPublisher};
use crate::event::NormalizedEvent;

pub struct InMemoryEventBus {
    sender: mpsc::UnboundedSender<NormalizedEvent>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<NormalizedEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    pub fn publisher_handle(&self) -> InMemoryEventPublisher {
        InMemoryEventPublisher {
            sender: self.sender.clone(),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct InMemoryEventPublisher {
    sender: mpsc::UnboundedSender<NormalizedEvent>,
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), EventBusError> {
        self.sender
            .send(event.clone())
            .map_err(|_| EventBusError::Closed)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), EventBusError> {
        self.sender
            .send(event.clone())
            .map_err(|_| EventBusError::Closed)
    }
}

#[async_trait]
impl EventConsumer for InMemoryEventBus {
    async fn receive(&self) -> Result<Option<Box<dyn Delivery>>, EventBusError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(event) => Ok(Some(Box::new(InMemoryDelivery {
                event,
                sender: self.sender.clone(),
            }))),
            None => Ok(None),
        }
    }
}

struct InMemoryDelivery {
    event: NormalizedEvent,
    sender: mpsc::UnboundedSender<NormalizedEvent>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn event(&self) -> &NormalizedEvent {
        &self.event
    }

    async fn ack(self: Box<Self>) -> Result<(), EventBusError> {
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), EventBusError> {
        if requeue {
            self.sender
                .send(self.event)
                .map_err(|_| EventBusError::Closed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventMeta, EventTimes, WireContainerState};

    fn sample_event(pod_name: &str) -> NormalizedEvent {
        NormalizedEvent {
            state: WireContainerState::Completed,
            meta: EventMeta {
                phase: "Succeeded".into(),
                reason: None,
                pod_name: pod_name.into(),
                pod_id: "uid-1".into(),
                outcome: None,
            },
            times: EventTimes::default(),
        }
    }

    #[tokio::test]
    async fn publish_then_receive_round_trips() {
        let bus = InMemoryEventBus::new();
        bus.publish(&sample_event("grader-a")).await.unwrap();

        let delivery = bus.receive().await.unwrap().unwrap();
        assert_eq!(delivery.event().container_ref(), "grader-a");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let bus = InMemoryEventBus::new();
        bus.publish(&sample_event("grader-b")).await.unwrap();

        let first = bus.receive().await.unwrap().unwrap();
        first.nack(true).await.unwrap();

        let second = bus.receive().await.unwrap().unwrap();
        assert_eq!(second.event().container_ref(), "grader-b");
    }
}
