//! `lapin`-backed Event Bus: the durable, multi-node variant of spec §4.E,
//! a direct producer/consumer pair over a persistent, JSON-encoded,
//! `correlation_id`-tagged queue.

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use crate::bus::{Delivery, EventBusError, EventConsumer, EventPublisher};
use crate::event::NormalizedEvent;

const EXCHANGE: &str = "kubernetes_events";
const ROUTING_KEY: &str = "pod_events";
const QUEUE: &str = "grader.pod_events";

pub struct LapinEventBus {
    channel: Channel,
}

impl LapinEventBus {
    pub async fn connect(amqp_url: &str) -> Result<Self, EventBusError> {
        let conn = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        channel
            .queue_declare(
                QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        channel
            .queue_bind(
                QUEUE,
                EXCHANGE,
                ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        Ok(Self { channel })
    }

    /// A consumer handle bound to the same channel. Kept separate from
    /// `publish` so the Watcher (producer-only process) never has to pull
    /// in consumer machinery.
    pub async fn consumer(&self) -> Result<LapinEventConsumer, EventBusError> {
        let consumer = self
            .channel
            .basic_consume(
                QUEUE,
                "grader-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        Ok(LapinEventConsumer {
            consumer: Mutex::new(consumer),
        })
    }
}

#[async_trait]
impl EventPublisher for LapinEventBus {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), EventBusError> {
        let body = serde_json::to_vec(event)
            .map_err(|e| EventBusError::Transport(format!("encode event: {e}")))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_content_encoding("utf-8".into())
            .with_delivery_mode(2) // persistent
            .with_correlation_id(event.correlation_id().into());

        self.channel
            .basic_publish(
                EXCHANGE,
                ROUTING_KEY,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        Ok(())
    }
}

pub struct LapinEventConsumer {
    consumer: Mutex<Consumer>,
}

#[async_trait]
impl EventConsumer for LapinEventConsumer {
    async fn receive(&self) -> Result<Option<Box<dyn Delivery>>, EventBusError> {
        let mut consumer = self.consumer.lock().await;
        match consumer.next().await {
            Some(Ok(delivery)) => {
                let event: NormalizedEvent = serde_json::from_slice(&delivery.data)
                    .map_err(|e| EventBusError::Transport(format!("decode event: {e}")))?;
                Ok(Some(Box::new(LapinDelivery { delivery, event })))
            }
            Some(Err(e)) => Err(EventBusError::Transport(e.to_string())),
            None => Ok(None),
        }
    }
}

struct LapinDelivery {
    delivery: lapin::message::Delivery,
    event: NormalizedEvent,
}

#[async_trait]
impl Delivery for LapinDelivery {
    fn event(&self) -> &NormalizedEvent {
        &self.event
    }

    async fn ack(self: Box<Self>) -> Result<(), EventBusError> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), EventBusError> {
        self.delivery
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))
    }
}
