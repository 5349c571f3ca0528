use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{build_kafka_producer, create_kafka_producer};
use common_types::ChangeEvent;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::routing::RoutingTable;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no route for event type '{0}'")]
    RouteMiss(String),
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to produce to kafka: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to produce to kafka (timeout)")]
    Canceled,
}

impl PublishError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            PublishError::RouteMiss(_) => "route_miss",
            PublishError::Serialization(_) => "serialization",
            PublishError::Kafka(_) => "kafka",
            PublishError::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub key: String,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Appends one event to the topic its type routes to, waiting for the broker ack.
    async fn publish(&self, event: &ChangeEvent) -> Result<Published, PublishError>;
}

/// Publishes to Kafka with a producer acquired for the duration of a single
/// call, so a broken connection never outlives the message that hit it.
pub struct KafkaPublisher {
    config: KafkaConfig,
    routes: RoutingTable,
    client_id: String,
    release_timeout: Duration,
}

/// A producer held for one publish. Dropping it flushes whatever is still
/// queued, on success and failure paths alike.
struct ScopedProducer {
    producer: FutureProducer,
    release_timeout: Duration,
}

impl Drop for ScopedProducer {
    fn drop(&mut self) {
        if let Err(e) = self.producer.flush(self.release_timeout) {
            warn!("failed to flush producer on release: {}", e);
        }
    }
}

impl KafkaPublisher {
    pub fn new(config: KafkaConfig, routes: RoutingTable, client_id: String) -> Self {
        let release_timeout = Duration::from_millis(config.kafka_message_timeout_ms.into());
        Self {
            config,
            routes,
            client_id,
            release_timeout,
        }
    }

    /// Like `new`, but fails if the brokers cannot be reached.
    pub async fn connect(
        config: KafkaConfig,
        routes: RoutingTable,
        client_id: String,
    ) -> Result<Self, KafkaError> {
        create_kafka_producer(&config, &client_id).await?;
        Ok(Self::new(config, routes, client_id))
    }

    fn acquire(&self) -> Result<ScopedProducer, KafkaError> {
        Ok(ScopedProducer {
            producer: build_kafka_producer(&self.config, &self.client_id)?,
            release_timeout: self.release_timeout,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, event: &ChangeEvent) -> Result<Published, PublishError> {
        let kind = event.kind();
        let Some(topic) = self.routes.route(kind) else {
            return Err(PublishError::RouteMiss(kind.to_owned()));
        };

        let key = event.key();
        let payload = serde_json::to_string(event)?;

        let scoped = self.acquire()?;
        let delivery = scoped
            .producer
            .send_result(FutureRecord {
                topic,
                partition: None, // producer hashes the key to pick the partition
                key: Some(key.as_str()),
                payload: Some(payload.as_str()),
                timestamp: None,
                headers: None,
            })
            .map_err(|(e, _)| PublishError::Kafka(e))?;

        match delivery.await {
            Ok(Ok(_)) => {
                debug!("event {} acked on {}", key, topic);
                Ok(Published {
                    topic: topic.to_owned(),
                    key,
                })
            }
            Ok(Err((e, _))) => Err(PublishError::Kafka(e)),
            // Dropped by the producer before delivery, after message.timeout.ms
            Err(_) => Err(PublishError::Canceled),
        }
    }
}
