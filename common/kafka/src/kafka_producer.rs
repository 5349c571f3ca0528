use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub fn producer_client_config(config: &KafkaConfig, client_id: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("client.id", client_id)
        .set(
            "broker.address.family",
            &config.kafka_broker_address_family,
        )
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &config.kafka_compression_codec)
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

/// Builds a producer without contacting the brokers.
pub fn build_kafka_producer(
    config: &KafkaConfig,
    client_id: &str,
) -> Result<FutureProducer, KafkaError> {
    let client_config = producer_client_config(config, client_id);
    debug!("rdkafka configuration: {:?}", client_config);
    client_config.create()
}

/// Builds a producer and "pings" the brokers by requesting metadata, failing
/// if they cannot be reached.
pub async fn create_kafka_producer(
    config: &KafkaConfig,
    client_id: &str,
) -> Result<FutureProducer, KafkaError> {
    let producer = build_kafka_producer(config, client_id)?;

    match producer
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers at {}. Found {} topics.",
                config.kafka_hosts,
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::create_mock_kafka;

    #[test]
    fn test_producer_config_has_no_statistics() {
        // Producers live for a single publish and never reach a stats interval
        let (_cluster, config) = create_mock_kafka(&["changes"]);
        let client_config = producer_client_config(&config, "new_event_producer");

        assert_eq!(client_config.get("statistics.interval.ms"), None);
        assert_eq!(client_config.get("client.id"), Some("new_event_producer"));
    }
}
