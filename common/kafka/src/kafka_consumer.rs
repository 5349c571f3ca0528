use metrics::{counter, gauge};
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, ClientContext, Statistics};
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};

/// Client context of the consumer: exports librdkafka statistics as metrics
/// instead of logging them, and logs partition assignments.
#[derive(Default)]
pub struct KafkaContext {}

impl ClientContext for KafkaContext {
    fn stats(&self, stats: Statistics) {
        for (_, broker) in stats.brokers {
            let id_string = format!("{}", broker.nodeid);
            counter!("kafka_broker_tx_errors_total", "broker" => id_string.clone())
                .absolute(broker.txerrs);
            counter!("kafka_broker_rx_errors_total", "broker" => id_string).absolute(broker.rxerrs);
        }

        for (topic, topic_stats) in stats.topics {
            // Partition -1 is librdkafka's internal unassigned partition
            for (partition, partition_stats) in
                topic_stats.partitions.into_iter().filter(|(p, _)| *p >= 0)
            {
                let labels = [
                    ("topic", topic.clone()),
                    ("partition", partition.to_string()),
                ];
                gauge!("kafka_consumer_fetch_queue_depth", &labels)
                    .set(partition_stats.fetchq_cnt as f64);
                // -1 until the partition's offsets are known
                if partition_stats.consumer_lag >= 0 {
                    gauge!("kafka_consumer_lag", &labels).set(partition_stats.consumer_lag as f64);
                }
            }
        }
    }
}

impl ConsumerContext for KafkaContext {
    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                info!("assigned {} partitions", partitions.count())
            }
            Rebalance::Revoke(partitions) => {
                info!("revoked {} partitions", partitions.count())
            }
            Rebalance::Error(e) => warn!("rebalance error: {}", e),
        }
    }
}

pub fn consumer_client_config(
    common_config: &KafkaConfig,
    consumer_config: &ConsumerConfig,
) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &common_config.kafka_hosts)
        .set(
            "broker.address.family",
            &common_config.kafka_broker_address_family,
        )
        .set(
            "statistics.interval.ms",
            common_config.kafka_statistics_interval_ms.to_string(),
        )
        .set("group.id", &consumer_config.kafka_consumer_group)
        .set(
            "auto.offset.reset",
            &consumer_config.kafka_consumer_offset_reset,
        )
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false");

    if common_config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

/// Creates a consumer subscribed to the configured topic.
///
/// Offsets are neither auto-committed nor stored: a restarted consumer
/// replays from `kafka_consumer_offset_reset`.
pub fn create_kafka_consumer(
    common_config: &KafkaConfig,
    consumer_config: &ConsumerConfig,
) -> Result<StreamConsumer<KafkaContext>, KafkaError> {
    let client_config = consumer_client_config(common_config, consumer_config);
    debug!("rdkafka consumer configuration: {:?}", client_config);

    let consumer: StreamConsumer<KafkaContext> =
        client_config.create_with_context(KafkaContext::default())?;
    consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

    info!(
        "subscribed to {} as group {}",
        consumer_config.kafka_consumer_topic, consumer_config.kafka_consumer_group
    );
    Ok(consumer)
}
