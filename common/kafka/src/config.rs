use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    // Comma-separated host:port list
    #[envconfig(default = "127.0.0.1:19092,127.0.0.1:29092,127.0.0.1:39092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Local brokers advertise "localhost", which can resolve to IPv6 first
    #[envconfig(default = "v4")]
    pub kafka_broker_address_family: String, // any, v4, v6

    #[envconfig(default = "0")]
    pub kafka_producer_linger_ms: u32, // Every publish awaits its ack, batching only adds latency

    #[envconfig(default = "64")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    // Only long-lived clients (the consumer) live long enough to emit stats
    #[envconfig(default = "10000")]
    pub kafka_statistics_interval_ms: u32,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    // Offsets are never committed, so every start replays from this point
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl ConsumerConfig {
    /// Group and topic are application specific, so callers provide their defaults
    /// here before init'ing their main config struct.
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };
    }
}
