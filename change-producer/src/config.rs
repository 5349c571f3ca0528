use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;

use crate::routing::RoutingTable;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "https://stream.wikimedia.org/v2/stream/recentchange")]
    pub stream_url: String,

    // Wikimedia rejects clients without an identifying user agent
    #[envconfig(default = "ChangeProducer/1.0 (streaming pipeline; rust/reqwest)")]
    pub user_agent: String,

    #[envconfig(default = "10")]
    pub stream_connect_timeout_secs: u64,

    // event type -> destination topic
    #[envconfig(default = "new:new_events")]
    pub routes: RoutingTable,

    #[envconfig(default = "new_event_producer")]
    pub kafka_client_id: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    // The loop reports on every frame, a feed quiet for this long fails the liveness probe
    #[envconfig(default = "60")]
    pub ingest_liveness_deadline_secs: u64,

    #[envconfig(default = "0.0.0.0:3301")]
    pub bind_address: String,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}
