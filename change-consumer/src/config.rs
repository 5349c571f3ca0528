use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

pub const DEFAULT_TOPIC: &str = "wikipedia-changes";
pub const DEFAULT_GROUP: &str = "wikipedia-changes";

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "1000")]
    pub poll_timeout_ms: u64,

    #[envconfig(default = "30")]
    pub consumer_liveness_deadline_secs: u64,

    #[envconfig(default = "0.0.0.0:3302")]
    pub bind_address: String,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults(DEFAULT_GROUP, DEFAULT_TOPIC);
        Self::init_from_env()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
