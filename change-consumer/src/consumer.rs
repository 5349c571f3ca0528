use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_consumer::KafkaContext;
use common_types::ChangeEvent;
use health::HealthHandle;
use metrics::counter;
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::KafkaError;
use rdkafka::Message;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::counters::AggregateCounters;

const MESSAGES_CONSUMED: &str = "change_consumer_messages_consumed_total";
const IDLE_POLLS: &str = "change_consumer_idle_polls_total";
const DECODE_ERRORS: &str = "change_consumer_decode_errors_total";

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("kafka error while polling: {0}")]
    Kafka(#[from] KafkaError),
}

/// Why a single message was skipped. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("message key is not valid UTF-8: {0}")]
    Key(#[from] std::str::Utf8Error),
    #[error("message has no payload")]
    MissingPayload,
    #[error(transparent)]
    Payload(#[from] common_types::DecodeError),
}

/// Owned copy of a consumed message, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl LogRecord {
    /// Key as text, empty when the producer sent none.
    pub fn key(&self) -> Result<&str, RecordError> {
        match &self.key {
            Some(key) => Ok(std::str::from_utf8(key)?),
            None => Ok(""),
        }
    }

    pub fn event(&self) -> Result<ChangeEvent, RecordError> {
        let payload = self.payload.as_deref().ok_or(RecordError::MissingPayload)?;
        Ok(ChangeEvent::from_slice(payload)?)
    }
}

/// What the loop saw before it stopped. `counters` only holds decoded messages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub counters: AggregateCounters,
    pub idle_polls: u64,
    pub skipped: u64,
}

#[derive(Debug)]
pub enum PollOutcome {
    Idle,
    Message(LogRecord),
    Error(KafkaError),
}

#[async_trait]
pub trait LogSource: Send {
    /// Waits at most `timeout` for the next message.
    async fn poll(&mut self, timeout: Duration) -> PollOutcome;
}

pub struct KafkaLogSource {
    consumer: StreamConsumer<KafkaContext>,
}

impl KafkaLogSource {
    pub fn new(consumer: StreamConsumer<KafkaContext>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl LogSource for KafkaLogSource {
    async fn poll(&mut self, timeout: Duration) -> PollOutcome {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => PollOutcome::Idle,
            Ok(Err(e)) => PollOutcome::Error(e),
            Ok(Ok(message)) => PollOutcome::Message(LogRecord {
                topic: message.topic().to_owned(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec),
            }),
        }
    }
}

/// Polls until cancelled, counting every decodable message by its type.
///
/// Idle polls and undecodable messages leave the counters untouched. An
/// error signaled by the log ends the loop, cancellation returns the stats.
pub async fn run_consumer<L>(
    source: &mut L,
    poll_timeout: Duration,
    liveness: &HealthHandle,
    shutdown: CancellationToken,
) -> Result<ConsumerStats, ConsumerError>
where
    L: LogSource + ?Sized,
{
    let mut stats = ConsumerStats::default();

    loop {
        liveness.report_healthy();

        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("consumer canceled after {} messages", stats.counters.total());
                return Ok(stats);
            }
            outcome = source.poll(poll_timeout) => outcome,
        };

        let record = match outcome {
            PollOutcome::Idle => {
                stats.idle_polls += 1;
                counter!(IDLE_POLLS).increment(1);
                info!("Waiting...");
                continue;
            }
            PollOutcome::Error(e) => {
                error!("consumer error: {}, counts so far: {}", e, stats.counters);
                return Err(ConsumerError::Kafka(e));
            }
            PollOutcome::Message(record) => record,
        };

        let decoded = record
            .key()
            .and_then(|key| record.event().map(|event| (key, event)));
        match decoded {
            Ok((key, event)) => {
                stats.counters.record(event.kind());
                counter!(MESSAGES_CONSUMED, "type" => event.kind().to_owned()).increment(1);
                info!("{} {}", key, event.kind());
            }
            Err(e) => {
                stats.skipped += 1;
                counter!(DECODE_ERRORS).increment(1);
                warn!(
                    "skipping message at {}[{}]@{}: {}",
                    record.topic, record.partition, record.offset, e
                );
            }
        }
    }
}
