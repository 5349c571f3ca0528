use common_types::classify;
use health::HealthHandle;
use metrics::counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::publisher::EventPublisher;
use crate::source::{FrameSource, SourceError};

const FRAMES_RECEIVED: &str = "change_producer_frames_received_total";
const DECODE_ERRORS: &str = "change_producer_decode_errors_total";
const EVENTS_PUBLISHED: &str = "change_producer_events_published_total";
const PUBLISH_FAILURES: &str = "change_producer_publish_failures_total";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("event stream ended")]
    StreamEnded,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub decode_errors: u64,
    pub published: u64,
    pub not_published: u64,
}

/// Reads frames one at a time, classifying and publishing each before the
/// next is read.
///
/// Malformed frames and failed publishes are logged and skipped. A broken or
/// closed upstream ends the loop with an error, cancellation ends it with the
/// stats gathered so far.
pub async fn run_ingest<S, P>(
    source: &mut S,
    publisher: &P,
    liveness: &HealthHandle,
    shutdown: CancellationToken,
) -> Result<IngestStats, IngestError>
where
    S: FrameSource + ?Sized,
    P: EventPublisher + ?Sized,
{
    let mut stats = IngestStats::default();

    loop {
        liveness.report_healthy();

        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("ingest canceled after {} frames", stats.frames);
                return Ok(stats);
            }
            frame = source.next_frame() => frame?,
        };

        let Some(frame) = frame else {
            warn!("event stream ended after {} frames", stats.frames);
            return Err(IngestError::StreamEnded);
        };
        stats.frames += 1;
        counter!(FRAMES_RECEIVED).increment(1);

        let event = match classify(&frame.data) {
            Ok(event) => event,
            Err(e) => {
                warn!("skipping frame {:?}: {}", frame.id, e);
                stats.decode_errors += 1;
                counter!(DECODE_ERRORS).increment(1);
                continue;
            }
        };

        info!(
            "[{}] {} edited '{}' on {}",
            event.kind(),
            event.user(),
            event.title(),
            event.wiki()
        );

        match publisher.publish(&event).await {
            Ok(published) => {
                stats.published += 1;
                counter!(EVENTS_PUBLISHED, "topic" => published.topic.clone()).increment(1);
                info!(
                    "  published to '{}' (ID: {})",
                    published.topic, published.key
                );
            }
            Err(e) => {
                stats.not_published += 1;
                counter!(PUBLISH_FAILURES, "reason" => e.reason()).increment(1);
                warn!("  failed to publish event (ID: {}): {}", event.key(), e);
            }
        }
    }
}
