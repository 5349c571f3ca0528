use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::sse::{Frame, SseDecoder};

pub const EVENT_STREAM_MIME: &str = "text/event-stream";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to read from the event stream: {0}")]
    Read(#[source] reqwest::Error),
}

/// A sequence of raw frames. `Ok(None)` means the upstream closed the
/// connection and no more frames will come from this source.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// A live server-sent-events connection. Not restartable: once the stream
/// ends or fails, open a new one.
pub struct EventSource {
    body: ByteStream,
    decoder: SseDecoder,
    closed: bool,
}

impl EventSource {
    pub async fn open(
        client: &reqwest::Client,
        url: &str,
        user_agent: &str,
    ) -> Result<Self, SourceError> {
        info!("connecting to event stream at {}", url);

        let response = client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .send()
            .await
            .map_err(|source| SourceError::Connect {
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_owned(),
                status,
            });
        }

        info!("connected to event stream at {}", url);
        Ok(Self {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::default(),
            closed: false,
        })
    }
}

#[async_trait]
impl FrameSource for EventSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            while let Some(frame) = self.decoder.next_frame() {
                // Messages with an empty data field carry nothing to classify
                if frame.data.is_empty() {
                    debug!("skipping empty frame");
                    continue;
                }
                return Ok(Some(frame));
            }

            if self.closed {
                return Ok(None);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(SourceError::Read(e));
                }
                None => {
                    info!(
                        "event stream closed by upstream, advertised retry: {:?}",
                        self.decoder.retry()
                    );
                    self.closed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const USER_AGENT_VALUE: &str = "ChangeProducer/1.0 (test)";

    #[tokio::test]
    async fn test_reads_frames_with_stream_headers() {
        let server = MockServer::start();
        let stream = server.mock(|when, then| {
            when.method(GET)
                .path("/v2/stream/recentchange")
                .header("user-agent", USER_AGENT_VALUE)
                .header("accept", EVENT_STREAM_MIME);
            then.status(200)
                .header("content-type", EVENT_STREAM_MIME)
                .body(
                    ":ok\n\n\
                     event: message\nid: 1\ndata: {\"id\":1,\"type\":\"new\"}\n\n\
                     data:\n\n\
                     event: message\nid: 2\ndata: not-json\n\n",
                );
        });

        let client = reqwest::Client::new();
        let mut source = EventSource::open(
            &client,
            &server.url("/v2/stream/recentchange"),
            USER_AGENT_VALUE,
        )
        .await
        .expect("failed to open stream");

        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.data, "{\"id\":1,\"type\":\"new\"}");
        assert_eq!(first.id.as_deref(), Some("1"));

        // Malformed payloads are surfaced as-is, the empty one is skipped
        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(second.data, "not-json");

        assert!(source.next_frame().await.unwrap().is_none());
        assert!(source.next_frame().await.unwrap().is_none());
        stream.assert();
    }

    #[tokio::test]
    async fn test_error_status_fails_open() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/stream");
            then.status(403).body("missing user agent");
        });

        let client = reqwest::Client::new();
        let result = EventSource::open(&client, &server.url("/stream"), USER_AGENT_VALUE).await;
        match result {
            Err(SourceError::Status { status, .. }) => assert_eq!(status, StatusCode::FORBIDDEN),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("should have failed"),
        }
    }

    #[tokio::test]
    async fn test_connection_dropped_mid_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let upstream = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending its request");
                request.extend_from_slice(&buf[..n]);
            }

            // One full frame, then a chunk announcing 64 bytes cut short
            let frame = "data: {\"id\":1,\"type\":\"new\"}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: {EVENT_STREAM_MIME}\r\ntransfer-encoding: chunked\r\n\r\n\
                 {:x}\r\n{frame}\r\n40\r\ndata: {{\"id\":2",
                frame.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });

        let client = reqwest::Client::new();
        let mut source = EventSource::open(&client, &format!("http://{addr}/stream"), USER_AGENT_VALUE)
            .await
            .expect("failed to open stream");

        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.data, "{\"id\":1,\"type\":\"new\"}");

        assert!(matches!(
            source.next_frame().await,
            Err(SourceError::Read(_))
        ));
        // The partial frame is never surfaced, the source stays closed
        assert!(source.next_frame().await.unwrap().is_none());

        upstream.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_upstream_fails_open() {
        let client = reqwest::Client::new();
        let result = EventSource::open(&client, "http://127.0.0.1:1/stream", USER_AGENT_VALUE).await;
        assert!(matches!(result, Err(SourceError::Connect { .. })));
    }
}
