//! Shipped replay sinks: OTLP/HTTP forwarding and an in-process channel.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::sync::mpsc;

use telvault_core::{Error, ReplaySink, Result, SignalType};

/// Header carrying the rebased timestamp of a replayed record (RFC 3339).
pub const REPLAY_TIMESTAMP_HEADER: &str = "x-telvault-replay-timestamp";

const OTLP_PROTOBUF: &str = "application/x-protobuf";

/// Forwards records to an OTLP/HTTP receiver at `<endpoint>/v1/<signal>`.
pub struct HttpReplaySink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReplaySink {
    /// Create a sink for the receiver at `endpoint`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// URL a signal is posted to.
    pub fn url(&self, signal: SignalType) -> String {
        format!("{}/v1/{}", self.endpoint, signal)
    }
}

#[async_trait]
impl ReplaySink for HttpReplaySink {
    async fn forward(
        &self,
        signal: SignalType,
        payload: Bytes,
        target_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let url = self.url(signal);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, OTLP_PROTOBUF)
            .header(REPLAY_TIMESTAMP_HEADER, target_timestamp.to_rfc3339())
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::internal(format!("OTLP export to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::internal(format!(
                "OTLP export to {} rejected with {}",
                url, status
            )));
        }
        Ok(())
    }
}

/// A record delivered through a [`ChannelReplaySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedRecord {
    pub signal: SignalType,
    pub payload: Bytes,
    pub target_timestamp: DateTime<Utc>,
}

/// Delivers records into a bounded channel; a full channel applies
/// backpressure to the drive loop.
pub struct ChannelReplaySink {
    tx: mpsc::Sender<ReplayedRecord>,
}

impl ChannelReplaySink {
    /// Create a sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReplayedRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReplaySink for ChannelReplaySink {
    async fn forward(
        &self,
        signal: SignalType,
        payload: Bytes,
        target_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.tx
            .send(ReplayedRecord {
                signal,
                payload,
                target_timestamp,
            })
            .await
            .map_err(|_| Error::internal("replay channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_sink_posts_protobuf() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/traces")
            .match_header("content-type", OTLP_PROTOBUF)
            .match_header(REPLAY_TIMESTAMP_HEADER, mockito::Matcher::Any)
            .match_body(mockito::Matcher::Exact("otlp-bytes".into()))
            .with_status(200)
            .create_async()
            .await;

        let sink = HttpReplaySink::new(&format!("{}/", server.url()), Duration::from_secs(5)).unwrap();
        sink.forward(SignalType::Traces, Bytes::from_static(b"otlp-bytes"), Utc::now())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_sink_surfaces_rejections() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/logs")
            .with_status(503)
            .create_async()
            .await;

        let sink = HttpReplaySink::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = sink
            .forward(SignalType::Logs, Bytes::from_static(b"x"), Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_detects_close() {
        let (sink, mut rx) = ChannelReplaySink::new(4);
        let at = Utc::now();
        sink.forward(SignalType::Metrics, Bytes::from_static(b"m"), at)
            .await
            .unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.signal, SignalType::Metrics);
        assert_eq!(record.target_timestamp, at);

        drop(rx);
        assert!(sink
            .forward(SignalType::Metrics, Bytes::new(), at)
            .await
            .is_err());
    }
}
