//! Replay sink traits.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::SignalType;

/// Destination for replayed records, typically a live OTLP ingestion endpoint.
///
/// `forward` may apply backpressure by not returning until the sink can accept
/// more; the replay engine awaits it before scheduling the next delivery.
#[async_trait]
pub trait ReplaySink: Send + Sync {
    /// Deliver one decompressed payload stamped with its target timestamp.
    async fn forward(
        &self,
        signal: SignalType,
        payload: Bytes,
        target_timestamp: DateTime<Utc>,
    ) -> Result<()>;
}
