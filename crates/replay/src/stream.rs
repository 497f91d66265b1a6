//! Sequential reads of a session's stored records.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use telvault_core::{keys, CaptureSession, Error, ObjectStore, Result, SignalType};
use telvault_store::{codec, Record};

/// Reads the records of one session, from the live or the archive tier.
pub struct RecordSource {
    store: Arc<dyn ObjectStore>,
    session_id: String,
    compressed: bool,
    archived: bool,
}

impl RecordSource {
    pub fn new(store: Arc<dyn ObjectStore>, session: &CaptureSession) -> Self {
        Self {
            store,
            session_id: session.session_id.clone(),
            compressed: session.compression_enabled,
            archived: session.archived_at.is_some(),
        }
    }

    /// Read and decode one record.
    ///
    /// The other tier is tried when the expected one misses, so a session
    /// archived mid-replay keeps streaming.
    pub async fn read(&self, signal: SignalType, sequence: u64) -> Result<Record> {
        let live = keys::record_key(&self.session_id, signal, sequence, self.compressed);
        let archived = keys::archive_key(&live);
        let (first, second) = if self.archived {
            (archived, live)
        } else {
            (live, archived)
        };

        let data = match self.store.get(&first).await? {
            Some(data) => data,
            None => self.store.get(&second).await?.ok_or_else(|| {
                Error::replay(
                    &self.session_id,
                    format!("record {} is missing from storage", first),
                )
            })?,
        };
        codec::decode(&data)
    }

    /// Records `0..count` of a signal, in sequence order.
    pub fn records(
        self: Arc<Self>,
        signal: SignalType,
        count: u64,
    ) -> BoxStream<'static, Result<Record>> {
        stream::iter(0..count)
            .then(move |sequence| {
                let source = self.clone();
                async move { source.read(signal, sequence).await }
            })
            .boxed()
    }
}

/// Raw payloads of a signal, ending after the first error.
pub fn payload_stream(
    source: Arc<RecordSource>,
    signal: SignalType,
    count: u64,
) -> BoxStream<'static, Result<Bytes>> {
    let mut failed = false;
    source
        .records(signal, count)
        .take_while(move |item| {
            let keep = !failed;
            failed |= item.is_err();
            futures::future::ready(keep)
        })
        .map(|item| item.map(|record| record.payload))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::TryStreamExt;
    use telvault_core::CaptureConfig;
    use telvault_store::{InMemoryObjectStore, PreparedRecord};

    async fn seed(store: &InMemoryObjectStore, session: &CaptureSession, payloads: &[&[u8]]) {
        for (seq, payload) in payloads.iter().enumerate() {
            let frame = PreparedRecord::new(payload, session.compression_enabled)
                .unwrap()
                .frame(Utc::now());
            let key = keys::record_key(
                &session.session_id,
                SignalType::Logs,
                seq as u64,
                session.compression_enabled,
            );
            store.put(&key, frame).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_payloads_in_sequence_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let session = CaptureSession::from_config(&CaptureConfig::new("s1"), Utc::now());
        seed(&store, &session, &[b"zero", b"one", b"two"]).await;

        let source = Arc::new(RecordSource::new(store, &session));
        let payloads: Vec<Bytes> = payload_stream(source, SignalType::Logs, 3)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(payloads, vec!["zero", "one", "two"]);
    }

    #[tokio::test]
    async fn test_archived_records_are_found() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut session = CaptureSession::from_config(&CaptureConfig::new("s1"), Utc::now());
        seed(&store, &session, &[b"only"]).await;
        let live = keys::record_key("s1", SignalType::Logs, 0, true);
        let data = store.get(&live).await.unwrap().unwrap();
        store.put(&keys::archive_key(&live), data).await.unwrap();
        store.delete(&live).await.unwrap();
        session.archived_at = Some(Utc::now());

        let source = RecordSource::new(store, &session);
        let record = source.read(SignalType::Logs, 0).await.unwrap();
        assert_eq!(record.payload, Bytes::from_static(b"only"));
    }

    #[tokio::test]
    async fn test_missing_record_ends_stream_with_error() {
        let store = Arc::new(InMemoryObjectStore::new());
        let session = CaptureSession::from_config(&CaptureConfig::new("s1"), Utc::now());
        seed(&store, &session, &[b"zero"]).await;

        let source = Arc::new(RecordSource::new(store, &session));
        let items: Vec<Result<Bytes>> = payload_stream(source, SignalType::Logs, 3).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Replay { .. })));
    }
}
