use bytes::Bytes;
use futures::TryStreamExt;
use std::sync::Arc;
use telvault_capture::CaptureService;
use telvault_core::config::ContinuousCaptureConfig;
use telvault_core::{CaptureConfig, Error, ReplayParams, ReplayState, SignalType};
use telvault_replay::{ChannelReplaySink, ReplayEngine};
use telvault_store::{InMemoryObjectStore, SessionRegistry};

fn payloads() -> Vec<Bytes> {
    (0..5)
        .map(|i| Bytes::from(format!("resourceSpans[{}] service=checkout", i).repeat(20)))
        .collect()
}

#[tokio::test]
async fn test_stream_returns_captured_bytes_in_order() {
    let registry = Arc::new(SessionRegistry::new(Arc::new(InMemoryObjectStore::new())));
    let capture = CaptureService::new(registry.clone(), ContinuousCaptureConfig::default());
    let (sink, _rx) = ChannelReplaySink::new(16);
    let replay = ReplayEngine::new(registry, Arc::new(sink));

    capture
        .start_capture(CaptureConfig::new("s1").with_signal(SignalType::Traces))
        .await
        .unwrap();
    for payload in payloads() {
        capture
            .capture_otlp_data("s1", payload, SignalType::Traces)
            .await
            .unwrap();
    }
    let session = capture.stop_capture("s1").await.unwrap();

    let streamed: Vec<Bytes> = replay
        .replay_data_stream("s1", SignalType::Traces)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(streamed.len() as u64, session.captured_traces);
    assert_eq!(streamed, payloads());

    // Each call re-reads storage.
    let again: Vec<Bytes> = replay
        .replay_data_stream("s1", SignalType::Traces)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(again, streamed);

    let empty: Vec<Bytes> = replay
        .replay_data_stream("s1", SignalType::Logs)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(empty.is_empty());

    assert!(matches!(
        replay.replay_data_stream("missing", SignalType::Traces).await,
        Err(Error::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_channel_sink_receives_replayed_records() {
    let registry = Arc::new(SessionRegistry::new(Arc::new(InMemoryObjectStore::new())));
    let capture = CaptureService::new(registry.clone(), ContinuousCaptureConfig::default());
    let (sink, mut rx) = ChannelReplaySink::new(1);
    let replay = ReplayEngine::new(registry, Arc::new(sink));

    capture
        .start_capture(
            CaptureConfig::new("s1")
                .with_signal(SignalType::Metrics)
                .with_compression(false),
        )
        .await
        .unwrap();
    for payload in payloads() {
        capture
            .capture_otlp_data("s1", payload, SignalType::Metrics)
            .await
            .unwrap();
    }
    capture.stop_capture("s1").await.unwrap();

    replay
        .start_replay(
            ReplayParams::new("s1")
                .with_signal(SignalType::Metrics)
                .with_speed(1000.0),
        )
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(rx.recv().await.unwrap().payload);
    }
    assert_eq!(received, payloads());

    let mut status = replay.subscribe("s1").unwrap();
    let done = status
        .wait_for(|s| s.status.is_terminal())
        .await
        .unwrap()
        .clone();
    assert_eq!(done.status, ReplayState::Completed);
    assert_eq!(done.processed_records, 5);
}
