//! Telvault - Telemetry capture, replay and retention engine.
//!
//! Records live OTLP telemetry into durable, sequence-ordered object storage,
//! replays completed sessions with adjustable timing and reclaims storage
//! under a two-tier retention policy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use telvault_capture::CaptureService;
use telvault_core::config::AppConfig;
use telvault_core::ReplaySink;
use telvault_replay::{ChannelReplaySink, HttpReplaySink, ReplayEngine};
use telvault_retention::RetentionManager;
use telvault_store::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    telvault_observability::configure_tracing(config.observability.json_logs)?;
    tracing::info!("Starting Telvault v{}", env!("CARGO_PKG_VERSION"));

    if let Some(listen) = &config.observability.metrics_listen {
        let addr: SocketAddr = listen.parse()?;
        telvault_observability::setup_metrics_listener(addr)?;
    }

    // =========================================================================
    // Storage & Session Registry
    // =========================================================================
    let store = telvault_store::build_store(&config.storage).await?;
    let registry = Arc::new(SessionRegistry::load(store).await?);

    // =========================================================================
    // Engines
    // =========================================================================
    let capture = Arc::new(CaptureService::new(
        registry.clone(),
        config.capture.continuous.clone(),
    ));
    if config.capture.continuous.enabled {
        tracing::info!(
            traces = config.capture.continuous.capture_traces,
            metrics = config.capture.continuous.capture_metrics,
            logs = config.capture.continuous.capture_logs,
            "Continuous capture enabled"
        );
    }

    let sink: Arc<dyn ReplaySink> = match &config.replay.sink_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Replaying to OTLP/HTTP receiver");
            Arc::new(HttpReplaySink::new(
                endpoint,
                Duration::from_millis(config.replay.request_timeout_ms),
            )?)
        }
        None => {
            tracing::warn!("No replay sink endpoint configured; replays are discarded");
            let (sink, mut rx) = ChannelReplaySink::new(1024);
            tokio::spawn(async move {
                while let Some(record) = rx.recv().await {
                    tracing::debug!(
                        signal = %record.signal,
                        bytes = record.payload.len(),
                        "Discarding replayed record"
                    );
                }
            });
            Arc::new(sink)
        }
    };
    let replay = ReplayEngine::new(registry.clone(), sink);

    let retention = Arc::new(RetentionManager::new(registry.clone()));
    let mut scheduler = retention.schedule_retention_jobs(&config.retention)?;

    let sessions = capture.list_capture_sessions().await;
    tracing::info!(
        sessions = sessions.len(),
        replayable = replay.list_available_replays().await.len(),
        "Telvault ready"
    );

    // =========================================================================
    // Reload on SIGHUP, exit on Ctrl-C
    // =========================================================================
    let mut reloads = reload_signals()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(()) = reloads.recv() => {
                tracing::info!("Reloading configuration");
                match AppConfig::load() {
                    Ok(new_config) => {
                        if let Err(e) = scheduler.reschedule(&new_config.retention) {
                            tracing::error!(error = %e, "Retention policy rejected; keeping previous jobs");
                        }
                        capture
                            .set_continuous_config(new_config.capture.continuous.clone())
                            .await;
                    }
                    Err(e) => tracing::error!(error = %e, "Configuration reload failed"),
                }
            }
        }
    }

    tracing::info!("Shutting down");
    drop(scheduler);
    drop(replay);
    telvault_observability::shutdown_tracing();
    Ok(())
}

/// SIGHUP notifications. Closed immediately on platforms without Unix signals.
fn reload_signals() -> anyhow::Result<tokio::sync::mpsc::Receiver<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
    }
    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}
