// Server mode - long-running socket ingester
//
// Wires the library crates into a tokio runtime:
// - Ingestion from a TCP producer (connect or listen)
// - Micro-batch sealing once per slide interval
// - Windowed aggregation with top-K reports to a sink
// - Periodic checkpoints, plus a final one on shutdown
// - Graceful shutdown on Ctrl+C / SIGTERM

use anyhow::Result;
use std::sync::Arc;
use streamtop_config::RuntimeConfig;
use tokio::signal;
use tracing::{error, info};

mod clock;
mod ingest;
mod init;
mod pipeline;
mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ingest::{run_ingest, IngestError, IngestSettings};
pub use init::init_tracing;
pub use pipeline::{run_pipeline, PipelineSettings, PipelineSummary};
pub use sink::{render_json, render_text, ChannelSink, ReportSink, StdoutSink};

/// Graceful shutdown handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point for server mode with a resolved configuration
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);

    info!(
        "streamtop - top {} tokens over {}s windows every {}s",
        config.report.top_k, config.window.length_secs, config.window.slide_secs
    );

    let store = init::init_checkpoint_store(&config)?;
    let sink = StdoutSink::new(config.report.format);
    let settings = PipelineSettings::from_config(&config);

    info!("Press Ctrl+C or send SIGTERM to stop");

    let summary = run_pipeline(
        settings,
        store,
        sink,
        Arc::new(SystemClock),
        shutdown_signal(),
    )
    .await?;

    info!(
        reports = summary.reports,
        last_sequence = summary.last_sequence,
        "Server shutdown complete"
    );

    Ok(())
}
