// Pipeline orchestration
//
// Tasks:
// - ingestion: socket -> assembler
// - sealer: seals the assembler once per slide interval into a bounded queue
// - aggregation (this task): owns the window, reports every tick, offers
//   state to the checkpoint worker on its own cadence
// - checkpoint worker: serial writes, fed by a capacity-1 queue
//
// Window state is only ever mutated here; other tasks receive clones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use streamtop_batch::{AssemblerConfig, MicroBatchAssembler};
use streamtop_checkpoint::CheckpointStore;
use streamtop_config::RuntimeConfig;
use streamtop_core::{Batch, Report, WindowConfig, WindowError, WindowState, WindowedAggregator};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::ingest::{run_ingest, IngestError, IngestSettings};
use crate::sink::ReportSink;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub window: WindowConfig,
    pub top_k: usize,
    pub queue_capacity: usize,
    pub checkpoint_interval: Duration,
    pub assembler: AssemblerConfig,
    pub ingest: IngestSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            window: WindowConfig::new(config.window.length(), config.window.slide()),
            top_k: config.report.top_k,
            queue_capacity: config.pipeline.queue_capacity,
            checkpoint_interval: config.checkpoint.interval(),
            assembler: AssemblerConfig {
                max_pending_tokens: config.ingest.max_pending_tokens,
            },
            ingest: IngestSettings::from(&config.ingest),
        }
    }

    /// How long the aggregation loop waits for a batch before reporting on
    /// its own, so reports keep their cadence while the sealer is stalled.
    fn idle_timeout(&self) -> Duration {
        self.window.slide
    }
}

/// What a finished pipeline run looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub batches: u64,
    pub reports: u64,
    pub last_sequence: u64,
    pub final_checkpoint_written: bool,
}

/// Window aggregation plus reporting, without any of the async plumbing.
pub(crate) struct Aggregation {
    aggregator: WindowedAggregator,
    top_k: usize,
}

impl Aggregation {
    pub(crate) fn new(aggregator: WindowedAggregator, top_k: usize) -> Self {
        Self { aggregator, top_k }
    }

    /// Add a sealed batch, then expire and report as of its seal time.
    pub(crate) fn on_batch(&mut self, batch: Batch) -> Result<Report, WindowError> {
        let timestamp_ms = batch.timestamp_ms();
        let sequence = batch.sequence();
        let tokens = batch.total_tokens();

        self.aggregator.add_batch(batch)?;
        counter!("streamtop.window.batches_added", 1);
        debug!(sequence, tokens, "Batch added to window");

        Ok(self.tick(timestamp_ms))
    }

    /// No batch arrived in time: expire against the clock and report anyway.
    pub(crate) fn on_idle(&mut self, now_ms: i64) -> Report {
        self.tick(now_ms)
    }

    fn tick(&mut self, now_ms: i64) -> Report {
        let expired = self.aggregator.expire_old_batches(now_ms);
        if expired.batches > 0 {
            counter!("streamtop.window.batches_expired", expired.batches as u64);
            debug!(
                batches = expired.batches,
                tokens_removed = expired.tokens_removed,
                "Expired batches out of the window"
            );
        }

        let state = self.aggregator.state();
        gauge!("streamtop.window.tokens", state.distinct_tokens() as f64);
        gauge!(
            "streamtop.window.batches",
            state.retained_batches().len() as f64
        );

        Report::from_snapshot(&self.aggregator.snapshot(now_ms), self.top_k)
    }

    pub(crate) fn state(&self) -> &WindowState {
        self.aggregator.state()
    }

    pub(crate) fn last_sequence(&self) -> u64 {
        self.aggregator.last_sequence()
    }
}

enum Stop {
    Shutdown,
    Fatal(anyhow::Error),
}

/// Run the whole pipeline until `shutdown` resolves or a fatal error occurs.
///
/// On the way out, ingestion is stopped, the assembler is sealed one last
/// time, queued batches are drained into the window and a final checkpoint
/// is written.
pub async fn run_pipeline<S, F>(
    settings: PipelineSettings,
    store: CheckpointStore,
    mut sink: S,
    clock: Arc<dyn Clock>,
    shutdown: F,
) -> Result<PipelineSummary>
where
    S: ReportSink,
    F: Future<Output = ()>,
{
    let restored = store.load_or_empty().await;
    let assembler =
        MicroBatchAssembler::resume_after(settings.assembler.clone(), restored.last_sequence());
    let mut aggregation = Aggregation::new(
        WindowedAggregator::with_state(settings.window, restored),
        settings.top_k,
    );

    info!(
        window_secs = settings.window.length.as_secs_f64(),
        slide_secs = settings.window.slide.as_secs_f64(),
        top_k = settings.top_k,
        next_sequence = assembler.next_sequence(),
        "Pipeline starting"
    );

    let (ingest_stop_tx, ingest_stop_rx) = watch::channel(false);
    let mut ingest_task = tokio::spawn(run_ingest(
        settings.ingest.clone(),
        assembler.clone(),
        ingest_stop_rx,
    ));

    let (batch_tx, mut batch_rx) = mpsc::channel(settings.queue_capacity);
    let (sealer_stop_tx, sealer_stop_rx) = oneshot::channel();
    let sealer_task = tokio::spawn(run_sealer(
        assembler,
        settings.window.slide,
        Arc::clone(&clock),
        batch_tx,
        sealer_stop_rx,
    ));

    let (checkpoint_tx, checkpoint_task) = spawn_checkpoint_worker(store.clone(), Arc::clone(&clock));

    let mut summary = PipelineSummary::default();
    let mut ingest_finished = false;
    let mut last_checkpoint = Instant::now();
    let idle_timeout = settings.idle_timeout();
    tokio::pin!(shutdown);

    let stop = loop {
        let received = tokio::select! {
            biased;
            _ = &mut shutdown => break Stop::Shutdown,
            joined = &mut ingest_task, if !ingest_finished => {
                ingest_finished = true;
                match ingest_outcome(joined) {
                    Ok(()) => continue,
                    Err(e) => break Stop::Fatal(e),
                }
            }
            received = tokio::time::timeout(idle_timeout, batch_rx.recv()) => received,
        };

        let report = match received {
            Ok(Some(batch)) => {
                summary.batches += 1;
                match aggregation.on_batch(batch) {
                    Ok(report) => report,
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Batch rejected; stopping");
                        break Stop::Fatal(e.into());
                    }
                    Err(e) => {
                        warn!(error = %e, "Batch rejected; skipping");
                        continue;
                    }
                }
            }
            Ok(None) => {
                break Stop::Fatal(anyhow::anyhow!("batch sealer stopped unexpectedly"));
            }
            Err(_elapsed) => {
                debug!("No batch within the slide interval; reporting from the clock");
                aggregation.on_idle(clock.now_ms())
            }
        };

        emit(&mut sink, &report, &mut summary);

        if last_checkpoint.elapsed() >= settings.checkpoint_interval {
            offer_checkpoint(&checkpoint_tx, aggregation.state());
            last_checkpoint = Instant::now();
        }
    };

    match &stop {
        Stop::Shutdown => info!("Shutdown requested; draining pipeline"),
        Stop::Fatal(e) => error!(error = %e, "Pipeline stopping after fatal error"),
    }

    // Stop ingestion first so the final seal holds everything that was read
    let _ = ingest_stop_tx.send(true);
    if !ingest_finished {
        if let Err(e) = ingest_outcome(ingest_task.await) {
            warn!(error = %e, "Ingestion ended with an error during shutdown");
        }
    }

    let _ = sealer_stop_tx.send(());
    let mut fatal = match stop {
        Stop::Fatal(e) => Some(e),
        Stop::Shutdown => None,
    };

    while let Some(batch) = batch_rx.recv().await {
        if fatal.is_some() {
            debug!(sequence = batch.sequence(), "Discarding batch after fatal error");
            continue;
        }
        summary.batches += 1;
        match aggregation.on_batch(batch) {
            Ok(report) => emit(&mut sink, &report, &mut summary),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Batch rejected while draining");
                fatal = Some(e.into());
            }
            Err(e) => warn!(error = %e, "Batch rejected while draining; skipping"),
        }
    }
    if let Err(e) = sealer_task.await {
        warn!(error = %e, "Sealer task failed");
    }

    // Let any in-flight write finish, then write the final state ourselves
    drop(checkpoint_tx);
    if let Err(e) = checkpoint_task.await {
        warn!(error = %e, "Checkpoint worker failed");
    }
    summary.last_sequence = aggregation.last_sequence();
    match store.save(aggregation.state(), clock.now_ms()).await {
        Ok(()) => {
            summary.final_checkpoint_written = true;
            info!(last_sequence = summary.last_sequence, "Final checkpoint written");
        }
        Err(e) => error!(error = %e, "Final checkpoint failed"),
    }

    info!(
        batches = summary.batches,
        reports = summary.reports,
        last_sequence = summary.last_sequence,
        "Pipeline stopped"
    );

    match fatal {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

fn ingest_outcome(joined: Result<Result<(), IngestError>, tokio::task::JoinError>) -> Result<()> {
    joined
        .context("Ingestion task panicked")?
        .context("Ingestion failed")
}

fn emit<S: ReportSink>(sink: &mut S, report: &Report, summary: &mut PipelineSummary) {
    match sink.emit(report) {
        Ok(()) => {
            summary.reports += 1;
            counter!("streamtop.reports.emitted", 1);
        }
        Err(e) => {
            warn!(error = %e, "Report sink failed");
            counter!("streamtop.reports.failed", 1);
        }
    }
}

/// Seal once per slide interval; seal one final time when told to stop.
async fn run_sealer(
    assembler: MicroBatchAssembler,
    slide: Duration,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<Batch>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + slide, slide);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stopping = tokio::select! {
            biased;
            _ = &mut stop => true,
            _ = ticker.tick() => false,
        };

        let batch = assembler.seal(clock.now_ms());
        debug!(
            sequence = batch.sequence(),
            tokens = batch.total_tokens(),
            distinct = batch.distinct_tokens(),
            "Sealed batch"
        );

        if tx.send(batch).await.is_err() {
            debug!("Batch queue closed; sealer exiting");
            return;
        }
        if stopping {
            return;
        }
    }
}

fn spawn_checkpoint_worker(
    store: CheckpointStore,
    clock: Arc<dyn Clock>,
) -> (mpsc::Sender<WindowState>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WindowState>(1);
    let handle = tokio::spawn(async move {
        while let Some(state) = rx.recv().await {
            match store.save(&state, clock.now_ms()).await {
                Ok(()) => counter!("streamtop.checkpoint.writes", 1),
                Err(e) => {
                    warn!(
                        error = %e,
                        last_sequence = state.last_sequence(),
                        "Checkpoint write failed; retrying at next interval"
                    );
                    counter!("streamtop.checkpoint.failures", 1);
                }
            }
        }
    });
    (tx, handle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckpointOffer {
    Queued,
    Skipped,
    WorkerGone,
}

fn offer_checkpoint(tx: &mpsc::Sender<WindowState>, state: &WindowState) -> CheckpointOffer {
    match tx.try_send(state.clone()) {
        Ok(()) => CheckpointOffer::Queued,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(
                last_sequence = state.last_sequence(),
                "Checkpoint still in flight; skipping this interval"
            );
            counter!("streamtop.checkpoint.skipped", 1);
            CheckpointOffer::Skipped
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Checkpoint worker is gone; state is not being persisted");
            CheckpointOffer::WorkerGone
        }
    }
}
