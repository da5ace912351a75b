// Socket ingestion
//
// Reads newline-delimited text from one producer connection at a time and
// feeds each line to the micro-batch assembler. Connection failures and stalls
// are retried with exponential backoff; a successful connection resets the
// attempt counter.

use std::time::Duration;

use metrics::counter;
use streamtop_batch::MicroBatchAssembler;
use streamtop_config::{IngestConfig, IngestMode};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingest socket error on {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no data from {address} for {timeout:?}")]
    Stalled { address: String, timeout: Duration },

    #[error("giving up on {address} after {attempts} consecutive failed attempts")]
    RetriesExhausted { address: String, attempts: u32 },
}

impl IngestError {
    /// Whether another connection attempt may fix this.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub mode: IngestMode,
    pub address: String,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stall_timeout: Option<Duration>,
    pub max_line_bytes: usize,
}

impl From<&IngestConfig> for IngestSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            mode: config.mode,
            address: config.address.clone(),
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            stall_timeout: config.stall_timeout(),
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Doubling delay between reconnect attempts, capped at `max`.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    max_retries: u32,
    attempt: u32,
}

impl ExponentialBackoff {
    pub(crate) fn new(initial: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            initial,
            max,
            max_retries,
            attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` once retries are used up.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempt += 1;
        Some(delay)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

enum SessionEnd {
    Shutdown,
    Eof,
}

/// Run until shutdown is signalled or retries are exhausted.
pub async fn run_ingest(
    settings: IngestSettings,
    assembler: MicroBatchAssembler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let mut backoff = ExponentialBackoff::new(
        settings.initial_backoff,
        settings.max_backoff,
        settings.max_retries,
    );
    let mut listener: Option<TcpListener> = None;

    info!(
        mode = %settings.mode,
        address = %settings.address,
        "Starting ingestion"
    );

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            opened = open_stream(&settings, &mut listener) => opened,
        };

        let failure = match opened {
            Ok(stream) => {
                backoff.reset();
                match read_session(stream, &settings, &assembler, &mut shutdown).await {
                    Ok(SessionEnd::Shutdown) => return Ok(()),
                    Ok(SessionEnd::Eof) => {
                        info!(address = %settings.address, "Producer closed the connection");
                        None
                    }
                    Err(e) => Some(e),
                }
            }
            Err(e) => Some(e),
        };

        let delay = match failure {
            // Clean close: pause before dialing again, without spending a retry
            None if settings.mode == IngestMode::Connect => settings.initial_backoff,
            None => {
                debug!("Waiting for the next producer connection");
                continue;
            }
            Some(e) if !e.is_retryable() => return Err(e),
            Some(e) => {
                counter!("streamtop.ingest.failures", 1);
                match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            error = %e,
                            attempt = backoff.attempts(),
                            max_retries = settings.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Ingest connection failed; retrying"
                        );
                        delay
                    }
                    None => {
                        return Err(IngestError::RetriesExhausted {
                            address: settings.address.clone(),
                            attempts: backoff.attempts() + 1,
                        });
                    }
                }
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn open_stream(
    settings: &IngestSettings,
    listener: &mut Option<TcpListener>,
) -> Result<TcpStream, IngestError> {
    let io_err = |source| IngestError::Io {
        address: settings.address.clone(),
        source,
    };

    match settings.mode {
        IngestMode::Connect => {
            let stream = TcpStream::connect(&settings.address)
                .await
                .map_err(io_err)?;
            info!(address = %settings.address, "Connected to producer");
            Ok(stream)
        }
        IngestMode::Listen => {
            let bound = match listener.take() {
                Some(bound) => bound,
                None => {
                    let bound = TcpListener::bind(&settings.address)
                        .await
                        .map_err(io_err)?;
                    info!(address = %settings.address, "Waiting for a producer to connect");
                    bound
                }
            };
            let accepted = bound.accept().await;
            *listener = Some(bound);

            let (stream, peer) = accepted.map_err(io_err)?;
            info!(%peer, "Producer connected");
            Ok(stream)
        }
    }
}

async fn read_session(
    stream: TcpStream,
    settings: &IngestSettings,
    assembler: &MicroBatchAssembler,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, IngestError> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(4096);
    // Inside an over-long line, dropping chunks until its newline
    let mut skipping = false;

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
            read = read_line(&mut reader, &mut buf, settings) => read?,
        };

        if read == 0 {
            return Ok(SessionEnd::Eof);
        }

        let complete = buf.last() == Some(&b'\n');
        if skipping {
            skipping = !complete;
            continue;
        }
        if !complete && read >= settings.max_line_bytes {
            warn!(
                max_line_bytes = settings.max_line_bytes,
                "Skipping line longer than the configured maximum"
            );
            counter!("streamtop.ingest.malformed", 1);
            skipping = true;
            continue;
        }
        ingest_bytes(&buf, assembler);
    }
}

async fn read_line(
    reader: &mut BufReader<TcpStream>,
    buf: &mut Vec<u8>,
    settings: &IngestSettings,
) -> Result<usize, IngestError> {
    // At most max_line_bytes per call; the caller handles the remainder
    let mut limited = (&mut *reader).take(settings.max_line_bytes as u64);
    let read = limited.read_until(b'\n', buf);
    let result = match settings.stall_timeout {
        Some(timeout) => tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| IngestError::Stalled {
                address: settings.address.clone(),
                timeout,
            })?,
        None => read.await,
    };

    result.map_err(|source| IngestError::Io {
        address: settings.address.clone(),
        source,
    })
}

/// Feed one raw line to the assembler. Lines that are not UTF-8 are skipped.
pub(crate) fn ingest_bytes(raw: &[u8], assembler: &MicroBatchAssembler) -> usize {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    match std::str::from_utf8(line) {
        Ok(text) => {
            let accepted = assembler.ingest_line(text);
            counter!("streamtop.ingest.lines", 1);
            counter!("streamtop.ingest.tokens", accepted as u64);
            accepted
        }
        Err(e) => {
            warn!(error = %e, bytes = line.len(), "Skipping line that is not valid UTF-8");
            counter!("streamtop.ingest.malformed", 1);
            0
        }
    }
}
