// Report sinks
//
// The aggregation loop hands every slide tick's Report to a sink. Sinks are
// synchronous and owned by the loop, so they never see concurrent calls.

use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use streamtop_config::ReportFormat;
use streamtop_core::Report;
use tokio::sync::mpsc;

pub trait ReportSink: Send {
    fn emit(&mut self, report: &Report) -> Result<()>;
}

/// Writes reports to stdout (or any writer), as a text table or JSON lines.
pub struct StdoutSink<W = io::Stdout> {
    format: ReportFormat,
    writer: W,
}

impl StdoutSink {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            writer: io::stdout(),
        }
    }
}

impl<W: Write + Send> StdoutSink<W> {
    pub fn with_writer(format: ReportFormat, writer: W) -> Self {
        Self { format, writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReportSink for StdoutSink<W> {
    fn emit(&mut self, report: &Report) -> Result<()> {
        let rendered = match self.format {
            ReportFormat::Text => render_text(report),
            ReportFormat::Json => render_json(report)?,
        };
        self.writer
            .write_all(rendered.as_bytes())
            .context("Failed to write report")?;
        self.writer.flush().context("Failed to flush report")?;
        Ok(())
    }
}

/// Console table: a timestamp banner followed by one `token | count` row per entry.
pub fn render_text(report: &Report) -> String {
    let when = DateTime::<Utc>::from_timestamp_millis(report.window_end_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| report.window_end_ms.to_string());

    let mut out = format!("----------- {} -----------\n", when);
    for (token, count) in &report.entries {
        out.push_str(&format!("{} | {}\n", token, count));
    }
    out.push('\n');
    out
}

pub fn render_json(report: &Report) -> Result<String> {
    let mut line = serde_json::to_string(report).context("Failed to serialize report")?;
    line.push('\n');
    Ok(line)
}

/// Forwards reports to a channel for embedders and tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Report>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Report>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelSink {
    fn emit(&mut self, report: &Report) -> Result<()> {
        self.tx
            .send(report.clone())
            .map_err(|_| anyhow::anyhow!("report receiver dropped"))
    }
}
