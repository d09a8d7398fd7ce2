use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::time::MissedTickBehavior;

use sink_api::{Metric, MetricSink};

use crate::config::RelaySettings;
use crate::error::RelayError;
use crate::input::parse_line;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub batches: usize,
    pub written: usize,
    pub dropped: usize,
    pub malformed: usize,
}

/// Read metrics line by line and write them to `sink` in batches.
///
/// A batch is flushed when it reaches `batch_size`, on every
/// `flush_interval_ms` tick, at end of input and when `shutdown` resolves.
/// Failed batches are logged and dropped. A read error ends the run after
/// the pending batch is flushed.
pub async fn run<R, S>(
    mut reader: R,
    sink: &dyn MetricSink,
    settings: &RelaySettings,
    shutdown: S,
) -> Result<RelayStats, RelayError>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut batch: Vec<Metric> = Vec::with_capacity(settings.batch_size);
    let mut stats = RelayStats::default();
    let mut line_no = 0usize;
    let mut read_error = None;

    let mut ticker = tokio::time::interval(Duration::from_millis(settings.flush_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    tokio::pin!(shutdown);

    loop {
        // `read_until` keeps partial bytes in `buf` when another branch wins.
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => {
                match read {
                    Ok(0) => {
                        if !buf.is_empty() {
                            line_no += 1;
                            let raw = std::mem::take(&mut buf);
                            accept(raw, line_no, sink, &mut batch, settings.batch_size, &mut stats).await;
                        }
                        tracing::info!("end of input");
                        break;
                    }
                    Ok(_) => {
                        line_no += 1;
                        let raw = std::mem::take(&mut buf);
                        accept(raw, line_no, sink, &mut batch, settings.batch_size, &mut stats).await;
                    }
                    Err(e) => {
                        tracing::error!(line = line_no + 1, error = %e, pending = batch.len(), "input read failed");
                        read_error = Some(e);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(sink, &mut batch, &mut stats).await;
            }
            _ = &mut shutdown => {
                tracing::info!(pending = batch.len(), "shutting down...");
                break;
            }
        }
    }

    flush(sink, &mut batch, &mut stats).await;
    match read_error {
        Some(e) => Err(RelayError::Io(e)),
        None => Ok(stats),
    }
}

/// Decode one raw input line and add it to the batch.
/// Lines that are not UTF-8 or not a metric are counted as malformed.
async fn accept(
    mut raw: Vec<u8>,
    line_no: usize,
    sink: &dyn MetricSink,
    batch: &mut Vec<Metric>,
    batch_size: usize,
    stats: &mut RelayStats,
) {
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    let line = match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            stats.malformed += 1;
            tracing::warn!(line = line_no, error = %e, "skipping line that is not UTF-8");
            return;
        }
    };
    if line.trim().is_empty() {
        return;
    }
    match parse_line(&line) {
        Ok(metric) => {
            batch.push(metric);
            if batch.len() >= batch_size {
                flush(sink, batch, stats).await;
            }
        }
        Err(e) => {
            stats.malformed += 1;
            tracing::warn!(line = line_no, error = %e, "skipping malformed line");
        }
    }
}

async fn flush(sink: &dyn MetricSink, batch: &mut Vec<Metric>, stats: &mut RelayStats) {
    if batch.is_empty() {
        return;
    }
    let metrics = std::mem::take(batch);
    match sink.write(&metrics).await {
        Ok(()) => {
            stats.batches += 1;
            stats.written += metrics.len();
            tracing::debug!(metrics = metrics.len(), "batch written");
        }
        Err(e) => {
            stats.dropped += metrics.len();
            tracing::error!(metrics = metrics.len(), error = %e, "batch dropped");
        }
    }
}
