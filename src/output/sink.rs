// Durable log sink: bounded queue in front of a rotating file writer.
//
// Workers offer rendered records with a short timeout. If the writer falls
// behind and the queue stays full, the record is dropped and counted rather
// than stalling the stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::stats::{Counter, Counters};

/// How long an offer may wait for queue space.
pub const OFFER_TIMEOUT: Duration = Duration::from_millis(50);

/// Producer side of the sink. Cheap to clone.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<String>,
    counters: Arc<Counters>,
}

impl LogSink {
    /// A sink and the receiver its writer drains.
    pub fn channel(buffer: usize, counters: Arc<Counters>) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, counters }, rx)
    }

    /// Start a sink backed by rotating files in `dir`.
    pub fn spawn(
        dir: &Path,
        records_per_file: u64,
        buffer: usize,
        counters: Arc<Counters>,
    ) -> Result<(Self, JoinHandle<u64>)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let (sink, rx) = Self::channel(buffer, counters);
        let writer = RotatingLog::new(dir, records_per_file);
        Ok((sink, tokio::spawn(run_writer(rx, writer))))
    }

    /// Queue `record` for writing. Returns false if it was dropped.
    pub async fn offer(&self, record: String) -> bool {
        match self.tx.send_timeout(record, OFFER_TIMEOUT).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                let dropped = self.counters.incr(Counter::RecordsDropped);
                warn!(dropped = dropped, "Log sink is full, dropping record");
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.counters.incr(Counter::RecordsDropped);
                warn!("Log sink writer has stopped, dropping record");
                false
            }
        }
    }
}

/// Appends records to `post_data_<n>.log`, moving to the next file every
/// `records_per_file` records.
pub struct RotatingLog {
    dir: PathBuf,
    records_per_file: u64,
    file_num: u64,
    in_file: u64,
    file: Option<File>,
}

impl RotatingLog {
    pub fn new(dir: &Path, records_per_file: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            records_per_file: records_per_file.max(1),
            file_num: 0,
            in_file: 0,
            file: None,
        }
    }

    pub fn file_path(dir: &Path, n: u64) -> PathBuf {
        dir.join(format!("post_data_{n}.log"))
    }

    pub async fn write(&mut self, record: &str) -> Result<()> {
        if self.file.is_none() || self.in_file >= self.records_per_file {
            self.rotate().await?;
        }
        let path = Self::file_path(&self.dir, self.file_num);
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No open log file"))?;

        file.write_all(record.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        self.in_file += 1;
        Ok(())
    }

    async fn rotate(&mut self) -> Result<()> {
        if let Some(mut old) = self.file.take() {
            old.flush().await?;
            info!(records = self.in_file, "Reached max records, starting new log file");
        }
        self.file_num += 1;
        self.in_file = 0;
        let path = Self::file_path(&self.dir, self.file_num);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        debug!(path = %path.display(), "Opened log file");
        self.file = Some(file);
        Ok(())
    }
}

/// Drain `rx` into `log` until every sender is gone. Returns records written.
pub async fn run_writer(mut rx: mpsc::Receiver<String>, mut log: RotatingLog) -> u64 {
    let mut written = 0;
    while let Some(record) = rx.recv().await {
        match log.write(&record).await {
            Ok(()) => written += 1,
            Err(e) => warn!(error = %e, "Failed to persist record"),
        }
    }
    debug!(written = written, "Log sink writer finished");
    written
}
