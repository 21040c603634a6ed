// Output: formatting, console rendering, and the durable log sink.

pub mod record;
pub mod sink;
pub mod terminal;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::stats::{Counter, Counters};
use record::OutputRecord;
use sink::LogSink;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Unlike byte slicing (`&text[..80]`), this respects UTF-8 character boundaries
/// and will never panic on multi-byte characters like emoji or accented letters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

/// Prints records, hands them to the sink, and enforces `--max-records`.
pub struct Emitter {
    sink: Option<LogSink>,
    counters: Arc<Counters>,
    limit: Option<u64>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Emitter {
    pub fn new(
        sink: Option<LogSink>,
        counters: Arc<Counters>,
        limit: Option<u64>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            sink,
            counters,
            limit,
            shutdown,
        }
    }

    /// Render and emit one record. Serialization failures are logged and the
    /// record is skipped for both console and sink.
    ///
    /// With a record limit, a slot is reserved before anything is printed, so
    /// at most `limit` records ever go out even with several workers racing.
    pub async fn emit(&self, record: &OutputRecord) {
        let rendered = match record.render() {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, record = ?record, "Failed to serialize output record");
                return;
            }
        };

        let emitted = match self.limit {
            Some(limit) => match self.counters.incr_below(Counter::RecordsEmitted, limit) {
                Some(emitted) => emitted,
                None => {
                    debug!("Record limit reached, discarding record");
                    return;
                }
            },
            None => self.counters.incr(Counter::RecordsEmitted),
        };

        terminal::print_record(&rendered);
        if let Some(sink) = &self.sink {
            sink.offer(rendered).await;
        }

        if let Some(limit) = self.limit {
            if emitted >= limit && !self.shutdown.send_replace(true) {
                info!(limit = limit, "Record limit reached, stopping stream");
            }
        }
    }
}
