// Throughput counters for the stream.
//
// Every 500th increment of a counter logs its running rate; `summary()`
// feeds the table printed at exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// How often (in increments) a counter logs its rate.
pub const LOG_EVERY: u64 = 500;

const KINDS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    MessagesReceived,
    Commits,
    SkippedCommits,
    OpsCreate,
    OpsUpdate,
    OpsDelete,
    OpsUnknown,
    Posts,
    Likes,
    LikesSkipped,
    OtherRecords,
    RecordsEmitted,
    RecordsDropped,
    DecodeErrors,
    ResolveErrors,
}

impl Counter {
    pub const ALL: [Counter; KINDS] = [
        Counter::MessagesReceived,
        Counter::Commits,
        Counter::SkippedCommits,
        Counter::OpsCreate,
        Counter::OpsUpdate,
        Counter::OpsDelete,
        Counter::OpsUnknown,
        Counter::Posts,
        Counter::Likes,
        Counter::LikesSkipped,
        Counter::OtherRecords,
        Counter::RecordsEmitted,
        Counter::RecordsDropped,
        Counter::DecodeErrors,
        Counter::ResolveErrors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::MessagesReceived => "messages_received",
            Counter::Commits => "commits",
            Counter::SkippedCommits => "skipped_commits",
            Counter::OpsCreate => "ops_create",
            Counter::OpsUpdate => "ops_update",
            Counter::OpsDelete => "ops_delete",
            Counter::OpsUnknown => "ops_unknown",
            Counter::Posts => "records_post",
            Counter::Likes => "records_like",
            Counter::LikesSkipped => "likes_skipped",
            Counter::OtherRecords => "records_other",
            Counter::RecordsEmitted => "records_emitted",
            Counter::RecordsDropped => "records_dropped",
            Counter::DecodeErrors => "decode_errors",
            Counter::ResolveErrors => "resolve_errors",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Process-wide counters, shared by `Arc` between the reader and workers.
pub struct Counters {
    started: Instant,
    values: [AtomicU64; KINDS],
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            values: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Increment `counter` and return its new value.
    pub fn incr(&self, counter: Counter) -> u64 {
        let total = self.values[counter.index()].fetch_add(1, Ordering::Relaxed) + 1;
        if total % LOG_EVERY == 0 {
            info!(
                counter = counter.name(),
                total = total,
                per_second = %format!("{:.2}", self.rate(total)),
                "Throughput"
            );
        }
        total
    }

    /// Increment `counter` only while it is below `limit`. Returns the new
    /// value, or `None` once the limit has been reached.
    pub fn incr_below(&self, counter: Counter, limit: u64) -> Option<u64> {
        let total = self.values[counter.index()]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?
            + 1;
        if total % LOG_EVERY == 0 {
            info!(counter = counter.name(), total = total, "Throughput");
        }
        Some(total)
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()].load(Ordering::Relaxed)
    }

    /// Non-zero counters with their totals, in declaration order.
    pub fn summary(&self) -> Vec<(&'static str, u64)> {
        Counter::ALL
            .iter()
            .map(|&c| (c.name(), self.get(c)))
            .filter(|&(_, n)| n > 0)
            .collect()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn rate(&self, total: u64) -> f64 {
        let secs = self.elapsed_secs();
        if secs > 0.0 {
            total as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_returns_running_total() {
        let counters = Counters::new();
        assert_eq!(counters.incr(Counter::Commits), 1);
        assert_eq!(counters.incr(Counter::Commits), 2);
        assert_eq!(counters.get(Counter::Commits), 2);
        assert_eq!(counters.get(Counter::Posts), 0);
    }

    #[test]
    fn incr_below_stops_at_limit() {
        let counters = Counters::new();
        assert_eq!(counters.incr_below(Counter::RecordsEmitted, 2), Some(1));
        assert_eq!(counters.incr_below(Counter::RecordsEmitted, 2), Some(2));
        assert_eq!(counters.incr_below(Counter::RecordsEmitted, 2), None);
        assert_eq!(counters.get(Counter::RecordsEmitted), 2);
    }

    #[test]
    fn summary_skips_zero_counters() {
        let counters = Counters::new();
        counters.incr(Counter::OpsDelete);
        counters.incr(Counter::RecordsEmitted);
        counters.incr(Counter::RecordsEmitted);
        assert_eq!(
            counters.summary(),
            vec![("ops_delete", 1), ("records_emitted", 2)]
        );
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = Counter::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Counter::ALL.len());
    }
}
