// Worker pool: commits sharded by repository.
//
// A repository always hashes to the same worker, and each worker drains its
// queue in order, so commits for one repository are handled in arrival order
// while different repositories proceed concurrently.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::firehose::frames::Commit;
use crate::output::Emitter;

use super::dispatch::Dispatcher;

/// Commits buffered per worker before the reader waits.
pub const QUEUE_DEPTH: usize = 256;

/// Index of the worker that owns `repo`.
pub fn shard_for(repo: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    repo.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

pub struct WorkerPool {
    queues: Vec<mpsc::Sender<Commit>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(workers: usize, dispatcher: Arc<Dispatcher>, emitter: Arc<Emitter>) -> Self {
        let workers = workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            queues.push(tx);
            handles.push(tokio::spawn(run_worker(
                id,
                rx,
                Arc::clone(&dispatcher),
                Arc::clone(&emitter),
            )));
        }
        debug!(workers = workers, "Worker pool started");

        Self { queues, handles }
    }

    /// Queue `commit` on its repository's worker, waiting for space.
    pub async fn submit(&self, commit: Commit) -> Result<()> {
        let shard = shard_for(&commit.repo, self.queues.len());
        self.queues[shard]
            .send(commit)
            .await
            .map_err(|_| anyhow::anyhow!("Worker {shard} has stopped"))
    }

    /// Close every queue and give workers `grace` to finish what they hold.
    /// Workers still running after that are aborted.
    pub async fn close(self, grace: Duration) {
        let Self { queues, handles } = self;
        drop(queues);

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let all = futures::future::join_all(handles);
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!(grace_secs = grace.as_secs_f64(), "Workers did not drain in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Commit>,
    dispatcher: Arc<Dispatcher>,
    emitter: Arc<Emitter>,
) {
    while let Some(commit) = rx.recv().await {
        for record in dispatcher.process_commit(&commit).await {
            emitter.emit(&record).await;
        }
    }
    debug!(worker = id, "Worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_is_stable_and_in_range() {
        for repo in ["did:plc:a", "did:plc:b", "did:web:example.com"] {
            let first = shard_for(repo, 4);
            assert!(first < 4);
            assert_eq!(shard_for(repo, 4), first);
        }
        assert_eq!(shard_for("did:plc:a", 1), 0);
        assert_eq!(shard_for("did:plc:a", 0), 0);
    }
}
