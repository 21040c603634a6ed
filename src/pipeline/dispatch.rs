// Commit dispatch: route each operation through decode, resolve, enrich,
// filter, and format.
//
// Nothing that goes wrong with one operation leaves this module: errors are
// logged and counted, and the next operation proceeds.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::at_uri::AtUri;
use crate::bluesky::profiles::{ActorProfile, ProfileLookup};
use crate::firehose::frames::{Commit, RepoOp};
use crate::output::record::{format, OutputRecord, DEFAULT_WEB_HOST};
use crate::output::truncate_chars;
use crate::records::{extract_record, LikeRecord, PostRecord, Record};
use crate::repo::CarSnapshot;
use crate::stats::{Counter, Counters};

use super::filter::passes;
use super::likes::LikeResolver;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Minimum followers for an event to surface profiles and a permalink.
    pub threshold: i64,
    /// Process likes (resolving the liked post) instead of skipping them.
    pub show_likes: bool,
    pub web_host: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0,
            show_likes: false,
            web_host: DEFAULT_WEB_HOST.to_string(),
        }
    }
}

pub struct Dispatcher {
    options: DispatchOptions,
    /// `None` runs unauthenticated: no enrichment, no filtering.
    profiles: Option<Arc<dyn ProfileLookup>>,
    likes: Option<LikeResolver>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(
        options: DispatchOptions,
        profiles: Option<Arc<dyn ProfileLookup>>,
        likes: Option<LikeResolver>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            options,
            profiles,
            likes,
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Process every operation of `commit` in order and collect the records
    /// to emit.
    pub async fn process_commit(&self, commit: &Commit) -> Vec<OutputRecord> {
        self.counters.incr(Counter::Commits);

        if commit.too_big {
            debug!(seq = commit.seq, repo = %commit.repo, "Skipping commit flagged too big");
            self.counters.incr(Counter::SkippedCommits);
            return Vec::new();
        }

        let snapshot = match CarSnapshot::parse(&commit.blocks) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(seq = commit.seq, repo = %commit.repo, error = %e, "Failed to read commit blocks");
                self.counters.incr(Counter::DecodeErrors);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for op in &commit.ops {
            match op.action.as_str() {
                "create" | "update" => {
                    let counter = if op.action == "create" {
                        Counter::OpsCreate
                    } else {
                        Counter::OpsUpdate
                    };
                    self.counters.incr(counter);
                    if let Some(record) = self.process_op(commit, &snapshot, op).await {
                        out.push(record);
                    }
                }
                "delete" => {
                    self.counters.incr(Counter::OpsDelete);
                }
                other => {
                    warn!(seq = commit.seq, action = other, path = %op.path, "Unknown operation action");
                    self.counters.incr(Counter::OpsUnknown);
                }
            }
        }
        out
    }

    async fn process_op(
        &self,
        commit: &Commit,
        snapshot: &CarSnapshot,
        op: &RepoOp,
    ) -> Option<OutputRecord> {
        let record = match extract_record(snapshot, &op.path, op.cid.as_ref()) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    seq = commit.seq,
                    repo = %commit.repo,
                    path = %op.path,
                    error = %e,
                    "Failed to decode record"
                );
                self.counters.incr(Counter::DecodeErrors);
                return None;
            }
        };

        match record {
            Record::Post(post) => {
                self.counters.incr(Counter::Posts);
                let uri = match AtUri::from_repo_path(&commit.repo, &op.path) {
                    Ok(uri) => uri,
                    Err(e) => {
                        warn!(seq = commit.seq, error = %e, "Post path is not a record URI");
                        self.counters.incr(Counter::DecodeErrors);
                        return None;
                    }
                };
                Some(self.handle_post(&uri, &post).await)
            }
            Record::Like(like) => {
                self.counters.incr(Counter::Likes);
                if !self.options.show_likes {
                    self.counters.incr(Counter::LikesSkipped);
                    return None;
                }
                self.handle_like(commit, &like).await
            }
            Record::Other { .. } => {
                self.counters.incr(Counter::OtherRecords);
                None
            }
        }
    }

    async fn handle_post(&self, uri: &AtUri, post: &PostRecord) -> OutputRecord {
        debug!(uri = %uri, text = %truncate_chars(&post.text, 80), "Post");
        let path = uri.path();

        let Some(profiles) = &self.profiles else {
            return self.format(&post.text, None, None, None, &path, false);
        };

        let author = profiles.fetch(&uri.authority).await;
        let reply_author = match &post.reply {
            Some(reply) => match AtUri::parse(&reply.parent.uri) {
                Ok(parent) => profiles.fetch(&parent.authority).await,
                Err(e) => {
                    warn!(uri = %uri, error = %e, "Unusable reply parent reference");
                    None
                }
            },
            None => None,
        };

        let passed = passes(self.options.threshold, author.as_ref(), reply_author.as_ref());
        self.format(&post.text, author, reply_author, None, &path, passed)
    }

    async fn handle_like(&self, commit: &Commit, like: &LikeRecord) -> Option<OutputRecord> {
        let resolver = self.likes.as_ref()?;
        let resolved = match resolver.resolve(like).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(
                    seq = commit.seq,
                    repo = %commit.repo,
                    subject = %like.subject.uri,
                    error = %e,
                    "Failed to resolve liked post"
                );
                self.counters.incr(Counter::ResolveErrors);
                return None;
            }
        };

        let path = resolved.uri.path();
        let Some(profiles) = &self.profiles else {
            return Some(self.format(&resolved.post.text, None, None, None, &path, false));
        };

        let liked_author = profiles.fetch(resolved.liked_did()).await;
        let liking = profiles.fetch(&commit.repo).await;
        let passed = passes(self.options.threshold, liked_author.as_ref(), liking.as_ref());
        Some(self.format(
            &resolved.post.text,
            liked_author,
            None,
            liking,
            &path,
            passed,
        ))
    }

    fn format(
        &self,
        text: &str,
        author: Option<ActorProfile>,
        reply_author: Option<ActorProfile>,
        liking: Option<ActorProfile>,
        path_hint: &str,
        passed: bool,
    ) -> OutputRecord {
        format(
            text,
            author,
            reply_author,
            liking,
            path_hint,
            passed,
            &self.options.web_host,
        )
    }
}
