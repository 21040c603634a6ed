// Like resolution: dereference a like's subject into the liked post.
//
// The subject URI names another repository. Its full snapshot is fetched,
// the tree is walked to the post's path, and the block is checked against the
// CID the tree claims before it is decoded. Fetches are bounded by a
// semaphore so a burst of likes can't fan out unbounded.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::at_uri::{AtUri, AtUriError};
use crate::bluesky::repos::RepoFetcher;
use crate::records::{extract_record, DecodeError, LikeRecord, PostRecord, Record};
use crate::repo::{CarError, CarSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    MalformedReference(#[from] AtUriError),

    #[error("failed to fetch repository {did}: {reason}")]
    Fetch { did: String, reason: String },

    #[error("invalid repository snapshot: {0}")]
    Snapshot(#[from] CarError),

    #[error("liked record {0} not found")]
    NotFound(String),

    #[error("liked record {uri} failed verification: {source}")]
    Integrity {
        uri: String,
        #[source]
        source: DecodeError,
    },

    #[error("liked record {uri} is a {kind}, not a post")]
    NotAPost { uri: String, kind: String },
}

/// The post a like points at, with its own URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLike {
    pub post: PostRecord,
    pub uri: AtUri,
}

impl ResolvedLike {
    /// The repository that owns the liked post.
    pub fn liked_did(&self) -> &str {
        &self.uri.authority
    }
}

pub struct LikeResolver {
    fetcher: Arc<dyn RepoFetcher>,
    permits: Semaphore,
}

impl LikeResolver {
    pub fn new(fetcher: Arc<dyn RepoFetcher>, max_concurrent_fetches: usize) -> Self {
        Self {
            fetcher,
            permits: Semaphore::new(max_concurrent_fetches.max(1)),
        }
    }

    pub async fn resolve(&self, like: &LikeRecord) -> Result<ResolvedLike, ResolveError> {
        let uri = AtUri::parse(&like.subject.uri)?;

        let car = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ResolveError::Fetch {
                    did: uri.authority.clone(),
                    reason: "fetch limiter closed".to_string(),
                })?;
            self.fetcher
                .fetch_repo(&uri.authority)
                .await
                .map_err(|e| ResolveError::Fetch {
                    did: uri.authority.clone(),
                    reason: format!("{e:#}"),
                })?
        };

        let snapshot = CarSnapshot::parse(&car)?;
        let record = match extract_record(&snapshot, &uri.path(), None) {
            Ok(record) => record,
            Err(DecodeError::NotFound(_)) => return Err(ResolveError::NotFound(uri.to_string())),
            Err(DecodeError::Snapshot(e)) => return Err(ResolveError::Snapshot(e)),
            Err(source) => {
                return Err(ResolveError::Integrity {
                    uri: uri.to_string(),
                    source,
                })
            }
        };

        match record {
            Record::Post(post) => {
                debug!(uri = %uri, "Resolved liked post");
                Ok(ResolvedLike { post, uri })
            }
            other => Err(ResolveError::NotAPost {
                uri: uri.to_string(),
                kind: other.kind().to_string(),
            }),
        }
    }
}
