// Record decoding: verified blocks to typed post/like records.
//
// A record block is trusted only after its recomputed CID matches the CID we
// were told to expect. Decoding is discriminant-first: read `$type`, then
// deserialize the same block straight into the matching record shape.

use cid::Cid;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::repo::{compute_cid, CarError, CarSnapshot};

/// Lexicon type tag for posts.
pub const POST_NSID: &str = "app.bsky.feed.post";
/// Lexicon type tag for likes.
pub const LIKE_NSID: &str = "app.bsky.feed.like";

/// `com.atproto.repo.strongRef`: a URI pinned to a specific record version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub parent: StrongRef,
    pub root: StrongRef,
}

/// The fields of `app.bsky.feed.post` this pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub langs: Vec<String>,
}

/// The fields of `app.bsky.feed.like` this pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    pub subject: StrongRef,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A decoded repository record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Post(PostRecord),
    Like(LikeRecord),
    /// Any other record type, or a post/like that failed to deserialize.
    Other { kind: Option<String> },
}

impl Record {
    /// The lexicon type tag, or `"unknown"`.
    pub fn kind(&self) -> &str {
        match self {
            Record::Post(_) => POST_NSID,
            Record::Like(_) => LIKE_NSID,
            Record::Other { kind } => kind.as_deref().unwrap_or("unknown"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("content identifier mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: Cid, actual: Cid },

    #[error("record block {0} not found in snapshot")]
    MissingBlock(Cid),

    #[error("record {0} not found in snapshot")]
    NotFound(String),

    #[error(transparent)]
    Snapshot(#[from] CarError),
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "$type")]
    kind: Option<String>,
}

/// Verify `block` against `expected` and decode it.
///
/// Returns a record iff the recomputed CID equals `expected`. Payloads that
/// don't fit a known shape come back as `Record::Other`, never as an error.
pub fn decode(block: &[u8], expected: &Cid) -> Result<Record, DecodeError> {
    let actual = compute_cid(block);
    if actual != *expected {
        return Err(DecodeError::IntegrityMismatch {
            expected: *expected,
            actual,
        });
    }
    Ok(decode_payload(block))
}

fn decode_payload(block: &[u8]) -> Record {
    let kind = match serde_ipld_dagcbor::from_slice::<TypeTag>(block) {
        Ok(tag) => tag.kind,
        Err(e) => {
            debug!(error = %e, "Record is not a tagged map");
            return Record::Other { kind: None };
        }
    };

    let decoded = if kind.as_deref() == Some(POST_NSID) {
        serde_ipld_dagcbor::from_slice(block).map(Record::Post)
    } else if kind.as_deref() == Some(LIKE_NSID) {
        serde_ipld_dagcbor::from_slice(block).map(Record::Like)
    } else {
        return Record::Other { kind };
    };

    decoded.unwrap_or_else(|e| {
        debug!(kind = ?kind, error = %e, "Failed to transcode record");
        Record::Other { kind }
    })
}

/// Pull the record at `path` out of a snapshot and decode it.
///
/// The record is located through the MST when the snapshot carries the
/// nodes; otherwise the block is looked up by `expected` directly. With an
/// `expected` CID the block must hash to it; without one, the CID the tree
/// claims is used for the same check.
pub fn extract_record(
    snapshot: &CarSnapshot,
    path: &str,
    expected: Option<&Cid>,
) -> Result<Record, DecodeError> {
    let located = match snapshot.get_record(path) {
        Ok(found) => found,
        Err(e) if expected.is_some() => {
            debug!(path = path, error = %e, "MST walk failed, using operation CID");
            None
        }
        Err(e) => return Err(e.into()),
    };

    match (located, expected) {
        (Some((_, block)), Some(expected)) => decode(block, expected),
        (Some((claimed, block)), None) => decode(block, &claimed),
        (None, Some(expected)) => {
            let block = snapshot
                .get(expected)
                .ok_or(DecodeError::MissingBlock(*expected))?;
            decode(block, expected)
        }
        (None, None) => Err(DecodeError::NotFound(path.to_string())),
    }
}
