// Repository snapshots: CAR parsing, MST traversal, and block integrity.
//
// Every record on the network lives in a user repository: a Merkle Search
// Tree whose nodes and leaves are DAG-CBOR blocks addressed by CID. Commit
// events and `com.atproto.sync.getRepo` both ship those blocks as a CAR file.

pub mod car;
pub mod mst;

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};

pub use car::{CarError, CarSnapshot};

/// Multicodec for DAG-CBOR blocks.
pub const DAG_CBOR: u64 = 0x71;

/// Compute the CID of a DAG-CBOR block (CIDv1, sha2-256).
pub fn compute_cid(block: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(block))
}

/// Signed commit object at the root of every repository snapshot.
///
/// Only `data` (the MST root) is needed here; the signature and revision
/// are carried along for logging.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CommitObject {
    pub did: String,
    pub version: u64,
    pub data: Cid,
    #[serde(default)]
    pub rev: Option<String>,
}
