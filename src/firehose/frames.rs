// Event-stream frames: `com.atproto.sync.subscribeRepos` wire format.
//
// Every binary websocket message is two concatenated DAG-CBOR values: a
// header `{op, t}` and a body. `op = 1` is a message whose body type is named
// by `t`; `op = -1` is an error frame with body `{error, message}`.

use std::io::Cursor;

use cid::Cid;
use serde::{Deserialize, Serialize};

/// Errors produced while decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame header: {0}")]
    Header(String),

    #[error("message frame has no type")]
    MissingType,

    #[error("unknown frame op {0}")]
    UnknownOp(i64),

    #[error("invalid {kind} frame body: {reason}")]
    Body { kind: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

/// A repository operation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoOp {
    pub action: String,
    pub path: String,
    #[serde(default)]
    pub cid: Option<Cid>,
}

/// `#commit`: record mutations in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub seq: i64,
    pub repo: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub too_big: bool,
    #[serde(with = "serde_bytes")]
    pub blocks: Vec<u8>,
    pub ops: Vec<RepoOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub seq: i64,
    pub did: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub seq: i64,
    pub did: String,
    pub time: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handle {
    pub seq: i64,
    pub did: String,
    pub handle: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migrate {
    pub seq: i64,
    pub did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate_to: Option<String>,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub seq: i64,
    pub did: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub src: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub val: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neg: Option<bool>,
    pub cts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    pub seq: i64,
    pub labels: Vec<Label>,
}

/// Body of an `op = -1` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Commit(Commit),
    Identity(Identity),
    Account(Account),
    Handle(Handle),
    Migrate(Migrate),
    Tombstone(Tombstone),
    Info(Info),
    Labels(Labels),
    /// A message type this client doesn't know; skipped.
    Unknown(String),
    Error(ErrorFrame),
}

impl Frame {
    /// Display label for frames that are logged rather than processed.
    pub fn label(&self) -> &'static str {
        match self {
            Frame::Commit(_) => "RepoCommit",
            Frame::Identity(_) => "RepoIdentity",
            Frame::Account(_) => "RepoAccount",
            Frame::Handle(_) => "RepoHandle",
            Frame::Migrate(_) => "RepoMigrate",
            Frame::Tombstone(_) => "RepoTombstone",
            Frame::Info(_) => "RepoInfo",
            Frame::Labels(_) => "LabelLabels",
            Frame::Unknown(_) => "Unknown",
            Frame::Error(_) => "Error",
        }
    }

    /// Compact JSON of a non-commit frame body, for verbatim logging.
    ///
    /// `None` for commits, which carry binary blocks and are processed
    /// instead, and for unknown frames.
    pub fn to_json(&self) -> Option<serde_json::Result<String>> {
        match self {
            Frame::Identity(v) => Some(serde_json::to_string(v)),
            Frame::Account(v) => Some(serde_json::to_string(v)),
            Frame::Handle(v) => Some(serde_json::to_string(v)),
            Frame::Migrate(v) => Some(serde_json::to_string(v)),
            Frame::Tombstone(v) => Some(serde_json::to_string(v)),
            Frame::Info(v) => Some(serde_json::to_string(v)),
            Frame::Labels(v) => Some(serde_json::to_string(v)),
            Frame::Error(v) => Some(serde_json::to_string(v)),
            Frame::Commit(_) | Frame::Unknown(_) => None,
        }
    }
}

/// Decode one binary websocket message.
pub fn decode_frame(data: &[u8]) -> Result<Frame, FrameError> {
    let mut cursor = Cursor::new(data);
    let header: FrameHeader = serde_ipld_dagcbor::de::from_reader_once(&mut cursor)
        .map_err(|e| FrameError::Header(e.to_string()))?;
    let body = data.get(cursor.position() as usize..).unwrap_or_default();

    match header.op {
        -1 => Ok(Frame::Error(body_as("error", body)?)),
        1 => {
            let kind = header.t.ok_or(FrameError::MissingType)?;
            Ok(match kind.as_str() {
                "#commit" => Frame::Commit(body_as(&kind, body)?),
                "#identity" => Frame::Identity(body_as(&kind, body)?),
                "#account" => Frame::Account(body_as(&kind, body)?),
                "#handle" => Frame::Handle(body_as(&kind, body)?),
                "#migrate" => Frame::Migrate(body_as(&kind, body)?),
                "#tombstone" => Frame::Tombstone(body_as(&kind, body)?),
                "#info" => Frame::Info(body_as(&kind, body)?),
                "#labels" => Frame::Labels(body_as(&kind, body)?),
                _ => Frame::Unknown(kind.clone()),
            })
        }
        op => Err(FrameError::UnknownOp(op)),
    }
}

fn body_as<T: serde::de::DeserializeOwned>(kind: &str, body: &[u8]) -> Result<T, FrameError> {
    serde_ipld_dagcbor::from_slice(body).map_err(|e| FrameError::Body {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a header and body the way a relay does. Used to build test frames.
pub fn encode_frame<B: Serialize>(op: i64, t: Option<&str>, body: &B) -> Vec<u8> {
    #[derive(Serialize)]
    struct Header<'a> {
        op: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        t: Option<&'a str>,
    }

    let mut out = serde_ipld_dagcbor::to_vec(&Header { op, t }).unwrap_or_default();
    out.extend(serde_ipld_dagcbor::to_vec(body).unwrap_or_default());
    out
}
