// CAR v1 reader: the binary snapshot format for repository blocks.
//
// Layout: varint(header length) + DAG-CBOR header {version, roots}, then
// repeated sections of varint(section length) + CID bytes + block bytes.
// Blocks are kept in memory keyed by CID; snapshots are small for commit
// events and bounded by repository size for `getRepo`.

use std::collections::HashMap;

use cid::Cid;
use serde::Deserialize;

use super::mst;
use super::CommitObject;

/// Errors produced while reading a CAR snapshot.
#[derive(Debug, thiserror::Error)]
pub enum CarError {
    #[error("CAR data truncated at offset {0}")]
    Truncated(usize),

    #[error("malformed varint at offset {0}")]
    Varint(usize),

    #[error("invalid CAR header: {0}")]
    Header(String),

    #[error("unsupported CAR version {0}")]
    Version(u64),

    #[error("invalid CID in section at offset {offset}: {reason}")]
    Cid { offset: usize, reason: String },

    #[error("CAR has no root")]
    NoRoot,

    #[error("block {0} missing from snapshot")]
    MissingBlock(Cid),

    #[error("failed to decode block {cid}: {reason}")]
    Block { cid: Cid, reason: String },
}

#[derive(Deserialize)]
struct CarHeader {
    version: u64,
    #[serde(default)]
    roots: Vec<Cid>,
}

/// An in-memory set of content-addressed blocks read from a CAR file.
#[derive(Debug, Default)]
pub struct CarSnapshot {
    roots: Vec<Cid>,
    blocks: HashMap<Cid, Vec<u8>>,
}

impl CarSnapshot {
    /// Parse a complete CAR v1 byte buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self, CarError> {
        let mut pos = 0usize;

        let header_len = read_varint(bytes, &mut pos)? as usize;
        let header_bytes = slice_at(bytes, pos, header_len)?;
        let header: CarHeader = serde_ipld_dagcbor::from_slice(header_bytes)
            .map_err(|e| CarError::Header(e.to_string()))?;
        if header.version != 1 {
            return Err(CarError::Version(header.version));
        }
        pos += header_len;

        let mut blocks = HashMap::new();
        while pos < bytes.len() {
            let section_start = pos;
            let section_len = read_varint(bytes, &mut pos)? as usize;
            let section = slice_at(bytes, pos, section_len)?;

            let mut reader = section;
            let cid = Cid::read_bytes(&mut reader).map_err(|e| CarError::Cid {
                offset: section_start,
                reason: e.to_string(),
            })?;
            blocks.insert(cid, reader.to_vec());

            pos += section_len;
        }

        Ok(Self {
            roots: header.roots,
            blocks,
        })
    }

    /// The first root CID (the signed commit for repository CARs).
    pub fn root(&self) -> Option<&Cid> {
        self.roots.first()
    }

    /// Raw bytes of a block, if present.
    pub fn get(&self, cid: &Cid) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    /// Decode the commit object referenced by the root.
    pub fn commit(&self) -> Result<CommitObject, CarError> {
        let root = *self.root().ok_or(CarError::NoRoot)?;
        let block = self.get(&root).ok_or(CarError::MissingBlock(root))?;
        serde_ipld_dagcbor::from_slice(block).map_err(|e| CarError::Block {
            cid: root,
            reason: e.to_string(),
        })
    }

    /// Look up the record at `path` (`<collection>/<rkey>`) by walking the
    /// MST from the commit root.
    ///
    /// Returns the CID the tree claims for the record and the block bytes
    /// stored under that CID. `Ok(None)` means the path is not in the tree.
    pub fn get_record(&self, path: &str) -> Result<Option<(Cid, &[u8])>, CarError> {
        let commit = self.commit()?;
        match mst::find(self, &commit.data, path)? {
            Some(cid) => {
                let block = self.get(&cid).ok_or(CarError::MissingBlock(cid))?;
                Ok(Some((cid, block)))
            }
            None => Ok(None),
        }
    }
}

/// Serialize blocks into a CAR v1 buffer.
///
/// Used to build fixtures; the pipeline itself only reads CARs.
pub fn write_car(roots: &[Cid], blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
    #[derive(serde::Serialize)]
    struct Header<'a> {
        roots: &'a [Cid],
        version: u64,
    }

    let mut out = Vec::new();
    // Serializing a header of CIDs and an integer cannot fail.
    let header = serde_ipld_dagcbor::to_vec(&Header { roots, version: 1 }).unwrap_or_default();
    write_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);

    for (cid, data) in blocks {
        let cid_bytes = cid.to_bytes();
        write_varint(&mut out, (cid_bytes.len() + data.len()) as u64);
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(data);
    }
    out
}

fn slice_at(bytes: &[u8], pos: usize, len: usize) -> Result<&[u8], CarError> {
    pos.checked_add(len)
        .and_then(|end| bytes.get(pos..end))
        .ok_or(CarError::Truncated(pos))
}

/// Unsigned LEB128 varint, as used by multiformats.
fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, CarError> {
    let start = *pos;
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *bytes.get(*pos).ok_or(CarError::Truncated(start))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CarError::Varint(start))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::compute_cid;

    #[test]
    fn varint_roundtrip_multi_byte() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 300);
        assert_eq!(pos, 2);
    }

    #[test]
    fn varint_truncated_is_error() {
        let mut pos = 0;
        assert!(matches!(
            read_varint(&[0x80], &mut pos),
            Err(CarError::Truncated(0))
        ));
    }

    #[test]
    fn parse_reads_roots_and_blocks() {
        let a = serde_ipld_dagcbor::to_vec(&"alpha").unwrap();
        let b = serde_ipld_dagcbor::to_vec(&"beta").unwrap();
        let (ca, cb) = (compute_cid(&a), compute_cid(&b));

        let car = write_car(&[ca], &[(ca, a.clone()), (cb, b.clone())]);
        let snapshot = CarSnapshot::parse(&car).unwrap();

        assert_eq!(snapshot.root(), Some(&ca));
        assert_eq!(snapshot.get(&ca), Some(a.as_slice()));
        assert_eq!(snapshot.get(&cb), Some(b.as_slice()));
    }

    #[test]
    fn parse_rejects_truncated_section() {
        let a = serde_ipld_dagcbor::to_vec(&"alpha").unwrap();
        let ca = compute_cid(&a);
        let car = write_car(&[ca], &[(ca, a)]);

        let cut = &car[..car.len() - 3];
        assert!(matches!(
            CarSnapshot::parse(cut),
            Err(CarError::Truncated(_))
        ));
    }

    #[test]
    fn parse_rejects_garbage_header() {
        assert!(CarSnapshot::parse(&[0x02, 0xff, 0xff]).is_err());
        assert!(CarSnapshot::parse(&[]).is_err());
    }

    #[test]
    fn commit_without_root_block_is_missing_block() {
        let a = serde_ipld_dagcbor::to_vec(&"alpha").unwrap();
        let ca = compute_cid(&a);
        let car = write_car(&[ca], &[]);
        let snapshot = CarSnapshot::parse(&car).unwrap();
        assert!(matches!(snapshot.commit(), Err(CarError::MissingBlock(_))));
    }
}
