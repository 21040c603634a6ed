// Merkle Search Tree lookup.
//
// Each node holds an optional left subtree `l` and a sorted list of entries.
// Entry keys are prefix-compressed against the previous key in the same node:
// `p` bytes are shared, `k` is the remaining suffix. `t` is the subtree of
// keys sorting between this entry and the next one.

use std::cmp::Ordering;

use cid::Cid;
use serde::{Deserialize, Serialize};

use super::car::{CarError, CarSnapshot};

#[derive(Debug, Serialize, Deserialize)]
struct NodeData {
    #[serde(default)]
    l: Option<Cid>,
    e: Vec<TreeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeEntry {
    p: usize,
    #[serde(with = "serde_bytes")]
    k: Vec<u8>,
    v: Cid,
    #[serde(default)]
    t: Option<Cid>,
}

/// Find the value CID stored under `key`, starting at the node `root`.
///
/// Fails with `MissingBlock` if the walk needs a node the snapshot does not
/// carry (partial commit CARs only include nodes along changed paths).
pub fn find(snapshot: &CarSnapshot, root: &Cid, key: &str) -> Result<Option<Cid>, CarError> {
    let key = key.as_bytes();
    let mut node_cid = *root;

    loop {
        let block = snapshot
            .get(&node_cid)
            .ok_or(CarError::MissingBlock(node_cid))?;
        let node: NodeData = serde_ipld_dagcbor::from_slice(block).map_err(|e| CarError::Block {
            cid: node_cid,
            reason: e.to_string(),
        })?;

        let mut prev_key: Vec<u8> = Vec::new();
        let mut subtree = node.l;
        let mut descend = None;

        for entry in &node.e {
            let shared = entry.p.min(prev_key.len());
            let mut full_key = prev_key[..shared].to_vec();
            full_key.extend_from_slice(&entry.k);

            match key.cmp(full_key.as_slice()) {
                Ordering::Equal => return Ok(Some(entry.v)),
                Ordering::Less => {
                    descend = Some(subtree);
                    break;
                }
                Ordering::Greater => subtree = entry.t,
            }
            prev_key = full_key;
        }

        match descend.unwrap_or(subtree) {
            Some(next) => node_cid = next,
            None => return Ok(None),
        }
    }
}

/// Encode one MST node holding `entries` (sorted by key) with an optional
/// left subtree and optional right subtrees per entry.
pub fn encode_node(left: Option<Cid>, entries: &[(&str, Cid, Option<Cid>)]) -> Vec<u8> {
    let mut prev: &[u8] = &[];
    let mut e = Vec::with_capacity(entries.len());
    for (key, value, right) in entries {
        let key = key.as_bytes();
        let shared = prev
            .iter()
            .zip(key.iter())
            .take_while(|(a, b)| a == b)
            .count();
        e.push(TreeEntry {
            p: shared,
            k: key[shared..].to_vec(),
            v: *value,
            t: *right,
        });
        prev = key;
    }
    serde_ipld_dagcbor::to_vec(&NodeData { l: left, e }).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::car::write_car;
    use crate::repo::compute_cid;

    fn leaf(value: &str) -> (Cid, Vec<u8>) {
        let bytes = serde_ipld_dagcbor::to_vec(&value).unwrap();
        (compute_cid(&bytes), bytes)
    }

    #[test]
    fn finds_keys_in_single_node() {
        let (c1, b1) = leaf("one");
        let (c2, b2) = leaf("two");
        let node = encode_node(
            None,
            &[
                ("app.bsky.feed.like/aaa", c1, None),
                ("app.bsky.feed.post/bbb", c2, None),
            ],
        );
        let root = compute_cid(&node);
        let car = write_car(&[root], &[(root, node), (c1, b1), (c2, b2)]);
        let snapshot = CarSnapshot::parse(&car).unwrap();

        assert_eq!(
            find(&snapshot, &root, "app.bsky.feed.post/bbb").unwrap(),
            Some(c2)
        );
        assert_eq!(
            find(&snapshot, &root, "app.bsky.feed.like/aaa").unwrap(),
            Some(c1)
        );
        assert_eq!(find(&snapshot, &root, "app.bsky.feed.post/zzz").unwrap(), None);
    }

    #[test]
    fn descends_into_left_and_right_subtrees() {
        let (ca, _) = leaf("a");
        let (cm, _) = leaf("m");
        let (cz, _) = leaf("z");

        let left = encode_node(None, &[("app.bsky.feed.post/a", ca, None)]);
        let right = encode_node(None, &[("app.bsky.feed.post/z", cz, None)]);
        let (left_cid, right_cid) = (compute_cid(&left), compute_cid(&right));
        let root = encode_node(
            Some(left_cid),
            &[("app.bsky.feed.post/m", cm, Some(right_cid))],
        );
        let root_cid = compute_cid(&root);

        let car = write_car(
            &[root_cid],
            &[(root_cid, root), (left_cid, left), (right_cid, right)],
        );
        let snapshot = CarSnapshot::parse(&car).unwrap();

        assert_eq!(
            find(&snapshot, &root_cid, "app.bsky.feed.post/a").unwrap(),
            Some(ca)
        );
        assert_eq!(
            find(&snapshot, &root_cid, "app.bsky.feed.post/m").unwrap(),
            Some(cm)
        );
        assert_eq!(
            find(&snapshot, &root_cid, "app.bsky.feed.post/z").unwrap(),
            Some(cz)
        );
    }

    #[test]
    fn missing_subtree_block_is_reported() {
        let (cm, _) = leaf("m");
        let (phantom, _) = leaf("not in the car");
        let root = encode_node(Some(phantom), &[("app.bsky.feed.post/m", cm, None)]);
        let root_cid = compute_cid(&root);
        let car = write_car(&[root_cid], &[(root_cid, root)]);
        let snapshot = CarSnapshot::parse(&car).unwrap();

        let err = find(&snapshot, &root_cid, "app.bsky.feed.post/a").unwrap_err();
        assert!(matches!(err, CarError::MissingBlock(c) if c == phantom));
    }

    #[test]
    fn encode_node_prefix_compresses_keys() {
        let (c, _) = leaf("x");
        let bytes = encode_node(
            None,
            &[("app.bsky.feed.post/aa", c, None), ("app.bsky.feed.post/ab", c, None)],
        );
        let node: NodeData = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        assert_eq!(node.e[0].p, 0);
        assert_eq!(node.e[1].p, "app.bsky.feed.post/a".len());
        assert_eq!(node.e[1].k, b"b".to_vec());
    }
}
