//! # Wire Model
//!
//! Blocks, dependency stubs, inner payloads, and the query surface, all
//! bincode-encoded. Content addresses are SHA-256 over the block-id tuple
//! `{session, source hash, height, payload hash}`; a dependency stub
//! addresses the same tuple through its claimed `data_hash`, so a stub and
//! the full block it announces share one hash.

use serde::{Deserialize, Serialize};
use shared_crypto::{sha256, sha256_of};
use shared_types::{CoreError, Hash, Height, SessionId, SourceIdx};

/// Reference to a block of another (or the same) source: enough to address
/// and authenticate it without the payload.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WireBlockDep {
    pub src: SourceIdx,
    pub height: Height,
    pub data_hash: Hash,
    pub signature: Vec<u8>,
}

/// Prev/deps edges of a block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WireBlockData {
    pub prev: WireBlockDep,
    pub deps: Vec<WireBlockDep>,
}

/// A full block as it travels the overlay (payload carried alongside).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WireBlock {
    pub session: SessionId,
    pub src: SourceIdx,
    pub height: Height,
    pub data: WireBlockData,
    pub signature: Vec<u8>,
}

/// Inner payload of a block. Payloads that fail to decode are treated as
/// opaque broadcast bytes.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BlockPayload {
    /// Application bytes handed to the consensus layer.
    Broadcast(Vec<u8>),
    /// Proof that one source signed two different blocks at one height.
    ForkBlame {
        left: WireBlockDep,
        right: WireBlockDep,
    },
    Nop,
}

/// Out-of-band messages between catchain members.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum OverlayMessage {
    /// A block pushed proactively.
    Block { block: WireBlock, payload: Vec<u8> },
    /// A freshly produced block announced to neighbours.
    BlockUpdate { block: WireBlock, payload: Vec<u8> },
}

/// Pull-API queries a member serves to its neighbours.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CatchainQuery {
    GetBlock {
        hash: Hash,
    },
    GetBlocks {
        hashes: Vec<Hash>,
    },
    /// Walk `tip`'s prev chain downward for up to `height` blocks, stopping
    /// at any hash in `stop_if`.
    GetBlockHistory {
        tip: Hash,
        height: Height,
        stop_if: Vec<Hash>,
    },
    /// `rt[i]` is the caller's delivered height for source `i`.
    GetDifference {
        rt: Vec<Height>,
    },
}

/// Answers to [`CatchainQuery`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CatchainAnswer {
    Block {
        block: WireBlock,
        payload: Vec<u8>,
    },
    BlockNotFound,
    Blocks {
        blocks: Vec<(WireBlock, Vec<u8>)>,
    },
    BlockHistory {
        blocks: Vec<(WireBlock, Vec<u8>)>,
    },
    Difference {
        blocks: Vec<(WireBlock, Vec<u8>)>,
        /// Our delivered-height vector, so the caller can tell whether it is
        /// ahead or behind.
        rt: Vec<Height>,
    },
}

/// The tuple a block's content address commits to.
#[derive(Serialize)]
struct BlockIdTuple<'a> {
    session: &'a SessionId,
    src_hash: Hash,
    height: Height,
    data_hash: Hash,
}

/// Content address of a full block: hashes the payload, then the id tuple.
#[must_use]
pub fn block_hash(session: &SessionId, src_hash: Hash, height: Height, payload: &[u8]) -> Hash {
    let data_hash = sha256(payload);
    dep_hash(session, src_hash, height, data_hash)
}

/// Content address from a dependency stub's claimed `data_hash`.
#[must_use]
pub fn dep_hash(session: &SessionId, src_hash: Hash, height: Height, data_hash: Hash) -> Hash {
    sha256_of(&BlockIdTuple {
        session,
        src_hash,
        height,
        data_hash,
    })
}

/// Hash of the session's root pseudo-block (height 0, pseudo-source).
#[must_use]
pub fn root_hash(session: &SessionId) -> Hash {
    dep_hash(session, session.as_hash(), 0, session.as_hash())
}

/// Bytes a source signs for its block: the content address.
#[must_use]
pub fn block_sign_data(hash: &Hash) -> Vec<u8> {
    let mut data = b"catchain-block:".to_vec();
    data.extend_from_slice(hash.as_bytes());
    data
}

/// Journal key of a persisted block row.
#[must_use]
pub fn block_db_key(hash: &Hash) -> Vec<u8> {
    let mut key = b"catchain/block/".to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Journal key of the neighbour snapshot row.
#[must_use]
pub fn neighbours_db_key() -> Vec<u8> {
    b"catchain/neighbours".to_vec()
}

/// The serialized row stored under [`block_db_key`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StoredBlockRow {
    pub block: WireBlock,
    pub payload: Vec<u8>,
}

/// Structural validation of a full block before it touches the DAG.
///
/// `src_hash_of` maps a source index (or the pseudo-source `n_sources`) to
/// its identity hash.
pub fn pre_validate_block(
    session: &SessionId,
    n_sources: u32,
    max_deps: u32,
    block: &WireBlock,
    payload: &[u8],
) -> Result<(), CoreError> {
    if block.session != *session {
        return Err(CoreError::proto("wrong incarnation"));
    }
    if block.height == 0 {
        return Err(CoreError::proto("bad height 0"));
    }
    if block.src >= n_sources {
        return Err(CoreError::proto(format!("bad src {}", block.src)));
    }
    if block.data.deps.len() > max_deps as usize {
        return Err(CoreError::proto("too many deps"));
    }

    let prev = &block.data.prev;
    if block.height > 1 {
        if prev.src != block.src {
            return Err(CoreError::proto(format!("bad prev block src {}", prev.src)));
        }
    } else if prev.src != n_sources {
        return Err(CoreError::proto(format!(
            "bad prev(first) block src {}",
            prev.src
        )));
    }
    if prev.height + 1 != block.height {
        return Err(CoreError::proto(format!(
            "bad prev block height {} (our {})",
            prev.height, block.height
        )));
    }

    let mut used = std::collections::BTreeSet::new();
    used.insert(block.src);
    for dep in &block.data.deps {
        if !used.insert(dep.src) {
            return Err(CoreError::proto("two deps from same source"));
        }
    }

    pre_validate_dep(session, n_sources, prev)?;
    for dep in &block.data.deps {
        pre_validate_dep(session, n_sources, dep)?;
    }

    if payload.is_empty() {
        return Err(CoreError::proto("empty payload"));
    }
    Ok(())
}

/// Structural validation of a dependency stub.
pub fn pre_validate_dep(
    session: &SessionId,
    n_sources: u32,
    dep: &WireBlockDep,
) -> Result<(), CoreError> {
    if dep.height > 0 {
        if dep.src >= n_sources {
            return Err(CoreError::proto(format!("bad src {}", dep.src)));
        }
    } else {
        if dep.src != n_sources {
            return Err(CoreError::proto(format!("bad src (first block) {}", dep.src)));
        }
        if dep.data_hash != session.as_hash() || !dep.signature.is_empty() {
            return Err(CoreError::proto("bad first block"));
        }
    }
    Ok(())
}

/// The root pseudo-block as a dependency stub.
#[must_use]
pub fn root_dep(session: &SessionId, n_sources: u32) -> WireBlockDep {
    WireBlockDep {
        src: n_sources,
        height: 0,
        data_hash: session.as_hash(),
        signature: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId(Hash::new([1; 32]))
    }

    fn block(height: Height, src: SourceIdx, deps: Vec<WireBlockDep>) -> WireBlock {
        let prev = if height == 1 {
            root_dep(&session(), 2)
        } else {
            WireBlockDep {
                src,
                height: height - 1,
                data_hash: Hash::new([7; 32]),
                signature: vec![1],
            }
        };
        WireBlock {
            session: session(),
            src,
            height,
            data: WireBlockData { prev, deps },
            signature: vec![1],
        }
    }

    #[test]
    fn test_stub_and_full_block_share_hash() {
        let payload = b"hello";
        let src_hash = Hash::new([9; 32]);
        let full = block_hash(&session(), src_hash, 1, payload);
        let stub = dep_hash(&session(), src_hash, 1, sha256(payload));
        assert_eq!(full, stub);
    }

    #[test]
    fn test_pre_validate_accepts_well_formed() {
        pre_validate_block(&session(), 2, 4, &block(1, 0, vec![]), b"x").unwrap();
    }

    #[test]
    fn test_pre_validate_rejects_height_zero() {
        let mut b = block(1, 0, vec![]);
        b.height = 0;
        assert!(pre_validate_block(&session(), 2, 4, &b, b"x").is_err());
    }

    #[test]
    fn test_pre_validate_rejects_bad_src() {
        assert!(pre_validate_block(&session(), 2, 4, &block(1, 5, vec![]), b"x").is_err());
    }

    #[test]
    fn test_pre_validate_rejects_wrong_prev_link() {
        let mut b = block(2, 0, vec![]);
        b.data.prev.height = 0;
        b.data.prev.src = 2;
        assert!(pre_validate_block(&session(), 2, 4, &b, b"x").is_err());
    }

    #[test]
    fn test_pre_validate_rejects_duplicate_dep_sources() {
        let dep = |src| WireBlockDep {
            src,
            height: 1,
            data_hash: Hash::new([3; 32]),
            signature: vec![1],
        };
        // A dep from the block's own source counts as a duplicate.
        assert!(pre_validate_block(&session(), 3, 4, &block(1, 0, vec![dep(0)]), b"x").is_err());
        assert!(
            pre_validate_block(&session(), 3, 4, &block(1, 0, vec![dep(1), dep(1)]), b"x").is_err()
        );
        pre_validate_block(&session(), 3, 4, &block(1, 0, vec![dep(1), dep(2)]), b"x").unwrap();
    }

    #[test]
    fn test_pre_validate_rejects_empty_payload() {
        assert!(pre_validate_block(&session(), 2, 4, &block(1, 0, vec![]), b"").is_err());
    }

    #[test]
    fn test_root_dep_validates() {
        pre_validate_dep(&session(), 2, &root_dep(&session(), 2)).unwrap();
        let mut bad = root_dep(&session(), 2);
        bad.signature = vec![1];
        assert!(pre_validate_dep(&session(), 2, &bad).is_err());
    }
}
