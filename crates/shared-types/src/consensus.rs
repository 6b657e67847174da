//! # Consensus Candidate Model
//!
//! Types describing one proposal attempt ("slot") of the round driver:
//! candidate identifiers, raw candidates, and the notarization/finalization
//! certificates that move a candidate through `stored -> notarized ->
//! finalized`.

use crate::entities::{BlockSeqno, Hash, NodeShortId, SessionId, ShardId, Slot, SourceIdx};
use bitvec::prelude::{BitVec, Lsb0};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a chain block: shard, seqno, and the block root hash.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
pub struct BlockId {
    pub shard: ShardId,
    pub seqno: BlockSeqno,
    pub root_hash: Hash,
}

impl BlockId {
    #[must_use]
    pub fn new(shard: ShardId, seqno: BlockSeqno, root_hash: Hash) -> Self {
        Self {
            shard,
            seqno,
            root_hash,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.shard, self.seqno, self.root_hash.short_tag())
    }
}

/// A collated block produced by the validator manager.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockCandidate {
    pub id: BlockId,
    pub created_by: NodeShortId,
    pub data: Vec<u8>,
    pub collated_data: Vec<u8>,
}

/// The data hashed (together with the slot) into a [`CandidateId`].
///
/// `Empty` keeps the chain advancing without new payload; it cites the parent
/// block id instead of a fresh one.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum CandidateHashData {
    FullBlock { block_id: BlockId, parent: Option<Hash> },
    Empty { parent_block_id: BlockId, parent: Option<Hash> },
}

impl CandidateHashData {
    #[must_use]
    pub fn full(block_id: BlockId, parent: ParentId) -> Self {
        Self::FullBlock {
            block_id,
            parent: parent.map(|p| p.hash),
        }
    }

    #[must_use]
    pub fn empty(parent_block_id: BlockId, parent: &CandidateId) -> Self {
        Self::Empty {
            parent_block_id,
            parent: Some(parent.hash),
        }
    }

    #[must_use]
    pub fn block_id(&self) -> BlockId {
        match self {
            Self::FullBlock { block_id, .. } => *block_id,
            Self::Empty { parent_block_id, .. } => *parent_block_id,
        }
    }
}

/// Identifier of a consensus candidate: `H(slot, hash_data)` plus the block
/// id the candidate stands for (for an empty candidate, the parent's).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
pub struct CandidateId {
    pub slot: Slot,
    pub hash: Hash,
    pub block_id: BlockId,
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}:{}", self.slot, self.hash.short_tag())
    }
}

/// Optional candidate id naming the previous slot; `None` is the genesis
/// parent.
pub type ParentId = Option<CandidateId>;

/// The block a candidate carries: a reference to an existing block (empty
/// candidate) or a freshly collated one.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CandidateBlock {
    Ref(BlockId),
    Full(BlockCandidate),
}

/// A candidate as published on the bus and the wire.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RawCandidate {
    pub id: CandidateId,
    pub parent_id: ParentId,
    pub producer_idx: SourceIdx,
    pub block: CandidateBlock,
    pub signature: Vec<u8>,
}

impl RawCandidate {
    /// An empty candidate advances the slot chain without a new block.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.block, CandidateBlock::Ref(_))
    }

    #[must_use]
    pub fn block_id(&self) -> BlockId {
        match &self.block {
            CandidateBlock::Ref(id) => *id,
            CandidateBlock::Full(candidate) => candidate.id,
        }
    }
}

/// Which validators signed a certificate, by roster index.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct SignerBitmap(pub BitVec<u8, Lsb0>);

impl SignerBitmap {
    #[must_use]
    pub fn with_size(n_sources: usize) -> Self {
        Self(BitVec::repeat(false, n_sources))
    }

    pub fn set(&mut self, idx: SourceIdx) {
        let idx = idx as usize;
        if idx < self.0.len() {
            self.0.set(idx, true);
        }
    }

    #[must_use]
    pub fn is_set(&self, idx: SourceIdx) -> bool {
        self.0.get(idx as usize).map(|b| *b).unwrap_or(false)
    }

    /// Roster indices of all signers, ascending.
    #[must_use]
    pub fn signers(&self) -> Vec<SourceIdx> {
        self.0.iter_ones().map(|i| i as SourceIdx).collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.count_ones()
    }
}

/// Multisignature proving a candidate gathered notarization weight.
///
/// The aggregated signature stays opaque to the core; conversion to a
/// per-signer signature set happens at finalization.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NotarCert {
    pub id: CandidateId,
    pub signers: SignerBitmap,
    pub aggregated_signature: Vec<u8>,
}

/// The `(candidate, slot)` pair a final certificate attests to.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FinalVote {
    pub id: CandidateId,
    pub slot: Slot,
}

/// Multisignature ending a slot chain.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FinalCert {
    pub vote: FinalVote,
    pub signers: SignerBitmap,
    pub aggregated_signature: Vec<u8>,
}

/// Marker published with [`StatsTargetReached`](crate::StatsTarget) bus
/// events to timestamp producer progress.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum StatsTarget {
    CollateStarted,
    CollateFinished,
}

/// Payload signed for a candidate: the session id binds the signature to one
/// consensus run.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CandidateSignData {
    pub session_id: SessionId,
    pub id: CandidateId,
}

/// Block data as held by the validator manager: enough for the producer's
/// before-split probe and for applying a candidate to a parent state.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockData {
    pub id: BlockId,
    pub before_split: bool,
    pub payload: Vec<u8>,
}

/// Opaque snapshot of the post-state of some parent, as returned by the
/// state resolver.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainStateSnapshot {
    pub shard: ShardId,
    pub block_ids: Vec<BlockId>,
    pub min_mc_block_id: BlockId,
    pub seqno: BlockSeqno,
    pub state_root: Hash,
}

impl ChainStateSnapshot {
    #[must_use]
    pub fn block_ids(&self) -> &[BlockId] {
        &self.block_ids
    }
}
