//! # Source Bookkeeping
//!
//! One [`SourceState`] per validator of the session: its identity, the
//! blocks seen per height, monotone received/delivered frontiers, fork ids,
//! and blame state. A source is blamed on its first proof of misbehavior;
//! once blamed it contributes no further delivered blocks.

use shared_crypto::Ed25519PublicKey;
use shared_types::{ForkId, Height, NodeShortId, PeerShortId, SourceIdx};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Index of a block inside the DAG arena.
pub type BlockIdx = usize;

#[derive(Debug)]
pub struct SourceState {
    pub idx: SourceIdx,
    pub node_id: NodeShortId,
    pub adnl_id: PeerShortId,
    pub public_key: Ed25519PublicKey,

    /// Fork ids allocated to this source, in allocation order. A second
    /// entry means the source equivocated.
    fork_ids: Vec<ForkId>,
    blamed: bool,
    /// Per fork id: the lowest height at which blame evidence sits.
    blamed_heights: BTreeMap<ForkId, Height>,
    /// First observed fork proof, serialized; kept for re-broadcast.
    fork_proof: Option<Vec<u8>>,

    /// Block at each height (first one wins; a second is a fork).
    blocks: BTreeMap<Height, BlockIdx>,
    received_height: Height,
    delivered_height: Height,
}

impl SourceState {
    #[must_use]
    pub fn new(
        idx: SourceIdx,
        node_id: NodeShortId,
        adnl_id: PeerShortId,
        public_key: Ed25519PublicKey,
    ) -> Self {
        Self {
            idx,
            node_id,
            adnl_id,
            public_key,
            fork_ids: Vec::new(),
            blamed: false,
            blamed_heights: BTreeMap::new(),
            fork_proof: None,
            blocks: BTreeMap::new(),
            received_height: 0,
            delivered_height: 0,
        }
    }

    #[must_use]
    pub fn blamed(&self) -> bool {
        self.blamed
    }

    #[must_use]
    pub fn fork_ids(&self) -> &[ForkId] {
        &self.fork_ids
    }

    #[must_use]
    pub fn blamed_heights(&self) -> &BTreeMap<ForkId, Height> {
        &self.blamed_heights
    }

    #[must_use]
    pub fn fork_proof(&self) -> Option<&[u8]> {
        self.fork_proof.as_deref()
    }

    #[must_use]
    pub fn fork_is_found(&self) -> bool {
        self.fork_proof.is_some()
    }

    #[must_use]
    pub fn delivered_height(&self) -> Height {
        self.delivered_height
    }

    #[must_use]
    pub fn received_height(&self) -> Height {
        self.received_height
    }

    #[must_use]
    pub fn block_at(&self, height: Height) -> Option<BlockIdx> {
        self.blocks.get(&height).copied()
    }

    /// Record a fork id allocated by the chain for this source. Allocating a
    /// second one is itself proof of misbehavior.
    ///
    /// Returns `true` if this call newly blamed the source.
    pub fn add_fork(&mut self, fork: ForkId) -> bool {
        let newly_blamed = if self.fork_ids.is_empty() {
            false
        } else {
            self.blame()
        };
        self.fork_ids.push(fork);
        info!(source = self.idx, fork, "adding fork of source");
        newly_blamed
    }

    /// Blame with evidence location. Returns `true` on the first blame.
    pub fn blame_at(&mut self, fork: ForkId, height: Height) -> bool {
        let newly = self.blame();
        let entry = self.blamed_heights.entry(fork).or_insert(height);
        if *entry > height {
            *entry = height;
        }
        info!(source = self.idx, fork, height, "blamed at");
        newly
    }

    /// Blame without evidence location. Returns `true` on the first blame.
    pub fn blame(&mut self) -> bool {
        if self.blamed {
            return false;
        }
        warn!(source = self.idx, "blaming source");
        self.blamed = true;
        self.blocks.clear();
        self.delivered_height = 0;
        true
    }

    /// First sighting of a block of this source at `height`.
    ///
    /// Returns the previously known block at that height if the new one is a
    /// fork (different hash is checked by the caller).
    pub fn on_new_block(&mut self, height: Height, idx: BlockIdx) -> Option<BlockIdx> {
        if self.fork_is_found() {
            return None;
        }
        if let Some(existing) = self.blocks.get(&height) {
            if *existing != idx {
                warn!(source = self.idx, height, "found fork on height");
                return Some(*existing);
            }
            return None;
        }
        self.blocks.insert(height, idx);
        None
    }

    /// Record the first observed fork proof. Returns `true` the first time.
    pub fn on_found_fork_proof(&mut self, proof: Vec<u8>) -> bool {
        if self.fork_is_found() {
            return false;
        }
        self.fork_proof = Some(proof);
        true
    }

    /// Advance the contiguous received frontier; `initialized` reports
    /// whether the block at a height is past structural init.
    pub fn block_received(&mut self, height: Height, initialized: impl Fn(BlockIdx) -> bool) {
        if self.blamed {
            return;
        }
        if self.received_height + 1 == height {
            self.received_height = height;
        }
        loop {
            match self.blocks.get(&(self.received_height + 1)) {
                Some(idx) if initialized(*idx) => self.received_height += 1,
                _ => return,
            }
        }
    }

    /// Advance the contiguous delivered frontier.
    pub fn block_delivered(&mut self, height: Height, delivered: impl Fn(BlockIdx) -> bool) {
        if self.blamed {
            return;
        }
        if self.delivered_height + 1 == height {
            self.delivered_height = height;
        }
        loop {
            match self.blocks.get(&(self.delivered_height + 1)) {
                Some(idx) if delivered(*idx) => self.delivered_height += 1,
                _ => return,
            }
        }
    }
}
