//! # Block DAG
//!
//! The receiver's content-addressed DAG. Pure state machine: blocks enter as
//! stubs or full blocks, move `none -> initialized -> delivered` (or the
//! absorbing `ill`), and every externally visible consequence comes out as a
//! [`DagEvent`]. Persistence gating (`in_db`) and the scheduler queue mirror
//! the delivery rule: a block runs only when structurally complete, durable,
//! and with every ancestor delivered.

use crate::source::{BlockIdx, SourceState};
use crate::wire::{
    self, BlockPayload, WireBlock, WireBlockDep,
};
use shared_crypto::sha256;
use shared_types::{CoreError, ForkId, Hash, Height, SessionId, SourceIdx};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Lifecycle of a DAG node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockState {
    /// Known only as a dependency stub.
    None,
    /// Structure parsed, ancestors registered.
    Initialized,
    /// Handed upward; ancestors all delivered first.
    Delivered,
    /// Proven to sit on a forbidden branch. Absorbing.
    Ill,
}

/// Externally visible consequences of DAG transitions.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DagEvent {
    /// Emit the block to the consensus layer, in causal order.
    Deliver {
        source: SourceIdx,
        fork: ForkId,
        hash: Hash,
        height: Height,
        prev: Hash,
        deps: Vec<Hash>,
        vt: Vec<Height>,
        payload: Vec<u8>,
    },
    /// The source was newly blamed.
    Blame { source: SourceIdx },
    /// A fork proof to publish as our own prepared event.
    ForkProof { source: SourceIdx, payload: Vec<u8> },
}

/// One DAG node.
#[derive(Debug)]
pub struct ReceivedBlock {
    pub hash: Hash,
    pub data_hash: Hash,
    /// `n_sources` for the root pseudo-block.
    pub src: SourceIdx,
    pub height: Height,
    pub fork_id: Option<ForkId>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    pub prev: Option<BlockIdx>,
    /// First child on the same source chain; a second child forks.
    pub next: Option<BlockIdx>,
    pub deps: Vec<BlockIdx>,
    pub rev_deps: Vec<BlockIdx>,
    /// Per fork id: the maximum height reachable through this block.
    pub vt: Vec<Height>,
    pub pending_deps: u32,
    pub in_db: bool,
    pub state: BlockState,
    /// Original wire form, kept for serving queries and exporting deps.
    pub wire: Option<WireBlock>,
}

impl ReceivedBlock {
    #[must_use]
    pub fn is_ill(&self) -> bool {
        self.state == BlockState::Ill
    }

    #[must_use]
    pub fn delivered(&self) -> bool {
        self.state == BlockState::Delivered
    }

    #[must_use]
    pub fn initialized(&self) -> bool {
        matches!(self.state, BlockState::Initialized | BlockState::Delivered)
    }

    /// This block as a dependency stub.
    #[must_use]
    pub fn export_dep(&self) -> WireBlockDep {
        WireBlockDep {
            src: self.src,
            height: self.height,
            data_hash: self.data_hash,
            signature: self.signature.clone(),
        }
    }
}

/// The receiver's DAG of one session.
pub struct BlockDag {
    session: SessionId,
    n_sources: u32,
    local_idx: SourceIdx,
    blocks: Vec<ReceivedBlock>,
    index: HashMap<Hash, BlockIdx>,
    sources: Vec<SourceState>,
    total_forks: ForkId,
    root: BlockIdx,
    to_run: VecDeque<BlockIdx>,
    events: Vec<DagEvent>,
}

impl BlockDag {
    #[must_use]
    pub fn new(session: SessionId, sources: Vec<SourceState>, local_idx: SourceIdx) -> Self {
        let n_sources = sources.len() as u32;
        let root_hash = wire::root_hash(&session);
        let root_block = ReceivedBlock {
            hash: root_hash,
            data_hash: session.as_hash(),
            src: n_sources,
            height: 0,
            fork_id: Some(0),
            payload: Vec::new(),
            signature: Vec::new(),
            prev: None,
            next: None,
            deps: Vec::new(),
            rev_deps: Vec::new(),
            vt: Vec::new(),
            pending_deps: 0,
            in_db: true,
            state: BlockState::Delivered,
            wire: None,
        };
        let mut index = HashMap::new();
        index.insert(root_hash, 0);
        Self {
            session,
            n_sources,
            local_idx,
            blocks: vec![root_block],
            index,
            sources,
            total_forks: 0,
            root: 0,
            to_run: VecDeque::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    #[must_use]
    pub fn n_sources(&self) -> u32 {
        self.n_sources
    }

    #[must_use]
    pub fn local_idx(&self) -> SourceIdx {
        self.local_idx
    }

    #[must_use]
    pub fn root(&self) -> BlockIdx {
        self.root
    }

    #[must_use]
    pub fn root_hash(&self) -> Hash {
        self.blocks[self.root].hash
    }

    #[must_use]
    pub fn source(&self, idx: SourceIdx) -> Option<&SourceState> {
        self.sources.get(idx as usize)
    }

    #[must_use]
    pub fn source_by_adnl(&self, adnl_id: shared_types::PeerShortId) -> Option<&SourceState> {
        self.sources.iter().find(|s| s.adnl_id == adnl_id)
    }

    #[must_use]
    pub fn lookup(&self, hash: &Hash) -> Option<BlockIdx> {
        self.index.get(hash).copied()
    }

    #[must_use]
    pub fn block(&self, idx: BlockIdx) -> &ReceivedBlock {
        &self.blocks[idx]
    }

    /// Identity hash of a source index (or the session hash for the
    /// pseudo-source).
    fn src_hash(&self, src: SourceIdx) -> Hash {
        if src == self.n_sources {
            self.session.as_hash()
        } else {
            self.sources[src as usize].node_id.as_hash()
        }
    }

    /// Our delivered-height frontier, one entry per source.
    #[must_use]
    pub fn delivered_heights(&self) -> Vec<Height> {
        self.sources.iter().map(|s| s.delivered_height()).collect()
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Admit a dependency stub; returns the existing node when known.
    pub fn create_from_dep(&mut self, dep: &WireBlockDep) -> Result<BlockIdx, CoreError> {
        wire::pre_validate_dep(&self.session, self.n_sources, dep)?;
        if dep.height == 0 {
            return Ok(self.root);
        }
        let hash = wire::dep_hash(&self.session, self.src_hash(dep.src), dep.height, dep.data_hash);
        if let Some(idx) = self.index.get(&hash) {
            return Ok(*idx);
        }
        let idx = self.blocks.len();
        self.blocks.push(ReceivedBlock {
            hash,
            data_hash: dep.data_hash,
            src: dep.src,
            height: dep.height,
            fork_id: None,
            payload: Vec::new(),
            signature: dep.signature.clone(),
            prev: None,
            next: None,
            deps: Vec::new(),
            rev_deps: Vec::new(),
            vt: Vec::new(),
            pending_deps: 0,
            in_db: false,
            state: BlockState::None,
            wire: None,
        });
        self.index.insert(hash, idx);
        self.register_with_source(idx);
        Ok(idx)
    }

    /// Admit a full block. Idempotent on the content address; a stub created
    /// earlier is upgraded in place.
    pub fn create_from_block(
        &mut self,
        block: WireBlock,
        payload: Vec<u8>,
    ) -> Result<BlockIdx, CoreError> {
        let hash = wire::block_hash(
            &self.session,
            self.src_hash(block.src),
            block.height,
            &payload,
        );
        if let Some(idx) = self.index.get(&hash).copied() {
            if !self.blocks[idx].initialized() {
                self.initialize(idx, block, payload)?;
            }
            return Ok(idx);
        }
        let idx = self.blocks.len();
        self.blocks.push(ReceivedBlock {
            hash,
            data_hash: sha256(&payload),
            src: block.src,
            height: block.height,
            fork_id: None,
            payload: Vec::new(),
            signature: block.signature.clone(),
            prev: None,
            next: None,
            deps: Vec::new(),
            rev_deps: Vec::new(),
            vt: Vec::new(),
            pending_deps: 0,
            in_db: false,
            state: BlockState::None,
            wire: None,
        });
        self.index.insert(hash, idx);
        self.register_with_source(idx);
        self.initialize(idx, block, payload)?;
        Ok(idx)
    }

    /// First sighting hook: fork detection on `(src, height)` duplicates.
    fn register_with_source(&mut self, idx: BlockIdx) {
        let (src, height) = (self.blocks[idx].src, self.blocks[idx].height);
        if src == self.n_sources {
            return;
        }
        let existing = self.sources[src as usize].on_new_block(height, idx);
        let Some(existing_idx) = existing else {
            return;
        };
        if self.blocks[existing_idx].hash == self.blocks[idx].hash {
            return;
        }
        // Two distinct blocks of one source at one height: synthesize the
        // proof from both stubs and blame.
        let proof = BlockPayload::ForkBlame {
            left: self.blocks[idx].export_dep(),
            right: self.blocks[existing_idx].export_dep(),
        };
        let proof_bytes = bincode::serialize(&proof).expect("bincode serialize");
        let source = &mut self.sources[src as usize];
        if source.on_found_fork_proof(proof_bytes.clone()) {
            self.events.push(DagEvent::ForkProof {
                source: src,
                payload: proof_bytes,
            });
        }
        if source.blame() {
            self.events.push(DagEvent::Blame { source: src });
        }
    }

    fn initialize(
        &mut self,
        idx: BlockIdx,
        block: WireBlock,
        payload: Vec<u8>,
    ) -> Result<(), CoreError> {
        if self.blocks[idx].state != BlockState::None {
            return Ok(());
        }
        debug_assert!(!payload.is_empty());

        let prev_idx = self.create_from_dep(&block.data.prev)?;
        let mut dep_idxs = Vec::with_capacity(block.data.deps.len());
        for dep in &block.data.deps {
            dep_idxs.push(self.create_from_dep(dep)?);
        }

        {
            let node = &mut self.blocks[idx];
            node.payload = payload;
            node.signature = block.signature.clone();
            node.prev = Some(prev_idx);
            node.deps = dep_idxs.clone();
            node.wire = Some(block);
            node.state = BlockState::Initialized;
        }
        debug!(
            block = %self.blocks[idx].hash.short_tag(),
            payload_size = self.blocks[idx].payload.len(),
            "initialized"
        );

        if self.blocks[prev_idx].is_ill() || dep_idxs.iter().any(|d| self.blocks[*d].is_ill()) {
            self.set_ill(idx);
            return Ok(());
        }

        let mut pending = 0u32;
        for ancestor in std::iter::once(prev_idx).chain(dep_idxs.iter().copied()) {
            if self.blocks[ancestor].delivered() {
                self.merge_vt_from(idx, ancestor);
            } else {
                pending += 1;
                self.blocks[ancestor].rev_deps.push(idx);
            }
        }
        self.blocks[idx].pending_deps = pending;
        if pending == 0 && self.blocks[idx].in_db {
            self.schedule(idx);
        }

        let (src, height) = (self.blocks[idx].src, self.blocks[idx].height);
        let blocks = &self.blocks;
        self.sources[src as usize].block_received(height, |i| blocks[i].initialized());
        Ok(())
    }

    // =========================================================================
    // PERSISTENCE GATE
    // =========================================================================

    /// The journal acknowledged this block's row.
    pub fn written(&mut self, hash: &Hash) {
        let Some(idx) = self.lookup(hash) else {
            return;
        };
        if !self.blocks[idx].in_db {
            self.blocks[idx].in_db = true;
            if self.blocks[idx].initialized() && self.blocks[idx].pending_deps == 0 {
                self.schedule(idx);
            }
        }
    }

    fn schedule(&mut self, idx: BlockIdx) {
        self.to_run.push_back(idx);
    }

    // =========================================================================
    // SCHEDULER
    // =========================================================================

    /// Run every scheduled block to quiescence and drain the effect events.
    pub fn run_scheduler(&mut self) -> Vec<DagEvent> {
        while let Some(idx) = self.to_run.pop_front() {
            self.run_block(idx);
        }
        std::mem::take(&mut self.events)
    }

    fn run_block(&mut self, idx: BlockIdx) {
        match self.blocks[idx].state {
            BlockState::Ill | BlockState::None | BlockState::Delivered => return,
            BlockState::Initialized => {}
        }
        debug_assert_eq!(self.blocks[idx].pending_deps, 0);
        debug_assert!(self.blocks[idx].in_db);

        self.initialize_fork(idx);
        self.pre_deliver(idx);
        self.deliver(idx);
    }

    /// Assign the block's fork id: first blocks get a fresh fork, first
    /// children inherit, later children fork the source.
    fn initialize_fork(&mut self, idx: BlockIdx) {
        if self.blocks[idx].fork_id.is_some() {
            return;
        }
        let src = self.blocks[idx].src;
        let fork = if self.blocks[idx].height == 1 {
            self.add_fork(src)
        } else {
            let prev_idx = self.blocks[idx].prev.expect("initialized block has prev");
            if self.blocks[prev_idx].next.is_none() {
                self.blocks[prev_idx].next = Some(idx);
                self.blocks[prev_idx]
                    .fork_id
                    .expect("delivered prev has fork")
            } else {
                self.add_fork(src)
            }
        };
        let height = self.blocks[idx].height;
        let node = &mut self.blocks[idx];
        node.fork_id = Some(fork);
        if node.vt.len() <= fork as usize {
            node.vt.resize(fork as usize + 1, 0);
        }
        debug_assert!(node.vt[fork as usize] < height);
        node.vt[fork as usize] = height;
    }

    fn add_fork(&mut self, src: SourceIdx) -> ForkId {
        self.total_forks += 1;
        let fork = self.total_forks;
        if self.sources[src as usize].add_fork(fork) {
            self.events.push(DagEvent::Blame { source: src });
        }
        fork
    }

    /// Semantic checks and payload recognition just before delivery.
    fn pre_deliver(&mut self, idx: BlockIdx) {
        if self.blocks[idx].is_ill() {
            return;
        }
        let prev_idx = match self.blocks[idx].prev {
            Some(p) => p,
            None => return,
        };
        let carrier_src = self.blocks[idx].src;
        let carrier_fork = self.blocks[idx].fork_id.expect("fork assigned");
        let carrier_height = self.blocks[idx].height;

        let deps = self.blocks[idx].deps.clone();
        for dep_idx in deps {
            let dep_src = self.blocks[dep_idx].src;
            let dep_height = self.blocks[dep_idx].height;
            let dep_fork = match self.blocks[dep_idx].fork_id {
                Some(f) => f,
                None => continue,
            };
            let prev_vt = &self.blocks[prev_idx].vt;

            // Redundant indirect: prev already reaches this dep's fork at or
            // beyond the cited height.
            if prev_vt.get(dep_fork as usize).copied().unwrap_or(0) >= dep_height {
                warn!(
                    block = %self.blocks[idx].hash.short_tag(),
                    dep_src, "direct dep already covered by prev"
                );
                self.set_ill(idx);
                return;
            }

            if self.sources[dep_src as usize].blamed() {
                // Citing a blamed source while prev reaches another of its
                // forks condemns the carrier too.
                let forks = self.sources[dep_src as usize].fork_ids().to_vec();
                for fork in forks {
                    if fork != dep_fork && prev_vt.get(fork as usize).copied().unwrap_or(0) > 0 {
                        warn!(
                            block = %self.blocks[idx].hash.short_tag(),
                            dep_src, fork, "direct dep to one fork, indirect to another"
                        );
                        self.blame_source_at(carrier_src, carrier_fork, carrier_height);
                        self.set_ill(idx);
                        return;
                    }
                }
                let blamed_heights: Vec<(ForkId, Height)> = self.sources[dep_src as usize]
                    .blamed_heights()
                    .iter()
                    .map(|(f, h)| (*f, *h))
                    .collect();
                for (fork, height) in blamed_heights {
                    if prev_vt.get(fork as usize).copied().unwrap_or(0) >= height {
                        warn!(
                            block = %self.blocks[idx].hash.short_tag(),
                            dep_src, fork, height,
                            "direct dep to source known blamed through prev"
                        );
                        self.blame_source_at(carrier_src, carrier_fork, carrier_height);
                        self.set_ill(idx);
                        return;
                    }
                }
            }
        }

        // Inner payload recognition; undecodable payloads pass through as
        // opaque broadcasts.
        let payload = self.blocks[idx].payload.clone();
        if let Ok(BlockPayload::ForkBlame { left, right }) =
            bincode::deserialize::<BlockPayload>(&payload)
        {
            self.pre_deliver_fork_blame(idx, left, right);
        }
    }

    /// Validate a fork-blame payload and blame the proven source.
    fn pre_deliver_fork_blame(&mut self, idx: BlockIdx, left: WireBlockDep, right: WireBlockDep) {
        for dep in [&left, &right] {
            if let Err(e) = self.validate_dep_sync(dep) {
                warn!(block = %self.blocks[idx].hash.short_tag(),
                      "incorrect fork blame: cited block invalid: {e}");
                self.set_ill(idx);
                return;
            }
        }
        if left.height != right.height || left.src != right.src || left.data_hash == right.data_hash
        {
            warn!(block = %self.blocks[idx].hash.short_tag(), "incorrect fork blame: not a fork");
            self.set_ill(idx);
            return;
        }
        let carrier_fork = self.blocks[idx].fork_id.expect("fork assigned");
        let carrier_height = self.blocks[idx].height;
        let proof = BlockPayload::ForkBlame {
            left: left.clone(),
            right,
        };
        let proof_bytes = bincode::serialize(&proof).expect("bincode serialize");
        let source = &mut self.sources[left.src as usize];
        source.on_found_fork_proof(proof_bytes);
        if source.blame_at(carrier_fork, carrier_height) {
            self.events.push(DagEvent::Blame { source: left.src });
        }
    }

    /// Structural plus signature validation of a cited dependency.
    pub fn validate_dep_sync(&self, dep: &WireBlockDep) -> Result<(), CoreError> {
        wire::pre_validate_dep(&self.session, self.n_sources, dep)?;
        if dep.height == 0 {
            return Ok(());
        }
        let hash = wire::dep_hash(&self.session, self.src_hash(dep.src), dep.height, dep.data_hash);
        let source = &self.sources[dep.src as usize];
        source
            .public_key
            .verify(&wire::block_sign_data(&hash), &dep.signature)
            .map_err(|_| CoreError::proto("bad dep signature"))
    }

    fn blame_source_at(&mut self, src: SourceIdx, fork: ForkId, height: Height) {
        if src == self.n_sources {
            return;
        }
        if self.sources[src as usize].blame_at(fork, height) {
            self.events.push(DagEvent::Blame { source: src });
        }
    }

    fn deliver(&mut self, idx: BlockIdx) {
        if self.blocks[idx].is_ill() {
            return;
        }
        debug_assert_eq!(self.blocks[idx].state, BlockState::Initialized);

        let src = self.blocks[idx].src;
        // A blamed source's blocks still advance the DAG so descendants of
        // honest sources can deliver, but they are not handed upward.
        if !self.sources[src as usize].blamed() {
            let node = &self.blocks[idx];
            let prev_hash = node.prev.map(|p| self.blocks[p].hash).unwrap_or_default();
            let deps = node.deps.iter().map(|d| self.blocks[*d].hash).collect();
            self.events.push(DagEvent::Deliver {
                source: node.src,
                fork: node.fork_id.expect("fork assigned"),
                hash: node.hash,
                height: node.height,
                prev: prev_hash,
                deps,
                vt: node.vt.clone(),
                payload: node.payload.clone(),
            });
        }

        self.blocks[idx].state = BlockState::Delivered;
        debug!(block = %self.blocks[idx].hash.short_tag(), "delivered");

        let waiters = std::mem::take(&mut self.blocks[idx].rev_deps);
        for waiter in waiters {
            self.dep_delivered(waiter, idx);
        }

        let height = self.blocks[idx].height;
        let blocks = &self.blocks;
        self.sources[src as usize].block_delivered(height, |i| blocks[i].delivered());
    }

    fn dep_delivered(&mut self, idx: BlockIdx, ancestor: BlockIdx) {
        if self.blocks[idx].is_ill() {
            return;
        }
        self.merge_vt_from(idx, ancestor);
        self.blocks[idx].pending_deps -= 1;
        if self.blocks[idx].pending_deps == 0 && self.blocks[idx].in_db {
            self.schedule(idx);
        }
    }

    /// Element-wise max merge of an ancestor's reachability vector.
    fn merge_vt_from(&mut self, idx: BlockIdx, ancestor: BlockIdx) {
        let ancestor_vt = self.blocks[ancestor].vt.clone();
        let node = &mut self.blocks[idx];
        if ancestor_vt.len() > node.vt.len() {
            node.vt.resize(ancestor_vt.len(), 0);
        }
        for (i, h) in ancestor_vt.iter().enumerate() {
            if node.vt[i] < *h {
                node.vt[i] = *h;
            }
        }
    }

    /// Mark a block (and its reverse closure) permanently rejected.
    fn set_ill(&mut self, idx: BlockIdx) {
        if self.blocks[idx].is_ill() {
            return;
        }
        warn!(block = %self.blocks[idx].hash.short_tag(), "got ill");
        let src = self.blocks[idx].src;
        if src != self.n_sources && self.sources[src as usize].blame() {
            self.events.push(DagEvent::Blame { source: src });
        }
        self.blocks[idx].state = BlockState::Ill;
        let waiters = self.blocks[idx].rev_deps.clone();
        for waiter in waiters {
            self.set_ill(waiter);
        }
    }

    // =========================================================================
    // SYNC SUPPORT
    // =========================================================================

    /// Hashes of not-yet-initialized ancestors reachable from `idx`, bounded
    /// by `max_size`. Dependency-first fetch order for the sync protocol.
    pub fn find_pending_deps(&self, idx: BlockIdx, max_size: usize, out: &mut Vec<Hash>) {
        if self.blocks[idx].height == 0
            || self.blocks[idx].is_ill()
            || self.blocks[idx].delivered()
            || out.len() >= max_size
        {
            return;
        }
        if !self.blocks[idx].initialized() {
            out.push(self.blocks[idx].hash);
            return;
        }
        if let Some(prev) = self.blocks[idx].prev {
            self.find_pending_deps(prev, max_size, out);
        }
        for dep in self.blocks[idx].deps.clone() {
            self.find_pending_deps(dep, max_size, out);
        }
    }

    /// Every block not yet delivered whose structure is known: tips for
    /// pending-dependency walks.
    #[must_use]
    pub fn dangling_tips(&self) -> Vec<BlockIdx> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.state == BlockState::Initialized && b.pending_deps > 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Wire form of a stored block, for serving queries.
    #[must_use]
    pub fn export_block(&self, idx: BlockIdx) -> Option<(WireBlock, Vec<u8>)> {
        let node = &self.blocks[idx];
        node.wire
            .as_ref()
            .map(|w| (w.clone(), node.payload.clone()))
    }

    /// Blocks a peer with delivered-heights `rt` is missing, capped at
    /// `max_blocks`.
    #[must_use]
    pub fn difference(&self, rt: &[Height], max_blocks: usize) -> Vec<(WireBlock, Vec<u8>)> {
        let mut out = Vec::new();
        for source in &self.sources {
            if source.blamed() {
                continue;
            }
            let their = rt.get(source.idx as usize).copied().unwrap_or(0);
            let our = source.delivered_height();
            let mut height = their + 1;
            while height <= our && out.len() < max_blocks {
                let Some(idx) = source.block_at(height) else {
                    break;
                };
                if let Some(exported) = self.export_block(idx) {
                    out.push(exported);
                }
                height += 1;
            }
        }
        out
    }
}
