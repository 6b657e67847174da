//! # Catchain Receiver
//!
//! The actor owning one session's DAG. Inbound traffic (blocks, queries,
//! broadcasts) arrives as [`ReceiverMessage`]s; consequences flow upward as
//! [`ReceiverEvent`]s over an unbounded channel. Every admitted block is
//! journaled before it may deliver; on restart the journal is replayed and
//! [`ReceiverEvent::Started`] fires once the replay completes.

use crate::dag::{BlockDag, DagEvent};
use crate::source::SourceState;
use crate::wire::{
    self, block_db_key, CatchainAnswer, CatchainQuery, OverlayMessage, StoredBlockRow, WireBlock,
};
use async_trait::async_trait;
use bytes::Bytes;
use cc_01_actor_runtime::Actor;
use cc_02_journal::Journal;
use cc_03_overlay_sender::{OverlaySender, SenderError};
use rand::seq::SliceRandom;
use rand::Rng;
use shared_crypto::Ed25519KeyPair;
use shared_types::{
    CoreError, Hash, NodeShortId, PeerShortId, RateLimit, RateLimiter, SessionId, SourceIdx,
    Timestamp,
};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// One roster entry: a validator's long-term key and overlay identity.
#[derive(Clone, Debug)]
pub struct CatchainNode {
    pub public_key: shared_crypto::Ed25519PublicKey,
    pub adnl_id: PeerShortId,
}

/// Receiver tunables.
#[derive(Clone, Debug)]
pub struct CatchainOptions {
    pub max_deps: u32,
    pub max_serialized_block_size: usize,
    pub sync_interval: Duration,
    pub neighbours_count: usize,
    /// Cap on blocks shipped per difference/history answer and per pending
    /// fetch.
    pub max_sync_blocks: usize,
    pub query_timeout: Duration,
    /// Operator-gated: permit rewriting our own chain after a lost DB. Never
    /// enable by default.
    pub allow_unsafe_self_blocks_resync: bool,
    pub global_query_limit: RateLimit,
    pub difference_query_limit: RateLimit,
}

impl Default for CatchainOptions {
    fn default() -> Self {
        Self {
            max_deps: 4,
            max_serialized_block_size: 16 * 1024 * 1024,
            sync_interval: Duration::from_secs(2),
            neighbours_count: 5,
            max_sync_blocks: 100,
            query_timeout: Duration::from_secs(5),
            allow_unsafe_self_blocks_resync: false,
            global_query_limit: RateLimit::new(0.0, 0),
            difference_query_limit: RateLimit::new(0.0, 0),
        }
    }
}

/// Everything the receiver reports upward.
#[derive(Debug)]
pub enum ReceiverEvent {
    /// Replay finished; the receiver is live.
    Started,
    /// A block reached causal delivery. Emitted exactly once per block,
    /// ancestors always first.
    NewBlock {
        source: SourceIdx,
        fork: shared_types::ForkId,
        hash: Hash,
        height: shared_types::Height,
        prev: Hash,
        deps: Vec<Hash>,
        vt: Vec<shared_types::Height>,
        payload: Bytes,
    },
    /// A source was proven misbehaving. At most once per source.
    Blame { source: SourceIdx },
    /// A non-catchain query from a peer; answer through `reply`.
    CustomQuery {
        src: NodeShortId,
        data: Bytes,
        reply: oneshot::Sender<Result<Bytes, CoreError>>,
    },
    /// A non-block message from a peer.
    CustomMessage { src: NodeShortId, data: Bytes },
    /// An overlay broadcast (deduplicated by the overlay).
    Broadcast { src: NodeShortId, data: Bytes },
}

/// Mailbox protocol of the receiver actor.
#[derive(Debug)]
pub enum ReceiverMessage {
    /// Queue a locally produced block.
    AddBlock { payload: Vec<u8>, deps: Vec<Hash> },
    /// Raw message from the overlay.
    OverlayMessage { src: PeerShortId, data: Bytes },
    /// Raw query from the overlay; the answer goes to `reply`.
    OverlayQuery {
        src: PeerShortId,
        data: Bytes,
        reply: oneshot::Sender<Result<Bytes, CoreError>>,
    },
    /// Raw broadcast from the overlay.
    OverlayBroadcast { src: PeerShortId, data: Bytes },
    /// Periodic neighbour synchronization.
    SyncTick,
    Stop,
}

/// Transport failures degrade to retryable statuses for the sync loop.
fn sender_error(e: SenderError) -> CoreError {
    match e {
        SenderError::Timeout => CoreError::Timeout,
        _ => CoreError::NotReady,
    }
}

/// Rate-limited query kinds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum QueryKind {
    GetBlock,
    GetBlocks,
    GetBlockHistory,
    GetDifference,
    Custom,
}

/// The receiver actor.
pub struct Receiver {
    options: CatchainOptions,
    keypair: Ed25519KeyPair,
    local_adnl: PeerShortId,
    dag: BlockDag,
    journal: Arc<dyn Journal>,
    overlay: Arc<dyn OverlaySender>,
    events: mpsc::UnboundedSender<ReceiverEvent>,
    limiter: RateLimiter<QueryKind>,
    neighbours: Vec<SourceIdx>,
    /// Arena index of our latest produced (or restored) block; the root when
    /// we have none.
    last_sent_block: usize,
    started: bool,
    blamed_reported: Vec<bool>,
}

impl Receiver {
    /// Build a receiver for `session`. `nodes` is the roster in source-index
    /// order; the entry matching `keypair` is the local validator.
    pub fn new(
        session: SessionId,
        nodes: &[CatchainNode],
        keypair: Ed25519KeyPair,
        options: CatchainOptions,
        journal: Arc<dyn Journal>,
        overlay: Arc<dyn OverlaySender>,
        events: mpsc::UnboundedSender<ReceiverEvent>,
    ) -> Result<Self, CoreError> {
        let local_id = keypair.short_id();
        let mut local_idx = None;
        let mut local_adnl = None;
        let sources: Vec<SourceState> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let short = node.public_key.short_id();
                if short == local_id {
                    local_idx = Some(i as SourceIdx);
                    local_adnl = Some(node.adnl_id);
                }
                SourceState::new(i as SourceIdx, short, node.adnl_id, node.public_key)
            })
            .collect();
        let local_idx =
            local_idx.ok_or_else(|| CoreError::proto("local key not in the session roster"))?;
        let local_adnl = local_adnl.unwrap_or_default();

        let mut limits = BTreeMap::new();
        limits.insert(QueryKind::GetDifference, options.difference_query_limit);
        let limiter = RateLimiter::new(options.global_query_limit, limits);

        let n = sources.len();
        let dag = BlockDag::new(session, sources, local_idx);
        let root = dag.root();
        Ok(Self {
            options,
            keypair,
            local_adnl,
            dag,
            journal,
            overlay,
            events,
            limiter,
            neighbours: Vec::new(),
            last_sent_block: root,
            started: false,
            blamed_reported: vec![false; n],
        })
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        self.dag.session()
    }

    #[must_use]
    pub fn local_idx(&self) -> SourceIdx {
        self.dag.local_idx()
    }

    // =========================================================================
    // STARTUP / REPLAY
    // =========================================================================

    async fn start_up_inner(&mut self) -> Result<(), CoreError> {
        let rows = self
            .journal
            .scan_prefix(b"catchain/block/")
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))?;
        let mut replayed = 0usize;
        for (_key, value) in rows {
            let Ok(row) = bincode::deserialize::<StoredBlockRow>(&value) else {
                return Err(CoreError::FatalCorruption("unreadable block row".into()));
            };
            match self.admit_block(row.block, row.payload, true) {
                Ok(()) => replayed += 1,
                Err(e) => warn!(session = %self.session(), "replay skipped a row: {e}"),
            }
        }
        self.flush_dag_events().await;
        self.restore_last_sent();
        if !self.restore_neighbours() {
            self.choose_neighbours();
        }
        // One initial sync round before going live; unreachable neighbours
        // only delay us by the query timeout.
        self.synchronize().await;
        self.started = true;
        info!(session = %self.session(), replayed, "catchain receiver started");
        let _ = self.events.send(ReceiverEvent::Started);
        Ok(())
    }

    /// Continue our own chain where the journal left it.
    fn restore_last_sent(&mut self) {
        let local = self.dag.local_idx();
        let Some(source) = self.dag.source(local) else {
            return;
        };
        let height = source.delivered_height();
        if height == 0 {
            return;
        }
        if let Some(idx) = source.block_at(height) {
            self.last_sent_block = idx;
            info!(
                session = %self.session(),
                height, "restored own chain tip from journal"
            );
        }
    }

    fn choose_neighbours(&mut self) {
        let mut rng = rand::thread_rng();
        let mut others: Vec<SourceIdx> = (0..self.dag.n_sources())
            .filter(|i| *i != self.dag.local_idx())
            .collect();
        others.shuffle(&mut rng);
        others.truncate(self.options.neighbours_count);
        self.neighbours = others;
        if let Ok(bytes) = bincode::serialize(&self.neighbours) {
            if let Err(e) = self.journal.set(&wire::neighbours_db_key(), &bytes) {
                warn!(session = %self.session(), "neighbour snapshot failed: {e}");
            }
        }
    }

    /// Reload the last neighbour set; a fresh journal yields nothing.
    fn restore_neighbours(&mut self) -> bool {
        let Ok(Some(bytes)) = self.journal.get(&wire::neighbours_db_key()) else {
            return false;
        };
        let Ok(neighbours) = bincode::deserialize::<Vec<SourceIdx>>(&bytes) else {
            return false;
        };
        let n = self.dag.n_sources();
        if neighbours.iter().any(|i| *i >= n) {
            return false;
        }
        self.neighbours = neighbours;
        !self.neighbours.is_empty()
    }

    // =========================================================================
    // LOCAL BLOCK PRODUCTION
    // =========================================================================

    /// Produce, persist, and announce our next block.
    async fn add_block(&mut self, payload: Vec<u8>, deps: Vec<Hash>) -> Result<(), CoreError> {
        let prev_block = self.dag.block(self.last_sent_block);
        let height = prev_block.height + 1;
        let prev_dep = if prev_block.height == 0 {
            wire::root_dep(self.session(), self.dag.n_sources())
        } else {
            prev_block.export_dep()
        };

        // Rewriting a height the network already attributes to us is an
        // intentional fork; only an operator may allow it.
        let local = self.dag.local_idx();
        if let Some(source) = self.dag.source(local) {
            if source.block_at(height).is_some() {
                if !self.options.allow_unsafe_self_blocks_resync {
                    let err = CoreError::FatalCorruption(format!(
                        "own block at height {height} already exists"
                    ));
                    error!(session = %self.session(), "{err}");
                    return Err(err);
                }
                warn!(
                    session = %self.session(),
                    height, "rewriting own block (unsafe resync enabled)"
                );
            }
        }

        let mut dep_stubs = Vec::with_capacity(deps.len());
        for hash in &deps {
            let idx = self
                .dag
                .lookup(hash)
                .ok_or_else(|| CoreError::proto("unknown dep hash"))?;
            dep_stubs.push(self.dag.block(idx).export_dep());
        }

        let src_hash = self
            .dag
            .source(local)
            .map(|s| s.node_id.as_hash())
            .unwrap_or_default();
        let hash = wire::block_hash(self.session(), src_hash, height, &payload);
        let signature = self.keypair.sign(&wire::block_sign_data(&hash)).to_vec();
        let block = WireBlock {
            session: *self.session(),
            src: local,
            height,
            data: wire::WireBlockData {
                prev: prev_dep,
                deps: dep_stubs,
            },
            signature,
        };

        self.admit_block(block.clone(), payload.clone(), false)?;
        if let Some(idx) = self.dag.lookup(&hash) {
            self.last_sent_block = idx;
        }
        self.flush_dag_events().await;

        // Announce to the current neighbours.
        let update = OverlayMessage::BlockUpdate { block, payload };
        let bytes = Bytes::from(bincode::serialize(&update).expect("bincode serialize"));
        for idx in self.neighbours.clone() {
            if let Some(adnl_id) = self.dag.source(idx).map(|s| s.adnl_id) {
                if let Err(e) = self
                    .overlay
                    .send_message(self.local_adnl, adnl_id, bytes.clone())
                    .await
                {
                    debug!(session = %self.session(), %adnl_id, "block announce failed: {e}");
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // BLOCK ADMISSION
    // =========================================================================

    /// Validate, persist, and feed one block into the DAG. `from_db` marks
    /// replay rows (already durable, no re-publication of fork proofs).
    fn admit_block(
        &mut self,
        block: WireBlock,
        payload: Vec<u8>,
        from_db: bool,
    ) -> Result<(), CoreError> {
        if payload.len() > self.options.max_serialized_block_size {
            return Err(CoreError::proto("oversized payload"));
        }
        wire::pre_validate_block(
            self.session(),
            self.dag.n_sources(),
            self.options.max_deps,
            &block,
            &payload,
        )?;
        // Authenticate the block and every cited dependency.
        let src_hash = self
            .dag
            .source(block.src)
            .map(|s| s.node_id.as_hash())
            .unwrap_or_default();
        let hash = wire::block_hash(self.session(), src_hash, block.height, &payload);
        self.dag
            .source(block.src)
            .ok_or_else(|| CoreError::proto("bad src"))?
            .public_key
            .verify(&wire::block_sign_data(&hash), &block.signature)
            .map_err(|_| CoreError::proto("bad block signature"))?;
        self.dag.validate_dep_sync(&block.data.prev)?;
        for dep in &block.data.deps {
            self.dag.validate_dep_sync(dep)?;
        }

        if !from_db {
            let row = StoredBlockRow {
                block: block.clone(),
                payload: payload.clone(),
            };
            let bytes =
                bincode::serialize(&row).map_err(|e| CoreError::FatalCorruption(e.to_string()))?;
            self.journal
                .set(&block_db_key(&hash), &bytes)
                .map_err(|e| CoreError::FatalCorruption(e.to_string()))?;
        }
        self.dag.create_from_block(block, payload)?;
        // The journal write above is synchronous: the row is durable before
        // the scheduler may deliver.
        self.dag.written(&hash);
        Ok(())
    }

    /// Drain DAG effects into receiver events; re-publish fork proofs as our
    /// own prepared events.
    async fn flush_dag_events(&mut self) {
        let events = self.dag.run_scheduler();
        let mut proofs = Vec::new();
        for event in events {
            match event {
                DagEvent::Deliver {
                    source,
                    fork,
                    hash,
                    height,
                    prev,
                    deps,
                    vt,
                    payload,
                } => {
                    let _ = self.events.send(ReceiverEvent::NewBlock {
                        source,
                        fork,
                        hash,
                        height,
                        prev,
                        deps,
                        vt,
                        payload: Bytes::from(payload),
                    });
                }
                DagEvent::Blame { source } => {
                    if !std::mem::replace(&mut self.blamed_reported[source as usize], true) {
                        let _ = self.events.send(ReceiverEvent::Blame { source });
                    }
                }
                DagEvent::ForkProof { source, payload } => {
                    debug!(session = %self.session(), source, "publishing fork proof");
                    proofs.push(payload);
                }
            }
        }
        if self.started {
            for proof in proofs {
                if let Err(e) = Box::pin(self.add_block(proof, Vec::new())).await {
                    warn!(session = %self.session(), "failed to publish fork proof: {e}");
                }
            }
        }
    }

    // =========================================================================
    // OVERLAY TRAFFIC
    // =========================================================================

    async fn on_overlay_message(&mut self, src: PeerShortId, data: Bytes) {
        match bincode::deserialize::<OverlayMessage>(&data) {
            Ok(OverlayMessage::Block { block, payload })
            | Ok(OverlayMessage::BlockUpdate { block, payload }) => {
                if let Err(e) = self.admit_block(block, payload, false) {
                    if !e.is_cancelled() {
                        warn!(session = %self.session(), %src, "dropping bad block: {e}");
                    }
                    return;
                }
                self.flush_dag_events().await;
            }
            Err(_) => {
                let Some(node_id) = self.node_id_of_peer(src) else {
                    return;
                };
                let _ = self
                    .events
                    .send(ReceiverEvent::CustomMessage { src: node_id, data });
            }
        }
    }

    async fn on_overlay_broadcast(&mut self, src: PeerShortId, data: Bytes) {
        let Some(node_id) = self.node_id_of_peer(src) else {
            debug!(session = %self.session(), %src, "broadcast from unknown peer");
            return;
        };
        let _ = self
            .events
            .send(ReceiverEvent::Broadcast { src: node_id, data });
    }

    fn node_id_of_peer(&self, src: PeerShortId) -> Option<NodeShortId> {
        self.dag.source_by_adnl(src).map(|s| s.node_id)
    }

    /// Sync answers are bounded by the same cap as a serialized block batch.
    fn max_answer_size(&self) -> u64 {
        (self.options.max_serialized_block_size as u64)
            .saturating_mul(self.options.max_sync_blocks as u64)
    }

    async fn process_query(
        &mut self,
        src: PeerShortId,
        data: Bytes,
    ) -> Result<Bytes, CoreError> {
        let query = match bincode::deserialize::<CatchainQuery>(&data) {
            Ok(query) => query,
            Err(_) => return self.forward_custom_query(src, data).await,
        };
        let kind = match &query {
            CatchainQuery::GetBlock { .. } => QueryKind::GetBlock,
            CatchainQuery::GetBlocks { .. } => QueryKind::GetBlocks,
            CatchainQuery::GetBlockHistory { .. } => QueryKind::GetBlockHistory,
            CatchainQuery::GetDifference { .. } => QueryKind::GetDifference,
        };
        if !self.limiter.check_in(kind, Timestamp::now()) {
            return Err(CoreError::NotReady);
        }

        let answer = match query {
            CatchainQuery::GetBlock { hash } => match self.export_by_hash(&hash) {
                Some((block, payload)) => CatchainAnswer::Block { block, payload },
                None => CatchainAnswer::BlockNotFound,
            },
            CatchainQuery::GetBlocks { hashes } => {
                let mut blocks = Vec::new();
                for hash in hashes.into_iter().take(self.options.max_sync_blocks) {
                    if let Some(exported) = self.export_by_hash(&hash) {
                        blocks.push(exported);
                    }
                }
                CatchainAnswer::Blocks { blocks }
            }
            CatchainQuery::GetBlockHistory {
                tip,
                height,
                stop_if,
            } => {
                let blocks = self.block_history(&tip, height, &stop_if);
                CatchainAnswer::BlockHistory { blocks }
            }
            CatchainQuery::GetDifference { rt } => {
                if rt.len() != self.dag.n_sources() as usize {
                    return Err(CoreError::proto("bad rt vector length"));
                }
                CatchainAnswer::Difference {
                    blocks: self.dag.difference(&rt, self.options.max_sync_blocks),
                    rt: self.dag.delivered_heights(),
                }
            }
        };
        bincode::serialize(&answer)
            .map(Bytes::from)
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))
    }

    async fn forward_custom_query(
        &mut self,
        src: PeerShortId,
        data: Bytes,
    ) -> Result<Bytes, CoreError> {
        if !self.limiter.check_in(QueryKind::Custom, Timestamp::now()) {
            return Err(CoreError::NotReady);
        }
        let node_id = self
            .node_id_of_peer(src)
            .ok_or_else(|| CoreError::proto("query from unknown peer"))?;
        let (reply, rx) = oneshot::channel();
        let _ = self.events.send(ReceiverEvent::CustomQuery {
            src: node_id,
            data,
            reply,
        });
        rx.await.map_err(|_| CoreError::Cancelled)?
    }

    fn export_by_hash(&self, hash: &Hash) -> Option<(WireBlock, Vec<u8>)> {
        self.dag.lookup(hash).and_then(|idx| self.dag.export_block(idx))
    }

    /// Prev-chain walk from `tip`, ancestors first, bounded by `count` and
    /// the session's sync cap.
    fn block_history(
        &self,
        tip: &Hash,
        count: shared_types::Height,
        stop_if: &[Hash],
    ) -> Vec<(WireBlock, Vec<u8>)> {
        let mut out = Vec::new();
        let mut cursor = self.dag.lookup(tip);
        let limit = (count as usize).min(self.options.max_sync_blocks);
        while let Some(idx) = cursor {
            if out.len() >= limit {
                break;
            }
            let block = self.dag.block(idx);
            if block.height == 0 || stop_if.contains(&block.hash) {
                break;
            }
            if let Some(exported) = self.dag.export_block(idx) {
                out.push(exported);
            }
            cursor = block.prev;
        }
        out.reverse();
        out
    }

    // =========================================================================
    // NEIGHBOUR SYNC
    // =========================================================================

    /// One periodic round: ask a random neighbour for the difference against
    /// our delivered frontier, then chase dangling dependencies.
    async fn synchronize(&mut self) {
        if self.neighbours.is_empty() {
            self.choose_neighbours();
        }
        // Occasional rotation keeps the gossip graph fresh.
        if rand::thread_rng().gen_ratio(1, 8) {
            self.choose_neighbours();
        }
        let Some(&neighbour) = self
            .neighbours
            .get(rand::thread_rng().gen_range(0..self.neighbours.len().max(1)))
        else {
            return;
        };
        let Some(adnl_id) = self.dag.source(neighbour).map(|s| s.adnl_id) else {
            return;
        };

        let query = CatchainQuery::GetDifference {
            rt: self.dag.delivered_heights(),
        };
        let bytes = Bytes::from(bincode::serialize(&query).expect("bincode serialize"));
        let answer = self
            .overlay
            .send_query(
                self.local_adnl,
                adnl_id,
                "catchain.getDifference",
                bytes,
                self.options.query_timeout,
                self.max_answer_size(),
            )
            .await
            .map_err(sender_error);
        match answer.and_then(|data| {
            bincode::deserialize::<CatchainAnswer>(&data)
                .map_err(|_| CoreError::proto("bad difference answer"))
        }) {
            Ok(CatchainAnswer::Difference { blocks, .. }) => {
                for (block, payload) in blocks {
                    if let Err(e) = self.admit_block(block, payload, false) {
                        warn!(session = %self.session(), "sync block rejected: {e}");
                    }
                }
                self.flush_dag_events().await;
            }
            Ok(_) => warn!(session = %self.session(), "unexpected difference answer"),
            Err(e) => debug!(session = %self.session(), "difference query failed: {e}"),
        }

        self.fetch_pending_deps(adnl_id).await;
    }

    /// Chase not-yet-initialized ancestors of dangling tips, dependency
    /// first.
    async fn fetch_pending_deps(&mut self, from: PeerShortId) {
        let mut wanted = Vec::new();
        for tip in self.dag.dangling_tips() {
            self.dag
                .find_pending_deps(tip, self.options.max_sync_blocks, &mut wanted);
            if wanted.len() >= self.options.max_sync_blocks {
                break;
            }
        }
        if wanted.is_empty() {
            return;
        }
        wanted.sort();
        wanted.dedup();
        let query = CatchainQuery::GetBlocks { hashes: wanted };
        let bytes = Bytes::from(bincode::serialize(&query).expect("bincode serialize"));
        let answer = self
            .overlay
            .send_query(
                self.local_adnl,
                from,
                "catchain.getBlocks",
                bytes,
                self.options.query_timeout,
                self.max_answer_size(),
            )
            .await
            .map_err(sender_error);
        match answer.and_then(|data| {
            bincode::deserialize::<CatchainAnswer>(&data)
                .map_err(|_| CoreError::proto("bad blocks answer"))
        }) {
            Ok(CatchainAnswer::Blocks { blocks }) => {
                for (block, payload) in blocks {
                    if let Err(e) = self.admit_block(block, payload, false) {
                        warn!(session = %self.session(), "fetched block rejected: {e}");
                    }
                }
                self.flush_dag_events().await;
            }
            Ok(_) => {}
            Err(e) => debug!(session = %self.session(), "pending fetch failed: {e}"),
        }
    }
}

#[async_trait]
impl Actor for Receiver {
    type Message = ReceiverMessage;

    async fn started(&mut self) {
        if let Err(e) = self.start_up_inner().await {
            error!(session = %self.session(), "receiver failed to start: {e}");
        }
    }

    async fn handle(&mut self, message: ReceiverMessage) -> ControlFlow<()> {
        match message {
            ReceiverMessage::AddBlock { payload, deps } => {
                if let Err(e) = self.add_block(payload, deps).await {
                    error!(session = %self.session(), "add_block failed: {e}");
                }
            }
            ReceiverMessage::OverlayMessage { src, data } => {
                self.on_overlay_message(src, data).await;
            }
            ReceiverMessage::OverlayQuery { src, data, reply } => {
                let answer = self.process_query(src, data).await;
                let _ = reply.send(answer);
            }
            ReceiverMessage::OverlayBroadcast { src, data } => {
                self.on_overlay_broadcast(src, data).await;
            }
            ReceiverMessage::SyncTick => {
                if self.started {
                    self.synchronize().await;
                }
            }
            ReceiverMessage::Stop => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }
}
