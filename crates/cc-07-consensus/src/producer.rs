//! # Block Producer
//!
//! Generates candidates while our validator owns the leader window.
//! Candidates come out in strictly increasing slot order, one per target
//! interval; the running window is invalidated wholesale by an abort, a
//! replacement window, or shutdown. Whether a slot gets a full or an empty
//! candidate depends on how far finalization lags behind production.

use crate::manager::{CollateParams, ManagerPort};
use cc_01_actor_runtime::{sleep_until, CancellationTokenSource, Task};
use parking_lot::Mutex;
use shared_bus::{ConsensusEvent, EventBus, EventFilter, EventTopic, LeaderWindowStarted};
use shared_crypto::{candidate_id, sign_candidate, Ed25519KeyPair};
use shared_types::{
    BlockData, BlockId, BlockSeqno, CandidateBlock, CandidateHashData, ParentId, RawCandidate,
    SessionId, ShardId, Slot, SourceIdx, StatsTarget,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Masterchain stalls production after one unfinalized block; workchains
/// tolerate this much masterchain lag before going empty.
const MC_LAG_EMPTY_THRESHOLD: BlockSeqno = 8;

/// Static parameters of one producer.
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub session_id: SessionId,
    pub shard: ShardId,
    pub local_idx: SourceIdx,
    pub min_masterchain_block_id: BlockId,
    pub target_rate: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    /// `start_slot` of the active window, if any.
    current_window: Option<Slot>,
    last_consensus_finalized_seqno: BlockSeqno,
    last_mc_finalized_seqno: BlockSeqno,
}

/// The parent a candidate builds on: its id (None at the epoch base) and
/// the chain position behind it.
#[derive(Clone, Debug)]
struct CandidateParent {
    id: ParentId,
    prev_ids: Vec<BlockId>,
    seqno: BlockSeqno,
}

impl CandidateParent {
    fn from_base(base: ParentId, prev_block_data: &[Arc<BlockData>]) -> Self {
        match base {
            Some(id) => Self::from_id(id),
            None => {
                let prev_ids: Vec<BlockId> = prev_block_data.iter().map(|b| b.id).collect();
                let seqno = prev_ids.iter().map(|id| id.seqno).max().unwrap_or(0);
                Self {
                    id: None,
                    prev_ids,
                    seqno,
                }
            }
        }
    }

    fn from_id(id: shared_types::CandidateId) -> Self {
        Self {
            id: Some(id),
            prev_ids: vec![id.block_id],
            seqno: id.block_id.seqno,
        }
    }

    fn next_seqno(&self) -> BlockSeqno {
        self.seqno + 1
    }
}

/// Bus-driven producer service.
pub struct BlockProducer {
    bus: Arc<EventBus>,
    manager: Arc<dyn ManagerPort>,
    keypair: Arc<Ed25519KeyPair>,
    config: ProducerConfig,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationTokenSource,
}

impl BlockProducer {
    #[must_use]
    pub fn new(
        bus: Arc<EventBus>,
        manager: Arc<dyn ManagerPort>,
        keypair: Arc<Ed25519KeyPair>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            bus,
            manager,
            keypair,
            config,
            shared: Arc::new(Mutex::new(Shared::default())),
            cancel: CancellationTokenSource::new(),
        }
    }

    /// Event loop: runs until `StopRequested`.
    pub async fn run(mut self) {
        let mut sub = self.bus.subscribe(EventFilter::topics(vec![
            EventTopic::Lifecycle,
            EventTopic::LeaderWindow,
            EventTopic::Finalization,
        ]));
        while let Some(event) = sub.recv().await {
            match event {
                ConsensusEvent::Start(start) => {
                    let mut shared = self.shared.lock();
                    shared.last_consensus_finalized_seqno = start.state.seqno;
                    shared.last_mc_finalized_seqno = start.state.seqno;
                }
                ConsensusEvent::StopRequested => {
                    self.shared.lock().current_window = None;
                    self.cancel.cancel();
                    break;
                }
                ConsensusEvent::BlockFinalized {
                    candidate,
                    final_signatures,
                } => {
                    if final_signatures.is_some() {
                        let mut shared = self.shared.lock();
                        shared.last_consensus_finalized_seqno = shared
                            .last_consensus_finalized_seqno
                            .max(candidate.block_id().seqno);
                    }
                }
                ConsensusEvent::BlockFinalizedInMasterchain { block } => {
                    let mut shared = self.shared.lock();
                    shared.last_mc_finalized_seqno =
                        shared.last_mc_finalized_seqno.max(block.seqno);
                    shared.last_consensus_finalized_seqno = shared
                        .last_consensus_finalized_seqno
                        .max(shared.last_mc_finalized_seqno);
                }
                ConsensusEvent::OurLeaderWindowStarted(window) => {
                    self.shared.lock().current_window = Some(window.start_slot);
                    self.cancel.cancel();
                    self.cancel = CancellationTokenSource::new();
                    let generator = generate_candidates(
                        self.bus.clone(),
                        self.manager.clone(),
                        self.keypair.clone(),
                        self.config.clone(),
                        self.shared.clone(),
                        self.cancel.token(),
                        window,
                    );
                    Task::new(generator).detach();
                }
                ConsensusEvent::OurLeaderWindowAborted { start_slot } => {
                    let mut shared = self.shared.lock();
                    // Consensus and we should agree on the start slot.
                    if shared.current_window != Some(start_slot) {
                        warn!(
                            session = %self.config.session_id,
                            start_slot, "abort for a window we do not own"
                        );
                    }
                    shared.current_window = None;
                    drop(shared);
                    self.cancel.cancel();
                    self.cancel = CancellationTokenSource::new();
                }
                _ => {}
            }
        }
    }
}

fn should_generate_empty(
    config: &ProducerConfig,
    shared: &Mutex<Shared>,
    new_seqno: BlockSeqno,
    prev_block_data: &[Arc<BlockData>],
) -> bool {
    // A parent about to split flushes with one empty block.
    if prev_block_data.len() == 1
        && prev_block_data[0].id.shard == config.shard
        && prev_block_data[0].before_split
    {
        return true;
    }
    let shared = shared.lock();
    if config.shard.is_masterchain() {
        shared.last_consensus_finalized_seqno + 1 < new_seqno
    } else {
        shared.last_mc_finalized_seqno + MC_LAG_EMPTY_THRESHOLD < new_seqno
    }
}

/// One window's candidate loop. Exits at the first sign the window is gone.
#[allow(clippy::too_many_lines)]
async fn generate_candidates(
    bus: Arc<EventBus>,
    manager: Arc<dyn ManagerPort>,
    keypair: Arc<Ed25519KeyPair>,
    config: ProducerConfig,
    shared: Arc<Mutex<Shared>>,
    cancel: cc_01_actor_runtime::CancellationToken,
    window: Arc<LeaderWindowStarted>,
) {
    let window_tag = Some(window.start_slot);
    if shared.lock().current_window != window_tag {
        return;
    }

    let mut target_time = window.start_time;
    let mut parent = CandidateParent::from_base(window.base, &window.prev_block_data);
    let mut slot = window.start_slot;
    let mut prev_block_state_roots = window.prev_block_state_roots.clone();
    let mut prev_block_data = window.prev_block_data.clone();

    while shared.lock().current_window == window_tag && slot < window.end_slot {
        if cancel.run_until_cancelled(sleep_until(target_time)).await.is_none() {
            return;
        }

        let new_seqno = parent.next_seqno();
        bus.publish(ConsensusEvent::StatsTargetReached {
            kind: StatsTarget::CollateStarted,
            slot,
        });

        let hash_data;
        let block;
        if should_generate_empty(&config, &shared, new_seqno, &prev_block_data) {
            warn!(
                session = %config.session_id,
                slot, new_seqno, "generating an empty block"
            );
            // The first generated block of an epoch cannot be empty.
            let Some(parent_id) = parent.id else {
                error!(session = %config.session_id, slot, "empty block with no parent");
                return;
            };
            hash_data = CandidateHashData::empty(parent_id.block_id, &parent_id);
            block = CandidateBlock::Ref(parent_id.block_id);
        } else {
            if shared.lock().current_window != window_tag {
                return;
            }
            let params = CollateParams {
                shard: config.shard,
                min_masterchain_block_id: config.min_masterchain_block_id,
                prev: parent.prev_ids.clone(),
                creator: keypair.short_id(),
                prev_block_data: prev_block_data.clone(),
                prev_block_state_roots: prev_block_state_roots.clone(),
            };
            let collated = match manager.collate_block(params, cancel.clone()).await {
                Ok(collated) => collated,
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => return,
                Err(e) => {
                    error!(session = %config.session_id, slot, "collation failed: {e}");
                    return;
                }
            };
            if !prev_block_state_roots.is_empty() {
                match manager
                    .apply_block_to_state(prev_block_state_roots.clone(), &collated)
                    .await
                {
                    Ok((new_root, new_data)) => {
                        prev_block_state_roots = vec![new_root];
                        prev_block_data = vec![new_data];
                    }
                    Err(e) => {
                        error!(session = %config.session_id, slot, "apply failed: {e}");
                        return;
                    }
                }
            }
            hash_data = CandidateHashData::full(collated.id, parent.id);
            block = CandidateBlock::Full(collated);
        }

        let id = candidate_id(slot, &hash_data);
        let signature = sign_candidate(&keypair, config.session_id, &id);
        let candidate = Arc::new(RawCandidate {
            id,
            parent_id: parent.id,
            producer_idx: config.local_idx,
            block,
            signature,
        });

        bus.publish(ConsensusEvent::StatsTargetReached {
            kind: StatsTarget::CollateFinished,
            slot,
        });
        if shared.lock().current_window != window_tag {
            return;
        }
        info!(session = %config.session_id, slot, id = %id, "candidate generated");
        bus.publish(ConsensusEvent::CandidateGenerated {
            candidate: candidate.clone(),
            collator: None,
        });
        bus.publish(ConsensusEvent::CandidateReceived { candidate });

        slot += 1;
        parent = CandidateParent::from_id(id);
        target_time += config.target_rate;
    }
}
