//! # Test Support
//!
//! An in-memory overlay mesh connecting catchain receivers, plus a
//! deterministic validator manager. The mesh deduplicates broadcasts by
//! content hash, mirroring the overlay contract the core assumes.

use async_trait::async_trait;
use bytes::Bytes;
use cc_01_actor_runtime::{ActorRef, CancellationToken};
use cc_03_overlay_sender::{OverlaySender, SenderError};
use cc_06_catchain::ReceiverMessage;
use cc_07_consensus::{CollateParams, ManagerPort};
use parking_lot::Mutex;
use shared_crypto::sha256;
use shared_types::{
    BlockCandidate, BlockData, BlockId, ChainStateSnapshot, CoreError, Hash, PeerShortId,
    RawCandidate, ShardId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Routes overlay traffic between registered receiver actors.
#[derive(Default)]
pub struct TestMesh {
    nodes: Mutex<HashMap<PeerShortId, ActorRef<ReceiverMessage>>>,
    seen_broadcasts: Mutex<HashSet<Hash>>,
    /// Broadcast payloads in arrival order, for assertions.
    pub broadcast_log: Mutex<Vec<Bytes>>,
}

impl TestMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, adnl: PeerShortId, receiver: ActorRef<ReceiverMessage>) {
        self.nodes.lock().insert(adnl, receiver);
    }
}

#[async_trait]
impl OverlaySender for TestMesh {
    async fn send_message(
        &self,
        src: PeerShortId,
        dst: PeerShortId,
        data: Bytes,
    ) -> Result<(), SenderError> {
        let target = self.nodes.lock().get(&dst).cloned();
        match target {
            Some(target) => {
                let _ = target.send(ReceiverMessage::OverlayMessage { src, data });
                Ok(())
            }
            None => Err(SenderError::Unreachable),
        }
    }

    async fn send_query(
        &self,
        src: PeerShortId,
        dst: PeerShortId,
        _name: &str,
        data: Bytes,
        timeout: Duration,
        max_answer_size: u64,
    ) -> Result<Bytes, SenderError> {
        let target = self
            .nodes
            .lock()
            .get(&dst)
            .cloned()
            .ok_or(SenderError::Unreachable)?;
        let answer = tokio::time::timeout(
            timeout,
            target.ask(|reply| ReceiverMessage::OverlayQuery { src, data, reply }),
        )
        .await
        .map_err(|_| SenderError::Timeout)?
        .map_err(|_| SenderError::Closed)?
        .map_err(|e| match e {
            CoreError::Timeout => SenderError::Timeout,
            _ => SenderError::Closed,
        })?;
        if answer.len() as u64 > max_answer_size {
            return Err(SenderError::AnswerTooLarge(answer.len() as u64));
        }
        Ok(answer)
    }

    async fn send_broadcast(&self, src: PeerShortId, data: Bytes) -> Result<(), SenderError> {
        // Content-hash dedup, as the real overlay provides.
        if !self.seen_broadcasts.lock().insert(sha256(&data)) {
            return Ok(());
        }
        self.broadcast_log.lock().push(data.clone());
        let targets: Vec<_> = self.nodes.lock().values().cloned().collect();
        for target in targets {
            let _ = target.send(ReceiverMessage::OverlayBroadcast {
                src,
                data: data.clone(),
            });
        }
        Ok(())
    }
}

/// Deterministic manager: collation counts seqnos; states echo block ids.
pub struct FakeManager {
    pub shard: ShardId,
    pub collate_delay: Duration,
}

impl FakeManager {
    pub fn new(shard: ShardId) -> Arc<Self> {
        Arc::new(Self {
            shard,
            collate_delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl ManagerPort for FakeManager {
    async fn collate_block(
        &self,
        params: CollateParams,
        cancel: CancellationToken,
    ) -> Result<BlockCandidate, CoreError> {
        if !self.collate_delay.is_zero()
            && cancel
                .run_until_cancelled(tokio::time::sleep(self.collate_delay))
                .await
                .is_none()
        {
            return Err(CoreError::Cancelled);
        }
        let seqno = params.prev.iter().map(|p| p.seqno).max().unwrap_or(0) + 1;
        let data = seqno.to_le_bytes().to_vec();
        Ok(BlockCandidate {
            id: BlockId::new(self.shard, seqno, sha256(&data)),
            created_by: params.creator,
            data,
            collated_data: Vec::new(),
        })
    }

    async fn apply_block_to_state(
        &self,
        _prev_state_roots: Vec<Hash>,
        candidate: &BlockCandidate,
    ) -> Result<(Hash, Arc<BlockData>), CoreError> {
        Ok((
            candidate.id.root_hash,
            Arc::new(BlockData {
                id: candidate.id,
                before_split: false,
                payload: candidate.data.clone(),
            }),
        ))
    }

    async fn fetch_state(
        &self,
        shard: ShardId,
        block_ids: Vec<BlockId>,
        min_mc_block_id: BlockId,
    ) -> Result<Arc<ChainStateSnapshot>, CoreError> {
        let seqno = block_ids.iter().map(|b| b.seqno).max().unwrap_or(0);
        Ok(Arc::new(ChainStateSnapshot {
            shard,
            block_ids,
            min_mc_block_id,
            seqno,
            state_root: Hash::ZERO,
        }))
    }

    async fn apply_candidate(
        &self,
        state: Arc<ChainStateSnapshot>,
        candidate: &RawCandidate,
    ) -> Result<(Arc<ChainStateSnapshot>, Option<u64>), CoreError> {
        let id = candidate.block_id();
        Ok((
            Arc::new(ChainStateSnapshot {
                shard: state.shard,
                block_ids: vec![id],
                min_mc_block_id: state.min_mc_block_id,
                seqno: id.seqno,
                state_root: id.root_hash,
            }),
            Some(u64::from(id.seqno)),
        ))
    }

    async fn finalize_block(
        &self,
        _candidate: Arc<RawCandidate>,
        _sig_set: shared_crypto::BlockSignatureSet,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}
