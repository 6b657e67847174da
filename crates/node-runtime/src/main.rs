//! # Node Runtime Entry Point
//!
//! Runs a single-validator local session with in-memory ports: a smoke
//! configuration exercising the full wiring (receiver, producer, resolver,
//! store) without external transport or validator-manager integrations.

use async_trait::async_trait;
use bytes::Bytes;
use cc_01_actor_runtime::CancellationToken;
use cc_03_overlay_sender::{OverlaySender, SenderError};
use cc_06_catchain::{CatchainNode, CatchainOptions, ReceiverEvent};
use cc_07_consensus::{CollateParams, ManagerPort};
use node_runtime::{ConsensusInstance, SessionConfig};
use shared_crypto::{sha256, Ed25519KeyPair};
use shared_types::{
    BlockCandidate, BlockData, BlockId, ChainStateSnapshot, CoreError, Hash, PeerShortId,
    RawCandidate, SessionId, ShardId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Drops everything: a one-node session has no peers to talk to.
struct LoopbackOverlay;

#[async_trait]
impl OverlaySender for LoopbackOverlay {
    async fn send_message(
        &self,
        _src: PeerShortId,
        _dst: PeerShortId,
        _data: Bytes,
    ) -> Result<(), SenderError> {
        Ok(())
    }

    async fn send_query(
        &self,
        _src: PeerShortId,
        _dst: PeerShortId,
        _name: &str,
        _data: Bytes,
        _timeout: Duration,
        _max_answer_size: u64,
    ) -> Result<Bytes, SenderError> {
        Err(SenderError::Timeout)
    }

    async fn send_broadcast(&self, _src: PeerShortId, _data: Bytes) -> Result<(), SenderError> {
        Ok(())
    }
}

/// Deterministic collator: each block is a counter over its parent.
struct LocalManager {
    shard: ShardId,
}

#[async_trait]
impl ManagerPort for LocalManager {
    async fn collate_block(
        &self,
        params: CollateParams,
        _cancel: CancellationToken,
    ) -> Result<BlockCandidate, CoreError> {
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
            None,
        ))
    }

    async fn finalize_block(
        &self,
        candidate: Arc<RawCandidate>,
        _sig_set: shared_crypto::BlockSignatureSet,
    ) -> Result<(), CoreError> {
        info!(id = %candidate.id, "block accepted as finalized");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    node_runtime::init_tracing();

    let keypair = Ed25519KeyPair::generate();
    let shard = ShardId::masterchain();
    let config = SessionConfig {
        session_id: SessionId(sha256(b"local-session")),
        shard,
        min_masterchain_block_id: BlockId::new(shard, 0, Hash::ZERO),
        nodes: vec![CatchainNode {
            public_key: keypair.public_key(),
            adnl_id: PeerShortId(keypair.short_id().as_hash()),
        }],
        keypair,
        catchain: CatchainOptions::default(),
        target_rate: Duration::from_secs(1),
        db_root: None,
    };

    let mut instance = ConsensusInstance::launch(
        config,
        Arc::new(LoopbackOverlay),
        Arc::new(LocalManager { shard }),
    )?;
    info!("single-validator session running; ctrl-c to stop");

    loop {
        tokio::select! {
            event = instance.receiver_events.recv() => match event {
                Some(ReceiverEvent::Started) => info!("catchain receiver live"),
                Some(ReceiverEvent::NewBlock { source, height, .. }) => {
                    info!(source, height, "catchain block delivered");
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    instance.stop().await;
    Ok(())
}
