//! # Validator Manager Contract
//!
//! The external collaborator that collates blocks, constructs states, and
//! applies finalization. Everything behind this trait is out of the
//! consensus core's scope; the test suite ships deterministic fakes.

use async_trait::async_trait;
use cc_01_actor_runtime::CancellationToken;
use shared_types::{
    BlockCandidate, BlockData, BlockId, ChainStateSnapshot, CoreError, Hash, NodeShortId,
    RawCandidate, ShardId,
};
use std::sync::Arc;

/// Inputs to one collation attempt.
#[derive(Clone, Debug)]
pub struct CollateParams {
    pub shard: ShardId,
    pub min_masterchain_block_id: BlockId,
    pub prev: Vec<BlockId>,
    pub creator: NodeShortId,
    pub prev_block_data: Vec<Arc<BlockData>>,
    pub prev_block_state_roots: Vec<Hash>,
}

/// The validator manager as consumed by the round driver and resolver.
#[async_trait]
pub trait ManagerPort: Send + Sync {
    /// Collate a fresh block on top of `params.prev`. Honors `cancel` at its
    /// own suspension points.
    async fn collate_block(
        &self,
        params: CollateParams,
        cancel: CancellationToken,
    ) -> Result<BlockCandidate, CoreError>;

    /// Apply a collated candidate to the producer's running state roots.
    /// Returns the new state root and the applied block's data.
    async fn apply_block_to_state(
        &self,
        prev_state_roots: Vec<Hash>,
        candidate: &BlockCandidate,
    ) -> Result<(Hash, Arc<BlockData>), CoreError>;

    /// Construct the durable state sitting at `block_ids`.
    async fn fetch_state(
        &self,
        shard: ShardId,
        block_ids: Vec<BlockId>,
        min_mc_block_id: BlockId,
    ) -> Result<Arc<ChainStateSnapshot>, CoreError>;

    /// Apply a stored candidate to a resolved parent state. Returns the new
    /// snapshot and the exact generation time of the applied block.
    async fn apply_candidate(
        &self,
        state: Arc<ChainStateSnapshot>,
        candidate: &RawCandidate,
    ) -> Result<(Arc<ChainStateSnapshot>, Option<u64>), CoreError>;

    /// Accept a finalized block with its signature set. The resolver journals
    /// the candidate as finalized only after this acknowledges.
    async fn finalize_block(
        &self,
        candidate: Arc<RawCandidate>,
        sig_set: shared_crypto::BlockSignatureSet,
    ) -> Result<(), CoreError>;
}
