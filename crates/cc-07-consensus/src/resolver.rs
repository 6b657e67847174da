//! # State Resolver
//!
//! Serves `ResolveState` and drives finalization. Resolution walks from a
//! parent id back toward genesis (or the nearest already-finalized block),
//! applying stored candidates to durable state; results are memoized so the
//! walk is paid once. Finalization visits each non-empty ancestor exactly
//! once, publishing `FinalizeBlock` and journaling a `finalized` row only
//! after the validator manager acknowledged.

use crate::manager::ManagerPort;
use cc_02_journal::Journal;
use shared_bus::{
    ConsensusEvent, EventBus, EventFilter, EventTopic, FinalizeBlockRequest, RequestEnvelope,
    ResolvedState,
};
use shared_crypto::BlockSignatureSet;
use shared_types::{
    CandidateId, ChainStateSnapshot, CoreError, FinalCert, ParentId, RawCandidate, ShardId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Journal key of a finalized-candidate marker row.
#[must_use]
pub fn finalized_db_key(id: &CandidateId) -> Vec<u8> {
    let mut key = b"consensus/finalized/".to_vec();
    key.extend_from_slice(&bincode::serialize(id).expect("bincode serialize"));
    key
}

const FINALIZED_PREFIX: &[u8] = b"consensus/finalized/";

type ResolveEnvelope = RequestEnvelope<ParentId, Result<ResolvedState, CoreError>>;

/// Bus-driven resolver service. Requests are served serially, which both
/// preserves the genesis-to-tip resolution order and lets concurrent
/// requests for one parent share a single manager invocation through the
/// memo cache.
pub struct StateResolver {
    bus: Arc<EventBus>,
    manager: Arc<dyn ManagerPort>,
    journal: Arc<dyn Journal>,
    shard: ShardId,
    genesis: Option<Arc<ChainStateSnapshot>>,
    /// Requests that arrived before the session's `Start` event.
    parked: Vec<ResolveEnvelope>,
    state_cache: HashMap<ParentId, ResolvedState>,
    finalized: HashMap<CandidateId, bool>,
}

impl StateResolver {
    /// Build the resolver, pre-marking candidates whose `finalized` rows
    /// survived a restart.
    pub fn new(
        bus: Arc<EventBus>,
        manager: Arc<dyn ManagerPort>,
        journal: Arc<dyn Journal>,
        shard: ShardId,
    ) -> Result<Self, CoreError> {
        let mut finalized = HashMap::new();
        let rows = journal
            .scan_prefix(FINALIZED_PREFIX)
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))?;
        for (key, _) in &rows {
            let Ok(id) = bincode::deserialize::<CandidateId>(&key[FINALIZED_PREFIX.len()..]) else {
                return Err(CoreError::FatalCorruption("unreadable finalized row".into()));
            };
            finalized.insert(id, true);
        }
        info!(count = finalized.len(), "loaded finalized blocks from journal");
        Ok(Self {
            bus,
            manager,
            journal,
            shard,
            genesis: None,
            parked: Vec::new(),
            state_cache: HashMap::new(),
            finalized,
        })
    }

    /// Event loop: runs until `StopRequested`.
    pub async fn run(mut self) {
        let mut sub = self.bus.subscribe(EventFilter::topics(vec![
            EventTopic::Lifecycle,
            EventTopic::Finalization,
        ]));
        let mut requests = match self.bus.resolve_state.register() {
            Ok(rx) => rx,
            Err(e) => {
                error!("resolver could not register: {e}");
                return;
            }
        };
        loop {
            tokio::select! {
                event = sub.recv() => match event {
                    Some(ConsensusEvent::Start(start)) => {
                        self.genesis = Some(start.state.clone());
                        for envelope in std::mem::take(&mut self.parked) {
                            let result = self.resolve_state(envelope.request).await;
                            envelope.respond(result);
                        }
                    }
                    Some(ConsensusEvent::StopRequested) | None => break,
                    Some(ConsensusEvent::FinalizationObserved { id, final_cert }) => {
                        if let Err(e) = self.finalize_blocks(id, final_cert, None).await {
                            if !e.is_cancelled() {
                                warn!(%id, "finalization failed: {e}");
                            }
                        }
                    }
                    Some(_) => {}
                },
                envelope = requests.recv() => {
                    let Some(envelope) = envelope else { break };
                    if self.genesis.is_none() {
                        self.parked.push(envelope);
                        continue;
                    }
                    let result = self.resolve_state(envelope.request).await;
                    envelope.respond(result);
                }
            }
        }
    }

    // =========================================================================
    // STATE RESOLUTION
    // =========================================================================

    async fn resolve_state(&mut self, id: ParentId) -> Result<ResolvedState, CoreError> {
        if let Some(cached) = self.state_cache.get(&id) {
            return Ok(cached.clone());
        }
        let result = self.resolve_state_inner(id).await;
        if let Ok(resolved) = &result {
            self.state_cache.insert(id, resolved.clone());
        }
        result
    }

    fn resolve_state_boxed<'a>(
        &'a mut self,
        id: ParentId,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ResolvedState, CoreError>> + Send + 'a>,
    > {
        Box::pin(self.resolve_state(id))
    }

    async fn resolve_state_inner(&mut self, id: ParentId) -> Result<ResolvedState, CoreError> {
        let genesis = self.genesis.clone().ok_or(CoreError::NotReady)?;

        // Genesis and already-finalized parents come straight from durable
        // state via the manager.
        let is_final = match id {
            None => true,
            Some(id) => self.finalized.get(&id).copied().unwrap_or(false),
        };
        if is_final {
            let block_ids = match id {
                Some(id) => {
                    let resolved = self.resolve_candidate(id).await?;
                    vec![resolved.block_id()]
                }
                None => genesis.block_ids.clone(),
            };
            let state = self
                .manager
                .fetch_state(self.shard, block_ids, genesis.min_mc_block_id)
                .await?;
            return Ok(ResolvedState {
                state,
                gen_utime_exact: None,
            });
        }

        let id = id.expect("non-genesis parent");
        let candidate = self.resolve_candidate(id).await?;
        let prev = self.resolve_state_boxed(candidate.parent_id).await?;

        if candidate.is_empty() {
            return Ok(prev);
        }
        let (state, gen_utime_exact) =
            self.manager.apply_candidate(prev.state, &candidate).await?;
        Ok(ResolvedState {
            state,
            gen_utime_exact,
        })
    }

    async fn resolve_candidate(&self, id: CandidateId) -> Result<Arc<RawCandidate>, CoreError> {
        let resolved = self
            .bus
            .resolve_candidate
            .call(id)
            .await
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))??;
        Ok(resolved.candidate)
    }

    // =========================================================================
    // FINALIZATION
    // =========================================================================

    fn finalize_blocks_boxed<'a>(
        &'a mut self,
        id: CandidateId,
        final_cert: Option<Arc<FinalCert>>,
        final_candidate: Option<Arc<RawCandidate>>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), CoreError>> + Send + 'a>>
    {
        Box::pin(self.finalize_blocks(id, final_cert, final_candidate))
    }

    async fn finalize_blocks(
        &mut self,
        id: CandidateId,
        final_cert: Option<Arc<FinalCert>>,
        mut final_candidate: Option<Arc<RawCandidate>>,
    ) -> Result<(), CoreError> {
        if self.finalized.get(&id).copied().unwrap_or(false) {
            return Ok(());
        }
        // Masterchain blocks finalize only on an explicit final certificate.
        if final_cert.is_none() && self.shard.is_masterchain() {
            return Ok(());
        }

        let resolved = self
            .bus
            .resolve_candidate
            .call(id)
            .await
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))??;
        let (candidate, notar_cert) = (resolved.candidate, resolved.notar_cert);
        if let Some(cert) = &final_cert {
            debug_assert_eq!(cert.vote.id, id);
            if final_candidate.is_none() {
                final_candidate = Some(candidate.clone());
            }
        }

        if !candidate.is_empty() {
            // The parent chain finalizes first, without our certificate.
            if let Some(parent) = candidate.parent_id {
                self.finalize_blocks_boxed(parent, None, None).await?;
            }
            let sig_set = match &final_cert {
                Some(cert) => BlockSignatureSet::from_final_cert(cert),
                None => BlockSignatureSet::from_notar_cert(&notar_cert),
            };
            self.bus
                .finalize_block
                .call(FinalizeBlockRequest {
                    candidate: candidate.clone(),
                    sig_set: sig_set.clone(),
                })
                .await
                .map_err(|e| CoreError::FatalCorruption(e.to_string()))??;
            info!(%id, "block finalized");
            self.bus.publish(ConsensusEvent::BlockFinalized {
                candidate: candidate.clone(),
                final_signatures: final_cert.as_ref().map(|_| sig_set),
            });
        } else if let Some(parent) = candidate.parent_id {
            // Empty candidates forward the certificate to their parent.
            self.finalize_blocks_boxed(parent, final_cert.clone(), final_candidate.clone())
                .await?;
        }

        // The marker row lands only after the manager acknowledged.
        self.journal
            .set(&finalized_db_key(&id), &[])
            .map_err(|e| CoreError::FatalCorruption(e.to_string()))?;
        self.finalized.insert(id, true);
        Ok(())
    }
}
