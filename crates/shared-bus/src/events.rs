//! # Consensus Events
//!
//! Every broadcast event that flows through the bus of one consensus
//! instance. Request/response messages live in [`crate::requests`].

use shared_crypto::BlockSignatureSet;
use shared_types::{
    BlockData, BlockId, CandidateId, ChainStateSnapshot, FinalCert, ParentId, PeerShortId,
    RawCandidate, Slot, StatsTarget,
};
use std::sync::Arc;
use tokio::time::Instant;

/// Initial state handed to the instance when the session starts.
#[derive(Clone, Debug)]
pub struct StartEvent {
    pub state: Arc<ChainStateSnapshot>,
}

/// Our validator owns the window `[start_slot, end_slot)`.
#[derive(Clone, Debug)]
pub struct LeaderWindowStarted {
    pub start_slot: Slot,
    pub end_slot: Slot,
    pub start_time: Instant,
    pub base: ParentId,
    pub prev_block_state_roots: Vec<shared_types::Hash>,
    pub prev_block_data: Vec<Arc<BlockData>>,
}

/// All broadcast events of one consensus instance.
#[derive(Clone, Debug)]
pub enum ConsensusEvent {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================
    /// The session is live; carries the durable initial state.
    Start(StartEvent),

    /// Orderly shutdown of the instance.
    StopRequested,

    // =========================================================================
    // LEADER WINDOWS (block producer)
    // =========================================================================
    /// Our leader window opened; the producer starts generating candidates.
    OurLeaderWindowStarted(Arc<LeaderWindowStarted>),

    /// Our window was taken away before `end_slot`; no further candidates
    /// from it may be published.
    OurLeaderWindowAborted { start_slot: Slot },

    // =========================================================================
    // CANDIDATES
    // =========================================================================
    /// A candidate we produced, with the collator that built it (if remote).
    CandidateGenerated {
        candidate: Arc<RawCandidate>,
        collator: Option<PeerShortId>,
    },

    /// A candidate entered this node's store (ours or a peer's).
    CandidateReceived { candidate: Arc<RawCandidate> },

    // =========================================================================
    // FINALIZATION
    // =========================================================================
    /// Consensus observed that `id` is final; the terminal block of the walk
    /// carries the final certificate.
    FinalizationObserved {
        id: CandidateId,
        final_cert: Option<Arc<FinalCert>>,
    },

    /// A block completed finalization; final signatures are present when the
    /// block was the certificate's terminal block.
    BlockFinalized {
        candidate: Arc<RawCandidate>,
        final_signatures: Option<BlockSignatureSet>,
    },

    /// A block of ours was observed finalized in the masterchain.
    BlockFinalizedInMasterchain { block: BlockId },

    // =========================================================================
    // STATS
    // =========================================================================
    /// Producer progress marker, for per-slot latency accounting.
    StatsTargetReached { kind: StatsTarget, slot: Slot },
}

impl ConsensusEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Start(_) | Self::StopRequested => EventTopic::Lifecycle,
            Self::OurLeaderWindowStarted(_) | Self::OurLeaderWindowAborted { .. } => {
                EventTopic::LeaderWindow
            }
            Self::CandidateGenerated { .. } | Self::CandidateReceived { .. } => {
                EventTopic::Candidates
            }
            Self::FinalizationObserved { .. }
            | Self::BlockFinalized { .. }
            | Self::BlockFinalizedInMasterchain { .. } => EventTopic::Finalization,
            Self::StatsTargetReached { .. } => EventTopic::Stats,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Lifecycle,
    LeaderWindow,
    Candidates,
    Finalization,
    Stats,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &ConsensusEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}
