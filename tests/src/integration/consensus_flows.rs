//! Leader-window flows over a full consensus instance: production pace,
//! empty-vs-full policy under finalization, abort, finalize-once.

use crate::support::{FakeManager, TestMesh};
use cc_06_catchain::{CatchainNode, CatchainOptions};
use cc_07_consensus::StoreMessage;
use node_runtime::{ConsensusInstance, SessionConfig};
use shared_bus::{ConsensusEvent, EventFilter, EventTopic, LeaderWindowStarted, StartEvent};
use shared_crypto::Ed25519KeyPair;
use shared_types::{
    BlockData, BlockId, BlockSeqno, ChainStateSnapshot, FinalCert, FinalVote, Hash, NotarCert,
    PeerShortId, RawCandidate, SessionId, ShardId, SignerBitmap, Slot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn block_id(shard: ShardId, seqno: BlockSeqno) -> BlockId {
    BlockId::new(shard, seqno, Hash::new([seqno as u8; 32]))
}

fn genesis(shard: ShardId, seqno: BlockSeqno) -> Arc<ChainStateSnapshot> {
    Arc::new(ChainStateSnapshot {
        shard,
        block_ids: vec![block_id(shard, seqno)],
        min_mc_block_id: block_id(shard, 0),
        seqno,
        state_root: Hash::ZERO,
    })
}

fn window(shard: ShardId, start: Slot, end: Slot, seqno: BlockSeqno) -> Arc<LeaderWindowStarted> {
    Arc::new(LeaderWindowStarted {
        start_slot: start,
        end_slot: end,
        start_time: Instant::now() + Duration::from_millis(10),
        base: None,
        prev_block_state_roots: vec![],
        prev_block_data: vec![Arc::new(BlockData {
            id: block_id(shard, seqno),
            before_split: false,
            payload: vec![],
        })],
    })
}

fn launch(shard: ShardId) -> ConsensusInstance {
    let keypair = Ed25519KeyPair::from_seed([7; 32]);
    let config = SessionConfig {
        session_id: SessionId(Hash::new([0x77; 32])),
        shard,
        min_masterchain_block_id: block_id(shard, 0),
        nodes: vec![CatchainNode {
            public_key: keypair.public_key(),
            adnl_id: PeerShortId(keypair.short_id().as_hash()),
        }],
        keypair,
        catchain: CatchainOptions::default(),
        target_rate: Duration::from_secs(1),
        db_root: None,
    };
    ConsensusInstance::launch(config, TestMesh::new(), FakeManager::new(shard)).unwrap()
}

fn final_cert(candidate: &RawCandidate) -> Arc<FinalCert> {
    let mut signers = SignerBitmap::with_size(1);
    signers.set(0);
    Arc::new(FinalCert {
        vote: FinalVote {
            id: candidate.id,
            slot: candidate.id.slot,
        },
        signers,
        aggregated_signature: vec![0xfe],
    })
}

fn notar_cert(candidate: &RawCandidate) -> NotarCert {
    let mut signers = SignerBitmap::with_size(1);
    signers.set(0);
    NotarCert {
        id: candidate.id,
        signers,
        aggregated_signature: vec![0xab],
    }
}

/// A masterchain window whose candidates finalize promptly: three full
/// blocks, strictly increasing slots, then the window closes on its own.
#[tokio::test(start_paused = true)]
async fn test_leader_window_produces_full_blocks_when_finalized() {
    let shard = ShardId::masterchain();
    let instance = launch(shard);
    let mut sub = instance.bus.subscribe(EventFilter::topics(vec![
        EventTopic::Candidates,
        EventTopic::Finalization,
    ]));
    tokio::time::sleep(Duration::from_millis(5)).await;

    instance.bus.publish(ConsensusEvent::Start(StartEvent {
        state: genesis(shard, 9),
    }));
    tokio::time::sleep(Duration::from_millis(5)).await;
    instance
        .bus
        .publish(ConsensusEvent::OurLeaderWindowStarted(window(shard, 10, 13, 9)));

    let mut produced = Vec::new();
    let mut finalized = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    while finalized.len() < 3 {
        let event = tokio::select! {
            e = sub.recv() => e,
            () = tokio::time::sleep_until(deadline) => break,
        };
        match event {
            Some(ConsensusEvent::CandidateGenerated { candidate, .. }) => {
                // Feed the store its certificate and observe finalization,
                // twice, to confirm finalize-once.
                instance
                    .store_certs
                    .send(StoreMessage::NotarCertFormed(notar_cert(&candidate)))
                    .unwrap();
                for _ in 0..2 {
                    instance.bus.publish(ConsensusEvent::FinalizationObserved {
                        id: candidate.id,
                        final_cert: Some(final_cert(&candidate)),
                    });
                }
                produced.push(candidate);
            }
            Some(ConsensusEvent::BlockFinalized { candidate, .. }) => {
                finalized.push(candidate.id);
            }
            Some(_) => {}
            None => break,
        }
    }

    let slots: Vec<_> = produced.iter().map(|c| c.id.slot).collect();
    assert_eq!(slots, vec![10, 11, 12]);
    assert!(produced.iter().all(|c| !c.is_empty()));
    let seqnos: Vec<_> = produced.iter().map(|c| c.block_id().seqno).collect();
    assert_eq!(seqnos, vec![10, 11, 12]);

    // Despite duplicate observations, each candidate finalized exactly once.
    let mut unique = finalized.clone();
    unique.dedup();
    assert_eq!(finalized.len(), 3);
    assert_eq!(unique.len(), 3);

    instance.stop().await;
}

/// An aborted window stops emitting mid-flight and finalizes nothing.
#[tokio::test(start_paused = true)]
async fn test_window_abort_emits_nothing_further() {
    let shard = ShardId::masterchain();
    let instance = launch(shard);
    let mut sub = instance.bus.subscribe(EventFilter::topics(vec![
        EventTopic::Candidates,
        EventTopic::Finalization,
    ]));
    tokio::time::sleep(Duration::from_millis(5)).await;

    instance.bus.publish(ConsensusEvent::Start(StartEvent {
        state: genesis(shard, 9),
    }));
    tokio::time::sleep(Duration::from_millis(5)).await;
    instance
        .bus
        .publish(ConsensusEvent::OurLeaderWindowStarted(window(shard, 10, 13, 9)));

    // Slot 10 lands right after the window opens; abort before slot 11.
    tokio::time::sleep(Duration::from_millis(500)).await;
    instance
        .bus
        .publish(ConsensusEvent::OurLeaderWindowAborted { start_slot: 10 });

    let mut produced = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let event = tokio::select! {
            e = sub.recv() => e,
            () = tokio::time::sleep_until(deadline) => break,
        };
        match event {
            Some(ConsensusEvent::CandidateGenerated { candidate, .. }) => produced.push(candidate),
            Some(ConsensusEvent::BlockFinalized { .. }) => {
                panic!("finalization fired for an aborted window")
            }
            Some(_) => {}
            None => break,
        }
    }
    let slots: Vec<_> = produced.iter().map(|c| c.id.slot).collect();
    assert_eq!(slots, vec![10]);

    instance.stop().await;
}

/// Workchain production goes empty once the masterchain falls more than
/// eight blocks behind.
#[tokio::test(start_paused = true)]
async fn test_workchain_goes_empty_on_masterchain_lag() {
    let shard = ShardId::new(0, 1 << 63);
    let instance = launch(shard);
    let mut sub = instance
        .bus
        .subscribe(EventFilter::topics(vec![EventTopic::Candidates]));
    tokio::time::sleep(Duration::from_millis(5)).await;

    instance.bus.publish(ConsensusEvent::Start(StartEvent {
        state: genesis(shard, 0),
    }));
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Twelve slots: the first nine seqnos (1..=9) fit inside the lag budget
    // of eight past the frozen masterchain seqno 0; the rest go empty.
    instance
        .bus
        .publish(ConsensusEvent::OurLeaderWindowStarted(window(shard, 0, 12, 0)));

    let mut produced = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(20);
    while produced.len() < 12 {
        let event = tokio::select! {
            e = sub.recv() => e,
            () = tokio::time::sleep_until(deadline) => break,
        };
        match event {
            Some(ConsensusEvent::CandidateGenerated { candidate, .. }) => produced.push(candidate),
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(produced.len(), 12);
    let full: Vec<bool> = produced.iter().map(|c| !c.is_empty()).collect();
    // seqno = slot + 1 here; empty once 0 + 8 < seqno, i.e. from seqno 9 on.
    let expected: Vec<bool> = (1..=12).map(|seqno| seqno <= 8).collect();
    assert_eq!(full, expected);

    instance.stop().await;
}
