//! Two-validator catchain flows: causal delivery, fork blame, crash replay.

use crate::support::TestMesh;
use bytes::Bytes;
use cc_01_actor_runtime::spawn_actor;
use cc_02_journal::{FileJournal, Journal, MemoryJournal};
use cc_06_catchain::{
    wire, BlockPayload, CatchainNode, CatchainOptions, Receiver, ReceiverEvent, ReceiverMessage,
    WireBlock, WireBlockData,
};
use shared_crypto::{sha256, Ed25519KeyPair};
use shared_types::{Hash, PeerShortId, SessionId, SourceIdx};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SESSION: [u8; 32] = [0x01; 32];

struct Node {
    adnl: PeerShortId,
    actor: cc_01_actor_runtime::ActorRef<ReceiverMessage>,
    events: mpsc::UnboundedReceiver<ReceiverEvent>,
}

fn roster(n: usize) -> (Vec<CatchainNode>, Vec<Ed25519KeyPair>) {
    let keys: Vec<_> = (0..n)
        .map(|i| Ed25519KeyPair::from_seed([i as u8 + 1; 32]))
        .collect();
    let nodes = keys
        .iter()
        .enumerate()
        .map(|(i, k)| CatchainNode {
            public_key: k.public_key(),
            adnl_id: PeerShortId(Hash::new([i as u8 + 50; 32])),
        })
        .collect();
    (nodes, keys)
}

fn spawn_node(
    mesh: &Arc<TestMesh>,
    nodes: &[CatchainNode],
    keypair: Ed25519KeyPair,
    journal: Arc<dyn Journal>,
) -> Node {
    let (tx, events) = mpsc::unbounded_channel();
    let receiver = Receiver::new(
        SessionId(Hash::new(SESSION)),
        nodes,
        keypair,
        CatchainOptions::default(),
        journal,
        mesh.clone(),
        tx,
    )
    .unwrap();
    let adnl = nodes[receiver.local_idx() as usize].adnl_id;
    let (actor, _handle) = spawn_actor(receiver);
    mesh.register(adnl, actor.clone());
    Node {
        adnl,
        actor,
        events,
    }
}

async fn two_nodes(
    journals: Option<(Arc<dyn Journal>, Arc<dyn Journal>)>,
) -> (Arc<TestMesh>, Vec<Node>, Vec<Ed25519KeyPair>) {
    let mesh = TestMesh::new();
    let (nodes, keys) = roster(2);
    let (j0, j1) = journals.unwrap_or_else(|| {
        (
            Arc::new(MemoryJournal::new()) as Arc<dyn Journal>,
            Arc::new(MemoryJournal::new()) as Arc<dyn Journal>,
        )
    });
    let n0 = spawn_node(&mesh, &nodes, keys[0].clone(), j0);
    let n1 = spawn_node(&mesh, &nodes, keys[1].clone(), j1);
    let mut out = vec![n0, n1];
    for node in &mut out {
        wait_started(node).await;
    }
    (mesh, out, keys)
}

async fn wait_started(node: &mut Node) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ReceiverEvent::Started) = node.events.recv().await {
                return;
            }
        }
    })
    .await
    .expect("receiver started");
}

/// Next delivered block: `(source, hash, height, prev, deps, vt, payload)`.
async fn next_block(
    node: &mut Node,
) -> (SourceIdx, Hash, u64, Hash, Vec<Hash>, Vec<u64>, Bytes) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match node.events.recv().await {
                Some(ReceiverEvent::NewBlock {
                    source,
                    hash,
                    height,
                    prev,
                    deps,
                    vt,
                    payload,
                    ..
                }) => return (source, hash, height, prev, deps, vt, payload),
                Some(_) => {}
                None => panic!("receiver gone"),
            }
        }
    })
    .await
    .expect("block delivered")
}

async fn next_blame(node: &mut Node) -> SourceIdx {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match node.events.recv().await {
                Some(ReceiverEvent::Blame { source }) => return source,
                Some(_) => {}
                None => panic!("receiver gone"),
            }
        }
    })
    .await
    .expect("blame observed")
}

#[tokio::test]
async fn test_two_validators_deliver_in_causal_order() {
    let (_mesh, mut nodes, _keys) = two_nodes(None).await;

    nodes[0]
        .actor
        .send(ReceiverMessage::AddBlock {
            payload: b"hello".to_vec(),
            deps: vec![],
        })
        .unwrap();

    // Both validators deliver V0's block first.
    let (src, b1_hash, height, prev, deps, vt, payload) = next_block(&mut nodes[0]).await;
    assert_eq!((src, height), (0, 1));
    assert!(deps.is_empty());
    assert_eq!(payload.as_ref(), b"hello");
    assert_eq!(prev, wire::root_hash(&SessionId(Hash::new(SESSION))));
    assert_eq!(vt, vec![0, 1]);

    let (src, b1_hash_v1, ..) = next_block(&mut nodes[1]).await;
    assert_eq!(src, 0);
    assert_eq!(b1_hash_v1, b1_hash);

    // V1 replies citing V0's block as a dependency.
    nodes[1]
        .actor
        .send(ReceiverMessage::AddBlock {
            payload: b"reply".to_vec(),
            deps: vec![b1_hash],
        })
        .unwrap();

    for node in &mut nodes {
        let (src, _, height, _, deps, vt, payload) = next_block(node).await;
        assert_eq!((src, height), (1, 1));
        assert_eq!(deps, vec![b1_hash]);
        assert_eq!(payload.as_ref(), b"reply");
        // Both source forks are reachable at height 1.
        assert_eq!(vt, vec![0, 1, 1]);
    }
}

#[tokio::test]
async fn test_fork_blames_source_everywhere_exactly_once() {
    let (_mesh, mut nodes, keys) = two_nodes(None).await;
    let session = SessionId(Hash::new(SESSION));

    nodes[0]
        .actor
        .send(ReceiverMessage::AddBlock {
            payload: b"honest".to_vec(),
            deps: vec![],
        })
        .unwrap();
    let _ = next_block(&mut nodes[0]).await;
    let _ = next_block(&mut nodes[1]).await;

    // V0 equivocates: a second signed height-1 block with different payload,
    // injected straight into V1.
    let payload = b"forked".to_vec();
    let src_hash = keys[0].short_id().as_hash();
    let hash = wire::dep_hash(&session, src_hash, 1, sha256(&payload));
    let forged = WireBlock {
        session,
        src: 0,
        height: 1,
        data: WireBlockData {
            prev: wire::root_dep(&session, 2),
            deps: vec![],
        },
        signature: keys[0].sign(&wire::block_sign_data(&hash)).to_vec(),
    };
    let bytes = bincode::serialize(&cc_06_catchain::OverlayMessage::Block {
        block: forged,
        payload,
    })
    .unwrap();
    let v0_adnl = nodes[0].adnl;
    nodes[1]
        .actor
        .send(ReceiverMessage::OverlayMessage {
            src: v0_adnl,
            data: Bytes::from(bytes),
        })
        .unwrap();

    // V1 blames locally; its fork-proof block carries the evidence to V0.
    assert_eq!(next_blame(&mut nodes[1]).await, 0);
    let (src, _, _, _, _, _, proof_payload) = next_block(&mut nodes[0]).await;
    assert_eq!(src, 1);
    assert!(matches!(
        bincode::deserialize::<BlockPayload>(&proof_payload),
        Ok(BlockPayload::ForkBlame { .. })
    ));
    assert_eq!(next_blame(&mut nodes[0]).await, 0);

    // Subsequent blocks from the blamed source never deliver.
    nodes[0]
        .actor
        .send(ReceiverMessage::AddBlock {
            payload: b"more".to_vec(),
            deps: vec![],
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    for node in &mut nodes {
        while let Ok(event) = node.events.try_recv() {
            match event {
                ReceiverEvent::NewBlock { source, .. } => assert_ne!(source, 0),
                ReceiverEvent::Blame { .. } => panic!("second blame emitted"),
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn test_crash_replay_preserves_delivery_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path0 = dir.path().join("v0.log");
    let path1 = dir.path().join("v1.log");

    let live_hashes: Vec<Hash> = {
        let j0: Arc<dyn Journal> = Arc::new(FileJournal::open(&path0).unwrap());
        let j1: Arc<dyn Journal> = Arc::new(FileJournal::open(&path1).unwrap());
        let (_mesh, mut nodes, _keys) = two_nodes(Some((j0, j1))).await;

        nodes[0]
            .actor
            .send(ReceiverMessage::AddBlock {
                payload: b"one".to_vec(),
                deps: vec![],
            })
            .unwrap();
        let (_, h1, ..) = next_block(&mut nodes[0]).await;
        let _ = next_block(&mut nodes[1]).await;
        nodes[1]
            .actor
            .send(ReceiverMessage::AddBlock {
                payload: b"two".to_vec(),
                deps: vec![h1],
            })
            .unwrap();
        let (_, h2, ..) = next_block(&mut nodes[0]).await;
        vec![h1, h2]
    };

    // Simulate a crash-suffix: garbage appended after the last full record.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path0)
            .unwrap();
        file.write_all(&[0x13, 0x37, 0x00]).unwrap();
    }

    // A fresh node over the same journal replays the identical stream.
    let mesh = TestMesh::new();
    let (roster_nodes, keys) = roster(2);
    let journal: Arc<dyn Journal> = Arc::new(FileJournal::open(&path0).unwrap());
    let mut node = spawn_node(&mesh, &roster_nodes, keys[0].clone(), journal);
    wait_started_collecting(&mut node, &live_hashes).await;
}

async fn wait_started_collecting(node: &mut Node, expected: &[Hash]) {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match node.events.recv().await {
                Some(ReceiverEvent::NewBlock { hash, .. }) => seen.push(hash),
                Some(ReceiverEvent::Started) => break,
                Some(_) => {}
                None => panic!("receiver gone"),
            }
        }
    })
    .await
    .expect("replay finished");
    assert_eq!(seen, expected);
}
