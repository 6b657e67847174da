//! MTU-driven fragmentation: the sender sizes FEC symbols from the
//! effective MTU; the receiver reassembles under loss and duplication.

use cc_03_overlay_sender::{MtuRegistry, DEFAULT_MTU};
use cc_05_fec_broadcast::{fragment_payload, Reassembler};
use shared_types::{Hash, PeerShortId};

fn peer(tag: u8) -> PeerShortId {
    PeerShortId(Hash::new([tag; 32]))
}

#[test]
fn test_fragments_follow_effective_mtu() {
    let registry = MtuRegistry::new(DEFAULT_MTU);
    let (local, remote) = (peer(1), peer(2));
    let payload: Vec<u8> = (0..40_000).map(|i| (i % 251) as u8).collect();

    let small = fragment_payload(&payload, registry.effective_mtu(local, remote) as usize)
        .unwrap();

    // A guard raising the MTU shrinks the fragment count.
    let guard = registry.guard(vec![local], vec![remote], 9000);
    let large = fragment_payload(&payload, registry.effective_mtu(local, remote) as usize)
        .unwrap();
    assert!(large.len() < small.len());
    drop(guard);
    assert_eq!(registry.effective_mtu(local, remote), DEFAULT_MTU);

    // Symbols fit the MTU they were sized for.
    assert!(small
        .iter()
        .all(|f| f.symbol.data.len() <= DEFAULT_MTU as usize));
}

#[test]
fn test_reassembly_under_loss_and_duplication() {
    let payload: Vec<u8> = (0..10_000).map(|i| (i % 249) as u8).collect();
    let fragments = fragment_payload(&payload, 1024).unwrap();
    let source_count = fragments[0].params.symbols_count as usize;

    // Drop every third fragment, duplicate the rest, deliver out of order.
    let mut delivery: Vec<_> = fragments
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 0)
        .flat_map(|(_, f)| [f.clone(), f.clone()])
        .collect();
    delivery.reverse();
    assert!(delivery.len() / 2 >= source_count);

    let mut reassembler = Reassembler::new();
    let mut completions = 0;
    let mut out = None;
    for fragment in delivery {
        if let Some(done) = reassembler.add_fragment(fragment).unwrap() {
            completions += 1;
            out = Some(done);
        }
    }
    assert_eq!(completions, 1);
    assert_eq!(out.unwrap(), payload);
}
