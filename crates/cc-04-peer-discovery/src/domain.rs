//! # Kademlia Domain
//!
//! Pure routing logic: distance math, node descriptors, k-buckets with
//! active and backup slot rows, and the routing table. No IO happens here;
//! the service layer drives it with query results.

use crate::value::now_unix;
use serde::{Deserialize, Serialize};
use shared_crypto::{sha256, CryptoError, Ed25519KeyPair, Ed25519PublicKey};
use shared_types::{Hash, PeerAddress, PeerShortId, Timestamp};
use tracing::debug;

/// Number of k-buckets: one per possible leading-zero count of the XOR
/// distance (plus the degenerate self bucket).
pub const NUM_BUCKETS: usize = 256;

/// Pings a node may miss before it is demoted from the active row.
pub const MAX_MISSED_PINGS: u32 = 5;

/// Bucket index for `remote` as seen from `local`: the leading-zero count of
/// the XOR distance. Identical keys yield `None` (a node does not route to
/// itself).
#[must_use]
pub fn bucket_index(local: &Hash, remote: &Hash) -> Option<usize> {
    let distance = local.xor(remote);
    if distance.is_zero() {
        return None;
    }
    Some(distance.leading_zero_bits() as usize)
}

/// Signed descriptor of a DHT node as carried on the wire.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DhtNodeInfo {
    pub public_key: [u8; 32],
    pub addr: PeerAddress,
    pub version: u32,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct NodeInfoToSign<'a> {
    public_key: &'a [u8; 32],
    addr: &'a PeerAddress,
    version: u32,
}

impl DhtNodeInfo {
    /// Build and sign a descriptor for the local node.
    #[must_use]
    pub fn signed(keypair: &Ed25519KeyPair, addr: PeerAddress, version: u32) -> Self {
        let public_key = *keypair.public_key().as_bytes();
        let to_sign = NodeInfoToSign {
            public_key: &public_key,
            addr: &addr,
            version,
        };
        let bytes = bincode::serialize(&to_sign).expect("bincode serialize");
        let signature = keypair.sign(&bytes).to_vec();
        Self {
            public_key,
            addr,
            version,
            signature,
        }
    }

    /// DHT key id of this node: hash of its public key.
    #[must_use]
    pub fn key_id(&self) -> Hash {
        sha256(&self.public_key)
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerShortId {
        PeerShortId(self.key_id())
    }

    /// Verify the descriptor's self-signature.
    pub fn check(&self) -> Result<(), CryptoError> {
        let key = Ed25519PublicKey::from_bytes(self.public_key)?;
        let to_sign = NodeInfoToSign {
            public_key: &self.public_key,
            addr: &self.addr,
            version: self.version,
        };
        let bytes = bincode::serialize(&to_sign).expect("bincode serialize");
        key.verify(&bytes, &self.signature)
    }
}

/// Liveness bookkeeping for one known remote node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteNodeState {
    pub info: DhtNodeInfo,
    /// Unix seconds of the first successful ping of the current up-streak;
    /// zero when never seen ready.
    pub ready_from: u64,
    /// Unix seconds when the current failure streak began; zero when not
    /// failing.
    pub failed_from: u64,
    pub missed_pings: u32,
}

impl RemoteNodeState {
    #[must_use]
    pub fn new(info: DhtNodeInfo) -> Self {
        Self {
            info,
            ready_from: 0,
            failed_from: 0,
            missed_pings: 0,
        }
    }

    pub fn receive_ping(&mut self) {
        self.missed_pings = 0;
        self.failed_from = 0;
        if self.ready_from == 0 {
            self.ready_from = now_unix();
        }
    }

    /// Accept a newer descriptor for the same key.
    pub fn update_info(&mut self, info: DhtNodeInfo) {
        if info.version > self.info.version {
            self.info = info;
        }
    }

    pub fn ping_failed(&mut self) {
        self.missed_pings += 1;
        if self.failed_from == 0 {
            self.failed_from = now_unix();
        }
        if self.missed_pings >= MAX_MISSED_PINGS {
            self.ready_from = 0;
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_from > 0 && self.missed_pings < MAX_MISSED_PINGS
    }

    #[must_use]
    pub fn key_id(&self) -> Hash {
        self.info.key_id()
    }
}

/// One k-bucket: `k` active slots serving lookups and `k` backup slots
/// holding candidates. Ping results promote ready backups into free active
/// slots and demote exhausted actives.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DhtBucket {
    pub active: Vec<RemoteNodeState>,
    pub backup: Vec<RemoteNodeState>,
}

impl DhtBucket {
    /// Record a node sighting. `confirmed` sightings (a pong or a signed
    /// query from the node itself) may promote; unconfirmed ones only update
    /// descriptors or occupy backup space.
    pub fn add_node(&mut self, node: DhtNodeInfo, confirmed: bool, k: usize) {
        let key = node.key_id();

        if let Some(existing) = self.active.iter_mut().find(|n| n.key_id() == key) {
            if confirmed {
                existing.receive_ping();
            }
            existing.update_info(node);
            return;
        }
        if let Some(pos) = self.backup.iter().position(|n| n.key_id() == key) {
            if confirmed {
                self.backup[pos].receive_ping();
                self.backup[pos].update_info(node);
                if self.active.len() < k {
                    let ready = self.backup.remove(pos);
                    self.active.push(ready);
                }
            } else {
                self.backup[pos].update_info(node);
            }
            return;
        }

        let mut state = RemoteNodeState::new(node);
        if confirmed {
            state.receive_ping();
            if self.active.len() < k {
                self.active.push(state);
                return;
            }
        }
        if self.backup.len() < k {
            self.backup.push(state);
        } else if let Some(pos) = self.select_backup_to_drop() {
            self.backup[pos] = state;
        }
    }

    /// Ping outcome for an active node; a demoted node moves to backup and a
    /// ready backup takes its slot.
    pub fn on_ping_result(&mut self, key: &Hash, alive: bool, k: usize) {
        let Some(pos) = self.active.iter().position(|n| n.key_id() == *key) else {
            if let Some(node) = self.backup.iter_mut().find(|n| n.key_id() == *key) {
                if alive {
                    node.receive_ping();
                } else {
                    node.ping_failed();
                }
            }
            return;
        };
        if alive {
            self.active[pos].receive_ping();
            return;
        }
        self.active[pos].ping_failed();
        if self.active[pos].missed_pings >= MAX_MISSED_PINGS {
            let demoted = self.active.remove(pos);
            debug!(node = %demoted.key_id().short_tag(), "demoting dht node to backup");
            if let Some(promote) = self.backup.iter().position(|n| n.is_ready()) {
                let promoted = self.backup.remove(promote);
                self.active.push(promoted);
            }
            if self.backup.len() < k {
                self.backup.push(demoted);
            }
        }
    }

    /// The least useful backup: never-ready and failing the longest.
    fn select_backup_to_drop(&self) -> Option<usize> {
        let mut result: Option<(usize, u64)> = None;
        for (idx, node) in self.backup.iter().enumerate() {
            if node.ready_from == 0 {
                let failing_since = node.failed_from;
                match result {
                    Some((_, best)) if failing_since >= best => {}
                    _ => result = Some((idx, failing_since)),
                }
            }
        }
        result.map(|(idx, _)| idx)
    }

    /// Active nodes sorted by distance to `target`, best first.
    #[must_use]
    pub fn nearest(&self, target: &Hash, limit: usize) -> Vec<DhtNodeInfo> {
        let mut nodes: Vec<_> = self
            .active
            .iter()
            .map(|n| (target.xor(&n.key_id()), n.info.clone()))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes.into_iter().take(limit).map(|(_, info)| info).collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// The routing table: one bucket per XOR-distance bit.
#[derive(Debug)]
pub struct RoutingTable {
    local_key_id: Hash,
    buckets: Vec<DhtBucket>,
    k: usize,
}

impl RoutingTable {
    #[must_use]
    pub fn new(local_key_id: Hash, k: usize) -> Self {
        Self {
            local_key_id,
            buckets: (0..NUM_BUCKETS).map(|_| DhtBucket::default()).collect(),
            k,
        }
    }

    #[must_use]
    pub fn local_key_id(&self) -> Hash {
        self.local_key_id
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Record a sighting of `node`.
    pub fn add_node(&mut self, node: DhtNodeInfo, confirmed: bool) {
        if node.check().is_err() {
            debug!(node = %node.key_id().short_tag(), "dropping dht node with bad signature");
            return;
        }
        let Some(bit) = bucket_index(&self.local_key_id, &node.key_id()) else {
            return;
        };
        self.buckets[bit].add_node(node, confirmed, self.k);
    }

    /// Ping outcome for a node anywhere in the table.
    pub fn on_ping_result(&mut self, key: &Hash, alive: bool) {
        if let Some(bit) = bucket_index(&self.local_key_id, key) {
            let k = self.k;
            self.buckets[bit].on_ping_result(key, alive, k);
        }
    }

    /// The `limit` known-active nodes closest to `target`.
    #[must_use]
    pub fn nearest(&self, target: &Hash, limit: usize) -> Vec<DhtNodeInfo> {
        let mut all: Vec<_> = self
            .buckets
            .iter()
            .flat_map(|b| b.active.iter())
            .map(|n| (target.xor(&n.key_id()), n.info.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().take(limit).map(|(_, info)| info).collect()
    }

    /// Bucket distance of `key` from the local node, in bucket units: the
    /// index of the highest set bit of the XOR distance counted from the
    /// top. Used by the storage pruning rule.
    #[must_use]
    pub fn bucket_distance(&self, key: &Hash) -> Option<usize> {
        bucket_index(&self.local_key_id, key)
    }

    #[must_use]
    pub fn bucket(&self, bit: usize) -> Option<&DhtBucket> {
        self.buckets.get(bit)
    }

    /// Snapshot a bucket for persistence.
    #[must_use]
    pub fn bucket_snapshot(&self, bit: usize) -> Option<Vec<DhtNodeInfo>> {
        self.buckets
            .get(bit)
            .map(|b| b.active.iter().map(|n| n.info.clone()).collect())
    }

    /// Restore bucket contents from a persisted snapshot. Snapshotted nodes
    /// were active once; they return active and are demoted normally if they
    /// turn out dead.
    pub fn restore_nodes(&mut self, nodes: Vec<DhtNodeInfo>) {
        for node in nodes {
            self.add_node(node, true);
        }
    }

    #[must_use]
    pub fn total_active(&self) -> usize {
        self.buckets.iter().map(DhtBucket::active_count).sum()
    }

    /// Check and age `now`-based expiry on addresses; currently a hook for
    /// the maintenance tick.
    pub fn gc(&mut self, _now: Timestamp) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::PeerAddress;

    fn node(seed: u8) -> DhtNodeInfo {
        let keypair = Ed25519KeyPair::from_seed([seed; 32]);
        DhtNodeInfo::signed(&keypair, PeerAddress::default(), 1)
    }

    #[test]
    fn test_bucket_index_of_self_is_none() {
        let h = Hash::new([5; 32]);
        assert!(bucket_index(&h, &h).is_none());
    }

    #[test]
    fn test_node_info_signature_roundtrip() {
        let info = node(1);
        info.check().unwrap();

        let mut bad = info;
        bad.version += 1;
        assert!(bad.check().is_err());
    }

    #[test]
    fn test_confirmed_nodes_land_active() {
        let mut table = RoutingTable::new(Hash::new([0; 32]), 10);
        table.add_node(node(1), true);
        table.add_node(node(2), false);
        assert_eq!(table.total_active(), 1);
    }

    #[test]
    fn test_demote_after_missed_pings() {
        let mut table = RoutingTable::new(Hash::new([0; 32]), 10);
        let info = node(1);
        let key = info.key_id();
        table.add_node(info, true);
        assert_eq!(table.total_active(), 1);

        for _ in 0..MAX_MISSED_PINGS {
            table.on_ping_result(&key, false);
        }
        assert_eq!(table.total_active(), 0);
    }

    #[test]
    fn test_backup_promoted_when_active_demoted() {
        let key0 = Hash::new([0; 32]);
        let mut bucket = DhtBucket::default();
        // One active slot available (k=1): second confirmed node stays backup.
        let first = node(1);
        let second = node(2);
        let first_key = first.key_id();
        bucket.add_node(first, true, 1);
        bucket.add_node(second, true, 1);
        assert_eq!(bucket.active_count(), 1);
        assert_eq!(bucket.backup.len(), 1);

        for _ in 0..MAX_MISSED_PINGS {
            bucket.on_ping_result(&first_key, false, 1);
        }
        // The ready backup took the freed slot.
        assert_eq!(bucket.active_count(), 1);
        assert_ne!(bucket.nearest(&key0, 1)[0].key_id(), first_key);
    }

    #[test]
    fn test_nearest_sorted_by_distance() {
        let mut table = RoutingTable::new(Hash::new([0; 32]), 10);
        for seed in 1..6 {
            table.add_node(node(seed), true);
        }
        let target = node(1).key_id();
        let nearest = table.nearest(&target, 3);
        assert_eq!(nearest.len(), 3);
        assert_eq!(nearest[0].key_id(), target);
        let d1 = target.xor(&nearest[1].key_id());
        let d2 = target.xor(&nearest[2].key_id());
        assert!(d1 <= d2);
    }
}
