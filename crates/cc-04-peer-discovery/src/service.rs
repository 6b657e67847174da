//! # DHT Client Service
//!
//! Serves the DHT query surface and runs the iterative client operations on
//! top of the routing table. Lookups are α-parallel and bounded: a node is
//! queried at most [`crate::MAX_ATTEMPTS`] times per lookup, retries being
//! spent only on transport failures.

use crate::domain::{DhtNodeInfo, RoutingTable};
use crate::storage::ValueStorage;
use crate::value::{now_unix, DhtKey, DhtValue};
use crate::wire::{DhtAnswer, DhtQuery, ReverseConnectionToSign};
use crate::{DEFAULT_K, LOOKUP_ALPHA, MAX_ATTEMPTS};
use async_trait::async_trait;
use cc_02_journal::Journal;
use parking_lot::Mutex;
use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey};
use shared_types::{CoreError, Hash, PeerAddress, PeerShortId, RateLimit, RateLimiter, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reverse-connection holder entries live at most this long.
const REVERSE_CONNECTION_CAP_SECS: u64 = 300;

/// Buckets further than `k + EVICT_SLACK` from the local key are outside the
/// stored-value neighborhood.
const EVICT_SLACK: usize = 10;

/// Request kinds for the serve-side rate limiter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum QueryKind {
    Ping,
    FindNode,
    FindValue,
    Store,
    Reverse,
}

impl QueryKind {
    fn of(query: &DhtQuery) -> Self {
        match query {
            DhtQuery::Ping { .. } => Self::Ping,
            DhtQuery::FindNode { .. } | DhtQuery::GetSignedAddressList => Self::FindNode,
            DhtQuery::FindValue { .. } => Self::FindValue,
            DhtQuery::Store { .. } => Self::Store,
            DhtQuery::RegisterReverseConnection { .. } | DhtQuery::RequestReversePing { .. } => {
                Self::Reverse
            }
        }
    }
}

/// Transport used to reach remote DHT nodes.
#[async_trait]
pub trait DhtNetworkPort: Send + Sync {
    /// Send a query and await its answer.
    async fn query(&self, dst: &DhtNodeInfo, query: DhtQuery) -> Result<DhtAnswer, CoreError>;

    /// Push a reverse ping to a directly connected client: tell it to dial
    /// `target`.
    async fn push_reverse_ping(
        &self,
        client: PeerShortId,
        target: DhtNodeInfo,
        signature: Vec<u8>,
    ) -> Result<(), CoreError>;
}

/// Tunables of one DHT member.
pub struct DhtConfig {
    pub k: usize,
    pub alpha: usize,
    pub max_attempts: usize,
    /// Global + per-kind serve-side limits.
    pub global_limit: RateLimit,
    pub store_limit: RateLimit,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: LOOKUP_ALPHA,
            max_attempts: MAX_ATTEMPTS,
            global_limit: RateLimit::new(0.0, 0),
            store_limit: RateLimit::new(0.0, 0),
        }
    }
}

struct ReverseConnection {
    peer: PeerShortId,
    expires_at: u64,
}

/// One DHT member: routing table, value storage, and client operations.
pub struct DhtClient {
    keypair: Ed25519KeyPair,
    local_info: DhtNodeInfo,
    config: DhtConfig,
    table: Mutex<RoutingTable>,
    storage: Mutex<ValueStorage>,
    limiter: Mutex<RateLimiter<QueryKind>>,
    /// Clients we hold reverse connections for.
    reverse_connections: Mutex<BTreeMap<Hash, ReverseConnection>>,
    network: Arc<dyn DhtNetworkPort>,
}

impl DhtClient {
    #[must_use]
    pub fn new(
        keypair: Ed25519KeyPair,
        addr: PeerAddress,
        config: DhtConfig,
        network: Arc<dyn DhtNetworkPort>,
    ) -> Self {
        let local_info = DhtNodeInfo::signed(&keypair, addr, 1);
        let local_key_id = local_info.key_id();
        let mut limits = BTreeMap::new();
        limits.insert(QueryKind::Store, config.store_limit);
        let limiter = RateLimiter::new(config.global_limit, limits);
        Self {
            keypair,
            local_info,
            table: Mutex::new(RoutingTable::new(local_key_id, config.k)),
            storage: Mutex::new(ValueStorage::new()),
            limiter: Mutex::new(limiter),
            reverse_connections: Mutex::new(BTreeMap::new()),
            config,
            network,
        }
    }

    #[must_use]
    pub fn local_info(&self) -> &DhtNodeInfo {
        &self.local_info
    }

    /// Seed the table with bootstrap nodes.
    pub fn add_static_nodes(&self, nodes: Vec<DhtNodeInfo>) {
        let mut table = self.table.lock();
        for node in nodes {
            table.add_node(node, true);
        }
    }

    #[must_use]
    pub fn known_nodes(&self) -> usize {
        self.table.lock().total_active()
    }

    // =========================================================================
    // SERVE SIDE
    // =========================================================================

    /// Serve one query from `src`. A rejected or malformed query closes only
    /// this exchange.
    pub async fn process_query(
        &self,
        src: &DhtNodeInfo,
        query: DhtQuery,
    ) -> Result<DhtAnswer, CoreError> {
        if !self
            .limiter
            .lock()
            .check_in(QueryKind::of(&query), Timestamp::now())
        {
            return Err(CoreError::NotReady);
        }
        // Any well-formed signed query doubles as a liveness proof.
        self.table.lock().add_node(src.clone(), true);

        match query {
            DhtQuery::Ping { random_id } => Ok(DhtAnswer::Pong { random_id }),
            DhtQuery::FindNode { key, k } => Ok(DhtAnswer::Nodes {
                nodes: self.nearest_for_answer(&key, k),
            }),
            DhtQuery::FindValue { key, k } => {
                let now = now_unix();
                if let Some(value) = self.storage.lock().get(&key, now).cloned() {
                    return Ok(DhtAnswer::ValueFound { value });
                }
                Ok(DhtAnswer::ValueNotFound {
                    nodes: self.nearest_for_answer(&key, k),
                })
            }
            DhtQuery::Store { value } => self.serve_store(value),
            DhtQuery::GetSignedAddressList => Ok(DhtAnswer::AddressList {
                node: self.local_info.clone(),
            }),
            DhtQuery::RegisterReverseConnection {
                node,
                ttl,
                signature,
            } => self.serve_register_reverse(node, ttl, signature),
            DhtQuery::RequestReversePing {
                target,
                signature,
                client,
                k,
            } => self.serve_reverse_ping(target, signature, client, k).await,
        }
    }

    fn nearest_for_answer(&self, key: &Hash, k: u32) -> Vec<DhtNodeInfo> {
        let wanted = (k as usize).min(self.config.k * 2);
        let mut nodes = self.table.lock().nearest(key, wanted);
        // We are part of the topology too.
        if nodes.len() < wanted {
            nodes.push(self.local_info.clone());
        }
        nodes
    }

    fn serve_store(&self, value: DhtValue) -> Result<DhtAnswer, CoreError> {
        value
            .check()
            .map_err(|e| CoreError::proto(format!("bad value signature: {e}")))?;
        let key_id = value.key_id();
        let too_far = {
            let table = self.table.lock();
            Self::too_far(&table, &self.local_info.key_id(), self.config.k, &key_id)
        };
        if too_far {
            return Err(CoreError::proto("value too far from our key"));
        }
        let stored = self.storage.lock().store(value, now_unix());
        if stored {
            Ok(DhtAnswer::Stored)
        } else {
            Err(CoreError::proto("value rejected by update rule"))
        }
    }

    /// A key is too far when more than `k + EVICT_SLACK` known nodes sit
    /// closer to it than we do; sparsely connected nodes accept everything.
    fn too_far(table: &RoutingTable, local: &Hash, k: usize, key_id: &Hash) -> bool {
        let rank_limit = k + EVICT_SLACK;
        let nearest = table.nearest(key_id, rank_limit);
        if nearest.len() < rank_limit {
            return false;
        }
        let our_distance = key_id.xor(local);
        nearest
            .iter()
            .all(|node| key_id.xor(&node.key_id()) < our_distance)
    }

    fn serve_register_reverse(
        &self,
        node: DhtNodeInfo,
        ttl: u64,
        signature: Vec<u8>,
    ) -> Result<DhtAnswer, CoreError> {
        node.check()
            .map_err(|_| CoreError::proto("bad node signature"))?;
        let client = node.key_id();
        let to_sign = ReverseConnectionToSign {
            client,
            dht_node: self.local_info.key_id(),
            ttl,
        };
        let bytes = bincode::serialize(&to_sign).expect("bincode serialize");
        let key = Ed25519PublicKey::from_bytes(node.public_key)
            .map_err(|_| CoreError::proto("bad client key"))?;
        key.verify(&bytes, &signature)
            .map_err(|_| CoreError::proto("bad reverse registration signature"))?;

        let now = now_unix();
        if ttl <= now {
            return Err(CoreError::proto("expired reverse registration"));
        }
        let expires_at = ttl.min(now + REVERSE_CONNECTION_CAP_SECS);
        self.reverse_connections.lock().insert(
            client,
            ReverseConnection {
                peer: node.peer_id(),
                expires_at,
            },
        );
        Ok(DhtAnswer::Stored)
    }

    async fn serve_reverse_ping(
        &self,
        target: DhtNodeInfo,
        signature: Vec<u8>,
        client: Hash,
        k: u32,
    ) -> Result<DhtAnswer, CoreError> {
        let entry = {
            let mut connections = self.reverse_connections.lock();
            match connections.get(&client) {
                Some(entry) if entry.expires_at > now_unix() => Some(entry.peer),
                Some(_) => {
                    connections.remove(&client);
                    None
                }
                None => None,
            }
        };
        match entry {
            Some(peer) => {
                debug!(client = %client.short_tag(), "relaying reverse ping");
                self.network.push_reverse_ping(peer, target, signature).await?;
                Ok(DhtAnswer::ReversePingOk)
            }
            None => Ok(DhtAnswer::ClientNotFound {
                nodes: self.nearest_for_answer(&client, k),
            }),
        }
    }

    // =========================================================================
    // CLIENT SIDE
    // =========================================================================

    /// α-parallel iterative value lookup. Stops at the first valid hit.
    pub async fn get_value(&self, key: &DhtKey) -> Result<DhtValue, CoreError> {
        let key_id = key.key_id();
        let mut attempts: BTreeMap<Hash, usize> = BTreeMap::new();
        let mut candidates: BTreeMap<Hash, DhtNodeInfo> = BTreeMap::new();
        self.seed_candidates(&key_id, &mut candidates);

        loop {
            let batch = self.pick_batch(&key_id, &candidates, &attempts);
            if batch.is_empty() {
                return Err(CoreError::NotReady);
            }
            for node in &batch {
                *attempts.entry(node.key_id()).or_insert(0) += 1;
            }
            let queries = batch.iter().map(|node| {
                self.network.query(
                    node,
                    DhtQuery::FindValue {
                        key: key_id,
                        k: self.config.k as u32,
                    },
                )
            });
            let answers = futures::future::join_all(queries).await;

            for (node, answer) in batch.iter().zip(answers) {
                match answer {
                    Ok(DhtAnswer::ValueFound { value }) => {
                        self.mark_done(node, &mut attempts);
                        if value.key.key_id() == key_id
                            && value.check().is_ok()
                            && !value.is_expired(now_unix())
                        {
                            return Ok(value);
                        }
                        warn!(key = %key_id.short_tag(), "ignoring invalid value from lookup");
                    }
                    Ok(DhtAnswer::ValueNotFound { nodes }) => {
                        self.mark_done(node, &mut attempts);
                        self.absorb_nodes(nodes, &key_id, &mut candidates);
                    }
                    Ok(_) => {
                        self.mark_done(node, &mut attempts);
                    }
                    Err(_) => {
                        self.table.lock().on_ping_result(&node.key_id(), false);
                    }
                }
            }
        }
    }

    /// Store a value at the k closest nodes; at least one ack is success.
    pub async fn set_value(&self, value: DhtValue) -> Result<(), CoreError> {
        let key_id = value.key_id();
        self.find_nodes(&key_id).await;

        let targets = self.table.lock().nearest(&key_id, self.config.k);
        if targets.is_empty() {
            return Err(CoreError::NotReady);
        }
        let queries = targets.iter().map(|node| {
            self.network.query(
                node,
                DhtQuery::Store {
                    value: value.clone(),
                },
            )
        });
        let answers = futures::future::join_all(queries).await;
        let stored = answers
            .iter()
            .filter(|a| matches!(a, Ok(DhtAnswer::Stored)))
            .count();
        if stored > 0 {
            debug!(key = %key_id.short_tag(), stored, "value stored");
            Ok(())
        } else {
            Err(CoreError::NotReady)
        }
    }

    /// Iterative `FindNode` sweep toward `key_id`, filling the table.
    pub async fn find_nodes(&self, key_id: &Hash) {
        let mut attempts: BTreeMap<Hash, usize> = BTreeMap::new();
        let mut candidates: BTreeMap<Hash, DhtNodeInfo> = BTreeMap::new();
        self.seed_candidates(key_id, &mut candidates);

        loop {
            let batch = self.pick_batch(key_id, &candidates, &attempts);
            if batch.is_empty() {
                return;
            }
            for node in &batch {
                *attempts.entry(node.key_id()).or_insert(0) += 1;
            }
            let queries = batch.iter().map(|node| {
                self.network.query(
                    node,
                    DhtQuery::FindNode {
                        key: *key_id,
                        k: self.config.k as u32,
                    },
                )
            });
            let answers = futures::future::join_all(queries).await;
            let mut progress = false;
            for (node, answer) in batch.iter().zip(answers) {
                match answer {
                    Ok(DhtAnswer::Nodes { nodes }) => {
                        self.mark_done(node, &mut attempts);
                        progress |= self.absorb_nodes(nodes, key_id, &mut candidates);
                    }
                    Ok(_) => self.mark_done(node, &mut attempts),
                    Err(_) => {
                        self.table.lock().on_ping_result(&node.key_id(), false);
                    }
                }
            }
            if !progress && batch.iter().all(|n| {
                attempts
                    .get(&n.key_id())
                    .is_some_and(|a| *a >= self.config.max_attempts)
            }) {
                return;
            }
        }
    }

    /// Register the local node as reverse-connectable at the k nodes closest
    /// to its derived reverse key.
    pub async fn register_reverse_connection(&self, ttl: u64) -> Result<(), CoreError> {
        let reverse_key = Self::reverse_connection_key(&self.local_info.key_id());
        self.find_nodes(&reverse_key).await;
        let holders = self.table.lock().nearest(&reverse_key, self.config.k);
        if holders.is_empty() {
            return Err(CoreError::NotReady);
        }

        let mut stored = 0usize;
        for holder in holders {
            let to_sign = ReverseConnectionToSign {
                client: self.local_info.key_id(),
                dht_node: holder.key_id(),
                ttl,
            };
            let bytes = bincode::serialize(&to_sign).expect("bincode serialize");
            let signature = self.keypair.sign(&bytes).to_vec();
            let answer = self
                .network
                .query(
                    &holder,
                    DhtQuery::RegisterReverseConnection {
                        node: self.local_info.clone(),
                        ttl,
                        signature,
                    },
                )
                .await;
            if matches!(answer, Ok(DhtAnswer::Stored)) {
                stored += 1;
            }
        }
        if stored > 0 {
            Ok(())
        } else {
            Err(CoreError::NotReady)
        }
    }

    /// Ask the holders of `client`'s reverse connection to have it dial
    /// `target`.
    pub async fn request_reverse_ping(
        &self,
        target: DhtNodeInfo,
        client: Hash,
    ) -> Result<(), CoreError> {
        let reverse_key = Self::reverse_connection_key(&client);
        self.find_nodes(&reverse_key).await;
        let holders = self.table.lock().nearest(&reverse_key, self.config.k);

        let to_sign = bincode::serialize(&target).expect("bincode serialize");
        let signature = self.keypair.sign(&to_sign).to_vec();

        for holder in holders {
            let answer = self
                .network
                .query(
                    &holder,
                    DhtQuery::RequestReversePing {
                        target: target.clone(),
                        signature: signature.clone(),
                        client,
                        k: self.config.k as u32,
                    },
                )
                .await;
            match answer {
                Ok(DhtAnswer::ReversePingOk) => return Ok(()),
                Ok(DhtAnswer::ClientNotFound { nodes }) => {
                    let mut table = self.table.lock();
                    for node in nodes {
                        table.add_node(node, false);
                    }
                }
                _ => {}
            }
        }
        Err(CoreError::NotReady)
    }

    /// Derived key under which a client's reverse connectability is stored.
    #[must_use]
    pub fn reverse_connection_key(client: &Hash) -> Hash {
        DhtKey::new(*client, b"reverse-connection", 0).key_id()
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// One maintenance round: evict stale values, republish the next own
    /// value, drop expired reverse-connection entries.
    pub async fn maintenance_tick(&self) {
        let now = now_unix();
        {
            let mut storage = self.storage.lock();
            let table = self.table.lock();
            let local = self.local_info.key_id();
            let k = self.config.k;
            storage.evict(now, |key| Self::too_far(&table, &local, k, key));
        }
        self.reverse_connections
            .lock()
            .retain(|_, c| c.expires_at > now);

        let due = self.storage.lock().next_republish(now);
        if let Some(value) = due {
            if let Err(e) = self.set_value(value).await {
                debug!(error = %e, "republish failed");
            }
        }
    }

    /// Persist active bucket snapshots.
    pub fn save_buckets(&self, journal: &dyn Journal) -> Result<(), cc_02_journal::JournalError> {
        let table = self.table.lock();
        for bit in 0..crate::domain::NUM_BUCKETS {
            let Some(snapshot) = table.bucket_snapshot(bit) else {
                continue;
            };
            if snapshot.is_empty() {
                continue;
            }
            let key = Self::bucket_key(bit);
            let value = bincode::serialize(&snapshot)
                .map_err(|e| cc_02_journal::JournalError::Corrupt(e.to_string()))?;
            journal.set(&key, &value)?;
        }
        Ok(())
    }

    /// Restore bucket snapshots written by [`save_buckets`](Self::save_buckets).
    pub fn load_buckets(&self, journal: &dyn Journal) -> Result<usize, cc_02_journal::JournalError> {
        let rows = journal.scan_prefix(b"dht/bucket/")?;
        let mut restored = 0usize;
        let mut table = self.table.lock();
        for (_key, value) in rows {
            let Ok(nodes) = bincode::deserialize::<Vec<DhtNodeInfo>>(&value) else {
                warn!("skipping corrupt bucket snapshot");
                continue;
            };
            restored += nodes.len();
            table.restore_nodes(nodes);
        }
        if restored > 0 {
            info!(restored, "restored dht nodes from journal");
        }
        Ok(restored)
    }

    fn bucket_key(bit: usize) -> Vec<u8> {
        let mut key = b"dht/bucket/".to_vec();
        key.extend_from_slice(&(bit as u16).to_be_bytes());
        key
    }

    // =========================================================================
    // LOOKUP INTERNALS
    // =========================================================================

    fn seed_candidates(&self, key_id: &Hash, candidates: &mut BTreeMap<Hash, DhtNodeInfo>) {
        for node in self.table.lock().nearest(key_id, self.config.k) {
            candidates.insert(key_id.xor(&node.key_id()), node);
        }
    }

    /// Closest α candidates still worth querying.
    fn pick_batch(
        &self,
        _key_id: &Hash,
        candidates: &BTreeMap<Hash, DhtNodeInfo>,
        attempts: &BTreeMap<Hash, usize>,
    ) -> Vec<DhtNodeInfo> {
        candidates
            .values()
            .filter(|node| {
                attempts
                    .get(&node.key_id())
                    .map_or(true, |a| *a < self.config.max_attempts)
            })
            .take(self.config.alpha)
            .cloned()
            .collect()
    }

    fn mark_done(&self, node: &DhtNodeInfo, attempts: &mut BTreeMap<Hash, usize>) {
        attempts.insert(node.key_id(), self.config.max_attempts);
        self.table.lock().add_node(node.clone(), true);
    }

    /// Absorb discovered nodes; returns whether anything new appeared.
    fn absorb_nodes(
        &self,
        nodes: Vec<DhtNodeInfo>,
        key_id: &Hash,
        candidates: &mut BTreeMap<Hash, DhtNodeInfo>,
    ) -> bool {
        let mut new = false;
        let mut table = self.table.lock();
        for node in nodes {
            if node.check().is_err() {
                continue;
            }
            if node.key_id() == self.local_info.key_id() {
                continue;
            }
            table.add_node(node.clone(), false);
            let distance = key_id.xor(&node.key_id());
            if candidates.insert(distance, node).is_none() {
                new = true;
            }
        }
        new
    }
}
