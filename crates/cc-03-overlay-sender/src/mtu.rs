//! # Effective-MTU Registry
//!
//! Effective MTU for `(local, peer)` is
//! `max(default, local override, max(per-peer overrides))`. Per-peer
//! overrides form a counted multiset so overlapping guards compose; a
//! [`PeersMtuGuard`] inserts its override for every `(local, peer)` pair on
//! construction and removes it on drop. Every change invokes the registered
//! observer so fragmenters can resize.

use parking_lot::Mutex;
use shared_types::PeerShortId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Baseline payload size when nothing larger was negotiated.
pub const DEFAULT_MTU: u64 = 1024;

type MtuObserver = Box<dyn Fn(Option<PeerShortId>, Option<PeerShortId>) + Send + Sync>;

#[derive(Default)]
struct LocalEntry {
    mtu: u64,
    // Per peer: override value -> count of live guards holding it.
    peers: BTreeMap<PeerShortId, BTreeMap<u64, usize>>,
}

struct Inner {
    default_mtu: u64,
    locals: BTreeMap<PeerShortId, LocalEntry>,
    observer: Option<MtuObserver>,
}

/// Shared registry of negotiated MTUs.
#[derive(Clone)]
pub struct MtuRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl MtuRegistry {
    #[must_use]
    pub fn new(default_mtu: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                default_mtu,
                locals: BTreeMap::new(),
                observer: None,
            })),
        }
    }

    /// Register the callback invoked after every MTU change.
    pub fn set_observer(
        &self,
        observer: impl Fn(Option<PeerShortId>, Option<PeerShortId>) + Send + Sync + 'static,
    ) {
        self.inner.lock().observer = Some(Box::new(observer));
        self.notify(None, None);
    }

    pub fn set_default_mtu(&self, mtu: u64) {
        self.inner.lock().default_mtu = mtu;
        self.notify(None, None);
    }

    /// Floor for every peer of one local id. Zero clears the override.
    pub fn set_local_id_mtu(&self, local_id: PeerShortId, mtu: u64) {
        {
            let mut inner = self.inner.lock();
            let entry = inner.locals.entry(local_id).or_default();
            entry.mtu = mtu;
            if entry.mtu == 0 && entry.peers.is_empty() {
                inner.locals.remove(&local_id);
            }
        }
        self.notify(Some(local_id), None);
    }

    pub fn add_peer_mtu(&self, local_id: PeerShortId, peer_id: PeerShortId, mtu: u64) {
        {
            let mut inner = self.inner.lock();
            *inner
                .locals
                .entry(local_id)
                .or_default()
                .peers
                .entry(peer_id)
                .or_default()
                .entry(mtu)
                .or_insert(0) += 1;
        }
        self.notify(Some(local_id), Some(peer_id));
    }

    pub fn remove_peer_mtu(&self, local_id: PeerShortId, peer_id: PeerShortId, mtu: u64) {
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.locals.get_mut(&local_id) else {
                warn!(%local_id, %peer_id, mtu, "removing nonexistent peer mtu");
                return;
            };
            let Some(counts) = entry.peers.get_mut(&peer_id) else {
                warn!(%local_id, %peer_id, mtu, "removing nonexistent peer mtu");
                return;
            };
            let Some(count) = counts.get_mut(&mtu) else {
                warn!(%local_id, %peer_id, mtu, "removing nonexistent peer mtu");
                return;
            };
            *count -= 1;
            if *count == 0 {
                counts.remove(&mtu);
            }
            if counts.is_empty() {
                entry.peers.remove(&peer_id);
                if entry.peers.is_empty() && entry.mtu == 0 {
                    inner.locals.remove(&local_id);
                }
            }
        }
        self.notify(Some(local_id), Some(peer_id));
    }

    /// The largest payload a sender may hand to the overlay for this pair.
    #[must_use]
    pub fn effective_mtu(&self, local_id: PeerShortId, peer_id: PeerShortId) -> u64 {
        let inner = self.inner.lock();
        let mut mtu = inner.default_mtu;
        if let Some(entry) = inner.locals.get(&local_id) {
            mtu = mtu.max(entry.mtu);
            if let Some(counts) = entry.peers.get(&peer_id) {
                if let Some((largest, _)) = counts.iter().next_back() {
                    mtu = mtu.max(*largest);
                }
            }
        }
        mtu
    }

    fn notify(&self, local_id: Option<PeerShortId>, peer_id: Option<PeerShortId>) {
        // The observer is invoked outside the registry lock; it may read
        // effective_mtu again.
        let observer = {
            let mut inner = self.inner.lock();
            inner.observer.take()
        };
        if let Some(observer) = observer {
            observer(local_id, peer_id);
            self.inner.lock().observer = Some(observer);
        }
    }

    /// Scoped override for every `(local, peer)` combination.
    #[must_use]
    pub fn guard(
        &self,
        local_ids: Vec<PeerShortId>,
        peers: Vec<PeerShortId>,
        mtu: u64,
    ) -> PeersMtuGuard {
        for local in &local_ids {
            for peer in &peers {
                self.add_peer_mtu(*local, *peer, mtu);
            }
        }
        PeersMtuGuard {
            registry: self.clone(),
            local_ids,
            peers,
            mtu,
        }
    }
}

/// RAII override: alive while some component needs a larger (or pinned) MTU
/// toward a set of peers.
pub struct PeersMtuGuard {
    registry: MtuRegistry,
    local_ids: Vec<PeerShortId>,
    peers: Vec<PeerShortId>,
    mtu: u64,
}

impl Drop for PeersMtuGuard {
    fn drop(&mut self) {
        for local in &self.local_ids {
            for peer in &self.peers {
                self.registry.remove_peer_mtu(*local, *peer, self.mtu);
            }
        }
    }
}
