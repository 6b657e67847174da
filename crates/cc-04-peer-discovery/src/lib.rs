//! # Peer Discovery - Kademlia DHT Client
//!
//! Name-to-address resolution over a Kademlia overlay:
//!
//! - **Domain layer**: XOR distance, k-buckets with active/backup slot rows,
//!   the routing table, and the signed value model.
//! - **Storage**: locally held values with ttl eviction, distance pruning,
//!   and republish bookkeeping.
//! - **Service**: query serving plus the iterative client operations
//!   (`get_value`, `set_value`, reverse connections).
//!
//! The transport is abstract: implementations of [`DhtNetworkPort`] carry
//! queries to remote nodes.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod domain;
pub mod service;
pub mod storage;
pub mod value;
pub mod wire;

pub use domain::{bucket_index, DhtBucket, DhtNodeInfo, RemoteNodeState, RoutingTable};
pub use service::{DhtClient, DhtConfig, DhtNetworkPort};
pub use storage::ValueStorage;
pub use value::{DhtKey, DhtValue, UpdateRule};
pub use wire::{DhtAnswer, DhtQuery};

/// Default replication factor.
pub const DEFAULT_K: usize = 10;

/// Parallelism of iterative lookups.
pub const LOOKUP_ALPHA: usize = 3;

/// A node is queried at most this many times per lookup.
pub const MAX_ATTEMPTS: usize = 3;
