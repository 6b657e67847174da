//! # Core Entities
//!
//! Identities, addresses, and the scalar primitives every subsystem speaks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-source block height. Heights start at 1; root pseudo-blocks sit at 0.
pub type Height = u64;

/// Index of a validator inside the session roster (`0..n_sources`).
pub type SourceIdx = u32;

/// Fork identifier allocated by the catchain receiver. Fork id 0 is reserved
/// for root pseudo-blocks.
pub type ForkId = u32;

/// Logical step index in consensus.
pub type Slot = u32;

/// Sequence number of a chain block.
pub type BlockSeqno = u32;

/// A 256-bit content address.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance between two hashes, as used by the DHT.
    #[must_use]
    pub fn xor(&self, other: &Hash) -> Hash {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Hash(out)
    }

    /// Number of leading zero bits, used for k-bucket indexing.
    #[must_use]
    pub fn leading_zero_bits(&self) -> u32 {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }

    /// Short hex tag for log lines.
    #[must_use]
    pub fn short_tag(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short_tag())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// 256-bit tag naming a single catchain+consensus run (the "incarnation").
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize,
)]
pub struct SessionId(pub Hash);

impl SessionId {
    #[must_use]
    pub fn as_hash(&self) -> Hash {
        self.0
    }

    #[must_use]
    pub fn short_tag(&self) -> String {
        self.0.short_tag()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short_tag())
    }
}

/// Short form of a node identity: hash of its long-term public key.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize,
)]
pub struct NodeShortId(pub Hash);

impl NodeShortId {
    #[must_use]
    pub fn as_hash(&self) -> Hash {
        self.0
    }
}

impl fmt::Display for NodeShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short_tag())
    }
}

/// Short id of a node on the overlay transport. Distinct from [`NodeShortId`]
/// because one validator key may front several transport identities.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize,
)]
pub struct PeerShortId(pub Hash);

impl fmt::Display for PeerShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short_tag())
    }
}

/// Network address list with version and reinit timestamp.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct PeerAddress {
    pub addrs: Vec<SocketAddr>,
    pub version: u32,
    pub reinit_date: u32,
}

impl PeerAddress {
    #[must_use]
    pub fn new(addrs: Vec<SocketAddr>, version: u32, reinit_date: u32) -> Self {
        Self {
            addrs,
            version,
            reinit_date,
        }
    }
}

/// Shard descriptor: workchain plus shard prefix.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
pub struct ShardId {
    pub workchain: i32,
    pub shard: u64,
}

pub const MASTERCHAIN: i32 = -1;

impl ShardId {
    #[must_use]
    pub fn new(workchain: i32, shard: u64) -> Self {
        Self { workchain, shard }
    }

    #[must_use]
    pub fn masterchain() -> Self {
        Self {
            workchain: MASTERCHAIN,
            shard: 1 << 63,
        }
    }

    #[must_use]
    pub fn is_masterchain(&self) -> bool {
        self.workchain == MASTERCHAIN
    }
}

impl Default for ShardId {
    fn default() -> Self {
        Self::masterchain()
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{:016x})", self.workchain, self.shard)
    }
}

/// A point in time as fractional seconds since the Unix epoch.
///
/// Carried explicitly through rate limiters and expiry checks so tests can
/// replay literal sequences without touching the wall clock.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Default, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    #[must_use]
    pub fn at(secs: f64) -> Self {
        Self(secs)
    }

    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(since_epoch.as_secs_f64())
    }

    #[must_use]
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn add_secs(&self, secs: f64) -> Self {
        Self(self.0 + secs)
    }

    /// Seconds from `earlier` to `self`; negative if `self` is earlier.
    #[must_use]
    pub fn elapsed_since(&self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_xor_distance() {
        let a = Hash::new([0xff; 32]);
        let b = Hash::new([0x0f; 32]);
        let d = a.xor(&b);
        assert_eq!(d.as_bytes()[0], 0xf0);
        assert!(a.xor(&a).is_zero());
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(Hash::ZERO.leading_zero_bits(), 256);
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        assert_eq!(Hash::new(bytes).leading_zero_bits(), 7);
        bytes[0] = 0x80;
        assert_eq!(Hash::new(bytes).leading_zero_bits(), 0);
    }

    #[test]
    fn test_shard_masterchain() {
        assert!(ShardId::masterchain().is_masterchain());
        assert!(!ShardId::new(0, 1 << 63).is_masterchain());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::at(10.0);
        assert_eq!(t.add_secs(1.5).as_secs(), 11.5);
        assert_eq!(t.add_secs(1.5).elapsed_since(t), 1.5);
    }
}
