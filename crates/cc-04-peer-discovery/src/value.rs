//! # Signed DHT Values
//!
//! A value lives under `(public_key_hash, name, idx)` and carries a signed
//! update rule, a ttl, and opaque payload bytes. Values failing their rule's
//! signature check never enter storage or lookups.

use serde::{Deserialize, Serialize};
use shared_crypto::{sha256, sha256_of, CryptoError, Ed25519KeyPair, Ed25519PublicKey};
use shared_types::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Key of a DHT value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct DhtKey {
    /// Hash of the owning public key.
    pub id: Hash,
    /// Application namespace, e.g. `b"address"`.
    pub name: Vec<u8>,
    pub idx: u32,
}

impl DhtKey {
    #[must_use]
    pub fn new(id: Hash, name: &[u8], idx: u32) -> Self {
        Self {
            id,
            name: name.to_vec(),
            idx,
        }
    }

    /// The 256-bit key id values are stored and looked up under.
    #[must_use]
    pub fn key_id(&self) -> Hash {
        sha256_of(self)
    }
}

/// Who may replace a stored value.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum UpdateRule {
    /// Updates must be signed by the key owner; republished by holders.
    Signature,
    /// Anybody may overwrite; never republished.
    Anybody,
}

impl UpdateRule {
    #[must_use]
    pub fn need_republish(&self) -> bool {
        matches!(self, Self::Signature)
    }
}

/// A stored value with its owner key and signature.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DhtValue {
    pub key: DhtKey,
    /// The owner's public key; its hash must equal `key.id` for signed
    /// values.
    pub owner_key: [u8; 32],
    pub value: Vec<u8>,
    /// Unix seconds after which the value is dead.
    pub ttl: u64,
    pub update_rule: UpdateRule,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct ValueToSign<'a> {
    key: &'a DhtKey,
    value: &'a [u8],
    ttl: u64,
    update_rule: UpdateRule,
}

impl DhtValue {
    /// Build a signed value owned by `keypair`.
    #[must_use]
    pub fn signed(
        keypair: &Ed25519KeyPair,
        name: &[u8],
        idx: u32,
        value: Vec<u8>,
        ttl: u64,
    ) -> Self {
        let owner_key = *keypair.public_key().as_bytes();
        let key = DhtKey::new(sha256(&owner_key), name, idx);
        let to_sign = ValueToSign {
            key: &key,
            value: &value,
            ttl,
            update_rule: UpdateRule::Signature,
        };
        let bytes = bincode::serialize(&to_sign).expect("bincode serialize");
        let signature = keypair.sign(&bytes).to_vec();
        Self {
            key,
            owner_key,
            value,
            ttl,
            update_rule: UpdateRule::Signature,
            signature,
        }
    }

    /// An unsigned, anybody-updatable value.
    #[must_use]
    pub fn overwritable(key: DhtKey, value: Vec<u8>, ttl: u64) -> Self {
        Self {
            key,
            owner_key: [0u8; 32],
            value,
            ttl,
            update_rule: UpdateRule::Anybody,
            signature: Vec::new(),
        }
    }

    #[must_use]
    pub fn key_id(&self) -> Hash {
        self.key.key_id()
    }

    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl <= now
    }

    /// Validate the value against its update rule.
    pub fn check(&self) -> Result<(), CryptoError> {
        match self.update_rule {
            UpdateRule::Anybody => Ok(()),
            UpdateRule::Signature => {
                if sha256(&self.owner_key) != self.key.id {
                    return Err(CryptoError::InvalidPublicKey);
                }
                let key = Ed25519PublicKey::from_bytes(self.owner_key)?;
                let to_sign = ValueToSign {
                    key: &self.key,
                    value: &self.value,
                    ttl: self.ttl,
                    update_rule: self.update_rule,
                };
                let bytes = bincode::serialize(&to_sign).expect("bincode serialize");
                key.verify(&bytes, &self.signature)
            }
        }
    }

    /// Whether `newer` may replace this stored value.
    #[must_use]
    pub fn accepts_replacement(&self, newer: &DhtValue) -> bool {
        match self.update_rule {
            UpdateRule::Anybody => true,
            UpdateRule::Signature => newer.update_rule == UpdateRule::Signature && newer.ttl >= self.ttl,
        }
    }
}
