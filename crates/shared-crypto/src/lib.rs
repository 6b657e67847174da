//! # Shared Crypto - Identities and Signatures for Causal-Chain
//!
//! SHA-256 content addressing, Ed25519 node identities, and the conversion
//! of consensus certificates into per-signer signature sets.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod candidate;
pub mod hashing;
pub mod sig_set;
pub mod signatures;

pub use candidate::{candidate_id, sign_candidate, verify_candidate};
pub use hashing::{sha256, sha256_of, sha256_parts};
pub use sig_set::BlockSignatureSet;
pub use signatures::{CryptoError, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
