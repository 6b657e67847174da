//! # Candidate Identity and Signatures
//!
//! A candidate id commits to its slot and hash data; the producer signs the
//! id together with the session tag so signatures cannot migrate between
//! consensus runs.

use crate::hashing::sha256_of;
use crate::signatures::{CryptoError, Ed25519KeyPair, Ed25519PublicKey};
use shared_types::{CandidateHashData, CandidateId, CandidateSignData, SessionId, Slot};

/// Build the id of a candidate: `H(slot, hash_data)` plus the block id the
/// candidate stands for.
#[must_use]
pub fn candidate_id(slot: Slot, hash_data: &CandidateHashData) -> CandidateId {
    CandidateId {
        slot,
        hash: sha256_of(&(slot, hash_data)),
        block_id: hash_data.block_id(),
    }
}

/// Sign a candidate id for `session`.
#[must_use]
pub fn sign_candidate(keypair: &Ed25519KeyPair, session: SessionId, id: &CandidateId) -> Vec<u8> {
    let data = CandidateSignData {
        session_id: session,
        id: *id,
    };
    let bytes = bincode::serialize(&data).expect("bincode serialize");
    keypair.sign(&bytes).to_vec()
}

/// Verify a producer's candidate signature.
pub fn verify_candidate(
    key: &Ed25519PublicKey,
    session: SessionId,
    id: &CandidateId,
    signature: &[u8],
) -> Result<(), CryptoError> {
    let data = CandidateSignData {
        session_id: session,
        id: *id,
    };
    let bytes = bincode::serialize(&data).expect("bincode serialize");
    key.verify(&bytes, signature)
}
