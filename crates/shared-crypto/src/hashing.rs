//! # SHA-256 Hashing
//!
//! One-shot helpers producing [`Hash`] content addresses.

use serde::Serialize;
use sha2::{Digest, Sha256};
use shared_types::Hash;

/// Hash raw bytes.
#[must_use]
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    Hash::new(digest.into())
}

/// Hash several byte slices as one stream.
#[must_use]
pub fn sha256_parts(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash::new(hasher.finalize().into())
}

/// Content-address a serializable value through its bincode encoding.
pub fn sha256_of<T: Serialize>(value: &T) -> Hash {
    // bincode serialization of the in-memory types cannot fail.
    let bytes = bincode::serialize(value).expect("bincode serialize");
    sha256(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"abc");
        assert_eq!(
            hash.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parts_equivalent_to_concat() {
        assert_eq!(sha256_parts(&[b"ab", b"c"]), sha256(b"abc"));
    }

    #[test]
    fn test_content_address_is_stable() {
        let a = sha256_of(&(1u32, "x"));
        let b = sha256_of(&(1u32, "x"));
        assert_eq!(a, b);
        assert_ne!(a, sha256_of(&(2u32, "x")));
    }
}
