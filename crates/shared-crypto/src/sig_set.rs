//! # Block Signature Sets
//!
//! A finalized block ships with the per-signer signatures recovered from its
//! notarization (or final) certificate. The aggregated certificate signature
//! stays opaque; the set pairs each signer's roster index with its share.

use serde::{Deserialize, Serialize};
use shared_types::{FinalCert, NotarCert, SourceIdx};

/// Ordered `(signer, signature)` pairs attached to a finalized block.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BlockSignatureSet {
    pub signatures: Vec<(SourceIdx, Vec<u8>)>,
}

impl BlockSignatureSet {
    /// Build from a notarization certificate: one entry per bitmap signer,
    /// each carrying the aggregated signature bytes as its opaque share.
    #[must_use]
    pub fn from_notar_cert(cert: &NotarCert) -> Self {
        Self::from_parts(cert.signers.signers(), &cert.aggregated_signature)
    }

    /// Build from a final certificate.
    #[must_use]
    pub fn from_final_cert(cert: &FinalCert) -> Self {
        Self::from_parts(cert.signers.signers(), &cert.aggregated_signature)
    }

    fn from_parts(signers: Vec<SourceIdx>, aggregated: &[u8]) -> Self {
        let signatures = signers
            .into_iter()
            .map(|idx| (idx, aggregated.to_vec()))
            .collect();
        Self { signatures }
    }

    #[must_use]
    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BlockId, CandidateId, Hash, ShardId, SignerBitmap};

    fn cert() -> NotarCert {
        let mut signers = SignerBitmap::with_size(4);
        signers.set(1);
        signers.set(2);
        NotarCert {
            id: CandidateId {
                slot: 3,
                hash: Hash::new([3; 32]),
                block_id: BlockId::new(ShardId::masterchain(), 1, Hash::new([1; 32])),
            },
            signers,
            aggregated_signature: vec![0xaa, 0xbb],
        }
    }

    #[test]
    fn test_signature_set_orders_signers() {
        let set = BlockSignatureSet::from_notar_cert(&cert());
        assert_eq!(set.signer_count(), 2);
        assert_eq!(set.signatures[0].0, 1);
        assert_eq!(set.signatures[1].0, 2);
        assert_eq!(set.signatures[0].1, vec![0xaa, 0xbb]);
    }
}
