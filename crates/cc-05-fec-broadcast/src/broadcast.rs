//! # Chunked Broadcast
//!
//! Payloads larger than the effective MTU travel as FEC symbols tagged with
//! the payload's content hash. The reassembler completes each broadcast at
//! most once and tolerates duplicate or late fragments.

use crate::codec::{DecodeOutcome, FecDecoder, FecEncoder, FecError, FecParams, Symbol};
use crate::reed_solomon::{RsDecoder, RsEncoder};
use serde::{Deserialize, Serialize};
use shared_crypto::sha256;
use shared_types::Hash;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Wire overhead budget per fragment: hash + params + ids.
const FRAGMENT_OVERHEAD: usize = 96;

/// One symbol of one broadcast on the wire.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BroadcastFragment {
    /// Content hash of the complete payload; reassembly key and dedup tag.
    pub broadcast_hash: Hash,
    pub params: FecParams,
    pub symbol: Symbol,
}

/// Split a payload into enough fragments for reconstruction plus repair
/// headroom, each fitting `mtu` bytes on the wire.
pub fn fragment_payload(payload: &[u8], mtu: usize) -> Result<Vec<BroadcastFragment>, FecError> {
    let max_symbol = mtu
        .checked_sub(FRAGMENT_OVERHEAD)
        .filter(|s| *s > 0)
        .ok_or_else(|| FecError::InvalidParams(format!("mtu {mtu} too small")))?;
    let broadcast_hash = sha256(payload);
    let mut encoder = RsEncoder::with_max_symbol_size(payload, max_symbol)?;
    let params = encoder.params();
    encoder.prepare_more_symbols()?;

    let mut fragments = Vec::with_capacity(params.symbols_count as usize * 2);
    for id in 0..params.symbols_count * 2 {
        fragments.push(BroadcastFragment {
            broadcast_hash,
            params,
            symbol: encoder.gen_symbol(id)?,
        });
    }
    Ok(fragments)
}

/// Reassembles broadcasts from fragments, keyed by broadcast hash.
#[derive(Default)]
pub struct Reassembler {
    in_progress: BTreeMap<Hash, RsDecoder>,
    completed: BTreeSet<Hash>,
}

impl Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one fragment. Returns the payload exactly once, on the
    /// fragment that completes it; a mismatched content hash discards the
    /// whole reassembly.
    pub fn add_fragment(
        &mut self,
        fragment: BroadcastFragment,
    ) -> Result<Option<Vec<u8>>, FecError> {
        if self.completed.contains(&fragment.broadcast_hash) {
            return Ok(None);
        }
        let hash = fragment.broadcast_hash;
        match self.in_progress.get(&hash) {
            Some(decoder) if decoder.params() != fragment.params => {
                return Err(FecError::InvalidParams("fragment params diverge".into()));
            }
            Some(_) => {}
            None => {
                self.in_progress.insert(hash, RsDecoder::new(fragment.params)?);
            }
        }
        let Some(decoder) = self.in_progress.get_mut(&hash) else {
            return Ok(None);
        };
        decoder.add_symbol(fragment.symbol)?;
        if !decoder.may_try_decode() {
            return Ok(None);
        }
        match decoder.try_decode(true)? {
            DecodeOutcome::NeedMore => Ok(None),
            DecodeOutcome::Ready(payload) => {
                self.in_progress.remove(&hash);
                if sha256(&payload) != hash {
                    debug!(hash = %hash.short_tag(), "reassembled payload failed its content hash");
                    return Err(FecError::DecodeFailed("content hash mismatch".into()));
                }
                self.completed.insert(hash);
                Ok(Some(payload))
            }
        }
    }

    /// Broadcasts currently mid-reassembly.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.in_progress.len()
    }

    /// Forget completed tags older than the caller's retention policy.
    pub fn forget_completed(&mut self, hash: &Hash) {
        self.completed.remove(hash);
    }
}
