//! # Value Storage
//!
//! Locally held DHT values. Maintenance evicts values near ttl expiry and
//! values that drifted too far from the local key (more than `k + 10` bucket
//! positions); republishable own values are cycled through on a round-robin.

use crate::value::DhtValue;
use shared_types::Hash;
use std::collections::BTreeMap;
use tracing::debug;

/// Values whose remaining ttl is below this are not worth republishing.
const REPUBLISH_TTL_FLOOR: u64 = 60;

/// Stored values keyed by key id.
#[derive(Debug, Default)]
pub struct ValueStorage {
    values: BTreeMap<Hash, DhtValue>,
    /// Round-robin cursor over republishable values.
    republish_cursor: Option<Hash>,
}

impl ValueStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace a value. The caller has already validated the
    /// signature; replacement honors the stored value's update rule.
    pub fn store(&mut self, value: DhtValue, now: u64) -> bool {
        if value.is_expired(now) {
            return false;
        }
        let key_id = value.key_id();
        match self.values.get(&key_id) {
            Some(existing) if !existing.accepts_replacement(&value) => false,
            _ => {
                self.values.insert(key_id, value);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, key_id: &Hash, now: u64) -> Option<&DhtValue> {
        self.values.get(key_id).filter(|v| !v.is_expired(now))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop expired values and values too distant from the local key, as
    /// judged by the caller's neighborhood rule.
    pub fn evict(&mut self, now: u64, is_too_far: impl Fn(&Hash) -> bool) -> usize {
        let before = self.values.len();
        self.values
            .retain(|key_id, value| !value.is_expired(now) && !is_too_far(key_id));
        let evicted = before - self.values.len();
        if evicted > 0 {
            debug!(evicted, "evicted stored dht values");
        }
        evicted
    }

    /// Next value due for republish, cycling fairly across the stored set.
    /// Values near expiry or with a non-republishable rule are skipped.
    pub fn next_republish(&mut self, now: u64) -> Option<DhtValue> {
        if self.values.is_empty() {
            return None;
        }
        let start = self.republish_cursor;
        let mut iter: Box<dyn Iterator<Item = (&Hash, &DhtValue)>> = match start {
            Some(cursor) => Box::new(
                self.values
                    .range((
                        std::ops::Bound::Excluded(cursor),
                        std::ops::Bound::Unbounded,
                    ))
                    .chain(self.values.range(..=cursor)),
            ),
            None => Box::new(self.values.iter()),
        };
        let found = iter.find(|(_, value)| {
            value.update_rule.need_republish()
                && !value.is_expired(now)
                && value.ttl.saturating_sub(now) > REPUBLISH_TTL_FLOOR
        });
        let found = found.map(|(k, v)| (*k, v.clone()));
        drop(iter);
        if let Some((key_id, value)) = found {
            self.republish_cursor = Some(key_id);
            return Some(value);
        }
        None
    }
}
