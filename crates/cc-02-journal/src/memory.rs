//! # In-Memory Journal
//!
//! Test and wiring backend with the same visibility semantics as the file
//! journal, minus durability.

use crate::{Journal, JournalError};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Volatile journal over a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    index: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count, for tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }
}

impl Journal for MemoryJournal {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, JournalError> {
        Ok(self.index.lock().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), JournalError> {
        self.index.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), JournalError> {
        self.index.lock().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, JournalError> {
        let index = self.index.lock();
        Ok(index
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), JournalError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_contract_as_file_backend() {
        let journal = MemoryJournal::new();
        journal.set(b"a/1", b"x").unwrap();
        journal.set(b"a/2", b"y").unwrap();
        journal.set(b"b/1", b"z").unwrap();
        journal.remove(b"a/2").unwrap();

        assert_eq!(journal.get(b"a/1").unwrap(), Some(b"x".to_vec()));
        assert_eq!(journal.get(b"a/2").unwrap(), None);
        let rows = journal.scan_prefix(b"a/").unwrap();
        assert_eq!(rows, vec![(b"a/1".to_vec(), b"x".to_vec())]);
        assert_eq!(journal.len(), 2);
    }
}
