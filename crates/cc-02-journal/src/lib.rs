//! # KV Journal
//!
//! Durable key-value state for the receiver and the finalizer. The contract
//! is deliberately small: opaque keys and values, prefix scans, and a
//! crash-tolerant file backend whose replay after any suffix crash yields
//! the same visible state as a clean shutdown.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod file;
pub mod memory;

use thiserror::Error;

pub use file::FileJournal;
pub use memory::MemoryJournal;

/// Journal failures. Anything but `Io` means the store itself is suspect.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal corrupt: {0}")]
    Corrupt(String),
}

/// Durable KV store with opaque keys and values.
pub trait Journal: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, JournalError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), JournalError>;

    fn remove(&self, key: &[u8]) -> Result<(), JournalError>;

    /// All live `(key, value)` rows whose key starts with `prefix`, in key
    /// order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, JournalError>;

    /// Make every acknowledged mutation durable.
    fn flush(&self) -> Result<(), JournalError>;
}
