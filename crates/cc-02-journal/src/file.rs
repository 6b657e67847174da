//! # File-Backed Journal
//!
//! Append-only log of mutations. Each record frame is
//! `[len: u32 LE][payload: bincode(Record)][crc: u32 LE]`, the CRC computed
//! over the payload at write time and verified on replay. A torn tail
//! (partial frame or CRC mismatch at the end of the file) is truncated on
//! open; everything before it is intact.

use crate::{Journal, JournalError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
enum Record {
    Set { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

struct Backing {
    file: File,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Append-only file journal with an in-memory index.
pub struct FileJournal {
    path: PathBuf,
    backing: Mutex<Backing>,
}

/// Frames larger than this are treated as tail corruption rather than
/// attempted allocations.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

impl FileJournal {
    /// Open (or create) the journal at `path`, replaying every intact record.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (index, valid_len) = Self::replay(&data)?;
        if (valid_len as u64) < data.len() as u64 {
            warn!(
                path = %path.display(),
                dropped = data.len() - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len as u64)?;
        }
        file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), rows = index.len(), "journal opened");
        Ok(Self {
            path,
            backing: Mutex::new(Backing { file, index }),
        })
    }

    /// Walk frames from the start; stop at the first torn or corrupt one.
    /// Returns the replayed index and the length of the intact prefix.
    fn replay(data: &[u8]) -> Result<(BTreeMap<Vec<u8>, Vec<u8>>, usize), JournalError> {
        let mut index = BTreeMap::new();
        let mut offset = 0usize;

        while data.len() - offset >= 8 {
            let len = u32::from_le_bytes(
                data[offset..offset + 4]
                    .try_into()
                    .map_err(|_| JournalError::Corrupt("frame header".into()))?,
            );
            if len > MAX_FRAME_LEN {
                break;
            }
            let frame_end = offset + 8 + len as usize;
            if frame_end > data.len() {
                break;
            }
            let payload = &data[offset + 4..offset + 4 + len as usize];
            let stored_crc = u32::from_le_bytes(
                data[offset + 4 + len as usize..frame_end]
                    .try_into()
                    .map_err(|_| JournalError::Corrupt("frame crc".into()))?,
            );
            if crc32fast::hash(payload) != stored_crc {
                break;
            }
            let Ok(record) = bincode::deserialize::<Record>(payload) else {
                break;
            };
            match record {
                Record::Set { key, value } => {
                    index.insert(key, value);
                }
                Record::Remove { key } => {
                    index.remove(&key);
                }
            }
            offset = frame_end;
        }

        Ok((index, offset))
    }

    fn append(backing: &mut Backing, record: &Record) -> Result<(), JournalError> {
        let payload =
            bincode::serialize(record).map_err(|e| JournalError::Corrupt(e.to_string()))?;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        backing.file.write_all(&frame)?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, JournalError> {
        Ok(self.backing.lock().index.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), JournalError> {
        let mut backing = self.backing.lock();
        Self::append(
            &mut backing,
            &Record::Set {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )?;
        backing.index.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), JournalError> {
        let mut backing = self.backing.lock();
        if backing.index.remove(key).is_none() {
            return Ok(());
        }
        Self::append(&mut backing, &Record::Remove { key: key.to_vec() })
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, JournalError> {
        let backing = self.backing.lock();
        Ok(backing
            .index
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), JournalError> {
        let backing = self.backing.lock();
        backing.file.sync_data()?;
        Ok(())
    }
}
