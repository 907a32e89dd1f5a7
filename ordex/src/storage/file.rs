//! Single-file backing store.
//!
//! Every write is appended to one file as a framed entry and the whole file
//! is replayed into memory on open.
//!
//! # Entry Format
//!
//! ```text
//! [len: u32 LE][kind: u8][key_len: u32 LE][key][value][crc32: u32 LE]
//! ```
//!
//! `len` covers the whole entry including itself and the checksum, which is
//! computed over every byte before it. A torn or corrupt tail is cut off at
//! the last valid entry when the file is opened. A failed append is cut back
//! the same way, and the next append starts at the end of the last entry
//! written in full.
//!
//! Writes made inside a transaction are held back and appended together on
//! commit.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::storage::io::{BackingStore, StoreError};

/// Size of the length prefix.
const LEN_SIZE: usize = 4;
/// Size of the kind byte plus key length.
const HEADER_SIZE: usize = LEN_SIZE + 1 + 4;
/// Size of the trailing checksum.
const CHECKSUM_SIZE: usize = 4;

const KIND_SET: u8 = 1;
const KIND_DELETE: u8 = 2;

/// One appended change.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Change {
    #[allow(clippy::cast_possible_truncation)]
    fn to_bytes(&self) -> Vec<u8> {
        let (kind, key, value): (u8, &[u8], &[u8]) = match self {
            Self::Set { key, value } => (KIND_SET, key, value),
            Self::Delete { key } => (KIND_DELETE, key, &[]),
        };
        let total_len = HEADER_SIZE + key.len() + value.len() + CHECKSUM_SIZE;
        let mut bytes = Vec::with_capacity(total_len);
        bytes.extend_from_slice(&(total_len as u32).to_le_bytes());
        bytes.push(kind);
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(value);
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Decode one entry from the front of `bytes`.
    ///
    /// Returns the change and the number of bytes consumed.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), StoreError> {
        if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
            return Err(StoreError::Corruption("truncated entry header".to_string()));
        }
        let entry_len = read_u32(bytes, 0) as usize;
        if entry_len < HEADER_SIZE + CHECKSUM_SIZE || entry_len > bytes.len() {
            return Err(StoreError::Corruption(format!(
                "entry length {entry_len} out of bounds"
            )));
        }

        let expected = read_u32(bytes, entry_len - CHECKSUM_SIZE);
        let actual = crc32fast::hash(&bytes[..entry_len - CHECKSUM_SIZE]);
        if expected != actual {
            return Err(StoreError::Corruption(format!(
                "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            )));
        }

        let key_len = read_u32(bytes, LEN_SIZE + 1) as usize;
        let body = &bytes[HEADER_SIZE..entry_len - CHECKSUM_SIZE];
        if key_len > body.len() {
            return Err(StoreError::Corruption(format!(
                "key length {key_len} exceeds entry body"
            )));
        }
        let (key, value) = body.split_at(key_len);

        let change = match bytes[LEN_SIZE] {
            KIND_SET => Self::Set {
                key: key.to_vec(),
                value: value.to_vec(),
            },
            KIND_DELETE => Self::Delete { key: key.to_vec() },
            other => {
                return Err(StoreError::Corruption(format!("unknown entry kind {other}")));
            }
        };
        Ok((change, entry_len))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Writes held back until commit, and the values they replaced.
#[derive(Debug, Default)]
struct Pending {
    undo: HashMap<Vec<u8>, Option<Vec<u8>>>,
    changes: Vec<Change>,
}

/// A store kept in memory and persisted as an append-only file.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    path: PathBuf,
    /// Offset just past the last complete entry.
    end: u64,
    values: HashMap<Vec<u8>, Vec<u8>>,
    pending: Option<Pending>,
}

impl FileStore {
    /// Open the store at `path`, creating the file if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut values = HashMap::new();
        let mut offset = 0;
        let mut entries = 0usize;
        while offset < bytes.len() {
            match Change::from_bytes(&bytes[offset..]) {
                Ok((change, consumed)) => {
                    apply(&mut values, change);
                    offset += consumed;
                    entries += 1;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "discarding damaged tail of store file"
                    );
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }
        debug!(path = %path.display(), entries, keys = values.len(), "opened store file");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            end: offset as u64,
            values,
            pending: None,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flush appended entries to durable storage.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Rewrite the file so it holds only the live keys.
    ///
    /// Fails if a transaction is open.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        if self.pending.is_some() {
            return Err(StoreError::Transaction(
                "cannot compact during a transaction".to_string(),
            ));
        }
        let temp_path = self.path.with_extension("compact");
        let mut end = 0u64;
        {
            let mut temp = File::create(&temp_path)?;
            for (key, value) in &self.values {
                let change = Change::Set {
                    key: key.clone(),
                    value: value.clone(),
                };
                let bytes = change.to_bytes();
                temp.write_all(&bytes)?;
                end += bytes.len() as u64;
            }
            temp.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.end = end;
        debug!(path = %self.path.display(), keys = self.values.len(), "compacted store file");
        Ok(())
    }

    fn append(&mut self, changes: &[Change]) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        for change in changes {
            bytes.extend_from_slice(&change.to_bytes());
        }
        self.file.seek(SeekFrom::Start(self.end))?;
        if let Err(e) = self.file.write_all(&bytes) {
            warn!(
                path = %self.path.display(),
                end = self.end,
                error = %e,
                "cutting back failed append"
            );
            self.file.set_len(self.end)?;
            return Err(e.into());
        }
        self.end += bytes.len() as u64;
        Ok(())
    }

    fn record(&mut self, change: Change) -> Result<(), StoreError> {
        match self.pending.as_mut() {
            Some(pending) => {
                let key = match &change {
                    Change::Set { key, .. } | Change::Delete { key } => key.clone(),
                };
                if let MapEntry::Vacant(slot) = pending.undo.entry(key) {
                    let prior = self.values.get(slot.key()).cloned();
                    slot.insert(prior);
                }
                pending.changes.push(change.clone());
            }
            None => self.append(std::slice::from_ref(&change))?,
        }
        apply(&mut self.values, change);
        Ok(())
    }
}

fn apply(values: &mut HashMap<Vec<u8>, Vec<u8>>, change: Change) {
    match change {
        Change::Set { key, value } => {
            values.insert(key, value);
        }
        Change::Delete { key } => {
            values.remove(&key);
        }
    }
}

impl BackingStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.values.contains_key(key))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.record(Change::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if !self.values.contains_key(key) {
            return Ok(());
        }
        self.record(Change::Delete { key: key.to_vec() })
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.pending.is_some() {
            return Err(StoreError::Transaction(
                "transaction already in progress".to_string(),
            ));
        }
        self.pending = Some(Pending::default());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        if let Err(e) = self.append(&pending.changes) {
            self.pending = Some(pending);
            return Err(e);
        }
        self.sync()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        for (key, prior) in pending.undo {
            match prior {
                Some(value) => apply(&mut self.values, Change::Set { key, value }),
                None => apply(&mut self.values, Change::Delete { key }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_reopen_replays_writes() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.log");

        {
            let mut store = FileStore::open(&path).expect("open");
            store.set(b"a", b"1").expect("set");
            store.set(b"b", b"2").expect("set");
            store.set(b"a", b"3").expect("set");
            store.delete(b"b").expect("delete");
            store.sync().expect("sync");
        }

        let store = FileStore::open(&path).expect("reopen");
        assert_eq!(store.get(b"a").expect("get"), Some(b"3".to_vec()));
        assert_eq!(store.get(b"b").expect("get"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.log");

        {
            let mut store = FileStore::open(&path).expect("open");
            store.set(b"good", b"value").expect("set");
            store.set(b"torn", b"value").expect("set");
        }
        let full_len = std::fs::metadata(&path).expect("metadata").len();
        let file = OpenOptions::new().write(true).open(&path).expect("open raw");
        file.set_len(full_len - 3).expect("truncate");
        drop(file);

        let mut store = FileStore::open(&path).expect("reopen");
        assert_eq!(store.get(b"good").expect("get"), Some(b"value".to_vec()));
        assert_eq!(store.get(b"torn").expect("get"), None);

        // Appends after recovery land after the last good entry.
        store.set(b"after", b"x").expect("set");
        drop(store);
        let store = FileStore::open(&path).expect("reopen again");
        assert_eq!(store.get(b"after").expect("get"), Some(b"x".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_appends_after_a_torn_write_survive_reopen() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.log");

        let mut store = FileStore::open(&path).expect("open");
        store.set(b"a", b"1").expect("set");

        // Half of an entry left behind by a write that failed partway.
        let torn = Change::Set {
            key: b"lost".to_vec(),
            value: vec![7; 64],
        }
        .to_bytes();
        let mut raw = OpenOptions::new().append(true).open(&path).expect("open raw");
        raw.write_all(&torn[..torn.len() / 2]).expect("short write");
        drop(raw);

        store.set(b"b", b"2").expect("set");
        store.set(b"c", b"3").expect("set");
        drop(store);

        let store = FileStore::open(&path).expect("reopen");
        assert_eq!(store.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").expect("get"), Some(b"2".to_vec()));
        assert_eq!(store.get(b"c").expect("get"), Some(b"3".to_vec()));
        assert_eq!(store.get(b"lost").expect("get"), None);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_corrupt_checksum_is_rejected() {
        let change = Change::Set {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        };
        let mut bytes = change.to_bytes();
        let (decoded, consumed) = Change::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, change);
        assert_eq!(consumed, bytes.len());

        let last = bytes.len() - CHECKSUM_SIZE - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            Change::from_bytes(&bytes),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn test_rolled_back_writes_never_reach_the_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.log");

        {
            let mut store = FileStore::open(&path).expect("open");
            store.set(b"a", b"1").expect("set");
            store.begin().expect("begin");
            store.set(b"a", b"2").expect("set");
            store.set(b"b", b"2").expect("set");
            assert_eq!(store.get(b"a").expect("get"), Some(b"2".to_vec()));
            store.rollback().expect("rollback");
            assert_eq!(store.get(b"a").expect("get"), Some(b"1".to_vec()));

            store.begin().expect("begin");
            store.set(b"c", b"3").expect("set");
            store.commit().expect("commit");
        }

        let store = FileStore::open(&path).expect("reopen");
        assert_eq!(store.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").expect("get"), None);
        assert_eq!(store.get(b"c").expect("get"), Some(b"3".to_vec()));
    }

    #[test]
    fn test_compact_keeps_live_keys() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.log");

        let mut store = FileStore::open(&path).expect("open");
        for i in 0..20u8 {
            store.set(b"churn", &[i]).expect("set");
        }
        store.set(b"other", b"x").expect("set");
        let before = std::fs::metadata(&path).expect("metadata").len();
        store.compact().expect("compact");
        let after = std::fs::metadata(&path).expect("metadata").len();
        assert!(after < before);

        store.set(b"late", b"y").expect("set");
        drop(store);
        let store = FileStore::open(&path).expect("reopen");
        assert_eq!(store.get(b"churn").expect("get"), Some(vec![19]));
        assert_eq!(store.get(b"other").expect("get"), Some(b"x".to_vec()));
        assert_eq!(store.get(b"late").expect("get"), Some(b"y".to_vec()));
    }
}
