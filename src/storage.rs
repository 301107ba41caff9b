//! Key-value storage layer
//!
//! Every persisted record lives in an ordered key-value store. A `WriteSet`
//! collects puts and deletes and is committed atomically, which is what the
//! wallet gateway and the settlement paths use as their transaction.

use crate::config::{CompressionType, StorageConfig};
use crate::errors::{EngineResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Iteration order for prefix scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Staged mutations committed as one atomic unit
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn put_json<T: Serialize>(&mut self, key: impl Into<Vec<u8>>, value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            StorageError::WriteFailed(format!("Failed to encode record: {}", e))
        })?;
        self.put(key, bytes);
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Ordered key-value store
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Scan keys starting with `prefix`, strictly after `after` in scan order
    fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
        direction: ScanDirection,
    ) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply all operations atomically
    fn write(&self, batch: WriteSet) -> EngineResult<()>;
}

/// Smallest key greater than every key starting with `prefix`
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// In-memory store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("memory store lock poisoned".to_string())
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
        direction: ScanDirection,
    ) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        let upper = prefix_successor(prefix);

        // A cursor outside the prefix range would make the bounds inverted
        if let Some(a) = after {
            let out_of_range = match direction {
                ScanDirection::Forward => upper.as_deref().map_or(false, |u| a >= u),
                ScanDirection::Reverse => a <= prefix,
            };
            if out_of_range {
                return Ok(Vec::new());
            }
        }

        let rows = match direction {
            ScanDirection::Forward => {
                let lower = match after {
                    Some(a) => Bound::Excluded(a.to_vec()),
                    None => Bound::Included(prefix.to_vec()),
                };
                let upper = upper.map_or(Bound::Unbounded, Bound::Excluded);
                data.range((lower, upper))
                    .filter(|(k, _)| k.starts_with(prefix))
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
            ScanDirection::Reverse => {
                let upper = match after {
                    Some(a) => Bound::Excluded(a.to_vec()),
                    None => upper.map_or(Bound::Unbounded, Bound::Excluded),
                };
                data.range((Bound::Included(prefix.to_vec()), upper))
                    .rev()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
        };

        Ok(rows)
    }

    fn write(&self, batch: WriteSet) -> EngineResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    data.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// RocksDB-backed store; one `WriteSet` maps to one `WriteBatch`
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    pub fn new<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        Self::new_with_config(path, &StorageConfig::default())
    }

    pub fn new_with_config<P: AsRef<Path>>(path: P, config: &StorageConfig) -> EngineResult<Self> {
        if config.clear_on_start && path.as_ref().exists() {
            tracing::warn!(path = %path.as_ref().display(), "Clearing data directory on start");
            std::fs::remove_dir_all(path.as_ref())?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number as i32);
        opts.set_compression_type(match config.compression_type {
            CompressionType::None => rocksdb::DBCompressionType::None,
            CompressionType::Snappy => rocksdb::DBCompressionType::Snappy,
            CompressionType::Lz4 => rocksdb::DBCompressionType::Lz4,
            CompressionType::Zstd => rocksdb::DBCompressionType::Zstd,
        });

        let db = DB::open(&opts, path.as_ref()).map_err(|e| {
            StorageError::Unavailable(format!(
                "Failed to open {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
        direction: ScanDirection,
    ) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let successor = prefix_successor(prefix);
        let (start, mode_direction) = match direction {
            ScanDirection::Forward => (after.unwrap_or(prefix).to_vec(), Direction::Forward),
            ScanDirection::Reverse => match (after, successor) {
                (Some(a), _) => (a.to_vec(), Direction::Reverse),
                (None, Some(s)) => (s, Direction::Reverse),
                (None, None) => (vec![u8::MAX; prefix.len() + 1], Direction::Reverse),
            },
        };

        let mut rows = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&start, mode_direction))
        {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;

            // Seek positions are inclusive; both the cursor and the prefix
            // successor must be skipped.
            if key.as_ref() == start.as_slice() && (after.is_some() || direction == ScanDirection::Reverse) {
                continue;
            }
            if !key.starts_with(prefix) {
                match direction {
                    ScanDirection::Forward => break,
                    ScanDirection::Reverse if key.as_ref() > prefix => continue,
                    ScanDirection::Reverse => break,
                }
            }

            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }

        Ok(rows)
    }

    fn write(&self, batch: WriteSet) -> EngineResult<()> {
        let mut wb = WriteBatch::default();
        for op in batch.ops() {
            match op {
                WriteOp::Put { key, value } => wb.put(key, value),
                WriteOp::Delete { key } => wb.delete(key),
            }
        }
        self.db
            .write(wb)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(store: &dyn KvStore) {
        let mut ws = WriteSet::new();
        for key in ["a:1", "p:1", "p:2", "p:3", "q:1"] {
            ws.put(key, key.as_bytes().to_vec());
        }
        store.write(ws).unwrap();
    }

    fn keys(rows: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<String> {
        rows.into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect()
    }

    fn check_scans(store: &dyn KvStore) {
        seed(store);

        let fwd = store.scan_prefix(b"p:", None, 10, ScanDirection::Forward).unwrap();
        assert_eq!(keys(fwd), vec!["p:1", "p:2", "p:3"]);

        let rev = store.scan_prefix(b"p:", None, 10, ScanDirection::Reverse).unwrap();
        assert_eq!(keys(rev), vec!["p:3", "p:2", "p:1"]);

        let after = store
            .scan_prefix(b"p:", Some(b"p:1"), 10, ScanDirection::Forward)
            .unwrap();
        assert_eq!(keys(after), vec!["p:2", "p:3"]);

        let rev_after = store
            .scan_prefix(b"p:", Some(b"p:3"), 1, ScanDirection::Reverse)
            .unwrap();
        assert_eq!(keys(rev_after), vec!["p:2"]);
    }

    #[test]
    fn test_memory_prefix_scans() {
        check_scans(&MemoryStore::new());
    }

    #[test]
    fn test_rocks_prefix_scans() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::new(dir.path()).unwrap();
        check_scans(&store);
    }

    #[test]
    fn test_write_set_applies_puts_and_deletes() {
        let store = MemoryStore::new();
        seed(&store);

        let mut ws = WriteSet::new();
        ws.delete("p:2");
        ws.put("p:4", b"x".to_vec());
        store.write(ws).unwrap();

        assert!(store.get(b"p:2").unwrap().is_none());
        assert_eq!(store.get(b"p:4").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"p:"), Some(b"p;".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xFF]), None);
    }
}
