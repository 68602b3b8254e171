//! Storage backend implementations.
//!
//! - InMemoryStore: ephemeral storage for tests and dry runs
//! - BinaryStore: bincode file, written through a temporary file and renamed

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Key type for storage operations
pub type StorageKey = Vec<u8>;

/// Value type for storage operations
pub type StorageValue = Vec<u8>;

/// Trait for storage backends
pub trait StorageBackend: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>>;

    /// Set a value for a key
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// List all keys with a given prefix, in key order
    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>>;

    /// Flush any pending writes to persistent storage
    fn flush(&self) -> Result<()>;
}

type Table = BTreeMap<StorageKey, StorageValue>;

fn read_lock(table: &RwLock<Table>) -> Result<RwLockReadGuard<'_, Table>> {
    table.read().map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))
}

fn write_lock(table: &RwLock<Table>) -> Result<RwLockWriteGuard<'_, Table>> {
    table.write().map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))
}

fn keys_with_prefix(table: &Table, prefix: &[u8]) -> Vec<StorageKey> {
    table
        .range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory storage backend (for testing and ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Table>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of entries
    pub fn len(&self) -> Result<usize> {
        Ok(read_lock(&self.data)?.len())
    }

    /// Check if empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(read_lock(&self.data)?.is_empty())
    }
}

impl StorageBackend for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        Ok(read_lock(&self.data)?.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        write_lock(&self.data)?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(write_lock(&self.data)?.remove(key).is_some())
    }

    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        Ok(keys_with_prefix(&*read_lock(&self.data)?, prefix))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINARY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// File-backed store: the whole table is one bincode file.
///
/// Writes stay in memory until `flush`; the file is replaced atomically.
#[derive(Debug)]
pub struct BinaryStore {
    path: PathBuf,
    cache: RwLock<Table>,
    dirty: RwLock<bool>,
}

impl BinaryStore {
    /// File name inside the data directory
    pub const FILE_NAME: &'static str = "state.bin";

    /// Open (or create) a store in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", dir.display(), e)))?;

        let path = dir.join(Self::FILE_NAME);
        let cache = if path.exists() {
            let mut bytes = Vec::new();
            File::open(&path)
                .and_then(|mut f| f.read_to_end(&mut bytes))
                .map_err(|e| Error::Storage(format!("cannot read {}: {}", path.display(), e)))?;
            bincode::deserialize(&bytes).map_err(|e| Error::Deserialization(e.to_string()))?
        } else {
            Table::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
            dirty: RwLock::new(false),
        })
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mark_dirty(&self) -> Result<()> {
        let mut dirty = self
            .dirty
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))?;
        *dirty = true;
        Ok(())
    }

    fn save_to_disk(&self) -> Result<()> {
        let bytes = bincode::serialize(&*read_lock(&self.cache)?)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("bin.tmp");
        File::create(&tmp)
            .and_then(|mut f| {
                f.write_all(&bytes)?;
                f.sync_all()
            })
            .map_err(|e| Error::Storage(format!("cannot write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Storage(format!("cannot replace {}: {}", self.path.display(), e)))
    }
}

impl StorageBackend for BinaryStore {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        Ok(read_lock(&self.cache)?.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        write_lock(&self.cache)?.insert(key.to_vec(), value.to_vec());
        self.mark_dirty()
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let existed = write_lock(&self.cache)?.remove(key).is_some();
        if existed {
            self.mark_dirty()?;
        }
        Ok(existed)
    }

    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        Ok(keys_with_prefix(&*read_lock(&self.cache)?, prefix))
    }

    fn flush(&self) -> Result<()> {
        let mut dirty = self
            .dirty
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))?;
        if *dirty {
            self.save_to_disk()?;
            *dirty = false;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPED STORE WRAPPER
// ═══════════════════════════════════════════════════════════════════════════════

/// Type-safe wrapper around a storage backend
pub struct TypedStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> TypedStore<B> {
    /// Create a new typed store
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.backend.get(key)? {
            Some(data) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| Error::Deserialization(format!("{}: {}", String::from_utf8_lossy(key), e))),
            None => Ok(None),
        }
    }

    /// Set a typed value
    pub fn set<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let data = bincode::serialize(value)
            .map_err(|e| Error::Serialization(format!("{}: {}", String::from_utf8_lossy(key), e)))?;
        self.backend.set(key, &data)
    }

    /// Delete a value
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.backend.delete(key)
    }

    /// List keys with prefix
    pub fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        self.backend.list_prefix(prefix)
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Get the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEY PREFIXES
// ═══════════════════════════════════════════════════════════════════════════════

/// Key prefixes of the persisted layout
pub mod prefixes {
    /// Position debt and status: `debt:{owner}`
    pub const DEBT: &[u8] = b"debt:";
    /// Collateral balance: `coll:{owner}:{kind}`
    pub const COLLATERAL: &[u8] = b"coll:";
    /// Registry node: `node:{owner}`
    pub const NODE: &[u8] = b"node:";
    /// Stability pool deposit: `dep:{owner}`
    pub const DEPOSIT: &[u8] = b"dep:";
    /// Claimable surplus: `surplus:{owner}`
    pub const SURPLUS: &[u8] = b"surplus:";
    /// Global state
    pub const GLOBAL: &[u8] = b"global";
    /// Pool-wide factors
    pub const POOL: &[u8] = b"pool";
}

/// Create a key with a prefix
pub fn make_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(prefix.len() + key.len());
    result.extend_from_slice(prefix);
    result.extend_from_slice(key);
    result
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryStore::new();

        store.set(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"nonexistent").unwrap(), None);

        assert!(store.delete(b"key1").unwrap());
        assert!(!store.delete(b"key1").unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_prefix_listing_is_ordered() {
        let store = InMemoryStore::new();

        store.set(b"debt:b", b"2").unwrap();
        store.set(b"debt:a", b"1").unwrap();
        store.set(b"dep:a", b"3").unwrap();

        let keys = store.list_prefix(prefixes::DEBT).unwrap();
        assert_eq!(keys, vec![b"debt:a".to_vec(), b"debt:b".to_vec()]);
        assert_eq!(store.list_prefix(prefixes::DEPOSIT).unwrap().len(), 1);
    }

    #[test]
    fn test_typed_store() {
        let store = TypedStore::new(InMemoryStore::new());

        store.set(b"number", &12345u128).unwrap();
        let value: u128 = store.get(b"number").unwrap().unwrap();
        assert_eq!(value, 12345);

        store.set(b"bad", &1u8).unwrap();
        assert!(store.get::<u128>(b"bad").is_err());
    }

    #[test]
    fn test_make_key() {
        let key = make_key(prefixes::NODE, b"abcd");
        assert_eq!(key, b"node:abcd".to_vec());
    }

    #[test]
    fn test_binary_store_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let store = BinaryStore::open(temp_dir.path()).unwrap();
            store.set(b"persistent", b"data").unwrap();
            store.flush().unwrap();
            assert!(store.path().exists());
        }

        let store = BinaryStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get(b"persistent").unwrap(), Some(b"data".to_vec()));
    }

    #[test]
    fn test_binary_store_prefix_listing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BinaryStore::open(temp_dir.path()).unwrap();

        store.set(b"node:b", b"2").unwrap();
        store.set(b"node:a", b"1").unwrap();
        store.set(b"pool", b"3").unwrap();

        let keys = store.list_prefix(prefixes::NODE).unwrap();
        assert_eq!(keys, vec![b"node:a".to_vec(), b"node:b".to_vec()]);
        assert!(store.delete(b"node:a").unwrap());
        assert_eq!(store.list_prefix(prefixes::NODE).unwrap().len(), 1);
    }

    #[test]
    fn test_binary_store_unflushed_writes_are_lost() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let store = BinaryStore::open(temp_dir.path()).unwrap();
            store.set(b"volatile", b"data").unwrap();
        }

        let store = BinaryStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get(b"volatile").unwrap(), None);
    }
}
