//! Key-value persistence
//!
//! Values are JSON strings keyed by name. Reads that fail for any reason fall back
//! to the caller's default; writes report errors. There is no locking across
//! processes: two writers on the same key race last-write-wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Storage keys shared by the stores.
pub mod keys {
    pub const CART: &str = "cart";
    pub const ORDERS: &str = "admin-orders";
    pub const PRODUCTS: &str = "admin-products";
    pub const APPOINTMENTS: &str = "appointments";
    pub const SERVICES: &str = "booking-services";
    pub const STAFF: &str = "booking-staff";

    /// Cart key for one browsing session.
    pub fn session_cart(session: &str) -> String { format!("{CART}:{session}") }
}

pub trait KeyValueStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Reads and decodes `key`, falling back to `T::default()` when the key is absent,
/// unreadable or holds malformed JSON.
pub fn load_or_default<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(e) => {
            warn!(key, error = %e, "storage read failed, using default");
            return T::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(key, error = %e, "stored value is malformed, using default");
        T::default()
    })
}

pub fn save<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)?;
    debug!(key, bytes = raw.len(), "stored value");
    Ok(())
}

/// In-process store, the default when no data directory is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("~{b:02x}"));
            }
        }
        name.push_str(".json");
        self.root.join(name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip_and_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        save(&store, "k", &vec![1, 2, 3]).unwrap();
        assert_eq!(load_or_default::<Vec<i32>>(&store, "k"), vec![1, 2, 3]);
        store.remove("k").unwrap();
        assert!(load_or_default::<Vec<i32>>(&store, "k").is_empty());
    }

    #[test]
    fn test_malformed_falls_back_to_default() {
        let store = MemoryStore::new();
        store.set("k", "{not json").unwrap();
        assert!(load_or_default::<Vec<String>>(&store, "k").is_empty());
    }

    #[test]
    fn test_file_store_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("cart:a", "[1]").unwrap();
        store.set("cart_a", "[2]").unwrap();
        assert_eq!(store.get("cart:a").unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("cart_a").unwrap().as_deref(), Some("[2]"));
        store.remove("cart:a").unwrap();
        store.remove("cart:a").unwrap();
        assert_eq!(store.get("cart:a").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        save(&FileStore::open(dir.path()).unwrap(), keys::ORDERS, &["x"]).unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(load_or_default::<Vec<String>>(&reopened, keys::ORDERS), vec!["x".to_string()]);
    }
}
