//! Key-value store contract
//!
//! The pipeline only ever reads and writes opaque byte strings under string keys. An empty
//! value returned by [`KvStore::get`] is a miss.

use std::collections::HashMap;

use auto_impl::auto_impl;
use parking_lot::RwLock;

use crate::Result;

/// A key-value store shared by all threads of a run
#[auto_impl(&, Box, Arc)]
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, or an empty vector if there is none
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Stores `value` under `key`, replacing any previous value
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// An in-process [`KvStore`] backed by a hash map
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}
impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.inner.read().get(key).cloned().unwrap_or_default())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn roundtrip<S: KvStore>(store: S) -> Result<()> {
        assert!(store.get("missing")?.is_empty());
        store.put("key", b"value")?;
        assert_eq!(store.get("key")?, b"value");
        Ok(())
    }

    #[test]
    fn test_memory_store_through_references() -> Result<()> {
        let store = MemoryStore::new();
        roundtrip(&store)?;
        store.put("key", b"other")?;
        assert_eq!(store.get("key")?, b"other");

        let shared = Arc::new(MemoryStore::new());
        roundtrip(shared.clone())?;
        assert_eq!(shared.get("key")?, b"value");
        Ok(())
    }
}
