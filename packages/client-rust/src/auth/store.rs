//! Session key persistence.

use dashmap::DashMap;

/// Key-value store holding negotiated session keys.
///
/// Implementations may be shared between processes (a cache server, a file);
/// the client only needs point reads and writes.
pub trait SessionStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
}

/// Process-local [`SessionStore`] backed by [`DashMap`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_is_none() {
        let store = MemorySessionStore::new();
        assert!(store.get("nope").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn set_overwrites() {
        let store = MemorySessionStore::new();
        store.set("k", b"one").unwrap();
        store.set("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(b"two".as_slice()));
        assert_eq!(store.len(), 1);
    }
}
