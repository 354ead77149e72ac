use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::Mutex,
    time::Instant,
};

use thiserror::Error;
use tracing::debug;

use crate::{config::StorageConfig, id::Id};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("too many entries stored locally")]
    TooManyEntries,
    #[error("value exceeds the configured maximum size")]
    ValueTooLarge,
}

/// Injected local key-value store (§4.4). One value per key; the last
/// `put` for a key wins, matching the republish semantics of `store()`.
pub trait ValueStore: Send + Sync {
    fn get(&self, key: &Id) -> Option<Vec<u8>>;
    fn put(&self, key: Id, value: Vec<u8>, now: Instant) -> Result<(), StorageError>;
    /// Drops every entry whose lifetime has elapsed as of `now`.
    fn expire(&self, now: Instant);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
}

struct Inner {
    values: HashMap<Id, Vec<u8>>,
    deadlines: BinaryHeap<Reverse<(Instant, Id)>>,
}

pub struct InMemoryValueStore {
    config: StorageConfig,
    inner: Mutex<Inner>,
}

impl InMemoryValueStore {
    pub fn new(config: StorageConfig) -> Self {
        InMemoryValueStore {
            config,
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                deadlines: BinaryHeap::new(),
            }),
        }
    }
}

impl ValueStore for InMemoryValueStore {
    fn get(&self, key: &Id) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().values.get(key).cloned()
    }

    fn put(&self, key: Id, value: Vec<u8>, now: Instant) -> Result<(), StorageError> {
        if value.len() > self.config.max_size {
            return Err(StorageError::ValueTooLarge);
        }

        let mut inner = self.inner.lock().unwrap();
        let is_new = !inner.values.contains_key(&key);
        if is_new && inner.values.len() >= self.config.max_entries {
            debug!(%key, "rejecting store: local value store is full");
            return Err(StorageError::TooManyEntries);
        }

        let deadline = now + self.config.max_lifetime;
        inner.values.insert(key, value);
        inner.deadlines.push(Reverse((deadline, key)));
        Ok(())
    }

    fn expire(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        while let Some(Reverse((deadline, key))) = inner.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            inner.deadlines.pop();
            // A later `put` may have pushed a fresher deadline for the same
            // key; only drop the value if this was in fact its current one.
            if inner.values.contains_key(&key) {
                debug!(%key, "expiring stored value");
                inner.values.remove(&key);
            }
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().values.len()
    }

    fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemoryValueStore::new(StorageConfig::default());
        let key = Id::from_hex("aa");
        let now = Instant::now();
        store.put(key, b"hello".to_vec(), now).unwrap();
        assert_eq!(store.get(&key), Some(b"hello".to_vec()));
    }

    #[test]
    fn expire_drops_after_lifetime() {
        let config = StorageConfig {
            max_lifetime: Duration::from_secs(1),
            ..Default::default()
        };
        let store = InMemoryValueStore::new(config);
        let key = Id::from_hex("bb");
        let now = Instant::now();
        store.put(key, b"hello".to_vec(), now).unwrap();
        store.expire(now + Duration::from_millis(500));
        assert!(store.get(&key).is_some());
        store.expire(now + Duration::from_secs(2));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn rejects_oversized_value() {
        let config = StorageConfig {
            max_size: 4,
            ..Default::default()
        };
        let store = InMemoryValueStore::new(config);
        let err = store
            .put(Id::from_hex("cc"), b"toolong".to_vec(), Instant::now())
            .unwrap_err();
        assert_eq!(err, StorageError::ValueTooLarge);
    }

    #[test]
    fn rejects_new_key_once_full() {
        let config = StorageConfig {
            max_entries: 1,
            ..Default::default()
        };
        let store = InMemoryValueStore::new(config);
        let now = Instant::now();
        store.put(Id::from_hex("dd"), b"a".to_vec(), now).unwrap();
        let err = store
            .put(Id::from_hex("ee"), b"b".to_vec(), now)
            .unwrap_err();
        assert_eq!(err, StorageError::TooManyEntries);
        // Re-`put`ing an existing key never counts as growth.
        store.put(Id::from_hex("dd"), b"c".to_vec(), now).unwrap();
    }
}
