//! Ordered byte-key storage contract and an in-memory reference
//! implementation used by the engine's tests and by callers that have not
//! wired a persistent backend.

use std::collections::BTreeMap;
use std::sync::Mutex;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// A buffered set of writes applied atomically on `commit`.
pub struct Txn<'a> {
    store: &'a MemStore,
    puts: Vec<(Key, Value)>,
    deletes: Vec<Key>,
}

impl<'a> Txn<'a> {
    pub fn put(&mut self, key: Key, value: Value) {
        self.puts.push((key, value));
    }

    pub fn delete(&mut self, key: Key) {
        self.deletes.push(key);
    }

    pub fn commit(self) {
        let mut guard = self.store.inner.lock().expect("mem store mutex poisoned");
        for key in self.deletes {
            guard.remove(&key);
        }
        for (key, value) in self.puts {
            guard.insert(key, value);
        }
    }
}

/// Ordered byte-key store supporting prefix scan and atomic multi-write.
/// Implementations must order keys lexicographically by raw bytes so that
/// big-endian-encoded numeric suffixes (height, output_index) sort
/// numerically.
pub trait StorageKv: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Value>;
    fn put(&self, key: Key, value: Value);
    fn delete(&self, key: &[u8]);
    fn delete_many(&self, keys: &[Key]);
    fn prefix_scan(&self, prefix: &[u8]) -> Vec<(Key, Value)>;
    fn begin_transaction(&self) -> Txn<'_>;

    /// A point-in-time, fully materialized copy used by the fork engine to
    /// take a snapshot before mutating state. The in-memory store implements
    /// this as a deep clone; a real backend would use its MVCC/WAL
    /// checkpoint primitive instead.
    fn checkpoint(&self) -> BTreeMap<Key, Value>;
    fn restore_from(&self, checkpoint: BTreeMap<Key, Value>);
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<BTreeMap<Key, Value>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageKv for MemStore {
    fn get(&self, key: &[u8]) -> Option<Value> {
        self.inner.lock().expect("mem store mutex poisoned").get(key).cloned()
    }

    fn put(&self, key: Key, value: Value) {
        self.inner.lock().expect("mem store mutex poisoned").insert(key, value);
    }

    fn delete(&self, key: &[u8]) {
        self.inner.lock().expect("mem store mutex poisoned").remove(key);
    }

    fn delete_many(&self, keys: &[Key]) {
        let mut guard = self.inner.lock().expect("mem store mutex poisoned");
        for key in keys {
            guard.remove(key);
        }
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Vec<(Key, Value)> {
        let guard = self.inner.lock().expect("mem store mutex poisoned");
        guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn begin_transaction(&self) -> Txn<'_> {
        Txn {
            store: self,
            puts: Vec::new(),
            deletes: Vec::new(),
        }
    }

    fn checkpoint(&self) -> BTreeMap<Key, Value> {
        self.inner.lock().expect("mem store mutex poisoned").clone()
    }

    fn restore_from(&self, checkpoint: BTreeMap<Key, Value>) {
        *self.inner.lock().expect("mem store mutex poisoned") = checkpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_returns_only_matching_keys() {
        let store = MemStore::new();
        store.put(b"utxo:set:a".to_vec(), b"1".to_vec());
        store.put(b"utxo:set:b".to_vec(), b"2".to_vec());
        store.put(b"index:address:a".to_vec(), b"3".to_vec());

        let scanned = store.prefix_scan(b"utxo:set:");
        assert_eq!(scanned.len(), 2);
    }

    #[test]
    fn transaction_applies_puts_and_deletes_atomically() {
        let store = MemStore::new();
        store.put(b"k1".to_vec(), b"v1".to_vec());

        let mut txn = store.begin_transaction();
        txn.delete(b"k1".to_vec());
        txn.put(b"k2".to_vec(), b"v2".to_vec());
        txn.commit();

        assert_eq!(store.get(b"k1"), None);
        assert_eq!(store.get(b"k2"), Some(b"v2".to_vec()));
    }

    #[test]
    fn checkpoint_and_restore_round_trip() {
        let store = MemStore::new();
        store.put(b"k1".to_vec(), b"v1".to_vec());
        let snapshot = store.checkpoint();

        store.put(b"k2".to_vec(), b"v2".to_vec());
        store.delete(b"k1");
        assert_eq!(store.get(b"k1"), None);

        store.restore_from(snapshot);
        assert_eq!(store.get(b"k1"), Some(b"v1".to_vec()));
        assert_eq!(store.get(b"k2"), None);
    }
}
