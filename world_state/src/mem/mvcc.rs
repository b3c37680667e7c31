use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::BackendError;
use crate::mvcc::MvccDb;
use crate::storage::Storage;

struct HistoryEntry<Id> {
    version: u64,
    id: Option<Id>,
    write_keys: HashSet<Vec<u8>>,
}

struct Inner<Id, S> {
    storage: S,
    version: u64,
    history: Vec<HistoryEntry<Id>>,
}

/// Reference `MvccDb` implementation (C2) used by this crate's own tests and
/// by embedders without a production backend. Conflict detection works by
/// comparing each overlay's read/write key-set against the write-sets of
/// every overlay published since this one's `base_version` — see
/// `check_and_update` for the exact rule.
///
/// A key design choice (not spelled out by the external contract): a
/// conflicting overlay's writes are *not* published into the shared store.
/// Only a clean `check_and_update` (empty dependency list) publishes, so a
/// caller that discards a conflicting transaction never has to clean up
/// partially-applied writes at this layer.
pub struct InMemoryMvccDb<Id, S> {
    inner: Arc<Mutex<Inner<Id, S>>>,
    id: Option<Id>,
    base_version: u64,
    reads: HashSet<Vec<u8>>,
    writes: HashMap<Vec<u8>, Vec<u8>>,
    deletes: HashSet<Vec<u8>>,
    strict: bool,
    /// `EngineConfig::dependency_set_capacity_hint`, threaded through so
    /// `check_and_update` can pre-size its result `Vec` instead of growing it
    /// one conflicting `Id` at a time.
    dep_capacity_hint: usize,
}

impl<Id, S> InMemoryMvccDb<Id, S>
where
    S: Storage,
{
    pub fn new(storage: S) -> Self {
        InMemoryMvccDb {
            inner: Arc::new(Mutex::new(Inner {
                storage,
                version: 0,
                history: Vec::new(),
            })),
            id: None,
            base_version: 0,
            reads: HashSet::new(),
            writes: HashMap::new(),
            deletes: HashSet::new(),
            strict: false,
            dep_capacity_hint: 0,
        }
    }

    /// Sets the capacity hint used to pre-size `check_and_update`'s
    /// dependency-set `Vec`. Purely an allocation optimization; a wrong hint
    /// never changes behavior, only how many times the `Vec` reallocates.
    pub fn with_dependency_capacity_hint(mut self, hint: usize) -> Self {
        self.dep_capacity_hint = hint;
        self
    }
}

impl<Id, S> Clone for InMemoryMvccDb<Id, S>
where
    Id: Clone,
{
    fn clone(&self) -> Self {
        InMemoryMvccDb {
            inner: Arc::clone(&self.inner),
            id: self.id.clone(),
            base_version: self.base_version,
            reads: self.reads.clone(),
            writes: self.writes.clone(),
            deletes: self.deletes.clone(),
            strict: self.strict,
            dep_capacity_hint: self.dep_capacity_hint,
        }
    }
}

impl<Id, S> MvccDb<Id> for InMemoryMvccDb<Id, S>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    S: Storage,
{
    type Child = Self;

    fn begin(&mut self) -> Result<(), BackendError> {
        self.reads.clear();
        self.writes.clear();
        self.deletes.clear();
        let inner = self.inner.lock().expect("mvcc mutex poisoned");
        self.base_version = inner.version;
        Ok(())
    }

    fn prepare(&self, txid: Id) -> Result<Self::Child, BackendError> {
        let base_version = self.inner.lock().expect("mvcc mutex poisoned").version;
        Ok(InMemoryMvccDb {
            inner: Arc::clone(&self.inner),
            id: Some(txid),
            base_version,
            reads: HashSet::new(),
            writes: HashMap::new(),
            deletes: HashSet::new(),
            strict: self.strict,
            dep_capacity_hint: self.dep_capacity_hint,
        })
    }

    fn snapshot(&self) -> Self {
        let base_version = self.inner.lock().expect("mvcc mutex poisoned").version;
        InMemoryMvccDb {
            inner: Arc::clone(&self.inner),
            id: None,
            base_version,
            reads: HashSet::new(),
            writes: HashMap::new(),
            deletes: HashSet::new(),
            strict: self.strict,
            dep_capacity_hint: self.dep_capacity_hint,
        }
    }

    fn check_and_update(&mut self) -> Result<Vec<Id>, BackendError> {
        let mut inner = self.inner.lock().expect("mvcc mutex poisoned");

        let touched: HashSet<&Vec<u8>> = self
            .reads
            .iter()
            .chain(self.writes.keys())
            .chain(self.deletes.iter())
            .collect();

        let mut deps: Vec<Id> = Vec::with_capacity(self.dep_capacity_hint);
        deps.extend(
            inner
                .history
                .iter()
                .filter(|entry| entry.version > self.base_version)
                .filter(|entry| entry.write_keys.iter().any(|k| touched.contains(k)))
                .filter_map(|entry| entry.id.clone()),
        );

        if deps.is_empty() {
            let mut write_keys: HashSet<Vec<u8>> = self.writes.keys().cloned().collect();
            for (key, value) in self.writes.drain() {
                inner.storage.put(&key, &value)?;
            }
            for key in self.deletes.drain() {
                inner.storage.delete(&key)?;
                write_keys.insert(key);
            }
            inner.version += 1;
            let version = inner.version;
            inner.history.push(HistoryEntry {
                version,
                id: self.id.clone(),
                write_keys,
            });
            self.base_version = version;
        }

        self.reads.clear();
        self.writes.clear();
        self.deletes.clear();
        Ok(deps)
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        self.reads.clear();
        self.writes.clear();
        self.deletes.clear();
        self.base_version = self.inner.lock().expect("mvcc mutex poisoned").version;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.reads.clear();
        self.writes.clear();
        self.deletes.clear();
        Ok(())
    }

    /// Publishes the buffered writes unconditionally, without computing a
    /// dependency set, and still records a history entry so later overlays'
    /// `check_and_update` can see these keys as written.
    fn commit(&mut self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("mvcc mutex poisoned");
        let mut write_keys: HashSet<Vec<u8>> = self.writes.keys().cloned().collect();
        for (key, value) in self.writes.drain() {
            inner.storage.put(&key, &value)?;
        }
        for key in self.deletes.drain() {
            inner.storage.delete(&key)?;
            write_keys.insert(key);
        }
        inner.version += 1;
        let version = inner.version;
        inner.history.push(HistoryEntry {
            version,
            id: self.id.clone(),
            write_keys,
        });
        self.base_version = version;
        self.reads.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        self.reads.clear();
        self.writes.clear();
        self.deletes.clear();
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        self.reads.insert(key.to_vec());
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        if self.deletes.contains(key) {
            return Ok(None);
        }
        let inner = self.inner.lock().expect("mvcc mutex poisoned");
        inner.storage.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.deletes.remove(key);
        self.writes.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&mut self, key: &[u8]) -> Result<(), BackendError> {
        self.writes.remove(key);
        self.deletes.insert(key.to_vec());
        Ok(())
    }

    fn set_strict_global_version_check(&mut self, strict: bool) {
        self.strict = strict;
    }
}
