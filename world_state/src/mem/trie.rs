use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::error::BackendError;
use crate::mvcc::MvccDb;
use crate::trie::Trie;
use crate::types::Hash;

/// Reference `Trie` implementation (C3): a key/value map namespaced onto a
/// shared `MvccDb` overlay, whose root hash is a domain-separated digest over
/// its sorted entries (keys *and* values). Not a production Merkle-Patricia
/// trie — sufficient to satisfy the root-determinism invariant the spec
/// requires (§3 invariant 3) without implementing real authenticated proofs.
pub struct InMemoryTrie<Id, M> {
    domain: Vec<u8>,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Entries as of the last `commit`. `rollback` restores `entries` to
    /// this, since `put` updates `entries` eagerly (before the caller's
    /// overlay write is known to ever actually get committed).
    checkpoint: BTreeMap<Vec<u8>, Vec<u8>>,
    _marker: PhantomData<(Id, M)>,
}

impl<Id, M> InMemoryTrie<Id, M>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
{
    pub fn new(domain: impl Into<Vec<u8>>) -> Self {
        InMemoryTrie {
            domain: domain.into(),
            entries: BTreeMap::new(),
            checkpoint: BTreeMap::new(),
            _marker: PhantomData,
        }
    }

    fn namespaced(&self, key: &[u8]) -> Vec<u8> {
        let mut out = self.domain.clone();
        out.extend_from_slice(key);
        out
    }
}

impl<Id, M> Trie<Id, M> for InMemoryTrie<Id, M>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
{
    fn get(&mut self, mvcc: &mut M, key: &[u8]) -> Result<Vec<u8>, BackendError> {
        let namespaced = self.namespaced(key);
        mvcc.get(&namespaced)?.ok_or(BackendError::KeyNotFound)
    }

    fn put(&mut self, mvcc: &mut M, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let namespaced = self.namespaced(key);
        mvcc.put(&namespaced, value)?;
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn iterator(
        &mut self,
        _mvcc: &mut M,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Domain-separated digest over every `(key, value)` pair in address
    /// order, so two trees agreeing on key-set but differing on a stored
    /// value (e.g. the same address with a different balance) get distinct
    /// roots, matching §3 invariant 3.
    fn root_hash(&self) -> Hash {
        let mut data = Vec::new();
        for (key, value) in &self.entries {
            data.extend_from_slice(&(key.len() as u32).to_be_bytes());
            data.extend_from_slice(key);
            data.extend_from_slice(&(value.len() as u32).to_be_bytes());
            data.extend_from_slice(value);
        }
        Hash::digest(&self.domain, &data)
    }

    fn commit(&mut self) {
        self.checkpoint = self.entries.clone();
    }

    fn rollback(&mut self) {
        self.entries = self.checkpoint.clone();
    }

    fn copy_to(&self, strict: bool) -> Self {
        let _ = strict;
        InMemoryTrie {
            domain: self.domain.clone(),
            entries: self.entries.clone(),
            checkpoint: self.entries.clone(),
            _marker: PhantomData,
        }
    }

    fn replay(
        &mut self,
        mvcc: &mut M,
        other: &Self,
        other_mvcc: &mut M,
    ) -> Result<(), BackendError> {
        let _ = other_mvcc;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = other
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in entries {
            self.put(mvcc, &key, &value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{InMemoryMvccDb, InMemoryStorage};

    fn mvcc() -> InMemoryMvccDb<u64, InMemoryStorage> {
        let mut db = InMemoryMvccDb::new(InMemoryStorage::new());
        db.begin().unwrap();
        db
    }

    #[test]
    fn rollback_discards_keys_added_since_last_commit() {
        let mut trie: InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>> =
            InMemoryTrie::new(b"t".to_vec());
        let mut db = mvcc();
        let root_before = trie.root_hash();

        trie.put(&mut db, b"k", b"v").unwrap();
        assert_ne!(trie.root_hash(), root_before);

        trie.rollback();
        assert_eq!(trie.root_hash(), root_before);
    }

    #[test]
    fn commit_survives_a_later_rollback() {
        let mut trie: InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>> =
            InMemoryTrie::new(b"t".to_vec());
        let mut db = mvcc();

        trie.put(&mut db, b"k", b"v").unwrap();
        trie.commit();
        let root_after_commit = trie.root_hash();

        trie.put(&mut db, b"k2", b"v2").unwrap();
        trie.rollback();

        assert_eq!(trie.root_hash(), root_after_commit);
    }

    #[test]
    fn copy_to_starts_its_own_checkpoint() {
        let mut trie: InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>> =
            InMemoryTrie::new(b"t".to_vec());
        let mut db = mvcc();
        trie.put(&mut db, b"k", b"v").unwrap();

        let mut child = trie.copy_to(true);
        assert_eq!(child.root_hash(), trie.root_hash());

        child.put(&mut db, b"k2", b"v2").unwrap();
        child.rollback();
        assert_eq!(child.root_hash(), trie.root_hash());
    }

    // Two trees agreeing on key-set but differing on a stored value must not
    // collide on root_hash (§3 invariant 3): a digest over keys alone would
    // miss e.g. the same address with a different balance.
    #[test]
    fn root_hash_distinguishes_same_keys_with_different_values() {
        let mut db = mvcc();

        let mut a: InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>> =
            InMemoryTrie::new(b"t".to_vec());
        a.put(&mut db, b"addr", b"balance=10").unwrap();

        let mut b: InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>> =
            InMemoryTrie::new(b"t".to_vec());
        b.put(&mut db, b"addr", b"balance=99").unwrap();

        assert_ne!(a.root_hash(), b.root_hash());
    }
}
