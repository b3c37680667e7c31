use crate::error::BackendError;
use crate::mvcc::MvccDb;
use crate::types::Hash;

/// Authenticated radix trie over an `MvccDb` (C3). Only the logical contract
/// matters to this crate; the trie's own internals (node encoding, proof
/// generation) are out of scope. See [`crate::mem::InMemoryTrie`] for the
/// reference implementation used by this crate's tests.
///
/// A `Trie` value is the *shape* of one logical trie (its key namespace and
/// whatever bookkeeping it needs for `root_hash`); it does not own the
/// backing overlay. The overlay is threaded through explicitly as `mvcc`,
/// so a single `States` bundle can share one physical `storage_overlay`
/// across its accounts/tx/event tries without any interior-mutability
/// indirection.
pub trait Trie<Id, M>: Send + Sync
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
{
    fn get(&mut self, mvcc: &mut M, key: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Idempotent for an identical `(key, value)` pair.
    fn put(&mut self, mvcc: &mut M, key: &[u8], value: &[u8]) -> Result<(), BackendError>;

    /// Lexicographic iteration over every key carrying `prefix`.
    fn iterator(
        &mut self,
        mvcc: &mut M,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError>;

    /// Pure function of the committed content.
    fn root_hash(&self) -> Hash;

    /// Checkpoints the current key-set as the new baseline, so a later
    /// `rollback` cannot discard it. A no-op for implementations whose
    /// `root_hash` already derives purely from `mvcc`'s own committed state
    /// (the overlay's own commit/rollback is then enough); the in-memory
    /// reference trie needs it because it caches its key-set outside the
    /// overlay. Call at a block-level `Commit`, never mid-block — see
    /// `States::commit`.
    fn commit(&mut self) {}

    /// Discards keys added since the last `commit`, restoring the baseline.
    /// See `commit` for why this exists; a no-op by default.
    fn rollback(&mut self) {}

    /// Re-roots the logical trie onto another overlay (supplied separately
    /// by the caller at each subsequent call). In `strict` mode, writes
    /// through the returned trie must go through the overlay's transactional
    /// protocol.
    fn copy_to(&self, strict: bool) -> Self
    where
        Self: Sized;

    /// Applies the key/value delta of `other` (backed by `other_mvcc`) onto
    /// `self` (backed by `mvcc`).
    fn replay(
        &mut self,
        mvcc: &mut M,
        other: &Self,
        other_mvcc: &mut M,
    ) -> Result<(), BackendError>
    where
        Self: Sized;
}
