use crate::error::BackendError;

/// Versioned overlay on a `Storage`, supporting the transactional protocol
/// described in spec §6.1. This crate specifies how `States` *uses* this
/// contract; the concrete implementation (conflict detection, version
/// bookkeeping) is an external collaborator. See [`crate::mem::InMemoryMvccDb`]
/// for a reference implementation used by this crate's own tests.
///
/// `Id` is the caller-chosen transaction identity (typically a transaction
/// hash); it is opaque here beyond `Eq + Hash + Clone`.
pub trait MvccDb<Id>: Send + Sync
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
{
    /// The type of overlay returned by `prepare`. The reference implementation
    /// sets this to `Self`; `States`/`WorldState` both require `Child = Self`
    /// too (a child bundle's overlay has to be the same concrete type as its
    /// parent's), so in practice every implementation plugged into this
    /// crate sets it to `Self` as well.
    type Child: MvccDb<Id>;

    fn begin(&mut self) -> Result<(), BackendError>;

    /// Opens a child overlay scoped to `txid`. The parent is unaffected until
    /// the child's writes are published via `check_and_update`.
    fn prepare(&self, txid: Id) -> Result<Self::Child, BackendError>;

    /// Opens an unscoped fresh overlay onto the same underlying storage, with
    /// empty local buffers and no participation in dependency tracking. Used
    /// by `WorldState::clone()` (§4.4), which needs "a fresh overlay onto the
    /// same underlying Storage" but has no `txid` to scope it to.
    fn snapshot(&self) -> Self
    where
        Self: Sized;

    /// Computes the set of other in-flight transactions whose key-sets
    /// intersect this overlay's key-set on a key at least one of them wrote,
    /// then publishes this overlay's writes into its parent. Returns the
    /// dependency set — non-empty is a conflict signal, not an error.
    fn check_and_update(&mut self) -> Result<Vec<Id>, BackendError>;

    fn reset(&mut self) -> Result<(), BackendError>;

    fn close(&mut self) -> Result<(), BackendError>;

    fn commit(&mut self) -> Result<(), BackendError>;

    fn rollback(&mut self) -> Result<(), BackendError>;

    /// Reading also registers the key as accessed, for conflict detection,
    /// hence `&mut self` rather than a pure accessor.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError>;

    fn del(&mut self, key: &[u8]) -> Result<(), BackendError>;

    /// Strict mode requires every write to observe the latest global version
    /// at write time; used on the storage overlay but not the changelog.
    fn set_strict_global_version_check(&mut self, strict: bool);
}
