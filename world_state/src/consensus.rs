use crate::error::BackendError;
use crate::mvcc::MvccDb;
use crate::types::Hash;

/// Opaque, consensus-plug-in-defined record identifying a consensus-state
/// snapshot. The reference plug-in represents it as a bare `Hash`; a real
/// plug-in (PoS validator set, DAG tip set, ...) would carry richer content,
/// which is exactly why this crate treats it as opaque.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ConsensusRoot(pub Hash);

/// Per-block consensus state owned by the `States` bundle (C5).
pub trait ConsensusState: Send + Sync + Clone {
    fn replay(&mut self, other: &Self) -> Result<(), BackendError>;

    fn copy_to(&self, strict: bool) -> Self;

    fn root_hash(&self) -> ConsensusRoot;

    /// The active validator/participant set identified by this snapshot.
    fn dynasty(&self) -> Vec<Hash>;

    fn dynasty_root(&self) -> Hash;

    /// Advances the consensus snapshot by `elapsed_seconds`, given the
    /// sibling sub-states' current roots (a read-only view of the rest of
    /// the `States` bundle, rather than the bundle itself, which avoids a
    /// self-referential `ConsensusState: States` bound).
    fn next(
        &self,
        elapsed_seconds: u64,
        accounts_root: Hash,
        txs_root: Hash,
        events_root: Hash,
    ) -> Self;
}

/// Constructs a fresh `ConsensusState` from an optional prior root.
pub trait Consensus<Id, M>: Send + Sync
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
{
    type State: ConsensusState;

    fn new_state(
        &self,
        root: Option<ConsensusRoot>,
        mvcc: M,
        strict: bool,
    ) -> Result<Self::State, BackendError>;
}
