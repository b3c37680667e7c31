use crate::consensus::{Consensus, ConsensusRoot, ConsensusState};
use crate::error::BackendError;
use crate::mvcc::MvccDb;
use crate::types::Hash;

/// Minimal reference consensus plug-in. Its "dynasty" is a single
/// deterministic participant derived from the prior root and the elapsed
/// time, which is enough to exercise `Replay`/`CopyTo`/`NextConsensusState`
/// without pulling in a real PoS/DAG consensus implementation (out of scope
/// per the spec).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NoopConsensusState {
    root: ConsensusRoot,
    dynasty: Vec<Hash>,
}

impl ConsensusState for NoopConsensusState {
    fn replay(&mut self, other: &Self) -> Result<(), BackendError> {
        self.root = other.root;
        self.dynasty = other.dynasty.clone();
        Ok(())
    }

    fn copy_to(&self, strict: bool) -> Self {
        let _ = strict;
        self.clone()
    }

    fn root_hash(&self) -> ConsensusRoot {
        self.root
    }

    fn dynasty(&self) -> Vec<Hash> {
        self.dynasty.clone()
    }

    fn dynasty_root(&self) -> Hash {
        let mut data = Vec::new();
        for hash in &self.dynasty {
            data.extend_from_slice(hash.as_bytes());
        }
        Hash::digest(b"dynasty-root", &data)
    }

    fn next(
        &self,
        elapsed_seconds: u64,
        accounts_root: Hash,
        txs_root: Hash,
        events_root: Hash,
    ) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(self.root.0.as_bytes());
        data.extend_from_slice(&elapsed_seconds.to_be_bytes());
        data.extend_from_slice(accounts_root.as_bytes());
        data.extend_from_slice(txs_root.as_bytes());
        data.extend_from_slice(events_root.as_bytes());
        let next_root = Hash::digest(b"consensus-next", &data);
        NoopConsensusState {
            root: ConsensusRoot(next_root),
            dynasty: vec![next_root],
        }
    }
}

/// Reference `Consensus` plug-in constructing [`NoopConsensusState`]. Ignores
/// the `mvcc`/`strict` parameters since the reference state keeps everything
/// in plain Rust fields rather than persisting through an overlay.
pub struct NoopConsensus;

impl<Id, M> Consensus<Id, M> for NoopConsensus
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
{
    type State = NoopConsensusState;

    fn new_state(
        &self,
        root: Option<ConsensusRoot>,
        mvcc: M,
        strict: bool,
    ) -> Result<Self::State, BackendError> {
        let _ = (mvcc, strict);
        let root = root.unwrap_or(ConsensusRoot(Hash::zero()));
        Ok(NoopConsensusState {
            dynasty: vec![root.0],
            root,
        })
    }
}
