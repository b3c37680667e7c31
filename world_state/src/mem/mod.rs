//! Reference implementations of the engine's external collaborators
//! (`Storage`, `MvccDb`, `Trie`, `Consensus`). Not production backends —
//! process-local, in-memory, and intentionally simple — but fully working,
//! so this crate's own tests (and an embedder without a real backend yet)
//! can exercise the engine end-to-end.

mod consensus;
mod mvcc;
mod storage;
mod trie;
mod wiring;

pub use consensus::{NoopConsensus, NoopConsensusState};
pub use mvcc::InMemoryMvccDb;
pub use storage::InMemoryStorage;
pub use trie::InMemoryTrie;
pub use wiring::{new_in_memory_world_state, InMemoryWorldState};
