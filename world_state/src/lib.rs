//! Transactional world-state engine: the MVCC state layer a block executor
//! drives to prepare per-transaction working sets, detect read/write
//! conflicts between them, and serialize the non-conflicting ones back into
//! a single authoritative parent state.
//!
//! The public entry point is [`WorldState`]; everything else (the `States`
//! bundle, the account/trie/mvcc traits) exists to let `WorldState` do its
//! job and is exposed for embedders that need to plug in their own
//! `Storage`/`Trie`/`MvccDb`/`Consensus` backends.

pub mod account;
pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod mem;
pub mod mvcc;
pub mod rendezvous;
pub mod states;
pub mod storage;
pub mod trie;
pub mod types;
pub mod world_state;

pub use account::{Account, AccountKind, AccountState};
pub use config::EngineConfig;
pub use consensus::{Consensus, ConsensusRoot, ConsensusState};
pub use error::{ArithError, BackendError, EngineError, ProtocolError, Result};
pub use events::Event;
pub use mvcc::MvccDb;
pub use rendezvous::{AsyncRendezvous, InitError, Rendezvous};
pub use states::States;
pub use storage::Storage;
pub use trie::Trie;
pub use types::{Address, Hash, U128};
pub use world_state::WorldState;
