use std::sync::Arc;

use super::{InMemoryMvccDb, InMemoryStorage, InMemoryTrie, NoopConsensus, NoopConsensusState};
use crate::account::AccountState;
use crate::config::EngineConfig;
use crate::consensus::Consensus;
use crate::error::Result;
use crate::mvcc::MvccDb;
use crate::states::States;
use crate::world_state::WorldState;

/// Convenience alias for a `WorldState` fully wired onto the crate's
/// in-memory reference backends. Matches the spec's `NewWorldState(consensus,
/// storage)` constructor for embedders that have no production `Storage`/
/// `Trie`/`MvccDb` implementation yet.
pub type InMemoryWorldState<Id> = WorldState<
    Id,
    InMemoryMvccDb<Id, InMemoryStorage>,
    InMemoryTrie<Id, InMemoryMvccDb<Id, InMemoryStorage>>,
    NoopConsensusState,
    NoopConsensus,
>;

/// Builds a `WorldState` over a fresh `InMemoryStorage`-backed changelog and
/// storage overlay, per §6.1's construction rule: the changelog is strict
/// about nothing except its own global-version check, the storage overlay
/// enforces `config.strict_storage_overlay`. Both overlays are left
/// `begin()`-ed, ready for `prepare`.
pub fn new_in_memory_world_state<Id>(
    storage: InMemoryStorage,
    config: EngineConfig,
) -> Result<InMemoryWorldState<Id>>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
{
    let mut changelog: InMemoryMvccDb<Id, InMemoryStorage> =
        InMemoryMvccDb::new(InMemoryStorage::new())
            .with_dependency_capacity_hint(config.dependency_set_capacity_hint);
    changelog.set_strict_global_version_check(config.changelog_strict_global_version_check);
    changelog.begin()?;

    let mut storage_overlay: InMemoryMvccDb<Id, InMemoryStorage> = InMemoryMvccDb::new(storage)
        .with_dependency_capacity_hint(config.dependency_set_capacity_hint);
    storage_overlay.set_strict_global_version_check(config.strict_storage_overlay);
    storage_overlay.begin()?;

    let acc_state = AccountState::new(InMemoryTrie::new(b"accounts".to_vec()));
    let txs_trie = InMemoryTrie::new(b"txs".to_vec());
    let events_trie = InMemoryTrie::new(b"events".to_vec());

    let consensus_plugin = Arc::new(NoopConsensus);
    let consensus_state =
        consensus_plugin.new_state(None, storage_overlay.snapshot(), config.strict_storage_overlay)?;

    let bundle = States::new(
        consensus_plugin,
        acc_state,
        txs_trie,
        events_trie,
        consensus_state,
        changelog,
        storage_overlay,
    );
    Ok(WorldState::new(bundle))
}
