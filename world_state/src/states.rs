use std::collections::HashMap;
use std::sync::Arc;

use crate::account::AccountState;
use crate::consensus::{Consensus, ConsensusState};
use crate::error::{ArithError, BackendError, EngineError};
use crate::events::Event;
use crate::mvcc::MvccDb;
use crate::trie::Trie;
use crate::types::{Address, Hash, U128};

/// The transactional bundle (C5) — the heart of the engine. Owns the account
/// trie, the tx/events tries, the consensus state, and the two MVCC
/// overlays (`changelog`, `storage_overlay`) that back them.
///
/// `changelog` and `storage_overlay` are independent overlay *handles*, but
/// in this crate's reference wiring both ultimately share one underlying
/// `Storage`-backed `MvccDb` instance per overlay role: `storage_overlay` is
/// the single physical overlay shared by `acc_state`, `txs_trie`, and
/// `events_trie` (each namespaced by its own key prefix), matching the
/// spec's singular "storage_overlay" rather than one overlay per sub-state.
pub struct States<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    consensus_plugin: Arc<Cp>,
    acc_state: AccountState<Id, M, T>,
    txs_trie: T,
    events_trie: T,
    consensus_state: Cs,
    /// `consensus_state` as of the last `commit` (or `prepare`/`clone_bundle`
    /// baseline). `ConsensusState` is a plain `Clone` value rather than an
    /// overlay-backed one, so unlike the tries it has no `rollback` of its
    /// own — `rollback`/`reset` here just restore this snapshot.
    consensus_checkpoint: Cs,
    changelog: M,
    storage_overlay: M,
    txid: Option<Id>,
    gas: HashMap<Address, U128>,
    events_buffer: HashMap<Hash, Vec<Event>>,
}

impl<Id, M, T, Cs, Cp> States<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    pub fn new(
        consensus_plugin: Arc<Cp>,
        acc_state: AccountState<Id, M, T>,
        txs_trie: T,
        events_trie: T,
        consensus_state: Cs,
        changelog: M,
        storage_overlay: M,
    ) -> Self {
        States {
            consensus_plugin,
            acc_state,
            txs_trie,
            events_trie,
            consensus_checkpoint: consensus_state.clone(),
            consensus_state,
            changelog,
            storage_overlay,
            txid: None,
            gas: HashMap::new(),
            events_buffer: HashMap::new(),
        }
    }

    pub fn txid(&self) -> Option<&Id> {
        self.txid.as_ref()
    }

    pub fn consensus_plugin(&self) -> &Arc<Cp> {
        &self.consensus_plugin
    }

    pub fn accounts_root(&self) -> Hash {
        self.acc_state.accounts_root()
    }

    pub fn txs_root(&self) -> Hash {
        self.txs_trie.root_hash()
    }

    pub fn events_root(&self) -> Hash {
        self.events_trie.root_hash()
    }

    pub fn consensus_root(&self) -> crate::consensus::ConsensusRoot {
        self.consensus_state.root_hash()
    }

    pub fn get_or_create_user_account(&mut self, address: Address) -> &mut crate::account::Account {
        self.acc_state
            .get_or_create_user_account(&mut self.storage_overlay, address)
    }

    pub fn get_contract_account(
        &mut self,
        address: Address,
    ) -> Result<crate::account::Account, BackendError> {
        self.acc_state
            .get_contract_account(&mut self.storage_overlay, address)
    }

    pub fn create_contract_account(
        &mut self,
        owner: &Address,
        birth_place: &Hash,
    ) -> Result<crate::account::Account, BackendError> {
        self.acc_state
            .create_contract_account(&mut self.storage_overlay, owner, birth_place)
    }

    /// `GetTx(h)`: reads from the tx trie, then registers the read in the
    /// changelog (§4.3 mutation protocol).
    pub fn get_tx(&mut self, hash: &Hash) -> Result<Vec<u8>, BackendError> {
        let bytes = self.txs_trie.get(&mut self.storage_overlay, hash.as_ref())?;
        self.changelog.get(hash.as_ref())?;
        Ok(bytes)
    }

    /// `PutTx(h, b)`: writes to the tx trie, then mirrors the write into the
    /// changelog.
    pub fn put_tx(&mut self, hash: &Hash, bytes: &[u8]) -> Result<(), BackendError> {
        self.txs_trie
            .put(&mut self.storage_overlay, hash.as_ref(), bytes)?;
        self.changelog.put(hash.as_ref(), bytes)?;
        Ok(())
    }

    /// Appends `event` to the in-memory buffer for `tx_hash` and mirrors it
    /// into the changelog at `tx_hash ∥ i64_be(seq)`. `seq` is the per-
    /// transaction ordinal of the event (Open Question O-1, resolved: see
    /// SPEC_FULL.md §9).
    pub fn record_event(&mut self, tx_hash: Hash, event: Event) -> Result<(), BackendError> {
        let buf = self.events_buffer.entry(tx_hash).or_default();
        buf.push(event.clone());
        let seq = buf.len() as i64;
        let key = tx_hash.concat_be_i64(seq);
        let json = serde_json::to_vec(&event)?;
        self.changelog.put(&key, &json)?;
        Ok(())
    }

    /// Mid-tx read of events recorded so far by this bundle. Distinct from
    /// `fetch_events`, which reads only the trie (§9 "Event buffer vs events
    /// trie").
    pub fn fetch_cached_events(&self, tx_hash: &Hash) -> Vec<Event> {
        self.events_buffer.get(tx_hash).cloned().unwrap_or_default()
    }

    /// Reads committed events for `tx_hash` from the events trie only.
    pub fn fetch_events(&mut self, tx_hash: &Hash) -> Result<Vec<Event>, BackendError> {
        let mut out = Vec::new();
        let mut seq = 1i64;
        loop {
            let key = tx_hash.concat_be_i64(seq);
            match self.events_trie.get(&mut self.storage_overlay, &key) {
                Ok(bytes) => {
                    out.push(serde_json::from_slice(&bytes)?);
                    seq += 1;
                }
                Err(BackendError::KeyNotFound) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// `RecordGas(from, g)` — additive.
    pub fn record_gas(&mut self, from: Address, amount: U128) -> Result<(), ArithError> {
        let entry = self.gas.entry(from).or_insert(U128::ZERO);
        *entry = entry.checked_add(amount).ok_or_else(|| {
            if log::log_enabled!(log::Level::Error) {
                log::error!("gas ledger overflow recording gas for {from}");
            }
            ArithError::GasOverflow
        })?;
        Ok(())
    }

    /// `GetGas()` — a drain: the ledger is empty after this call (P6).
    pub fn get_gas(&mut self) -> HashMap<Address, U128> {
        std::mem::take(&mut self.gas)
    }

    fn record_accounts(&mut self) -> Result<(), BackendError> {
        for account in self.acc_state.dirty_accounts() {
            let bytes = serde_json::to_vec(&account)?;
            self.changelog.put(account.address.as_ref(), &bytes)?;
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<(), EngineError> {
        self.changelog.begin().map_err(EngineError::from)?;
        if let Err(err) = self.storage_overlay.begin() {
            // The second overlay's begin failed; undo the first rather than
            // leaving a half-open bundle (§7 propagation policy).
            let _ = self.changelog.rollback();
            if log::log_enabled!(log::Level::Error) {
                log::error!("storage_overlay.begin() failed, changelog rolled back: {err}");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// The block-level commit. Discards the changelog via `rollback` — it is
    /// ephemeral scratch for concurrency detection, never authoritative data
    /// (Open Question O-3, kept as specified).
    pub fn commit(&mut self) -> Result<(), EngineError> {
        self.changelog.rollback()?;
        self.storage_overlay.commit()?;
        self.acc_state.commit_accounts(&mut self.storage_overlay)?;
        self.acc_state.checkpoint();
        self.txs_trie.commit();
        self.events_trie.commit();
        self.consensus_checkpoint = self.consensus_state.clone();
        self.events_buffer.clear();
        self.gas.clear();
        Ok(())
    }

    /// Reverts to the state as of the last `commit`: the two overlays, the
    /// account cache, and the tx/event tries' key-sets all unwind together,
    /// so a mid-block `Replay` (which writes into `txs_trie`/`events_trie`/
    /// `acc_state`'s trie ahead of the eventual block-level commit) leaves no
    /// trace once rolled back (L1).
    pub fn rollback(&mut self) -> Result<(), EngineError> {
        self.changelog.rollback()?;
        self.storage_overlay.rollback()?;
        self.events_buffer.clear();
        self.gas.clear();
        self.acc_state.rollback_accounts();
        self.txs_trie.rollback();
        self.events_trie.rollback();
        self.consensus_state = self.consensus_checkpoint.clone();
        Ok(())
    }

    /// Creates a child bundle scoped to `txid`: fresh changelog/storage
    /// overlay prepared from this bundle's, and every sub-state `copy_to`'d
    /// in strict mode.
    pub fn prepare(&self, txid: Id) -> Result<Self, EngineError> {
        let child_changelog = self.changelog.prepare(txid.clone())?;
        let child_storage_overlay = self.storage_overlay.prepare(txid.clone())?;
        let consensus_state = self.consensus_state.copy_to(true);
        Ok(States {
            consensus_plugin: Arc::clone(&self.consensus_plugin),
            acc_state: self.acc_state.copy_to(true),
            txs_trie: self.txs_trie.copy_to(true),
            events_trie: self.events_trie.copy_to(true),
            consensus_checkpoint: consensus_state.clone(),
            consensus_state,
            changelog: child_changelog,
            storage_overlay: child_storage_overlay,
            txid: Some(txid),
            gas: HashMap::new(),
            events_buffer: HashMap::new(),
        })
    }

    /// `CheckAndUpdate(txid) -> [TxId]`. Records dirty accounts into the
    /// changelog, asks it for the dependency set, and publishes the storage
    /// overlay's writes only when that set is empty — a conflicting overlay
    /// is rolled back rather than published, so the caller never has to
    /// clean up a partially-applied conflicting transaction at this layer.
    pub fn check_and_update(&mut self) -> Result<Vec<Id>, EngineError> {
        self.record_accounts()?;
        let deps = self.changelog.check_and_update()?;
        if deps.is_empty() {
            self.storage_overlay.commit()?;
        } else {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "dropping storage_overlay writes for a transaction with {} conflict(s)",
                    deps.len()
                );
            }
            self.storage_overlay.rollback()?;
        }
        Ok(deps)
    }

    /// Returns this (child) bundle to the state it was in right after
    /// `prepare`, discarding any mutation made since — including whatever
    /// `txs_trie`/`events_trie`/`acc_state` picked up from their own
    /// `copy_to` baseline.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.changelog.reset()?;
        self.storage_overlay.reset()?;
        self.events_buffer.clear();
        self.gas.clear();
        self.acc_state.rollback_accounts();
        self.txs_trie.rollback();
        self.events_trie.rollback();
        self.consensus_state = self.consensus_checkpoint.clone();
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), EngineError> {
        self.changelog.close()?;
        self.storage_overlay.close()?;
        Ok(())
    }

    /// Merges a successfully validated child's writes back into `self`
    /// (§4.3 Replay). The child's `events_buffer` and `gas` ledger are
    /// drained as part of the merge.
    pub fn replay(&mut self, done: &mut States<Id, M, T, Cs, Cp>) -> Result<(), EngineError> {
        self.acc_state
            .replay(&mut self.storage_overlay, &done.acc_state)?;
        self.replay_events(done)?;
        self.txs_trie.replay(
            &mut self.storage_overlay,
            &done.txs_trie,
            &mut done.storage_overlay,
        )?;
        self.consensus_state.replay(&done.consensus_state)?;
        for (from, gas) in done.gas.drain() {
            let entry = self.gas.entry(from).or_insert(U128::ZERO);
            *entry = entry.checked_add(gas).ok_or_else(|| {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("gas ledger overflow replaying gas for {from}");
                }
                ArithError::GasOverflow
            })?;
        }
        Ok(())
    }

    /// Writes the child's buffered events into `self`'s events trie at
    /// `tx_hash ∥ i64_be(seq)`, `seq = 1..n`, then clears the child's buffer.
    fn replay_events(&mut self, done: &mut States<Id, M, T, Cs, Cp>) -> Result<(), EngineError> {
        for (tx_hash, events) in done.events_buffer.drain() {
            for (idx, event) in events.iter().enumerate() {
                let seq = (idx + 1) as i64;
                let key = tx_hash.concat_be_i64(seq);
                let json = serde_json::to_vec(event)?;
                self.events_trie
                    .put(&mut self.storage_overlay, &key, &json)?;
            }
        }
        Ok(())
    }

    /// Deep-copies this bundle onto a fresh changelog/storage overlay pair
    /// (via `MvccDb::snapshot`, not `prepare` — there is no `txid` to scope
    /// a clone to) and every sub-state in non-strict mode. The clone is
    /// independent: mutating it never affects `self` (L2).
    pub fn clone_bundle(&self) -> Self {
        let consensus_state = self.consensus_state.copy_to(false);
        States {
            consensus_plugin: Arc::clone(&self.consensus_plugin),
            acc_state: self.acc_state.copy_to(false),
            txs_trie: self.txs_trie.copy_to(false),
            events_trie: self.events_trie.copy_to(false),
            consensus_checkpoint: consensus_state.clone(),
            consensus_state,
            changelog: self.changelog.snapshot(),
            storage_overlay: self.storage_overlay.snapshot(),
            txid: None,
            gas: HashMap::new(),
            events_buffer: HashMap::new(),
        }
    }

    /// Advances the consensus state by `elapsed_seconds`.
    pub fn advance_consensus(&mut self, elapsed_seconds: u64) {
        self.consensus_state = self.consensus_state.next(
            elapsed_seconds,
            self.accounts_root(),
            self.txs_root(),
            self.events_root(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{InMemoryMvccDb, InMemoryStorage, InMemoryTrie, NoopConsensus, NoopConsensusState};

    type TestStates = States<
        u64,
        InMemoryMvccDb<u64, InMemoryStorage>,
        InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>>,
        NoopConsensusState,
        NoopConsensus,
    >;

    fn fresh() -> TestStates {
        let mut changelog = InMemoryMvccDb::new(InMemoryStorage::new());
        changelog.begin().unwrap();
        let mut storage_overlay = InMemoryMvccDb::new(InMemoryStorage::new());
        storage_overlay.begin().unwrap();

        let acc_state = AccountState::new(InMemoryTrie::new(b"accounts".to_vec()));
        let txs_trie = InMemoryTrie::new(b"txs".to_vec());
        let events_trie = InMemoryTrie::new(b"events".to_vec());

        let consensus_plugin = Arc::new(NoopConsensus);
        let consensus_state = consensus_plugin
            .new_state(None, storage_overlay.snapshot(), true)
            .unwrap();

        States::new(
            consensus_plugin,
            acc_state,
            txs_trie,
            events_trie,
            consensus_state,
            changelog,
            storage_overlay,
        )
    }

    fn hash(byte: u8) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Hash::new(bytes)
    }

    // O-1: the changelog key `record_event` writes for an event must match the
    // events-trie key `replay_events` writes for that same event — both derive
    // `seq` from the per-transaction ordinal, never the cross-tx buffer length
    // (the source's drift between the two call sites).
    #[test]
    fn event_sequence_is_per_tx_ordinal() {
        let mut parent = fresh();
        let mut child = parent.prepare(1).unwrap();

        let h = hash(7);
        child.record_event(h, Event::new("a", serde_json::json!({}))).unwrap();
        child.record_event(h, Event::new("b", serde_json::json!({}))).unwrap();

        assert!(child
            .changelog
            .get(&h.concat_be_i64(1))
            .unwrap()
            .is_some());
        assert!(child
            .changelog
            .get(&h.concat_be_i64(2))
            .unwrap()
            .is_some());

        let deps = child.check_and_update().unwrap();
        assert!(deps.is_empty());
        parent.replay(&mut child).unwrap();

        let events = parent.fetch_events(&h).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic, "a");
        assert_eq!(events[1].topic, "b");
    }
}
