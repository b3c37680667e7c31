use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, warn};

use crate::account::Account;
use crate::consensus::{Consensus, ConsensusRoot, ConsensusState};
use crate::error::{EngineError, ProtocolError, Result};
use crate::events::Event;
use crate::mvcc::MvccDb;
use crate::states::States;
use crate::trie::Trie;
use crate::types::{Address, Hash, U128};

/// Child-flavored `States` handle returned by [`WorldState::prepare`] (C6).
///
/// Owned exclusively by the parent's `live_children` registry until
/// [`WorldState::close`] removes it; never handed out by value, since a
/// caller holding one outside the registry could keep mutating it after
/// the parent considers it terminated.
struct TxWorldState<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    bundle: States<Id, M, T, Cs, Cp>,
    closed: bool,
}

impl<Id, M, T, Cs, Cp> Drop for TxWorldState<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    /// Last-resort safety net: an overlay handle should always be closed
    /// explicitly (`Close`, or `WorldState::dispose` at block boundary).
    /// Relying on this `Drop` alone to close it is itself a caller bug, so
    /// it only logs rather than trying to recover the overlay's state.
    fn drop(&mut self) {
        if !self.closed && log_enabled_warn() {
            warn!("TxWorldState dropped without a matching Close; overlay handles may leak");
        }
    }
}

fn log_enabled_warn() -> bool {
    log::log_enabled!(log::Level::Warn)
}

/// Thin public façade over [`States`] (C5): tracks live child transactions
/// by `txid`, forbids double-`prepare`, and wires `check_and_update` into a
/// replay of the child into the parent.
///
/// `live_children` is the one explicitly concurrent structure in the
/// engine (§5): a `DashMap` gives per-shard locking and an atomic
/// check-and-insert via its `Entry` API, so two threads calling `prepare`
/// with the same `txid` can never both succeed.
pub struct WorldState<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    bundle: States<Id, M, T, Cs, Cp>,
    live_children: DashMap<Id, TxWorldState<Id, M, T, Cs, Cp>>,
}

impl<Id, M, T, Cs, Cp> WorldState<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    /// Wraps an already-assembled `States` bundle (built via `States::new`,
    /// typically through one of the `mem::new_in_memory_world_state`-style
    /// helpers for a concrete backend). No txid, no live children.
    pub fn new(bundle: States<Id, M, T, Cs, Cp>) -> Self {
        WorldState {
            bundle,
            live_children: DashMap::new(),
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        self.bundle.begin()
    }

    pub fn accounts_root(&self) -> Hash {
        self.bundle.accounts_root()
    }

    pub fn txs_root(&self) -> Hash {
        self.bundle.txs_root()
    }

    pub fn events_root(&self) -> Hash {
        self.bundle.events_root()
    }

    pub fn consensus_root(&self) -> ConsensusRoot {
        self.bundle.consensus_root()
    }

    /// Alias matching the spec's named lifecycle accessor; identical to
    /// [`Self::accounts_root`].
    pub fn load_accounts_root(&self) -> Hash {
        self.accounts_root()
    }

    pub fn load_txs_root(&self) -> Hash {
        self.txs_root()
    }

    pub fn load_events_root(&self) -> Hash {
        self.events_root()
    }

    pub fn load_consensus_root(&self) -> ConsensusRoot {
        self.consensus_root()
    }

    pub fn get_or_create_user_account(&mut self, address: Address) -> &mut Account {
        self.bundle.get_or_create_user_account(address)
    }

    pub fn put_tx(&mut self, hash: &Hash, bytes: &[u8]) -> Result<()> {
        Ok(self.bundle.put_tx(hash, bytes)?)
    }

    pub fn get_tx(&mut self, hash: &Hash) -> Result<Vec<u8>> {
        Ok(self.bundle.get_tx(hash)?)
    }

    /// Reads committed events for `tx_hash`. Only ever reads the trie (§9
    /// "Event buffer vs events trie"), never the in-memory buffer.
    pub fn fetch_events(&mut self, tx_hash: &Hash) -> Result<Vec<Event>> {
        Ok(self.bundle.fetch_events(tx_hash)?)
    }

    pub fn record_gas(&mut self, from: Address, amount: U128) -> Result<()> {
        Ok(self.bundle.record_gas(from, amount)?)
    }

    /// Drains the gas ledger (P6): a second call in a row returns empty.
    pub fn get_gas(&mut self) -> HashMap<Address, U128> {
        self.bundle.get_gas()
    }

    /// Rejects if `txid` is already present in `live_children`
    /// (`CannotPrepareTxStateTwice`, invariant 1); otherwise delegates to
    /// the parent bundle's `prepare` and stores the child. The check and
    /// the insert happen under one `DashMap::entry` call, so this is
    /// atomic across concurrent callers (§5).
    pub fn prepare(&self, txid: Id) -> Result<()> {
        match self.live_children.entry(txid.clone()) {
            Entry::Occupied(_) => {
                if log_enabled_warn() {
                    warn!("Prepare called twice for the same TxId");
                }
                Err(ProtocolError::CannotPrepareTxStateTwice.into())
            }
            Entry::Vacant(vacant) => {
                let child_bundle = self.bundle.prepare(txid)?;
                vacant.insert(TxWorldState {
                    bundle: child_bundle,
                    closed: false,
                });
                Ok(())
            }
        }
    }

    /// Runs `f` against the live child's `States` bundle (shared access).
    /// `CannotUpdateTxStateBeforePrepare` if `txid` has no live child
    /// (never prepared, already closed, or unknown).
    pub fn with_tx_state<R>(
        &self,
        txid: &Id,
        f: impl FnOnce(&States<Id, M, T, Cs, Cp>) -> R,
    ) -> Result<R> {
        let entry = self
            .live_children
            .get(txid)
            .ok_or_else(not_prepared_error)?;
        Ok(f(&entry.bundle))
    }

    /// Runs `f` against the live child's `States` bundle (exclusive
    /// access) — this is how a caller actually executes a transaction:
    /// `world_state.with_tx_state_mut(&txid, |tx| tx.put_tx(..))`.
    pub fn with_tx_state_mut<R>(
        &self,
        txid: &Id,
        f: impl FnOnce(&mut States<Id, M, T, Cs, Cp>) -> R,
    ) -> Result<R> {
        let mut entry = self
            .live_children
            .get_mut(txid)
            .ok_or_else(not_prepared_error)?;
        Ok(f(&mut entry.bundle))
    }

    /// Validates the child's changes against every other in-flight
    /// overlay, and — if the dependency set is empty — replays the
    /// child's writes into the parent. The dependency list is returned to
    /// the caller whether empty or not; a non-empty list is not an error
    /// (§7 category 4), it is the scheduler's signal to re-run or drop the
    /// transaction.
    pub fn check_and_update(&mut self, txid: &Id) -> Result<Vec<Id>> {
        let mut entry = self
            .live_children
            .get_mut(txid)
            .ok_or_else(not_prepared_error)?;
        let deps = entry.bundle.check_and_update()?;
        if deps.is_empty() {
            self.bundle.replay(&mut entry.bundle)?;
        } else if log::log_enabled!(log::Level::Debug) {
            debug!(
                "check_and_update found {} conflicting transaction(s)",
                deps.len()
            );
        }
        Ok(deps)
    }

    /// Returns the child to `OPEN`, discarding its in-flight changelog and
    /// storage-overlay writes without forgetting the child itself. Legal
    /// from both `OPEN` and `VALIDATED` (§4.4 state machine).
    pub fn reset(&self, txid: &Id) -> Result<()> {
        let mut entry = self
            .live_children
            .get_mut(txid)
            .ok_or_else(not_prepared_error)?;
        entry.bundle.reset()?;
        Ok(())
    }

    /// Terminates the child: closes its overlay handles and removes it
    /// from `live_children`. Idempotent against double-close only in the
    /// sense that the second call raises the same
    /// `CannotUpdateTxStateBeforePrepare` a never-prepared id would.
    pub fn close(&self, txid: &Id) -> Result<()> {
        let (_, mut child) = self
            .live_children
            .remove(txid)
            .ok_or_else(not_prepared_error)?;
        child.bundle.close()?;
        child.closed = true;
        Ok(())
    }

    /// Block-level commit: commits the bundle, then disposes every
    /// remaining live child (closing their overlays first, so no handle
    /// outlives this `WorldState`).
    pub fn commit(&mut self) -> Result<()> {
        let result = self.bundle.commit();
        if let Err(err) = &result {
            log_backend_failure(err);
        }
        self.dispose();
        result
    }

    pub fn rollback(&mut self) -> Result<()> {
        let result = self.bundle.rollback();
        if let Err(err) = &result {
            log_backend_failure(err);
        }
        self.dispose();
        result
    }

    /// Clears `live_children` atomically, closing each remaining child's
    /// overlays first so no handle outlives this bundle.
    fn dispose(&mut self) {
        for mut entry in self.live_children.iter_mut() {
            let _ = entry.bundle.close();
            entry.closed = true;
        }
        self.live_children.clear();
    }

    pub fn live_child_count(&self) -> usize {
        self.live_children.len()
    }
}

impl<Id, M, T, Cs, Cp> Clone for WorldState<Id, M, T, Cs, Cp>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id, Child = M>,
    T: Trie<Id, M>,
    Cs: ConsensusState,
    Cp: Consensus<Id, M, State = Cs>,
{
    /// Deep-copies the bundle onto a fresh changelog/storage overlay pair
    /// (via `MvccDb::snapshot`) and every sub-state in non-strict mode.
    /// No live children are carried over (§4.4).
    fn clone(&self) -> Self {
        WorldState {
            bundle: self.bundle.clone_bundle(),
            live_children: DashMap::new(),
        }
    }
}

fn not_prepared_error() -> EngineError {
    if log_enabled_warn() {
        warn!("operation attempted on a TxId with no live prepared state");
    }
    ProtocolError::CannotUpdateTxStateBeforePrepare.into()
}

fn log_backend_failure(err: &EngineError) {
    if log::log_enabled!(log::Level::Error) {
        error!("world state commit/rollback failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::EngineConfig;
    use crate::error::{EngineError, ProtocolError};
    use crate::events::Event;
    use crate::mem::{new_in_memory_world_state, InMemoryStorage, InMemoryWorldState};
    use crate::types::{Address, Hash, U128};

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Address::new(bytes)
    }

    fn hash(byte: u8) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Hash::new(bytes)
    }

    fn fresh_world() -> InMemoryWorldState<u64> {
        new_in_memory_world_state(InMemoryStorage::new(), EngineConfig::default())
            .expect("in-memory backends never fail to construct")
    }

    // P4
    #[test]
    fn prepare_twice_is_rejected() {
        let world = fresh_world();
        world.prepare(1).unwrap();
        let err = world.prepare(1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::CannotPrepareTxStateTwice)
        ));
    }

    // P5
    #[test]
    fn op_on_a_txid_with_no_live_child_is_rejected() {
        let world = fresh_world();
        let err = world.reset(&1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::CannotUpdateTxStateBeforePrepare)
        ));

        world.prepare(2).unwrap();
        world.close(&2).unwrap();
        let err = world.reset(&2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::CannotUpdateTxStateBeforePrepare)
        ));
    }

    // P6
    #[test]
    fn get_gas_drains_the_ledger() {
        let mut world = fresh_world();
        let a = addr(1);

        world.prepare(1).unwrap();
        world
            .with_tx_state_mut(&1, |tx| tx.record_gas(a, U128::from(10u64)).unwrap())
            .unwrap();
        world.check_and_update(&1).unwrap();

        world.prepare(2).unwrap();
        world
            .with_tx_state_mut(&2, |tx| tx.record_gas(a, U128::from(25u64)).unwrap())
            .unwrap();
        world.check_and_update(&2).unwrap();

        let gas = world.get_gas();
        assert_eq!(gas.get(&a), Some(&U128::from(35u64)));
        assert!(world.get_gas().is_empty());
    }

    // P7 / S3
    #[test]
    fn events_round_trip_in_recorded_order() {
        let mut world = fresh_world();
        let h = hash(1);

        world.prepare(1).unwrap();
        world
            .with_tx_state_mut(&1, |tx| {
                tx.record_event(h, Event::new("topic-a", json!({ "n": 1 }))).unwrap();
                tx.record_event(h, Event::new("topic-b", json!({ "n": 2 }))).unwrap();
                tx.record_event(h, Event::new("topic-c", json!({ "n": 3 }))).unwrap();
            })
            .unwrap();

        let deps = world.check_and_update(&1).unwrap();
        assert!(deps.is_empty());

        let events = world.fetch_events(&h).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].topic, "topic-a");
        assert_eq!(events[1].topic, "topic-b");
        assert_eq!(events[2].topic, "topic-c");
    }

    // S1: disjoint-key transactions both land.
    #[test]
    fn independent_credits_both_apply() {
        let mut world = fresh_world();
        let a = addr(1);
        let b = addr(2);

        world.prepare(1).unwrap();
        world
            .with_tx_state_mut(&1, |tx| {
                let acct = tx.get_or_create_user_account(a);
                acct.balance = acct.balance.checked_add(U128::from(10u64)).unwrap();
            })
            .unwrap();
        assert!(world.check_and_update(&1).unwrap().is_empty());

        world.prepare(2).unwrap();
        world
            .with_tx_state_mut(&2, |tx| {
                let acct = tx.get_or_create_user_account(b);
                acct.balance = acct.balance.checked_add(U128::from(20u64)).unwrap();
            })
            .unwrap();
        assert!(world.check_and_update(&2).unwrap().is_empty());

        assert_eq!(world.get_or_create_user_account(a).balance, U128::from(10u64));
        assert_eq!(world.get_or_create_user_account(b).balance, U128::from(20u64));
    }

    // S2 / P3: common-key write/write conflict.
    #[test]
    fn conflicting_credits_reject_the_second_transaction() {
        let mut world = fresh_world();
        let a = addr(1);

        world.prepare(10).unwrap();
        world
            .with_tx_state_mut(&10, |tx| {
                let acct = tx.get_or_create_user_account(a);
                acct.balance = acct.balance.checked_add(U128::from(5u64)).unwrap();
            })
            .unwrap();

        world.prepare(20).unwrap();
        world
            .with_tx_state_mut(&20, |tx| {
                let acct = tx.get_or_create_user_account(a);
                acct.balance = acct.balance.checked_add(U128::from(5u64)).unwrap();
            })
            .unwrap();

        assert!(world.check_and_update(&10).unwrap().is_empty());
        assert_eq!(world.check_and_update(&20).unwrap(), vec![10]);

        assert_eq!(world.get_or_create_user_account(a).balance, U128::from(5u64));
    }

    // L3
    #[test]
    fn replaying_an_empty_child_is_a_noop() {
        let mut world = fresh_world();
        let accounts_before = world.accounts_root();
        let txs_before = world.txs_root();
        let events_before = world.events_root();

        world.prepare(1).unwrap();
        let deps = world.check_and_update(&1).unwrap();

        assert!(deps.is_empty());
        assert_eq!(world.accounts_root(), accounts_before);
        assert_eq!(world.txs_root(), txs_before);
        assert_eq!(world.events_root(), events_before);
    }

    // L1 / S5: a replayed transaction is fully unwound by a block rollback.
    #[test]
    fn rollback_after_replay_restores_pre_begin_roots() {
        let mut world = fresh_world();
        let accounts_before = world.accounts_root();
        let txs_before = world.txs_root();

        world.put_tx(&hash(9), b"raw-tx-bytes").unwrap();

        world.prepare(1).unwrap();
        world
            .with_tx_state_mut(&1, |tx| {
                tx.get_or_create_user_account(addr(3)).balance = U128::from(42u64);
            })
            .unwrap();
        assert!(world.check_and_update(&1).unwrap().is_empty());
        world.close(&1).unwrap();

        world.rollback().unwrap();

        assert_eq!(world.accounts_root(), accounts_before);
        assert_eq!(world.txs_root(), txs_before);
        assert_eq!(world.live_child_count(), 0);
    }

    // S6: a successfully validated child's consensus advance lands in the parent.
    #[test]
    fn consensus_state_replays_into_parent() {
        let mut world = fresh_world();

        world.prepare(1).unwrap();
        world
            .with_tx_state_mut(&1, |tx| tx.advance_consensus(1))
            .unwrap();
        let expected = world.with_tx_state(&1, |tx| tx.consensus_root()).unwrap();

        assert!(world.check_and_update(&1).unwrap().is_empty());
        assert_eq!(world.consensus_root(), expected);
    }

    // L2: a clone is independent of its parent.
    #[test]
    fn clone_is_independent() {
        let mut world = fresh_world();
        world.get_or_create_user_account(addr(1)).balance = U128::from(7u64);
        world.commit().unwrap();

        let mut clone = world.clone();
        assert_eq!(clone.accounts_root(), world.accounts_root());

        clone.get_or_create_user_account(addr(1)).balance = U128::from(99u64);

        assert_eq!(world.get_or_create_user_account(addr(1)).balance, U128::from(7u64));
        assert_eq!(clone.get_or_create_user_account(addr(1)).balance, U128::from(99u64));
    }

    #[test]
    fn reset_discards_mutations_since_prepare() {
        let world = fresh_world();
        let a = addr(4);

        world.prepare(1).unwrap();
        world
            .with_tx_state_mut(&1, |tx| {
                tx.get_or_create_user_account(a).balance = U128::from(77u64);
            })
            .unwrap();
        world.reset(&1).unwrap();

        let balance_after_reset = world
            .with_tx_state_mut(&1, |tx| tx.get_or_create_user_account(a).balance)
            .unwrap();
        assert_eq!(balance_after_reset, U128::ZERO);
    }
}
