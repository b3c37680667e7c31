use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::mvcc::MvccDb;
use crate::trie::Trie;
use crate::types::{Address, Hash, U128};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum AccountKind {
    User,
    Contract,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: U128,
    pub nonce: u64,
    pub code_hash: Option<Hash>,
    pub storage_root: Option<Hash>,
    pub kind: AccountKind,
}

impl Account {
    fn fresh_user(address: Address) -> Self {
        Account {
            address,
            balance: U128::ZERO,
            nonce: 0,
            code_hash: None,
            storage_root: None,
            kind: AccountKind::User,
        }
    }

    fn fresh_contract(address: Address) -> Self {
        Account {
            address,
            balance: U128::ZERO,
            nonce: 0,
            code_hash: None,
            storage_root: None,
            kind: AccountKind::Contract,
        }
    }
}

/// Mapping from address to account object, backed by a `Trie` (C4). Adds
/// in-memory dirty bookkeeping on top of the trie, following the diff-against-
/// cache pattern the teacher uses for nonce/balance tracking: the cache holds
/// the live value, a side set tracks which addresses were touched since the
/// last flush boundary.
pub struct AccountState<Id, M, T>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
    T: Trie<Id, M>,
{
    trie: T,
    cache: HashMap<Address, Account>,
    dirty: BTreeSet<Address>,
    _marker: PhantomData<(Id, M)>,
}

impl<Id, M, T> AccountState<Id, M, T>
where
    Id: Eq + std::hash::Hash + Clone + Send + Sync,
    M: MvccDb<Id>,
    T: Trie<Id, M>,
{
    pub fn new(trie: T) -> Self {
        AccountState {
            trie,
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    fn load(&mut self, mvcc: &mut M, address: &Address) -> Option<Account> {
        if let Some(account) = self.cache.get(address) {
            return Some(account.clone());
        }
        let bytes = self.trie.get(mvcc, address.as_ref()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Returns the existing account or synthesizes a fresh `User` account
    /// with zero balance and zero nonce, marking it dirty either way (the
    /// caller is about to mutate it).
    pub fn get_or_create_user_account(&mut self, mvcc: &mut M, address: Address) -> &mut Account {
        if self.cache.get(&address).is_none() {
            let account = self
                .load(mvcc, &address)
                .unwrap_or_else(|| Account::fresh_user(address));
            self.cache.insert(address, account);
        }
        self.dirty.insert(address);
        self.cache.get_mut(&address).expect("just inserted")
    }

    pub fn get_contract_account(
        &mut self,
        mvcc: &mut M,
        address: Address,
    ) -> Result<Account, BackendError> {
        let account = self
            .load(mvcc, &address)
            .ok_or(BackendError::AccountNotFound)?;
        if account.kind != AccountKind::Contract {
            return Err(BackendError::AccountNotFound);
        }
        self.cache.insert(address, account.clone());
        Ok(account)
    }

    /// Synthesizes a contract account deterministically derived from
    /// `(owner, birth_place)`; fails if one already exists.
    pub fn create_contract_account(
        &mut self,
        mvcc: &mut M,
        owner: &Address,
        birth_place: &Hash,
    ) -> Result<Account, BackendError> {
        let address = Address::derive_contract(owner, birth_place);
        if self.load(mvcc, &address).is_some() {
            return Err(BackendError::AccountAlreadyExists);
        }
        let account = Account::fresh_contract(address);
        self.cache.insert(address, account.clone());
        self.dirty.insert(address);
        Ok(account)
    }

    /// Accounts mutated since the last `commit_accounts`/`rollback_accounts`,
    /// sorted by address for deterministic replay/commit ordering.
    pub fn dirty_accounts(&self) -> Vec<Account> {
        self.dirty
            .iter()
            .filter_map(|addr| self.cache.get(addr).cloned())
            .collect()
    }

    pub fn commit_accounts(&mut self, mvcc: &mut M) -> Result<(), BackendError> {
        for address in self.dirty.clone() {
            let account = self.cache.get(&address).expect("dirty implies cached");
            let bytes = serde_json::to_vec(account)?;
            self.trie.put(mvcc, address.as_ref(), &bytes)?;
        }
        self.dirty.clear();
        Ok(())
    }

    pub fn rollback_accounts(&mut self) {
        for address in &self.dirty {
            self.cache.remove(address);
        }
        self.dirty.clear();
        self.trie.rollback();
    }

    /// Checkpoints the underlying trie's key-set. `commit_accounts` flushes
    /// dirty accounts into the trie both at block-level commit and mid-block
    /// replay; only the former should make those keys survive a later
    /// `rollback_accounts`, so this is called separately from `States::commit`.
    pub fn checkpoint(&mut self) {
        self.trie.commit();
    }

    pub fn accounts_root(&self) -> Hash {
        self.trie.root_hash()
    }

    pub fn copy_to(&self, strict: bool) -> Self {
        AccountState {
            trie: self.trie.copy_to(strict),
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    /// Merges another bundle's dirty accounts into this one's cache, in
    /// address order, then flushes into the trie via `mvcc`.
    pub fn replay(
        &mut self,
        mvcc: &mut M,
        other: &AccountState<Id, M, T>,
    ) -> Result<(), BackendError> {
        for account in other.dirty_accounts() {
            self.cache.insert(account.address, account.clone());
            self.dirty.insert(account.address);
        }
        self.commit_accounts(mvcc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{InMemoryMvccDb, InMemoryStorage, InMemoryTrie};

    type TestAccountState =
        AccountState<u64, InMemoryMvccDb<u64, InMemoryStorage>, InMemoryTrie<u64, InMemoryMvccDb<u64, InMemoryStorage>>>;

    fn mvcc() -> InMemoryMvccDb<u64, InMemoryStorage> {
        let mut db = InMemoryMvccDb::new(InMemoryStorage::new());
        db.begin().unwrap();
        db
    }

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Address::new(bytes)
    }

    // P1: dirty accounts replay/commit in address order, independent of
    // touch order.
    #[test]
    fn dirty_accounts_are_sorted_by_address() {
        let mut state: TestAccountState = AccountState::new(InMemoryTrie::new(b"accounts".to_vec()));
        let mut mvcc = mvcc();

        state.get_or_create_user_account(&mut mvcc, addr(9));
        state.get_or_create_user_account(&mut mvcc, addr(1));
        state.get_or_create_user_account(&mut mvcc, addr(5));

        let addresses: Vec<Address> = state.dirty_accounts().iter().map(|a| a.address).collect();
        assert_eq!(addresses, vec![addr(1), addr(5), addr(9)]);
    }

    #[test]
    fn rollback_accounts_discards_cache_and_trie_keys() {
        let mut state: TestAccountState = AccountState::new(InMemoryTrie::new(b"accounts".to_vec()));
        let mut mvcc = mvcc();
        let root_before = state.accounts_root();

        state.get_or_create_user_account(&mut mvcc, addr(1)).balance = U128::from(10u64);
        state.rollback_accounts();

        assert_eq!(state.accounts_root(), root_before);
        assert!(state.dirty_accounts().is_empty());
    }

    #[test]
    fn checkpoint_survives_a_later_rollback() {
        let mut state: TestAccountState = AccountState::new(InMemoryTrie::new(b"accounts".to_vec()));
        let mut mvcc = mvcc();

        state.get_or_create_user_account(&mut mvcc, addr(1)).balance = U128::from(10u64);
        state.commit_accounts(&mut mvcc).unwrap();
        state.checkpoint();
        let root_after_checkpoint = state.accounts_root();

        state.get_or_create_user_account(&mut mvcc, addr(2)).balance = U128::from(20u64);
        state.commit_accounts(&mut mvcc).unwrap();
        state.rollback_accounts();

        assert_eq!(state.accounts_root(), root_after_checkpoint);
    }
}
