use serde::{Deserialize, Serialize};
use std::fmt;

pub const HASH_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 32;

/// Content identity of a trie node, transaction, or event key.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash([0u8; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Byte concatenation used to build event trie keys: `tx_hash ∥ i64_be(seq)`.
    pub fn concat_be_i64(&self, seq: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_SIZE + 8);
        out.extend_from_slice(&self.0);
        out.extend_from_slice(&seq.to_be_bytes());
        out
    }

    /// Domain-separated hash over an arbitrary byte slice, used by the in-memory trie
    /// to compute root hashes without a real Merkle-Patricia implementation.
    pub fn digest(domain: &[u8], data: &[u8]) -> Self {
        // FNV-1a, seeded with the domain tag. Not cryptographic; sufficient for the
        // reference trie's determinism requirement (root is a pure function of content).
        let mut h: u64 = 0xcbf29ce484222325;
        for b in domain.iter().chain(data.iter()) {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes[..8].copy_from_slice(&h.to_be_bytes());
        Hash(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Identity of an account.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub const fn zero() -> Self {
        Address([0u8; ADDRESS_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Deterministically derives a contract address from its owner and birth place,
    /// mirroring `CreateContractAccount`'s requirement of deterministic derivation.
    pub fn derive_contract(owner: &Address, birth_place: &Hash) -> Self {
        let digest = Hash::digest(b"contract-address", &{
            let mut buf = Vec::with_capacity(ADDRESS_SIZE + HASH_SIZE);
            buf.extend_from_slice(&owner.0);
            buf.extend_from_slice(birth_place.as_bytes());
            buf
        });
        Address(*digest.as_bytes())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Saturating-or-failing big-integer used for gas and balance accounting.
/// A thin newtype, not a full bignum library (out of scope per the spec).
#[derive(Debug, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Default, Serialize, Deserialize)]
pub struct U128(pub u128);

impl U128 {
    pub const ZERO: U128 = U128(0);

    pub fn checked_add(self, other: U128) -> Option<U128> {
        self.0.checked_add(other.0).map(U128)
    }

    pub fn saturating_add(self, other: U128) -> U128 {
        U128(self.0.saturating_add(other.0))
    }

    pub fn checked_sub(self, other: U128) -> Option<U128> {
        self.0.checked_sub(other.0).map(U128)
    }
}

impl From<u128> for U128 {
    fn from(v: u128) -> Self {
        U128(v)
    }
}

impl From<u64> for U128 {
    fn from(v: u64) -> Self {
        U128(v as u128)
    }
}

impl fmt::Display for U128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
