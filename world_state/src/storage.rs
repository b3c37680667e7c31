use crate::error::BackendError;

/// Byte-addressable persistent key→value map (C1).
///
/// Internals are out of scope for this crate; this is the narrow capability
/// trait the `MvccDb` overlay is built on top of, mirroring the teacher's
/// convention of composing `Storage` out of small single-purpose traits
/// rather than one monolithic interface.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), BackendError>;

    /// Lexicographic iteration over every key carrying `prefix`.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError>;
}
