use std::collections::HashMap;

use crate::error::BackendError;
use crate::storage::Storage;

/// Reference `Storage` implementation (C1): a process-local `HashMap`.
/// Grounded in the teacher pack's `InMemoryStorage` pattern (a bare
/// `HashMap`-backed store behind a narrow trait, no trait-object
/// indirection) rather than a durable backend, which is explicitly out of
/// scope for this crate.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    data: HashMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            data: HashMap::new(),
        }
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), BackendError> {
        self.data.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        Ok(self
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
