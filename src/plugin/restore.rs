use crate::protocol::FeatureId;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Original bytes of patched locations, keyed by `processId|featureId|anchorKey|address`.
///
/// The lock is held only for a single map operation, never across target process I/O.
#[derive(Debug, Default)]
pub struct RestoreStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl RestoreStore {
    pub fn key(pid: Pid, feature: FeatureId, anchor_key: &str, address: usize) -> String {
        format!("{pid}|{feature}|{anchor_key}|{address:#X}")
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.records().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records().contains_key(key)
    }

    /// Save original bytes unless a record already exists. Return true if saved.
    pub fn insert_if_absent(&self, key: String, original: Vec<u8>) -> bool {
        let mut records = self.records();
        if records.contains_key(&key) {
            return false;
        }
        records.insert(key, original);
        true
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.records().remove(key)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
