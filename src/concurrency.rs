//! Per-record locking for the aggregate caches
//!
//! Every cached record (node, activity record, file-stats record) lives behind
//! its own read-write lock. The table lock is only held long enough to clone a
//! record handle, so an ancestor walk locks exactly one record at a time and
//! never holds two record locks simultaneously.

use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to a single locked record
pub type RecordHandle<T> = Arc<RwLock<T>>;

/// Table of per-node records with fine-grained locking
pub struct RecordMap<T> {
    /// Map from NodeId to per-record read-write lock
    records: RwLock<HashMap<NodeId, RecordHandle<T>>>,
}

impl<T> RecordMap<T> {
    /// Create an empty record table
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Get the handle for a record, if present
    pub fn get(&self, node_id: NodeId) -> Option<RecordHandle<T>> {
        self.records.read().get(&node_id).cloned()
    }

    /// Get the handle for a record, creating it when missing
    pub fn get_or_insert_with<F>(&self, node_id: NodeId, init: F) -> RecordHandle<T>
    where
        F: FnOnce() -> T,
    {
        // Fast path under the shared table lock
        {
            let map = self.records.read();
            if let Some(record) = map.get(&node_id) {
                return record.clone();
            }
        }

        // Double-check after acquiring the write lock (another thread might have created it)
        let mut map = self.records.write();
        map.entry(node_id)
            .or_insert_with(|| Arc::new(RwLock::new(init())))
            .clone()
    }

    /// Insert or replace a record
    pub fn insert(&self, node_id: NodeId, record: T) {
        self.records
            .write()
            .insert(node_id, Arc::new(RwLock::new(record)));
    }

    /// Remove a record, returning its handle
    pub fn remove(&self, node_id: NodeId) -> Option<RecordHandle<T>> {
        self.records.write().remove(&node_id)
    }

    /// Remove many records under a single table lock
    pub fn remove_all(&self, node_ids: &[NodeId]) {
        let mut map = self.records.write();
        for node_id in node_ids {
            map.remove(node_id);
        }
    }

    /// Replace the whole table
    pub fn replace_all(&self, records: HashMap<NodeId, T>) {
        let fresh = records
            .into_iter()
            .map(|(id, record)| (id, Arc::new(RwLock::new(record))))
            .collect();
        *self.records.write() = fresh;
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.records.read().contains_key(&node_id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every record id (unordered)
    pub fn ids(&self) -> Vec<NodeId> {
        self.records.read().keys().copied().collect()
    }

    /// Snapshot of every record handle (unordered)
    pub fn handles(&self) -> Vec<(NodeId, RecordHandle<T>)> {
        self.records
            .read()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Read a record under its shared lock
    pub fn read<R>(&self, node_id: NodeId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let record = self.get(node_id)?;
        let guard = record.read();
        Some(f(&guard))
    }

    /// Mutate a record under its exclusive lock
    pub fn write<R>(&self, node_id: NodeId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let record = self.get(node_id)?;
        let mut guard = record.write();
        Some(f(&mut guard))
    }
}

impl<T: Clone> RecordMap<T> {
    /// Clone a record out from under its shared lock
    pub fn snapshot(&self, node_id: NodeId) -> Option<T> {
        self.read(node_id, T::clone)
    }
}

impl<T> Default for RecordMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
