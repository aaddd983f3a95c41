//! In-memory storage backend.

use crate::{BatchOp, ColumnFamily, Storage, StorageError, StorageResult, WriteBatch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Map-backed storage with the same atomic batch semantics as [`crate::Database`].
///
/// Batches are applied to a copy of the touched tables and swapped in under
/// one write lock, so a failing batch leaves nothing behind.
pub struct MemoryStorage {
    tables: RwLock<HashMap<ColumnFamily, Table>>,
    /// Number of further batches to accept before failing. `usize::MAX` disables.
    fail_after: AtomicUsize,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            fail_after: AtomicUsize::new(usize::MAX),
        }
    }

    /// Refuse every batch after the next `accepted` ones.
    pub fn fail_batches_after(&self, accepted: usize) {
        self.fail_after.store(accepted, Ordering::SeqCst);
    }

    /// Stop injecting batch failures.
    pub fn clear_failures(&self) {
        self.fail_after.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of keys in a column family.
    pub fn len(&self, cf: ColumnFamily) -> usize {
        self.tables.read().get(&cf).map_or(0, |t| t.len())
    }

    /// Whether a column family holds no keys.
    pub fn is_empty(&self, cf: ColumnFamily) -> bool {
        self.len(cf) == 0
    }

    fn should_fail(&self) -> bool {
        let remaining = self.fail_after.load(Ordering::SeqCst);
        if remaining == usize::MAX {
            return false;
        }
        if remaining == 0 {
            return true;
        }
        self.fail_after.store(remaining - 1, Ordering::SeqCst);
        false
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tables.read().get(&cf).and_then(|t| t.get(key).cloned()))
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tables
            .write()
            .entry(cf)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        if let Some(table) = self.tables.write().get_mut(&cf) {
            table.remove(key);
        }
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.should_fail() {
            warn!(ops = batch.len(), "Injected batch failure");
            return Err(StorageError::BatchRefused {
                ops: batch.len(),
                reason: "injected write failure".into(),
            });
        }

        let mut tables = self.tables.write();
        let mut staged: HashMap<ColumnFamily, Table> = batch
            .families()
            .into_iter()
            .map(|cf| (cf, tables.get(&cf).cloned().unwrap_or_default()))
            .collect();
        for op in batch {
            match op {
                BatchOp::Put { cf, key, value } => {
                    staged.entry(cf).or_default().insert(key, value);
                }
                BatchOp::Delete { cf, key } => {
                    staged.entry(cf).or_default().remove(&key);
                }
            }
        }
        tables.extend(staged);
        Ok(())
    }

    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let snapshot: Vec<_> = self
            .tables
            .read()
            .get(&cf)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(Box::new(snapshot.into_iter()))
    }
}
