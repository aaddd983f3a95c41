//! # coingod-storage
//!
//! Storage layer for the coingod node.
//!
//! This crate provides the abstract key-value store the ledger core writes
//! through, plus two implementations:
//! - `Database`: RocksDB with one column family per data type
//! - `MemoryStorage`: an in-process map used by tests and tooling
//!
//! Every mutation of canonical chain state goes through a single
//! [`WriteBatch`], which both implementations apply atomically.
//!
//! ## Column Families
//!
//! - `Utxo`: Unspent outputs indexed by OutputId
//! - `Contracts`: Registered contracts indexed by contract hash
//! - `Blocks`: Encoded blocks indexed by block hash
//! - `BlockIndex`: Block status and arrival metadata indexed by block hash
//! - `MainChain`: Canonical chain (height -> block hash)
//! - `UndoData`: Spent outputs per block, used for rollback
//! - `Votes`: Finality votes indexed by target block hash
//! - `Metadata`: Chain tip and finality markers

mod batch;
mod database;
mod error;
mod memory;

pub use batch::{BatchOp, WriteBatch};
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;

/// Key-value store the ledger core persists through.
///
/// Implemented by [`Database`] and [`MemoryStorage`]; the chain only ever
/// mutates canonical state through [`Storage::write_batch`].
pub trait Storage: Send + Sync {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Deleting an absent key is not an error.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    ///
    /// Either every operation in the batch becomes visible or none does.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Snapshot of `cf` in ascending key order.
    fn iter(&self, cf: ColumnFamily) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;

    /// Values for `keys`, positionally.
    fn multi_get(&self, cf: ColumnFamily, keys: &[&[u8]]) -> StorageResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(cf, k)).collect()
    }
}
