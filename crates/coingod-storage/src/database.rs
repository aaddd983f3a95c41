//! RocksDB-backed ledger store.

use crate::{BatchOp, Storage, StorageError, StorageResult, WriteBatch};
use rocksdb::{BlockBasedOptions, ColumnFamilyDescriptor, DBCompressionType, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Column families of the ledger store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnFamily {
    /// OutputId -> encoded `UtxoEntry`.
    Utxo,
    /// SHA3 contract hash -> encoded `ContractRecord`.
    Contracts,
    /// Block hash -> encoded block.
    Blocks,
    /// Block hash -> status, height and arrival sequence.
    BlockIndex,
    /// Big-endian height -> canonical block hash.
    MainChain,
    /// Block hash -> outputs and contracts the block consumed.
    UndoData,
    /// Target block hash -> recorded finality votes.
    Votes,
    /// Tip, finalized checkpoint and counters.
    Metadata,
}

impl ColumnFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Utxo => "utxo",
            ColumnFamily::Contracts => "contracts",
            ColumnFamily::Blocks => "blocks",
            ColumnFamily::BlockIndex => "block_index",
            ColumnFamily::MainChain => "main_chain",
            ColumnFamily::UndoData => "undo_data",
            ColumnFamily::Votes => "votes",
            ColumnFamily::Metadata => "metadata",
        }
    }

    pub fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::Utxo,
            ColumnFamily::Contracts,
            ColumnFamily::Blocks,
            ColumnFamily::BlockIndex,
            ColumnFamily::MainChain,
            ColumnFamily::UndoData,
            ColumnFamily::Votes,
            ColumnFamily::Metadata,
        ]
    }

    /// Families read by point lookup on every validated input.
    fn is_hot(&self) -> bool {
        matches!(self, ColumnFamily::Utxo | ColumnFamily::Contracts | ColumnFamily::BlockIndex)
    }

    fn options(&self) -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(DBCompressionType::Lz4);
        if self.is_hot() {
            let mut table = BlockBasedOptions::default();
            table.set_bloom_filter(10.0, false);
            opts.set_block_based_table_factory(&table);
        }
        opts
    }
}

/// Production store. Cloning shares the underlying handle.
#[derive(Clone)]
pub struct Database {
    db: Arc<DB>,
}

impl Database {
    /// Open the store at `path`, creating it and any missing families.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        info!(path = %path.display(), "Opening ledger database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(1);
        opts.set_max_total_wal_size(64 * 1024 * 1024);

        let descriptors = ColumnFamily::all()
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), cf.options()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        debug!(families = ColumnFamily::all().len(), "Ledger database ready");
        Ok(Self { db: Arc::new(db) })
    }

    /// Flush memtables of every family to disk.
    pub fn flush(&self) -> StorageResult<()> {
        for cf in ColumnFamily::all() {
            self.db.flush_cf(self.handle(*cf)?)?;
        }
        Ok(())
    }

    fn handle(&self, cf: ColumnFamily) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf.name())
            .ok_or(StorageError::MissingColumnFamily(cf.name()))
    }
}

impl Storage for Database {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.handle(cf)?, key)?)
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        Ok(self.db.put_cf(self.handle(cf)?, key, value)?)
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        Ok(self.db.delete_cf(self.handle(cf)?, key)?)
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut rocks = rocksdb::WriteBatch::default();
        for op in batch {
            match op {
                BatchOp::Put { cf, key, value } => rocks.put_cf(self.handle(cf)?, key, value),
                BatchOp::Delete { cf, key } => rocks.delete_cf(self.handle(cf)?, key),
            }
        }
        Ok(self.db.write(rocks)?)
    }

    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let entries = self
            .db
            .iterator_cf(self.handle(cf)?, IteratorMode::Start)
            .map(|item| item.map(|(k, v)| (k.into_vec(), v.into_vec())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(entries.into_iter()))
    }

    fn multi_get(&self, cf: ColumnFamily, keys: &[&[u8]]) -> StorageResult<Vec<Option<Vec<u8>>>> {
        let handle = self.handle(cf)?;
        self.db
            .multi_get_cf(keys.iter().map(|k| (handle, *k)))
            .into_iter()
            .map(|r| r.map_err(StorageError::from))
            .collect()
    }
}
