//! Persistent chain data over a [`Storage`] backend.
//!
//! | Column family | Key             | Value                  |
//! |---------------|-----------------|------------------------|
//! | `Utxo`        | output id       | unspent [`UtxoEntry`]  |
//! | `Contracts`   | contract hash   | [`ContractRecord`]     |
//! | `Blocks`      | block hash      | full [`Block`]         |
//! | `BlockIndex`  | block hash      | [`BlockMeta`]          |
//! | `MainChain`   | height (BE)     | block hash             |
//! | `UndoData`    | block hash      | spent entries          |
//! | `Votes`       | target hash     | [`Tally`]              |
//! | `Metadata`    | fixed keys      | tip, finalized, counter|
//!
//! Reads go straight to storage. Writes are staged into a [`WriteBatch`] so
//! a whole block transition commits atomically.

use crate::finality::{Checkpoint, Tally};
use crate::utxo::UtxoViewpoint;
use crate::{ContractViewpoint, StateResult};
use coingod_consensus::{
    Block, BlockHash, BlockHeader, CodecError, CodecResult, ContractRecord, Decode, Encode, Hash,
    OutputId, UtxoEntry,
};
use coingod_storage::{ColumnFamily, Storage, WriteBatch};
use std::sync::Arc;
use tracing::trace;

const KEY_TIP: &[u8] = b"tip";
const KEY_FINALIZED: &[u8] = b"finalized";
const KEY_ARRIVAL: &[u8] = b"arrival";

/// Lifecycle of a block known to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Received, not yet checked.
    Pending,
    /// Context-free checks passed; parent unknown.
    ValidOrphan,
    /// Linked to a known parent on a side branch.
    ValidConnected,
    /// On the canonical chain.
    Best,
    /// On the canonical chain at or below the finalized checkpoint.
    Finalized,
    /// Failed validation. Terminal.
    Rejected,
}

impl BlockStatus {
    fn to_byte(self) -> u8 {
        match self {
            BlockStatus::Pending => 0,
            BlockStatus::ValidOrphan => 1,
            BlockStatus::ValidConnected => 2,
            BlockStatus::Best => 3,
            BlockStatus::Finalized => 4,
            BlockStatus::Rejected => 5,
        }
    }

    fn from_byte(byte: u8) -> CodecResult<Self> {
        Ok(match byte {
            0 => BlockStatus::Pending,
            1 => BlockStatus::ValidOrphan,
            2 => BlockStatus::ValidConnected,
            3 => BlockStatus::Best,
            4 => BlockStatus::Finalized,
            5 => BlockStatus::Rejected,
            _ => return Err(CodecError::InvalidValue("unknown block status")),
        })
    }
}

/// Index record for a block with a known parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub header: BlockHeader,
    pub status: BlockStatus,
    /// Order of first arrival, used to break fork-choice ties.
    pub arrival: u64,
}

impl BlockMeta {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn parent(&self) -> &BlockHash {
        &self.header.previous_block_hash
    }
}

impl Encode for BlockMeta {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        self.status.to_byte().encode(out);
        self.arrival.encode(out);
    }
}

impl Decode for BlockMeta {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            header: BlockHeader::decode(input)?,
            status: BlockStatus::from_byte(u8::decode(input)?)?,
            arrival: u64::decode(input)?,
        })
    }
}

fn decode<T: Decode>(bytes: Option<Vec<u8>>) -> StateResult<Option<T>> {
    Ok(bytes.map(|b| T::from_bytes(&b)).transpose()?)
}

#[derive(Clone)]
pub struct ChainStore {
    storage: Arc<dyn Storage>,
}

impl ChainStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn commit(&self, batch: WriteBatch) -> StateResult<()> {
        trace!(ops = batch.len(), bytes = batch.payload_bytes(), "Committing batch");
        Ok(self.storage.write_batch(batch)?)
    }

    // ============ Reads ============

    pub fn utxo(&self, id: &OutputId) -> StateResult<Option<UtxoEntry>> {
        decode(self.storage.get(ColumnFamily::Utxo, &id.0)?)
    }

    pub fn contract(&self, hash: &Hash) -> StateResult<Option<ContractRecord>> {
        decode(self.storage.get(ColumnFamily::Contracts, &hash.0)?)
    }

    pub fn block(&self, hash: &BlockHash) -> StateResult<Option<Block>> {
        decode(self.storage.get(ColumnFamily::Blocks, &hash.0)?)
    }

    pub fn meta(&self, hash: &BlockHash) -> StateResult<Option<BlockMeta>> {
        decode(self.storage.get(ColumnFamily::BlockIndex, &hash.0)?)
    }

    pub fn main_chain_hash(&self, height: u64) -> StateResult<Option<BlockHash>> {
        decode(self.storage.get(ColumnFamily::MainChain, &height.to_be_bytes())?)
    }

    pub fn undo(&self, hash: &BlockHash) -> StateResult<Option<Vec<UtxoEntry>>> {
        decode(self.storage.get(ColumnFamily::UndoData, &hash.0)?)
    }

    pub fn tip(&self) -> StateResult<Option<Checkpoint>> {
        decode(self.storage.get(ColumnFamily::Metadata, KEY_TIP)?)
    }

    pub fn finalized(&self) -> StateResult<Option<Checkpoint>> {
        decode(self.storage.get(ColumnFamily::Metadata, KEY_FINALIZED)?)
    }

    pub fn arrival_counter(&self) -> StateResult<u64> {
        Ok(decode(self.storage.get(ColumnFamily::Metadata, KEY_ARRIVAL)?)?.unwrap_or(0))
    }

    /// Every indexed block.
    pub fn all_meta(&self) -> StateResult<Vec<(BlockHash, BlockMeta)>> {
        self.storage
            .iter(ColumnFamily::BlockIndex)?
            .map(|(key, value)| Ok((Hash::from_bytes(&key)?, BlockMeta::from_bytes(&value)?)))
            .collect()
    }

    /// Canonical hashes ordered by height.
    pub fn main_chain(&self) -> StateResult<Vec<BlockHash>> {
        let mut rows: Vec<(u64, BlockHash)> = self
            .storage
            .iter(ColumnFamily::MainChain)?
            .map(|(key, value)| {
                let height: [u8; 8] = key
                    .as_slice()
                    .try_into()
                    .map_err(|_| CodecError::InvalidValue("main chain key"))?;
                Ok((u64::from_be_bytes(height), Hash::from_bytes(&value)?))
            })
            .collect::<StateResult<_>>()?;
        rows.sort_by_key(|(height, _)| *height);
        Ok(rows.into_iter().map(|(_, hash)| hash).collect())
    }

    pub fn all_tallies(&self) -> StateResult<Vec<(BlockHash, Tally)>> {
        self.storage
            .iter(ColumnFamily::Votes)?
            .map(|(key, value)| Ok((Hash::from_bytes(&key)?, Tally::from_bytes(&value)?)))
            .collect()
    }

    /// Number of unspent entries. Scans the column family.
    pub fn utxo_count(&self) -> StateResult<usize> {
        Ok(self.storage.iter(ColumnFamily::Utxo)?.count())
    }

    // ============ Staged writes ============

    pub fn stage_block(batch: &mut WriteBatch, block: &Block) {
        batch.put(ColumnFamily::Blocks, block.hash().0, block.to_bytes());
    }

    pub fn stage_meta(batch: &mut WriteBatch, hash: &BlockHash, meta: &BlockMeta) {
        batch.put(ColumnFamily::BlockIndex, hash.0, meta.to_bytes());
    }

    pub fn stage_main_chain(batch: &mut WriteBatch, height: u64, hash: &BlockHash) {
        batch.put(ColumnFamily::MainChain, height.to_be_bytes(), hash.0);
    }

    pub fn stage_undo(batch: &mut WriteBatch, hash: &BlockHash, undo: &[UtxoEntry]) {
        let mut bytes = Vec::new();
        (undo.len() as u32).encode(&mut bytes);
        for entry in undo {
            entry.encode(&mut bytes);
        }
        batch.put(ColumnFamily::UndoData, hash.0, bytes);
    }

    pub fn stage_drop_undo(batch: &mut WriteBatch, hash: &BlockHash) {
        batch.delete(ColumnFamily::UndoData, hash.0);
    }

    pub fn stage_tally(batch: &mut WriteBatch, target: &BlockHash, tally: Option<&Tally>) {
        match tally {
            Some(tally) if !tally.voters.is_empty() => {
                batch.put(ColumnFamily::Votes, target.0, tally.to_bytes())
            }
            _ => batch.delete(ColumnFamily::Votes, target.0),
        }
    }

    pub fn stage_tip(batch: &mut WriteBatch, tip: &Checkpoint) {
        batch.put(ColumnFamily::Metadata, KEY_TIP, tip.to_bytes());
    }

    pub fn stage_finalized(batch: &mut WriteBatch, finalized: &Checkpoint) {
        batch.put(ColumnFamily::Metadata, KEY_FINALIZED, finalized.to_bytes());
    }

    pub fn stage_arrival(batch: &mut WriteBatch, counter: u64) {
        batch.put(ColumnFamily::Metadata, KEY_ARRIVAL, counter.to_bytes());
    }

    /// Flush both viewpoints into `batch`.
    pub fn stage_viewpoints(
        batch: &mut WriteBatch,
        utxos: &UtxoViewpoint,
        contracts: &ContractViewpoint,
    ) {
        let (puts, deletes) = utxos.changes();
        for entry in puts {
            batch.put(ColumnFamily::Utxo, entry.output_id.0, entry.to_bytes());
        }
        for id in deletes {
            batch.delete(ColumnFamily::Utxo, id.0);
        }
        let (records, removed) = contracts.changes();
        for record in records {
            batch.put(ColumnFamily::Contracts, record.hash.0, record.to_bytes());
        }
        for hash in removed {
            batch.delete(ColumnFamily::Contracts, hash.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coingod_consensus::{genesis_block, NetworkParams};
    use coingod_storage::MemoryStorage;

    fn store() -> ChainStore {
        ChainStore::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_block_and_meta_round_trip() {
        let store = store();
        let block = genesis_block(&NetworkParams::solonet()).unwrap();
        let hash = block.hash();
        let meta = BlockMeta {
            header: block.header.clone(),
            status: BlockStatus::Best,
            arrival: 7,
        };

        let mut batch = WriteBatch::new();
        ChainStore::stage_block(&mut batch, &block);
        ChainStore::stage_meta(&mut batch, &hash, &meta);
        ChainStore::stage_main_chain(&mut batch, 0, &hash);
        store.commit(batch).unwrap();

        assert_eq!(store.block(&hash).unwrap(), Some(block));
        assert_eq!(store.meta(&hash).unwrap(), Some(meta));
        assert_eq!(store.main_chain().unwrap(), vec![hash]);
        assert!(store.tip().unwrap().is_none());
    }

    #[test]
    fn test_main_chain_orders_by_height() {
        let store = store();
        let mut batch = WriteBatch::new();
        for height in [300u64, 2, 256, 1] {
            ChainStore::stage_main_chain(&mut batch, height, &Hash([height as u8; 32]));
        }
        store.commit(batch).unwrap();
        let heights: Vec<u8> = store.main_chain().unwrap().iter().map(|h| h.0[0]).collect();
        assert_eq!(heights, vec![1, 2, 0, 44]);
    }

    #[test]
    fn test_empty_tally_is_deleted() {
        let store = store();
        let target = Hash([3; 32]);
        let mut tally = Tally::default();
        tally.voters.insert([1; 32], 1);

        let mut batch = WriteBatch::new();
        ChainStore::stage_tally(&mut batch, &target, Some(&tally));
        store.commit(batch).unwrap();
        assert_eq!(store.all_tallies().unwrap().len(), 1);

        tally.voters.clear();
        let mut batch = WriteBatch::new();
        ChainStore::stage_tally(&mut batch, &target, Some(&tally));
        store.commit(batch).unwrap();
        assert!(store.all_tallies().unwrap().is_empty());
    }
}
