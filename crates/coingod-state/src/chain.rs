//! The chain state machine.
//!
//! `Chain` owns the canonical tip. Candidate blocks are routed by what is
//! known about their parent:
//!
//! - parent is the best tip: fully validated and committed (`Extended`);
//! - parent is elsewhere in the index: context-free checks, stored as a side
//!   block, and a reorganization when the branch becomes heavier;
//! - parent unknown: context-free checks and parked as an orphan until the
//!   parent connects.
//!
//! Every transition commits with one [`WriteBatch`]. A failure at any point
//! before the commit leaves storage and the in-memory index as they were.
//!
//! Mutation is serialized behind one mutex. Readers take the tip lock,
//! which a commit holds while the batch is written, so they never see half
//! of a transition.

use crate::contract::referenced_contracts;
use crate::finality::{Checkpoint, FinalityTracker};
use crate::store::{BlockMeta, BlockStatus, ChainStore};
use crate::{ChainError, ChainResult, ContractViewpoint, StateError, UtxoViewpoint};
use coingod_consensus::{
    genesis_block, Block, BlockContext, BlockHash, BlockHeader, BlockValidator, ContractRecord,
    Hash, NetworkParams, OutputId, Transaction, TxValidator, UtxoEntry, ValidatedBlock, ValidatedTx,
    ValidationError,
};
use coingod_storage::{Storage, WriteBatch};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};

/// Orphans held before the oldest is dropped.
pub const MAX_ORPHANS: usize = 256;

/// What processing a block did to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block extended the best chain.
    Extended { height: u64, hash: BlockHash },
    /// The block's branch became best.
    Reorganized {
        fork_height: u64,
        disconnected: usize,
        connected: usize,
        tip: BlockHash,
    },
    /// Stored on a branch that is not heavier than the best chain.
    SideChain,
    /// Parent unknown. Held until it arrives.
    Orphan,
    /// Already known.
    Duplicate,
}

/// Snapshot of the canonical tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: BlockHash,
    pub header: BlockHeader,
    pub finalized: Checkpoint,
}

impl ChainTip {
    pub fn height(&self) -> u64 {
        self.header.height
    }
}

#[derive(Default)]
struct OrphanPool {
    by_parent: HashMap<BlockHash, Vec<Block>>,
    known: HashSet<BlockHash>,
    order: VecDeque<(BlockHash, BlockHash)>,
}

impl OrphanPool {
    fn insert(&mut self, block: Block) {
        let hash = block.hash();
        let parent = *block.parent_hash();
        while self.known.len() >= MAX_ORPHANS {
            let Some((old, old_parent)) = self.order.pop_front() else {
                break;
            };
            if self.known.remove(&old) {
                if let Some(siblings) = self.by_parent.get_mut(&old_parent) {
                    siblings.retain(|b| b.hash() != old);
                    if siblings.is_empty() {
                        self.by_parent.remove(&old_parent);
                    }
                }
                debug!(hash = %old.short(), "Orphan evicted");
            }
        }
        self.known.insert(hash);
        self.order.push_back((hash, parent));
        self.by_parent.entry(parent).or_default().push(block);
    }

    fn take_children(&mut self, parent: &BlockHash) -> Vec<Block> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        if !children.is_empty() {
            for child in &children {
                self.known.remove(&child.hash());
            }
            self.order.retain(|(hash, _)| self.known.contains(hash));
        }
        children
    }
}

/// State guarded by the write lock.
struct Inner {
    index: HashMap<BlockHash, BlockMeta>,
    /// Canonical hashes by height.
    main: Vec<BlockHash>,
    finality: FinalityTracker,
    arrival: u64,
}

impl Inner {
    fn best(&self) -> (u64, BlockHash) {
        let height = self.main.len().saturating_sub(1) as u64;
        (height, self.main.last().copied().unwrap_or_default())
    }

    fn is_canonical(&self, hash: &BlockHash, height: u64) -> bool {
        self.main.get(height as usize) == Some(hash)
    }

    fn next_arrival(&mut self) -> u64 {
        self.arrival += 1;
        self.arrival
    }

    fn meta(&self, hash: &BlockHash) -> ChainResult<&BlockMeta> {
        self.index
            .get(hash)
            .ok_or_else(|| StateError::Corruption(format!("block {hash} missing from index")).into())
    }
}

pub struct Chain {
    params: NetworkParams,
    store: ChainStore,
    inner: Mutex<Inner>,
    orphans: Mutex<OrphanPool>,
    tip: RwLock<ChainTip>,
    /// Height and hash of the block being processed.
    pending: Mutex<Option<(u64, BlockHash)>>,
    cancel: Arc<AtomicBool>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn spent_ids(txs: &[Transaction]) -> Vec<OutputId> {
    txs.iter()
        .flat_map(|tx| tx.inputs.iter().filter_map(|i| i.spent_output_id().copied()))
        .collect()
}

impl Chain {
    /// Open the chain stored in `storage`, committing the network's genesis
    /// block if the store is empty.
    #[instrument(skip(storage, params), fields(network = %params.name))]
    pub fn open(storage: Arc<dyn Storage>, params: NetworkParams) -> ChainResult<Self> {
        params.validate()?;
        let store = ChainStore::new(storage);
        let genesis = genesis_block(&params)?;
        let genesis_hash = genesis.hash();
        let genesis_checkpoint = Checkpoint {
            height: 0,
            hash: genesis_hash,
        };

        let tip = match store.tip()? {
            Some(tip) => tip,
            None => {
                Self::bootstrap(&store, &genesis)?;
                info!(hash = %genesis_hash.short(), "Genesis block committed");
                genesis_checkpoint
            }
        };

        let main = store.main_chain()?;
        match main.first() {
            Some(stored) if *stored != genesis_hash => {
                return Err(ChainError::GenesisMismatch {
                    stored: *stored,
                    expected: genesis_hash,
                })
            }
            None => return Err(StateError::Corruption("empty main chain".into()).into()),
            _ => {}
        }
        if main.last() != Some(&tip.hash) || main.len() as u64 != tip.height + 1 {
            return Err(StateError::Corruption(format!(
                "tip {} at {} does not match main chain of {} blocks",
                tip.hash,
                tip.height,
                main.len()
            ))
            .into());
        }

        let index: HashMap<_, _> = store.all_meta()?.into_iter().collect();
        let finalized = store.finalized()?.unwrap_or(genesis_checkpoint);
        let mut finality = FinalityTracker::new(&params, finalized);
        finality.restore(store.all_tallies()?);
        let arrival = store.arrival_counter()?;

        let header = index
            .get(&tip.hash)
            .map(|meta| meta.header.clone())
            .ok_or_else(|| StateError::Corruption("tip missing from index".into()))?;

        info!(
            height = tip.height,
            hash = %tip.hash.short(),
            finalized = finalized.height,
            blocks = index.len(),
            "Chain opened"
        );

        Ok(Self {
            params,
            store,
            inner: Mutex::new(Inner {
                index,
                main,
                finality,
                arrival,
            }),
            orphans: Mutex::new(OrphanPool::default()),
            tip: RwLock::new(ChainTip {
                hash: tip.hash,
                header,
                finalized,
            }),
            pending: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    fn bootstrap(store: &ChainStore, genesis: &Block) -> ChainResult<()> {
        let hash = genesis.hash();
        let mut utxos = UtxoViewpoint::new();
        let mut contracts = ContractViewpoint::new();
        utxos.apply_block(genesis)?;
        contracts.apply_block(genesis)?;

        let checkpoint = Checkpoint { height: 0, hash };
        let mut batch = WriteBatch::new();
        ChainStore::stage_viewpoints(&mut batch, &utxos, &contracts);
        ChainStore::stage_block(&mut batch, genesis);
        ChainStore::stage_undo(&mut batch, &hash, &[]);
        ChainStore::stage_meta(
            &mut batch,
            &hash,
            &BlockMeta {
                header: genesis.header.clone(),
                status: BlockStatus::Best,
                arrival: 0,
            },
        );
        ChainStore::stage_main_chain(&mut batch, 0, &hash);
        ChainStore::stage_tip(&mut batch, &checkpoint);
        ChainStore::stage_finalized(&mut batch, &checkpoint);
        ChainStore::stage_arrival(&mut batch, 0);
        store.commit(batch)?;
        Ok(())
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Flag polled by in-flight validation. Setting it abandons the block
    /// being processed.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    // ============ Readers ============

    pub fn tip(&self) -> ChainTip {
        self.tip.read().clone()
    }

    pub fn best_height(&self) -> u64 {
        self.tip.read().height()
    }

    pub fn best_hash(&self) -> BlockHash {
        self.tip.read().hash
    }

    pub fn finalized_height(&self) -> u64 {
        self.tip.read().finalized.height
    }

    /// Committed unspent entry, if any.
    pub fn utxo_lookup(&self, output_id: &OutputId) -> ChainResult<Option<UtxoEntry>> {
        let _tip = self.tip.read();
        Ok(self.store.utxo(output_id)?)
    }

    /// Committed contract record, state history included.
    pub fn contract_state_lookup(&self, hash: &Hash) -> ChainResult<Option<ContractRecord>> {
        let _tip = self.tip.read();
        Ok(self.store.contract(hash)?)
    }

    pub fn block_by_height(&self, height: u64) -> ChainResult<Option<Block>> {
        let _tip = self.tip.read();
        match self.store.main_chain_hash(height)? {
            Some(hash) => Ok(self.store.block(&hash)?),
            None => Ok(None),
        }
    }

    pub fn block_status(&self, hash: &BlockHash) -> ChainResult<Option<BlockStatus>> {
        if matches!(*self.pending.lock(), Some((_, h)) if h == *hash) {
            return Ok(Some(BlockStatus::Pending));
        }
        if self.orphans.lock().known.contains(hash) {
            return Ok(Some(BlockStatus::ValidOrphan));
        }
        let tip = self.tip.read();
        Ok(self.store.meta(hash)?.map(|meta| match meta.status {
            BlockStatus::Best if meta.height() <= tip.finalized.height => BlockStatus::Finalized,
            status => status,
        }))
    }

    /// Number of unspent outputs in the committed set.
    pub fn utxo_count(&self) -> ChainResult<usize> {
        let _tip = self.tip.read();
        Ok(self.store.utxo_count()?)
    }

    // ============ Validation without commit ============

    /// Validate `tx` for inclusion in the next block.
    pub fn validate_transaction(&self, tx: &Transaction) -> ChainResult<ValidatedTx> {
        let tip = self.tip.read();
        let ctx = BlockContext {
            height: tip.height() + 1,
            timestamp: now_ms().max(tip.header.timestamp + 1),
        };
        let mut utxos = UtxoViewpoint::new();
        let mut contracts = ContractViewpoint::new();
        self.preload(&mut utxos, &mut contracts, std::slice::from_ref(tx))?;
        Ok(TxValidator::new(&self.params).validate(tx, &ctx, &utxos, &contracts)?)
    }

    /// Validate `block` as the next block without committing it.
    pub fn validate_block(&self, block: &Block) -> ChainResult<ValidatedBlock> {
        let tip = self.tip.read();
        if *block.parent_hash() != tip.hash {
            return Err(ChainError::ParentMismatch {
                got: *block.parent_hash(),
                expected: tip.hash,
            });
        }
        let mut utxos = UtxoViewpoint::new();
        let mut contracts = ContractViewpoint::new();
        self.preload(&mut utxos, &mut contracts, &block.transactions)?;
        Ok(BlockValidator::new(&self.params).validate(
            block,
            &tip.header,
            now_ms(),
            &utxos,
            &contracts,
            None,
        )?)
    }

    /// Load what `txs` read from committed state into the viewpoints.
    fn preload(
        &self,
        utxos: &mut UtxoViewpoint,
        contracts: &mut ContractViewpoint,
        txs: &[Transaction],
    ) -> ChainResult<()> {
        utxos.load(&spent_ids(txs), |id| self.store.utxo(id))?;
        let hashes = referenced_contracts(txs, utxos);
        contracts.load(&hashes, |hash| self.store.contract(hash))?;
        Ok(())
    }

    // ============ Block processing ============

    /// Accept, park or reject a candidate block.
    #[instrument(skip(self, block), fields(height = block.height(), hash = %block.hash().short()))]
    pub fn process_block(&self, block: Block) -> ChainResult<BlockOutcome> {
        let height = block.height();
        let hash = block.hash();
        if let Some(in_flight) = self.outweighs_in_flight(&block) {
            debug!(in_flight, "Heavier candidate arrived, cancelling validation");
            self.cancel.store(true, Ordering::SeqCst);
        }

        let mut inner = self.inner.lock();
        self.cancel.store(false, Ordering::SeqCst);
        *self.pending.lock() = Some((height, hash));
        let result = self.route(&mut inner, block);
        *self.pending.lock() = None;

        match &result {
            Ok(outcome) => debug!(?outcome, "Block processed"),
            Err(ChainError::Abandoned) => debug!("Block processing abandoned"),
            Err(e) => warn!(code = e.code(), error = %e, "Block refused"),
        }
        result
    }

    /// Height of the in-flight block if `block` is a new, well-formed block
    /// on a known parent that would outweigh it.
    ///
    /// Runs without the write lock, so it reads the persisted index.
    fn outweighs_in_flight(&self, block: &Block) -> Option<u64> {
        let (in_flight, _) = (*self.pending.lock())?;
        if block.height() <= in_flight {
            return None;
        }
        let hash = block.hash();
        if self.orphans.lock().known.contains(&hash) {
            return None;
        }
        if !matches!(self.store.meta(&hash), Ok(None)) {
            return None;
        }
        let parent = self.store.meta(block.parent_hash()).ok().flatten()?;
        if parent.status == BlockStatus::Rejected || parent.height() + 1 != block.height() {
            return None;
        }
        BlockValidator::new(&self.params)
            .check_context_free(block)
            .ok()
            .map(|_| in_flight)
    }

    fn route(&self, inner: &mut Inner, block: Block) -> ChainResult<BlockOutcome> {
        let hash = block.hash();
        if let Some(meta) = inner.index.get(&hash) {
            if meta.status == BlockStatus::Rejected {
                return Err(ChainError::Rejected(hash));
            }
            return Ok(BlockOutcome::Duplicate);
        }
        if self.orphans.lock().known.contains(&hash) {
            return Ok(BlockOutcome::Duplicate);
        }

        let parent = *block.parent_hash();
        match inner.index.get(&parent).map(|m| m.status) {
            None => self.accept_orphan(inner, block),
            Some(BlockStatus::Rejected) => {
                self.reject(inner, &[block.header.clone()])?;
                Err(ChainError::Rejected(hash))
            }
            Some(_) => {
                let outcome = self.connect(inner, block)?;
                self.connect_orphans(inner, hash);
                Ok(outcome)
            }
        }
    }

    fn accept_orphan(&self, inner: &mut Inner, block: Block) -> ChainResult<BlockOutcome> {
        let finalized = inner.finality.finalized();
        if block.height() <= finalized.height {
            return Err(ChainError::BelowFinalized {
                height: block.height(),
                finalized: finalized.height,
            });
        }
        if let Err(e) = BlockValidator::new(&self.params).check_context_free(&block) {
            self.reject(inner, &[block.header.clone()])?;
            return Err(e.into());
        }
        debug!(parent = %block.parent_hash().short(), "Orphan block held");
        self.orphans.lock().insert(block);
        Ok(BlockOutcome::Orphan)
    }

    /// Connect orphans waiting on `parent`, and theirs in turn.
    fn connect_orphans(&self, inner: &mut Inner, parent: BlockHash) {
        let mut queue = vec![parent];
        while let Some(parent) = queue.pop() {
            let children = self.orphans.lock().take_children(&parent);
            for child in children {
                let child_hash = child.hash();
                match self.connect(inner, child) {
                    Ok(outcome) => {
                        debug!(hash = %child_hash.short(), ?outcome, "Orphan connected");
                        queue.push(child_hash);
                    }
                    Err(e) => warn!(
                        hash = %child_hash.short(),
                        code = e.code(),
                        error = %e,
                        "Orphan failed to connect"
                    ),
                }
            }
        }
    }

    /// Link a block whose parent is in the index.
    fn connect(&self, inner: &mut Inner, block: Block) -> ChainResult<BlockOutcome> {
        let hash = block.hash();
        let finalized = inner.finality.finalized();
        if block.height() <= finalized.height {
            return Err(ChainError::BelowFinalized {
                height: block.height(),
                finalized: finalized.height,
            });
        }
        if !self.descends_from(inner, block.parent_hash(), &finalized)? {
            self.reject(inner, &[block.header.clone()])?;
            return Err(ChainError::ForkBelowFinalized {
                hash,
                finalized: finalized.height,
            });
        }

        let (best_height, best_hash) = inner.best();
        if *block.parent_hash() == best_hash {
            return self.extend(inner, block);
        }

        let parent_header = inner.meta(block.parent_hash())?.header.clone();
        let validator = BlockValidator::new(&self.params);
        let checked = validator
            .check_header(&block.header, &parent_header, now_ms())
            .and_then(|_| validator.check_body(&block));
        if let Err(e) = checked {
            if !e.depends_on_clock() {
                self.reject(inner, &[block.header.clone()])?;
            }
            return Err(e.into());
        }

        let arrival = inner.next_arrival();
        let meta = BlockMeta {
            header: block.header.clone(),
            status: BlockStatus::ValidConnected,
            arrival,
        };
        let mut batch = WriteBatch::new();
        ChainStore::stage_block(&mut batch, &block);
        ChainStore::stage_meta(&mut batch, &hash, &meta);
        ChainStore::stage_arrival(&mut batch, arrival);
        self.store.commit(batch)?;
        inner.index.insert(hash, meta);

        // Equal weight keeps the tip that arrived first.
        if block.height() > best_height {
            self.reorganize(inner, hash)
        } else {
            debug!(best_height, "Side block stored");
            Ok(BlockOutcome::SideChain)
        }
    }

    /// Whether the branch ending at `from` contains `checkpoint`.
    fn descends_from(
        &self,
        inner: &Inner,
        from: &BlockHash,
        checkpoint: &Checkpoint,
    ) -> ChainResult<bool> {
        let mut cursor = *from;
        loop {
            let meta = inner.meta(&cursor)?;
            if meta.height() < checkpoint.height {
                return Ok(false);
            }
            if inner.is_canonical(&cursor, meta.height()) {
                return Ok(inner.is_canonical(&checkpoint.hash, checkpoint.height));
            }
            if meta.height() == checkpoint.height {
                return Ok(cursor == checkpoint.hash);
            }
            cursor = *meta.parent();
        }
    }

    /// Validate and commit a block on top of the best tip.
    fn extend(&self, inner: &mut Inner, block: Block) -> ChainResult<BlockOutcome> {
        let hash = block.hash();
        let height = block.height();
        let parent_header = inner.meta(block.parent_hash())?.header.clone();

        let mut utxos = UtxoViewpoint::new();
        let mut contracts = ContractViewpoint::new();
        self.preload(&mut utxos, &mut contracts, &block.transactions)?;

        let verdict = BlockValidator::new(&self.params).validate(
            &block,
            &parent_header,
            now_ms(),
            &utxos,
            &contracts,
            Some(self.cancel.as_ref()),
        );
        match verdict {
            Ok(_) => {}
            Err(ValidationError::Abandoned) => return Err(ChainError::Abandoned),
            Err(e) => {
                if !e.depends_on_clock() {
                    self.reject(inner, &[block.header.clone()])?;
                }
                return Err(e.into());
            }
        }

        let undo = utxos.spent_entries(&block)?;
        utxos.apply_block(&block)?;
        contracts.apply_block(&block)?;

        let arrival = inner.next_arrival();
        let meta = BlockMeta {
            header: block.header.clone(),
            status: BlockStatus::Best,
            arrival,
        };
        let mut finality = inner.finality.clone();
        let touched = finality.fold(&block);
        let finalized = finality.advance(|h| {
            if h == height {
                Some(hash)
            } else {
                inner.main.get(h as usize).copied()
            }
        });

        let mut batch = WriteBatch::new();
        ChainStore::stage_viewpoints(&mut batch, &utxos, &contracts);
        ChainStore::stage_block(&mut batch, &block);
        ChainStore::stage_undo(&mut batch, &hash, &undo);
        ChainStore::stage_meta(&mut batch, &hash, &meta);
        ChainStore::stage_main_chain(&mut batch, height, &hash);
        ChainStore::stage_arrival(&mut batch, arrival);
        Self::stage_finality(&mut batch, &finality, touched, finalized);
        ChainStore::stage_tip(&mut batch, &Checkpoint { height, hash });

        self.commit(
            batch,
            ChainTip {
                hash,
                header: block.header.clone(),
                finalized: finality.finalized(),
            },
        )?;
        inner.index.insert(hash, meta);
        inner.main.push(hash);
        inner.finality = finality;

        info!(height, hash = %hash.short(), txs = block.transactions.len(), "Block connected");
        Ok(BlockOutcome::Extended { height, hash })
    }

    /// Make the branch ending at `new_tip` canonical.
    #[instrument(skip(self, inner), fields(new_tip = %new_tip.short()))]
    fn reorganize(&self, inner: &mut Inner, new_tip: BlockHash) -> ChainResult<BlockOutcome> {
        // Walk back to the canonical chain.
        let mut path = Vec::new();
        let mut cursor = new_tip;
        let fork_height = loop {
            let meta = inner.meta(&cursor)?;
            if inner.is_canonical(&cursor, meta.height()) {
                break meta.height();
            }
            if meta.status == BlockStatus::Rejected {
                let rejected: Vec<BlockHeader> = path
                    .iter()
                    .map(|h| inner.meta(h).map(|m| m.header.clone()))
                    .collect::<ChainResult<_>>()?;
                self.reject(inner, &rejected)?;
                return Err(ChainError::Rejected(cursor));
            }
            path.push(cursor);
            cursor = *meta.parent();
        };
        path.reverse();

        let finalized = inner.finality.finalized();
        if fork_height < finalized.height {
            return Err(ChainError::ForkBelowFinalized {
                hash: new_tip,
                finalized: finalized.height,
            });
        }

        let (old_height, _) = inner.best();
        let mut utxos = UtxoViewpoint::new();
        let mut contracts = ContractViewpoint::new();
        let mut finality = inner.finality.clone();
        let mut touched = Vec::new();
        let mut batch = WriteBatch::new();
        let mut statuses = Vec::new();

        for height in (fork_height + 1..=old_height).rev() {
            let hash = inner.main[height as usize];
            let block = self
                .store
                .block(&hash)?
                .ok_or_else(|| StateError::Corruption(format!("block {hash} missing")))?;
            let undo = self.store.undo(&hash)?.ok_or(StateError::UndoMissing(hash))?;
            utxos.restore_spent(undo);
            let hashes = referenced_contracts(&block.transactions, &utxos);
            contracts.load(&hashes, |h| self.store.contract(h))?;
            utxos.rollback_block(&block)?;
            contracts.rollback_block(&block)?;
            touched.extend(finality.unfold(&block));

            ChainStore::stage_drop_undo(&mut batch, &hash);
            statuses.push((hash, BlockStatus::ValidConnected));
            debug!(height, hash = %hash.short(), "Block disconnected");
        }

        let validator = BlockValidator::new(&self.params);
        let now = now_ms();
        let mut main = inner.main[..=fork_height as usize].to_vec();
        let mut tip_header = None;
        for (position, hash) in path.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(ChainError::Abandoned);
            }
            let block = self
                .store
                .block(hash)?
                .ok_or_else(|| StateError::Corruption(format!("block {hash} missing")))?;
            let parent_header = inner.meta(block.parent_hash())?.header.clone();
            self.preload(&mut utxos, &mut contracts, &block.transactions)?;

            let verdict = validator.validate(
                &block,
                &parent_header,
                now,
                &utxos,
                &contracts,
                Some(self.cancel.as_ref()),
            );
            match verdict {
                Ok(_) => {}
                Err(ValidationError::Abandoned) => return Err(ChainError::Abandoned),
                Err(e) if e.depends_on_clock() => return Err(e.into()),
                Err(e) => {
                    let rejected: Vec<BlockHeader> = path[position..]
                        .iter()
                        .map(|h| inner.meta(h).map(|m| m.header.clone()))
                        .collect::<ChainResult<_>>()?;
                    self.reject(inner, &rejected)?;
                    return Err(e.into());
                }
            }

            let undo = utxos.spent_entries(&block)?;
            utxos.apply_block(&block)?;
            contracts.apply_block(&block)?;
            touched.extend(finality.fold(&block));

            ChainStore::stage_undo(&mut batch, hash, &undo);
            ChainStore::stage_main_chain(&mut batch, block.height(), hash);
            statuses.push((*hash, BlockStatus::Best));
            main.push(*hash);
            tip_header = Some(block.header);
        }
        let tip_header =
            tip_header.ok_or_else(|| StateError::Corruption("empty reorganization path".into()))?;

        let advanced = finality.advance(|h| main.get(h as usize).copied());
        ChainStore::stage_viewpoints(&mut batch, &utxos, &contracts);
        let mut metas = Vec::with_capacity(statuses.len());
        for (hash, status) in &statuses {
            let mut meta = inner.meta(hash)?.clone();
            meta.status = *status;
            ChainStore::stage_meta(&mut batch, hash, &meta);
            metas.push((*hash, meta));
        }
        Self::stage_finality(&mut batch, &finality, touched, advanced);
        ChainStore::stage_tip(
            &mut batch,
            &Checkpoint {
                height: tip_header.height,
                hash: new_tip,
            },
        );

        self.commit(
            batch,
            ChainTip {
                hash: new_tip,
                header: tip_header,
                finalized: finality.finalized(),
            },
        )?;
        inner.index.extend(metas);
        inner.main = main;
        inner.finality = finality;

        let disconnected = (old_height - fork_height) as usize;
        info!(
            fork_height,
            disconnected,
            connected = path.len(),
            "Chain reorganized"
        );
        Ok(BlockOutcome::Reorganized {
            fork_height,
            disconnected,
            connected: path.len(),
            tip: new_tip,
        })
    }

    fn stage_finality(
        batch: &mut WriteBatch,
        finality: &FinalityTracker,
        touched: Vec<BlockHash>,
        advanced: Option<Checkpoint>,
    ) {
        let touched: HashSet<BlockHash> = touched.into_iter().collect();
        for target in &touched {
            ChainStore::stage_tally(batch, target, finality.tally(target));
        }
        if let Some(checkpoint) = advanced {
            ChainStore::stage_finalized(batch, &checkpoint);
        }
    }

    /// Mark blocks rejected, along with any orphans waiting on them.
    fn reject(&self, inner: &mut Inner, headers: &[BlockHeader]) -> ChainResult<()> {
        let mut pending: Vec<BlockHeader> = headers.to_vec();
        let mut batch = WriteBatch::new();
        let mut metas = Vec::new();
        while let Some(header) = pending.pop() {
            let hash = header.hash();
            let arrival = match inner.index.get(&hash) {
                Some(meta) => meta.arrival,
                None => inner.next_arrival(),
            };
            let meta = BlockMeta {
                header,
                status: BlockStatus::Rejected,
                arrival,
            };
            ChainStore::stage_meta(&mut batch, &hash, &meta);
            metas.push((hash, meta));
            for child in self.orphans.lock().take_children(&hash) {
                pending.push(child.header);
            }
            warn!(hash = %hash.short(), "Block rejected");
        }
        ChainStore::stage_arrival(&mut batch, inner.arrival);
        self.store.commit(batch)?;
        inner.index.extend(metas);
        Ok(())
    }

    /// Write `batch` and publish `tip` while readers are held off.
    fn commit(&self, batch: WriteBatch, tip: ChainTip) -> ChainResult<()> {
        let mut current = self.tip.write();
        self.store.commit(batch)?;
        *current = tip;
        Ok(())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tip = self.tip.read();
        f.debug_struct("Chain")
            .field("network", &self.params.name)
            .field("height", &tip.height())
            .field("hash", &tip.hash)
            .field("finalized", &tip.finalized.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coingod_consensus::{AssetAmount, FinalityVote, OutputTemplate, TxInput, Validator};
    use coingod_storage::MemoryStorage;
    use ed25519_dalek::{Signer, SigningKey};

    fn params() -> NetworkParams {
        let mut params = NetworkParams::solonet();
        params.genesis_program = "51".into();
        params
    }

    fn open_with(params: NetworkParams) -> (Arc<MemoryStorage>, Chain) {
        let storage = Arc::new(MemoryStorage::new());
        let chain = Chain::open(storage.clone(), params).unwrap();
        (storage, chain)
    }

    fn open() -> (Arc<MemoryStorage>, Chain) {
        open_with(params())
    }

    fn child_with(parent: &BlockHeader, tag: &[u8], reward: u64, votes: Vec<FinalityVote>) -> Block {
        let height = parent.height + 1;
        let coinbase = Transaction::coinbase(
            height,
            tag,
            vec![OutputTemplate::new(AssetAmount::native(reward), vec![0x51])],
        );
        Block::new(height, parent.hash(), parent.timestamp + 6_000, vec![coinbase], votes)
    }

    fn child(parent: &BlockHeader, tag: &[u8]) -> Block {
        child_with(parent, tag, params().block_reward, vec![])
    }

    fn extend(chain: &Chain, count: usize, tag: &[u8]) -> Vec<Block> {
        let mut blocks = Vec::new();
        for _ in 0..count {
            let block = child(&chain.tip().header, tag);
            chain.process_block(block.clone()).unwrap();
            blocks.push(block);
        }
        blocks
    }

    // ============ Open Tests ============

    #[test]
    fn test_open_bootstraps_genesis() {
        let (_, chain) = open();
        let genesis = genesis_block(chain.params()).unwrap();

        assert_eq!(chain.best_height(), 0);
        assert_eq!(chain.best_hash(), genesis.hash());
        assert_eq!(chain.finalized_height(), 0);
        assert_eq!(chain.utxo_count().unwrap(), 1);
        assert_eq!(
            chain.block_status(&genesis.hash()).unwrap(),
            Some(BlockStatus::Finalized)
        );
        assert_eq!(chain.block_by_height(0).unwrap(), Some(genesis));
    }

    #[test]
    fn test_reopen_restores_tip() {
        let (storage, chain) = open();
        let blocks = extend(&chain, 3, b"a");
        drop(chain);

        let chain = Chain::open(storage, params()).unwrap();
        assert_eq!(chain.best_height(), 3);
        assert_eq!(chain.best_hash(), blocks[2].hash());
        assert_eq!(chain.utxo_count().unwrap(), 4);
    }

    #[test]
    fn test_reopen_with_other_genesis_fails() {
        let (storage, _chain) = open();
        let mut other = params();
        other.genesis_program = "52".into();
        let err = Chain::open(storage, other).unwrap_err();
        assert!(matches!(err, ChainError::GenesisMismatch { .. }));
    }

    // ============ Extend Tests ============

    #[test]
    fn test_extend_and_duplicate() {
        let (_, chain) = open();
        let block = child(&chain.tip().header, b"a");
        let hash = block.hash();

        assert_eq!(
            chain.process_block(block.clone()).unwrap(),
            BlockOutcome::Extended { height: 1, hash }
        );
        assert_eq!(chain.process_block(block).unwrap(), BlockOutcome::Duplicate);
        assert_eq!(chain.block_status(&hash).unwrap(), Some(BlockStatus::Best));
    }

    #[test]
    fn test_orphan_connects_when_parent_arrives() {
        let (_, chain) = open();
        let first = child(&chain.tip().header, b"a");
        let second = child(&first.header, b"a");

        assert_eq!(chain.process_block(second.clone()).unwrap(), BlockOutcome::Orphan);
        assert_eq!(
            chain.block_status(&second.hash()).unwrap(),
            Some(BlockStatus::ValidOrphan)
        );

        chain.process_block(first).unwrap();
        assert_eq!(chain.best_height(), 2);
        assert_eq!(chain.best_hash(), second.hash());
    }

    #[test]
    fn test_invalid_block_and_descendants_rejected() {
        let (_, chain) = open();
        let bad = child_with(&chain.tip().header, b"a", params().block_reward + 1, vec![]);
        let err = chain.process_block(bad.clone()).unwrap_err();
        assert_eq!(err.code(), "CG746");
        assert_eq!(chain.block_status(&bad.hash()).unwrap(), Some(BlockStatus::Rejected));

        let err = chain.process_block(bad.clone()).unwrap_err();
        assert_eq!(err.code(), "CG801");

        let descendant = child(&bad.header, b"a");
        let err = chain.process_block(descendant).unwrap_err();
        assert_eq!(err.code(), "CG801");
        assert_eq!(chain.best_height(), 0);
    }

    #[test]
    fn test_future_block_is_not_rejected() {
        let (_, chain) = open();
        let genesis = chain.tip().header;
        let reward = vec![OutputTemplate::new(AssetAmount::native(params().block_reward), vec![0x51])];
        let future = Block::new(
            1,
            genesis.hash(),
            now_ms() + 600_000,
            vec![Transaction::coinbase(1, b"a", reward.clone())],
            vec![],
        );

        for _ in 0..2 {
            let err = chain.process_block(future.clone()).unwrap_err();
            assert_eq!(err.code(), "CG723");
            assert!(err.kind().is_retryable());
        }
        assert_eq!(chain.block_status(&future.hash()).unwrap(), None);

        // Its children wait as orphans instead of inheriting a rejection.
        let descendant = child(&future.header, b"a");
        assert_eq!(chain.process_block(descendant).unwrap(), BlockOutcome::Orphan);

        // Same on a side branch.
        extend(&chain, 1, b"main");
        let side = Block::new(
            1,
            genesis.hash(),
            now_ms() + 600_000,
            vec![Transaction::coinbase(1, b"side", reward)],
            vec![],
        );
        assert_eq!(chain.process_block(side.clone()).unwrap_err().code(), "CG723");
        assert_eq!(chain.block_status(&side.hash()).unwrap(), None);
        assert_eq!(chain.best_height(), 1);
    }

    #[test]
    fn test_connected_orphans_are_forgotten() {
        let (_, chain) = open();
        for _ in 0..40 {
            let parent = child(&chain.tip().header, b"a");
            let orphan = child(&parent.header, b"a");
            assert_eq!(chain.process_block(orphan).unwrap(), BlockOutcome::Orphan);
            chain.process_block(parent).unwrap();

            let orphans = chain.orphans.lock();
            assert!(orphans.known.is_empty());
            assert!(orphans.by_parent.is_empty());
            assert!(orphans.order.is_empty());
        }
        assert_eq!(chain.best_height(), 80);
    }

    #[test]
    fn test_orphans_of_rejected_block_rejected() {
        let (_, chain) = open();
        let bad = child_with(&chain.tip().header, b"a", params().block_reward + 1, vec![]);
        let orphan = child(&bad.header, b"a");

        assert_eq!(chain.process_block(orphan.clone()).unwrap(), BlockOutcome::Orphan);
        assert!(chain.process_block(bad).is_err());
        assert_eq!(
            chain.block_status(&orphan.hash()).unwrap(),
            Some(BlockStatus::Rejected)
        );
    }

    // ============ Reorg Tests ============

    #[test]
    fn test_heavier_branch_reorganizes() {
        let (_, chain) = open();
        let genesis = chain.tip().header;
        let main = extend(&chain, 1, b"main");

        let side1 = child(&genesis, b"side");
        assert_eq!(chain.process_block(side1.clone()).unwrap(), BlockOutcome::SideChain);
        assert_eq!(chain.best_hash(), main[0].hash());

        let side2 = child(&side1.header, b"side");
        let outcome = chain.process_block(side2.clone()).unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Reorganized {
                fork_height: 0,
                disconnected: 1,
                connected: 2,
                tip: side2.hash(),
            }
        );

        let old_coinbase = main[0].transactions[0].output_id(0);
        let new_coinbase = side1.transactions[0].output_id(0);
        assert!(chain.utxo_lookup(&old_coinbase).unwrap().is_none());
        assert!(chain.utxo_lookup(&new_coinbase).unwrap().is_some());
        assert_eq!(chain.utxo_count().unwrap(), 3);
        assert_eq!(
            chain.block_status(&main[0].hash()).unwrap(),
            Some(BlockStatus::ValidConnected)
        );
        assert_eq!(chain.block_by_height(1).unwrap(), Some(side1));
    }

    #[test]
    fn test_equal_weight_keeps_first_tip() {
        let (_, chain) = open();
        let genesis = chain.tip().header;
        let main = extend(&chain, 1, b"main");
        let side = child(&genesis, b"side");

        assert_eq!(chain.process_block(side).unwrap(), BlockOutcome::SideChain);
        assert_eq!(chain.best_hash(), main[0].hash());
    }

    #[test]
    fn test_failed_reorg_commit_leaves_state() {
        let (storage, chain) = open();
        let genesis = chain.tip().header;
        let main = extend(&chain, 1, b"main");
        let side1 = child(&genesis, b"side");
        chain.process_block(side1.clone()).unwrap();

        // The side block is stored; the reorg batch fails.
        storage.fail_batches_after(1);
        let side2 = child(&side1.header, b"side");
        let err = chain.process_block(side2.clone()).unwrap_err();
        assert_eq!(err.code(), "CG806");
        assert_eq!(chain.best_hash(), main[0].hash());
        assert!(chain
            .utxo_lookup(&main[0].transactions[0].output_id(0))
            .unwrap()
            .is_some());
        assert_eq!(chain.utxo_count().unwrap(), 2);

        storage.clear_failures();
        let side3 = child(&side2.header, b"side");
        assert!(matches!(
            chain.process_block(side3.clone()).unwrap(),
            BlockOutcome::Reorganized { connected: 3, .. }
        ));
        assert_eq!(chain.best_hash(), side3.hash());
    }

    // ============ Finality Tests ============

    fn validator_key() -> SigningKey {
        SigningKey::from_bytes(&[7; 32])
    }

    fn finality_params() -> NetworkParams {
        let mut params = params();
        params.blocks_of_epoch = 2;
        params.validators = vec![Validator {
            pubkey: hex::encode(validator_key().verifying_key().to_bytes()),
            stake: params.min_validator_vote_num,
        }];
        params
    }

    fn vote(height: u64, hash: BlockHash) -> FinalityVote {
        let key = validator_key();
        FinalityVote {
            validator: key.verifying_key().to_bytes(),
            target_height: height,
            target_hash: hash,
            signature: key
                .sign(&FinalityVote::message(height, &hash).0)
                .to_bytes()
                .to_vec(),
        }
    }

    #[test]
    fn test_votes_finalize_and_bound_reorgs() {
        let (_, chain) = open_with(finality_params());
        let genesis = chain.tip().header;
        let blocks = extend(&chain, 2, b"main");

        let checkpoint = blocks[1].hash();
        let voting = child_with(
            &blocks[1].header,
            b"main",
            params().block_reward,
            vec![vote(2, checkpoint)],
        );
        chain.process_block(voting).unwrap();
        assert_eq!(chain.finalized_height(), 2);
        assert_eq!(
            chain.block_status(&blocks[0].hash()).unwrap(),
            Some(BlockStatus::Finalized)
        );

        let late = child(&genesis, b"side");
        let err = chain.process_block(late).unwrap_err();
        assert_eq!(err.code(), "CG802");
        assert_eq!(chain.best_height(), 3);
    }

    // ============ Abandonment Tests ============

    #[test]
    fn test_abandoned_block_leaves_no_trace() {
        let (_, chain) = open();
        extend(&chain, 10, b"a");
        let genesis = genesis_block(chain.params()).unwrap();
        let supply_id = genesis.transactions[0].output_id(0);
        let supply = chain.params().init_supply;
        let spend = Transaction::new(
            vec![TxInput::spend(supply_id, AssetAmount::native(supply), vec![0x51], vec![])],
            vec![OutputTemplate::new(AssetAmount::native(supply - 200 * 10_000), vec![0x51])],
        );
        let tip = chain.tip();
        let height = tip.height() + 1;
        let coinbase = Transaction::coinbase(
            height,
            b"a",
            vec![OutputTemplate::new(AssetAmount::native(params().block_reward), vec![0x51])],
        );
        let block = Block::new(height, tip.hash, tip.header.timestamp + 6_000, vec![coinbase, spend], vec![]);

        let cancel = chain.cancel_handle();
        let err = {
            let mut inner = chain.inner.lock();
            cancel.store(true, Ordering::SeqCst);
            chain.extend(&mut inner, block.clone()).unwrap_err()
        };
        assert!(matches!(err, ChainError::Abandoned));
        assert_eq!(chain.tip(), tip);
        assert_eq!(chain.block_status(&block.hash()).unwrap(), None);
        assert!(chain.utxo_lookup(&supply_id).unwrap().is_some());

        // The next attempt starts with a cleared flag.
        assert_eq!(
            chain.process_block(block.clone()).unwrap(),
            BlockOutcome::Extended {
                height,
                hash: block.hash()
            }
        );
        assert!(chain.utxo_lookup(&supply_id).unwrap().is_none());
    }

    #[test]
    fn test_only_heavier_known_candidates_preempt() {
        let (_, chain) = open();
        let blocks = extend(&chain, 2, b"a");
        let tip = chain.tip().header;

        assert_eq!(chain.outweighs_in_flight(&child(&tip, b"b")), None);
        *chain.pending.lock() = Some((1, blocks[0].hash()));

        let heavier = child(&tip, b"b");
        assert_eq!(chain.outweighs_in_flight(&heavier), Some(1));

        // Already stored.
        assert_eq!(chain.outweighs_in_flight(&blocks[1]), None);
        // Parent unknown.
        let stray = child(&heavier.header, b"b");
        assert_eq!(chain.outweighs_in_flight(&stray), None);
        // Claims a height its parent cannot support.
        let mut inflated = child(&tip, b"c");
        inflated.header.height = 50;
        assert_eq!(chain.outweighs_in_flight(&inflated), None);
        // Fails context-free checks.
        let empty = Block::new(3, tip.hash(), tip.timestamp + 6_000, vec![], vec![]);
        assert_eq!(chain.outweighs_in_flight(&empty), None);

        // None of these touched the flag.
        assert!(!chain.cancel_handle().load(Ordering::SeqCst));
    }

    // ============ Transaction Tests ============

    #[test]
    fn test_validate_transaction_against_tip() {
        let (_, chain) = open();
        let genesis = genesis_block(chain.params()).unwrap();
        let supply = chain.params().init_supply;
        let fee = 200 * 10_000;
        let tx = Transaction::new(
            vec![TxInput::spend(
                genesis.transactions[0].output_id(0),
                AssetAmount::native(supply),
                vec![0x51],
                vec![],
            )],
            vec![OutputTemplate::new(AssetAmount::native(supply - fee), vec![0x51])],
        );

        let err = chain.validate_transaction(&tx).unwrap_err();
        assert_eq!(err.code(), "CG714");

        extend(&chain, 10, b"a");
        let validated = chain.validate_transaction(&tx).unwrap();
        assert_eq!(validated.fee, fee);
    }

    #[test]
    fn test_validate_block_requires_tip_parent() {
        let (_, chain) = open();
        let genesis = chain.tip().header;
        extend(&chain, 1, b"a");
        let stale = child(&genesis, b"b");
        assert_eq!(chain.validate_block(&stale).unwrap_err().code(), "CG803");

        let next = child(&chain.tip().header, b"a");
        assert_eq!(chain.validate_block(&next).unwrap().height, 2);
        // Validation alone commits nothing.
        assert_eq!(chain.best_height(), 1);
    }
}
