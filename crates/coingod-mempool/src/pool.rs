//! Transaction pool with output reservations.
//!
//! Admission works in three steps, behind a per-id claim so a transaction is
//! admitted by at most one caller at a time:
//!
//! 1. Every output the transaction spends is reserved in a `DashMap`. If any
//!    is held by another pooled transaction, the reservations taken so far
//!    are released and admission fails with `Reserved`. Nothing waits.
//! 2. The transaction is validated against the chain's committed tip. A
//!    failure releases the reservations.
//! 3. The transaction enters the fee-per-byte order, and the lowest-priority
//!    entries are evicted while the pool is over its bounds.

use crate::ordering::FeeOrdering;
use crate::{MempoolError, MempoolResult};
use crate::{DEFAULT_MAX_SIZE, DEFAULT_MAX_TXS};
use coingod_consensus::{Block, OutputId, Transaction, TxId, ValidatedTx};
use coingod_state::Chain;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Mempool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum total size in bytes.
    pub max_size: usize,
    /// Maximum number of transactions.
    pub max_transactions: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_transactions: DEFAULT_MAX_TXS,
        }
    }
}

/// Stored transaction in the mempool.
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    pub tx: Transaction,
    /// Validation result at admission.
    pub validated: ValidatedTx,
    /// Pool arrival sequence number.
    pub arrival: u64,
}

impl PooledTransaction {
    pub fn id(&self) -> TxId {
        self.validated.tx_id
    }

    pub fn fee(&self) -> u64 {
        self.validated.fee
    }

    pub fn size(&self) -> usize {
        self.validated.size
    }

    pub fn spent_outputs(&self) -> impl Iterator<Item = &OutputId> {
        self.tx.inputs.iter().filter_map(|i| i.spent_output_id())
    }

    fn ordering(&self) -> FeeOrdering {
        FeeOrdering::new(self.id(), self.fee(), self.size(), self.arrival)
    }
}

/// Mempool statistics.
#[derive(Debug, Clone, Default)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub total_size: usize,
    pub reserved_outputs: usize,
    pub min_fee_per_byte: f64,
    pub max_fee_per_byte: f64,
}

pub struct Mempool {
    config: MempoolConfig,
    chain: Arc<Chain>,
    transactions: DashMap<TxId, PooledTransaction>,
    /// Ids with an admission in flight.
    admitting: DashSet<TxId>,
    /// Output id -> pooled transaction spending it.
    reservations: DashMap<OutputId, TxId>,
    /// Highest priority first. Held for writing whenever `transactions`,
    /// `order` and `total_size` change together.
    order: RwLock<BTreeSet<FeeOrdering>>,
    total_size: RwLock<usize>,
    arrival: AtomicU64,
}

impl Mempool {
    pub fn new(config: MempoolConfig, chain: Arc<Chain>) -> Self {
        Self {
            config,
            chain,
            transactions: DashMap::new(),
            admitting: DashSet::new(),
            reservations: DashMap::new(),
            order: RwLock::new(BTreeSet::new()),
            total_size: RwLock::new(0),
            arrival: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Admit a transaction.
    #[instrument(skip(self, tx), fields(tx_id = %tx.id().short()))]
    pub fn add(&self, tx: Transaction) -> MempoolResult<ValidatedTx> {
        let tx_id = tx.id();
        let _claim = AdmissionClaim::take(&self.admitting, tx_id)?;
        if self.transactions.contains_key(&tx_id) {
            return Err(MempoolError::AlreadyExists(tx_id));
        }

        let size = tx.serialized_size();
        if size > self.config.max_size {
            return Err(MempoolError::TooLarge {
                size,
                max: self.config.max_size,
            });
        }

        let reserved = self.reserve(&tx, tx_id)?;

        let validated = match self.chain.validate_transaction(&tx) {
            Ok(validated) => validated,
            Err(e) => {
                self.release(&reserved, &tx_id);
                debug!(code = e.code(), error = %e, "Transaction failed validation");
                return Err(e.into());
            }
        };

        let pooled = PooledTransaction {
            tx,
            validated: validated.clone(),
            arrival: self.arrival.fetch_add(1, Ordering::SeqCst),
        };
        {
            let mut order = self.order.write();
            order.insert(pooled.ordering());
            *self.total_size.write() += pooled.size();
            self.transactions.insert(tx_id, pooled);
        }

        self.maybe_evict();
        if !self.transactions.contains_key(&tx_id) {
            return Err(MempoolError::Full {
                count: self.transactions.len(),
                size: self.total_size(),
            });
        }

        debug!(
            fee = validated.fee,
            size = validated.size,
            count = self.transactions.len(),
            "Transaction added to mempool"
        );
        Ok(validated)
    }

    /// Reserve every output `tx` spends, or none of them.
    fn reserve(&self, tx: &Transaction, tx_id: TxId) -> MempoolResult<Vec<OutputId>> {
        let mut reserved = Vec::new();
        for output_id in tx.inputs.iter().filter_map(|i| i.spent_output_id()) {
            match self.reservations.entry(*output_id) {
                Entry::Vacant(slot) => {
                    slot.insert(tx_id);
                    reserved.push(*output_id);
                }
                // A repeated input; validation rejects it.
                Entry::Occupied(slot) if *slot.get() == tx_id && reserved.contains(output_id) => {}
                Entry::Occupied(slot) if *slot.get() == tx_id => {
                    drop(slot);
                    self.release(&reserved, &tx_id);
                    return Err(MempoolError::AlreadyExists(tx_id));
                }
                Entry::Occupied(slot) => {
                    let holder = *slot.get();
                    drop(slot);
                    self.release(&reserved, &tx_id);
                    return Err(MempoolError::Reserved {
                        output_id: *output_id,
                        holder,
                    });
                }
            }
        }
        Ok(reserved)
    }

    fn release<'a>(&self, outputs: impl IntoIterator<Item = &'a OutputId>, holder: &TxId) {
        for output_id in outputs {
            self.reservations.remove_if(output_id, |_, h| h == holder);
        }
    }

    /// Evict lowest-priority transactions while over either bound.
    fn maybe_evict(&self) {
        while self.transactions.len() > self.config.max_transactions
            || self.total_size() > self.config.max_size
        {
            let lowest = self.order.read().iter().next_back().map(|o| o.tx_id);
            let Some(tx_id) = lowest else {
                break;
            };
            if self.remove(&tx_id).is_err() {
                break;
            }
            warn!(tx_id = %tx_id.short(), "Evicted lowest priority transaction");
        }
    }

    /// Remove a transaction and release its reservations.
    pub fn remove(&self, tx_id: &TxId) -> MempoolResult<PooledTransaction> {
        let mut order = self.order.write();
        let (_, pooled) = self
            .transactions
            .remove(tx_id)
            .ok_or(MempoolError::NotFound(*tx_id))?;
        order.remove(&pooled.ordering());
        *self.total_size.write() -= pooled.size();
        self.release(pooled.spent_outputs(), tx_id);
        Ok(pooled)
    }

    /// Drop transactions included in `block` or spending what it spent.
    #[instrument(skip(self, block), fields(height = block.height()))]
    pub fn remove_confirmed(&self, block: &Block) -> usize {
        let mut removed = 0;
        for tx in &block.transactions {
            if self.remove(&tx.id()).is_ok() {
                removed += 1;
            }
            for output_id in tx.inputs.iter().filter_map(|i| i.spent_output_id()) {
                let holder = self.reservations.get(output_id).map(|h| *h);
                if let Some(holder) = holder {
                    if self.remove(&holder).is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        if removed > 0 {
            info!(removed, remaining = self.transactions.len(), "Pruned confirmed transactions");
        }
        removed
    }

    pub fn get(&self, tx_id: &TxId) -> Option<PooledTransaction> {
        self.transactions.get(tx_id).map(|r| r.clone())
    }

    pub fn contains(&self, tx_id: &TxId) -> bool {
        self.transactions.contains_key(tx_id)
    }

    /// Pooled transaction holding `output_id`, if any.
    pub fn reserved_by(&self, output_id: &OutputId) -> Option<TxId> {
        self.reservations.get(output_id).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn total_size(&self) -> usize {
        *self.total_size.read()
    }

    /// Up to `limit` transactions, highest priority first.
    pub fn by_priority(&self, limit: usize) -> Vec<PooledTransaction> {
        let order = self.order.read();
        order
            .iter()
            .take(limit)
            .filter_map(|o| self.get(&o.tx_id))
            .collect()
    }

    pub fn stats(&self) -> MempoolStats {
        let order = self.order.read();
        MempoolStats {
            tx_count: self.transactions.len(),
            total_size: self.total_size(),
            reserved_outputs: self.reservations.len(),
            max_fee_per_byte: order.iter().next().map_or(0.0, FeeOrdering::fee_per_byte),
            min_fee_per_byte: order.iter().next_back().map_or(0.0, FeeOrdering::fee_per_byte),
        }
    }

    pub fn clear(&self) {
        let mut order = self.order.write();
        self.transactions.clear();
        self.reservations.clear();
        order.clear();
        *self.total_size.write() = 0;
    }
}

/// Exclusive right to admit one transaction id, released on drop.
struct AdmissionClaim<'a> {
    admitting: &'a DashSet<TxId>,
    tx_id: TxId,
}

impl<'a> AdmissionClaim<'a> {
    fn take(admitting: &'a DashSet<TxId>, tx_id: TxId) -> MempoolResult<Self> {
        if !admitting.insert(tx_id) {
            return Err(MempoolError::AlreadyExists(tx_id));
        }
        Ok(Self { admitting, tx_id })
    }
}

impl Drop for AdmissionClaim<'_> {
    fn drop(&mut self) {
        self.admitting.remove(&self.tx_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coingod_consensus::{genesis_block, AssetAmount, NetworkParams, OutputTemplate, TxInput};
    use coingod_storage::MemoryStorage;

    const FEE: u64 = 200 * 10_000;

    fn params() -> NetworkParams {
        let mut params = NetworkParams::solonet();
        params.genesis_program = "51".into();
        params
    }

    /// A chain where the genesis output and the first two coinbases are mature.
    fn chain() -> Arc<Chain> {
        let chain = Chain::open(Arc::new(MemoryStorage::new()), params()).unwrap();
        for _ in 0..12 {
            let parent = chain.tip().header;
            let height = parent.height + 1;
            let coinbase = Transaction::coinbase(
                height,
                b"",
                vec![OutputTemplate::new(AssetAmount::native(params().block_reward), vec![0x51])],
            );
            let block = Block::new(height, parent.hash(), parent.timestamp + 6_000, vec![coinbase], vec![]);
            chain.process_block(block).unwrap();
        }
        Arc::new(chain)
    }

    fn coinbase_output(chain: &Chain, height: u64) -> (OutputId, u64) {
        let block = chain.block_by_height(height).unwrap().unwrap();
        let tx = &block.transactions[0];
        (tx.output_id(0), tx.outputs[0].value().amount)
    }

    fn spend(output: (OutputId, u64), fee: u64, tag: u8) -> Transaction {
        let (id, amount) = output;
        Transaction::new(
            vec![TxInput::spend(id, AssetAmount::native(amount), vec![0x51], vec![])],
            vec![OutputTemplate::new(
                AssetAmount::native(amount - fee),
                vec![0x51, 0x51, 0x75 + tag % 2],
            )],
        )
    }

    fn pool(config: MempoolConfig) -> (Arc<Chain>, Mempool) {
        let chain = chain();
        let mempool = Mempool::new(config, chain.clone());
        (chain, mempool)
    }

    // ============ Admission Tests ============

    #[test]
    fn test_add_reserves_outputs() {
        let (chain, mempool) = pool(MempoolConfig::default());
        let output = coinbase_output(&chain, 1);
        let tx = spend(output, FEE, 0);

        let validated = mempool.add(tx.clone()).unwrap();
        assert_eq!(validated.fee, FEE);
        assert!(mempool.contains(&tx.id()));
        assert_eq!(mempool.reserved_by(&output.0), Some(tx.id()));

        let err = mempool.add(tx).unwrap_err();
        assert!(matches!(err, MempoolError::AlreadyExists(_)));
    }

    #[test]
    fn test_conflicting_spend_fails_fast() {
        let (chain, mempool) = pool(MempoolConfig::default());
        let output = coinbase_output(&chain, 1);
        let first = spend(output, FEE, 0);
        let second = spend(output, FEE * 2, 1);

        mempool.add(first.clone()).unwrap();
        let err = mempool.add(second).unwrap_err();
        assert_eq!(err.code(), Some("CG702"));
        assert!(err.kind().is_retryable());
        assert_eq!(mempool.reserved_by(&output.0), Some(first.id()));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_invalid_transaction_releases_reservations() {
        let (chain, mempool) = pool(MempoolConfig::default());
        let (id, amount) = coinbase_output(&chain, 1);
        let overspend = Transaction::new(
            vec![TxInput::spend(id, AssetAmount::native(amount), vec![0x51], vec![])],
            vec![OutputTemplate::new(AssetAmount::native(amount + 1), vec![0x51])],
        );

        let err = mempool.add(overspend).unwrap_err();
        assert_eq!(err.code(), Some("CG746"));
        assert!(mempool.reserved_by(&id).is_none());
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_immature_coinbase_rejected() {
        let (chain, mempool) = pool(MempoolConfig::default());
        let recent = coinbase_output(&chain, 12);
        let err = mempool.add(spend(recent, FEE, 0)).unwrap_err();
        assert_eq!(err.code(), Some("CG714"));
    }

    #[test]
    fn test_concurrent_admission_of_same_transaction() {
        use std::sync::Barrier;

        let (chain, mempool) = pool(MempoolConfig::default());
        let outputs = [coinbase_output(&chain, 1), coinbase_output(&chain, 2)];

        for round in 0..50u8 {
            let tx = spend(outputs[usize::from(round % 2)], FEE + u64::from(round), round);
            let barrier = Barrier::new(4);
            let accepted = std::thread::scope(|s| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            mempool.add(tx.clone())
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|r| {
                        if let Err(e) = r {
                            assert!(matches!(e, MempoolError::AlreadyExists(_)), "{e}");
                        }
                        r.is_ok()
                    })
                    .count()
            });

            assert_eq!(accepted, 1, "round {round}");
            assert_eq!(mempool.len(), 1);
            assert_eq!(mempool.total_size(), tx.serialized_size());
            assert_eq!(mempool.by_priority(10).len(), 1);

            mempool.remove(&tx.id()).unwrap();
            assert_eq!(mempool.total_size(), 0);
            assert_eq!(mempool.stats().max_fee_per_byte, 0.0);
            assert!(mempool.reserved_by(&outputs[usize::from(round % 2)].0).is_none());
        }
    }

    // ============ Ordering Tests ============

    #[test]
    fn test_priority_order_and_eviction() {
        let config = MempoolConfig {
            max_transactions: 2,
            ..Default::default()
        };
        let (chain, mempool) = pool(config);
        let low = spend(coinbase_output(&chain, 1), FEE, 0);
        let high = spend(coinbase_output(&chain, 2), FEE * 3, 0);
        let genesis = genesis_block(chain.params()).unwrap();
        let supply = (genesis.transactions[0].output_id(0), chain.params().init_supply);
        let mid = spend(supply, FEE * 2, 0);

        mempool.add(low.clone()).unwrap();
        mempool.add(high.clone()).unwrap();
        let ids: Vec<_> = mempool.by_priority(10).iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![high.id(), low.id()]);

        // A third transaction pushes out the lowest.
        mempool.add(mid.clone()).unwrap();
        assert_eq!(mempool.len(), 2);
        assert!(!mempool.contains(&low.id()));
        assert!(mempool.reserved_by(&coinbase_output(&chain, 1).0).is_none());

        // And one ranking below everything is refused.
        let cheaper = spend(coinbase_output(&chain, 1), FEE / 2, 0);
        assert!(matches!(
            mempool.add(cheaper),
            Err(MempoolError::Full { .. })
        ));
    }

    // ============ Confirmation Tests ============

    #[test]
    fn test_remove_confirmed_drops_included_and_conflicting() {
        let (chain, mempool) = pool(MempoolConfig::default());
        let output = coinbase_output(&chain, 1);
        let pooled = spend(output, FEE, 0);
        let competing = spend(output, FEE * 2, 1);
        let other = spend(coinbase_output(&chain, 2), FEE, 0);
        mempool.add(pooled.clone()).unwrap();
        mempool.add(other.clone()).unwrap();

        let tip = chain.tip().header;
        let coinbase = Transaction::coinbase(tip.height + 1, b"", vec![]);
        let block = Block::new(
            tip.height + 1,
            tip.hash(),
            tip.timestamp + 6_000,
            vec![coinbase, competing, other.clone()],
            vec![],
        );

        assert_eq!(mempool.remove_confirmed(&block), 2);
        assert!(mempool.is_empty());
        assert!(mempool.reserved_by(&output.0).is_none());
        assert_eq!(mempool.total_size(), 0);
    }
}
