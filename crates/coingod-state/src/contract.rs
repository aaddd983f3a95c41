//! Contract viewpoint: registered contracts and their state history.

use crate::utxo::{block_deltas, UtxoViewpoint};
use crate::{StateError, StateResult};
use coingod_consensus::program::{self, ProgramKind};
use coingod_consensus::{Block, ContractLookup, ContractRecord, Hash, Transaction, TxInput};
use std::collections::{HashMap, HashSet};

/// Working set of contract records, mirroring [`crate::UtxoViewpoint`].
#[derive(Debug, Clone, Default)]
pub struct ContractViewpoint {
    records: HashMap<Hash, ContractRecord>,
    removed: HashSet<Hash>,
}

impl ContractViewpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, hash: &Hash) -> Option<&ContractRecord> {
        self.records.get(hash)
    }

    pub fn insert(&mut self, record: ContractRecord) {
        self.removed.remove(&record.hash);
        self.records.insert(record.hash, record);
    }

    pub fn load<'a>(
        &mut self,
        hashes: impl IntoIterator<Item = &'a Hash>,
        mut base: impl FnMut(&Hash) -> StateResult<Option<ContractRecord>>,
    ) -> StateResult<()> {
        for hash in hashes {
            if self.records.contains_key(hash) || self.removed.contains(hash) {
                continue;
            }
            if let Some(record) = base(hash)? {
                self.records.insert(*hash, record);
            }
        }
        Ok(())
    }

    /// Register the block's contracts and append its state writes.
    pub fn apply_block(&mut self, block: &Block) -> StateResult<()> {
        for delta in block_deltas(block)? {
            for record in delta.registered {
                if self.records.contains_key(&record.hash) {
                    return Err(StateError::ContractDuplicated(record.hash));
                }
                self.insert(record);
            }
            for (hash, state) in delta.state_writes {
                self.records
                    .get_mut(&hash)
                    .ok_or(StateError::ContractNotFound(hash))?
                    .history
                    .push(state);
            }
        }
        Ok(())
    }

    /// Undo [`apply_block`](Self::apply_block): pop state writes, then
    /// unregister, both in reverse order.
    pub fn rollback_block(&mut self, block: &Block) -> StateResult<()> {
        for delta in block_deltas(block)?.into_iter().rev() {
            for (hash, _) in delta.state_writes.iter().rev() {
                let record = self
                    .records
                    .get_mut(hash)
                    .ok_or(StateError::ContractNotFound(*hash))?;
                if record.history.pop().is_none() {
                    return Err(StateError::Corruption(format!(
                        "contract {hash} has no state to roll back"
                    )));
                }
            }
            for record in delta.registered.iter().rev() {
                if self.records.remove(&record.hash).is_none() {
                    return Err(StateError::ContractNotFound(record.hash));
                }
                self.removed.insert(record.hash);
            }
        }
        Ok(())
    }

    /// Records to write and hashes to delete.
    pub fn changes(&self) -> (Vec<&ContractRecord>, Vec<Hash>) {
        (
            self.records.values().collect(),
            self.removed.iter().copied().collect(),
        )
    }
}

/// Contracts a set of transactions may read or write: those their outputs
/// register or lock to, and those locking the outputs they spend.
///
/// Unclassifiable programs are skipped; validation reports them.
pub(crate) fn referenced_contracts(txs: &[Transaction], utxos: &UtxoViewpoint) -> Vec<Hash> {
    let mut hashes = Vec::new();
    let mut note = |program_bytes: &[u8]| match program::classify(program_bytes) {
        Ok(ProgramKind::Contract(hash)) => hashes.push(hash),
        Ok(ProgramKind::Register { code, .. }) => hashes.push(program::contract_hash(code)),
        _ => {}
    };
    for tx in txs {
        for output in &tx.outputs {
            note(&output.control_program);
        }
        for id in tx.inputs.iter().filter_map(TxInput::spent_output_id) {
            if let Some(entry) = utxos.entry(id) {
                note(&entry.control_program);
            }
        }
    }
    hashes
}

impl ContractLookup for ContractViewpoint {
    fn contract(&self, hash: &Hash) -> Option<ContractRecord> {
        self.records.get(hash).cloned()
    }
}

impl PartialEq for ContractViewpoint {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coingod_consensus::program::{contract_hash, locked_by_contract, register_contract};
    use coingod_consensus::{AssetAmount, OutputTemplate};

    fn block_with(outputs: Vec<OutputTemplate>) -> Block {
        let coinbase = Transaction::coinbase(4, b"", outputs);
        Block::new(4, Hash::ZERO, 10, vec![coinbase], vec![])
    }

    fn code() -> Vec<u8> {
        vec![0x75, 0x51]
    }

    #[test]
    fn test_register_and_write() {
        let hash = contract_hash(&code());
        let mut view = ContractViewpoint::new();
        let before = view.clone();

        let b = block_with(vec![
            OutputTemplate::new(AssetAmount::native(100), register_contract(1, &code())),
            OutputTemplate::new(AssetAmount::native(1), locked_by_contract(&hash))
                .with_state(vec![vec![7]]),
        ]);
        view.apply_block(&b).unwrap();

        let record = view.record(&hash).unwrap();
        assert_eq!(record.registered_height, 4);
        assert_eq!(record.current_state(), Some(&[vec![7u8]][..]));

        view.rollback_block(&b).unwrap();
        assert_eq!(view, before);
        assert_eq!(view.changes().1, vec![hash]);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut view = ContractViewpoint::new();
        let b = block_with(vec![OutputTemplate::new(
            AssetAmount::native(100),
            register_contract(1, &code()),
        )]);
        view.apply_block(&b).unwrap();
        assert!(matches!(
            view.apply_block(&b),
            Err(StateError::ContractDuplicated(_))
        ));
    }

    #[test]
    fn test_write_to_unknown_contract() {
        let mut view = ContractViewpoint::new();
        let b = block_with(vec![OutputTemplate::new(
            AssetAmount::native(1),
            locked_by_contract(&Hash([4; 32])),
        )
        .with_state(vec![vec![1]])]);
        assert!(matches!(
            view.apply_block(&b),
            Err(StateError::ContractNotFound(_))
        ));
        assert_eq!(
            referenced_contracts(&b.transactions, &UtxoViewpoint::new()),
            vec![Hash([4; 32])]
        );
    }
}
