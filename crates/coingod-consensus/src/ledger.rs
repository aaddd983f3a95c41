//! Ledger records shared by the validator and the state layer.
//!
//! The validator never touches storage. It reads through `UtxoLookup` and
//! `ContractLookup`, which the chain implements over its committed viewpoint
//! and which tests implement over plain maps.

use crate::codec::{CodecResult, Decode, Encode};
use crate::error::ValidationResult;
use crate::hash::{AssetId, Hash, OutputId};
use crate::program::{self, ProgramKind};
use crate::transaction::{AssetAmount, Transaction, TxOutput};
use std::collections::HashMap;

/// One output in the UTXO set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output_id: OutputId,
    pub asset_id: AssetId,
    pub amount: u64,
    pub control_program: Vec<u8>,
    pub state_data: Vec<Vec<u8>>,
    pub block_height: u64,
    pub is_coinbase: bool,
    pub spent: bool,
}

impl UtxoEntry {
    /// Unspent entry for `output` created at `block_height`.
    pub fn from_output(
        output_id: OutputId,
        output: &TxOutput,
        block_height: u64,
        is_coinbase: bool,
    ) -> Self {
        Self {
            output_id,
            asset_id: output.source.value.asset_id,
            amount: output.source.value.amount,
            control_program: output.control_program.clone(),
            state_data: output.state_data.clone(),
            block_height,
            is_coinbase,
            spent: false,
        }
    }

    pub fn value(&self) -> AssetAmount {
        AssetAmount::new(self.asset_id, self.amount)
    }

    /// Whether a coinbase entry may be spent in a block at `height`.
    pub fn is_mature(&self, height: u64, pending_blocks: u64) -> bool {
        !self.is_coinbase || height.saturating_sub(self.block_height) >= pending_blocks
    }
}

impl Encode for UtxoEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        self.output_id.encode(out);
        self.asset_id.encode(out);
        self.amount.encode(out);
        self.control_program.encode(out);
        self.state_data.encode(out);
        self.block_height.encode(out);
        self.is_coinbase.encode(out);
        self.spent.encode(out);
    }
}

impl Decode for UtxoEntry {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            output_id: Hash::decode(input)?,
            asset_id: AssetId::decode(input)?,
            amount: u64::decode(input)?,
            control_program: Vec::decode(input)?,
            state_data: Vec::decode(input)?,
            block_height: u64::decode(input)?,
            is_coinbase: bool::decode(input)?,
            spent: bool::decode(input)?,
        })
    }
}

/// A registered contract and the state vectors written to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    /// SHA3-256 of `code`.
    pub hash: Hash,
    pub code: Vec<u8>,
    /// Number of cells every state vector carries.
    pub state_cells: u8,
    pub registered_height: u64,
    /// State vectors in the order they were written, oldest first.
    pub history: Vec<Vec<Vec<u8>>>,
}

impl ContractRecord {
    pub fn new(hash: Hash, code: Vec<u8>, state_cells: u8, registered_height: u64) -> Self {
        Self {
            hash,
            code,
            state_cells,
            registered_height,
            history: Vec::new(),
        }
    }

    /// Most recent state vector.
    pub fn current_state(&self) -> Option<&[Vec<u8>]> {
        self.history.last().map(Vec::as_slice)
    }
}

impl Encode for ContractRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        self.hash.encode(out);
        self.code.encode(out);
        self.state_cells.encode(out);
        self.registered_height.encode(out);
        self.history.encode(out);
    }
}

impl Decode for ContractRecord {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            hash: Hash::decode(input)?,
            code: Vec::decode(input)?,
            state_cells: u8::decode(input)?,
            registered_height: u64::decode(input)?,
            history: Vec::decode(input)?,
        })
    }
}

/// Read access to outputs, spent ones included.
pub trait UtxoLookup {
    fn utxo(&self, output_id: &OutputId) -> Option<UtxoEntry>;
}

/// Read access to registered contracts.
pub trait ContractLookup {
    fn contract(&self, hash: &Hash) -> Option<ContractRecord>;
}

impl UtxoLookup for HashMap<OutputId, UtxoEntry> {
    fn utxo(&self, output_id: &OutputId) -> Option<UtxoEntry> {
        self.get(output_id).cloned()
    }
}

impl ContractLookup for HashMap<Hash, ContractRecord> {
    fn contract(&self, hash: &Hash) -> Option<ContractRecord> {
        self.get(hash).cloned()
    }
}

impl<T: UtxoLookup + ?Sized> UtxoLookup for &T {
    fn utxo(&self, output_id: &OutputId) -> Option<UtxoEntry> {
        (**self).utxo(output_id)
    }
}

impl<T: ContractLookup + ?Sized> ContractLookup for &T {
    fn contract(&self, hash: &Hash) -> Option<ContractRecord> {
        (**self).contract(hash)
    }
}

/// Changes one transaction makes to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    /// Outputs consumed, in input order.
    pub spent: Vec<OutputId>,
    /// Spendable outputs created, in output order.
    pub created: Vec<UtxoEntry>,
    /// Contracts registered.
    pub registered: Vec<ContractRecord>,
    /// State vectors appended, as (contract, state).
    pub state_writes: Vec<(Hash, Vec<Vec<u8>>)>,
}

impl StateDelta {
    /// Delta of `tx` when included at `height`.
    ///
    /// Registration and retirement outputs are not spendable and never
    /// enter the UTXO set.
    pub fn of_transaction(tx: &Transaction, height: u64) -> ValidationResult<Self> {
        let tx_id = tx.id();
        let is_coinbase = tx.is_coinbase();
        let mut delta = StateDelta {
            spent: tx.inputs.iter().filter_map(|i| i.spent_output_id().copied()).collect(),
            ..Default::default()
        };

        for (index, output) in tx.outputs.iter().enumerate() {
            let kind = program::classify(&output.control_program)?;
            match kind {
                ProgramKind::Register { state_cells, code } => {
                    delta.registered.push(ContractRecord::new(
                        program::contract_hash(code),
                        code.to_vec(),
                        state_cells,
                        height,
                    ));
                }
                ProgramKind::Contract(hash) => {
                    delta.state_writes.push((hash, output.state_data.clone()));
                }
                _ => {}
            }
            if kind.is_spendable() {
                let output_id = crate::transaction::output_id(&tx_id, index as u64);
                delta
                    .created
                    .push(UtxoEntry::from_output(output_id, output, height, is_coinbase));
            }
        }
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(is_coinbase: bool, block_height: u64) -> UtxoEntry {
        UtxoEntry {
            output_id: Hash([7; 32]),
            asset_id: AssetId::NATIVE,
            amount: 50,
            control_program: vec![0x51],
            state_data: vec![vec![1, 2]],
            block_height,
            is_coinbase,
            spent: false,
        }
    }

    #[test]
    fn test_maturity() {
        assert!(entry(false, 5).is_mature(5, 10));
        assert!(!entry(true, 5).is_mature(14, 10));
        assert!(entry(true, 5).is_mature(15, 10));
    }

    #[test]
    fn test_entry_codec() {
        let mut e = entry(true, 3);
        e.spent = true;
        assert_eq!(UtxoEntry::from_bytes(&e.to_bytes()).unwrap(), e);
    }

    #[test]
    fn test_contract_state() {
        let mut record = ContractRecord::new(Hash([1; 32]), vec![0x51], 2, 9);
        assert!(record.current_state().is_none());
        record.history.push(vec![vec![1], vec![2]]);
        record.history.push(vec![vec![3], vec![4]]);
        assert_eq!(record.current_state().unwrap(), &[vec![3], vec![4]][..]);
        assert_eq!(ContractRecord::from_bytes(&record.to_bytes()).unwrap(), record);
    }

    #[test]
    fn test_map_lookups() {
        let mut utxos = HashMap::new();
        utxos.insert(Hash([7; 32]), entry(false, 1));
        assert_eq!(utxos.utxo(&Hash([7; 32])).unwrap().amount, 50);
        assert!(utxos.utxo(&Hash::ZERO).is_none());
    }

    #[test]
    fn test_delta_skips_unspendable_outputs() {
        use crate::transaction::{OutputTemplate, TxInput};

        let code = vec![0x51];
        let hash = program::contract_hash(&code);
        let tx = Transaction::new(
            vec![TxInput::spend(
                Hash([7; 32]),
                AssetAmount::native(500),
                vec![0x51],
                vec![],
            )],
            vec![
                OutputTemplate::new(AssetAmount::native(100), program::pay_to_pubkey(&[1; 32])),
                OutputTemplate::new(AssetAmount::native(100), program::register_contract(1, &code)),
                OutputTemplate::new(AssetAmount::native(100), program::retirement(b"x")),
                OutputTemplate::new(AssetAmount::native(100), program::locked_by_contract(&hash))
                    .with_state(vec![vec![5]]),
            ],
        );

        let delta = StateDelta::of_transaction(&tx, 12).unwrap();
        assert_eq!(delta.spent, vec![Hash([7; 32])]);
        assert_eq!(delta.created.len(), 2);
        assert_eq!(delta.created[0].output_id, tx.output_id(0));
        assert_eq!(delta.created[1].output_id, tx.output_id(3));
        assert!(delta.created.iter().all(|e| e.block_height == 12 && !e.is_coinbase));
        assert_eq!(delta.registered.len(), 1);
        assert_eq!(delta.registered[0].hash, hash);
        assert_eq!(delta.state_writes, vec![(hash, vec![vec![5]])]);
    }
}
