//! Transaction validation with input resolution and program execution.
//!
//! This module provides full transaction validation including:
//! - Structural checks (version, size, time range, value flow)
//! - Input resolution against a `UtxoLookup`, with maturity
//! - Per-asset balance and fee limits
//! - Gas purchase and program execution for every spend input
//! - Contract registration and state-schema rules
//!
//! Checks run in a fixed order and the first failure is returned, so the
//! same transaction against the same state always fails with the same code.

use crate::cost::GasState;
use crate::error::{ValidationError, ValidationResult};
use crate::hash::{AssetId, Hash, TxId};
use crate::ledger::{ContractLookup, StateDelta, UtxoEntry, UtxoLookup};
use crate::params::NetworkParams;
use crate::program::{self, ProgramKind};
use crate::transaction::{Transaction, TxInput, TX_VERSION};
use coingod_vm::crypto::sha3_256;
use coingod_vm::{ExecutionContext, VirtualMachine, VmConfig, VmError, VM_VERSION};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, instrument};

/// The block a transaction is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    /// Block timestamp in milliseconds.
    pub timestamp: u64,
}

/// An accepted transaction and what it changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTx {
    pub tx_id: TxId,
    /// Native surplus of inputs over outputs. Zero for a coinbase.
    pub fee: u64,
    pub vm_gas: u64,
    pub storage_gas: u64,
    pub size: usize,
    pub delta: StateDelta,
}

impl ValidatedTx {
    pub fn gas_used(&self) -> u64 {
        self.vm_gas + self.storage_gas
    }
}

/// Validates transactions under one set of network parameters.
#[derive(Debug, Clone)]
pub struct TxValidator<'a> {
    params: &'a NetworkParams,
    vm: VirtualMachine,
}

impl<'a> TxValidator<'a> {
    pub fn new(params: &'a NetworkParams) -> Self {
        let vm = VirtualMachine::new(VmConfig {
            max_program_len: params.max_program_len,
            vm_version: VM_VERSION,
        });
        Self { params, vm }
    }

    pub fn params(&self) -> &NetworkParams {
        self.params
    }

    /// Validate a regular (non-coinbase) transaction.
    #[instrument(skip_all, fields(tx_id = %tx.id().short(), height = ctx.height))]
    pub fn validate(
        &self,
        tx: &Transaction,
        ctx: &BlockContext,
        utxos: &dyn UtxoLookup,
        contracts: &dyn ContractLookup,
    ) -> ValidationResult<ValidatedTx> {
        self.check_version(tx)?;
        let size = self.check_size(tx)?;
        check_time_range(tx, ctx)?;
        if tx.inputs.is_empty() {
            return Err(ValidationError::MissingField("inputs"));
        }
        if tx.is_coinbase() {
            return Err(ValidationError::WrongCoinbaseTransaction(
                "coinbase input outside the first transaction",
            ));
        }
        check_value_flow(tx)?;

        let spent = self.resolve_inputs(tx, ctx, utxos)?;
        let fee = self.check_balance(tx, &spent)?;
        self.check_contract_outputs(tx, contracts)?;

        let mut gas = GasState::from_fee(fee, self.params);
        for (index, entry) in spent.iter().enumerate() {
            let limit = gas.run_limit(index)?;
            let used = self.run_input(tx, index, entry, ctx, contracts, limit)?;
            gas.consume(used);
        }
        gas.charge_storage(size, self.params)?;

        let delta = StateDelta::of_transaction(tx, ctx.height)?;
        debug!(fee, gas_used = gas.gas_used(), "transaction valid");

        Ok(ValidatedTx {
            tx_id: tx.id(),
            fee,
            vm_gas: gas.vm_gas(),
            storage_gas: gas.storage_gas(),
            size,
            delta,
        })
    }

    /// Validate the shape of a block's coinbase.
    ///
    /// The reward bound needs the block's fees and is checked separately
    /// by [`TxValidator::check_coinbase_reward`].
    pub fn validate_coinbase(
        &self,
        tx: &Transaction,
        ctx: &BlockContext,
        contracts: &dyn ContractLookup,
    ) -> ValidationResult<ValidatedTx> {
        self.check_version(tx)?;
        let size = self.check_size(tx)?;

        let arbitrary = match tx.inputs.as_slice() {
            [TxInput::Coinbase { arbitrary }] => arbitrary,
            _ => {
                return Err(ValidationError::WrongCoinbaseTransaction(
                    "coinbase must have exactly one coinbase input",
                ))
            }
        };
        if arbitrary.len() > self.params.coinbase_arbitrary_limit {
            return Err(ValidationError::CoinbaseArbitraryOversize {
                len: arbitrary.len(),
                max: self.params.coinbase_arbitrary_limit,
            });
        }

        check_value_flow(tx)?;
        for (index, output) in tx.outputs.iter().enumerate() {
            if !output.value().asset_id.is_native() {
                return Err(ValidationError::WrongCoinbaseAsset { index });
            }
        }
        coinbase_total(tx)?;
        self.check_contract_outputs(tx, contracts)?;

        Ok(ValidatedTx {
            tx_id: tx.id(),
            fee: 0,
            vm_gas: 0,
            storage_gas: 0,
            size,
            delta: StateDelta::of_transaction(tx, ctx.height)?,
        })
    }

    /// Coinbase outputs may not exceed the block reward plus `fees`.
    pub fn check_coinbase_reward(&self, tx: &Transaction, fees: u64) -> ValidationResult<()> {
        let total = coinbase_total(tx)?;
        let allowed = self
            .params
            .block_reward
            .checked_add(fees)
            .ok_or(ValidationError::Overflow)?;
        if total > allowed {
            return Err(ValidationError::Unbalanced {
                asset_id: AssetId::NATIVE,
                inputs: allowed,
                outputs: total,
            });
        }
        Ok(())
    }

    fn check_version(&self, tx: &Transaction) -> ValidationResult<()> {
        if tx.version == 0 || tx.version > TX_VERSION {
            return Err(ValidationError::TxVersion {
                version: tx.version,
            });
        }
        Ok(())
    }

    fn check_size(&self, tx: &Transaction) -> ValidationResult<usize> {
        let size = tx.serialized_size();
        if size == 0 || size > self.params.max_tx_size {
            return Err(ValidationError::WrongTransactionSize {
                size,
                max: self.params.max_tx_size,
            });
        }
        Ok(size)
    }

    fn resolve_inputs(
        &self,
        tx: &Transaction,
        ctx: &BlockContext,
        utxos: &dyn UtxoLookup,
    ) -> ValidationResult<Vec<UtxoEntry>> {
        let mut seen = HashSet::new();
        let mut spent = Vec::with_capacity(tx.inputs.len());

        for (index, input) in tx.inputs.iter().enumerate() {
            let TxInput::Spend {
                output_id,
                value,
                control_program,
                ..
            } = input
            else {
                return Err(ValidationError::MissingField("spend input"));
            };

            if !seen.insert(*output_id) {
                return Err(ValidationError::AlreadySpent {
                    output_id: *output_id,
                });
            }
            let entry = utxos
                .utxo(output_id)
                .ok_or(ValidationError::OrphanInput {
                    index,
                    output_id: *output_id,
                })?;
            if entry.spent {
                return Err(ValidationError::AlreadySpent {
                    output_id: *output_id,
                });
            }
            if !entry.is_mature(ctx.height, self.params.coinbase_pending_blocks) {
                return Err(ValidationError::Immature {
                    output_id: *output_id,
                    depth: ctx.height.saturating_sub(entry.block_height),
                    required: self.params.coinbase_pending_blocks,
                });
            }

            if value.asset_id != entry.asset_id {
                return Err(ValidationError::MismatchedAssetId {
                    index,
                    got: value.asset_id,
                    expected: entry.asset_id,
                });
            }
            if value.amount != entry.amount {
                return Err(ValidationError::MismatchedValue {
                    index,
                    got: value.amount,
                    expected: entry.amount,
                });
            }
            if *control_program != entry.control_program {
                return Err(ValidationError::MismatchedProgram { index });
            }
            spent.push(entry);
        }
        Ok(spent)
    }

    /// Check per-asset balance and return the native fee.
    fn check_balance(&self, tx: &Transaction, spent: &[UtxoEntry]) -> ValidationResult<u64> {
        let mut sums: BTreeMap<AssetId, (u64, u64)> = BTreeMap::new();
        for entry in spent {
            let sum = sums.entry(entry.asset_id).or_default();
            sum.0 = sum.0.checked_add(entry.amount).ok_or(ValidationError::Overflow)?;
        }
        for output in &tx.outputs {
            let value = output.value();
            let sum = sums.entry(value.asset_id).or_default();
            sum.1 = sum.1.checked_add(value.amount).ok_or(ValidationError::Overflow)?;
        }

        for (asset_id, &(inputs, outputs)) in sums.iter().filter(|(id, _)| !id.is_native()) {
            if inputs == 0 && outputs > 0 {
                return Err(ValidationError::NoSource {
                    asset_id: *asset_id,
                });
            }
            if inputs != outputs {
                return Err(ValidationError::Unbalanced {
                    asset_id: *asset_id,
                    inputs,
                    outputs,
                });
            }
        }

        let (inputs, outputs) = sums.get(&AssetId::NATIVE).copied().unwrap_or_default();
        if outputs > inputs {
            return Err(ValidationError::Unbalanced {
                asset_id: AssetId::NATIVE,
                inputs,
                outputs,
            });
        }
        let fee = inputs - outputs;
        if fee > self.params.max_fee {
            return Err(ValidationError::FeeOverLimit {
                fee,
                max: self.params.max_fee,
            });
        }
        Ok(fee)
    }

    fn check_contract_outputs(
        &self,
        tx: &Transaction,
        contracts: &dyn ContractLookup,
    ) -> ValidationResult<()> {
        // Registrations earlier in this transaction, hash -> state cells.
        let mut registered: HashMap<Hash, u8> = HashMap::new();

        for output in &tx.outputs {
            match program::classify(&output.control_program)? {
                ProgramKind::Register { state_cells, code } => {
                    let hash = program::contract_hash(code);
                    if registered.contains_key(&hash) || contracts.contract(&hash).is_some() {
                        return Err(ValidationError::ContractDuplicated(hash));
                    }
                    let value = output.value();
                    let amount = if value.asset_id.is_native() {
                        value.amount
                    } else {
                        0
                    };
                    if amount < self.params.bcrp_required_amount {
                        return Err(ValidationError::BcrpAmount {
                            amount,
                            required: self.params.bcrp_required_amount,
                        });
                    }
                    registered.insert(hash, state_cells);
                }
                ProgramKind::Contract(hash) => {
                    let cells = match registered.get(&hash) {
                        Some(cells) => *cells,
                        None => contracts
                            .contract(&hash)
                            .map(|record| record.state_cells)
                            .ok_or(ValidationError::ContractNotFound(hash))?,
                    };
                    if output.state_data.len() != cells as usize {
                        return Err(ValidationError::StateSchemaMismatch {
                            contract: hash,
                            expected: cells as usize,
                            got: output.state_data.len(),
                        });
                    }
                }
                _ if !output.state_data.is_empty() => {
                    return Err(ValidationError::NotStandard(
                        "state data outside a contract output",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Run the unlocking program of input `index`, returning the gas used.
    fn run_input(
        &self,
        tx: &Transaction,
        index: usize,
        entry: &UtxoEntry,
        ctx: &BlockContext,
        contracts: &dyn ContractLookup,
        limit: u64,
    ) -> ValidationResult<u64> {
        let TxInput::Spend { arguments, .. } = &tx.inputs[index] else {
            return Err(ValidationError::MissingField("spend input"));
        };
        let context = InputContext::new(tx, index, entry, ctx.height);
        let vm_error = |source: VmError| ValidationError::Vm { index, source };

        let execution = match program::classify(&entry.control_program)? {
            ProgramKind::PayToPubkeyHash(hash) => {
                let unlock = program::pubkey_hash_unlock(hash);
                self.vm.run(&unlock, arguments, limit, &context)
            }
            ProgramKind::PayToScriptHash(hash) => {
                let (script, rest) = arguments.split_last().ok_or(vm_error(
                    VmError::DataStackUnderflow {
                        required: 1,
                        available: 0,
                    },
                ))?;
                if sha3_256(script)[..] != *hash {
                    return Err(vm_error(VmError::VerifyFailed));
                }
                self.vm.run(script, rest, limit, &context)
            }
            ProgramKind::Contract(hash) => {
                let record = contracts
                    .contract(&hash)
                    .ok_or(ValidationError::ContractNotFound(hash))?;
                let mut stack = entry.state_data.clone();
                stack.extend(arguments.iter().cloned());
                self.vm.run(&record.code, &stack, limit, &context)
            }
            ProgramKind::Register { .. } | ProgramKind::Retirement => {
                return Err(ValidationError::NotStandard("output is not spendable"));
            }
            ProgramKind::Raw => self.vm.run(&entry.control_program, arguments, limit, &context),
        }
        .map_err(vm_error)?;

        Ok(execution.gas_used)
    }
}

fn check_time_range(tx: &Transaction, ctx: &BlockContext) -> ValidationResult<()> {
    if tx.time_range != 0 && tx.time_range < ctx.timestamp {
        return Err(ValidationError::TimeRange {
            time_range: tx.time_range,
            timestamp: ctx.timestamp,
        });
    }
    Ok(())
}

/// Outputs must be sourced from this transaction's inputs at their own
/// position, which stops them being replayed into another transaction.
fn check_value_flow(tx: &Transaction) -> ValidationResult<()> {
    if tx.outputs.is_empty() {
        return Err(ValidationError::EmptyResults);
    }
    let mux_id = tx.mux_id();
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.source.mux_id != mux_id {
            return Err(ValidationError::MismatchedReference {
                index,
                got: output.source.mux_id,
                expected: mux_id,
            });
        }
        if output.source.position != index as u64 {
            return Err(ValidationError::MismatchedPosition {
                index,
                position: output.source.position,
            });
        }
        if output.control_program.is_empty() {
            return Err(ValidationError::MissingField("control program"));
        }
    }
    Ok(())
}

fn coinbase_total(tx: &Transaction) -> ValidationResult<u64> {
    tx.outputs.iter().try_fold(0u64, |total, output| {
        total
            .checked_add(output.value().amount)
            .ok_or(ValidationError::Overflow)
    })
}

/// Execution context for the program of one spend input.
pub struct InputContext<'a> {
    tx: &'a Transaction,
    index: usize,
    entry: &'a UtxoEntry,
    height: u64,
    sig_hash: Option<Hash>,
}

impl<'a> InputContext<'a> {
    pub fn new(tx: &'a Transaction, index: usize, entry: &'a UtxoEntry, height: u64) -> Self {
        Self {
            tx,
            index,
            entry,
            height,
            sig_hash: tx.sig_hash(index),
        }
    }
}

impl ExecutionContext for InputContext<'_> {
    fn tx_sig_hash(&self) -> Option<[u8; 32]> {
        self.sig_hash.map(|h| h.0)
    }

    fn block_height(&self) -> Option<u64> {
        Some(self.height)
    }

    fn asset_id(&self) -> Option<[u8; 32]> {
        Some(self.entry.asset_id.0)
    }

    fn amount(&self) -> Option<u64> {
        Some(self.entry.amount)
    }

    fn program(&self) -> Option<Vec<u8>> {
        Some(self.entry.control_program.clone())
    }

    fn input_index(&self) -> Option<u64> {
        Some(self.index as u64)
    }

    fn entry_id(&self) -> Option<[u8; 32]> {
        self.tx.inputs.get(self.index).map(|input| input.entry_id().0)
    }

    fn output_id(&self) -> Option<[u8; 32]> {
        Some(self.entry.output_id.0)
    }

    fn check_output(
        &self,
        index: u64,
        amount: u64,
        asset_id: &[u8],
        vm_version: u64,
        program: &[u8],
    ) -> Option<bool> {
        let matches = usize::try_from(index)
            .ok()
            .and_then(|i| self.tx.outputs.get(i))
            .map_or(false, |output| {
                let value = output.value();
                value.amount == amount
                    && value.asset_id.0[..] == *asset_id
                    && vm_version == VM_VERSION
                    && output.control_program == program
            });
        Some(matches)
    }
}
