//! Full block validation with program execution.
//!
//! This module provides complete block validation including:
//! - Header linkage, version and timestamp window
//! - Body commitment, coinbase shape and finality votes
//! - Transaction validation in block order, with in-block chaining
//! - Block gas accumulation and the coinbase reward bound
//!
//! Validation is pure: state is read through `UtxoLookup` and
//! `ContractLookup`, and the result carries the deltas to apply.

use crate::block::{Block, BlockHeader, BLOCK_VERSION};
use crate::cost::CostAccumulator;
use crate::error::{ValidationError, ValidationResult};
use crate::hash::{BlockHash, Hash, OutputId};
use crate::ledger::{ContractLookup, ContractRecord, StateDelta, UtxoEntry, UtxoLookup};
use crate::params::NetworkParams;
use crate::tx_validation::{BlockContext, TxValidator, ValidatedTx};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

/// A block that passed full validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    pub hash: BlockHash,
    pub height: u64,
    /// Per-transaction results in block order, coinbase first.
    pub transactions: Vec<ValidatedTx>,
    pub total_gas: u64,
    pub total_fees: u64,
}

/// Validates blocks under one set of network parameters.
pub struct BlockValidator<'a> {
    params: &'a NetworkParams,
    txs: TxValidator<'a>,
    validators: HashSet<[u8; 32]>,
}

impl<'a> BlockValidator<'a> {
    pub fn new(params: &'a NetworkParams) -> Self {
        let validators = params
            .validator_set()
            .map(|set| set.into_iter().map(|(key, _)| key).collect())
            .unwrap_or_default();
        Self {
            params,
            txs: TxValidator::new(params),
            validators,
        }
    }

    pub fn tx_validator(&self) -> &TxValidator<'a> {
        &self.txs
    }

    /// Check the header against its parent.
    pub fn check_header(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        now_ms: u64,
    ) -> ValidationResult<()> {
        if header.version != BLOCK_VERSION {
            return Err(ValidationError::BlockVersion {
                version: header.version,
            });
        }
        if header.height != parent.height + 1 {
            return Err(ValidationError::BlockHeight {
                got: header.height,
                expected: parent.height + 1,
            });
        }
        let parent_hash = parent.hash();
        if header.previous_block_hash != parent_hash {
            return Err(ValidationError::BlockParent {
                got: header.previous_block_hash,
                expected: parent_hash,
            });
        }
        if header.timestamp <= parent.timestamp {
            return Err(ValidationError::TimestampTooOld {
                timestamp: header.timestamp,
                parent: parent.timestamp,
            });
        }
        if header.timestamp > now_ms.saturating_add(self.params.max_time_offset_ms) {
            return Err(ValidationError::TimestampTooNew {
                timestamp: header.timestamp,
                now: now_ms,
            });
        }
        Ok(())
    }

    /// Checks that need nothing beyond the block itself.
    pub fn check_body(&self, block: &Block) -> ValidationResult<()> {
        if block.transactions.is_empty() {
            return Err(ValidationError::EmptyBlock);
        }
        if block.compute_merkle_root() != block.header.transactions_merkle_root {
            return Err(ValidationError::MerkleRoot);
        }
        if !block.transactions[0].is_coinbase() {
            return Err(ValidationError::WrongCoinbaseTransaction(
                "first transaction is not a coinbase",
            ));
        }
        if block.transactions[1..].iter().any(|tx| tx.is_coinbase()) {
            return Err(ValidationError::WrongCoinbaseTransaction(
                "coinbase input outside the first transaction",
            ));
        }
        self.check_votes(block)
    }

    /// Everything that can be checked before the parent is known.
    pub fn check_context_free(&self, block: &Block) -> ValidationResult<()> {
        if block.header.version != BLOCK_VERSION {
            return Err(ValidationError::BlockVersion {
                version: block.header.version,
            });
        }
        self.check_body(block)
    }

    /// Votes must be signed by a known validator and target a checkpoint at
    /// or below the block.
    pub fn check_votes(&self, block: &Block) -> ValidationResult<()> {
        let mut seen = HashSet::new();
        for vote in &block.votes {
            if !self.validators.contains(&vote.validator) {
                return Err(ValidationError::InvalidVote("unknown validator"));
            }
            if vote.target_height > block.height() {
                return Err(ValidationError::InvalidVote("target above the block"));
            }
            if !self.params.is_checkpoint(vote.target_height) {
                return Err(ValidationError::InvalidVote("target is not a checkpoint"));
            }
            if !seen.insert((vote.validator, vote.target_hash)) {
                return Err(ValidationError::InvalidVote("duplicate vote"));
            }
            if !vote.verify_signature() {
                return Err(ValidationError::InvalidVote("bad signature"));
            }
        }
        Ok(())
    }

    /// Fully validate `block` on top of `parent`.
    ///
    /// `cancel` is polled between transactions; once set, validation stops
    /// with [`ValidationError::Abandoned`].
    #[instrument(skip_all, fields(height = block.height(), hash = %block.hash().short()))]
    pub fn validate(
        &self,
        block: &Block,
        parent: &BlockHeader,
        now_ms: u64,
        utxos: &dyn UtxoLookup,
        contracts: &dyn ContractLookup,
        cancel: Option<&AtomicBool>,
    ) -> ValidationResult<ValidatedBlock> {
        let result = self.validate_inner(block, parent, now_ms, utxos, contracts, cancel);
        match &result {
            Ok(validated) => info!(
                txs = validated.transactions.len(),
                gas = validated.total_gas,
                fees = validated.total_fees,
                "block validated"
            ),
            Err(ValidationError::Abandoned) => debug!("block validation abandoned"),
            Err(e) => warn!(code = e.code(), error = %e, "block validation failed"),
        }
        result
    }

    fn validate_inner(
        &self,
        block: &Block,
        parent: &BlockHeader,
        now_ms: u64,
        utxos: &dyn UtxoLookup,
        contracts: &dyn ContractLookup,
        cancel: Option<&AtomicBool>,
    ) -> ValidationResult<ValidatedBlock> {
        self.check_header(&block.header, parent, now_ms)?;
        self.check_body(block)?;

        let ctx = BlockContext {
            height: block.height(),
            timestamp: block.header.timestamp,
        };
        let mut overlay = BlockOverlay::new(utxos, contracts);
        let mut gas = CostAccumulator::for_block(self.params);
        let mut fees = 0u64;

        let coinbase_tx = &block.transactions[0];
        let coinbase = self.txs.validate_coinbase(coinbase_tx, &ctx, &overlay)?;
        overlay.apply(&coinbase.delta);
        let mut transactions = vec![coinbase];

        for tx in &block.transactions[1..] {
            if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                return Err(ValidationError::Abandoned);
            }
            let validated = self.txs.validate(tx, &ctx, &overlay, &overlay)?;
            gas.add(validated.gas_used())?;
            fees = fees
                .checked_add(validated.fee)
                .ok_or(ValidationError::Overflow)?;
            overlay.apply(&validated.delta);
            transactions.push(validated);
        }

        self.txs.check_coinbase_reward(coinbase_tx, fees)?;

        Ok(ValidatedBlock {
            hash: block.hash(),
            height: block.height(),
            transactions,
            total_gas: gas.total(),
            total_fees: fees,
        })
    }
}

/// State as seen by a transaction partway through a block: the committed
/// state plus everything earlier transactions created or spent.
struct BlockOverlay<'a> {
    utxos: &'a dyn UtxoLookup,
    contracts: &'a dyn ContractLookup,
    created: HashMap<OutputId, UtxoEntry>,
    spent: HashSet<OutputId>,
    registered: HashMap<Hash, ContractRecord>,
}

impl<'a> BlockOverlay<'a> {
    fn new(utxos: &'a dyn UtxoLookup, contracts: &'a dyn ContractLookup) -> Self {
        Self {
            utxos,
            contracts,
            created: HashMap::new(),
            spent: HashSet::new(),
            registered: HashMap::new(),
        }
    }

    fn apply(&mut self, delta: &StateDelta) {
        self.spent.extend(delta.spent.iter().copied());
        for entry in &delta.created {
            self.created.insert(entry.output_id, entry.clone());
        }
        for record in &delta.registered {
            self.registered.insert(record.hash, record.clone());
        }
        for (hash, state) in &delta.state_writes {
            if let Some(record) = self.registered.get_mut(hash) {
                record.history.push(state.clone());
            }
        }
    }
}

impl UtxoLookup for BlockOverlay<'_> {
    fn utxo(&self, output_id: &OutputId) -> Option<UtxoEntry> {
        let mut entry = match self.created.get(output_id) {
            Some(entry) => entry.clone(),
            None => self.utxos.utxo(output_id)?,
        };
        if self.spent.contains(output_id) {
            entry.spent = true;
        }
        Some(entry)
    }
}

impl ContractLookup for BlockOverlay<'_> {
    fn contract(&self, hash: &Hash) -> Option<ContractRecord> {
        match self.registered.get(hash) {
            Some(record) => Some(record.clone()),
            None => self.contracts.contract(hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FinalityVote;
    use crate::hash::AssetId;
    use crate::program;
    use crate::transaction::{AssetAmount, OutputTemplate, Transaction, TxInput};
    use ed25519_dalek::{Signer, SigningKey};

    const FEE: u64 = 200 * 10_000;

    fn parent() -> BlockHeader {
        BlockHeader {
            version: BLOCK_VERSION,
            height: 9,
            previous_block_hash: Hash([1; 32]),
            timestamp: 50_000,
            transactions_merkle_root: Hash::ZERO,
        }
    }

    fn pay(amount: u64) -> OutputTemplate {
        OutputTemplate::new(AssetAmount::native(amount), vec![0x51])
    }

    fn funded() -> (HashMap<Hash, UtxoEntry>, Hash) {
        let id = Hash([5; 32]);
        let mut utxos = HashMap::new();
        utxos.insert(
            id,
            UtxoEntry {
                output_id: id,
                asset_id: AssetId::NATIVE,
                amount: 10_000_000,
                control_program: vec![0x51],
                state_data: vec![],
                block_height: 1,
                is_coinbase: false,
                spent: false,
            },
        );
        (utxos, id)
    }

    fn block_with(txs: Vec<Transaction>, votes: Vec<FinalityVote>) -> Block {
        let parent = parent();
        let params = NetworkParams::solonet();
        let mut all = vec![Transaction::coinbase(10, b"", vec![pay(params.block_reward)])];
        all.extend(txs);
        Block::new(10, parent.hash(), parent.timestamp + 6_000, all, votes)
    }

    fn validate(
        params: &NetworkParams,
        block: &Block,
        utxos: &HashMap<Hash, UtxoEntry>,
    ) -> ValidationResult<ValidatedBlock> {
        let contracts: HashMap<Hash, ContractRecord> = HashMap::new();
        BlockValidator::new(params).validate(block, &parent(), 60_000, utxos, &contracts, None)
    }

    /// Two transactions where the second spends the first's output.
    fn chained(id: Hash) -> (Transaction, Transaction) {
        let first = Transaction::new(
            vec![TxInput::spend(id, AssetAmount::native(10_000_000), vec![0x51], vec![])],
            vec![pay(10_000_000 - FEE)],
        );
        let second = Transaction::new(
            vec![TxInput::spend(
                first.output_id(0),
                AssetAmount::native(10_000_000 - FEE),
                vec![0x51],
                vec![],
            )],
            vec![pay(10_000_000 - 2 * FEE)],
        );
        (first, second)
    }

    // ============ Header Tests ============

    #[test]
    fn test_header_checks() {
        let params = NetworkParams::solonet();
        let validator = BlockValidator::new(&params);
        let parent = parent();
        let good = block_with(vec![], vec![]).header;
        assert!(validator.check_header(&good, &parent, 60_000).is_ok());

        let mut h = good.clone();
        h.height = 11;
        assert!(matches!(
            validator.check_header(&h, &parent, 60_000),
            Err(ValidationError::BlockHeight { got: 11, expected: 10 })
        ));

        let mut h = good.clone();
        h.previous_block_hash = Hash::ZERO;
        assert!(matches!(
            validator.check_header(&h, &parent, 60_000),
            Err(ValidationError::BlockParent { .. })
        ));

        let mut h = good.clone();
        h.timestamp = parent.timestamp;
        assert!(matches!(
            validator.check_header(&h, &parent, 60_000),
            Err(ValidationError::TimestampTooOld { .. })
        ));

        let mut h = good.clone();
        h.timestamp = 60_000 + params.max_time_offset_ms + 1;
        assert!(matches!(
            validator.check_header(&h, &parent, 60_000),
            Err(ValidationError::TimestampTooNew { .. })
        ));

        let mut h = good;
        h.version = 2;
        assert_eq!(validator.check_header(&h, &parent, 60_000).unwrap_err().code(), "CG720");
    }

    // ============ Body Tests ============

    #[test]
    fn test_body_commitment() {
        let params = NetworkParams::solonet();
        let validator = BlockValidator::new(&params);
        let mut block = block_with(vec![], vec![]);
        assert!(validator.check_body(&block).is_ok());

        block.transactions.push(Transaction::new(vec![], vec![pay(1)]));
        assert_eq!(validator.check_body(&block), Err(ValidationError::MerkleRoot));

        let empty = Block::new(10, parent().hash(), 56_000, vec![], vec![]);
        assert_eq!(validator.check_body(&empty), Err(ValidationError::EmptyBlock));
    }

    #[test]
    fn test_coinbase_position() {
        let params = NetworkParams::solonet();
        let validator = BlockValidator::new(&params);
        let (_, id) = funded();
        let (first, _) = chained(id);

        let missing = Block::new(10, parent().hash(), 56_000, vec![first], vec![]);
        assert!(matches!(
            validator.check_body(&missing),
            Err(ValidationError::WrongCoinbaseTransaction(_))
        ));

        let extra = block_with(vec![Transaction::coinbase(10, b"again", vec![pay(1)])], vec![]);
        assert!(matches!(
            validator.check_body(&extra),
            Err(ValidationError::WrongCoinbaseTransaction(_))
        ));
    }

    #[test]
    fn test_two_coinbase_inputs() {
        let params = NetworkParams::solonet();
        let (utxos, _) = funded();
        let coinbase = Transaction::new(
            vec![
                TxInput::Coinbase { arbitrary: vec![1] },
                TxInput::Coinbase { arbitrary: vec![2] },
            ],
            vec![pay(1)],
        );
        let block = Block::new(10, parent().hash(), 56_000, vec![coinbase], vec![]);
        let err = validate(&params, &block, &utxos).unwrap_err();
        assert!(matches!(err, ValidationError::WrongCoinbaseTransaction(_)));
    }

    // ============ In-block Chaining Tests ============

    #[test]
    fn test_chaining_in_order() {
        let params = NetworkParams::solonet();
        let (utxos, id) = funded();
        let (first, second) = chained(id);

        let block = block_with(vec![first, second], vec![]);
        let validated = validate(&params, &block, &utxos).unwrap();
        assert_eq!(validated.transactions.len(), 3);
        assert_eq!(validated.total_fees, 2 * FEE);
        assert_eq!(
            validated.total_gas,
            validated.transactions.iter().map(ValidatedTx::gas_used).sum::<u64>()
        );
    }

    #[test]
    fn test_chaining_reversed_is_orphan() {
        let params = NetworkParams::solonet();
        let (utxos, id) = funded();
        let (first, second) = chained(id);

        let block = block_with(vec![second, first], vec![]);
        let err = validate(&params, &block, &utxos).unwrap_err();
        assert!(err.is_orphan());
    }

    #[test]
    fn test_double_spend_in_block() {
        let params = NetworkParams::solonet();
        let (utxos, id) = funded();
        let (first, _) = chained(id);
        let again = Transaction::new(
            vec![TxInput::spend(id, AssetAmount::native(10_000_000), vec![0x51], vec![])],
            vec![pay(10_000_000 - 2 * FEE)],
        );

        let block = block_with(vec![first, again], vec![]);
        assert_eq!(
            validate(&params, &block, &utxos),
            Err(ValidationError::AlreadySpent { output_id: id })
        );
    }

    #[test]
    fn test_coinbase_may_claim_fees() {
        let params = NetworkParams::solonet();
        let (utxos, id) = funded();
        let (first, _) = chained(id);
        let parent = parent();
        let coinbase = Transaction::coinbase(10, b"", vec![pay(params.block_reward + FEE)]);
        let block = Block::new(10, parent.hash(), 56_000, vec![coinbase, first.clone()], vec![]);
        assert!(validate(&params, &block, &utxos).is_ok());

        let greedy = Transaction::coinbase(10, b"", vec![pay(params.block_reward + FEE + 1)]);
        let block = Block::new(10, parent.hash(), 56_000, vec![greedy, first], vec![]);
        assert!(matches!(
            validate(&params, &block, &utxos),
            Err(ValidationError::Unbalanced { .. })
        ));
    }

    #[test]
    fn test_block_gas_limit() {
        let mut params = NetworkParams::solonet();
        params.max_block_gas = 100;
        let (utxos, id) = funded();
        let (first, _) = chained(id);
        let block = block_with(vec![first], vec![]);
        assert!(matches!(
            validate(&params, &block, &utxos),
            Err(ValidationError::BlockGasExceeded { .. })
        ));
    }

    #[test]
    fn test_cancelled_validation() {
        let params = NetworkParams::solonet();
        let (utxos, id) = funded();
        let (first, second) = chained(id);
        let block = block_with(vec![first, second], vec![]);
        let contracts: HashMap<Hash, ContractRecord> = HashMap::new();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            BlockValidator::new(&params).validate(
                &block,
                &parent(),
                60_000,
                &utxos,
                &contracts,
                Some(&cancel)
            ),
            Err(ValidationError::Abandoned)
        );
    }

    #[test]
    fn test_register_then_use_in_one_block() {
        let params = NetworkParams::solonet();
        let (utxos, id) = funded();
        let code = coingod_vm::assemble("DROP 1").unwrap();
        let hash = program::contract_hash(&code);

        let register = Transaction::new(
            vec![TxInput::spend(id, AssetAmount::native(10_000_000), vec![0x51], vec![])],
            vec![
                OutputTemplate::new(
                    AssetAmount::native(params.bcrp_required_amount / 100),
                    program::register_contract(1, &code),
                ),
                pay(1),
            ],
        );
        let mut strict = params.clone();
        strict.bcrp_required_amount = params.bcrp_required_amount / 100;

        let use_contract = Transaction::new(
            vec![TxInput::spend(
                register.output_id(1),
                AssetAmount::native(1),
                vec![0x51],
                vec![],
            )],
            vec![OutputTemplate::new(AssetAmount::native(1), program::locked_by_contract(&hash))
                .with_state(vec![vec![7]])],
        );

        // The second transaction pays no fee, so it runs out of credit, but
        // only after the contract lookup succeeded.
        let block = block_with(vec![register.clone(), use_contract], vec![]);
        assert_eq!(
            validate(&strict, &block, &utxos),
            Err(ValidationError::OverGasCredit { index: 0 })
        );

        let reversed_outputs = Transaction::new(
            vec![TxInput::spend(id, AssetAmount::native(10_000_000), vec![0x51], vec![])],
            vec![
                OutputTemplate::new(AssetAmount::native(1), program::locked_by_contract(&hash))
                    .with_state(vec![vec![7]]),
            ],
        );
        let block = block_with(vec![reversed_outputs], vec![]);
        assert_eq!(
            validate(&strict, &block, &utxos),
            Err(ValidationError::ContractNotFound(hash))
        );
    }

    // ============ Vote Tests ============

    fn vote(key: &SigningKey, height: u64, target: Hash) -> FinalityVote {
        let message = FinalityVote::message(height, &target);
        FinalityVote {
            validator: key.verifying_key().to_bytes(),
            target_height: height,
            target_hash: target,
            signature: key.sign(&message.0).to_bytes().to_vec(),
        }
    }

    fn params_with_validator(key: &SigningKey) -> NetworkParams {
        let mut params = NetworkParams::solonet();
        params.blocks_of_epoch = 5;
        params.validators = vec![crate::params::Validator {
            pubkey: hex::encode(key.verifying_key().to_bytes()),
            stake: 100,
        }];
        params
    }

    #[test]
    fn test_vote_checks() {
        let key = SigningKey::from_bytes(&[11u8; 32]);
        let params = params_with_validator(&key);
        let validator = BlockValidator::new(&params);
        let target = Hash([3; 32]);

        let good = block_with(vec![], vec![vote(&key, 5, target)]);
        assert!(validator.check_votes(&good).is_ok());

        let not_checkpoint = block_with(vec![], vec![vote(&key, 6, target)]);
        assert_eq!(
            validator.check_votes(&not_checkpoint),
            Err(ValidationError::InvalidVote("target is not a checkpoint"))
        );

        let future = block_with(vec![], vec![vote(&key, 15, target)]);
        assert_eq!(
            validator.check_votes(&future),
            Err(ValidationError::InvalidVote("target above the block"))
        );

        let stranger = SigningKey::from_bytes(&[12u8; 32]);
        let unknown = block_with(vec![], vec![vote(&stranger, 5, target)]);
        assert_eq!(
            validator.check_votes(&unknown),
            Err(ValidationError::InvalidVote("unknown validator"))
        );

        let mut forged = vote(&key, 5, target);
        forged.target_hash = Hash([4; 32]);
        let forged = block_with(vec![], vec![forged]);
        assert_eq!(
            validator.check_votes(&forged).unwrap_err().code(),
            "CG805"
        );

        let doubled = block_with(vec![], vec![vote(&key, 5, target), vote(&key, 5, target)]);
        assert_eq!(
            validator.check_votes(&doubled),
            Err(ValidationError::InvalidVote("duplicate vote"))
        );
    }
}
