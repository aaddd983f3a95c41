//! Property-based tests using proptest.
//!
//! These check invariants of the VM, the validator and the ledger state on
//! randomly generated inputs, with shrinking support.

use crate::generators::*;
use crate::harness::{TestKey, TEST_FEE};
use coingod_consensus::{
    AssetAmount, BlockContext, Block, ContractRecord, Hash, NetworkParams, OutputTemplate,
    Transaction, TxInput, TxValidator, ValidationError,
};
use coingod_state::{Chain, UtxoViewpoint};
use coingod_storage::MemoryStorage;
use coingod_vm::{assemble, run, NoContext, Stack, VmError};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const GENEROUS_LIMIT: u64 = 1_000_000;

fn ctx() -> BlockContext {
    BlockContext {
        height: 100,
        timestamp: 1_000_000,
    }
}

fn no_contracts() -> HashMap<Hash, ContractRecord> {
    HashMap::new()
}

// ============================================================================
// VM Properties
// ============================================================================

proptest! {
    /// A program that passes under its peak consumption fails under any
    /// smaller limit, and only with a run-limit error.
    #[test]
    fn run_limit_is_monotonic(
        program in arb_program(),
        args in arb_stack(3),
        cut in any::<prop::sample::Index>(),
    ) {
        let execution = run(&program, &args, GENEROUS_LIMIT, &NoContext).unwrap();
        let peak = execution.gas_peak;
        prop_assume!(peak > 0);

        let exact = run(&program, &args, peak, &NoContext).unwrap();
        prop_assert_eq!(exact.gas_used, execution.gas_used);

        let smaller = cut.index(peak as usize) as u64;
        let err = run(&program, &args, smaller, &NoContext).unwrap_err();
        prop_assert!(
            matches!(err, VmError::RunLimitExceeded { .. }),
            "limit {} gave {:?}", smaller, err
        );
    }

    /// Stack opcodes fail on a short stack before consuming anything.
    #[test]
    fn underflow_consumes_nothing((name, stack) in arb_short_stack_op()) {
        let program = assemble(name).unwrap();
        let err = run(&program, &stack, GENEROUS_LIMIT, &NoContext).unwrap_err();
        match err {
            VmError::DataStackUnderflow { required, available } => {
                prop_assert_eq!(available, stack.len(), "{} consumed items", name);
                prop_assert!(required > available);
            }
            other => prop_assert!(false, "{} gave {:?}", name, other),
        }
    }

    /// A rotate out of bounds leaves the container untouched.
    #[test]
    fn failed_rotate_leaves_stack_unchanged(
        items in arb_stack(6),
        from in 0usize..10,
        to in 0usize..10,
    ) {
        let mut stack = Stack::from(items.clone());
        let result = stack.rotate(from, to);
        if from.max(to) >= items.len() {
            prop_assert!(result.is_err());
            prop_assert_eq!(stack, Stack::from(items));
        } else {
            prop_assert!(result.is_ok());
            prop_assert_eq!(stack.len(), items.len());
        }
    }
}

// ============================================================================
// Validation Properties
// ============================================================================

proptest! {
    /// Outputs exceeding inputs by a single unit are unbalanced.
    #[test]
    fn one_unit_imbalance_is_rejected(
        set in arb_utxo_set(1),
        fee in TEST_FEE..=4 * TEST_FEE,
    ) {
        let params = NetworkParams::solonet();
        let entry = &set[0];
        let utxos = utxo_map(&set);
        let input = TxInput::spend(entry.output_id, entry.value(), vec![0x51], vec![]);
        let pay = |amount| OutputTemplate::new(AssetAmount::native(amount), vec![0x51]);

        let balanced = Transaction::new(vec![input.clone()], vec![pay(entry.amount - fee)]);
        let validated = TxValidator::new(&params)
            .validate(&balanced, &ctx(), &utxos, &no_contracts())
            .unwrap();
        prop_assert_eq!(validated.fee, fee);

        let over = Transaction::new(vec![input], vec![pay(entry.amount - fee), pay(fee + 1)]);
        let err = TxValidator::new(&params)
            .validate(&over, &ctx(), &utxos, &no_contracts())
            .unwrap_err();
        prop_assert_eq!(err.code(), "CG746");
        prop_assert!(
            matches!(err, ValidationError::Unbalanced { inputs, outputs, .. }
                if outputs == inputs + 1),
            "got {:?}", err
        );
    }

    /// Validating the same transaction twice gives the same verdict.
    #[test]
    fn validation_is_deterministic(
        set in arb_utxo_set(3),
        outputs in prop::collection::vec(
            (0u64..2_000_000_000_000, prop::sample::select(vec![
                vec![0x51],
                vec![0x00],
                vec![0x6a, 0x01, 0x00],
                vec![0x00, 0x14],
            ])),
            0..4,
        ),
    ) {
        let params = NetworkParams::solonet();
        let utxos = utxo_map(&set);
        let tx = Transaction::new(
            set.iter()
                .map(|e| TxInput::spend(e.output_id, e.value(), vec![0x51], vec![]))
                .collect(),
            outputs
                .into_iter()
                .map(|(amount, program)| OutputTemplate::new(AssetAmount::native(amount), program))
                .collect(),
        );

        let first = TxValidator::new(&params).validate(&tx, &ctx(), &utxos, &no_contracts());
        let second = TxValidator::new(&params).validate(&tx, &ctx(), &utxos, &no_contracts());
        prop_assert_eq!(
            first.as_ref().map_err(|e| e.code()),
            second.as_ref().map_err(|e| e.code())
        );
        prop_assert_eq!(first, second);
    }
}

// ============================================================================
// Ledger State Properties
// ============================================================================

proptest! {
    /// Rolling back an applied block restores the viewpoint.
    #[test]
    fn rollback_undoes_apply((set, plan) in arb_set_and_plan(6)) {
        let mut view = UtxoViewpoint::new();
        for entry in &set {
            view.insert(entry.clone());
        }
        let original = view.clone();
        let block = plan_block(&set, &plan, 5);

        view.apply_block(&block).unwrap();
        let spent_any = plan.spend.iter().any(|s| *s);
        prop_assert!(view != original || !spent_any);
        // The coinbase output always lands.
        prop_assert!(view.entry(&block.transactions[0].output_id(0)).is_some());

        view.rollback_block(&block).unwrap();
        prop_assert_eq!(view, original);
    }

    /// Applying the block twice is caught as a double spend.
    #[test]
    fn reapply_is_rejected((set, plan) in arb_set_and_plan(4)) {
        prop_assume!(plan.spend.iter().any(|s| *s));
        let mut view = UtxoViewpoint::new();
        for entry in &set {
            view.insert(entry.clone());
        }
        let block = plan_block(&set, &plan, 5);
        view.apply_block(&block).unwrap();
        prop_assert!(view.apply_block(&block).is_err());
    }
}

// ============================================================================
// Finality Properties
// ============================================================================

fn finality_chain(key: &TestKey) -> Chain {
    let mut params = NetworkParams::solonet();
    params.genesis_program = "51".into();
    params.blocks_of_epoch = 2;
    params.validators = vec![coingod_consensus::Validator {
        pubkey: hex::encode(key.pubkey()),
        stake: params.min_validator_vote_num,
    }];
    Chain::open(Arc::new(MemoryStorage::new()), params).unwrap()
}

fn grow(chain: &Chain, parent: &Block, count: usize, tag: &[u8]) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for _ in 0..count {
        let header = blocks.last().map_or(&parent.header, |b| &b.header);
        let block = crate::harness::child_block(chain.params(), header, tag, vec![], vec![]);
        blocks.push(block);
    }
    blocks
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Once finalized, no branch can move finality back or replace the
    /// finalized block.
    #[test]
    fn finality_survives_adversarial_branch(fork_point in 0u64..=3, length in 1usize..8) {
        let key = TestKey::from_seed(7);
        let chain = finality_chain(&key);
        let genesis = chain.block_by_height(0).unwrap().unwrap();

        let main = grow(&chain, &genesis, 2, b"main");
        for block in &main {
            chain.process_block(block.clone()).unwrap();
        }
        let checkpoint = main[1].hash();
        let voting = crate::harness::child_block(
            chain.params(),
            &main[1].header,
            b"main",
            vec![],
            vec![key.vote(2, checkpoint)],
        );
        chain.process_block(voting.clone()).unwrap();
        prop_assert_eq!(chain.finalized_height(), 2);
        let best_before = chain.best_hash();

        let fork_base = if fork_point == 3 {
            voting.clone()
        } else {
            chain.block_by_height(fork_point).unwrap().unwrap()
        };
        for block in grow(&chain, &fork_base, length, b"adversary") {
            let result = chain.process_block(block);
            if fork_point < 2 {
                prop_assert!(
                    !matches!(
                        result,
                        Ok(coingod_state::BlockOutcome::Extended { .. })
                            | Ok(coingod_state::BlockOutcome::Reorganized { .. })
                    ),
                    "branch below finality took over"
                );
            }
            prop_assert_eq!(chain.finalized_height(), 2);
            prop_assert_eq!(chain.block_by_height(2).unwrap().unwrap().hash(), checkpoint);
        }

        if fork_point < 2 {
            prop_assert_eq!(chain.best_hash(), best_before);
        }
    }
}
