//! Proptest strategies and deterministic builders for generated data.

use coingod_consensus::{
    AssetAmount, AssetId, Block, Hash, OutputTemplate, Transaction, TxInput, UtxoEntry,
};
use coingod_vm::assemble;
use proptest::prelude::*;
use std::collections::HashMap;

/// Stack-neutral program fragments. Each leaves the data stack as it found it.
const FRAGMENTS: &[&str] = &[
    "1 DROP",
    "'abc' SHA3 DROP",
    "'abc' SHA256 DROP",
    "2 3 ADD 5 NUMEQUALVERIFY",
    "0x0102 DUP CAT SIZE 4 NUMEQUALVERIFY DROP",
    "7 8 SWAP 2DROP",
    "9 TOALTSTACK FROMALTSTACK DROP",
    "1 2 3 ROT 2DROP DROP",
    "4 DUP EQUALVERIFY",
    "6 2 MUL 12 NUMEQUALVERIFY",
];

/// Stack opcodes with the number of items they need.
pub const STACK_OPS: &[(&str, usize)] = &[
    ("DROP", 1),
    ("DUP", 1),
    ("TOALTSTACK", 1),
    ("SWAP", 2),
    ("OVER", 2),
    ("NIP", 2),
    ("TUCK", 2),
    ("2DROP", 2),
    ("2DUP", 2),
    ("ROT", 3),
    ("3DUP", 3),
    ("2OVER", 4),
    ("2SWAP", 4),
    ("2ROT", 6),
];

/// Arbitrary 32-byte hash.
pub fn arb_hash() -> impl Strategy<Value = Hash> {
    prop::array::uniform32(any::<u8>()).prop_map(Hash)
}

/// Arbitrary stack item of up to 8 bytes.
pub fn arb_item() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..8)
}

/// Arbitrary stack of up to `max` items.
pub fn arb_stack(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(arb_item(), 0..=max)
}

/// Straight-line program that always succeeds given enough gas.
pub fn arb_program() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(FRAGMENTS), 0..12).prop_map(|fragments| {
        let mut source = fragments.join(" ");
        source.push_str(" 1");
        assemble(&source).expect("fragments assemble")
    })
}

/// Stack opcode paired with a stack one item too short for it.
pub fn arb_short_stack_op() -> impl Strategy<Value = (&'static str, Vec<Vec<u8>>)> {
    prop::sample::select(STACK_OPS).prop_flat_map(|(name, needed)| {
        prop::collection::vec(arb_item(), 0..needed).prop_map(move |stack| (name, stack))
    })
}

/// Native amount large enough to pay the test fee with change.
pub fn arb_amount() -> impl Strategy<Value = u64> {
    10_000_000u64..=1_000_000_000_000u64
}

/// Unspent native entries locked by the always-true program.
pub fn arb_utxo_set(max: usize) -> impl Strategy<Value = Vec<UtxoEntry>> {
    prop::collection::btree_map(arb_hash(), arb_amount(), 1..=max).prop_map(|map| {
        map.into_iter()
            .map(|(output_id, amount)| UtxoEntry {
                output_id,
                asset_id: AssetId::NATIVE,
                amount,
                control_program: vec![0x51],
                state_data: vec![],
                block_height: 1,
                is_coinbase: false,
                spent: false,
            })
            .collect()
    })
}

/// Shape of a block spending part of a UTXO set.
#[derive(Debug, Clone)]
pub struct BlockPlan {
    /// Which entries of the set get spent, one transaction each.
    pub spend: Vec<bool>,
    /// Outputs per spending transaction.
    pub outputs: Vec<u8>,
    /// Whether a final transaction spends the first output created in the block.
    pub chain_child: bool,
}

pub fn arb_block_plan(entries: usize) -> impl Strategy<Value = BlockPlan> {
    (
        prop::collection::vec(any::<bool>(), entries),
        prop::collection::vec(1u8..4, entries),
        any::<bool>(),
    )
        .prop_map(|(spend, outputs, chain_child)| BlockPlan {
            spend,
            outputs,
            chain_child,
        })
}

/// UTXO set with a block plan over it.
pub fn arb_set_and_plan(max: usize) -> impl Strategy<Value = (Vec<UtxoEntry>, BlockPlan)> {
    arb_utxo_set(max).prop_flat_map(|set| {
        let len = set.len();
        (Just(set), arb_block_plan(len))
    })
}

/// Build the block described by `plan` at `height`.
///
/// Outputs split each spent amount evenly, so every transaction balances.
pub fn plan_block(set: &[UtxoEntry], plan: &BlockPlan, height: u64) -> Block {
    let mut txs = vec![Transaction::coinbase(
        height,
        b"plan",
        vec![OutputTemplate::new(AssetAmount::native(1), vec![0x51])],
    )];

    for (i, entry) in set.iter().enumerate() {
        if !plan.spend[i] {
            continue;
        }
        let count = u64::from(plan.outputs[i]);
        let share = entry.amount / count;
        let outputs = (0..count)
            .map(|_| OutputTemplate::new(AssetAmount::native(share), vec![0x51]))
            .collect();
        txs.push(Transaction::new(
            vec![TxInput::spend(entry.output_id, entry.value(), vec![0x51], vec![])],
            outputs,
        ));
    }

    if plan.chain_child && txs.len() > 1 {
        let parent = &txs[1];
        let output = &parent.outputs[0];
        let child = Transaction::new(
            vec![TxInput::spend(
                parent.output_id(0),
                *output.value(),
                output.control_program.clone(),
                vec![],
            )],
            vec![OutputTemplate::new(*output.value(), vec![0x51, 0x51])],
        );
        txs.push(child);
    }

    Block::new(height, Hash::ZERO, 0, txs, vec![])
}

/// Index a UTXO set by output id.
pub fn utxo_map(set: &[UtxoEntry]) -> HashMap<Hash, UtxoEntry> {
    set.iter().map(|e| (e.output_id, e.clone())).collect()
}
