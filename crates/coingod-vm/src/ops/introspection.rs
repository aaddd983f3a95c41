//! Opcodes that read the enclosing transaction.

use crate::numeric::{bool_bytes, int_bytes};
use crate::vm::Machine;
use crate::{VmError, VmResult};

fn missing(op: &'static str) -> VmError {
    VmError::Context { op }
}

fn push_context(m: &mut Machine<'_>, cost: i64, op: &'static str, value: Option<Vec<u8>>) -> VmResult<()> {
    m.apply_cost(cost)?;
    let value = value.ok_or(missing(op))?;
    m.push(value)
}

pub(super) fn tx_sig_hash(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.tx_sig_hash().map(|h| h.to_vec());
    push_context(m, 256, "TXSIGHASH", value)
}

pub(super) fn asset(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.asset_id().map(|a| a.to_vec());
    push_context(m, 1, "ASSET", value)
}

pub(super) fn amount(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.amount().map(int_bytes);
    push_context(m, 1, "AMOUNT", value)
}

pub(super) fn program(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.program();
    push_context(m, 1, "PROGRAM", value)
}

pub(super) fn index(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.input_index().map(int_bytes);
    push_context(m, 1, "INDEX", value)
}

pub(super) fn entry_id(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.entry_id().map(|id| id.to_vec());
    push_context(m, 1, "ENTRYID", value)
}

pub(super) fn output_id(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.output_id().map(|id| id.to_vec());
    push_context(m, 1, "OUTPUTID", value)
}

pub(super) fn block_height(m: &mut Machine<'_>) -> VmResult<()> {
    let value = m.context.block_height().map(int_bytes);
    push_context(m, 1, "BLOCKHEIGHT", value)
}

/// `index amount asset vm_version program CHECKOUTPUT`
pub(super) fn check_output(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(16)?;
    m.require(5)?;
    let program = m.peek(0)?;
    let vm_version = m.peek_u64(1)?;
    let asset = m.peek(2)?;
    let amount = m.peek_u64(3)?;
    let index = m.peek_u64(4)?;
    let ok = m
        .context
        .check_output(index, amount, asset, vm_version, program)
        .ok_or(missing("CHECKOUTPUT"))?;
    m.replace(5, vec![bool_bytes(ok)])
}
