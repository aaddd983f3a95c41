//! Data and alt stack manipulation.
//!
//! Alt stack moves and the temporary removals inside NIP and TUCK are not
//! memory-accounted. Everything else charges pushes and refunds pops.

use crate::numeric::{as_bool, int_bytes};
use crate::vm::{alt_underflow, data_underflow, item_cost, Machine};
use crate::{VmError, VmResult};

pub(super) fn to_alt_stack(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(1)?;
    if let Some(item) = m.data.pop() {
        m.alt.push(item);
    }
    Ok(())
}

pub(super) fn from_alt_stack(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.alt.ensure(1).map_err(alt_underflow)?;
    if let Some(item) = m.alt.pop() {
        m.data.push(item);
    }
    Ok(())
}

pub(super) fn drop2(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.replace(2, Vec::new())
}

/// DUP, 2DUP and 3DUP: copy the top `n` items, keeping their order.
pub(super) fn dup_n(m: &mut Machine<'_>, n: usize) -> VmResult<()> {
    m.apply_cost(n as i64)?;
    m.require(n)?;
    let copies = (0..n)
        .rev()
        .map(|d| m.peek(d).map(<[u8]>::to_vec))
        .collect::<VmResult<Vec<_>>>()?;
    m.replace(0, copies)
}

pub(super) fn over2(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(4)?;
    let copies = vec![m.peek(3)?.to_vec(), m.peek(2)?.to_vec()];
    m.replace(0, copies)
}

pub(super) fn rot2(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(6)?;
    m.data.rotate_to_top(5).map_err(data_underflow)?;
    m.data.rotate_to_top(5).map_err(data_underflow)
}

pub(super) fn swap2(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(4)?;
    m.data.rotate_to_top(3).map_err(data_underflow)?;
    m.data.rotate_to_top(3).map_err(data_underflow)
}

pub(super) fn if_dup(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(1)?;
    let top = m.peek(0)?;
    if as_bool(top) {
        let copy = top.to_vec();
        m.replace(0, vec![copy])?;
    }
    Ok(())
}

pub(super) fn depth(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    let depth = int_bytes(m.data.len() as u64);
    m.push(depth)
}

pub(super) fn drop(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.replace(1, Vec::new())
}

pub(super) fn nip(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(2)?;
    let refund = item_cost(m.peek(1)?);
    m.settle(0, refund)?;
    if let Some(top) = m.data.pop() {
        m.data.pop();
        m.data.push(top);
    }
    Ok(())
}

pub(super) fn over(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(2)?;
    let copy = m.peek(1)?.to_vec();
    m.replace(0, vec![copy])
}

/// Read the PICK/ROLL index from the top of the stack.
///
/// The index must be a non-negative `i64` whose offset `index + 1` does not
/// overflow, and the stack below it must hold at least `index + 1` items.
fn stack_index(m: &Machine<'_>) -> VmResult<usize> {
    m.require(1)?;
    let raw = m.peek_u64(0)?;
    let n = i64::try_from(raw).map_err(|_| VmError::BadValue {
        reason: "stack index out of range",
    })?;
    let off = n.checked_add(1).ok_or(VmError::BadValue {
        reason: "stack index out of range",
    })?;
    let available = m.data.len() - 1;
    if off as u64 > available as u64 {
        return Err(VmError::DataStackUnderflow {
            required: off as usize,
            available,
        });
    }
    Ok(n as usize)
}

pub(super) fn pick(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    let n = stack_index(m)?;
    let copy = m.peek(n + 1)?.to_vec();
    m.replace(1, vec![copy])
}

pub(super) fn roll(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    let n = stack_index(m)?;
    m.replace(1, Vec::new())?;
    m.data.rotate_to_top(n).map_err(data_underflow)
}

pub(super) fn rot(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(3)?;
    m.data.rotate_to_top(2).map_err(data_underflow)
}

pub(super) fn swap(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(2)?;
    m.data.rotate_to_top(1).map_err(data_underflow)
}

pub(super) fn tuck(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(2)?;
    let copy = m.peek(0)?.to_vec();
    m.settle(item_cost(&copy), 0)?;
    if let (Some(top), Some(second)) = (m.data.pop(), m.data.pop()) {
        m.data.push(copy);
        m.data.push(second);
        m.data.push(top);
    }
    Ok(())
}
