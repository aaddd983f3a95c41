//! Byte-string splicing and bitwise operations.

use crate::numeric::{bool_bytes, int_bytes};
use crate::opcodes::encode_push;
use crate::vm::Machine;
use crate::{VmError, VmResult};

fn usize_arg(m: &Machine<'_>, depth: usize) -> VmResult<usize> {
    let n = m.peek_u64(depth)?;
    usize::try_from(n).map_err(|_| VmError::BadValue {
        reason: "length out of range",
    })
}

pub(super) fn cat(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(4)?;
    m.require(2)?;
    let mut result = m.peek(1)?.to_vec();
    result.extend_from_slice(m.peek(0)?);
    m.apply_cost(result.len() as i64)?;
    m.replace(2, vec![result])
}

/// `str offset size SUBSTR`
pub(super) fn substr(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(4)?;
    m.require(3)?;
    let size = usize_arg(m, 0)?;
    let offset = usize_arg(m, 1)?;
    let s = m.peek(2)?;
    let end = offset
        .checked_add(size)
        .filter(|end| *end <= s.len())
        .ok_or(VmError::Range { op: "SUBSTR" })?;
    let result = s[offset..end].to_vec();
    m.apply_cost(size as i64)?;
    m.replace(3, vec![result])
}

pub(super) fn left(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(4)?;
    m.require(2)?;
    let size = usize_arg(m, 0)?;
    let s = m.peek(1)?;
    if size > s.len() {
        return Err(VmError::Range { op: "LEFT" });
    }
    let result = s[..size].to_vec();
    m.apply_cost(size as i64)?;
    m.replace(2, vec![result])
}

pub(super) fn right(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(4)?;
    m.require(2)?;
    let size = usize_arg(m, 0)?;
    let s = m.peek(1)?;
    if size > s.len() {
        return Err(VmError::Range { op: "RIGHT" });
    }
    let result = s[s.len() - size..].to_vec();
    m.apply_cost(size as i64)?;
    m.replace(2, vec![result])
}

pub(super) fn size(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(1)?;
    let len = int_bytes(m.peek(0)?.len() as u64);
    m.push(len)
}

pub(super) fn cat_push_data(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(4)?;
    m.require(2)?;
    let mut result = m.peek(1)?.to_vec();
    result.extend_from_slice(&encode_push(m.peek(0)?));
    m.apply_cost(result.len() as i64)?;
    m.replace(2, vec![result])
}

pub(super) fn invert(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(1)?;
    let cost = 1 + m.peek(0)?.len() as i64;
    m.apply_cost(cost)?;
    let result = m.peek(0)?.iter().map(|b| !b).collect();
    m.replace(1, vec![result])
}

pub(super) fn and(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(2)?;
    let (a, b) = (m.peek(1)?, m.peek(0)?);
    let result: Vec<u8> = a.iter().zip(b).map(|(x, y)| x & y).collect();
    m.apply_cost(1 + result.len() as i64)?;
    m.replace(2, vec![result])
}

fn pad_zip(a: &[u8], b: &[u8], f: impl Fn(u8, u8) -> u8) -> Vec<u8> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| f(*a.get(i).unwrap_or(&0), *b.get(i).unwrap_or(&0)))
        .collect()
}

pub(super) fn or(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(2)?;
    let result = pad_zip(m.peek(1)?, m.peek(0)?, |x, y| x | y);
    m.apply_cost(1 + result.len() as i64)?;
    m.replace(2, vec![result])
}

pub(super) fn xor(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(2)?;
    let result = pad_zip(m.peek(1)?, m.peek(0)?, |x, y| x ^ y);
    m.apply_cost(1 + result.len() as i64)?;
    m.replace(2, vec![result])
}

pub(super) fn equal(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(2)?;
    let eq = m.peek(0)? == m.peek(1)?;
    m.replace(2, vec![bool_bytes(eq)])
}

pub(super) fn equal_verify(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(2)?;
    if m.peek(0)? != m.peek(1)? {
        return Err(VmError::VerifyFailed);
    }
    m.replace(2, Vec::new())
}
