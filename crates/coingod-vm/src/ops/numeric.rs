//! Unsigned 256-bit arithmetic and comparison.

use crate::numeric::{as_bool, bool_bytes, u256_bytes, u256_to_u64};
use crate::opcodes::Opcode;
use crate::vm::Machine;
use crate::{VmError, VmResult};
use primitive_types::U256;

fn range(op: Opcode) -> VmError {
    VmError::Range { op: op.name() }
}

pub(super) fn unary(m: &mut Machine<'_>, op: Opcode) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(1)?;
    let n = m.peek_num(0)?;
    let result = match op {
        Opcode::Add1 => u256_bytes(n.checked_add(U256::one()).ok_or(range(op))?),
        Opcode::Sub1 => u256_bytes(n.checked_sub(U256::one()).ok_or(range(op))?),
        Opcode::Mul2 => u256_bytes(n.checked_mul(U256::from(2u8)).ok_or(range(op))?),
        Opcode::Div2 => u256_bytes(n >> 1),
        Opcode::Not => bool_bytes(n.is_zero()),
        Opcode::ZeroNotEqual => bool_bytes(!n.is_zero()),
        _ => return Err(VmError::DisallowedOpcode { opcode: op.to_byte() }),
    };
    m.replace(1, vec![result])
}

fn shift_amount(y: U256, op: Opcode) -> VmResult<u32> {
    let y = u256_to_u64(y).map_err(|_| range(op))?;
    u32::try_from(y).map_err(|_| range(op))
}

pub(super) fn binary(m: &mut Machine<'_>, op: Opcode) -> VmResult<()> {
    m.apply_cost(2)?;
    m.require(2)?;

    // BOOLAND and BOOLOR read raw truthiness, not numbers.
    if matches!(op, Opcode::BoolAnd | Opcode::BoolOr) {
        let (a, b) = (as_bool(m.peek(1)?), as_bool(m.peek(0)?));
        let result = match op {
            Opcode::BoolAnd => a && b,
            _ => a || b,
        };
        return m.replace(2, vec![bool_bytes(result)]);
    }

    let y = m.peek_num(0)?;
    let x = m.peek_num(1)?;
    let result = match op {
        Opcode::Add => u256_bytes(x.checked_add(y).ok_or(range(op))?),
        Opcode::Sub => u256_bytes(x.checked_sub(y).ok_or(range(op))?),
        Opcode::Mul => u256_bytes(x.checked_mul(y).ok_or(range(op))?),
        Opcode::Div => u256_bytes(x.checked_div(y).ok_or(VmError::DivZero)?),
        Opcode::Mod => u256_bytes(x.checked_rem(y).ok_or(VmError::DivZero)?),
        Opcode::LShift => {
            if x.is_zero() || y.is_zero() {
                u256_bytes(x)
            } else {
                let shift = shift_amount(y, op)?;
                if x.bits() as u64 + shift as u64 > 256 {
                    return Err(range(op));
                }
                u256_bytes(x << shift as usize)
            }
        }
        Opcode::RShift => {
            if y >= U256::from(256u32) {
                Vec::new()
            } else {
                u256_bytes(x >> y.low_u32() as usize)
            }
        }
        Opcode::NumEqual => bool_bytes(x == y),
        Opcode::NumEqualVerify => {
            if x != y {
                return Err(VmError::VerifyFailed);
            }
            return m.replace(2, Vec::new());
        }
        Opcode::NumNotEqual => bool_bytes(x != y),
        Opcode::LessThan => bool_bytes(x < y),
        Opcode::GreaterThan => bool_bytes(x > y),
        Opcode::LessThanOrEqual => bool_bytes(x <= y),
        Opcode::GreaterThanOrEqual => bool_bytes(x >= y),
        Opcode::Min => u256_bytes(x.min(y)),
        Opcode::Max => u256_bytes(x.max(y)),
        _ => return Err(VmError::DisallowedOpcode { opcode: op.to_byte() }),
    };
    m.replace(2, vec![result])
}

/// `x min max WITHIN` is true when `min <= x < max`.
pub(super) fn within(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(4)?;
    m.require(3)?;
    let max = m.peek_num(0)?;
    let min = m.peek_num(1)?;
    let x = m.peek_num(2)?;
    m.replace(3, vec![bool_bytes(min <= x && x < max)])
}
