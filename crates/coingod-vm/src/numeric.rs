//! Number encoding for VM stack items.
//!
//! VM numbers are unsigned 256-bit integers. On the stack they are encoded
//! little-endian with trailing zero bytes trimmed, so zero is the empty
//! string. Anything longer than 32 bytes is not a number.

use crate::{VmError, VmResult};
use primitive_types::U256;

/// Maximum encoded width of a VM number.
pub const MAX_NUMBER_BYTES: usize = 32;

/// Decode a stack item as a number.
pub fn as_u256(bytes: &[u8]) -> VmResult<U256> {
    if bytes.len() > MAX_NUMBER_BYTES {
        return Err(VmError::BadValue {
            reason: "number wider than 32 bytes",
        });
    }
    Ok(U256::from_little_endian(bytes))
}

/// Encode a number in its minimal little-endian form.
pub fn u256_bytes(n: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    n.to_little_endian(&mut buf);
    let used = buf.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    buf[..used].to_vec()
}

/// Encode a `u64` in the VM number format.
pub fn int_bytes(n: u64) -> Vec<u8> {
    u256_bytes(U256::from(n))
}

/// Interpret a number as a `u64`, failing with `BadValue` if it does not fit.
pub fn u256_to_u64(n: U256) -> VmResult<u64> {
    if n > U256::from(u64::MAX) {
        return Err(VmError::BadValue {
            reason: "number does not fit in 64 bits",
        });
    }
    Ok(n.low_u64())
}

/// An item is false iff every byte is zero (the empty string included).
pub fn as_bool(bytes: &[u8]) -> bool {
    bytes.iter().any(|b| *b != 0)
}

/// Canonical boolean encoding: `[1]` for true, empty for false.
pub fn bool_bytes(b: bool) -> Vec<u8> {
    if b {
        vec![1]
    } else {
        Vec::new()
    }
}
