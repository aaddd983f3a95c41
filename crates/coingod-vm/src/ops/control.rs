use crate::numeric::{as_bool, int_bytes};
use crate::vm::Machine;
use crate::{VmError, VmResult};

pub(super) fn push_data(m: &mut Machine<'_>, data: &[u8]) -> VmResult<()> {
    m.apply_cost(1)?;
    m.push(data.to_vec())
}

pub(super) fn push_number(m: &mut Machine<'_>, n: u8) -> VmResult<()> {
    m.apply_cost(1)?;
    m.push(int_bytes(n as u64))
}

pub(super) fn nop(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)
}

fn address(data: &[u8]) -> VmResult<u32> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| VmError::BadValue {
        reason: "jump address must be 4 bytes",
    })?;
    Ok(u32::from_le_bytes(bytes))
}

pub(super) fn jump(m: &mut Machine<'_>, data: &[u8]) -> VmResult<()> {
    m.apply_cost(1)?;
    let target = address(data)?;
    m.jump(target);
    Ok(())
}

pub(super) fn jump_if(m: &mut Machine<'_>, data: &[u8]) -> VmResult<()> {
    m.apply_cost(1)?;
    let target = address(data)?;
    m.require(1)?;
    let taken = as_bool(m.peek(0)?);
    m.replace(1, Vec::new())?;
    if taken {
        m.jump(target);
    }
    Ok(())
}

pub(super) fn verify(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    m.require(1)?;
    let ok = as_bool(m.peek(0)?);
    m.replace(1, Vec::new())?;
    if ok {
        Ok(())
    } else {
        Err(VmError::VerifyFailed)
    }
}

pub(super) fn fail(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(1)?;
    Err(VmError::Return)
}

