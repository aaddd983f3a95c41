use crate::crypto::{sha256 as sha256_digest, sha3_256, verify_signature};
use crate::numeric::bool_bytes;
use crate::vm::Machine;
use crate::{VmError, VmResult};

const SIGNATURE_COST: i64 = 1024;

fn hash_cost(len: usize) -> i64 {
    (len as i64).max(64)
}

pub(super) fn sha256(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(1)?;
    let cost = hash_cost(m.peek(0)?.len());
    m.apply_cost(cost)?;
    let digest = sha256_digest(m.peek(0)?).to_vec();
    m.replace(1, vec![digest])
}

pub(super) fn sha3(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(1)?;
    let cost = hash_cost(m.peek(0)?.len());
    m.apply_cost(cost)?;
    let digest = sha3_256(m.peek(0)?).to_vec();
    m.replace(1, vec![digest])
}

fn check_message(msg: &[u8]) -> VmResult<()> {
    if msg.len() != 32 {
        return Err(VmError::BadValue {
            reason: "signed message must be 32 bytes",
        });
    }
    Ok(())
}

/// `sig msg pubkey CHECKSIG`
pub(super) fn check_sig(m: &mut Machine<'_>) -> VmResult<()> {
    m.apply_cost(SIGNATURE_COST)?;
    m.require(3)?;
    let (pubkey, msg, sig) = (m.peek(0)?, m.peek(1)?, m.peek(2)?);
    check_message(msg)?;
    let ok = verify_signature(pubkey, msg, sig);
    m.replace(3, vec![bool_bytes(ok)])
}

/// `sigs... n_sigs msg pubkeys... n_pubkeys CHECKMULTISIG`
///
/// Signatures must appear in the same order as their public keys.
pub(super) fn check_multi_sig(m: &mut Machine<'_>) -> VmResult<()> {
    m.require(1)?;
    let n_pubkeys = m.peek_u64(0)?;
    let cost = i64::try_from(n_pubkeys)
        .ok()
        .and_then(|n| n.checked_mul(SIGNATURE_COST))
        .ok_or(VmError::BadValue {
            reason: "too many public keys",
        })?;
    m.apply_cost(cost)?;
    let n_pubkeys = n_pubkeys as usize;

    let msg_depth = n_pubkeys + 1;
    let n_sigs_depth = msg_depth + 1;
    m.require(n_sigs_depth + 1)?;
    let n_sigs = m.peek_u64(n_sigs_depth)? as usize;
    if n_sigs > n_pubkeys || (n_pubkeys > 0 && n_sigs == 0) {
        return Err(VmError::BadValue {
            reason: "invalid signature count",
        });
    }
    let total = n_sigs_depth + 1 + n_sigs;
    m.require(total)?;

    let msg = m.peek(msg_depth)?;
    check_message(msg)?;
    let pubkeys = (1..=n_pubkeys)
        .map(|d| m.peek(d))
        .collect::<VmResult<Vec<_>>>()?;
    let sigs = (n_sigs_depth + 1..total)
        .map(|d| m.peek(d))
        .collect::<VmResult<Vec<_>>>()?;

    let mut keys = pubkeys.iter();
    let mut matched = 0;
    for sig in &sigs {
        let found = keys.by_ref().any(|pk| verify_signature(pk, msg, sig));
        if !found {
            break;
        }
        matched += 1;
    }
    let ok = matched == sigs.len();
    m.replace(total, vec![bool_bytes(ok)])
}
