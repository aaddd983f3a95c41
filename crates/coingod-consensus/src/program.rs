//! Control-program templates.
//!
//! Outputs lock value with a control program. A handful of byte patterns
//! are recognized and expanded into the program that actually runs when the
//! output is spent; anything unrecognized runs as raw bytecode.
//!
//! | Pattern                      | Kind                       |
//! |------------------------------|----------------------------|
//! | `00 14 <20>`                 | pay to public-key hash     |
//! | `00 20 <32>`                 | pay to script hash         |
//! | `01 20 <32>`                 | locked by a contract       |
//! | `'bcrp' 01 <cells> <code>`   | contract registration      |
//! | `6a ...`                     | retirement                 |

use crate::error::{ValidationError, ValidationResult};
use crate::hash::Hash;
use coingod_vm::crypto::sha3_256;
use coingod_vm::Opcode;

/// Length of a public-key hash.
pub const PUBKEY_HASH_LEN: usize = 20;
/// Length of a script or contract hash.
pub const SCRIPT_HASH_LEN: usize = 32;
/// Prefix of contract registration programs.
pub const BCRP_PREFIX: &[u8] = b"bcrp";
/// Registration format version.
pub const BCRP_VERSION: u8 = 1;

const WITNESS_V0: u8 = 0x00;
const CONTRACT_V1: u8 = 0x01;

/// Recognized shape of a control program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind<'a> {
    PayToPubkeyHash(&'a [u8]),
    PayToScriptHash(&'a [u8]),
    Contract(Hash),
    Register { state_cells: u8, code: &'a [u8] },
    Retirement,
    Raw,
}

impl ProgramKind<'_> {
    /// Whether outputs with this program enter the UTXO set.
    pub fn is_spendable(&self) -> bool {
        !matches!(self, ProgramKind::Register { .. } | ProgramKind::Retirement)
    }
}

/// Classify `program`.
///
/// A program carrying the registration prefix with a malformed body is not
/// standard.
pub fn classify(program: &[u8]) -> ValidationResult<ProgramKind<'_>> {
    if let Some(body) = program.strip_prefix(BCRP_PREFIX) {
        return match body {
            [BCRP_VERSION, cells, code @ ..] if !code.is_empty() => Ok(ProgramKind::Register {
                state_cells: *cells,
                code,
            }),
            _ => Err(ValidationError::NotStandard("malformed contract registration")),
        };
    }

    Ok(match program {
        [WITNESS_V0, 0x14, hash @ ..] if hash.len() == PUBKEY_HASH_LEN => {
            ProgramKind::PayToPubkeyHash(hash)
        }
        [WITNESS_V0, 0x20, hash @ ..] if hash.len() == SCRIPT_HASH_LEN => {
            ProgramKind::PayToScriptHash(hash)
        }
        [CONTRACT_V1, 0x20, hash @ ..] if hash.len() == SCRIPT_HASH_LEN => {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(hash);
            ProgramKind::Contract(Hash(bytes))
        }
        [first, ..] if *first == Opcode::Fail.to_byte() => ProgramKind::Retirement,
        _ => ProgramKind::Raw,
    })
}

/// First 20 bytes of SHA3-256 of an ed25519 public key.
pub fn pubkey_hash(pubkey: &[u8]) -> [u8; PUBKEY_HASH_LEN] {
    let mut out = [0u8; PUBKEY_HASH_LEN];
    out.copy_from_slice(&sha3_256(pubkey)[..PUBKEY_HASH_LEN]);
    out
}

/// Hash identifying a contract.
pub fn contract_hash(code: &[u8]) -> Hash {
    Hash(sha3_256(code))
}

pub fn pay_to_pubkey(pubkey: &[u8]) -> Vec<u8> {
    let mut program = vec![WITNESS_V0, PUBKEY_HASH_LEN as u8];
    program.extend_from_slice(&pubkey_hash(pubkey));
    program
}

pub fn pay_to_script(script: &[u8]) -> Vec<u8> {
    let mut program = vec![WITNESS_V0, SCRIPT_HASH_LEN as u8];
    program.extend_from_slice(&sha3_256(script));
    program
}

pub fn locked_by_contract(hash: &Hash) -> Vec<u8> {
    let mut program = vec![CONTRACT_V1, SCRIPT_HASH_LEN as u8];
    program.extend_from_slice(hash.as_bytes());
    program
}

pub fn register_contract(state_cells: u8, code: &[u8]) -> Vec<u8> {
    let mut program = BCRP_PREFIX.to_vec();
    program.push(BCRP_VERSION);
    program.push(state_cells);
    program.extend_from_slice(code);
    program
}

/// Unspendable program carrying `data`.
pub fn retirement(data: &[u8]) -> Vec<u8> {
    let mut program = vec![Opcode::Fail.to_byte()];
    program.extend_from_slice(&coingod_vm::encode_push(data));
    program
}

/// Program run when spending a pay-to-pubkey-hash output.
///
/// Expects `[signature, pubkey]` with the key on top:
/// `DUP SHA3 20 LEFT <hash> EQUALVERIFY TXSIGHASH SWAP CHECKSIG`.
pub fn pubkey_hash_unlock(hash: &[u8]) -> Vec<u8> {
    let mut program = vec![Opcode::Dup.to_byte(), Opcode::Sha3.to_byte()];
    program.extend_from_slice(&coingod_vm::encode_push(&[PUBKEY_HASH_LEN as u8]));
    program.push(Opcode::Left.to_byte());
    program.extend_from_slice(&coingod_vm::encode_push(hash));
    program.extend_from_slice(&[
        Opcode::EqualVerify.to_byte(),
        Opcode::TxSigHash.to_byte(),
        Opcode::Swap.to_byte(),
        Opcode::CheckSig.to_byte(),
    ]);
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_templates() {
        let key = [9u8; 32];
        let p2pkh = pay_to_pubkey(&key);
        assert_eq!(p2pkh.len(), 22);
        assert_eq!(
            classify(&p2pkh).unwrap(),
            ProgramKind::PayToPubkeyHash(&pubkey_hash(&key))
        );

        let script = [0x51];
        assert!(matches!(
            classify(&pay_to_script(&script)).unwrap(),
            ProgramKind::PayToScriptHash(_)
        ));

        let hash = contract_hash(b"code");
        assert_eq!(
            classify(&locked_by_contract(&hash)).unwrap(),
            ProgramKind::Contract(hash)
        );
        assert_eq!(classify(&retirement(b"gone")).unwrap(), ProgramKind::Retirement);
        assert_eq!(classify(&[0x51]).unwrap(), ProgramKind::Raw);
        assert_eq!(classify(&[0x00, 0x14, 1, 2]).unwrap(), ProgramKind::Raw);
    }

    #[test]
    fn test_registration() {
        let program = register_contract(2, &[0x51]);
        let kind = classify(&program).unwrap();
        assert_eq!(
            kind,
            ProgramKind::Register {
                state_cells: 2,
                code: &[0x51]
            }
        );
        assert!(!kind.is_spendable());

        assert!(matches!(
            classify(b"bcrp\x01\x02"),
            Err(ValidationError::NotStandard(_))
        ));
        assert!(matches!(
            classify(b"bcrp\x07\x02\x51"),
            Err(ValidationError::NotStandard(_))
        ));
    }

    #[test]
    fn test_genesis_program_is_pubkey_hash() {
        let program = hex::decode(crate::params::GENESIS_PROGRAM).unwrap();
        assert!(matches!(
            classify(&program).unwrap(),
            ProgramKind::PayToPubkeyHash(_)
        ));
    }

    #[test]
    fn test_unlock_layout() {
        let hash = [3u8; 20];
        let program = pubkey_hash_unlock(&hash);
        assert_eq!(&program[..6], &[0x76, 0xaa, 0x01, 0x14, 0x80, 0x14]);
        assert_eq!(&program[6..26], &hash);
        assert_eq!(&program[26..], &[0x88, 0xae, 0x7c, 0xac]);
    }
}
