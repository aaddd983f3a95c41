//! Text form of programs.
//!
//! Tokens are separated by whitespace:
//!
//! - an opcode mnemonic such as `DUP` or `CHECKSIG`;
//! - a decimal number, pushed in its minimal encoding;
//! - `0x` followed by hex digits, pushed as raw bytes;
//! - `'text'`, pushed as its UTF-8 bytes (no embedded whitespace);
//! - `JUMP:n` or `JUMPIF:n` with a decimal byte address.

use crate::numeric::u256_bytes;
use crate::opcodes::{encode_push, parse_program, Opcode};
use crate::{VmError, VmResult};
use primitive_types::U256;

fn push_number(out: &mut Vec<u8>, n: U256) {
    if n.is_zero() {
        out.push(Opcode::False.to_byte());
    } else if n <= U256::from(16u8) {
        out.push(Opcode::Num(n.low_u32() as u8).to_byte());
    } else {
        out.extend(encode_push(&u256_bytes(n)));
    }
}

fn jump(out: &mut Vec<u8>, op: Opcode, target: &str, token: &str) -> VmResult<()> {
    let addr: u32 = target
        .parse()
        .map_err(|_| VmError::Token(token.to_string()))?;
    out.push(op.to_byte());
    out.extend_from_slice(&addr.to_le_bytes());
    Ok(())
}

/// Assemble whitespace-separated tokens into bytecode.
pub fn assemble(source: &str) -> VmResult<Vec<u8>> {
    let mut out = Vec::new();
    for token in source.split_whitespace() {
        if let Some(target) = token.strip_prefix("JUMPIF:") {
            jump(&mut out, Opcode::JumpIf, target, token)?;
        } else if let Some(target) = token.strip_prefix("JUMP:") {
            jump(&mut out, Opcode::Jump, target, token)?;
        } else if let Some(digits) = token.strip_prefix("0x") {
            let bytes = hex::decode(digits).map_err(|_| VmError::Token(token.to_string()))?;
            out.extend(encode_push(&bytes));
        } else if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
            out.extend(encode_push(token[1..token.len() - 1].as_bytes()));
        } else if token.bytes().all(|b| b.is_ascii_digit()) {
            let n = U256::from_dec_str(token).map_err(|_| VmError::Token(token.to_string()))?;
            push_number(&mut out, n);
        } else {
            let op = Opcode::from_name(token).ok_or_else(|| VmError::Token(token.to_string()))?;
            if matches!(op, Opcode::Jump | Opcode::JumpIf) {
                return Err(VmError::Token(token.to_string()));
            }
            out.push(op.to_byte());
        }
    }
    Ok(out)
}

/// Render bytecode as assembler text.
///
/// Reserved bytes print as `NOPx` followed by the hex value.
pub fn disassemble(program: &[u8]) -> VmResult<String> {
    let tokens: Vec<String> = parse_program(program)?
        .into_iter()
        .map(|inst| match inst.op {
            Some(Opcode::False) => "0".to_string(),
            Some(Opcode::Num(n)) => n.to_string(),
            Some(Opcode::Data(_))
            | Some(Opcode::PushData1)
            | Some(Opcode::PushData2)
            | Some(Opcode::PushData4) => format!("0x{}", hex::encode(inst.data)),
            Some(op @ (Opcode::Jump | Opcode::JumpIf)) => {
                let mut addr = [0u8; 4];
                addr.copy_from_slice(inst.data);
                format!("{}:{}", op.name(), u32::from_le_bytes(addr))
            }
            Some(op) => op.name().to_string(),
            None => format!("NOPx{:02x}", inst.byte),
        })
        .collect();
    Ok(tokens.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoContext;
    use crate::vm::run;

    #[test]
    fn test_assemble_numbers_and_data() {
        assert_eq!(assemble("0 1 16").unwrap(), vec![0x00, 0x51, 0x60]);
        assert_eq!(assemble("17").unwrap(), vec![0x01, 17]);
        assert_eq!(assemble("0xaabb").unwrap(), vec![0x02, 0xaa, 0xbb]);
        assert_eq!(assemble("'hi'").unwrap(), vec![0x02, b'h', b'i']);
        assert_eq!(
            assemble("JUMP:7").unwrap(),
            vec![0x63, 0x07, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_unknown_token() {
        assert_eq!(assemble("DUP FROB"), Err(VmError::Token("FROB".into())));
        assert_eq!(assemble("0xzz"), Err(VmError::Token("0xzz".into())));
        assert_eq!(assemble("JUMP"), Err(VmError::Token("JUMP".into())));
    }

    #[test]
    fn test_disassemble_matches_source() {
        let source = "2 3 ADD 5 NUMEQUAL JUMPIF:12 FAIL 0xabcd DROP";
        let program = assemble(source).unwrap();
        assert_eq!(disassemble(&program).unwrap(), source);
        assert_eq!(disassemble(&[0x51, 0xff]).unwrap(), "1 NOPxff");
    }

    #[test]
    fn test_assembled_program_runs() {
        let program = assemble("2 3 ADD 5 NUMEQUAL").unwrap();
        assert!(run(&program, &[], 1000, &NoContext).is_ok());

        let program = assemble("1 2 3 ROT 1 NUMEQUAL").unwrap();
        assert!(run(&program, &[], 1000, &NoContext).is_ok());
    }
}
