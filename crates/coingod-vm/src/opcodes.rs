//! Opcode table and instruction decoding.

use crate::{VmError, VmResult};

/// One VM instruction kind.
///
/// Bytes with no variant are reserved expansion opcodes and are rejected
/// when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    False,
    /// Push the next `n` bytes (1..=75).
    Data(u8),
    PushData1,
    PushData2,
    PushData4,
    /// Push the small number `n` (1..=16).
    Num(u8),
    Nop,
    Jump,
    JumpIf,
    Verify,
    Fail,
    ToAltStack,
    FromAltStack,
    Drop2,
    Dup2,
    Dup3,
    Over2,
    Rot2,
    Swap2,
    IfDup,
    Depth,
    Drop,
    Dup,
    Nip,
    Over,
    Pick,
    Roll,
    Rot,
    Swap,
    Tuck,
    Cat,
    Substr,
    Left,
    Right,
    Size,
    Invert,
    And,
    Or,
    Xor,
    Equal,
    EqualVerify,
    CatPushData,
    Add1,
    Sub1,
    Mul2,
    Div2,
    Not,
    ZeroNotEqual,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
    BoolAnd,
    BoolOr,
    NumEqual,
    NumEqualVerify,
    NumNotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Min,
    Max,
    Within,
    Sha256,
    Sha3,
    CheckSig,
    CheckMultiSig,
    TxSigHash,
    CheckOutput,
    Asset,
    Amount,
    Program,
    Index,
    EntryId,
    OutputId,
    BlockHeight,
}

impl Opcode {
    /// Decode a byte, or `None` for a reserved byte.
    pub fn from_byte(b: u8) -> Option<Opcode> {
        use Opcode::*;
        let op = match b {
            0x00 => False,
            0x01..=0x4b => Data(b),
            0x4c => PushData1,
            0x4d => PushData2,
            0x4e => PushData4,
            0x51..=0x60 => Num(b - 0x50),
            0x61 => Nop,
            0x63 => Jump,
            0x64 => JumpIf,
            0x69 => Verify,
            0x6a => Fail,
            0x6b => ToAltStack,
            0x6c => FromAltStack,
            0x6d => Drop2,
            0x6e => Dup2,
            0x6f => Dup3,
            0x70 => Over2,
            0x71 => Rot2,
            0x72 => Swap2,
            0x73 => IfDup,
            0x74 => Depth,
            0x75 => Drop,
            0x76 => Dup,
            0x77 => Nip,
            0x78 => Over,
            0x79 => Pick,
            0x7a => Roll,
            0x7b => Rot,
            0x7c => Swap,
            0x7d => Tuck,
            0x7e => Cat,
            0x7f => Substr,
            0x80 => Left,
            0x81 => Right,
            0x82 => Size,
            0x83 => Invert,
            0x84 => And,
            0x85 => Or,
            0x86 => Xor,
            0x87 => Equal,
            0x88 => EqualVerify,
            0x89 => CatPushData,
            0x8b => Add1,
            0x8c => Sub1,
            0x8d => Mul2,
            0x8e => Div2,
            0x91 => Not,
            0x92 => ZeroNotEqual,
            0x93 => Add,
            0x94 => Sub,
            0x95 => Mul,
            0x96 => Div,
            0x97 => Mod,
            0x98 => LShift,
            0x99 => RShift,
            0x9a => BoolAnd,
            0x9b => BoolOr,
            0x9c => NumEqual,
            0x9d => NumEqualVerify,
            0x9e => NumNotEqual,
            0x9f => LessThan,
            0xa0 => GreaterThan,
            0xa1 => LessThanOrEqual,
            0xa2 => GreaterThanOrEqual,
            0xa3 => Min,
            0xa4 => Max,
            0xa5 => Within,
            0xa8 => Sha256,
            0xaa => Sha3,
            0xac => CheckSig,
            0xad => CheckMultiSig,
            0xae => TxSigHash,
            0xc1 => CheckOutput,
            0xc2 => Asset,
            0xc3 => Amount,
            0xc4 => Program,
            0xc9 => Index,
            0xca => EntryId,
            0xcb => OutputId,
            0xcd => BlockHeight,
            _ => return None,
        };
        Some(op)
    }

    pub fn to_byte(self) -> u8 {
        use Opcode::*;
        match self {
            False => 0x00,
            Data(n) => n,
            PushData1 => 0x4c,
            PushData2 => 0x4d,
            PushData4 => 0x4e,
            Num(n) => 0x50 + n,
            Nop => 0x61,
            Jump => 0x63,
            JumpIf => 0x64,
            Verify => 0x69,
            Fail => 0x6a,
            ToAltStack => 0x6b,
            FromAltStack => 0x6c,
            Drop2 => 0x6d,
            Dup2 => 0x6e,
            Dup3 => 0x6f,
            Over2 => 0x70,
            Rot2 => 0x71,
            Swap2 => 0x72,
            IfDup => 0x73,
            Depth => 0x74,
            Drop => 0x75,
            Dup => 0x76,
            Nip => 0x77,
            Over => 0x78,
            Pick => 0x79,
            Roll => 0x7a,
            Rot => 0x7b,
            Swap => 0x7c,
            Tuck => 0x7d,
            Cat => 0x7e,
            Substr => 0x7f,
            Left => 0x80,
            Right => 0x81,
            Size => 0x82,
            Invert => 0x83,
            And => 0x84,
            Or => 0x85,
            Xor => 0x86,
            Equal => 0x87,
            EqualVerify => 0x88,
            CatPushData => 0x89,
            Add1 => 0x8b,
            Sub1 => 0x8c,
            Mul2 => 0x8d,
            Div2 => 0x8e,
            Not => 0x91,
            ZeroNotEqual => 0x92,
            Add => 0x93,
            Sub => 0x94,
            Mul => 0x95,
            Div => 0x96,
            Mod => 0x97,
            LShift => 0x98,
            RShift => 0x99,
            BoolAnd => 0x9a,
            BoolOr => 0x9b,
            NumEqual => 0x9c,
            NumEqualVerify => 0x9d,
            NumNotEqual => 0x9e,
            LessThan => 0x9f,
            GreaterThan => 0xa0,
            LessThanOrEqual => 0xa1,
            GreaterThanOrEqual => 0xa2,
            Min => 0xa3,
            Max => 0xa4,
            Within => 0xa5,
            Sha256 => 0xa8,
            Sha3 => 0xaa,
            CheckSig => 0xac,
            CheckMultiSig => 0xad,
            TxSigHash => 0xae,
            CheckOutput => 0xc1,
            Asset => 0xc2,
            Amount => 0xc3,
            Program => 0xc4,
            Index => 0xc9,
            EntryId => 0xca,
            OutputId => 0xcb,
            BlockHeight => 0xcd,
        }
    }

    /// Assembler mnemonic. Data pushes have no mnemonic of their own.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            False => "FALSE",
            Data(_) => "DATA",
            PushData1 => "PUSHDATA1",
            PushData2 => "PUSHDATA2",
            PushData4 => "PUSHDATA4",
            Num(_) => "NUM",
            Nop => "NOP",
            Jump => "JUMP",
            JumpIf => "JUMPIF",
            Verify => "VERIFY",
            Fail => "FAIL",
            ToAltStack => "TOALTSTACK",
            FromAltStack => "FROMALTSTACK",
            Drop2 => "2DROP",
            Dup2 => "2DUP",
            Dup3 => "3DUP",
            Over2 => "2OVER",
            Rot2 => "2ROT",
            Swap2 => "2SWAP",
            IfDup => "IFDUP",
            Depth => "DEPTH",
            Drop => "DROP",
            Dup => "DUP",
            Nip => "NIP",
            Over => "OVER",
            Pick => "PICK",
            Roll => "ROLL",
            Rot => "ROT",
            Swap => "SWAP",
            Tuck => "TUCK",
            Cat => "CAT",
            Substr => "SUBSTR",
            Left => "LEFT",
            Right => "RIGHT",
            Size => "SIZE",
            Invert => "INVERT",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Equal => "EQUAL",
            EqualVerify => "EQUALVERIFY",
            CatPushData => "CATPUSHDATA",
            Add1 => "1ADD",
            Sub1 => "1SUB",
            Mul2 => "2MUL",
            Div2 => "2DIV",
            Not => "NOT",
            ZeroNotEqual => "0NOTEQUAL",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            LShift => "LSHIFT",
            RShift => "RSHIFT",
            BoolAnd => "BOOLAND",
            BoolOr => "BOOLOR",
            NumEqual => "NUMEQUAL",
            NumEqualVerify => "NUMEQUALVERIFY",
            NumNotEqual => "NUMNOTEQUAL",
            LessThan => "LESSTHAN",
            GreaterThan => "GREATERTHAN",
            LessThanOrEqual => "LESSTHANOREQUAL",
            GreaterThanOrEqual => "GREATERTHANOREQUAL",
            Min => "MIN",
            Max => "MAX",
            Within => "WITHIN",
            Sha256 => "SHA256",
            Sha3 => "SHA3",
            CheckSig => "CHECKSIG",
            CheckMultiSig => "CHECKMULTISIG",
            TxSigHash => "TXSIGHASH",
            CheckOutput => "CHECKOUTPUT",
            Asset => "ASSET",
            Amount => "AMOUNT",
            Program => "PROGRAM",
            Index => "INDEX",
            EntryId => "ENTRYID",
            OutputId => "OUTPUTID",
            BlockHeight => "BLOCKHEIGHT",
        }
    }

    /// Look up an opcode by mnemonic. Data pushes and numbers are not named.
    pub fn from_name(name: &str) -> Option<Opcode> {
        (0u8..=0xff)
            .filter_map(Opcode::from_byte)
            .filter(|op| !matches!(op, Opcode::Data(_) | Opcode::Num(_)))
            .find(|op| op.name() == name)
    }
}

/// A decoded instruction: opcode byte, inline data and encoded length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// Raw opcode byte.
    pub byte: u8,
    /// Decoded opcode, `None` for a reserved byte.
    pub op: Option<Opcode>,
    /// Inline push data or jump target bytes.
    pub data: &'a [u8],
    /// Total bytes consumed, opcode included.
    pub len: u32,
}

fn take<'a>(program: &'a [u8], start: usize, n: usize, pc: u32) -> VmResult<&'a [u8]> {
    let end = start.checked_add(n).ok_or(VmError::ShortProgram { pc })?;
    program.get(start..end).ok_or(VmError::ShortProgram { pc })
}

fn le_length(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rev()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize)
}

/// Decode the instruction starting at `pc`.
pub fn parse_op(program: &[u8], pc: u32) -> VmResult<Instruction<'_>> {
    let start = pc as usize;
    let byte = *program.get(start).ok_or(VmError::ShortProgram { pc })?;
    let op = Opcode::from_byte(byte);

    let (data, header) = match op {
        Some(Opcode::Data(n)) => (take(program, start + 1, n as usize, pc)?, 1),
        Some(Opcode::PushData1) | Some(Opcode::PushData2) | Some(Opcode::PushData4) => {
            let width = match op {
                Some(Opcode::PushData1) => 1,
                Some(Opcode::PushData2) => 2,
                _ => 4,
            };
            let n = le_length(take(program, start + 1, width, pc)?);
            (take(program, start + 1 + width, n, pc)?, 1 + width)
        }
        Some(Opcode::Jump) | Some(Opcode::JumpIf) => (take(program, start + 1, 4, pc)?, 1),
        _ => (&program[start..start], 1),
    };

    let len = u32::try_from(header + data.len()).map_err(|_| VmError::ShortProgram { pc })?;
    Ok(Instruction {
        byte,
        op,
        data,
        len,
    })
}

/// Encode `data` as a single push instruction.
pub fn encode_push(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut out = Vec::with_capacity(len + 5);
    match len {
        0 => out.push(Opcode::False.to_byte()),
        1..=75 => out.push(len as u8),
        76..=0xff => {
            out.push(Opcode::PushData1.to_byte());
            out.push(len as u8);
        }
        0x100..=0xffff => {
            out.push(Opcode::PushData2.to_byte());
            out.extend_from_slice(&(len as u16).to_le_bytes());
        }
        _ => {
            out.push(Opcode::PushData4.to_byte());
            out.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }
    out.extend_from_slice(data);
    out
}

/// Decode every instruction of a program.
pub fn parse_program(program: &[u8]) -> VmResult<Vec<Instruction<'_>>> {
    let mut out = Vec::new();
    let mut pc = 0u32;
    while (pc as usize) < program.len() {
        let inst = parse_op(program, pc)?;
        pc += inst.len;
        out.push(inst);
    }
    Ok(out)
}
