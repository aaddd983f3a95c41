//! # coingod-vm
//!
//! Stack virtual machine that evaluates control programs.
//!
//! This crate provides:
//! - Unsigned 256-bit number encoding and truthiness rules
//! - The opcode table, instruction decoding and an assembler
//! - The interpreter with run-limit and memory accounting
//! - The error taxonomy shared by the validation and state layers
//!
//! ## Run limit
//!
//! Every opcode debits a fixed or size-dependent cost. Items on the data
//! stack additionally cost `8 + len` while they are held, refunded when they
//! are popped. A program fails with `RunLimitExceeded` the moment its
//! consumption would exceed the limit it was given.

pub mod assembler;
mod context;
pub mod crypto;
mod error;
pub mod numeric;
pub mod opcodes;
mod ops;
mod stack;
mod vm;

/// The only VM version accepted by this implementation.
pub const VM_VERSION: u64 = 1;

pub use assembler::{assemble, disassemble};
pub use context::{ExecutionContext, NoContext};
pub use error::{ErrorKind, VmError, VmResult};
pub use opcodes::{encode_push, parse_op, Instruction, Opcode};
pub use stack::{Stack, Underflow};
pub use vm::{run, Execution, VirtualMachine, VmConfig, DEFAULT_MAX_PROGRAM_LEN, ITEM_OVERHEAD};
