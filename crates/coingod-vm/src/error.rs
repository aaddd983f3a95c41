//! VM error types and the error taxonomy shared by the ledger core.

use thiserror::Error;

/// How a failure should be treated by callers.
///
/// Fee and penalty policy differs by kind, so every error in the core maps
/// to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad size, version, field or encoding. Never valid.
    Malformed,
    /// Run limit, program length or payload bounds exceeded.
    ResourceExhausted,
    /// Arithmetic or balance condition (unbalanced, overflow, insufficient gas).
    Economic,
    /// Conflicts with current state; may become valid later.
    StateConflict,
    /// The script ran and explicitly rejected the spend.
    ScriptRejected,
    /// Storage or other internal failure unrelated to the input.
    Internal,
}

impl ErrorKind {
    /// Whether resubmitting after new blocks arrive can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StateConflict | ErrorKind::Internal)
    }
}

/// Errors raised while executing a program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("alt stack underflow: required {required}, available {available}")]
    AltStackUnderflow { required: usize, available: usize },

    #[error("bad value: {reason}")]
    BadValue { reason: &'static str },

    #[error("opcode {op} requires a transaction context")]
    Context { op: &'static str },

    #[error("data stack underflow: required {required}, available {available}")]
    DataStackUnderflow { required: usize, available: usize },

    #[error("disallowed opcode 0x{opcode:02x}")]
    DisallowedOpcode { opcode: u8 },

    #[error("division by zero")]
    DivZero,

    #[error("false VM result")]
    FalseResult,

    #[error("program length {len} exceeds maximum {max}")]
    LongProgram { len: usize, max: usize },

    #[error("range error in {op}")]
    Range { op: &'static str },

    #[error("return executed")]
    Return,

    #[error("run limit exceeded: needed {needed}, remaining {remaining}")]
    RunLimitExceeded { needed: i64, remaining: i64 },

    #[error("unexpected end of program at pc {pc}")]
    ShortProgram { pc: u32 },

    #[error("unrecognized token: {0}")]
    Token(String),

    #[error("unsupported VM version {version}")]
    UnsupportedVm { version: u64 },

    #[error("verify failed")]
    VerifyFailed,
}

impl VmError {
    /// Stable identifier exposed at the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            VmError::AltStackUnderflow { .. } => "CG760",
            VmError::BadValue { .. } => "CG761",
            VmError::Context { .. } => "CG762",
            VmError::DataStackUnderflow { .. } => "CG763",
            VmError::DisallowedOpcode { .. } => "CG764",
            VmError::DivZero => "CG765",
            VmError::FalseResult => "CG766",
            VmError::LongProgram { .. } => "CG767",
            VmError::Range { .. } => "CG768",
            VmError::Return => "CG769",
            VmError::RunLimitExceeded { .. } => "CG770",
            VmError::ShortProgram { .. } => "CG771",
            VmError::Token(_) => "CG772",
            VmError::UnsupportedVm { .. } => "CG774",
            VmError::VerifyFailed => "CG775",
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::VerifyFailed | VmError::Return | VmError::FalseResult => {
                ErrorKind::ScriptRejected
            }
            VmError::RunLimitExceeded { .. } | VmError::LongProgram { .. } => {
                ErrorKind::ResourceExhausted
            }
            _ => ErrorKind::Malformed,
        }
    }
}

/// Result type for VM operations.
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        assert_eq!(VmError::VerifyFailed.kind(), ErrorKind::ScriptRejected);
        assert_eq!(
            VmError::RunLimitExceeded {
                needed: 2,
                remaining: 1
            }
            .kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            VmError::DataStackUnderflow {
                required: 2,
                available: 1
            }
            .kind(),
            ErrorKind::Malformed
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(VmError::DivZero.code(), "CG765");
        assert_eq!(VmError::Token("x".into()).code(), "CG772");
        assert!(ErrorKind::StateConflict.is_retryable());
        assert!(!ErrorKind::Malformed.is_retryable());
    }
}
