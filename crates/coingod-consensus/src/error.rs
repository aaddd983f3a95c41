//! Error types for transaction and block validation.

use crate::codec::CodecError;
use crate::hash::{AssetId, Hash};
use coingod_vm::{ErrorKind, VmError};
use thiserror::Error;

/// Why a transaction or block was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // ---- transaction structure ----
    #[error("unsupported transaction version {version}")]
    TxVersion { version: u64 },

    #[error("transaction size {size} outside (0, {max}]")]
    WrongTransactionSize { size: usize, max: usize },

    #[error("time range {time_range} expired before block time {timestamp}")]
    TimeRange { time_range: u64, timestamp: u64 },

    #[error("non-standard program: {0}")]
    NotStandard(&'static str),

    #[error("transaction has no outputs")]
    EmptyResults,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("output {index} references mux {got}, expected {expected}")]
    MismatchedReference { index: usize, got: Hash, expected: Hash },

    #[error("output {index} claims position {position}")]
    MismatchedPosition { index: usize, position: u64 },

    // ---- coinbase ----
    #[error("wrong coinbase transaction: {0}")]
    WrongCoinbaseTransaction(&'static str),

    #[error("coinbase output {index} pays a non-native asset")]
    WrongCoinbaseAsset { index: usize },

    #[error("coinbase arbitrary data of {len} bytes exceeds {max}")]
    CoinbaseArbitraryOversize { len: usize, max: usize },

    // ---- input resolution ----
    #[error("input {index} spends unknown output {output_id}")]
    OrphanInput { index: usize, output_id: Hash },

    #[error("output {output_id} already spent")]
    AlreadySpent { output_id: Hash },

    #[error("coinbase output {output_id} is immature: depth {depth}, required {required}")]
    Immature {
        output_id: Hash,
        depth: u64,
        required: u64,
    },

    #[error("input {index} restates asset {got}, output holds {expected}")]
    MismatchedAssetId {
        index: usize,
        got: AssetId,
        expected: AssetId,
    },

    #[error("input {index} restates amount {got}, output holds {expected}")]
    MismatchedValue { index: usize, got: u64, expected: u64 },

    #[error("input {index} restates a different control program")]
    MismatchedProgram { index: usize },

    // ---- balance and gas ----
    #[error("amount overflow")]
    Overflow,

    #[error("asset {asset_id} is unbalanced: inputs {inputs}, outputs {outputs}")]
    Unbalanced {
        asset_id: AssetId,
        inputs: u64,
        outputs: u64,
    },

    #[error("output asset {asset_id} has no input source")]
    NoSource { asset_id: AssetId },

    #[error("fee {fee} exceeds limit {max}")]
    FeeOverLimit { fee: u64, max: u64 },

    #[error("gas credit exhausted before input {index}")]
    OverGasCredit { index: usize },

    #[error("insufficient gas: storage needs {needed}, {remaining} left")]
    InsufficientGas { needed: u64, remaining: u64 },

    #[error("input {index} program failed: {source}")]
    Vm {
        index: usize,
        #[source]
        source: VmError,
    },

    // ---- contracts ----
    #[error("contract {0} already registered")]
    ContractDuplicated(Hash),

    #[error("contract {0} not found")]
    ContractNotFound(Hash),

    #[error("contract {contract} expects {expected} state cells, got {got}")]
    StateSchemaMismatch {
        contract: Hash,
        expected: usize,
        got: usize,
    },

    #[error("contract registration pays {amount}, requires {required}")]
    BcrpAmount { amount: u64, required: u64 },

    // ---- block ----
    #[error("unsupported block version {version}")]
    BlockVersion { version: u64 },

    #[error("block height {got}, expected {expected}")]
    BlockHeight { got: u64, expected: u64 },

    #[error("block parent {got} does not match {expected}")]
    BlockParent { got: Hash, expected: Hash },

    #[error("block timestamp {timestamp} not after parent {parent}")]
    TimestampTooOld { timestamp: u64, parent: u64 },

    #[error("block timestamp {timestamp} too far ahead of {now}")]
    TimestampTooNew { timestamp: u64, now: u64 },

    #[error("merkle root mismatch")]
    MerkleRoot,

    #[error("block has no transactions")]
    EmptyBlock,

    #[error("block gas {gas} exceeds {max}")]
    BlockGasExceeded { gas: u64, max: u64 },

    #[error("invalid finality vote: {0}")]
    InvalidVote(&'static str),

    #[error("validation abandoned")]
    Abandoned,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ValidationError {
    /// Stable identifier exposed at the API boundary.
    pub fn code(&self) -> &'static str {
        use ValidationError::*;
        match self {
            TxVersion { .. } => "CG730",
            WrongTransactionSize { .. } => "CG731",
            TimeRange { .. } => "CG732",
            NotStandard(_) => "CG733",
            WrongCoinbaseTransaction(_) => "CG734",
            WrongCoinbaseAsset { .. } => "CG735",
            CoinbaseArbitraryOversize { .. } => "CG736",
            EmptyResults => "CG737",
            MismatchedAssetId { .. } => "CG738",
            MismatchedPosition { .. } => "CG739",
            MismatchedReference { .. } | MismatchedProgram { .. } => "CG740",
            MismatchedValue { .. } => "CG741",
            MissingField(_) => "CG742",
            NoSource { .. } => "CG743",
            Overflow => "CG744",
            Unbalanced { .. } => "CG746",
            OverGasCredit { .. } => "CG747",
            InsufficientGas { .. } => "CG748",
            FeeOverLimit { .. } => "CG749",
            OrphanInput { .. } => "CG712",
            AlreadySpent { .. } => "CG713",
            Immature { .. } => "CG714",
            Vm { source, .. } => source.code(),
            ContractDuplicated(_) => "CG302",
            ContractNotFound(_) => "CG303",
            StateSchemaMismatch { .. } => "CG304",
            BcrpAmount { .. } => "CG305",
            BlockVersion { .. } => "CG720",
            BlockHeight { .. } => "CG721",
            BlockParent { .. } => "CG722",
            TimestampTooOld { .. } | TimestampTooNew { .. } => "CG723",
            MerkleRoot => "CG724",
            EmptyBlock => "CG725",
            BlockGasExceeded { .. } => "CG726",
            InvalidVote(_) => "CG805",
            Abandoned => "CG804",
            Codec(_) => "CG773",
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        use ValidationError::*;
        match self {
            Vm { source, .. } => source.kind(),
            CoinbaseArbitraryOversize { .. } | BlockGasExceeded { .. } => {
                ErrorKind::ResourceExhausted
            }
            Overflow
            | Unbalanced { .. }
            | NoSource { .. }
            | FeeOverLimit { .. }
            | OverGasCredit { .. }
            | InsufficientGas { .. }
            | BcrpAmount { .. } => ErrorKind::Economic,
            OrphanInput { .. }
            | AlreadySpent { .. }
            | Immature { .. }
            | ContractDuplicated(_)
            | ContractNotFound(_)
            | TimestampTooNew { .. }
            | Abandoned => ErrorKind::StateConflict,
            Codec(_) => ErrorKind::Internal,
            _ => ErrorKind::Malformed,
        }
    }

    /// Whether the verdict comes from the local clock rather than the
    /// block's content. Such a block may pass once time catches up.
    pub fn depends_on_clock(&self) -> bool {
        matches!(self, ValidationError::TimestampTooNew { .. })
    }

    /// Whether the failure is an unresolved input that may arrive later.
    pub fn is_orphan(&self) -> bool {
        matches!(self, ValidationError::OrphanInput { .. })
    }
}

/// Result type for validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_errors_keep_code_and_kind() {
        let err = ValidationError::Vm {
            index: 0,
            source: VmError::VerifyFailed,
        };
        assert_eq!(err.code(), "CG775");
        assert_eq!(err.kind(), ErrorKind::ScriptRejected);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ValidationError::Overflow.kind(), ErrorKind::Economic);
        assert_eq!(
            ValidationError::AlreadySpent {
                output_id: Hash::ZERO
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(ValidationError::EmptyResults.kind(), ErrorKind::Malformed);
        assert_eq!(
            ValidationError::CoinbaseArbitraryOversize { len: 200, max: 128 }.kind(),
            ErrorKind::ResourceExhausted
        );
        assert!(ValidationError::OrphanInput {
            index: 0,
            output_id: Hash::ZERO
        }
        .is_orphan());
    }

    #[test]
    fn test_only_future_timestamps_depend_on_clock() {
        let future = ValidationError::TimestampTooNew {
            timestamp: 10_000,
            now: 0,
        };
        assert!(future.depends_on_clock());
        assert_eq!(future.code(), "CG723");

        let past = ValidationError::TimestampTooOld {
            timestamp: 0,
            parent: 1,
        };
        assert!(!past.depends_on_clock());
        assert!(!ValidationError::OrphanInput {
            index: 0,
            output_id: Hash::ZERO
        }
        .depends_on_clock());
    }
}
