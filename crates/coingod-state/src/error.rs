//! Error types for ledger state and the chain state machine.

use coingod_consensus::{BlockHash, CodecError, Hash, OutputId, ParamsError, ValidationError};
use coingod_storage::StorageError;
use coingod_vm::ErrorKind;
use thiserror::Error;

/// Failures applying or rolling back a block against a viewpoint.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid block content: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Output {0} already spent")]
    AlreadySpent(OutputId),

    #[error("Output {0} not found")]
    NotFound(OutputId),

    #[error("Output {0} already exists")]
    AlreadyExists(OutputId),

    #[error("Contract {0} already registered")]
    ContractDuplicated(Hash),

    #[error("Contract {0} not found")]
    ContractNotFound(Hash),

    #[error("No undo data for block {0}")]
    UndoMissing(BlockHash),

    #[error("Data corruption detected: {0}")]
    Corruption(String),
}

impl StateError {
    pub fn code(&self) -> &'static str {
        match self {
            StateError::AlreadySpent(_) => "CG713",
            StateError::NotFound(_) => "CG712",
            StateError::ContractDuplicated(_) => "CG302",
            StateError::ContractNotFound(_) => "CG303",
            StateError::Invalid(e) => e.code(),
            _ => "CG806",
        }
    }
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Why the chain refused or could not process a block.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Block {0} was rejected")]
    Rejected(BlockHash),

    #[error("Block height {height} is at or below finalized height {finalized}")]
    BelowFinalized { height: u64, finalized: u64 },

    #[error("Branch of block {hash} does not contain the finalized block at {finalized}")]
    ForkBelowFinalized { hash: BlockHash, finalized: u64 },

    #[error("Block parent {got} is not the best tip {expected}")]
    ParentMismatch { got: BlockHash, expected: BlockHash },

    #[error("Processing abandoned for a heavier candidate")]
    Abandoned,

    #[error("Genesis block {stored} in storage does not match network genesis {expected}")]
    GenesisMismatch { stored: BlockHash, expected: BlockHash },

    #[error("Invalid network parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ChainError {
    /// Stable identifier exposed at the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::Validation(e) => e.code(),
            ChainError::Rejected(_) => "CG801",
            ChainError::BelowFinalized { .. } | ChainError::ForkBelowFinalized { .. } => "CG802",
            ChainError::ParentMismatch { .. } => "CG803",
            ChainError::Abandoned => "CG804",
            _ => "CG806",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Validation(e) => e.kind(),
            ChainError::Rejected(_)
            | ChainError::BelowFinalized { .. }
            | ChainError::ForkBelowFinalized { .. } => ErrorKind::Malformed,
            ChainError::ParentMismatch { .. } | ChainError::Abandoned => ErrorKind::StateConflict,
            _ => ErrorKind::Internal,
        }
    }
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
