//! Error types for the mempool.

use coingod_consensus::{OutputId, TxId};
use coingod_state::ChainError;
use coingod_vm::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("Transaction already in mempool: {0}")]
    AlreadyExists(TxId),

    /// Another pooled transaction holds the output.
    #[error("Output {output_id} is reserved by transaction {holder}")]
    Reserved { output_id: OutputId, holder: TxId },

    #[error("Transaction too large: {size} bytes, max {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// The transaction ranked lowest and was evicted on arrival.
    #[error("Mempool full: {count} transactions, {size} bytes")]
    Full { count: usize, size: usize },

    #[error("Transaction not found: {0}")]
    NotFound(TxId),

    #[error("Transaction rejected: {0}")]
    Validation(#[from] ChainError),
}

impl MempoolError {
    /// Stable code, where the condition has one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            MempoolError::Reserved { .. } | MempoolError::AlreadyExists(_) => Some("CG702"),
            MempoolError::TooLarge { .. } => Some("CG731"),
            MempoolError::Validation(e) => Some(e.code()),
            MempoolError::Full { .. } | MempoolError::NotFound(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MempoolError::Reserved { .. }
            | MempoolError::AlreadyExists(_)
            | MempoolError::NotFound(_) => ErrorKind::StateConflict,
            MempoolError::TooLarge { .. } | MempoolError::Full { .. } => {
                ErrorKind::ResourceExhausted
            }
            MempoolError::Validation(e) => e.kind(),
        }
    }
}

/// Result type for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
