//! # coingod-state
//!
//! Ledger state and the chain state machine.
//!
//! This crate provides:
//! - `UtxoViewpoint` and `ContractViewpoint`: reversible working sets that
//!   apply or roll back one block at a time
//! - `ChainStore`: the column-family layout of blocks, index, undo data,
//!   votes and metadata
//! - `FinalityTracker`: stake-weighted checkpoint justification
//! - `Chain`: fork choice, reorganization and finality over a `Storage`
//!
//! ## Commit model
//!
//! Viewpoints are private to the transition that builds them. Nothing they
//! hold is visible until the transition's single write batch commits.

mod chain;
mod contract;
mod error;
mod finality;
mod store;
mod utxo;

pub use chain::{BlockOutcome, Chain, ChainTip, MAX_ORPHANS};
pub use contract::ContractViewpoint;
pub use error::{ChainError, ChainResult, StateError, StateResult};
pub use finality::{Checkpoint, FinalityTracker, Tally};
pub use store::{BlockMeta, BlockStatus, ChainStore};
pub use utxo::UtxoViewpoint;
