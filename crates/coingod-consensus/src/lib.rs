//! # coingod-consensus
//!
//! Chain types and consensus rules for the coingod ledger.
//!
//! This crate provides:
//! - Transactions, blocks and finality votes with their canonical encoding
//! - Network profiles (`mainnet`, `wisdom`, `solonet`) and their parameters
//! - Control-program templates and contract registration
//! - Gas purchase and block gas accounting
//! - Transaction and block validation, reading state through lookup traits
//!
//! ## Identifiers
//!
//! Every identifier is BLAKE2b-256 over a domain tag and the canonical
//! encoding of the object. A transaction id excludes spend arguments, so a
//! signature over the id cannot cover itself.
//!
//! ## Validation
//!
//! Validation never mutates state. A successful run returns the exact delta
//! (spent outputs, created outputs, contract registrations and state writes)
//! that the state layer applies.

pub mod block;
pub mod block_validation;
pub mod codec;
pub mod cost;
mod error;
mod genesis;
pub mod hash;
pub mod ledger;
pub mod params;
pub mod program;
pub mod transaction;
pub mod tx_validation;

pub use block::{Block, BlockHeader, FinalityVote, BLOCK_VERSION};
pub use block_validation::{BlockValidator, ValidatedBlock};
pub use codec::{CodecError, CodecResult, Decode, Encode};
pub use cost::{CostAccumulator, GasState};
pub use error::{ValidationError, ValidationResult};
pub use genesis::genesis_block;
pub use hash::{merkle_root, AssetId, BlockHash, Hash, OutputId, TxId};
pub use ledger::{ContractLookup, ContractRecord, StateDelta, UtxoEntry, UtxoLookup};
pub use params::{NetworkParams, ParamsError, ParamsOverrides, Validator};
pub use program::ProgramKind;
pub use transaction::{AssetAmount, OutputTemplate, Transaction, TxInput, TxOutput, ValueSource};
pub use tx_validation::{BlockContext, InputContext, TxValidator, ValidatedTx};
