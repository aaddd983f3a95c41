//! # coingod-tests
//!
//! Integration tests for the coingod ledger core.
//!
//! This crate provides:
//! - A harness with RocksDB-backed chains, signing keys and block builders
//! - Proptest strategies for programs, UTXO sets and block shapes
//! - Property tests for VM, validation, ledger and finality invariants
//! - End-to-end scenarios: in-block chaining, contracts, reorgs, restarts
//!   and mempool reservations

pub mod generators;
pub mod harness;

#[cfg(test)]
mod property_tests;




pub use generators::*;
pub use harness::*;
