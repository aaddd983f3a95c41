//! # coingod-mempool
//!
//! Pending-transaction pool for the coingod node.
//!
//! This crate provides:
//! - Per-output reservations that fail fast on conflict
//! - Validation against the chain's committed tip before acceptance
//! - Fee-per-byte ordering with arrival order breaking ties
//! - Count and size bounds with lowest-priority eviction

mod error;
mod ordering;
mod pool;

pub use error::{MempoolError, MempoolResult};
pub use ordering::FeeOrdering;
pub use pool::{Mempool, MempoolConfig, MempoolStats, PooledTransaction};

/// Byte bound on the encoded transactions held by the pool.
pub const DEFAULT_MAX_SIZE: usize = 32 * 1024 * 1024;

/// Count bound on pooled transactions.
pub const DEFAULT_MAX_TXS: usize = 10_000;
