//! Transaction ordering by fee per byte.

use coingod_consensus::TxId;
use std::cmp::Ordering;

/// Priority key of a pooled transaction.
#[derive(Debug, Clone)]
pub struct FeeOrdering {
    pub tx_id: TxId,
    pub fee: u64,
    /// Serialized size in bytes.
    pub size: usize,
    /// Pool arrival sequence number.
    pub arrival: u64,
}

impl FeeOrdering {
    pub fn new(tx_id: TxId, fee: u64, size: usize, arrival: u64) -> Self {
        Self {
            tx_id,
            fee,
            size,
            arrival,
        }
    }

    /// Fee per byte, for reporting only. Ordering compares exactly.
    pub fn fee_per_byte(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.fee as f64 / self.size as f64
        }
    }
}

impl PartialEq for FeeOrdering {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FeeOrdering {}

impl PartialOrd for FeeOrdering {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeeOrdering {
    /// Highest fee per byte first, then earliest arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        // a/b > c/d  <=>  a*d > c*b
        let mine = self.fee as u128 * other.size.max(1) as u128;
        let theirs = other.fee as u128 * self.size.max(1) as u128;
        theirs
            .cmp(&mine)
            .then_with(|| self.arrival.cmp(&other.arrival))
            .then_with(|| self.tx_id.cmp(&other.tx_id))
    }
}
