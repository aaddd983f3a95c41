//! Gas accounting for transactions and blocks.
//!
//! ## Gas Model
//!
//! A transaction buys gas with its native fee:
//! `credit = min(fee / vm_gas_rate, max_gas_amount)`.
//! Every spend input's program runs with the remaining credit as its run
//! limit, and whatever it consumes is subtracted. Once all programs have
//! run, storage gas (`serialized_size * storage_gas_rate`) must still fit in
//! what is left.
//!
//! Blocks sum the gas of their transactions into a `CostAccumulator` bounded
//! by `max_block_gas`.

use crate::error::{ValidationError, ValidationResult};
use crate::params::NetworkParams;

/// Per-transaction gas state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasState {
    /// Credit still available to programs and storage.
    credit: u64,
    /// Gas consumed by programs so far.
    vm_gas: u64,
    /// Gas charged for storage, set once by `charge_storage`.
    storage_gas: u64,
}

impl GasState {
    /// Buy gas with `fee` under the rates of `params`.
    pub fn from_fee(fee: u64, params: &NetworkParams) -> Self {
        let rate = params.vm_gas_rate.max(1);
        Self {
            credit: (fee / rate).min(params.max_gas_amount),
            vm_gas: 0,
            storage_gas: 0,
        }
    }

    /// Run limit to hand to the program of input `index`.
    ///
    /// An exhausted credit fails before the program starts.
    pub fn run_limit(&self, index: usize) -> ValidationResult<u64> {
        if self.credit == 0 {
            return Err(ValidationError::OverGasCredit { index });
        }
        Ok(self.credit)
    }

    /// Subtract gas consumed by a program run.
    pub fn consume(&mut self, used: u64) {
        self.credit = self.credit.saturating_sub(used);
        self.vm_gas = self.vm_gas.saturating_add(used);
    }

    /// Charge storage gas for a transaction of `size` bytes.
    pub fn charge_storage(&mut self, size: usize, params: &NetworkParams) -> ValidationResult<()> {
        let needed = (size as u64).saturating_mul(params.storage_gas_rate);
        if needed > self.credit {
            return Err(ValidationError::InsufficientGas {
                needed,
                remaining: self.credit,
            });
        }
        self.credit -= needed;
        self.storage_gas = needed;
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.credit
    }

    pub fn vm_gas(&self) -> u64 {
        self.vm_gas
    }

    pub fn storage_gas(&self) -> u64 {
        self.storage_gas
    }

    /// Total gas charged: programs plus storage.
    pub fn gas_used(&self) -> u64 {
        self.vm_gas.saturating_add(self.storage_gas)
    }
}

/// Accumulates gas across the transactions of a block.
#[derive(Debug, Clone)]
pub struct CostAccumulator {
    current: u64,
    limit: u64,
}

impl CostAccumulator {
    pub fn new(limit: u64) -> Self {
        Self { current: 0, limit }
    }

    /// Accumulator bounded by the block gas limit of `params`.
    pub fn for_block(params: &NetworkParams) -> Self {
        Self::new(params.max_block_gas)
    }

    /// Add gas, failing once the limit is exceeded.
    pub fn add(&mut self, gas: u64) -> ValidationResult<()> {
        self.current = self.current.saturating_add(gas);
        if self.current > self.limit {
            Err(ValidationError::BlockGasExceeded {
                gas: self.current,
                max: self.limit,
            })
        } else {
            Ok(())
        }
    }

    pub fn total(&self) -> u64 {
        self.current
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Check if adding `gas` would exceed the limit, without adding.
    pub fn would_exceed(&self, gas: u64) -> bool {
        self.current.saturating_add(gas) > self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============ GasState Tests ============

    #[test]
    fn test_credit_from_fee() {
        let params = NetworkParams::solonet();
        let gas = GasState::from_fee(200 * 1000, &params);
        assert_eq!(gas.remaining(), 1000);

        let capped = GasState::from_fee(u64::MAX, &params);
        assert_eq!(capped.remaining(), params.max_gas_amount);
    }

    #[test]
    fn test_zero_credit_fails_before_run() {
        let params = NetworkParams::solonet();
        let gas = GasState::from_fee(params.vm_gas_rate - 1, &params);
        assert_eq!(
            gas.run_limit(3),
            Err(ValidationError::OverGasCredit { index: 3 })
        );
    }

    #[test]
    fn test_consume_and_storage() {
        let params = NetworkParams::solonet();
        let mut gas = GasState::from_fee(200 * 1000, &params);
        gas.consume(400);
        assert_eq!(gas.remaining(), 600);
        gas.charge_storage(500, &params).unwrap();
        assert_eq!(gas.remaining(), 100);
        assert_eq!(gas.gas_used(), 900);

        let err = gas.charge_storage(101, &params).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InsufficientGas {
                needed: 101,
                remaining: 100
            }
        );
    }

    // ============ CostAccumulator Tests ============

    #[test]
    fn test_accumulator_limit() {
        let mut acc = CostAccumulator::new(100);
        acc.add(60).unwrap();
        assert!(!acc.would_exceed(40));
        assert!(acc.would_exceed(41));
        acc.add(40).unwrap();
        assert_eq!(acc.remaining(), 0);
        assert_eq!(
            acc.add(1),
            Err(ValidationError::BlockGasExceeded { gas: 101, max: 100 })
        );
    }
}
