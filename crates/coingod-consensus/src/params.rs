//! Network parameters.
//!
//! Every consensus constant lives in one immutable [`NetworkParams`] value
//! that is passed to validators, the chain and the pool. Three profiles are
//! built in:
//! - `mainnet` for production
//! - `wisdom` for the public test network
//! - `solonet` for single-node development
//!
//! A profile may be adjusted from configuration with [`ParamsOverrides`] and
//! is checked by [`NetworkParams::validate`] before use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Native asset units in one CG.
pub const CG_UNIT: u64 = 100_000_000;

/// Federation key shared by the public networks.
pub const FEDERATION_KEY: &str = "8c675cc0d0de07618dedd702fe54321f3dd0ab46b4b50deac4b87940ac0a974f";

/// Genesis recipient program.
pub const GENESIS_PROGRAM: &str = "0014f09582056ca6dea02c11c136a831fd25d090927e";

/// Arbitrary payload of the genesis coinbase.
pub const GENESIS_MESSAGE: &str =
    "Information is power. -- Jan/11/2013. Computing is power. -- Apr/24/2024.";

/// A finality validator and its stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Hex-encoded ed25519 public key.
    pub pubkey: String,
    pub stake: u64,
}

impl Validator {
    pub fn key_bytes(&self) -> Option<[u8; 32]> {
        hex::decode(&self.pubkey).ok()?.try_into().ok()
    }
}

/// Error when a parameter set is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsError {
    /// The field that is missing or invalid.
    pub field: &'static str,
    /// Description of the error.
    pub message: String,
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network params error for '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ParamsError {}

fn invalid(field: &'static str, message: impl Into<String>) -> ParamsError {
    ParamsError {
        field,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub name: String,

    // Casper
    pub block_time_interval_ms: u64,
    pub max_time_offset_ms: u64,
    pub blocks_of_epoch: u64,
    pub min_validator_vote_num: u64,
    pub max_num_of_validators: usize,
    /// A checkpoint is justified by strictly more than
    /// `numerator / denominator` of the total stake.
    pub finality_threshold_numerator: u64,
    pub finality_threshold_denominator: u64,

    // Gas and fees
    pub vm_gas_rate: u64,
    pub storage_gas_rate: u64,
    pub max_gas_amount: u64,
    pub max_block_gas: u64,
    pub max_fee: u64,
    pub max_tx_size: usize,
    pub max_program_len: usize,

    // Issuance
    pub block_reward: u64,
    pub init_supply: u64,
    pub coinbase_pending_blocks: u64,
    pub coinbase_arbitrary_limit: usize,
    pub bcrp_required_amount: u64,

    // Genesis
    /// Hex-encoded control program receiving the initial supply.
    pub genesis_program: String,
    pub genesis_timestamp: u64,

    pub validators: Vec<Validator>,
}

impl NetworkParams {
    fn base(name: &str) -> Self {
        Self {
            name: name.to_string(),
            block_time_interval_ms: 6_000,
            max_time_offset_ms: 3_000,
            blocks_of_epoch: 100,
            min_validator_vote_num: CG_UNIT,
            max_num_of_validators: 10,
            validators: Vec::new(),
            finality_threshold_numerator: 2,
            finality_threshold_denominator: 3,
            vm_gas_rate: 200,
            storage_gas_rate: 1,
            max_gas_amount: 300_000,
            max_block_gas: 10_000_000,
            max_fee: 1_000 * CG_UNIT,
            max_tx_size: 1 << 20,
            max_program_len: coingod_vm::DEFAULT_MAX_PROGRAM_LEN,
            block_reward: 2 * CG_UNIT,
            init_supply: 3_200_000 * CG_UNIT,
            coinbase_pending_blocks: 10,
            coinbase_arbitrary_limit: 128,
            bcrp_required_amount: CG_UNIT,
            genesis_program: GENESIS_PROGRAM.to_string(),
            genesis_timestamp: 1_713_916_800_000,
        }
    }

    fn federation(stake: u64) -> Vec<Validator> {
        vec![Validator {
            pubkey: FEDERATION_KEY.to_string(),
            stake,
        }]
    }

    pub fn mainnet() -> Self {
        let min_vote = 3 * 100_000_000_000_000;
        Self {
            blocks_of_epoch: 10,
            min_validator_vote_num: min_vote,
            validators: Self::federation(min_vote),
            ..Self::base("mainnet")
        }
    }

    pub fn testnet() -> Self {
        Self {
            validators: Self::federation(CG_UNIT),
            ..Self::base("wisdom")
        }
    }

    pub fn solonet() -> Self {
        Self {
            max_time_offset_ms: 24_000,
            ..Self::base("solonet")
        }
    }

    /// Look up a built-in profile by chain id.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mainnet" => Some(Self::mainnet()),
            "wisdom" | "testnet" => Some(Self::testnet()),
            "solonet" => Some(Self::solonet()),
            _ => None,
        }
    }

    pub fn genesis_program_bytes(&self) -> Result<Vec<u8>, ParamsError> {
        hex::decode(&self.genesis_program)
            .map_err(|e| invalid("genesis_program", format!("invalid hex: {}", e)))
    }

    /// Keys and stakes of the configured validators.
    pub fn validator_set(&self) -> Result<Vec<([u8; 32], u64)>, ParamsError> {
        self.validators
            .iter()
            .map(|v| {
                v.key_bytes()
                    .map(|key| (key, v.stake))
                    .ok_or_else(|| invalid("validators", format!("bad key '{}'", v.pubkey)))
            })
            .collect()
    }

    pub fn total_stake(&self) -> u64 {
        self.validators
            .iter()
            .fold(0u64, |acc, v| acc.saturating_add(v.stake))
    }

    /// Whether `height` is an epoch checkpoint.
    pub fn is_checkpoint(&self, height: u64) -> bool {
        self.blocks_of_epoch > 0 && height % self.blocks_of_epoch == 0
    }

    /// Whether `stake` out of the total justifies a checkpoint.
    pub fn justifies(&self, stake: u64) -> bool {
        let total = self.total_stake() as u128;
        total > 0
            && (stake as u128) * (self.finality_threshold_denominator as u128)
                > total * (self.finality_threshold_numerator as u128)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.blocks_of_epoch == 0 {
            return Err(invalid("blocks_of_epoch", "must be positive"));
        }
        if self.vm_gas_rate == 0 {
            return Err(invalid("vm_gas_rate", "must be positive"));
        }
        if self.finality_threshold_denominator == 0
            || self.finality_threshold_numerator >= self.finality_threshold_denominator
        {
            return Err(invalid(
                "finality_threshold_numerator",
                "threshold must be a fraction below one",
            ));
        }
        if self.validators.len() > self.max_num_of_validators {
            return Err(invalid(
                "validators",
                format!(
                    "{} validators exceed the maximum of {}",
                    self.validators.len(),
                    self.max_num_of_validators
                ),
            ));
        }
        let keys = self.validator_set()?;
        for (i, (key, stake)) in keys.iter().enumerate() {
            if *stake < self.min_validator_vote_num.max(1) {
                return Err(invalid(
                    "validators",
                    format!(
                        "stake {stake} is below the minimum of {}",
                        self.min_validator_vote_num
                    ),
                ));
            }
            if keys[..i].iter().any(|(other, _)| other == key) {
                return Err(invalid("validators", "duplicate validator key"));
            }
        }
        if self.genesis_program_bytes()?.is_empty() {
            return Err(invalid("genesis_program", "must not be empty"));
        }
        if self.coinbase_arbitrary_limit < 8 {
            return Err(invalid(
                "coinbase_arbitrary_limit",
                "must leave room for the height prefix",
            ));
        }
        Ok(())
    }

    /// Apply configuration overrides, returning the adjusted parameters.
    pub fn with_overrides(mut self, overrides: &ParamsOverrides) -> Self {
        macro_rules! apply {
            ($($field:ident),*) => {
                $(
                    if let Some(value) = overrides.$field.clone() {
                        self.$field = value;
                    }
                )*
            };
        }
        apply!(
            max_time_offset_ms,
            blocks_of_epoch,
            min_validator_vote_num,
            validators,
            finality_threshold_numerator,
            finality_threshold_denominator,
            vm_gas_rate,
            storage_gas_rate,
            max_gas_amount,
            max_block_gas,
            max_fee,
            max_tx_size,
            block_reward,
            coinbase_pending_blocks,
            genesis_program,
            genesis_timestamp
        );
        self
    }
}

/// Optional replacements for profile values, read from the node config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsOverrides {
    pub max_time_offset_ms: Option<u64>,
    pub blocks_of_epoch: Option<u64>,
    pub min_validator_vote_num: Option<u64>,
    pub finality_threshold_numerator: Option<u64>,
    pub finality_threshold_denominator: Option<u64>,
    pub vm_gas_rate: Option<u64>,
    pub storage_gas_rate: Option<u64>,
    pub max_gas_amount: Option<u64>,
    pub max_block_gas: Option<u64>,
    pub max_fee: Option<u64>,
    pub max_tx_size: Option<usize>,
    pub block_reward: Option<u64>,
    pub coinbase_pending_blocks: Option<u64>,
    pub genesis_program: Option<String>,
    pub genesis_timestamp: Option<u64>,
    pub validators: Option<Vec<Validator>>,
}
