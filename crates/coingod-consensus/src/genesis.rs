//! Genesis block construction.

use crate::block::Block;
use crate::hash::Hash;
use crate::params::{NetworkParams, ParamsError, GENESIS_MESSAGE};
use crate::transaction::{AssetAmount, OutputTemplate, Transaction};

/// The first block of the network described by `params`.
///
/// It holds a single coinbase paying the initial supply to the genesis
/// program, and is committed without validation.
pub fn genesis_block(params: &NetworkParams) -> Result<Block, ParamsError> {
    let program = params.genesis_program_bytes()?;
    let coinbase = Transaction::coinbase(
        0,
        GENESIS_MESSAGE.as_bytes(),
        vec![OutputTemplate::new(
            AssetAmount::native(params.init_supply),
            program,
        )],
    );
    Ok(Block::new(
        0,
        Hash::ZERO,
        params.genesis_timestamp,
        vec![coinbase],
        vec![],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_per_profile() {
        let mainnet = genesis_block(&NetworkParams::mainnet()).unwrap();
        let testnet = genesis_block(&NetworkParams::testnet()).unwrap();

        assert_eq!(mainnet.height(), 0);
        assert_eq!(*mainnet.parent_hash(), Hash::ZERO);
        assert_eq!(mainnet.compute_merkle_root(), mainnet.header.transactions_merkle_root);

        let coinbase = mainnet.coinbase().unwrap();
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.outputs.len(), 1);
        assert_eq!(coinbase.outputs[0].value().amount, 320_000_000_000_000);

        // Same supply, program and timestamp across profiles.
        assert_eq!(mainnet.hash(), testnet.hash());
    }

    #[test]
    fn test_genesis_program_override() {
        let mut params = NetworkParams::solonet();
        params.genesis_program = "51".to_string();
        let block = genesis_block(&params).unwrap();
        assert_eq!(block.transactions[0].outputs[0].control_program, vec![0x51]);
        assert_ne!(block.hash(), genesis_block(&NetworkParams::solonet()).unwrap().hash());

        params.genesis_program = "zz".to_string();
        assert!(genesis_block(&params).is_err());
    }
}
