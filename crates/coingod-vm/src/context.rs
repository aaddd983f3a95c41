//! Transaction context exposed to introspection opcodes.

/// Read-only view of the transaction being validated.
///
/// Every accessor defaults to `None`, meaning the value is unavailable.
/// Opcodes that need an unavailable value fail with a context error.
pub trait ExecutionContext {
    /// Signature hash of the input being evaluated.
    fn tx_sig_hash(&self) -> Option<[u8; 32]> {
        None
    }

    /// Height of the block that will include the transaction.
    fn block_height(&self) -> Option<u64> {
        None
    }

    /// Asset id of the value being spent.
    fn asset_id(&self) -> Option<[u8; 32]> {
        None
    }

    /// Amount of the value being spent.
    fn amount(&self) -> Option<u64> {
        None
    }

    /// Control program of the output being spent.
    fn program(&self) -> Option<Vec<u8>> {
        None
    }

    /// Position of the input in its transaction.
    fn input_index(&self) -> Option<u64> {
        None
    }

    fn entry_id(&self) -> Option<[u8; 32]> {
        None
    }

    /// Id of the output being spent.
    fn output_id(&self) -> Option<[u8; 32]> {
        None
    }

    /// Whether output `index` pays `amount` of `asset_id` to `program`.
    fn check_output(
        &self,
        _index: u64,
        _amount: u64,
        _asset_id: &[u8],
        _vm_version: u64,
        _program: &[u8],
    ) -> Option<bool> {
        None
    }
}

/// Context for programs evaluated outside any transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ExecutionContext for NoContext {}
