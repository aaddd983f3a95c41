//! Transactions and their derived identifiers.
//!
//! A transaction's id commits to everything except the spend arguments, so
//! signatures can cover the id without covering themselves. Outputs commit to
//! their value source: the mux id of the transaction's inputs and their own
//! position, which pins every output to exactly one transaction.

use crate::codec::{CodecError, CodecResult, Decode, Encode};
use crate::hash::{AssetId, Hash, OutputId, TxId};

/// Current transaction version.
pub const TX_VERSION: u64 = 1;

/// An amount of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetAmount {
    pub asset_id: AssetId,
    pub amount: u64,
}

impl AssetAmount {
    pub fn new(asset_id: AssetId, amount: u64) -> Self {
        Self { asset_id, amount }
    }

    pub fn native(amount: u64) -> Self {
        Self::new(AssetId::NATIVE, amount)
    }
}

impl Encode for AssetAmount {
    fn encode(&self, out: &mut Vec<u8>) {
        self.asset_id.encode(out);
        self.amount.encode(out);
    }
}

impl Decode for AssetAmount {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            asset_id: AssetId::decode(input)?,
            amount: u64::decode(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxInput {
    /// Newly minted value, only valid as the sole input of a block's first
    /// transaction.
    Coinbase { arbitrary: Vec<u8> },
    /// Consumes an existing output. `value` and `control_program` restate the
    /// output being spent.
    Spend {
        output_id: OutputId,
        value: AssetAmount,
        control_program: Vec<u8>,
        arguments: Vec<Vec<u8>>,
    },
}

impl TxInput {
    pub fn spend(
        output_id: OutputId,
        value: AssetAmount,
        control_program: Vec<u8>,
        arguments: Vec<Vec<u8>>,
    ) -> Self {
        TxInput::Spend {
            output_id,
            value,
            control_program,
            arguments,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, TxInput::Coinbase { .. })
    }

    pub fn spent_output_id(&self) -> Option<&OutputId> {
        match self {
            TxInput::Spend { output_id, .. } => Some(output_id),
            TxInput::Coinbase { .. } => None,
        }
    }

    /// Encoding without the arguments, as covered by the transaction id.
    fn encode_committed(&self, out: &mut Vec<u8>) {
        match self {
            TxInput::Coinbase { arbitrary } => {
                0u8.encode(out);
                arbitrary.encode(out);
            }
            TxInput::Spend {
                output_id,
                value,
                control_program,
                ..
            } => {
                1u8.encode(out);
                output_id.encode(out);
                value.encode(out);
                control_program.encode(out);
            }
        }
    }

    /// Identifier of this input as an entry of its transaction.
    pub fn entry_id(&self) -> Hash {
        let mut body = Vec::new();
        self.encode_committed(&mut body);
        Hash::tagged(b"input", &[&body])
    }
}

impl Encode for TxInput {
    fn encode(&self, out: &mut Vec<u8>) {
        self.encode_committed(out);
        if let TxInput::Spend { arguments, .. } = self {
            arguments.encode(out);
        }
    }
}

impl Decode for TxInput {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        match u8::decode(input)? {
            0 => Ok(TxInput::Coinbase {
                arbitrary: Vec::decode(input)?,
            }),
            1 => Ok(TxInput::Spend {
                output_id: Hash::decode(input)?,
                value: AssetAmount::decode(input)?,
                control_program: Vec::decode(input)?,
                arguments: Vec::decode(input)?,
            }),
            _ => Err(CodecError::InvalidValue("unknown input type")),
        }
    }
}

/// Where an output's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSource {
    pub mux_id: Hash,
    pub value: AssetAmount,
    pub position: u64,
}

impl Encode for ValueSource {
    fn encode(&self, out: &mut Vec<u8>) {
        self.mux_id.encode(out);
        self.value.encode(out);
        self.position.encode(out);
    }
}

impl Decode for ValueSource {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            mux_id: Hash::decode(input)?,
            value: AssetAmount::decode(input)?,
            position: u64::decode(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub source: ValueSource,
    pub control_program: Vec<u8>,
    pub state_data: Vec<Vec<u8>>,
}

impl TxOutput {
    pub fn value(&self) -> &AssetAmount {
        &self.source.value
    }
}

impl Encode for TxOutput {
    fn encode(&self, out: &mut Vec<u8>) {
        self.source.encode(out);
        self.control_program.encode(out);
        self.state_data.encode(out);
    }
}

impl Decode for TxOutput {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            source: ValueSource::decode(input)?,
            control_program: Vec::decode(input)?,
            state_data: Vec::decode(input)?,
        })
    }
}

/// An output before it is bound to a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    pub value: AssetAmount,
    pub control_program: Vec<u8>,
    pub state_data: Vec<Vec<u8>>,
}

impl OutputTemplate {
    pub fn new(value: AssetAmount, control_program: Vec<u8>) -> Self {
        Self {
            value,
            control_program,
            state_data: Vec::new(),
        }
    }

    pub fn with_state(mut self, state_data: Vec<Vec<u8>>) -> Self {
        self.state_data = state_data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u64,
    /// Latest block timestamp (ms) that may include this transaction, 0 for
    /// no bound.
    pub time_range: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build a transaction whose outputs are sourced from its own inputs.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<OutputTemplate>) -> Self {
        Self::with_time_range(0, inputs, outputs)
    }

    pub fn with_time_range(
        time_range: u64,
        inputs: Vec<TxInput>,
        outputs: Vec<OutputTemplate>,
    ) -> Self {
        let mux_id = mux_id(&inputs);
        let outputs = outputs
            .into_iter()
            .enumerate()
            .map(|(position, template)| TxOutput {
                source: ValueSource {
                    mux_id,
                    value: template.value,
                    position: position as u64,
                },
                control_program: template.control_program,
                state_data: template.state_data,
            })
            .collect();
        Self {
            version: TX_VERSION,
            time_range,
            inputs,
            outputs,
        }
    }

    /// Coinbase paying `outputs`. The height prefix keeps coinbase ids unique.
    pub fn coinbase(height: u64, extra: &[u8], outputs: Vec<OutputTemplate>) -> Self {
        let mut arbitrary = height.to_le_bytes().to_vec();
        arbitrary.extend_from_slice(extra);
        Self::new(vec![TxInput::Coinbase { arbitrary }], outputs)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.iter().any(TxInput::is_coinbase)
    }

    fn encode_committed(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.time_range.encode(out);
        (self.inputs.len() as u32).encode(out);
        for input in &self.inputs {
            input.encode_committed(out);
        }
        self.outputs.encode(out);
    }

    pub fn id(&self) -> TxId {
        let mut body = Vec::new();
        self.encode_committed(&mut body);
        Hash::tagged(b"tx", &[&body])
    }

    /// Mux id the outputs must reference.
    pub fn mux_id(&self) -> Hash {
        mux_id(&self.inputs)
    }

    /// Id of output `index` of this transaction.
    pub fn output_id(&self, index: usize) -> OutputId {
        output_id(&self.id(), index as u64)
    }

    /// Message signed by the witness of input `index`.
    pub fn sig_hash(&self, index: usize) -> Option<Hash> {
        let input = self.inputs.get(index)?;
        Some(Hash::tagged(
            b"sighash",
            &[&input.entry_id().0, &self.id().0],
        ))
    }

    /// Size of the full encoding, witnesses included.
    pub fn serialized_size(&self) -> usize {
        self.encoded_len()
    }
}

/// Mux id over the input entries, in order.
pub fn mux_id(inputs: &[TxInput]) -> Hash {
    let ids: Vec<u8> = inputs.iter().flat_map(|i| i.entry_id().0).collect();
    Hash::tagged(b"mux", &[&ids])
}

pub fn output_id(tx_id: &TxId, index: u64) -> OutputId {
    Hash::tagged(b"output", &[&tx_id.0, &index.to_le_bytes()])
}

impl Encode for Transaction {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.time_range.encode(out);
        self.inputs.encode(out);
        self.outputs.encode(out);
    }
}

impl Decode for Transaction {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            version: u64::decode(input)?,
            time_range: u64::decode(input)?,
            inputs: Vec::decode(input)?,
            outputs: Vec::decode(input)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let input = TxInput::spend(
            Hash([1; 32]),
            AssetAmount::native(500),
            vec![0x51],
            vec![vec![0xaa; 64]],
        );
        Transaction::new(
            vec![input],
            vec![OutputTemplate::new(AssetAmount::native(400), vec![0x51])],
        )
    }

    // ============ Identifier Tests ============

    #[test]
    fn test_id_excludes_arguments() {
        let tx = sample();
        let mut witnessed = tx.clone();
        if let TxInput::Spend { arguments, .. } = &mut witnessed.inputs[0] {
            arguments.push(vec![1, 2, 3]);
        }
        assert_eq!(tx.id(), witnessed.id());
        assert_ne!(tx.serialized_size(), witnessed.serialized_size());
    }

    #[test]
    fn test_id_covers_outputs_and_time_range() {
        let tx = sample();
        let mut changed = tx.clone();
        changed.outputs[0].source.value.amount += 1;
        assert_ne!(tx.id(), changed.id());

        let mut ranged = tx.clone();
        ranged.time_range = 99;
        assert_ne!(tx.id(), ranged.id());
    }

    #[test]
    fn test_sources_bound_to_inputs() {
        let tx = sample();
        assert_eq!(tx.outputs[0].source.mux_id, tx.mux_id());
        assert_eq!(tx.outputs[0].source.position, 0);
        assert_ne!(tx.output_id(0), tx.output_id(1));
        assert!(tx.sig_hash(0).is_some());
        assert!(tx.sig_hash(1).is_none());
    }

    #[test]
    fn test_coinbase_ids_differ_by_height() {
        let outputs = vec![OutputTemplate::new(AssetAmount::native(1), vec![0x51])];
        let a = Transaction::coinbase(1, b"", outputs.clone());
        let b = Transaction::coinbase(2, b"", outputs);
        assert!(a.is_coinbase());
        assert_ne!(a.id(), b.id());
    }

    // ============ Codec Tests ============

    #[test]
    fn test_decode_restores_witness() {
        let tx = sample();
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
    }

    #[test]
    fn test_unknown_input_tag() {
        let mut bytes = sample().to_bytes();
        // version(8) + time_range(8) + input count(4), then the input tag
        bytes[20] = 9;
        assert!(matches!(
            Transaction::from_bytes(&bytes),
            Err(CodecError::InvalidValue(_))
        ));
    }
}
