//! Block header, body and finality votes.

use crate::codec::{CodecResult, Decode, Encode};
use crate::hash::{merkle_root, BlockHash, Hash};
use crate::transaction::Transaction;
use coingod_vm::crypto::verify_signature;

/// Current block version.
pub const BLOCK_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u64,
    pub height: u64,
    pub previous_block_hash: BlockHash,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub transactions_merkle_root: Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        Hash::tagged(b"block", &[&self.to_bytes()])
    }
}

impl Encode for BlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.height.encode(out);
        self.previous_block_hash.encode(out);
        self.timestamp.encode(out);
        self.transactions_merkle_root.encode(out);
    }
}

impl Decode for BlockHeader {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            version: u64::decode(input)?,
            height: u64::decode(input)?,
            previous_block_hash: Hash::decode(input)?,
            timestamp: u64::decode(input)?,
            transactions_merkle_root: Hash::decode(input)?,
        })
    }
}

/// A validator's attestation that `target_hash` at `target_height` should be
/// final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityVote {
    pub validator: [u8; 32],
    pub target_height: u64,
    pub target_hash: BlockHash,
    pub signature: Vec<u8>,
}

impl FinalityVote {
    /// Digest signed by the validator.
    pub fn message(target_height: u64, target_hash: &BlockHash) -> Hash {
        Hash::tagged(b"vote", &[&target_height.to_le_bytes(), &target_hash.0])
    }

    pub fn verify_signature(&self) -> bool {
        let message = Self::message(self.target_height, &self.target_hash);
        verify_signature(&self.validator, &message.0, &self.signature)
    }

    /// Identity of the vote, used as its leaf in the body commitment.
    pub fn id(&self) -> Hash {
        Hash::tagged(b"vote-entry", &[&self.to_bytes()])
    }
}

impl Encode for FinalityVote {
    fn encode(&self, out: &mut Vec<u8>) {
        self.validator.encode(out);
        self.target_height.encode(out);
        self.target_hash.encode(out);
        self.signature.encode(out);
    }
}

impl Decode for FinalityVote {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            validator: <[u8; 32]>::decode(input)?,
            target_height: u64::decode(input)?,
            target_hash: Hash::decode(input)?,
            signature: Vec::decode(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub votes: Vec<FinalityVote>,
}

impl Block {
    /// Assemble a block, committing the header to the body.
    pub fn new(
        height: u64,
        previous_block_hash: BlockHash,
        timestamp: u64,
        transactions: Vec<Transaction>,
        votes: Vec<FinalityVote>,
    ) -> Self {
        let transactions_merkle_root = body_root(&transactions, &votes);
        Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height,
                previous_block_hash,
                timestamp,
                transactions_merkle_root,
            },
            transactions,
            votes,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn parent_hash(&self) -> &BlockHash {
        &self.header.previous_block_hash
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Merkle root recomputed from the body.
    pub fn compute_merkle_root(&self) -> Hash {
        body_root(&self.transactions, &self.votes)
    }
}

/// Root over transaction ids followed by vote ids.
fn body_root(transactions: &[Transaction], votes: &[FinalityVote]) -> Hash {
    let leaves: Vec<Hash> = transactions
        .iter()
        .map(Transaction::id)
        .chain(votes.iter().map(FinalityVote::id))
        .collect();
    merkle_root(&leaves)
}

impl Encode for Block {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        self.transactions.encode(out);
        self.votes.encode(out);
    }
}

impl Decode for Block {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            header: BlockHeader::decode(input)?,
            transactions: Vec::decode(input)?,
            votes: Vec::decode(input)?,
        })
    }
}
