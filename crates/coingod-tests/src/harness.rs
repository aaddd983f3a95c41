//! Test harness for integration tests.
//!
//! Provides RocksDB-backed databases and chains in temporary directories,
//! signing keys, and block and transaction builders.

use coingod_consensus::program::pay_to_pubkey;
use coingod_consensus::{
    genesis_block, AssetAmount, Block, BlockHeader, FinalityVote, NetworkParams, OutputId,
    OutputTemplate, Transaction, TxInput,
};
use coingod_state::Chain;
use coingod_storage::{Database, Storage};
use ed25519_dalek::{Signer, SigningKey};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Fee that buys 10,000 gas at the default VM gas rate.
pub const TEST_FEE: u64 = 200 * 10_000;

/// Spacing between consecutive test blocks.
pub const BLOCK_SPACING_MS: u64 = 6_000;

/// Test database wrapper that cleans up on drop.
pub struct TestDatabase {
    db: Arc<Database>,
    temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database in a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path()).expect("Failed to open database");
        Self {
            db: Arc::new(db),
            temp_dir,
        }
    }

    /// Get the path to the database.
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Shared handle, usable wherever a `Storage` is expected.
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.db.clone()
    }

    /// Close and reopen the same directory.
    ///
    /// Every other handle to the database must be dropped first.
    pub fn reopen(self) -> Self {
        let Self { db, temp_dir } = self;
        drop(db);
        let db = Database::open(temp_dir.path()).expect("Failed to reopen database");
        Self {
            db: Arc::new(db),
            temp_dir,
        }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Ed25519 key with pay-to-pubkey-hash helpers.
#[derive(Clone)]
pub struct TestKey {
    key: SigningKey,
}

impl TestKey {
    pub fn from_seed(seed: u8) -> Self {
        Self {
            key: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn pubkey(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Pay-to-pubkey-hash program locking to this key.
    pub fn program(&self) -> Vec<u8> {
        pay_to_pubkey(&self.pubkey())
    }

    /// Fill the arguments of input `index` with `[signature, pubkey]`.
    pub fn sign_input(&self, tx: &mut Transaction, index: usize) {
        let sig_hash = tx.sig_hash(index).expect("input has no signature hash");
        let signature = self.key.sign(&sig_hash.0).to_bytes().to_vec();
        let pubkey = self.pubkey().to_vec();
        if let TxInput::Spend { arguments, .. } = &mut tx.inputs[index] {
            *arguments = vec![signature, pubkey];
        }
    }

    /// Signed finality vote for the block `hash` at `height`.
    pub fn vote(&self, height: u64, hash: coingod_consensus::BlockHash) -> FinalityVote {
        FinalityVote {
            validator: self.pubkey(),
            target_height: height,
            target_hash: hash,
            signature: self
                .key
                .sign(&FinalityVote::message(height, &hash).0)
                .to_bytes()
                .to_vec(),
        }
    }
}

/// Solonet parameters whose genesis supply is locked to `key`.
pub fn solonet_params(key: &TestKey) -> NetworkParams {
    let mut params = NetworkParams::solonet();
    params.genesis_program = hex::encode(key.program());
    params
}

/// An output that can be spent by a test transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spendable {
    pub output_id: OutputId,
    pub amount: u64,
    pub program: Vec<u8>,
}

impl Spendable {
    /// Output `index` of `tx`.
    pub fn of(tx: &Transaction, index: usize) -> Self {
        let output = &tx.outputs[index];
        Self {
            output_id: tx.output_id(index),
            amount: output.value().amount,
            program: output.control_program.clone(),
        }
    }

    pub fn input(&self) -> TxInput {
        TxInput::spend(
            self.output_id,
            AssetAmount::native(self.amount),
            self.program.clone(),
            vec![],
        )
    }
}

/// Native output paying `amount` to `program`.
pub fn pay(amount: u64, program: Vec<u8>) -> OutputTemplate {
    OutputTemplate::new(AssetAmount::native(amount), program)
}

/// Transaction spending `inputs`, signed by `key` on every input.
pub fn signed_tx(key: &TestKey, inputs: &[Spendable], outputs: Vec<OutputTemplate>) -> Transaction {
    let mut tx = Transaction::new(inputs.iter().map(Spendable::input).collect(), outputs);
    for index in 0..inputs.len() {
        key.sign_input(&mut tx, index);
    }
    tx
}

/// Transaction spending outputs locked by the always-true program `0x51`.
pub fn open_tx(inputs: &[Spendable], outputs: Vec<OutputTemplate>) -> Transaction {
    Transaction::new(inputs.iter().map(Spendable::input).collect(), outputs)
}

/// Child of `parent` carrying a reward coinbase, then `txs` and `votes`.
pub fn child_block(
    params: &NetworkParams,
    parent: &BlockHeader,
    tag: &[u8],
    txs: Vec<Transaction>,
    votes: Vec<FinalityVote>,
) -> Block {
    let height = parent.height + 1;
    let coinbase = Transaction::coinbase(height, tag, vec![pay(params.block_reward, vec![0x51])]);
    let mut transactions = vec![coinbase];
    transactions.extend(txs);
    Block::new(
        height,
        parent.hash(),
        parent.timestamp + BLOCK_SPACING_MS,
        transactions,
        votes,
    )
}

/// A chain over a RocksDB database in a temporary directory.
pub struct TestChain {
    pub chain: Arc<Chain>,
    pub params: NetworkParams,
    db: TestDatabase,
}

impl TestChain {
    pub fn new(params: NetworkParams) -> Self {
        let db = TestDatabase::new();
        let chain = Chain::open(db.storage(), params.clone()).expect("Failed to open chain");
        Self {
            chain: Arc::new(chain),
            params,
            db,
        }
    }

    /// Solonet chain whose genesis supply belongs to `key`.
    pub fn solonet(key: &TestKey) -> Self {
        Self::new(solonet_params(key))
    }

    /// Drop the chain and open it again from disk.
    pub fn restart(self) -> Self {
        let params = self.params.clone();
        let db = self.into_database();
        let chain = Chain::open(db.storage(), params.clone()).expect("Failed to reopen chain");
        Self {
            chain: Arc::new(chain),
            params,
            db,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.db.path()
    }

    /// Drop the chain and hand back its reopened database.
    pub fn into_database(self) -> TestDatabase {
        let Self { chain, db, .. } = self;
        drop(chain);
        db.reopen()
    }

    pub fn genesis(&self) -> Block {
        genesis_block(&self.params).expect("genesis")
    }

    /// The genesis supply output.
    pub fn genesis_output(&self) -> Spendable {
        Spendable::of(&self.genesis().transactions[0], 0)
    }

    /// Child of the current tip.
    pub fn next_block(&self, tag: &[u8], txs: Vec<Transaction>) -> Block {
        child_block(&self.params, &self.chain.tip().header, tag, txs, vec![])
    }

    /// Append `count` empty blocks to the tip.
    pub fn extend(&self, count: usize, tag: &[u8]) -> Vec<Block> {
        (0..count)
            .map(|_| {
                let block = self.next_block(tag, vec![]);
                self.chain
                    .process_block(block.clone())
                    .expect("Failed to extend chain");
                block
            })
            .collect()
    }

    /// Build `count` empty blocks on `parent` without submitting them.
    pub fn branch(&self, parent: &BlockHeader, count: usize, tag: &[u8]) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::with_capacity(count);
        for _ in 0..count {
            let header = blocks.last().map_or(parent, |b| &b.header);
            let block = child_block(&self.params, header, tag, vec![], vec![]);
            blocks.push(block);
        }
        blocks
    }
}
