//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use coingod_consensus::{Block, BlockHash, Decode, Encode, Transaction, ValidatedTx};
use coingod_mempool::{Mempool, MempoolStats};
use coingod_state::{BlockOutcome, Chain, ChainError};
use coingod_storage::Database;
use coingod_vm::ErrorKind;
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subdirectory of the data dir holding the RocksDB files.
const CHAIN_DIR: &str = "chain";

/// The main node struct coordinating all components.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,
    /// Database handle, kept for explicit flushing.
    db: Arc<Database>,
    /// Chain state machine.
    chain: Arc<Chain>,
    /// Pending transactions validated against the current tip.
    mempool: Mempool,
}

/// Snapshot printed by the `status` command.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub network: String,
    pub best_height: u64,
    pub best_hash: BlockHash,
    pub finalized_height: u64,
    pub utxo_count: usize,
    pub mempool: MempoolStats,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "network:          {}", self.network)?;
        writeln!(f, "best height:      {}", self.best_height)?;
        writeln!(f, "best hash:        {}", self.best_hash)?;
        writeln!(f, "finalized height: {}", self.finalized_height)?;
        writeln!(f, "utxo count:       {}", self.utxo_count)?;
        write!(f, "mempool txs:      {}", self.mempool.tx_count)
    }
}

/// Outcome counts of a block import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub extended: usize,
    pub reorganized: usize,
    pub side_chain: usize,
    pub orphaned: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl ImportSummary {
    fn record(&mut self, outcome: &BlockOutcome) {
        match outcome {
            BlockOutcome::Extended { .. } => self.extended += 1,
            BlockOutcome::Reorganized { .. } => self.reorganized += 1,
            BlockOutcome::SideChain => self.side_chain += 1,
            BlockOutcome::Orphan => self.orphaned += 1,
            BlockOutcome::Duplicate => self.duplicates += 1,
        }
    }
}

impl Node {
    /// Open (or initialize) the node's chain under the configured data dir.
    pub fn open(config: NodeConfig) -> Result<Self> {
        let params = config.network_params()?;

        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data dir {}", config.data_dir.display())
        })?;
        let db = Arc::new(
            Database::open(config.data_dir.join(CHAIN_DIR)).context("Failed to open database")?,
        );
        let chain = Arc::new(
            Chain::open(db.clone(), params).context("Failed to open chain state")?,
        );
        let mempool = Mempool::new(config.mempool.clone(), chain.clone());

        info!(
            network = %config.network,
            height = chain.best_height(),
            finalized = chain.finalized_height(),
            "Node opened"
        );

        Ok(Self {
            config,
            db,
            chain,
            mempool,
        })
    }

    #[cfg(test)]
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn status(&self) -> Result<NodeStatus> {
        let tip = self.chain.tip();
        Ok(NodeStatus {
            network: self.config.network.clone(),
            best_height: tip.height(),
            best_hash: tip.hash,
            finalized_height: tip.finalized.height,
            utxo_count: self.chain.utxo_count()?,
            mempool: self.mempool.stats(),
        })
    }

    /// Submit one block, dropping its transactions from the mempool when it
    /// lands on the best chain.
    pub fn submit_block(&self, block: Block) -> Result<BlockOutcome, ChainError> {
        let hash = block.hash();
        let height = block.height();
        let outcome = self.chain.process_block(block.clone())?;
        match &outcome {
            BlockOutcome::Extended { .. } | BlockOutcome::Reorganized { .. } => {
                let removed = self.mempool.remove_confirmed(&block);
                debug!(%hash, height, removed, "Pruned confirmed transactions");
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Import hex-encoded blocks, one per line. Blank lines and lines starting
    /// with `#` are skipped. Invalid blocks are counted and skipped; internal
    /// failures abort the import.
    pub fn import_blocks(&self, reader: impl BufRead) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read import file")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let bytes = hex::decode(line)
                .with_context(|| format!("Line {}: invalid hex", index + 1))?;
            let block = Block::from_bytes(&bytes)
                .with_context(|| format!("Line {}: undecodable block", index + 1))?;

            match self.submit_block(block) {
                Ok(outcome) => summary.record(&outcome),
                Err(e) if e.kind() == ErrorKind::Internal => {
                    return Err(e).with_context(|| format!("Line {}: import aborted", index + 1));
                }
                Err(e) => {
                    warn!(line = index + 1, code = e.code(), "Block rejected: {}", e);
                    summary.rejected += 1;
                }
            }
        }

        self.db.flush().context("Failed to flush database")?;
        info!(
            height = self.chain.best_height(),
            extended = summary.extended,
            rejected = summary.rejected,
            "Import finished"
        );
        Ok(summary)
    }

    /// Write the canonical blocks in `[from, to]` as hex lines.
    pub fn export_blocks(&self, mut writer: impl Write, from: u64, to: u64) -> Result<usize> {
        let to = to.min(self.chain.best_height());
        let mut written = 0;
        for height in from..=to {
            let Some(block) = self.chain.block_by_height(height)? else {
                break;
            };
            writeln!(writer, "{}", hex::encode(block.to_bytes()))?;
            written += 1;
        }
        Ok(written)
    }

    /// Validate a hex-encoded transaction against the tip and pool it.
    pub fn submit_transaction(&self, tx_hex: &str) -> Result<ValidatedTx> {
        let bytes = hex::decode(tx_hex.trim()).context("Invalid transaction hex")?;
        let tx = Transaction::from_bytes(&bytes).context("Undecodable transaction")?;
        let validated = self.mempool.add(tx)?;
        Ok(validated)
    }
}
