//! Casper-style finality.
//!
//! Votes carried by canonical blocks are tallied per target checkpoint. A
//! checkpoint backed by more than the configured share of validator stake is
//! justified, and the highest justified checkpoint on the canonical chain
//! becomes the finalized block. Finalization only moves forward.

use coingod_consensus::{Block, BlockHash, CodecResult, Decode, Encode, NetworkParams};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// A block that can no longer be reorganized away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u64,
    pub hash: BlockHash,
}

impl Encode for Checkpoint {
    fn encode(&self, out: &mut Vec<u8>) {
        self.height.encode(out);
        self.hash.encode(out);
    }
}

impl Decode for Checkpoint {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            height: u64::decode(input)?,
            hash: BlockHash::decode(input)?,
        })
    }
}

/// Votes for one target. A validator counts once however many canonical
/// blocks carry its vote; the count lets rollbacks unfold them exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub height: u64,
    pub voters: BTreeMap<[u8; 32], u32>,
}

impl Encode for Tally {
    fn encode(&self, out: &mut Vec<u8>) {
        self.height.encode(out);
        (self.voters.len() as u32).encode(out);
        for (validator, count) in &self.voters {
            validator.encode(out);
            count.encode(out);
        }
    }
}

impl Decode for Tally {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        let height = u64::decode(input)?;
        let len = u32::decode(input)?;
        let mut voters = BTreeMap::new();
        for _ in 0..len {
            let validator = <[u8; 32]>::decode(input)?;
            voters.insert(validator, u32::decode(input)?);
        }
        Ok(Self { height, voters })
    }
}

#[derive(Debug, Clone)]
pub struct FinalityTracker {
    params: NetworkParams,
    stakes: HashMap<[u8; 32], u64>,
    tallies: HashMap<BlockHash, Tally>,
    finalized: Checkpoint,
}

impl FinalityTracker {
    /// Tracker with nothing voted and `finalized` as the final block.
    pub fn new(params: &NetworkParams, finalized: Checkpoint) -> Self {
        let stakes = params
            .validator_set()
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        Self {
            params: params.clone(),
            stakes,
            tallies: HashMap::new(),
            finalized,
        }
    }

    pub fn finalized(&self) -> Checkpoint {
        self.finalized
    }

    /// Restore persisted state.
    pub fn restore(&mut self, tallies: impl IntoIterator<Item = (BlockHash, Tally)>) {
        self.tallies.extend(tallies);
    }

    pub fn tally(&self, target: &BlockHash) -> Option<&Tally> {
        self.tallies.get(target)
    }

    /// Count a canonical block's votes. Returns the targets touched.
    pub fn fold(&mut self, block: &Block) -> Vec<BlockHash> {
        let mut touched = Vec::with_capacity(block.votes.len());
        for vote in &block.votes {
            let tally = self.tallies.entry(vote.target_hash).or_default();
            tally.height = vote.target_height;
            *tally.voters.entry(vote.validator).or_insert(0) += 1;
            touched.push(vote.target_hash);
        }
        touched
    }

    /// Remove a block's votes when it leaves the canonical chain.
    pub fn unfold(&mut self, block: &Block) -> Vec<BlockHash> {
        let mut touched = Vec::with_capacity(block.votes.len());
        for vote in &block.votes {
            if let Some(tally) = self.tallies.get_mut(&vote.target_hash) {
                if let Some(count) = tally.voters.get_mut(&vote.validator) {
                    *count -= 1;
                    if *count == 0 {
                        tally.voters.remove(&vote.validator);
                    }
                }
                touched.push(vote.target_hash);
            }
        }
        touched
    }

    /// Stake behind `target`, each validator counted once.
    pub fn stake(&self, target: &BlockHash) -> u64 {
        self.tallies.get(target).map_or(0, |tally| {
            tally
                .voters
                .keys()
                .filter_map(|v| self.stakes.get(v))
                .fold(0u64, |acc, s| acc.saturating_add(*s))
        })
    }

    pub fn is_justified(&self, target: &BlockHash) -> bool {
        self.params.justifies(self.stake(target))
    }

    /// Finalize the highest justified checkpoint above the current one that
    /// `canonical` confirms is on the best chain.
    pub fn advance(&mut self, canonical: impl Fn(u64) -> Option<BlockHash>) -> Option<Checkpoint> {
        let best = self
            .tallies
            .iter()
            .filter(|(_, tally)| tally.height > self.finalized.height)
            .filter(|(hash, tally)| canonical(tally.height) == Some(**hash))
            .filter(|(hash, _)| self.is_justified(hash))
            .map(|(hash, tally)| Checkpoint {
                height: tally.height,
                hash: *hash,
            })
            .max_by_key(|c| c.height)?;

        info!(height = best.height, hash = %best.hash.short(), "Checkpoint finalized");
        self.finalized = best;
        Some(best)
    }
}
