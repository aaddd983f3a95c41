//! UTXO viewpoint.
//!
//! A viewpoint is the working set the chain mutates while connecting or
//! disconnecting blocks. It holds only the entries a block touches, loaded
//! from the committed set on demand, and is flushed into one write batch
//! once every block in the transition has been applied.

use crate::{StateError, StateResult};
use coingod_consensus::{Block, OutputId, StateDelta, UtxoEntry, UtxoLookup};
use std::collections::{HashMap, HashSet};

/// Per-transaction deltas of `block`, in block order.
pub(crate) fn block_deltas(block: &Block) -> StateResult<Vec<StateDelta>> {
    let height = block.height();
    block
        .transactions
        .iter()
        .map(|tx| StateDelta::of_transaction(tx, height).map_err(StateError::from))
        .collect()
}

/// Working set of UTXO entries.
///
/// Spent entries stay in the map flagged `spent` until the viewpoint is
/// flushed, so a later rollback in the same transition can restore them.
#[derive(Debug, Clone, Default)]
pub struct UtxoViewpoint {
    entries: HashMap<OutputId, UtxoEntry>,
    /// Entries deleted by a rollback. They must not be reloaded from storage.
    removed: HashSet<OutputId>,
}

impl UtxoViewpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, output_id: &OutputId) -> Option<&UtxoEntry> {
        self.entries.get(output_id)
    }

    pub fn insert(&mut self, entry: UtxoEntry) {
        self.removed.remove(&entry.output_id);
        self.entries.insert(entry.output_id, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unspent entries.
    pub fn live(&self) -> impl Iterator<Item = &UtxoEntry> {
        self.entries.values().filter(|e| !e.spent)
    }

    /// Pull `ids` from `base` unless the viewpoint already decided their fate.
    pub fn load<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a OutputId>,
        mut base: impl FnMut(&OutputId) -> StateResult<Option<UtxoEntry>>,
    ) -> StateResult<()> {
        for id in ids {
            if self.entries.contains_key(id) || self.removed.contains(id) {
                continue;
            }
            if let Some(entry) = base(id)? {
                self.entries.insert(*id, entry);
            }
        }
        Ok(())
    }

    /// Entries the block spends that existed before it, as they were.
    ///
    /// This is the undo record persisted alongside the block.
    pub fn spent_entries(&self, block: &Block) -> StateResult<Vec<UtxoEntry>> {
        let deltas = block_deltas(block)?;
        let mut created = HashSet::new();
        let mut undo = Vec::new();
        for delta in &deltas {
            for id in &delta.spent {
                if created.contains(id) {
                    continue;
                }
                let entry = self.entries.get(id).ok_or(StateError::NotFound(*id))?;
                undo.push(entry.clone());
            }
            created.extend(delta.created.iter().map(|e| e.output_id));
        }
        Ok(undo)
    }

    /// Mark the block's inputs spent and add its outputs, in block order.
    pub fn apply_block(&mut self, block: &Block) -> StateResult<()> {
        for delta in block_deltas(block)? {
            self.apply_delta(&delta)?;
        }
        Ok(())
    }

    fn apply_delta(&mut self, delta: &StateDelta) -> StateResult<()> {
        for id in &delta.spent {
            let entry = self.entries.get_mut(id).ok_or(StateError::NotFound(*id))?;
            if entry.spent {
                return Err(StateError::AlreadySpent(*id));
            }
            entry.spent = true;
        }
        for entry in &delta.created {
            if self.entries.get(&entry.output_id).map_or(false, |e| !e.spent) {
                return Err(StateError::AlreadyExists(entry.output_id));
            }
            self.insert(entry.clone());
        }
        Ok(())
    }

    /// Undo [`apply_block`](Self::apply_block).
    ///
    /// Entries the block spent must be present, flagged spent. The chain
    /// loads them from the block's undo record first.
    pub fn rollback_block(&mut self, block: &Block) -> StateResult<()> {
        let deltas = block_deltas(block)?;
        let created: HashSet<OutputId> = deltas
            .iter()
            .flat_map(|d| d.created.iter().map(|e| e.output_id))
            .collect();

        for delta in deltas.iter().rev() {
            for entry in &delta.created {
                self.entries.remove(&entry.output_id);
                self.removed.insert(entry.output_id);
            }
            for id in &delta.spent {
                if created.contains(id) {
                    continue;
                }
                let entry = self.entries.get_mut(id).ok_or(StateError::NotFound(*id))?;
                if !entry.spent {
                    return Err(StateError::Corruption(format!(
                        "rolling back unspent output {id}"
                    )));
                }
                entry.spent = false;
            }
        }
        Ok(())
    }

    /// Restore undo entries as spent, ready for [`rollback_block`](Self::rollback_block).
    pub fn restore_spent(&mut self, undo: Vec<UtxoEntry>) {
        for mut entry in undo {
            entry.spent = true;
            self.insert(entry);
        }
    }

    /// Entries to write (unspent) and to delete (spent or removed).
    pub fn changes(&self) -> (Vec<&UtxoEntry>, Vec<OutputId>) {
        let mut puts = Vec::new();
        let mut deletes: Vec<OutputId> = self.removed.iter().copied().collect();
        for entry in self.entries.values() {
            if entry.spent {
                deletes.push(entry.output_id);
            } else {
                puts.push(entry);
            }
        }
        (puts, deletes)
    }
}

impl UtxoLookup for UtxoViewpoint {
    fn utxo(&self, output_id: &OutputId) -> Option<UtxoEntry> {
        self.entries.get(output_id).cloned()
    }
}

/// Two viewpoints are equal when their unspent entries are.
impl PartialEq for UtxoViewpoint {
    fn eq(&self, other: &Self) -> bool {
        let mine: HashMap<_, _> = self.live().map(|e| (e.output_id, e)).collect();
        let theirs: HashMap<_, _> = other.live().map(|e| (e.output_id, e)).collect();
        mine == theirs
    }
}
