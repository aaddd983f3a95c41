//! Ordered write sets committed in one step.

use crate::ColumnFamily;
use std::collections::BTreeSet;

/// One staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
}

impl BatchOp {
    pub fn cf(&self) -> ColumnFamily {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Delete { cf, .. } => *cf,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } => key,
        }
    }
}

/// Writes staged for a single atomic commit.
///
/// A block application, a rollback or a whole reorganization is expressed as
/// one `WriteBatch`: backends either apply every op or none. Ops are applied
/// in staging order, so a later write to the same key shadows an earlier one.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `key -> value` in `cf`.
    pub fn put(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stage removal of `key` from `cf`.
    pub fn delete(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { cf, key: key.into() });
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Column families this batch writes to.
    pub fn families(&self) -> BTreeSet<ColumnFamily> {
        self.ops.iter().map(BatchOp::cf).collect()
    }

    /// Total key and value bytes staged.
    pub fn payload_bytes(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                BatchOp::Put { key, value, .. } => key.len() + value.len(),
                BatchOp::Delete { key, .. } => key.len(),
            })
            .sum()
    }

    /// Append `other`'s ops after this batch's ops.
    pub fn merge(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_keep_staging_order() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put(ColumnFamily::Utxo, b"out1", b"entry");
        batch.delete(ColumnFamily::Utxo, b"out1");
        batch.put(ColumnFamily::Metadata, b"best", b"hash");

        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[1], BatchOp::Delete { .. }));
        assert_eq!(batch.ops()[2].cf(), ColumnFamily::Metadata);
        assert_eq!(batch.ops()[2].key(), b"best");
    }

    #[test]
    fn test_families_and_payload() {
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Blocks, b"h1", b"body");
        batch.put(ColumnFamily::Blocks, b"h2", b"body");
        batch.delete(ColumnFamily::UndoData, b"h0");

        let families: Vec<_> = batch.families().into_iter().collect();
        assert_eq!(families, vec![ColumnFamily::Blocks, ColumnFamily::UndoData]);
        assert_eq!(batch.payload_bytes(), 2 + 4 + 2 + 4 + 2);
    }

    #[test]
    fn test_merge_appends() {
        let mut first = WriteBatch::new();
        first.put(ColumnFamily::Blocks, b"a", b"1");

        let mut second = WriteBatch::new();
        second.delete(ColumnFamily::Blocks, b"a");

        first.merge(second);
        let ops: Vec<_> = first.into_iter().collect();
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[1],
            BatchOp::Delete {
                cf: ColumnFamily::Blocks,
                key: b"a".to_vec()
            }
        );
    }
}
