//! Double-ended stack container used for the data and alt stacks.
//!
//! Positions passed to [`Stack::rotate`] count from the bottom; `depth`
//! arguments elsewhere count from the top, with 0 being the top item.

use std::collections::VecDeque;

/// Not enough items on a stack for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underflow {
    pub required: usize,
    pub available: usize,
}

/// Ordered sequence of byte strings, bottom at index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    items: VecDeque<Vec<u8>>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Fail unless at least `required` items are present.
    pub fn ensure(&self, required: usize) -> Result<(), Underflow> {
        if self.items.len() < required {
            return Err(Underflow {
                required,
                available: self.items.len(),
            });
        }
        Ok(())
    }

    pub fn push(&mut self, item: Vec<u8>) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop_back()
    }

    /// Item `depth` positions below the top.
    pub fn peek(&self, depth: usize) -> Option<&[u8]> {
        let len = self.items.len();
        if depth >= len {
            return None;
        }
        self.items.get(len - 1 - depth).map(Vec::as_slice)
    }

    /// Remove the item at position `from` and reinsert it at position `to`.
    ///
    /// Both positions count from the bottom and must be in bounds. Nothing
    /// moves when the check fails.
    pub fn rotate(&mut self, from: usize, to: usize) -> Result<(), Underflow> {
        let needed = from.max(to) + 1;
        self.ensure(needed)?;
        if from != to {
            if let Some(item) = self.items.remove(from) {
                self.items.insert(to, item);
            }
        }
        Ok(())
    }

    /// Move the item `depth` positions below the top onto the top.
    pub fn rotate_to_top(&mut self, depth: usize) -> Result<(), Underflow> {
        self.ensure(depth + 1)?;
        let top = self.items.len() - 1;
        self.rotate(top - depth, top)
    }

    /// Items from bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.items.iter().map(Vec::as_slice)
    }
}

impl From<Vec<Vec<u8>>> for Stack {
    fn from(items: Vec<Vec<u8>>) -> Self {
        Self {
            items: items.into(),
        }
    }
}
