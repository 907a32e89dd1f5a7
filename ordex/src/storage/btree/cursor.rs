//! Key-order cursor over one tree.
//!
//! The cursor remembers a key, plus the leaf it was last found in as a hint.
//! Each step re-reads that leaf and falls back to a fresh search when the
//! tree has changed underneath, so a cursor stays usable across inserts and
//! deletes made through other handles.

use crate::storage::btree::node::{Node, NodeNumber};
use crate::storage::btree::tree::{Tree, TreeError};
use crate::storage::io::BackingStore;

/// Cursor over the keys of a [`Tree`].
#[derive(Debug, Clone)]
pub struct TreeCursor {
    tree: Tree,
    current_key: Option<Vec<u8>>,
    current_node: Option<NodeNumber>,
}

impl TreeCursor {
    /// An unpositioned cursor.
    #[must_use]
    pub const fn new(tree: Tree) -> Self {
        Self {
            tree,
            current_key: None,
            current_node: None,
        }
    }

    /// The key the cursor is on.
    #[must_use]
    pub fn current(&self) -> Option<&[u8]> {
        self.current_key.as_deref()
    }

    /// Forget the position.
    pub fn reset(&mut self) {
        self.current_key = None;
        self.current_node = None;
    }

    fn settle(&mut self, node: &Node, key: Vec<u8>) -> Vec<u8> {
        self.current_node = Some(node.number);
        self.current_key = Some(key.clone());
        key
    }

    /// Move to the lowest key.
    pub fn first<S: BackingStore + ?Sized>(&mut self, store: &S) -> Result<Option<Vec<u8>>, TreeError> {
        self.edge(store, true)
    }

    /// Move to the highest key.
    pub fn last<S: BackingStore + ?Sized>(&mut self, store: &S) -> Result<Option<Vec<u8>>, TreeError> {
        self.edge(store, false)
    }

    fn edge<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        lowest: bool,
    ) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(mut node) = self.tree.read_root(store)? else {
            self.reset();
            return Ok(None);
        };
        while let Some(children) = node.children() {
            let child = if lowest { children.first() } else { children.last() };
            let Some(&child) = child else {
                return Err(TreeError::Corrupt(format!("node {} has no children", node.number)));
            };
            node = self.tree.read_node(store, child)?;
        }
        let key = if lowest { node.keys.first() } else { node.keys.last() };
        match key.cloned() {
            Some(key) => Ok(Some(self.settle(&node, key))),
            None => {
                self.reset();
                Ok(None)
            }
        }
    }

    /// Move to `key` if present. The position is unchanged otherwise.
    pub fn setat<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(leaf) = self.tree.search(store, key)?.and_then(|mut path| path.pop()) else {
            return Ok(None);
        };
        if !leaf.contains(key) {
            return Ok(None);
        }
        Ok(Some(self.settle(&leaf, key.to_vec())))
    }

    /// Move to the lowest key not less than `key`.
    ///
    /// Clears the position when every key is less than `key`.
    pub fn nearest<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(leaf) = self.tree.search(store, key)?.and_then(|mut path| path.pop()) else {
            self.reset();
            return Ok(None);
        };
        let at = leaf.bisect_left(key);
        if let Some(found) = leaf.keys.get(at).cloned() {
            return Ok(Some(self.settle(&leaf, found)));
        }
        if let Some(right) = leaf.right() {
            let right = self.tree.read_node(store, right)?;
            if let Some(found) = right.keys.first().cloned() {
                return Ok(Some(self.settle(&right, found)));
            }
        }
        self.reset();
        Ok(None)
    }

    /// Move to the next key. At the end the position is unchanged.
    ///
    /// An unpositioned cursor moves to the first key.
    pub fn next<S: BackingStore + ?Sized>(&mut self, store: &S) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(current) = self.current_key.clone() else {
            return self.first(store);
        };
        let leaf = self.current_leaf(store, &current)?;
        let Some(leaf) = leaf else {
            return self.nearest_after(store, &current);
        };
        let at = leaf.bisect_right(&current);
        if let Some(found) = leaf.keys.get(at).cloned() {
            return Ok(Some(self.settle(&leaf, found)));
        }
        if let Some(right) = leaf.right() {
            let right = self.tree.read_node(store, right)?;
            if let Some(found) = right.keys.first().cloned() {
                return Ok(Some(self.settle(&right, found)));
            }
        }
        Ok(None)
    }

    /// Move to the previous key. At the start the position is unchanged.
    ///
    /// An unpositioned cursor moves to the last key.
    pub fn prev<S: BackingStore + ?Sized>(&mut self, store: &S) -> Result<Option<Vec<u8>>, TreeError> {
        let Some(current) = self.current_key.clone() else {
            return self.last(store);
        };
        let Some(leaf) = self.current_leaf(store, &current)? else {
            return Ok(None);
        };
        let at = leaf.bisect_left(&current);
        if let Some(found) = at.checked_sub(1).and_then(|i| leaf.keys.get(i)).cloned() {
            return Ok(Some(self.settle(&leaf, found)));
        }
        if let Some(left) = leaf.left() {
            let left = self.tree.read_node(store, left)?;
            if let Some(found) = left.keys.last().cloned() {
                return Ok(Some(self.settle(&left, found)));
            }
        }
        Ok(None)
    }

    /// The leaf where `key` belongs, from the cached hint when still valid.
    fn current_leaf<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        key: &[u8],
    ) -> Result<Option<Node>, TreeError> {
        if let Some(number) = self.current_node
            && let Some(node) = self.tree.read_any(store, number)?
            && node.is_leaf_level()
            && node.contains(key)
        {
            return Ok(Some(node));
        }
        Ok(self.tree.search(store, key)?.and_then(|mut path| path.pop()))
    }

    /// Step forward from a key the tree no longer holds.
    fn nearest_after<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, TreeError> {
        let saved = (self.current_key.clone(), self.current_node);
        let found = self.nearest(store, key)?;
        if found.is_none() {
            (self.current_key, self.current_node) = saved;
        }
        Ok(found)
    }
}
