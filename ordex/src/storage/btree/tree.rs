//! B+tree operations.
//!
//! The tree holds no state of its own beyond where its nodes live and its
//! branching factor; every operation reads and writes nodes through the
//! backing store it is given.
//!
//! Invariants after every operation:
//! - keys are sorted and unique within each node
//! - each root/branch key equals the minimum key of the subtree to its right
//! - leaves other than a solo root hold between `branching_factor / 2` and
//!   `branching_factor - 1` keys
//! - the leaf chain visits every key in order

use tracing::debug;

use crate::storage::btree::node::{Node, NodeKind, NodeNumber};
use crate::storage::codec::{self, CodecError};
use crate::storage::io::{BackingStore, StoreError};
use crate::storage::keys::FieldKeys;

/// Smallest branching factor supported.
pub const MIN_BRANCHING_FACTOR: usize = 4;

/// Errors from B+tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Stored node could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Branching factor below [`MIN_BRANCHING_FACTOR`].
    #[error("branching factor {0} is less than {MIN_BRANCHING_FACTOR}")]
    BranchingFactorTooSmall(usize),
    /// Attempt to delete a key whose posting entry still has records.
    #[error("key {key:?} is still referenced by a posting entry")]
    KeyStillReferenced { key: Vec<u8> },
    /// A splitter key expected in an ancestor was not found.
    #[error("splitter key {key:?} not found in any ancestor")]
    MissingSplitter { key: Vec<u8> },
    /// A node referenced by number is not stored.
    #[error("tree node {number} is missing")]
    MissingNode { number: NodeNumber },
    /// Tree structure is inconsistent.
    #[error("tree corruption: {0}")]
    Corrupt(String),
}

/// One ordered index.
#[derive(Debug, Clone)]
pub struct Tree {
    keys: FieldKeys,
    branching_factor: usize,
}

impl Tree {
    /// The tree stored under `keys`.
    pub fn new(keys: FieldKeys, branching_factor: usize) -> Result<Self, TreeError> {
        if branching_factor < MIN_BRANCHING_FACTOR {
            return Err(TreeError::BranchingFactorTooSmall(branching_factor));
        }
        Ok(Self {
            keys,
            branching_factor,
        })
    }

    /// Maximum children of a root or branch.
    #[must_use]
    pub const fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    /// Keys moved to the new right node by a split, and the fewest keys a leaf may hold.
    const fn split(&self) -> usize {
        self.branching_factor / 2
    }

    const fn max_keys(&self) -> usize {
        self.branching_factor - 1
    }

    /// Fewest children a branch may hold.
    const fn min_children(&self) -> usize {
        self.branching_factor / 2
    }

    /// Whether the tree holds no keys.
    pub fn is_empty<S: BackingStore + ?Sized>(&self, store: &S) -> Result<bool, TreeError> {
        Ok(!store.contains(&self.keys.tree_root())?)
    }

    /// Read the root node.
    pub fn read_root<S: BackingStore + ?Sized>(&self, store: &S) -> Result<Option<Node>, TreeError> {
        codec::read(store, &self.keys.tree_root())
    }

    /// Read a node by number. The root is not reachable this way.
    pub fn read_node<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        number: NodeNumber,
    ) -> Result<Node, TreeError> {
        codec::read::<_, Node, TreeError>(store, &self.keys.tree_node(number))?
            .ok_or(TreeError::MissingNode { number })
    }

    /// Read a node by number, looking under the root key first.
    pub(crate) fn read_any<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        number: NodeNumber,
    ) -> Result<Option<Node>, TreeError> {
        if let Some(root) = self.read_root(store)?
            && root.number == number
        {
            return Ok(Some(root));
        }
        codec::read(store, &self.keys.tree_node(number))
    }

    fn write_node<S: BackingStore + ?Sized>(&self, store: &mut S, node: &Node) -> Result<(), TreeError> {
        let key = if node.is_root() {
            self.keys.tree_root()
        } else {
            self.keys.tree_node(node.number)
        };
        codec::write(store, &key, node)
    }

    fn delete_node<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        number: NodeNumber,
    ) -> Result<(), TreeError> {
        store.delete(&self.keys.tree_node(number))?;
        Ok(())
    }

    /// Issue the next node number.
    fn next_number<S: BackingStore + ?Sized>(&self, store: &mut S) -> Result<NodeNumber, TreeError> {
        let high: NodeNumber = codec::read::<_, NodeNumber, TreeError>(store, &self.keys.tree_high())?
            .ok_or_else(|| TreeError::Corrupt("node counter missing".to_string()))?;
        let next = high + 1;
        codec::write::<_, _, TreeError>(store, &self.keys.tree_high(), &next)?;
        Ok(next)
    }

    /// Nodes from the root down to the leaf where `key` belongs.
    ///
    /// Returns `None` for an empty tree.
    pub fn search<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        key: &[u8],
    ) -> Result<Option<Vec<Node>>, TreeError> {
        let Some(mut node) = self.read_root(store)? else {
            return Ok(None);
        };
        let mut path = Vec::new();
        loop {
            let child = match node.children() {
                Some(children) => {
                    let at = node.bisect_right(key);
                    *children.get(at).ok_or_else(|| {
                        TreeError::Corrupt(format!("node {} has too few children", node.number))
                    })?
                }
                None => {
                    path.push(node);
                    return Ok(Some(path));
                }
            };
            path.push(node);
            node = self.read_node(store, child)?;
        }
    }

    /// Whether `key` is in the tree.
    pub fn contains<S: BackingStore + ?Sized>(&self, store: &S, key: &[u8]) -> Result<bool, TreeError> {
        Ok(self
            .search(store, key)?
            .and_then(|path| path.last().map(|leaf| leaf.contains(key)))
            .unwrap_or(false))
    }

    /// Insert `key`. Returns whether it was absent.
    pub fn insert<S: BackingStore + ?Sized>(&self, store: &mut S, key: &[u8]) -> Result<bool, TreeError> {
        let Some(mut path) = self.search(store, key)? else {
            self.write_node(store, &Node::solo_root(0, vec![key.to_vec()]))?;
            codec::write::<_, _, TreeError>(store, &self.keys.tree_high(), &0u64)?;
            return Ok(true);
        };
        let Some(mut leaf) = path.pop() else {
            return Ok(false);
        };
        let at = match leaf.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Ok(_) => return Ok(false),
            Err(at) => at,
        };
        leaf.keys.insert(at, key.to_vec());

        if leaf.keys.len() <= self.max_keys() {
            self.write_node(store, &leaf)?;
            return Ok(true);
        }
        if matches!(leaf.kind, NodeKind::SoloRoot) {
            self.split_solo_root(store, leaf)?;
            return Ok(true);
        }

        let (mut splitter, mut right_number) = self.split_leaf(store, leaf)?;
        while let Some(mut parent) = path.pop() {
            let at = parent.bisect_right(&splitter);
            parent.keys.insert(at, splitter);
            children_of(&mut parent)?.insert(at + 1, right_number);

            if parent.keys.len() <= self.max_keys() {
                self.write_node(store, &parent)?;
                return Ok(true);
            }
            if parent.is_root() {
                self.split_root(store, parent)?;
                return Ok(true);
            }
            (splitter, right_number) = self.split_branch(store, parent)?;
        }
        Err(TreeError::Corrupt("split propagated past the root".to_string()))
    }

    /// Split an overfull solo root into two leaves under a new root.
    fn split_solo_root<S: BackingStore + ?Sized>(&self, store: &mut S, solo: Node) -> Result<(), TreeError> {
        let right_number = self.next_number(store)?;
        let root_number = self.next_number(store)?;
        let Node {
            number: left_number,
            mut keys,
            ..
        } = solo;
        let right_keys = keys.split_off(keys.len() - self.split());
        let splitter = right_keys[0].clone();

        let left = Node {
            number: left_number,
            keys,
            kind: NodeKind::Leaf {
                left: None,
                right: Some(right_number),
            },
        };
        let right = Node {
            number: right_number,
            keys: right_keys,
            kind: NodeKind::Leaf {
                left: Some(left_number),
                right: None,
            },
        };
        let root = Node {
            number: root_number,
            keys: vec![splitter],
            kind: NodeKind::Root {
                children: vec![left_number, right_number],
            },
        };
        self.write_node(store, &left)?;
        self.write_node(store, &right)?;
        self.write_node(store, &root)?;
        debug!(left = left_number, right = right_number, root = root_number, "split solo root");
        Ok(())
    }

    /// Split an overfull leaf. Returns the splitter and the new right leaf's number.
    fn split_leaf<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        mut leaf: Node,
    ) -> Result<(Vec<u8>, NodeNumber), TreeError> {
        let right_number = self.next_number(store)?;
        let right_keys = leaf.keys.split_off(leaf.keys.len() - self.split());
        let old_right = leaf.right();
        let right = Node {
            number: right_number,
            keys: right_keys,
            kind: NodeKind::Leaf {
                left: Some(leaf.number),
                right: old_right,
            },
        };
        leaf.set_right(Some(right_number));
        if let Some(neighbour_number) = old_right {
            let mut neighbour = self.read_node(store, neighbour_number)?;
            neighbour.set_left(Some(right_number));
            self.write_node(store, &neighbour)?;
        }
        self.write_node(store, &leaf)?;
        self.write_node(store, &right)?;
        debug!(left = leaf.number, right = right_number, "split leaf");
        Ok((right.keys[0].clone(), right_number))
    }

    /// Split an overfull root into two branches under a new root.
    fn split_root<S: BackingStore + ?Sized>(&self, store: &mut S, root: Node) -> Result<(), TreeError> {
        let left_number = root.number;
        let (left, median, right) = self.split_interior(store, root)?;
        let root_number = self.next_number(store)?;
        let new_root = Node {
            number: root_number,
            keys: vec![median],
            kind: NodeKind::Root {
                children: vec![left_number, right.number],
            },
        };
        self.write_node(store, &left)?;
        self.write_node(store, &right)?;
        self.write_node(store, &new_root)?;
        debug!(left = left_number, right = right.number, root = root_number, "split root");
        Ok(())
    }

    /// Split an overfull branch. Returns the median key and the new right branch's number.
    fn split_branch<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        branch: Node,
    ) -> Result<(Vec<u8>, NodeNumber), TreeError> {
        let (left, median, right) = self.split_interior(store, branch)?;
        self.write_node(store, &left)?;
        self.write_node(store, &right)?;
        debug!(left = left.number, right = right.number, "split branch");
        Ok((median, right.number))
    }

    /// Divide a root or branch into two branches around its median key.
    fn split_interior<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        node: Node,
    ) -> Result<(Node, Vec<u8>, Node), TreeError> {
        let Node {
            number,
            mut keys,
            kind,
        } = node;
        let mut children = match kind {
            NodeKind::Root { children } | NodeKind::Branch { children } => children,
            _ => return Err(TreeError::Corrupt(format!("node {number} has no children"))),
        };
        let right_keys = keys.split_off(keys.len() - self.split());
        let median = keys
            .pop()
            .ok_or_else(|| TreeError::Corrupt(format!("node {number} too small to split")))?;
        let right_children = children.split_off(children.len() - (self.split() + 1));
        let right_number = self.next_number(store)?;
        Ok((
            Node {
                number,
                keys,
                kind: NodeKind::Branch { children },
            },
            median,
            Node {
                number: right_number,
                keys: right_keys,
                kind: NodeKind::Branch {
                    children: right_children,
                },
            },
        ))
    }

    /// Delete `key`. Returns whether it was present.
    ///
    /// Fails if the key still has a posting entry: the posting set must be
    /// emptied before its key leaves the index.
    pub fn delete<S: BackingStore + ?Sized>(&self, store: &mut S, key: &[u8]) -> Result<bool, TreeError> {
        if store.contains(&self.keys.posting_directory(key))? {
            return Err(TreeError::KeyStillReferenced { key: key.to_vec() });
        }
        let Some(mut path) = self.search(store, key)? else {
            return Ok(false);
        };
        let Some(mut leaf) = path.pop() else {
            return Ok(false);
        };
        let Some(at) = leaf.find(key) else {
            return Ok(false);
        };
        leaf.keys.remove(at);

        if matches!(leaf.kind, NodeKind::SoloRoot) {
            if leaf.keys.is_empty() {
                store.delete(&self.keys.tree_root())?;
                store.delete(&self.keys.tree_high())?;
                debug!("tree emptied");
            } else {
                self.write_node(store, &leaf)?;
            }
            return Ok(true);
        }

        if at == 0
            && leaf.left().is_some()
            && let Some(new_min) = leaf.keys.first().cloned()
        {
            self.replace_splitter(store, &mut path, key, new_min)?;
        }

        if leaf.keys.len() >= self.split() {
            self.write_node(store, &leaf)?;
            return Ok(true);
        }

        let mut parent = path
            .pop()
            .ok_or_else(|| TreeError::Corrupt(format!("leaf {} has no parent", leaf.number)))?;
        if self.rebalance_leaf(store, &mut parent, leaf)? {
            self.rebalance_branches(store, path, parent)?;
        } else {
            self.write_node(store, &parent)?;
        }
        Ok(true)
    }

    /// Replace the nearest ancestor copy of `old` with `new`.
    fn replace_splitter<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        path: &mut [Node],
        old: &[u8],
        new: Vec<u8>,
    ) -> Result<(), TreeError> {
        for ancestor in path.iter_mut().rev() {
            if let Some(at) = ancestor.find(old) {
                ancestor.keys[at] = new;
                return self.write_node(store, ancestor);
            }
        }
        Err(TreeError::MissingSplitter { key: old.to_vec() })
    }

    /// Restore an underfull leaf by borrowing or merging.
    ///
    /// Returns whether `parent` lost a key.
    fn rebalance_leaf<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        parent: &mut Node,
        mut leaf: Node,
    ) -> Result<bool, TreeError> {
        let children = parent
            .children()
            .ok_or_else(|| TreeError::Corrupt(format!("node {} is not a parent", parent.number)))?
            .clone();
        let at = children
            .iter()
            .position(|c| *c == leaf.number)
            .ok_or_else(|| TreeError::Corrupt(format!("leaf {} not under its parent", leaf.number)))?;
        let mut right = match children.get(at + 1) {
            Some(number) => Some(self.read_node(store, *number)?),
            None => None,
        };
        let mut left = match at.checked_sub(1) {
            Some(i) => Some(self.read_node(store, children[i])?),
            None => None,
        };

        if let Some(right) = right.as_mut()
            && right.keys.len() > self.split()
        {
            let borrowed = right.keys.remove(0);
            leaf.keys.push(borrowed);
            parent.keys[at] = right.keys[0].clone();
            self.write_node(store, &leaf)?;
            self.write_node(store, right)?;
            debug!(leaf = leaf.number, from = right.number, "leaf borrowed from right");
            return Ok(false);
        }

        if let Some(left) = left.as_mut()
            && left.keys.len() > self.split()
        {
            let borrowed = left
                .keys
                .pop()
                .ok_or_else(|| TreeError::Corrupt(format!("leaf {} is empty", left.number)))?;
            parent.keys[at - 1] = borrowed.clone();
            leaf.keys.insert(0, borrowed);
            self.write_node(store, &leaf)?;
            self.write_node(store, left)?;
            debug!(leaf = leaf.number, from = left.number, "leaf borrowed from left");
            return Ok(false);
        }

        if let Some(right) = right {
            let next = right.right();
            leaf.keys.extend(right.keys);
            leaf.set_right(next);
            self.relink_left(store, next, leaf.number)?;
            parent.keys.remove(at);
            if let Some(children) = parent.children_mut() {
                children.remove(at + 1);
            }
            self.write_node(store, &leaf)?;
            self.delete_node(store, right.number)?;
            debug!(leaf = leaf.number, merged = right.number, "merged right leaf");
            return Ok(true);
        }

        if let Some(mut left) = left {
            let next = leaf.right();
            left.keys.extend(leaf.keys);
            left.set_right(next);
            self.relink_left(store, next, left.number)?;
            parent.keys.remove(at - 1);
            if let Some(children) = parent.children_mut() {
                children.remove(at);
            }
            self.write_node(store, &left)?;
            self.delete_node(store, leaf.number)?;
            debug!(leaf = left.number, merged = leaf.number, "merged into left leaf");
            return Ok(true);
        }

        Err(TreeError::Corrupt(format!("leaf {} has no siblings", leaf.number)))
    }

    fn relink_left<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        neighbour: Option<NodeNumber>,
        left: NodeNumber,
    ) -> Result<(), TreeError> {
        if let Some(number) = neighbour {
            let mut node = self.read_node(store, number)?;
            node.set_left(Some(left));
            self.write_node(store, &node)?;
        }
        Ok(())
    }

    /// Walk up from `node`, which has lost a key, restoring branch occupancy.
    fn rebalance_branches<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        mut path: Vec<Node>,
        mut node: Node,
    ) -> Result<(), TreeError> {
        loop {
            if node.is_root() {
                if node.keys.is_empty() {
                    return self.collapse_root(store, &node);
                }
                return self.write_node(store, &node);
            }
            let child_count = node.children().map_or(0, Vec::len);
            if child_count >= self.min_children() {
                return self.write_node(store, &node);
            }
            let mut parent = path
                .pop()
                .ok_or_else(|| TreeError::Corrupt(format!("branch {} has no parent", node.number)))?;
            if !self.rebalance_branch(store, &mut parent, node)? {
                return self.write_node(store, &parent);
            }
            node = parent;
        }
    }

    /// Restore an underfull branch by rotating or merging.
    ///
    /// Returns whether `parent` lost a key.
    fn rebalance_branch<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        parent: &mut Node,
        mut node: Node,
    ) -> Result<bool, TreeError> {
        let children = parent
            .children()
            .ok_or_else(|| TreeError::Corrupt(format!("node {} is not a parent", parent.number)))?
            .clone();
        let at = children
            .iter()
            .position(|c| *c == node.number)
            .ok_or_else(|| TreeError::Corrupt(format!("branch {} not under its parent", node.number)))?;
        let mut right = match children.get(at + 1) {
            Some(number) => Some(self.read_node(store, *number)?),
            None => None,
        };
        let mut left = match at.checked_sub(1) {
            Some(i) => Some(self.read_node(store, children[i])?),
            None => None,
        };

        if let Some(right) = right.as_mut()
            && right.children().map_or(0, Vec::len) > self.min_children()
        {
            let moved_key = std::mem::replace(&mut parent.keys[at], right.keys.remove(0));
            let moved_child = take_first_child(right)?;
            node.keys.push(moved_key);
            push_child(&mut node, moved_child)?;
            self.write_node(store, &node)?;
            self.write_node(store, right)?;
            debug!(branch = node.number, from = right.number, "branch rotated from right");
            return Ok(false);
        }

        if let Some(left) = left.as_mut()
            && left.children().map_or(0, Vec::len) > self.min_children()
        {
            let new_splitter = left
                .keys
                .pop()
                .ok_or_else(|| TreeError::Corrupt(format!("branch {} is empty", left.number)))?;
            let moved_key = std::mem::replace(&mut parent.keys[at - 1], new_splitter);
            let moved_child = take_last_child(left)?;
            node.keys.insert(0, moved_key);
            children_of(&mut node)?.insert(0, moved_child);
            self.write_node(store, &node)?;
            self.write_node(store, left)?;
            debug!(branch = node.number, from = left.number, "branch rotated from left");
            return Ok(false);
        }

        if let Some(right) = right {
            node.keys.push(parent.keys.remove(at));
            let right_children = right.children().cloned().unwrap_or_default();
            node.keys.extend(right.keys);
            children_of(&mut node)?.extend(right_children);
            if let Some(children) = parent.children_mut() {
                children.remove(at + 1);
            }
            self.write_node(store, &node)?;
            self.delete_node(store, right.number)?;
            debug!(branch = node.number, merged = right.number, "merged right branch");
            return Ok(true);
        }

        if let Some(mut left) = left {
            left.keys.push(parent.keys.remove(at - 1));
            let node_children = node.children().cloned().unwrap_or_default();
            left.keys.extend(node.keys);
            children_of(&mut left)?.extend(node_children);
            if let Some(children) = parent.children_mut() {
                children.remove(at);
            }
            self.write_node(store, &left)?;
            self.delete_node(store, node.number)?;
            debug!(branch = left.number, merged = node.number, "merged into left branch");
            return Ok(true);
        }

        Err(TreeError::Corrupt(format!("branch {} has no siblings", node.number)))
    }

    /// Replace a root left with one child by that child.
    fn collapse_root<S: BackingStore + ?Sized>(&self, store: &mut S, root: &Node) -> Result<(), TreeError> {
        let only = match root.children().map(Vec::as_slice) {
            Some([only]) => *only,
            _ => {
                return Err(TreeError::Corrupt(format!(
                    "root {} has no keys but not one child",
                    root.number
                )));
            }
        };
        let mut child = self.read_node(store, only)?;
        child.kind = match child.kind {
            NodeKind::Leaf { .. } => NodeKind::SoloRoot,
            NodeKind::Branch { children } => NodeKind::Root { children },
            _ => return Err(TreeError::Corrupt(format!("node {only} stored as a root twice"))),
        };
        self.delete_node(store, only)?;
        self.write_node(store, &child)?;
        debug!(old_root = root.number, new_root = only, "collapsed root");
        Ok(())
    }

    /// Check every structural invariant. Returns the keys in leaf-chain order.
    pub fn verify<S: BackingStore + ?Sized>(&self, store: &S) -> Result<Vec<Vec<u8>>, TreeError> {
        let Some(root) = self.read_root(store)? else {
            return Ok(Vec::new());
        };
        let mut leaves = Vec::new();
        self.verify_node(store, &root, None, None, &mut leaves)?;

        let mut keys = Vec::new();
        for (i, leaf) in leaves.iter().enumerate() {
            if leaf.is_root() {
                if leaf.keys.is_empty() || leaf.keys.len() > self.max_keys() {
                    return Err(TreeError::Corrupt("solo root size out of range".to_string()));
                }
            } else {
                if !(self.split()..=self.max_keys()).contains(&leaf.keys.len()) {
                    return Err(TreeError::Corrupt(format!(
                        "leaf {} holds {} keys",
                        leaf.number,
                        leaf.keys.len()
                    )));
                }
                let expected_left = i.checked_sub(1).map(|j| leaves[j].number);
                let expected_right = leaves.get(i + 1).map(|n| n.number);
                if leaf.left() != expected_left || leaf.right() != expected_right {
                    return Err(TreeError::Corrupt(format!(
                        "leaf {} is linked out of order",
                        leaf.number
                    )));
                }
            }
            keys.extend(leaf.keys.iter().cloned());
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TreeError::Corrupt("leaf chain out of order".to_string()));
        }
        Ok(keys)
    }

    /// Verify one subtree whose keys must lie in `[lower, upper)`.
    ///
    /// Returns the subtree's minimum key.
    fn verify_node<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        node: &Node,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        leaves: &mut Vec<Node>,
    ) -> Result<Vec<u8>, TreeError> {
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TreeError::Corrupt(format!("node {} keys unsorted", node.number)));
        }
        let in_bounds = node.keys.iter().all(|k| {
            lower.is_none_or(|l| k.as_slice() >= l) && upper.is_none_or(|u| k.as_slice() < u)
        });
        if !in_bounds {
            return Err(TreeError::Corrupt(format!("node {} key out of bounds", node.number)));
        }

        let Some(children) = node.children() else {
            leaves.push(node.clone());
            return node
                .keys
                .first()
                .cloned()
                .ok_or_else(|| TreeError::Corrupt(format!("leaf {} is empty", node.number)));
        };
        if children.len() != node.keys.len() + 1 {
            return Err(TreeError::Corrupt(format!(
                "node {} has {} keys and {} children",
                node.number,
                node.keys.len(),
                children.len()
            )));
        }
        let least = if node.is_root() { 2 } else { self.min_children() };
        if children.len() < least || children.len() > self.branching_factor {
            return Err(TreeError::Corrupt(format!(
                "node {} has {} children",
                node.number,
                children.len()
            )));
        }

        let mut minimum = None;
        for (i, child_number) in children.iter().enumerate() {
            let child = self.read_node(store, *child_number)?;
            let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1].as_slice()) };
            let child_upper = node.keys.get(i).map(Vec::as_slice).or(upper);
            let child_min = self.verify_node(store, &child, child_lower, child_upper, leaves)?;
            if i > 0 && child_min != node.keys[i - 1] {
                return Err(TreeError::Corrupt(format!(
                    "splitter {} of node {} is not its right subtree's minimum",
                    i - 1,
                    node.number
                )));
            }
            if i == 0 {
                minimum = Some(child_min);
            }
        }
        minimum.ok_or_else(|| TreeError::Corrupt(format!("node {} has no children", node.number)))
    }
}

/// Child numbers of a root or branch; any other node is corrupt here.
fn children_of(node: &mut Node) -> Result<&mut Vec<NodeNumber>, TreeError> {
    let number = node.number;
    node.children_mut()
        .ok_or_else(|| TreeError::Corrupt(format!("node {number} is not a parent")))
}

fn take_first_child(node: &mut Node) -> Result<NodeNumber, TreeError> {
    let number = node.number;
    let children = children_of(node)?;
    if children.is_empty() {
        return Err(TreeError::Corrupt(format!("node {number} has no children")));
    }
    Ok(children.remove(0))
}

fn take_last_child(node: &mut Node) -> Result<NodeNumber, TreeError> {
    let number = node.number;
    node.children_mut()
        .and_then(Vec::pop)
        .ok_or_else(|| TreeError::Corrupt(format!("node {number} has no children")))
}

fn push_child(node: &mut Node, child: NodeNumber) -> Result<(), TreeError> {
    children_of(node)?.push(child);
    Ok(())
}
