//! B+tree node types.
//!
//! Nodes refer to each other by number, never by pointer. Every node holds a
//! sorted, duplicate-free key sequence; the variant decides whether it also
//! holds child numbers (root and branch) or sibling numbers (leaf).

use serde::{Deserialize, Serialize};

/// Stable number of a tree node. Numbers are never reused within a tree.
pub type NodeNumber = u64;

/// The shape of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The only node of the tree: a root with no children.
    SoloRoot,
    /// Root with children; one more child than keys.
    Root { children: Vec<NodeNumber> },
    /// Interior node with children; one more child than keys.
    Branch { children: Vec<NodeNumber> },
    /// Bottom-level node linked to its neighbours.
    Leaf {
        left: Option<NodeNumber>,
        right: Option<NodeNumber>,
    },
}

/// A tree node as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub number: NodeNumber,
    pub keys: Vec<Vec<u8>>,
    pub kind: NodeKind,
}

impl Node {
    /// A solo root holding `keys`.
    #[must_use]
    pub const fn solo_root(number: NodeNumber, keys: Vec<Vec<u8>>) -> Self {
        Self {
            number,
            keys,
            kind: NodeKind::SoloRoot,
        }
    }

    /// Whether the node is stored under the tree's root key.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::SoloRoot | NodeKind::Root { .. })
    }

    /// Whether the node holds keys without children.
    #[must_use]
    pub const fn is_leaf_level(&self) -> bool {
        matches!(self.kind, NodeKind::SoloRoot | NodeKind::Leaf { .. })
    }

    /// Child numbers of a root or branch.
    #[must_use]
    pub fn children(&self) -> Option<&Vec<NodeNumber>> {
        match &self.kind {
            NodeKind::Root { children } | NodeKind::Branch { children } => Some(children),
            _ => None,
        }
    }

    /// Mutable child numbers of a root or branch.
    pub fn children_mut(&mut self) -> Option<&mut Vec<NodeNumber>> {
        match &mut self.kind {
            NodeKind::Root { children } | NodeKind::Branch { children } => Some(children),
            _ => None,
        }
    }

    /// Left neighbour of a leaf.
    #[must_use]
    pub const fn left(&self) -> Option<NodeNumber> {
        match self.kind {
            NodeKind::Leaf { left, .. } => left,
            _ => None,
        }
    }

    /// Right neighbour of a leaf.
    #[must_use]
    pub const fn right(&self) -> Option<NodeNumber> {
        match self.kind {
            NodeKind::Leaf { right, .. } => right,
            _ => None,
        }
    }

    /// Set the left neighbour of a leaf.
    pub const fn set_left(&mut self, number: Option<NodeNumber>) {
        if let NodeKind::Leaf { left, .. } = &mut self.kind {
            *left = number;
        }
    }

    /// Set the right neighbour of a leaf.
    pub const fn set_right(&mut self, number: Option<NodeNumber>) {
        if let NodeKind::Leaf { right, .. } = &mut self.kind {
            *right = number;
        }
    }

    /// Index of the first key greater than `key`.
    ///
    /// For a root or branch this is the index of the child to descend into.
    #[must_use]
    pub fn bisect_right(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }

    /// Index of the first key not less than `key`.
    #[must_use]
    pub fn bisect_left(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() < key)
    }

    /// Position of `key`, if present.
    #[must_use]
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key)).ok()
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_bisect() {
        let node = Node::solo_root(0, keys(&["b", "d", "f"]));
        assert_eq!(node.bisect_right(b"a"), 0);
        assert_eq!(node.bisect_right(b"b"), 1);
        assert_eq!(node.bisect_right(b"c"), 1);
        assert_eq!(node.bisect_right(b"f"), 3);
        assert_eq!(node.bisect_left(b"b"), 0);
        assert_eq!(node.bisect_left(b"c"), 1);
        assert_eq!(node.bisect_left(b"g"), 3);
        assert_eq!(node.find(b"d"), Some(1));
        assert!(!node.contains(b"e"));
    }

    #[test]
    fn test_sibling_accessors_only_apply_to_leaves() {
        let mut leaf = Node {
            number: 3,
            keys: keys(&["a"]),
            kind: NodeKind::Leaf {
                left: None,
                right: Some(4),
            },
        };
        leaf.set_left(Some(2));
        assert_eq!(leaf.left(), Some(2));
        assert_eq!(leaf.right(), Some(4));
        assert!(leaf.is_leaf_level());
        assert!(!leaf.is_root());

        let mut root = Node {
            number: 5,
            keys: keys(&["m"]),
            kind: NodeKind::Root {
                children: vec![3, 4],
            },
        };
        root.set_right(Some(9));
        assert_eq!(root.right(), None);
        assert_eq!(root.children(), Some(&vec![3, 4]));
        assert!(root.is_root());
    }

    #[test]
    fn test_serialized_form() {
        let node = Node {
            number: 1,
            keys: keys(&["k"]),
            kind: NodeKind::Leaf {
                left: Some(0),
                right: None,
            },
        };
        let text = serde_json::to_string(&node).expect("encode");
        assert_eq!(
            text,
            r#"{"number":1,"keys":[[107]],"kind":{"Leaf":{"left":0,"right":null}}}"#
        );
        let back: Node = serde_json::from_str(&text).expect("decode");
        assert_eq!(back, node);
    }
}
