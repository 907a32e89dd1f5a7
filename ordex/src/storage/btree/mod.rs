//! B+tree over the distinct values of one ordered field.
//!
//! # Structure
//!
//! - A tree with few keys is a single solo root holding them all.
//! - Otherwise the root and branches hold splitter keys and child node
//!   numbers; every splitter equals the lowest key of the subtree to its
//!   right.
//! - Leaves hold keys and are doubly linked for ordered scans.
//!
//! # Storage
//!
//! The root lives under the field's root key whatever its number; every other
//! node lives under `<table>_<field>_N_<number>`. The highest node number
//! issued is kept under `<table>_<field>_H`.

mod cursor;
mod node;
mod tree;

pub use cursor::TreeCursor;
pub use node::{Node, NodeKind, NodeNumber};
pub use tree::{MIN_BRANCHING_FACTOR, Tree, TreeError};
