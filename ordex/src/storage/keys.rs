//! Persisted key layout.
//!
//! Composite keys join path segments with [`DELIMITER`]:
//!
//! ```text
//! 0_S                       segment size (control table)
//! 0_D                       stored database specification
//! <t>_0_<record>            primary record
//! <t>_0_E                   existence bitmap segment list
//! <t>_0_E_<segment>         existence bitmap for one segment
//! <t>_0_F                   segments holding freed record numbers
//! <t>_<f>                   tree root node
//! <t>_<f>_H                 highest node number issued
//! <t>_<f>_N_<node>          tree node other than the root
//! <t>_<f>_S_<value>         posting directory for a value
//! <t>_<f>_R_<segment>_<value>  posting payload (list or bitmap)
//! ```
//!
//! Tables are numbered from 1 in name order; table 0 is the control table.
//! Within a table, field 0 holds the primary records and secondary fields
//! are numbered from 1 in name order. Values are raw bytes and always form
//! the final segment, so they may contain the delimiter.

use crate::storage::segment::{RecordNumber, SegmentNumber};

/// Byte joining key path segments.
pub const DELIMITER: u8 = b'_';

const CONTROL_TABLE: &str = "0";
const RECORD_FIELD: &str = "0";
const SEGMENT_SIZE_SUFFIX: &str = "S";
const SPECIFICATION_SUFFIX: &str = "D";
const EXISTENCE_SUFFIX: &str = "E";
const FREED_SUFFIX: &str = "F";
const HIGH_NODE_SUFFIX: &str = "H";
const NODE_SUFFIX: &str = "N";
const DIRECTORY_SUFFIX: &str = "S";
const PAYLOAD_SUFFIX: &str = "R";

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(DELIMITER);
        }
        key.extend_from_slice(part);
    }
    key
}

/// Key of the recorded segment size.
#[must_use]
pub fn segment_size_key() -> Vec<u8> {
    join(&[CONTROL_TABLE.as_bytes(), SEGMENT_SIZE_SUFFIX.as_bytes()])
}

/// Key of the recorded database specification.
#[must_use]
pub fn specification_key() -> Vec<u8> {
    join(&[CONTROL_TABLE.as_bytes(), SPECIFICATION_SUFFIX.as_bytes()])
}

/// Keys belonging to one file (table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileKeys {
    table: String,
}

impl FileKeys {
    /// Keys for table number `table` (1-based).
    #[must_use]
    pub fn new(table: usize) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    /// Key of a primary record.
    #[must_use]
    pub fn record(&self, record: RecordNumber) -> Vec<u8> {
        join(&[
            self.table.as_bytes(),
            RECORD_FIELD.as_bytes(),
            record.to_string().as_bytes(),
        ])
    }

    /// Key of the list of segments with an existence bitmap.
    #[must_use]
    pub fn existence_directory(&self) -> Vec<u8> {
        join(&[
            self.table.as_bytes(),
            RECORD_FIELD.as_bytes(),
            EXISTENCE_SUFFIX.as_bytes(),
        ])
    }

    /// Key of one segment's existence bitmap.
    #[must_use]
    pub fn existence_segment(&self, segment: SegmentNumber) -> Vec<u8> {
        join(&[
            self.table.as_bytes(),
            RECORD_FIELD.as_bytes(),
            EXISTENCE_SUFFIX.as_bytes(),
            segment.to_string().as_bytes(),
        ])
    }

    /// Key of the list of segments holding freed record numbers.
    #[must_use]
    pub fn freed_segments(&self) -> Vec<u8> {
        join(&[
            self.table.as_bytes(),
            RECORD_FIELD.as_bytes(),
            FREED_SUFFIX.as_bytes(),
        ])
    }

    /// Keys for secondary field number `field` (1-based) of this table.
    #[must_use]
    pub fn field(&self, field: usize) -> FieldKeys {
        FieldKeys {
            root: format!("{}{}{field}", self.table, char::from(DELIMITER)),
        }
    }
}

/// Keys belonging to one secondary field of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKeys {
    root: String,
}

impl FieldKeys {
    /// Key of the tree's root node.
    #[must_use]
    pub fn tree_root(&self) -> Vec<u8> {
        self.root.as_bytes().to_vec()
    }

    /// Key of a non-root tree node.
    #[must_use]
    pub fn tree_node(&self, node: u64) -> Vec<u8> {
        join(&[
            self.root.as_bytes(),
            NODE_SUFFIX.as_bytes(),
            node.to_string().as_bytes(),
        ])
    }

    /// Key of the highest node number issued for the tree.
    #[must_use]
    pub fn tree_high(&self) -> Vec<u8> {
        join(&[self.root.as_bytes(), HIGH_NODE_SUFFIX.as_bytes()])
    }

    /// Key of a value's posting directory.
    #[must_use]
    pub fn posting_directory(&self, value: &[u8]) -> Vec<u8> {
        join(&[self.root.as_bytes(), DIRECTORY_SUFFIX.as_bytes(), value])
    }

    /// Key of a value's list or bitmap payload for one segment.
    #[must_use]
    pub fn posting_payload(&self, segment: SegmentNumber, value: &[u8]) -> Vec<u8> {
        join(&[
            self.root.as_bytes(),
            PAYLOAD_SUFFIX.as_bytes(),
            segment.to_string().as_bytes(),
            value,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_keys() {
        assert_eq!(segment_size_key(), b"0_S");
        assert_eq!(specification_key(), b"0_D");
    }

    #[test]
    fn test_file_keys() {
        let keys = FileKeys::new(2);
        assert_eq!(keys.record(41), b"2_0_41");
        assert_eq!(keys.existence_directory(), b"2_0_E");
        assert_eq!(keys.existence_segment(3), b"2_0_E_3");
        assert_eq!(keys.freed_segments(), b"2_0_F");
    }

    #[test]
    fn test_field_keys() {
        let keys = FileKeys::new(2).field(1);
        assert_eq!(keys.tree_root(), b"2_1");
        assert_eq!(keys.tree_node(7), b"2_1_N_7");
        assert_eq!(keys.tree_high(), b"2_1_H");
        assert_eq!(keys.posting_directory(b"red"), b"2_1_S_red");
        assert_eq!(keys.posting_payload(4, b"a_b"), b"2_1_R_4_a_b");
    }

    #[test]
    fn test_distinct_fields_do_not_share_keys() {
        let first = FileKeys::new(1).field(1);
        let eleventh = FileKeys::new(1).field(11);
        assert_ne!(first.posting_directory(b"1"), eleventh.posting_directory(b""));
        assert_ne!(first.tree_root(), eleventh.tree_root());
    }
}
