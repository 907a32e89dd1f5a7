//! End-to-end tests through the public [`Database`](crate::storage::Database) API.
//!
//! Each test file covers one scenario and asserts on both the query results
//! and the keys left in the backing store.

#![cfg(test)]

mod helpers;

mod test_backing_stores;
mod test_existence;
mod test_posting_conversion;
mod test_reopen;
mod test_simulation;
mod test_tree_lifecycle;
