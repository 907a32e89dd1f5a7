//! Lazy enumeration of an ordered field's values.
//!
//! A [`ValueScan`] positions a tree cursor at the lower bound and steps it
//! forward one key per call to `next`, stopping at the upper bound or when a
//! prefix no longer matches. Filters are applied per key; the scan never
//! reads ahead.

use std::collections::BTreeSet;
use std::ops::Bound;

use regex::bytes::Regex;

use crate::storage::btree::{TreeCursor, TreeError};
use crate::storage::io::BackingStore;

/// Forward-only iterator over the values of one ordered field.
pub struct ValueScan<'a, S: ?Sized> {
    store: &'a S,
    cursor: TreeCursor,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    prefix: Option<Vec<u8>>,
    pattern: Option<Regex>,
    allowed: Option<BTreeSet<Vec<u8>>>,
    started: bool,
    finished: bool,
}

impl<'a, S: BackingStore + ?Sized> ValueScan<'a, S> {
    /// Every value of the tree behind `cursor`.
    #[must_use]
    pub const fn new(store: &'a S, cursor: TreeCursor) -> Self {
        Self {
            store,
            cursor,
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            prefix: None,
            pattern: None,
            allowed: None,
            started: false,
            finished: false,
        }
    }

    /// Restrict to values within `lower` and `upper`.
    #[must_use]
    pub fn bounded(mut self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Restrict to values starting with `prefix`.
    #[must_use]
    pub fn prefixed(mut self, prefix: Vec<u8>) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Skip values with no match for `pattern`.
    #[must_use]
    pub fn matching(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Skip values not in `allowed`.
    #[must_use]
    pub fn allowed(mut self, allowed: BTreeSet<Vec<u8>>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Position on the first candidate key.
    fn start(&mut self) -> Result<Option<Vec<u8>>, TreeError> {
        let seek = match (&self.lower, &self.prefix) {
            (Bound::Included(v) | Bound::Excluded(v), Some(p)) => Some(v.max(p).clone()),
            (Bound::Included(v) | Bound::Excluded(v), None) => Some(v.clone()),
            (Bound::Unbounded, Some(p)) => Some(p.clone()),
            (Bound::Unbounded, None) => None,
        };
        let mut key = match seek {
            Some(seek) => self.cursor.nearest(self.store, &seek)?,
            None => self.cursor.first(self.store)?,
        };
        if let Bound::Excluded(v) = &self.lower
            && key.as_ref() == Some(v)
        {
            key = self.cursor.next(self.store)?;
        }
        Ok(key)
    }

    fn advance(&mut self) -> Result<Option<Vec<u8>>, TreeError> {
        if self.started {
            self.cursor.next(self.store)
        } else {
            self.started = true;
            self.start()
        }
    }

    fn in_upper_bound(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(v) => key <= v.as_slice(),
            Bound::Excluded(v) => key < v.as_slice(),
            Bound::Unbounded => true,
        }
    }

    fn accepts(&self, key: &[u8]) -> bool {
        self.pattern.as_ref().is_none_or(|p| p.is_match(key))
            && self.allowed.as_ref().is_none_or(|a| a.contains(key))
    }
}

impl<S: BackingStore + ?Sized> Iterator for ValueScan<'_, S> {
    type Item = Result<Vec<u8>, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let key = match self.advance() {
                Ok(Some(key)) => key,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            let past_prefix = self.prefix.as_ref().is_some_and(|p| !key.starts_with(p));
            if past_prefix || !self.in_upper_bound(&key) {
                self.finished = true;
                return None;
            }
            if self.accepts(&key) {
                return Some(Ok(key));
            }
        }
        None
    }
}
