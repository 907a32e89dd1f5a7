//! Query bound types.
//!
//! - `KeyRange` - lower and upper bounds on field values, each inclusive or
//!   exclusive
//! - `ValueSpec` - a `KeyRange` plus an optional pattern and allowed-value set,
//!   used to enumerate values

use std::collections::BTreeSet;
use std::ops::Bound;

/// Errors from building a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Both an inclusive and an exclusive lower bound were given.
    #[error("lower bound given both inclusively and exclusively")]
    ConflictingLowerBounds,
    /// Both an inclusive and an exclusive upper bound were given.
    #[error("upper bound given both inclusively and exclusively")]
    ConflictingUpperBounds,
    /// The pattern is not a valid regular expression.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Bounds on the values of a field. Unset bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Values greater than or equal to this.
    pub from: Option<Vec<u8>>,
    /// Values strictly greater than this.
    pub above: Option<Vec<u8>>,
    /// Values less than or equal to this.
    pub to: Option<Vec<u8>>,
    /// Values strictly less than this.
    pub below: Option<Vec<u8>>,
}

impl KeyRange {
    /// The unbounded range.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            above: None,
            to: None,
            below: None,
        }
    }

    #[must_use]
    pub fn from(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.from = Some(value.into());
        self
    }

    #[must_use]
    pub fn above(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.above = Some(value.into());
        self
    }

    #[must_use]
    pub fn to(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.to = Some(value.into());
        self
    }

    #[must_use]
    pub fn below(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.below = Some(value.into());
        self
    }

    /// The range as a pair of bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if a side is bounded both inclusively and exclusively.
    pub fn bounds(&self) -> Result<(Bound<Vec<u8>>, Bound<Vec<u8>>), QueryError> {
        let lower = match (&self.from, &self.above) {
            (Some(_), Some(_)) => return Err(QueryError::ConflictingLowerBounds),
            (Some(v), None) => Bound::Included(v.clone()),
            (None, Some(v)) => Bound::Excluded(v.clone()),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (&self.to, &self.below) {
            (Some(_), Some(_)) => return Err(QueryError::ConflictingUpperBounds),
            (Some(v), None) => Bound::Included(v.clone()),
            (None, Some(v)) => Bound::Excluded(v.clone()),
            (None, None) => Bound::Unbounded,
        };
        Ok((lower, upper))
    }
}

/// Which values of a field to enumerate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSpec {
    pub range: KeyRange,
    /// Regular expression a value must contain a match for.
    pub pattern: Option<String>,
    /// Values outside this set are skipped.
    pub values: Option<BTreeSet<Vec<u8>>>,
}

impl ValueSpec {
    #[must_use]
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
///
/// Returns `None` when no such string exists (the prefix is all `0xff`).
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut successor = prefix.to_vec();
    while let Some(last) = successor.pop() {
        if last < u8::MAX {
            successor.push(last + 1);
            return Some(successor);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let range = KeyRange::all().above("b").to("m");
        assert_eq!(
            range.bounds().expect("valid"),
            (Bound::Excluded(b"b".to_vec()), Bound::Included(b"m".to_vec()))
        );
        assert_eq!(
            KeyRange::all().bounds().expect("valid"),
            (Bound::Unbounded, Bound::Unbounded)
        );
    }

    #[test]
    fn test_conflicting_bounds() {
        assert!(matches!(
            KeyRange::all().from("a").above("a").bounds(),
            Err(QueryError::ConflictingLowerBounds)
        ));
        assert!(matches!(
            KeyRange::all().to("z").below("z").bounds(),
            Err(QueryError::ConflictingUpperBounds)
        ));
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[b'a', 0xff]), Some(b"b".to_vec()));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(b""), None);
    }
}
