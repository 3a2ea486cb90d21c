//! Offset - a path to a leaf value inside a nested record
//!
//! An offset is a finite sequence of field indexes; descending into a
//! nested record appends a component. Offsets order lexicographically and
//! serialize as the comma-joined path (`"0,3,1"`), which is also how they
//! appear in index file names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Offset(Vec<u32>);

impl Offset {
    pub fn new(path: impl Into<Vec<u32>>) -> Self {
        Self(path.into())
    }

    pub fn root() -> Self {
        Self(vec![0])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Descend into a nested record: append a zero-level component.
    pub fn push(&mut self, component: u32) {
        self.0.push(component);
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    /// Advance to the next sibling field.
    pub fn bump(&mut self) {
        if let Some(last) = self.0.last_mut() {
            *last += 1;
        }
    }
}

impl From<Vec<u32>> for Offset {
    fn from(path: Vec<u32>) -> Self {
        Self(path)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Error parsing an offset string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid offset: {0}")]
pub struct ParseOffsetError(pub String);

impl FromStr for Offset {
    type Err = ParseOffsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseOffsetError(s.to_string()));
        }
        s.split(',')
            .map(|c| c.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Offset)
            .map_err(|_| ParseOffsetError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let o = Offset::new(vec![0, 3, 1]);
        assert_eq!(o.to_string(), "0,3,1");
        assert_eq!("0,3,1".parse::<Offset>().unwrap(), o);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Offset>().is_err());
        assert!("1,,2".parse::<Offset>().is_err());
        assert!("a,b".parse::<Offset>().is_err());
        assert!("-1".parse::<Offset>().is_err());
    }

    #[test]
    fn test_lexicographic_order() {
        let a = Offset::new(vec![0]);
        let b = Offset::new(vec![0, 0]);
        let c = Offset::new(vec![0, 1]);
        let d = Offset::new(vec![1]);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn test_walk_helpers() {
        let mut o = Offset::root();
        o.bump();
        assert_eq!(o.to_string(), "1");
        o.push(0);
        assert_eq!(o.to_string(), "1,0");
        o.bump();
        o.pop();
        assert_eq!(o.to_string(), "1");
    }
}
