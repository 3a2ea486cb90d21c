//! Event Model
//!
//! An event is `(id, name, timestamp, data)`: a unique unsigned 64-bit
//! key, an interned schema name (e.g. `"bro::conn"`), a nanosecond
//! instant, and a typed record of values.
//!
//! Event id 0 is reserved as "no event"; every bitmap index keeps
//! position 0 pre-filled with `false`.

use crate::value::{Offset, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Reserved id meaning "no event".
pub const INVALID_ID: u64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event key. Never 0 for a real event.
    pub id: u64,
    /// Interned schema name.
    pub name: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// The event's record.
    pub data: Vec<Value>,
}

impl Event {
    pub fn new(id: u64, name: impl Into<String>, timestamp: i64, data: Vec<Value>) -> Self {
        Self {
            id,
            name: name.into(),
            timestamp,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Navigate the record along an offset. Only record containers are
    /// descended; an offset pointing through a vector/set/table resolves
    /// to nothing.
    pub fn at(&self, offset: &Offset) -> Option<&Value> {
        let mut components = offset.components().iter();
        let first = *components.next()? as usize;
        let mut current = self.data.get(first)?;
        for &c in components {
            match current {
                Value::Record(fields) => current = fields.get(c as usize)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Depth-first iteration over the record's leaves, in the same field
    /// order the data index walks: nested records are descended, other
    /// containers are treated as leaves of their own kind.
    pub fn leaves(&self) -> Vec<(Offset, &Value)> {
        let mut out = Vec::new();
        collect_leaves(&self.data, &mut Vec::new(), &mut out);
        out
    }

    /// All leaf values of a given kind, for type-extractor evaluation.
    pub fn leaves_of_kind(&self, kind: ValueKind) -> Vec<&Value> {
        self.leaves()
            .into_iter()
            .filter(|(_, v)| v.kind() == kind)
            .map(|(_, v)| v)
            .collect()
    }
}

fn collect_leaves<'a>(
    record: &'a [Value],
    path: &mut Vec<u32>,
    out: &mut Vec<(Offset, &'a Value)>,
) {
    for (i, value) in record.iter().enumerate() {
        path.push(i as u32);
        match value {
            Value::Record(inner) => collect_leaves(inner, path, out),
            v => out.push((Offset::new(path.clone()), v)),
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::new(
            7,
            "bro::conn",
            1_000_000_000,
            vec![
                Value::Count(42),
                Value::Record(vec![
                    Value::String("ok".into()),
                    Value::Record(vec![Value::Bool(true)]),
                ]),
                Value::Vector(vec![Value::Count(1), Value::Count(2)]),
            ],
        )
    }

    #[test]
    fn test_offset_navigation() {
        let e = sample();
        assert_eq!(e.at(&"0".parse().unwrap()), Some(&Value::Count(42)));
        assert_eq!(
            e.at(&"1,0".parse().unwrap()),
            Some(&Value::String("ok".into()))
        );
        assert_eq!(e.at(&"1,1,0".parse().unwrap()), Some(&Value::Bool(true)));
        assert!(e.at(&"3".parse().unwrap()).is_none());
        // Offsets do not descend into vectors.
        assert!(e.at(&"2,0".parse().unwrap()).is_none());
    }

    #[test]
    fn test_leaf_walk_order() {
        let e = sample();
        let offsets: Vec<String> = e
            .leaves()
            .into_iter()
            .map(|(o, _)| o.to_string())
            .collect();
        assert_eq!(offsets, vec!["0", "1,0", "1,1,0", "2"]);
    }

    #[test]
    fn test_leaves_of_kind() {
        let e = sample();
        assert_eq!(e.leaves_of_kind(ValueKind::Count), vec![&Value::Count(42)]);
        assert_eq!(e.leaves_of_kind(ValueKind::Bool), vec![&Value::Bool(true)]);
        assert!(e.leaves_of_kind(ValueKind::Address).is_empty());
    }
}
