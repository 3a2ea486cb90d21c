//! Type Tree
//!
//! A [`Type`] describes a value's shape: leaves mirror the leaf variants
//! of [`Value`](super::Value), containers carry their inner type(s), and
//! record types carry an ordered sequence of named, typed fields. Two
//! types compare equal structurally.
//!
//! The [`Schema`] registry maps event names to their record types and
//! resolves key paths (`"conn.id.orig_h"`) to offsets.

use super::{Offset, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Int,
    Count,
    Real,
    Duration,
    Timestamp,
    String,
    Address,
    Subnet,
    Port,
    Vector(Box<Type>),
    Set(Box<Type>),
    Table(Box<Type>, Box<Type>),
    Record(Vec<(String, Type)>),
}

impl Type {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool => ValueKind::Bool,
            Self::Int => ValueKind::Int,
            Self::Count => ValueKind::Count,
            Self::Real => ValueKind::Real,
            Self::Duration => ValueKind::Duration,
            Self::Timestamp => ValueKind::Timestamp,
            Self::String => ValueKind::String,
            Self::Address => ValueKind::Address,
            Self::Subnet => ValueKind::Subnet,
            Self::Port => ValueKind::Port,
            Self::Vector(_) => ValueKind::Vector,
            Self::Set(_) => ValueKind::Set,
            Self::Table(_, _) => ValueKind::Table,
            Self::Record(_) => ValueKind::Record,
        }
    }

    pub fn record(fields: Vec<(&str, Type)>) -> Self {
        Self::Record(
            fields
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        )
    }

    pub fn as_record(&self) -> Option<&[(String, Type)]> {
        match self {
            Self::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Resolve a dotted key path against this record type.
    ///
    /// Matching starts at any field: `["id", "orig_h"]` matches a field
    /// `id` whose record type has a field `orig_h`. Returns the offset of
    /// the resolved leaf together with its type.
    pub fn resolve_key(&self, path: &[String]) -> Option<(Offset, &Type)> {
        let fields = self.as_record()?;
        if path.is_empty() {
            return None;
        }
        for (i, (name, ty)) in fields.iter().enumerate() {
            if name == &path[0] {
                if path.len() == 1 {
                    return Some((Offset::new(vec![i as u32]), ty));
                }
                if let Some((inner, leaf)) = ty.resolve_key(&path[1..]) {
                    let mut full = vec![i as u32];
                    full.extend_from_slice(inner.components());
                    return Some((Offset::new(full), leaf));
                }
            }
            // A nested record may also begin the path.
            if let Type::Record(_) = ty {
                if let Some((inner, leaf)) = ty.resolve_key(path) {
                    let mut full = vec![i as u32];
                    full.extend_from_slice(inner.components());
                    return Some((Offset::new(full), leaf));
                }
            }
        }
        None
    }

    /// Whether `value` structurally conforms to this type.
    pub fn check(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::None) => true,
            (Self::Record(fields), Value::Record(vals)) => {
                fields.len() == vals.len()
                    && fields.iter().zip(vals).all(|((_, ty), v)| ty.check(v))
            }
            (Self::Vector(inner), Value::Vector(vals)) | (Self::Set(inner), Value::Set(vals)) => {
                vals.iter().all(|v| inner.check(v))
            }
            (Self::Table(k, v), Value::Table(pairs)) => {
                pairs.iter().all(|(pk, pv)| k.check(pk) && v.check(pv))
            }
            _ => self.kind() == value.kind(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector(inner) => write!(f, "vector[{}]", inner),
            Self::Set(inner) => write!(f, "set[{}]", inner),
            Self::Table(k, v) => write!(f, "table[{}, {}]", k, v),
            Self::Record(fields) => {
                write!(f, "record{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, "}}")
            }
            leaf => write!(f, "{}", leaf.kind()),
        }
    }
}

/// Registry of known event types, keyed by interned schema name
/// (e.g. `"bro::conn"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    types: BTreeMap<String, Type>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; a missing file is an empty schema.
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save to a JSON file, creating parent directories as needed.
    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Register a record type under an event name. Replaces any previous
    /// registration with the same name.
    pub fn register(&mut self, name: impl Into<String>, ty: Type) {
        self.types.insert(name.into(), ty);
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.types.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Resolve a key path against every registered type. Returns one
    /// (event name, offset, leaf type) triple per type containing the
    /// path.
    pub fn resolve_key(&self, path: &[String]) -> Vec<(&str, Offset, &Type)> {
        self.types
            .iter()
            .filter_map(|(name, ty)| {
                ty.resolve_key(path)
                    .map(|(off, leaf)| (name.as_str(), off, leaf))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_type() -> Type {
        Type::record(vec![
            ("ts", Type::Timestamp),
            (
                "id",
                Type::record(vec![
                    ("orig_h", Type::Address),
                    ("orig_p", Type::Port),
                    ("resp_h", Type::Address),
                    ("resp_p", Type::Port),
                ]),
            ),
            ("proto", Type::String),
            ("duration", Type::Duration),
        ])
    }

    #[test]
    fn test_resolve_direct_field() {
        let ty = conn_type();
        let (off, leaf) = ty.resolve_key(&["proto".to_string()]).unwrap();
        assert_eq!(off.to_string(), "2");
        assert_eq!(*leaf, Type::String);
    }

    #[test]
    fn test_resolve_nested_path() {
        let ty = conn_type();
        let path = vec!["id".to_string(), "resp_h".to_string()];
        let (off, leaf) = ty.resolve_key(&path).unwrap();
        assert_eq!(off.to_string(), "1,2");
        assert_eq!(*leaf, Type::Address);
    }

    #[test]
    fn test_resolve_skips_into_nested_records() {
        // A path that names a field of a nested record without naming the
        // record itself still resolves.
        let ty = conn_type();
        let (off, leaf) = ty.resolve_key(&["orig_p".to_string()]).unwrap();
        assert_eq!(off.to_string(), "1,1");
        assert_eq!(*leaf, Type::Port);
    }

    #[test]
    fn test_resolve_unknown_path() {
        let ty = conn_type();
        assert!(ty.resolve_key(&["nope".to_string()]).is_none());
        assert!(ty.resolve_key(&[]).is_none());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(conn_type(), conn_type());
        assert_ne!(conn_type(), Type::record(vec![("ts", Type::Timestamp)]));
    }

    #[test]
    fn test_check() {
        let ty = Type::record(vec![("n", Type::Count), ("s", Type::String)]);
        let ok = Value::Record(vec![Value::Count(1), Value::String("x".into())]);
        let bad = Value::Record(vec![Value::String("x".into()), Value::Count(1)]);
        assert!(ty.check(&ok));
        assert!(!ty.check(&bad));
        // None conforms anywhere.
        let sparse = Value::Record(vec![Value::None, Value::String("x".into())]);
        assert!(ty.check(&sparse));
    }

    #[test]
    fn test_schema_resolution() {
        let mut schema = Schema::new();
        schema.register("bro::conn", conn_type());
        schema.register("bro::dns", Type::record(vec![("query", Type::String)]));

        let hits = schema.resolve_key(&["id".to_string(), "orig_h".to_string()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "bro::conn");
        assert_eq!(hits[0].1.to_string(), "1,0");
    }
}
