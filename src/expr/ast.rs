//! Expression AST
//!
//! A query expression is a tree of predicates combined by conjunction,
//! disjunction, and negation. Each predicate relates two operands - an
//! extractor (what to pull from an event) or a constant - through a
//! relational operator.
//!
//! `Display` reprints an expression in the exact surface syntax the
//! parser accepts, so `parse ∘ print` is the identity.

use crate::value::{Offset, Value, ValueKind};
use std::fmt;

/// Relational operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// Left is an element (or address) contained in the right.
    In,
    /// Left contains the right: the commuted form of `in`.
    NotIn,
    /// Left matches the right-hand pattern.
    Match,
    NotMatch,
}

impl RelOp {
    /// The operator that preserves meaning when the operands swap sides.
    /// Match operators are direction-sensitive and cannot commute.
    pub fn flipped(self) -> Option<Self> {
        Some(match self {
            Self::Equal => Self::Equal,
            Self::NotEqual => Self::NotEqual,
            Self::Less => Self::Greater,
            Self::LessEqual => Self::GreaterEqual,
            Self::Greater => Self::Less,
            Self::GreaterEqual => Self::LessEqual,
            Self::In => Self::NotIn,
            Self::NotIn => Self::In,
            Self::Match | Self::NotMatch => return None,
        })
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::In => "in",
            Self::NotIn => "ni",
            Self::Match => "~",
            Self::NotMatch => "!~",
        };
        f.write_str(s)
    }
}

/// What to pull out of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// The event's schema name.
    Name,
    /// The event's timestamp.
    Timestamp,
    /// The event's id.
    Id,
    /// A dotted path of field names, resolved against the schema.
    Key(Vec<String>),
    /// Every leaf value of a given kind.
    Type(ValueKind),
    /// A concrete path into the record.
    Offset(Offset),
    /// An `&`-prefixed attribute; the validator maps the known ones onto
    /// the name/timestamp/id extractors.
    Attribute(String),
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "&name"),
            Self::Timestamp => write!(f, "&time"),
            Self::Id => write!(f, "&id"),
            Self::Key(path) => write!(f, "{}", path.join(".")),
            Self::Type(kind) => write!(f, ":{}", kind),
            Self::Offset(offset) => write!(f, "@{}", offset),
            Self::Attribute(name) => write!(f, "&{}", name),
        }
    }
}

/// One side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Constant(Value),
    Extractor(Extractor),
}

impl Operand {
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Self::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_extractor(&self) -> Option<&Extractor> {
        match self {
            Self::Extractor(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{}", v),
            Self::Extractor(e) => write!(f, "{}", e),
        }
    }
}

/// The leaf of the expression tree: `lhs op rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub lhs: Operand,
    pub op: RelOp,
    pub rhs: Operand,
}

impl Predicate {
    pub fn new(lhs: Operand, op: RelOp, rhs: Operand) -> Self {
        Self { lhs, op, rhs }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// A boolean expression over predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Predicate(Predicate),
    Negation(Box<Expr>),
    Conjunction(Vec<Expr>),
    Disjunction(Vec<Expr>),
}

impl Expr {
    /// Visit every predicate in the tree.
    pub fn for_each_predicate<'a>(&'a self, f: &mut impl FnMut(&'a Predicate)) {
        match self {
            Self::Predicate(p) => f(p),
            Self::Negation(e) => e.for_each_predicate(f),
            Self::Conjunction(xs) | Self::Disjunction(xs) => {
                for e in xs {
                    e.for_each_predicate(f);
                }
            }
        }
    }

    /// All predicates in the tree, in syntactic order.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.for_each_predicate(&mut |p| out.push(p));
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate(p) => write!(f, "{}", p),
            Self::Negation(e) => match e.as_ref() {
                Self::Predicate(p) => write!(f, "! {}", p),
                inner => write!(f, "!({})", inner),
            },
            Self::Conjunction(xs) => {
                for (i, e) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    // Disjunctions bind looser and need parentheses.
                    match e {
                        Self::Disjunction(_) => write!(f, "({})", e)?,
                        _ => write!(f, "{}", e)?,
                    }
                }
                Ok(())
            }
            Self::Disjunction(xs) => {
                for (i, e) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(key: &str, op: RelOp, v: Value) -> Expr {
        Expr::Predicate(Predicate::new(
            Operand::Extractor(Extractor::Key(vec![key.to_string()])),
            op,
            Operand::Constant(v),
        ))
    }

    #[test]
    fn test_display_predicate() {
        let p = pred("x", RelOp::Equal, Value::Count(42));
        assert_eq!(p.to_string(), "x == 42");
    }

    #[test]
    fn test_display_nested() {
        let p1 = pred("x", RelOp::Equal, Value::Count(42));
        let p2 = pred("y", RelOp::Greater, Value::Count(7));
        let conj = Expr::Conjunction(vec![
            p1.clone(),
            Expr::Disjunction(vec![p1.clone(), p2.clone()]),
        ]);
        assert_eq!(conj.to_string(), "x == 42 && (x == 42 || y > 7)");

        let neg = Expr::Negation(Box::new(Expr::Disjunction(vec![p1.clone(), p2])));
        assert_eq!(neg.to_string(), "!(x == 42 || y > 7)");
        let neg_pred = Expr::Negation(Box::new(p1));
        assert_eq!(neg_pred.to_string(), "! x == 42");
    }

    #[test]
    fn test_flipped() {
        assert_eq!(RelOp::Less.flipped(), Some(RelOp::Greater));
        assert_eq!(RelOp::In.flipped(), Some(RelOp::NotIn));
        assert_eq!(RelOp::Equal.flipped(), Some(RelOp::Equal));
        assert_eq!(RelOp::Match.flipped(), None);
    }

    #[test]
    fn test_predicates_collects_leaves() {
        let p1 = pred("x", RelOp::Equal, Value::Count(1));
        let p2 = pred("y", RelOp::Equal, Value::Count(2));
        let e = Expr::Conjunction(vec![p1, Expr::Negation(Box::new(p2))]);
        assert_eq!(e.predicates().len(), 2);
    }
}
