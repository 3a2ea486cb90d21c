//! Direct AST Evaluation
//!
//! Evaluates a compiled expression against a single event. This is the
//! ground truth the bitmap layer approximates: the exporter revalidates
//! every candidate the indexes hand back, and falls back to evaluating
//! full chunks when a query has no index support at all.

use crate::event::Event;
use crate::expr::{Expr, Extractor, Operand, Predicate, RelOp};
use crate::value::Value;
use std::cmp::Ordering;

/// Evaluate an expression against one event, short-circuiting through
/// the boolean combinators.
pub fn evaluate(expr: &Expr, event: &Event) -> bool {
    match expr {
        Expr::Predicate(p) => eval_predicate(p, event),
        Expr::Negation(inner) => !evaluate(inner, event),
        Expr::Conjunction(xs) => xs.iter().all(|e| evaluate(e, event)),
        Expr::Disjunction(xs) => xs.iter().any(|e| evaluate(e, event)),
    }
}

/// A predicate holds if any pair of extracted values satisfies the
/// operator. An extractor that resolves to nothing - a field absent from
/// the event, an unresolved key - yields `false`.
fn eval_predicate(p: &Predicate, event: &Event) -> bool {
    let lhs = operand_values(&p.lhs, event);
    let rhs = operand_values(&p.rhs, event);
    lhs.iter()
        .any(|l| rhs.iter().any(|r| apply(p.op, l, r)))
}

fn operand_values(operand: &Operand, event: &Event) -> Vec<Value> {
    match operand {
        Operand::Constant(v) => vec![v.clone()],
        Operand::Extractor(extractor) => match extractor {
            Extractor::Name => vec![Value::String(event.name.clone())],
            Extractor::Timestamp => vec![Value::Timestamp(event.timestamp)],
            Extractor::Id => vec![Value::Count(event.id)],
            Extractor::Offset(offset) => event
                .at(offset)
                .filter(|v| !v.is_none())
                .cloned()
                .into_iter()
                .collect(),
            Extractor::Type(kind) => event
                .leaves_of_kind(*kind)
                .into_iter()
                .cloned()
                .collect(),
            // Keys resolve to offsets before evaluation; one that did
            // not is simply absent.
            Extractor::Key(_) | Extractor::Attribute(_) => Vec::new(),
        },
    }
}

/// Apply a relational operator to two values.
pub fn apply(op: RelOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        RelOp::Equal => value_eq(lhs, rhs),
        RelOp::NotEqual => !value_eq(lhs, rhs),
        RelOp::Less => matches!(compare(lhs, rhs), Some(Ordering::Less)),
        RelOp::LessEqual => {
            matches!(compare(lhs, rhs), Some(Ordering::Less | Ordering::Equal))
        }
        RelOp::Greater => matches!(compare(lhs, rhs), Some(Ordering::Greater)),
        RelOp::GreaterEqual => {
            matches!(compare(lhs, rhs), Some(Ordering::Greater | Ordering::Equal))
        }
        RelOp::In => contains(rhs, lhs),
        RelOp::NotIn => contains(lhs, rhs),
        RelOp::Match => matches_pattern(lhs, rhs),
        RelOp::NotMatch => !matches_pattern(lhs, rhs),
    }
}

/// Equality with numeric promotion across int/count/real.
fn value_eq(a: &Value, b: &Value) -> bool {
    if a.kind() == b.kind() {
        return a == b;
    }
    matches!(compare(a, b), Some(Ordering::Equal))
}

/// Ordering across comparable kinds. Same-kind values use the total
/// order; mixed numeric kinds compare exactly through i128 where both
/// are integral, through f64 otherwise. Everything else is incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.kind() == b.kind() {
        return match a {
            // Containers have a total order for canonicalization, but
            // relational comparison over them is not meaningful.
            Value::Record(_) | Value::Vector(_) | Value::Set(_) | Value::Table(_) => None,
            Value::None => None,
            _ => Some(a.total_cmp(b)),
        };
    }
    match (integral(a), integral(b)) {
        (Some(x), Some(y)) => return Some(x.cmp(&y)),
        _ => {}
    }
    match (fractional(a), fractional(b)) {
        (Some(x), Some(y)) => Some(x.total_cmp(&y)),
        _ => None,
    }
}

fn integral(v: &Value) -> Option<i128> {
    match v {
        Value::Int(i) => Some(*i as i128),
        Value::Count(c) => Some(*c as i128),
        _ => None,
    }
}

fn fractional(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Count(c) => Some(*c as f64),
        Value::Real(r) => Some(*r),
        _ => None,
    }
}

/// `element in container` membership.
fn contains(container: &Value, element: &Value) -> bool {
    match container {
        Value::Set(xs) | Value::Vector(xs) => xs.iter().any(|x| value_eq(x, element)),
        Value::Subnet(s) => element
            .as_address()
            .map(|a| s.contains(a))
            .unwrap_or(false),
        Value::String(haystack) => element
            .as_str()
            .map(|needle| haystack.contains(needle))
            .unwrap_or(false),
        Value::Table(pairs) => pairs.iter().any(|(k, _)| value_eq(k, element)),
        _ => false,
    }
}

/// `value ~ pattern`: substring containment on strings.
fn matches_pattern(value: &Value, pattern: &Value) -> bool {
    match (value.as_str(), pattern.as_str()) {
        (Some(haystack), Some(needle)) => haystack.contains(needle),
        _ => false,
    }
}
