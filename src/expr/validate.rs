//! Expression Normalization & Validation
//!
//! Normalization puts an AST into the canonical form the index layers
//! rely on:
//!
//! 1. At most one side of a predicate is a constant; if one is, it sits
//!    on the right, with the operator flipped to preserve meaning.
//! 2. `!=` stays `!=` (the bitmap layer implements it directly).
//! 3. Attribute extractors collapse onto the name/timestamp/id
//!    extractors; unknown attributes are rejected.
//! 4. Singleton conjunctions/disjunctions collapse to their child; empty
//!    ones are illegal.
//!
//! Validation then checks predicate typing: membership needs a container,
//! subnet, or string on the right; match operators need string patterns;
//! type extractors need a constant of a compatible kind.
//!
//! Resolution substitutes key extractors with offset extractors using the
//! schema, producing one predicate per event type that carries the keyed
//! fields (OR-ed together when several do).

use crate::expr::ast::{Expr, Extractor, Operand, Predicate, RelOp};
use crate::expr::error::{ExprError, ExprResult};
use crate::value::{Schema, Type, Value, ValueKind};

/// Apply the normalization rules. Idempotent.
pub fn normalize(expr: Expr) -> ExprResult<Expr> {
    match expr {
        Expr::Predicate(p) => normalize_predicate(p).map(Expr::Predicate),
        Expr::Negation(e) => Ok(Expr::Negation(Box::new(normalize(*e)?))),
        Expr::Conjunction(xs) => normalize_combinator(xs, true),
        Expr::Disjunction(xs) => normalize_combinator(xs, false),
    }
}

fn normalize_combinator(xs: Vec<Expr>, conjunction: bool) -> ExprResult<Expr> {
    if xs.is_empty() {
        return Err(ExprError::Semantic(if conjunction {
            "empty conjunction".into()
        } else {
            "empty disjunction".into()
        }));
    }
    let mut normalized = xs
        .into_iter()
        .map(normalize)
        .collect::<ExprResult<Vec<_>>>()?;
    if normalized.len() == 1 {
        return Ok(normalized.remove(0));
    }
    Ok(if conjunction {
        Expr::Conjunction(normalized)
    } else {
        Expr::Disjunction(normalized)
    })
}

fn normalize_predicate(p: Predicate) -> ExprResult<Predicate> {
    let lhs = normalize_operand(p.lhs)?;
    let rhs = normalize_operand(p.rhs)?;
    // Constants always move to the right-hand side.
    if lhs.as_constant().is_some() && rhs.as_extractor().is_some() {
        let op = p.op.flipped().ok_or_else(|| {
            ExprError::Semantic(format!(
                "operator '{}' cannot take a constant left-hand side",
                p.op
            ))
        })?;
        return Ok(Predicate::new(rhs, op, lhs));
    }
    Ok(Predicate::new(lhs, p.op, rhs))
}

fn normalize_operand(operand: Operand) -> ExprResult<Operand> {
    let Operand::Extractor(Extractor::Attribute(name)) = &operand else {
        return Ok(operand);
    };
    let extractor = match name.as_str() {
        "name" | "type" => Extractor::Name,
        "time" | "timestamp" => Extractor::Timestamp,
        "id" => Extractor::Id,
        other => {
            return Err(ExprError::Semantic(format!("unknown attribute: &{}", other)));
        }
    };
    Ok(Operand::Extractor(extractor))
}

/// Check predicate typing on a normalized AST.
pub fn validate(expr: &Expr) -> ExprResult<()> {
    match expr {
        Expr::Predicate(p) => validate_predicate(p),
        Expr::Negation(e) => validate(e),
        Expr::Conjunction(xs) | Expr::Disjunction(xs) => {
            if xs.is_empty() {
                return Err(ExprError::Semantic("empty combinator".into()));
            }
            xs.iter().try_for_each(validate)
        }
    }
}

fn validate_predicate(p: &Predicate) -> ExprResult<()> {
    if let Some(v) = p.rhs.as_constant() {
        match p.op {
            RelOp::In | RelOp::NotIn => {
                if !matches!(
                    v.kind(),
                    ValueKind::Set | ValueKind::Vector | ValueKind::Subnet | ValueKind::String
                ) {
                    return Err(ExprError::Semantic(format!(
                        "'{}' requires a container, subnet, or string on the right, got {}",
                        p.op,
                        v.kind()
                    )));
                }
            }
            RelOp::Match | RelOp::NotMatch => {
                if v.kind() != ValueKind::String {
                    return Err(ExprError::Semantic(format!(
                        "'{}' requires a string pattern, got {}",
                        p.op,
                        v.kind()
                    )));
                }
            }
            _ => {}
        }
    }

    for side in [&p.lhs, &p.rhs] {
        if let Some(Extractor::Type(kind)) = side.as_extractor() {
            let Some(v) = other_side(p, side).as_constant() else {
                return Err(ExprError::Semantic(
                    "a type extractor requires a constant operand".into(),
                ));
            };
            if !type_compatible(*kind, v, p.op) {
                return Err(ExprError::Semantic(format!(
                    "type extractor :{} cannot be compared to {}",
                    kind,
                    v.kind()
                )));
            }
        }
    }

    // Meta extractors carry a fixed type.
    if let Some(extractor) = p.lhs.as_extractor() {
        if let Some(v) = p.rhs.as_constant() {
            let want = match extractor {
                Extractor::Name => Some(ValueKind::String),
                Extractor::Timestamp => Some(ValueKind::Timestamp),
                Extractor::Id => Some(ValueKind::Count),
                _ => None,
            };
            if let Some(want) = want {
                let ok = match p.op {
                    RelOp::In | RelOp::NotIn => container_of(v, want),
                    _ => v.kind() == want,
                };
                if !ok {
                    return Err(ExprError::Semantic(format!(
                        "{} compares to {}, got {}",
                        extractor,
                        want,
                        v.kind()
                    )));
                }
            }
        }
    }

    Ok(())
}

fn other_side<'a>(p: &'a Predicate, side: &Operand) -> &'a Operand {
    if std::ptr::eq(side, &p.lhs) {
        &p.rhs
    } else {
        &p.lhs
    }
}

fn numeric(kind: ValueKind) -> bool {
    matches!(kind, ValueKind::Int | ValueKind::Count | ValueKind::Real)
}

fn container_of(v: &Value, want: ValueKind) -> bool {
    match v {
        Value::Set(xs) | Value::Vector(xs) => xs.iter().all(|e| e.kind() == want),
        _ => false,
    }
}

fn type_compatible(kind: ValueKind, v: &Value, op: RelOp) -> bool {
    if v.kind() == kind {
        return true;
    }
    if numeric(kind) && numeric(v.kind()) {
        return true;
    }
    match op {
        RelOp::In | RelOp::NotIn => {
            (kind == ValueKind::Address && v.kind() == ValueKind::Subnet)
                || match v {
                    Value::Set(xs) | Value::Vector(xs) => xs
                        .iter()
                        .all(|e| e.kind() == kind || (numeric(kind) && numeric(e.kind()))),
                    _ => false,
                }
        }
        _ => false,
    }
}

/// Substitute key extractors with offset extractors using the schema.
///
/// Every predicate containing keys is resolved once per event type that
/// carries all of its keys; multiple resolutions OR together. A key no
/// registered type carries is a semantic error.
pub fn resolve(expr: Expr, schema: &Schema) -> ExprResult<Expr> {
    match expr {
        Expr::Predicate(p) => resolve_predicate(p, schema),
        Expr::Negation(e) => Ok(Expr::Negation(Box::new(resolve(*e, schema)?))),
        Expr::Conjunction(xs) => Ok(Expr::Conjunction(
            xs.into_iter()
                .map(|e| resolve(e, schema))
                .collect::<ExprResult<Vec<_>>>()?,
        )),
        Expr::Disjunction(xs) => Ok(Expr::Disjunction(
            xs.into_iter()
                .map(|e| resolve(e, schema))
                .collect::<ExprResult<Vec<_>>>()?,
        )),
    }
}

fn resolve_predicate(p: Predicate, schema: &Schema) -> ExprResult<Expr> {
    let has_key = |o: &Operand| matches!(o.as_extractor(), Some(Extractor::Key(_)));
    if !has_key(&p.lhs) && !has_key(&p.rhs) {
        return Ok(Expr::Predicate(p));
    }

    let mut variants: Vec<Expr> = Vec::new();
    for (_, ty) in schema.iter() {
        let (Some(lhs), Some(rhs)) = (
            resolve_operand(&p.lhs, ty),
            resolve_operand(&p.rhs, ty),
        ) else {
            continue;
        };
        let candidate = Expr::Predicate(Predicate::new(lhs, p.op, rhs));
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }

    match variants.len() {
        0 => Err(ExprError::Semantic(format!("unresolvable key in '{}'", p))),
        1 => Ok(variants.remove(0)),
        _ => Ok(Expr::Disjunction(variants)),
    }
}

fn resolve_operand(operand: &Operand, ty: &Type) -> Option<Operand> {
    match operand {
        Operand::Extractor(Extractor::Key(path)) => {
            let (offset, _) = ty.resolve_key(path)?;
            Some(Operand::Extractor(Extractor::Offset(offset)))
        }
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse_expr;

    fn normalized(input: &str) -> Expr {
        normalize(parse_expr(input).unwrap()).unwrap()
    }

    #[test]
    fn test_constant_moves_right() {
        let expr = normalized("42 == x");
        match expr {
            Expr::Predicate(p) => {
                assert!(p.lhs.as_extractor().is_some());
                assert_eq!(p.op, RelOp::Equal);
                assert_eq!(*p.rhs.as_constant().unwrap(), Value::Count(42));
            }
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_flip_commutes_operator() {
        let expr = normalized("10.0.0.0/8 ni :addr");
        match expr {
            Expr::Predicate(p) => {
                assert_eq!(
                    *p.lhs.as_extractor().unwrap(),
                    Extractor::Type(ValueKind::Address)
                );
                assert_eq!(p.op, RelOp::In);
                assert_eq!(p.rhs.as_constant().unwrap().kind(), ValueKind::Subnet);
            }
            other => panic!("expected predicate, got {:?}", other),
        }

        let expr = normalized("42 < x");
        match expr {
            Expr::Predicate(p) => assert_eq!(p.op, RelOp::Greater),
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_not_equal_is_preserved() {
        let expr = normalized("x != 42");
        match expr {
            Expr::Predicate(p) => assert_eq!(p.op, RelOp::NotEqual),
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_attributes_collapse() {
        let expr = normalized("&type != \"foo\"");
        match expr {
            Expr::Predicate(p) => {
                assert_eq!(*p.lhs.as_extractor().unwrap(), Extractor::Name)
            }
            other => panic!("expected predicate, got {:?}", other),
        }

        let err = normalize(parse_expr("&bogus == 1").unwrap()).unwrap_err();
        assert!(matches!(err, ExprError::Semantic(_)));
    }

    #[test]
    fn test_empty_combinators_illegal() {
        assert!(matches!(
            normalize(Expr::Conjunction(vec![])),
            Err(ExprError::Semantic(_))
        ));
        assert!(matches!(
            normalize(Expr::Disjunction(vec![])),
            Err(ExprError::Semantic(_))
        ));
    }

    #[test]
    fn test_singleton_combinators_collapse() {
        let inner = parse_expr("x == 42").unwrap();
        let wrapped = Expr::Conjunction(vec![Expr::Disjunction(vec![inner.clone()])]);
        assert_eq!(normalize(wrapped).unwrap(), inner);
    }

    #[test]
    fn test_normalization_idempotent() {
        for input in [
            "42 == x",
            "x != 42 && 10.0.0.0/8 ni :addr",
            "!(a == 1 || 2 < b)",
            "&time > 2009-11-18+09:53:15",
        ] {
            let once = normalized(input);
            let twice = normalize(once.clone()).unwrap();
            assert_eq!(once, twice, "normalization not idempotent for {}", input);
            assert!(validate(&once).is_ok(), "validation failed for {}", input);
        }
    }

    #[test]
    fn test_validate_membership_rhs() {
        assert!(validate(&normalized("x in {1, 2}")).is_ok());
        assert!(validate(&normalized("x in \"substring\"")).is_ok());
        assert!(validate(&normalized(":addr in 10.0.0.0/8")).is_ok());
        let err = validate(&normalized("x in 42")).unwrap_err();
        assert!(matches!(err, ExprError::Semantic(_)));
    }

    #[test]
    fn test_validate_type_extractor_compatibility() {
        assert!(validate(&normalized(":port == 53/udp")).is_ok());
        assert!(validate(&normalized(":real >= -4.8")).is_ok());
        // Numeric kinds coerce between each other.
        assert!(validate(&normalized(":count > -1")).is_ok());
        let err = validate(&normalized(":port == \"dns\"")).unwrap_err();
        assert!(matches!(err, ExprError::Semantic(_)));
        let err = validate(&normalized(":addr == 42")).unwrap_err();
        assert!(matches!(err, ExprError::Semantic(_)));
    }

    #[test]
    fn test_validate_meta_extractors() {
        assert!(validate(&normalized("&name == \"bro::conn\"")).is_ok());
        assert!(validate(&normalized("&time < now")).is_ok());
        let err = validate(&normalized("&name == 42")).unwrap_err();
        assert!(matches!(err, ExprError::Semantic(_)));
    }

    #[test]
    fn test_resolve_keys_to_offsets() {
        let mut schema = Schema::new();
        schema.register(
            "bro::conn",
            Type::record(vec![
                ("ts", Type::Timestamp),
                (
                    "id",
                    Type::record(vec![("orig_h", Type::Address), ("resp_h", Type::Address)]),
                ),
            ]),
        );

        let expr = resolve(normalized("id.resp_h == 10.0.0.1"), &schema).unwrap();
        match expr {
            Expr::Predicate(p) => {
                assert_eq!(
                    *p.lhs.as_extractor().unwrap(),
                    Extractor::Offset("1,1".parse().unwrap())
                );
            }
            other => panic!("expected predicate, got {:?}", other),
        }

        let err = resolve(normalized("nonexistent == 1"), &schema).unwrap_err();
        assert!(matches!(err, ExprError::Semantic(_)));
    }

    #[test]
    fn test_resolve_across_multiple_types() {
        let mut schema = Schema::new();
        schema.register("a", Type::record(vec![("n", Type::Count)]));
        schema.register(
            "b",
            Type::record(vec![("s", Type::String), ("n", Type::Count)]),
        );

        let expr = resolve(normalized("n == 7"), &schema).unwrap();
        match expr {
            Expr::Disjunction(xs) => assert_eq!(xs.len(), 2),
            other => panic!("expected disjunction, got {:?}", other),
        }
    }
}
