//! Expression Model
//!
//! The typed AST of query expressions, the parser producing it, and the
//! validator that normalizes and type-checks it before the index layers
//! see it.

mod ast;
mod error;
mod parser;
mod validate;

pub use ast::{Expr, Extractor, Operand, Predicate, RelOp};
pub use error::{ExprError, ExprResult};
pub use parser::parse_expr;
pub use validate::{normalize, resolve, validate};

/// Parse, normalize, and validate a query expression in one step.
pub fn parse(input: &str) -> ExprResult<Expr> {
    let ast = parse_expr(input)?;
    let ast = normalize(ast)?;
    validate(&ast)?;
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipeline() {
        let expr = parse("42 == x && 10.0.0.0/8 ni :addr").unwrap();
        // Both constants end up on the right after normalization.
        for p in expr.predicates() {
            assert!(p.lhs.as_extractor().is_some());
            assert!(p.rhs.as_constant().is_some());
        }
    }

    #[test]
    fn test_parse_pipeline_errors() {
        assert!(matches!(parse(":foo == -42"), Err(ExprError::Syntax(_))));
        assert!(matches!(
            parse(":port == \"dns\""),
            Err(ExprError::Semantic(_))
        ));
    }
}
