//! Expression Parser
//!
//! Parses query expressions into the AST.
//!
//! # Supported Syntax
//!
//! ```text
//! expr      ::= conj ('||' conj)*
//! conj      ::= unary ('&&' unary)*
//! unary     ::= '!' unary | '(' expr ')' | predicate
//! predicate ::= operand op operand
//! op        ::= '==' '!=' '<' '<=' '>' '>=' 'in' 'ni' '~' '!~'
//! operand   ::= constant | extractor
//! ```
//!
//! Extractors: dotted keys (`x.y.z`), type extractors (`:port`),
//! attributes (`&time`), and offsets (`@0,1`). Constants: counts (`42`),
//! signed ints (`-42`, `+42`), reals (`-4.8`), booleans (`T`/`F`),
//! strings (`"foo"`), addresses, subnets (`10.0.0.0/8`), ports
//! (`53/udp`), durations (`500ms`), timestamps (`2009-11-18+09:53:15`,
//! `now`), sets (`{21, 42}`), and vectors (`[1, 2]`).

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, map_opt, map_res, not, opt, peek, recognize, value},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use crate::expr::ast::{Expr, Extractor, Operand, Predicate, RelOp};
use crate::expr::error::{ExprError, ExprResult};
use crate::value::{Offset, Port, Protocol, Subnet, Value, ValueKind};
use std::net::IpAddr;

/// Parse an expression string into a raw (unnormalized) AST.
pub fn parse_expr(input: &str) -> ExprResult<Expr> {
    let input = input.trim();
    match expression(input) {
        Ok((remaining, expr)) => {
            if remaining.trim().is_empty() {
                Ok(expr)
            } else {
                Err(ExprError::Syntax(format!(
                    "unexpected input after expression: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(ExprError::Syntax(format!("{:?}", e))),
    }
}

fn expression(input: &str) -> IResult<&str, Expr> {
    let (input, mut terms) = separated_list1(
        delimited(multispace0, tag("||"), multispace0),
        conjunction,
    )(input)?;
    let expr = if terms.len() == 1 {
        terms.remove(0)
    } else {
        Expr::Disjunction(terms)
    };
    Ok((input, expr))
}

fn conjunction(input: &str) -> IResult<&str, Expr> {
    let (input, mut terms) =
        separated_list1(delimited(multispace0, tag("&&"), multispace0), unary)(input)?;
    let expr = if terms.len() == 1 {
        terms.remove(0)
    } else {
        Expr::Conjunction(terms)
    };
    Ok((input, expr))
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((negation, group, map(predicate, Expr::Predicate)))(input)
}

fn negation(input: &str) -> IResult<&str, Expr> {
    // `!` here is prefix negation; `!=` and `!~` only occur after an
    // operand and never reach this parser.
    let (input, _) = terminated(char('!'), peek(not(alt((char('='), char('~'))))))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, inner) = unary(input)?;
    Ok((input, Expr::Negation(Box::new(inner))))
}

fn group(input: &str) -> IResult<&str, Expr> {
    delimited(
        pair(char('('), multispace0),
        expression,
        pair(multispace0, char(')')),
    )(input)
}

/// Parse a single predicate.
pub fn predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, lhs) = operand(input)?;
    let (input, op) = delimited(multispace0, rel_op, multispace0)(input)?;
    let (input, rhs) = operand(input)?;
    Ok((input, Predicate::new(lhs, op, rhs)))
}

fn rel_op(input: &str) -> IResult<&str, RelOp> {
    alt((
        value(RelOp::Equal, tag("==")),
        value(RelOp::NotEqual, tag("!=")),
        value(RelOp::LessEqual, tag("<=")),
        value(RelOp::GreaterEqual, tag(">=")),
        value(RelOp::Less, tag("<")),
        value(RelOp::Greater, tag(">")),
        value(RelOp::NotMatch, tag("!~")),
        value(RelOp::Match, tag("~")),
        value(RelOp::NotIn, word("ni")),
        value(RelOp::In, word("in")),
    ))(input)
}

/// A keyword that must not continue as an identifier.
fn word(w: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input| {
        terminated(
            tag(w),
            peek(not(satisfy(|c: char| c.is_alphanumeric() || c == '_'))),
        )(input)
    }
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(constant, Operand::Constant),
        map(extractor, Operand::Extractor),
    ))(input)
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

fn extractor(input: &str) -> IResult<&str, Extractor> {
    alt((
        type_extractor,
        attribute_extractor,
        offset_extractor,
        key_extractor,
    ))(input)
}

fn type_extractor(input: &str) -> IResult<&str, Extractor> {
    let (input, _) = char(':')(input)?;
    let (input, name) = identifier(input)?;
    match ValueKind::from_name(name) {
        Some(kind) => Ok((input, Extractor::Type(kind))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::MapOpt,
        ))),
    }
}

fn attribute_extractor(input: &str) -> IResult<&str, Extractor> {
    let (input, _) = char('&')(input)?;
    let (input, name) = identifier(input)?;
    Ok((input, Extractor::Attribute(name.to_string())))
}

fn offset_extractor(input: &str) -> IResult<&str, Extractor> {
    let (input, _) = char('@')(input)?;
    map_res(
        recognize(separated_list1(char(','), digit1)),
        |s: &str| s.parse::<Offset>().map(Extractor::Offset),
    )(input)
}

fn key_extractor(input: &str) -> IResult<&str, Extractor> {
    map(
        separated_list1(char('.'), identifier),
        |parts: Vec<&str>| Extractor::Key(parts.into_iter().map(String::from).collect()),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

fn constant(input: &str) -> IResult<&str, Value> {
    alt((
        set_literal,
        vector_literal,
        string_literal,
        timestamp_literal,
        subnet_literal,
        address_literal,
        port_literal,
        duration_literal,
        real_literal,
        int_literal,
        count_literal,
        bool_literal,
        now_literal,
    ))(input)
}

fn set_literal(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            pair(char('{'), multispace0),
            separated_list0(delimited(multispace0, char(','), multispace0), constant),
            pair(multispace0, char('}')),
        ),
        Value::set,
    )(input)
}

fn vector_literal(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            pair(char('['), multispace0),
            separated_list0(delimited(multispace0, char(','), multispace0), constant),
            pair(multispace0, char(']')),
        ),
        Value::Vector,
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, Value> {
    let (input, _) = char('"')(input)?;
    let mut out = String::new();
    let mut chars = input.char_indices();
    loop {
        match chars.next() {
            Some((end, '"')) => {
                return Ok((&input[end + 1..], Value::String(out)));
            }
            Some((_, '\\')) => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                _ => {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Escaped,
                    )))
                }
            },
            Some((_, c)) => out.push(c),
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
}

/// `2009-11-18+09:53:15` or just the date part.
fn timestamp_literal(input: &str) -> IResult<&str, Value> {
    use chrono::{NaiveDate, NaiveDateTime};
    map_res(
        recognize(tuple((
            digit1,
            char('-'),
            digit1,
            char('-'),
            digit1,
            opt(tuple((
                char('+'),
                digit1,
                char(':'),
                digit1,
                char(':'),
                digit1,
            ))),
        ))),
        |s: &str| -> Result<Value, ()> {
            let dt = if s.contains('+') {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d+%H:%M:%S").map_err(|_| ())?
            } else {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|_| ())?
                    .and_hms_opt(0, 0, 0)
                    .ok_or(())?
            };
            let ns = dt.and_utc().timestamp_nanos_opt().ok_or(())?;
            Ok(Value::Timestamp(ns))
        },
    )(input)
}

fn now_literal(input: &str) -> IResult<&str, Value> {
    map(word("now"), |_| {
        let ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        Value::Timestamp(ns)
    })(input)
}

fn address_chars(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.')(input)
}

fn address_literal(input: &str) -> IResult<&str, Value> {
    map_res(address_chars, |s: &str| {
        s.parse::<IpAddr>().map(Value::Address)
    })(input)
}

fn subnet_literal(input: &str) -> IResult<&str, Value> {
    map_res(
        tuple((address_chars, char('/'), digit1)),
        |(addr, _, len): (&str, char, &str)| -> Result<Value, ()> {
            let addr = addr.parse::<IpAddr>().map_err(|_| ())?;
            let len = len.parse::<u8>().map_err(|_| ())?;
            Ok(Value::Subnet(Subnet::new(addr, len)))
        },
    )(input)
}

fn port_literal(input: &str) -> IResult<&str, Value> {
    map_opt(
        tuple((
            digit1,
            char('/'),
            alt((tag("tcp"), tag("udp"), tag("icmp"), tag("?"))),
        )),
        |(number, _, proto): (&str, char, &str)| {
            let number = number.parse::<u16>().ok()?;
            let proto = Protocol::from_str(proto)?;
            Some(Value::Port(Port::new(number, proto)))
        },
    )(input)
}

fn duration_literal(input: &str) -> IResult<&str, Value> {
    map_opt(
        tuple((
            opt(char('-')),
            digit1,
            alt((
                value(1i64, word("ns")),
                value(1_000, word("us")),
                value(1_000_000, word("ms")),
                value(60_000_000_000, word("min")),
                value(1_000_000_000, word("s")),
                value(3_600_000_000_000, word("h")),
            )),
        )),
        |(sign, digits, scale): (Option<char>, &str, i64)| {
            let magnitude = digits.parse::<i64>().ok()?.checked_mul(scale)?;
            Some(Value::Duration(if sign.is_some() {
                -magnitude
            } else {
                magnitude
            }))
        },
    )(input)
}

fn real_literal(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(tuple((
            opt(alt((char('-'), char('+')))),
            digit1,
            char('.'),
            digit1,
        ))),
        |s: &str| s.parse::<f64>().map(Value::Real),
    )(input)
}

/// Explicitly signed integers parse as `int`.
fn int_literal(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(tuple((alt((char('-'), char('+'))), digit1))),
        |s: &str| {
            let s = s.strip_prefix('+').unwrap_or(s);
            s.parse::<i64>().map(Value::Int)
        },
    )(input)
}

/// Unsigned integers parse as `count`.
fn count_literal(input: &str) -> IResult<&str, Value> {
    map_res(digit1, |s: &str| s.parse::<u64>().map(Value::Count))(input)
}

fn bool_literal(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), word("T")),
        value(Value::Bool(false), word("F")),
    ))(input)
}
