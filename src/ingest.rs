//! Log Ingest
//!
//! Reader for tab-separated Bro-style logs:
//!
//! ```text
//! #separator \x09
//! #path      conn
//! #fields    ts              id.orig_h   id.orig_p  proto
//! #types     time            addr        port       enum
//! 1258594163.566694  192.168.1.103  68  udp
//! ```
//!
//! Dotted field names reconstruct nested records (`id.orig_h` and
//! `id.orig_p` become fields of a nested `id` record), `-` marks an
//! unset field, booleans are `T`/`F`, times and intervals are float
//! seconds, and set/vector cells separate elements with `,`.
//!
//! The reader yields the record [`Type`] (registered under
//! `bro::<path>`) and the parsed [`Event`]s with ids assigned from a
//! caller-provided start.

use crate::event::Event;
use crate::value::{Port, Protocol, Subnet, Type, Value};
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing #{0} header")]
    MissingHeader(&'static str),

    #[error("#fields and #types disagree: {fields} names, {types} types")]
    HeaderMismatch { fields: usize, types: usize },

    #[error("unknown type name '{0}'")]
    UnknownType(String),

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

pub type IngestResult<T> = Result<T, IngestError>;

/// One parsed log: its event name, record type, and events.
#[derive(Debug)]
pub struct BroLog {
    pub name: String,
    pub record_type: Type,
    pub events: Vec<Event>,
}

/// Read a complete log, assigning event ids from `first_id` upward.
/// Rows that fail to parse are skipped with a warning, matching the
/// tolerance of the other line-oriented importers.
pub fn read_log(reader: impl BufRead, first_id: u64) -> IngestResult<BroLog> {
    let mut path: Option<String> = None;
    let mut fields: Option<Vec<String>> = None;
    let mut types: Option<Vec<LeafType>> = None;
    let mut events = Vec::new();
    let mut next_id = first_id.max(1);

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            let mut parts = rest.split('\t');
            match parts.next() {
                Some("path") => path = parts.next().map(str::to_string),
                Some("fields") => fields = Some(parts.map(str::to_string).collect()),
                Some("types") => {
                    types = Some(
                        parts
                            .map(LeafType::parse)
                            .collect::<IngestResult<Vec<_>>>()?,
                    )
                }
                // #separator, #open, #close, #unset_field, ...
                _ => {}
            }
            continue;
        }

        let fields = fields.as_ref().ok_or(IngestError::MissingHeader("fields"))?;
        let types = types.as_ref().ok_or(IngestError::MissingHeader("types"))?;
        if fields.len() != types.len() {
            return Err(IngestError::HeaderMismatch {
                fields: fields.len(),
                types: types.len(),
            });
        }

        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() != types.len() {
            tracing::warn!(line = lineno + 1, "skipping row with wrong column count");
            continue;
        }
        match parse_row(types, &cells, lineno + 1) {
            Ok(columns) => {
                let name = format!("bro::{}", path.as_deref().unwrap_or("log"));
                let timestamp = event_timestamp(types, &columns);
                let data = nest(fields, &columns);
                events.push(Event::new(next_id, name, timestamp, data));
                next_id += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed row");
            }
        }
    }

    let path = path.ok_or(IngestError::MissingHeader("path"))?;
    let fields = fields.ok_or(IngestError::MissingHeader("fields"))?;
    let types = types.ok_or(IngestError::MissingHeader("types"))?;
    let record_type = nest_types(&fields, &types);

    Ok(BroLog {
        name: format!("bro::{}", path),
        record_type,
        events,
    })
}

pub fn read_log_file(path: &Path, first_id: u64) -> IngestResult<BroLog> {
    let file = std::fs::File::open(path)?;
    read_log(std::io::BufReader::new(file), first_id)
}

/// The first `time` column is the event timestamp.
fn event_timestamp(types: &[LeafType], columns: &[Value]) -> i64 {
    types
        .iter()
        .zip(columns)
        .find_map(|(ty, v)| match (ty, v) {
            (LeafType::Time, Value::Timestamp(ns)) => Some(*ns),
            _ => None,
        })
        .unwrap_or(0)
}

fn parse_row(types: &[LeafType], cells: &[&str], line: usize) -> IngestResult<Vec<Value>> {
    types
        .iter()
        .zip(cells)
        .map(|(ty, cell)| {
            ty.parse_value(cell).map_err(|message| IngestError::Malformed {
                line,
                message,
            })
        })
        .collect()
}

/// Fold flat dotted columns into nested records. Consecutive fields
/// sharing a dotted prefix become one record-typed field.
fn nest(names: &[String], columns: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < names.len() {
        match names[i].split_once('.') {
            None => {
                out.push(columns[i].clone());
                i += 1;
            }
            Some((prefix, _)) => {
                let run = prefix_run(names, i, prefix);
                let inner_names = strip_prefix(&names[i..run]);
                out.push(Value::Record(nest(&inner_names, &columns[i..run])));
                i = run;
            }
        }
    }
    out
}

fn nest_types(names: &[String], types: &[LeafType]) -> Type {
    let mut fields = Vec::new();
    let mut i = 0;
    while i < names.len() {
        match names[i].split_once('.') {
            None => {
                fields.push((names[i].clone(), types[i].to_type()));
                i += 1;
            }
            Some((prefix, _)) => {
                let run = prefix_run(names, i, prefix);
                let inner_names = strip_prefix(&names[i..run]);
                fields.push((prefix.to_string(), nest_types(&inner_names, &types[i..run])));
                i = run;
            }
        }
    }
    Type::Record(fields)
}

fn strip_prefix(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| {
            n.split_once('.')
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_default()
        })
        .collect()
}

fn prefix_run(names: &[String], start: usize, prefix: &str) -> usize {
    let mut end = start;
    while end < names.len()
        && names[end]
            .split_once('.')
            .map(|(p, _)| p == prefix)
            .unwrap_or(false)
    {
        end += 1;
    }
    end
}

/// The column types a Bro log can declare.
#[derive(Debug, Clone, PartialEq)]
enum LeafType {
    Bool,
    Int,
    Count,
    Real,
    Time,
    Interval,
    String,
    Addr,
    Subnet,
    Port,
    Set(Box<LeafType>),
    Vector(Box<LeafType>),
}

impl LeafType {
    fn parse(name: &str) -> IngestResult<Self> {
        if let Some(inner) = name.strip_prefix("set[").and_then(|s| s.strip_suffix(']')) {
            return Ok(Self::Set(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = name
            .strip_prefix("vector[")
            .and_then(|s| s.strip_suffix(']'))
        {
            return Ok(Self::Vector(Box::new(Self::parse(inner)?)));
        }
        // table[T] in the writer's output degenerates to a set.
        if let Some(inner) = name.strip_prefix("table[").and_then(|s| s.strip_suffix(']')) {
            return Ok(Self::Set(Box::new(Self::parse(inner)?)));
        }
        Ok(match name {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "count" => Self::Count,
            "double" => Self::Real,
            "time" => Self::Time,
            "interval" => Self::Interval,
            "string" | "enum" => Self::String,
            "addr" => Self::Addr,
            "subnet" => Self::Subnet,
            "port" => Self::Port,
            other => return Err(IngestError::UnknownType(other.to_string())),
        })
    }

    fn to_type(&self) -> Type {
        match self {
            Self::Bool => Type::Bool,
            Self::Int => Type::Int,
            Self::Count => Type::Count,
            Self::Real => Type::Real,
            Self::Time => Type::Timestamp,
            Self::Interval => Type::Duration,
            Self::String => Type::String,
            Self::Addr => Type::Address,
            Self::Subnet => Type::Subnet,
            Self::Port => Type::Port,
            Self::Set(inner) => Type::Set(Box::new(inner.to_type())),
            Self::Vector(inner) => Type::Vector(Box::new(inner.to_type())),
        }
    }

    fn parse_value(&self, cell: &str) -> Result<Value, String> {
        if cell == "-" {
            return Ok(Value::None);
        }
        match self {
            Self::Bool => match cell {
                "T" => Ok(Value::Bool(true)),
                "F" => Ok(Value::Bool(false)),
                other => Err(format!("invalid bool '{}'", other)),
            },
            Self::Int => cell
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| e.to_string()),
            Self::Count => cell
                .parse::<u64>()
                .map(Value::Count)
                .map_err(|e| e.to_string()),
            Self::Real => cell
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|e| e.to_string()),
            Self::Time => float_seconds(cell).map(Value::Timestamp),
            Self::Interval => float_seconds(cell).map(Value::Duration),
            Self::String => Ok(Value::String(unescape(cell))),
            Self::Addr => cell
                .parse::<IpAddr>()
                .map(Value::Address)
                .map_err(|e| e.to_string()),
            Self::Subnet => {
                let (addr, len) = cell
                    .split_once('/')
                    .ok_or_else(|| format!("invalid subnet '{}'", cell))?;
                let addr = addr.parse::<IpAddr>().map_err(|e| e.to_string())?;
                let len = len.parse::<u8>().map_err(|e| e.to_string())?;
                Ok(Value::Subnet(Subnet::new(addr, len)))
            }
            Self::Port => cell
                .parse::<u16>()
                .map(|n| Value::Port(Port::new(n, Protocol::Unknown)))
                .map_err(|e| e.to_string()),
            Self::Set(inner) => {
                if cell == "(empty)" {
                    return Ok(Value::set(Vec::new()));
                }
                cell.split(',')
                    .map(|c| inner.parse_value(c))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::set)
            }
            Self::Vector(inner) => {
                if cell == "(empty)" {
                    return Ok(Value::Vector(Vec::new()));
                }
                cell.split(',')
                    .map(|c| inner.parse_value(c))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Vector)
            }
        }
    }
}

/// Parse `1258594163.566694` float seconds into exact nanoseconds.
fn float_seconds(cell: &str) -> Result<i64, String> {
    let (secs, frac) = match cell.split_once('.') {
        Some((s, f)) => (s, f),
        None => (cell, ""),
    };
    let negative = secs.starts_with('-');
    let secs: i64 = secs.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    let mut frac_ns: i64 = 0;
    if !frac.is_empty() {
        let padded = format!("{:0<9}", frac);
        if padded.len() > 9 {
            return Err(format!("sub-nanosecond precision in '{}'", cell));
        }
        frac_ns = padded.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    }
    let magnitude = secs
        .abs()
        .checked_mul(1_000_000_000)
        .and_then(|ns| ns.checked_add(frac_ns))
        .ok_or_else(|| format!("time out of range '{}'", cell))?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Undo `\xNN` escapes the log writer emits for non-printable bytes.
fn unescape(cell: &str) -> String {
    let mut out = String::with_capacity(cell.len());
    let mut chars = cell.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'x') {
            chars.next();
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let (Some(h), Some(l)) = (hi.to_digit(16), lo.to_digit(16)) {
                    out.push(((h * 16 + l) as u8) as char);
                    continue;
                }
            }
            out.push('\\');
            out.push('x');
            if let Some(hi) = hi {
                out.push(hi);
            }
            if let Some(lo) = lo {
                out.push(lo);
            }
        } else {
            out.push(c);
        }
    }
    out
}
