//! Bitmap Indexes
//!
//! A bitmap index maps the values of one typed column to bitstreams keyed
//! by event id. Four strategies cover the leaf value kinds:
//!
//! - **equality**: one bitstream per distinct value (bools, strings).
//! - **arithmetic**: binary decomposition into 64 bit-slices over an
//!   order-preserving key (ints, counts, reals, durations, timestamps;
//!   time values bucket to seconds first).
//! - **address**: 128 bit-slices over the IPv6 bit pattern, IPv4 mapped
//!   into the last 32 bits; subnet membership masks the leading prefix.
//! - **port**: 16 bit-slices for the number plus 2 for the protocol.
//!
//! Every strategy additionally keeps a validity mask (bit set iff a value
//! was pushed at that id) so complement lookups never claim events that
//! lack the field. Unsupported `(op, value)` pairs return `None`; the
//! query layer treats that as "fall back to scanning".

use super::bitstream::Bitstream;
use crate::expr::RelOp;
use crate::value::{to_mapped, Subnet, Value, ValueKind};
use std::collections::BTreeMap;

/// Errors surfaced by index mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitmapError {
    #[error("value kind {got} does not match index kind {want}")]
    KindMismatch { want: ValueKind, got: ValueKind },

    #[error("event id {id} is not past the current index size {size}")]
    OutOfOrder { id: u64, size: u64 },
}

const SIGN: u64 = 1 << 63;

/// Order-preserving key for a signed quantity.
fn int_key(i: i64) -> u64 {
    (i as u64) ^ SIGN
}

/// Order-preserving key for a float, consistent with `total_cmp`.
fn real_key(r: f64) -> u64 {
    let bits = r.to_bits();
    if bits & SIGN != 0 {
        !bits
    } else {
        bits | SIGN
    }
}

/// Decompose a bit-sliced comparison against `key` into the strictly-less
/// and exactly-equal sets. Slices are LSB-first; `valid` bounds both
/// results to ids that actually carry a value.
fn sliced_compare<B: Bitstream>(slices: &[B], len: u64, valid: &B, key: u64) -> (B, B) {
    let mut less = B::new().padded(len);
    let mut eq = valid.clone();
    for i in (0..slices.len()).rev() {
        let slice = slices[i].padded(len);
        if key & (1u64 << i) != 0 {
            less = less.or(&eq.and(&slice.not()));
            eq = eq.and(&slice);
        } else {
            eq = eq.and(&slice.not());
        }
    }
    (less, eq)
}

fn ordered_lookup<B: Bitstream>(op: RelOp, less: B, eq: B, valid: &B) -> Option<B> {
    match op {
        RelOp::Equal => Some(eq),
        RelOp::NotEqual => Some(valid.and(&eq.not())),
        RelOp::Less => Some(less),
        RelOp::LessEqual => Some(less.or(&eq)),
        RelOp::Greater => Some(valid.and(&less.or(&eq).not())),
        RelOp::GreaterEqual => Some(valid.and(&less.not())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Equality strategy
// ---------------------------------------------------------------------------

/// One bitstream per distinct value. `BTreeMap` keeps saves deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualityIndex<B> {
    kind: ValueKind,
    streams: BTreeMap<Value, B>,
    mask: B,
    len: u64,
    checkpoint: u64,
}

impl<B: Bitstream> EqualityIndex<B> {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            streams: BTreeMap::new(),
            mask: B::new(),
            len: 0,
            checkpoint: 0,
        }
    }

    fn eq_stream(&self, v: &Value) -> B {
        self.streams
            .get(v)
            .map(|s| s.padded(self.len))
            .unwrap_or_else(|| B::new().padded(self.len))
    }

    fn push(&mut self, v: &Value, id: u64) {
        let stream = self.streams.entry(v.clone()).or_insert_with(B::new);
        stream.pad_to(id);
        stream.push(true);
    }

    fn lookup(&self, op: RelOp, v: &Value) -> Option<B> {
        let valid = self.mask.padded(self.len);
        match op {
            RelOp::Equal if v.kind() == self.kind => Some(self.eq_stream(v)),
            RelOp::NotEqual if v.kind() == self.kind => {
                Some(valid.and(&self.eq_stream(v).not()))
            }
            RelOp::In | RelOp::NotIn => {
                let elems = match v {
                    Value::Set(xs) | Value::Vector(xs) => xs,
                    _ => return None,
                };
                let mut hits = B::new().padded(self.len);
                for e in elems {
                    if e.kind() == self.kind {
                        hits = hits.or(&self.eq_stream(e));
                    }
                }
                if op == RelOp::In {
                    Some(hits)
                } else {
                    Some(valid.and(&hits.not()))
                }
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic strategy
// ---------------------------------------------------------------------------

/// Binary-decomposed index: one bitstream per bit of an order-preserving
/// 64-bit key. Time values are bucketed by `granularity` nanoseconds
/// before decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticIndex<B> {
    kind: ValueKind,
    granularity: i64,
    slices: Vec<B>,
    mask: B,
    len: u64,
    checkpoint: u64,
}

impl<B: Bitstream> ArithmeticIndex<B> {
    pub fn new(kind: ValueKind, granularity: i64) -> Self {
        Self {
            kind,
            granularity: granularity.max(1),
            slices: (0..64).map(|_| B::new()).collect(),
            mask: B::new(),
            len: 0,
            checkpoint: 0,
        }
    }

    /// Map a value to its decomposition key. Constants of a different but
    /// losslessly coercible numeric kind are accepted so that e.g. a
    /// count literal can probe an int column.
    fn key_of(&self, v: &Value) -> Option<u64> {
        let bucket = |ns: i64| int_key(ns.div_euclid(self.granularity));
        match (self.kind, v) {
            (ValueKind::Int, Value::Int(i)) => Some(int_key(*i)),
            (ValueKind::Int, Value::Count(c)) if *c <= i64::MAX as u64 => {
                Some(int_key(*c as i64))
            }
            (ValueKind::Count, Value::Count(c)) => Some(*c),
            (ValueKind::Count, Value::Int(i)) if *i >= 0 => Some(*i as u64),
            (ValueKind::Real, Value::Real(r)) => Some(real_key(*r)),
            (ValueKind::Real, Value::Count(c)) => Some(real_key(*c as f64)),
            (ValueKind::Real, Value::Int(i)) => Some(real_key(*i as f64)),
            (ValueKind::Duration, Value::Duration(d)) => Some(bucket(*d)),
            (ValueKind::Timestamp, Value::Timestamp(t)) => Some(bucket(*t)),
            _ => None,
        }
    }

    fn push(&mut self, key: u64, id: u64) {
        for (i, slice) in self.slices.iter_mut().enumerate() {
            if key & (1u64 << i) != 0 {
                slice.pad_to(id);
                slice.push(true);
            }
        }
    }

    fn lookup(&self, op: RelOp, v: &Value) -> Option<B> {
        let valid = self.mask.padded(self.len);
        match op {
            RelOp::In | RelOp::NotIn => {
                let elems = match v {
                    Value::Set(xs) | Value::Vector(xs) => xs,
                    _ => return None,
                };
                let mut hits = B::new().padded(self.len);
                for e in elems {
                    if let Some(key) = self.key_of(e) {
                        let (_, eq) = sliced_compare(&self.slices, self.len, &valid, key);
                        hits = hits.or(&eq);
                    }
                }
                if op == RelOp::In {
                    Some(hits)
                } else {
                    Some(valid.and(&hits.not()))
                }
            }
            _ => {
                let key = self.key_of(v)?;
                let (less, eq) = sliced_compare(&self.slices, self.len, &valid, key);
                ordered_lookup(op, less, eq, &valid)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Address strategy
// ---------------------------------------------------------------------------

/// 128-bit bitslice over the v6-mapped address space. Slice `i` holds bit
/// `i` counted from the most significant bit, so a prefix of length `k`
/// covers slices `0..k`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressIndex<B> {
    slices: Vec<B>,
    mask: B,
    len: u64,
    checkpoint: u64,
}

fn address_bits(v: std::net::IpAddr) -> u128 {
    u128::from_be_bytes(to_mapped(v).octets())
}

impl<B: Bitstream> AddressIndex<B> {
    pub fn new() -> Self {
        Self {
            slices: (0..128).map(|_| B::new()).collect(),
            mask: B::new(),
            len: 0,
            checkpoint: 0,
        }
    }

    fn push(&mut self, bits: u128, id: u64) {
        for (i, slice) in self.slices.iter_mut().enumerate() {
            if bits & (1u128 << (127 - i)) != 0 {
                slice.pad_to(id);
                slice.push(true);
            }
        }
    }

    /// Ids whose leading `k` address bits equal those of `bits`.
    fn prefix_eq(&self, bits: u128, k: u8, valid: &B) -> B {
        let mut result = valid.clone();
        for i in 0..k as usize {
            let slice = self.slices[i].padded(self.len);
            if bits & (1u128 << (127 - i)) != 0 {
                result = result.and(&slice);
            } else {
                result = result.and(&slice.not());
            }
        }
        result
    }

    fn lookup(&self, op: RelOp, v: &Value) -> Option<B> {
        let valid = self.mask.padded(self.len);
        match (op, v) {
            (RelOp::Equal, Value::Address(a)) => {
                Some(self.prefix_eq(address_bits(*a), 128, &valid))
            }
            (RelOp::NotEqual, Value::Address(a)) => {
                let eq = self.prefix_eq(address_bits(*a), 128, &valid);
                Some(valid.and(&eq.not()))
            }
            (RelOp::In, Value::Subnet(s)) => Some(self.subnet_members(s, &valid)),
            (RelOp::NotIn, Value::Subnet(s)) => {
                let members = self.subnet_members(s, &valid);
                Some(valid.and(&members.not()))
            }
            (RelOp::In | RelOp::NotIn, Value::Set(xs) | Value::Vector(xs)) => {
                let mut hits = B::new().padded(self.len);
                for e in xs {
                    if let Value::Address(a) = e {
                        hits = hits.or(&self.prefix_eq(address_bits(*a), 128, &valid));
                    }
                }
                if op == RelOp::In {
                    Some(hits)
                } else {
                    Some(valid.and(&hits.not()))
                }
            }
            _ => None,
        }
    }

    fn subnet_members(&self, s: &Subnet, valid: &B) -> B {
        self.prefix_eq(address_bits(s.network()), s.mapped_length(), valid)
    }
}

// ---------------------------------------------------------------------------
// Port strategy
// ---------------------------------------------------------------------------

/// 16 bit-slices for the port number plus 2 for the protocol code.
/// Ordering operators compare the number only; equality also pins the
/// protocol unless it is `unknown`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortIndex<B> {
    number: Vec<B>,
    proto: Vec<B>,
    mask: B,
    len: u64,
    checkpoint: u64,
}

impl<B: Bitstream> PortIndex<B> {
    pub fn new() -> Self {
        Self {
            number: (0..16).map(|_| B::new()).collect(),
            proto: (0..2).map(|_| B::new()).collect(),
            mask: B::new(),
            len: 0,
            checkpoint: 0,
        }
    }

    fn push(&mut self, port: &crate::value::Port, id: u64) {
        let number = port.number as u64;
        for (i, slice) in self.number.iter_mut().enumerate() {
            if number & (1u64 << i) != 0 {
                slice.pad_to(id);
                slice.push(true);
            }
        }
        let code = port.proto.code() as u64;
        for (i, slice) in self.proto.iter_mut().enumerate() {
            if code & (1u64 << i) != 0 {
                slice.pad_to(id);
                slice.push(true);
            }
        }
    }

    fn eq_port(&self, port: &crate::value::Port, valid: &B) -> B {
        let (_, mut eq) = sliced_compare(&self.number, self.len, valid, port.number as u64);
        if port.proto != crate::value::Protocol::Unknown {
            let (_, proto_eq) =
                sliced_compare(&self.proto, self.len, valid, port.proto.code() as u64);
            eq = eq.and(&proto_eq);
        }
        eq
    }

    fn lookup(&self, op: RelOp, v: &Value) -> Option<B> {
        let valid = self.mask.padded(self.len);
        match (op, v) {
            (RelOp::Equal, Value::Port(p)) => Some(self.eq_port(p, &valid)),
            (RelOp::NotEqual, Value::Port(p)) => {
                Some(valid.and(&self.eq_port(p, &valid).not()))
            }
            (
                RelOp::Less | RelOp::LessEqual | RelOp::Greater | RelOp::GreaterEqual,
                Value::Port(p),
            ) => {
                let (less, eq) = sliced_compare(&self.number, self.len, &valid, p.number as u64);
                ordered_lookup(op, less, eq, &valid)
            }
            (RelOp::In | RelOp::NotIn, Value::Set(xs) | Value::Vector(xs)) => {
                let mut hits = B::new().padded(self.len);
                for e in xs {
                    if let Value::Port(p) = e {
                        hits = hits.or(&self.eq_port(p, &valid));
                    }
                }
                if op == RelOp::In {
                    Some(hits)
                } else {
                    Some(valid.and(&hits.not()))
                }
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Unified index
// ---------------------------------------------------------------------------

/// Nanoseconds per second: the decomposition granularity for time values.
pub const TIME_GRANULARITY: i64 = 1_000_000_000;

/// A bitmap index of one of the four strategies, with the common surface
/// the event indexes operate through.
#[derive(Debug, Clone, PartialEq)]
pub enum BitmapIndex<B> {
    Equality(EqualityIndex<B>),
    Arithmetic(ArithmeticIndex<B>),
    Address(AddressIndex<B>),
    Port(PortIndex<B>),
}

impl<B: Bitstream> BitmapIndex<B> {
    /// Construct the strategy appropriate for a value kind. `None` for
    /// kinds that are not indexable (containers, subnets, absent values).
    pub fn for_kind(kind: ValueKind) -> Option<Self> {
        Some(match kind {
            ValueKind::Bool | ValueKind::String => {
                Self::Equality(EqualityIndex::new(kind))
            }
            ValueKind::Int | ValueKind::Count | ValueKind::Real => {
                Self::Arithmetic(ArithmeticIndex::new(kind, 1))
            }
            ValueKind::Duration | ValueKind::Timestamp => {
                Self::Arithmetic(ArithmeticIndex::new(kind, TIME_GRANULARITY))
            }
            ValueKind::Address => Self::Address(AddressIndex::new()),
            ValueKind::Port => Self::Port(PortIndex::new()),
            _ => return None,
        })
    }

    /// The value kind this index accepts.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Equality(i) => i.kind,
            Self::Arithmetic(i) => i.kind,
            Self::Address(_) => ValueKind::Address,
            Self::Port(_) => ValueKind::Port,
        }
    }

    /// Strategy discriminant used in persisted blobs.
    pub fn strategy(&self) -> u8 {
        match self {
            Self::Equality(_) => 0,
            Self::Arithmetic(_) => 1,
            Self::Address(_) => 2,
            Self::Port(_) => 3,
        }
    }

    /// Number of bits (the id frontier) in this index.
    pub fn size(&self) -> u64 {
        match self {
            Self::Equality(i) => i.len,
            Self::Arithmetic(i) => i.len,
            Self::Address(i) => i.len,
            Self::Port(i) => i.len,
        }
    }

    /// Bits added since the last checkpoint.
    pub fn appended(&self) -> u64 {
        let (len, cp) = match self {
            Self::Equality(i) => (i.len, i.checkpoint),
            Self::Arithmetic(i) => (i.len, i.checkpoint),
            Self::Address(i) => (i.len, i.checkpoint),
            Self::Port(i) => (i.len, i.checkpoint),
        };
        len - cp
    }

    /// Mark the current size as persisted.
    pub fn checkpoint(&mut self) {
        match self {
            Self::Equality(i) => i.checkpoint = i.len,
            Self::Arithmetic(i) => i.checkpoint = i.len,
            Self::Address(i) => i.checkpoint = i.len,
            Self::Port(i) => i.checkpoint = i.len,
        }
    }

    /// Whether any value was ever pushed.
    pub fn is_empty(&self) -> bool {
        let mask = match self {
            Self::Equality(i) => &i.mask,
            Self::Arithmetic(i) => &i.mask,
            Self::Address(i) => &i.mask,
            Self::Port(i) => &i.mask,
        };
        mask.count_ones() == 0
    }

    /// Bulk append to align with an id range. A `false` fill widens the
    /// frontier without marking any id valid; a `true` fill additionally
    /// sets the validity mask over the appended range.
    pub fn append(&mut self, n: u64, bit: bool) {
        fn grow<B: Bitstream>(len: &mut u64, mask: &mut B, n: u64, bit: bool) {
            if bit {
                mask.pad_to(*len);
                mask.append(n, true);
            }
            *len += n;
        }
        match self {
            Self::Equality(i) => grow(&mut i.len, &mut i.mask, n, bit),
            Self::Arithmetic(i) => grow(&mut i.len, &mut i.mask, n, bit),
            Self::Address(i) => grow(&mut i.len, &mut i.mask, n, bit),
            Self::Port(i) => grow(&mut i.len, &mut i.mask, n, bit),
        }
    }

    /// Set the bit at `id` in the bitstream(s) associated with `value`.
    /// Any gap since the previous id pads with `false`.
    pub fn push_back(&mut self, value: &Value, id: u64) -> Result<(), BitmapError> {
        let size = self.size();
        if id < size {
            return Err(BitmapError::OutOfOrder { id, size });
        }
        match self {
            Self::Equality(i) => {
                if value.kind() != i.kind {
                    return Err(BitmapError::KindMismatch {
                        want: i.kind,
                        got: value.kind(),
                    });
                }
                i.push(value, id);
                i.mask.pad_to(id);
                i.mask.push(true);
                i.len = id + 1;
            }
            Self::Arithmetic(i) => {
                if value.kind() != i.kind {
                    return Err(BitmapError::KindMismatch {
                        want: i.kind,
                        got: value.kind(),
                    });
                }
                let key = i.key_of(value).ok_or(BitmapError::KindMismatch {
                    want: i.kind,
                    got: value.kind(),
                })?;
                i.push(key, id);
                i.mask.pad_to(id);
                i.mask.push(true);
                i.len = id + 1;
            }
            Self::Address(i) => {
                let addr = value.as_address().ok_or(BitmapError::KindMismatch {
                    want: ValueKind::Address,
                    got: value.kind(),
                })?;
                i.push(address_bits(addr), id);
                i.mask.pad_to(id);
                i.mask.push(true);
                i.len = id + 1;
            }
            Self::Port(i) => {
                let port = *value.as_port().ok_or(BitmapError::KindMismatch {
                    want: ValueKind::Port,
                    got: value.kind(),
                })?;
                i.push(&port, id);
                i.mask.pad_to(id);
                i.mask.push(true);
                i.len = id + 1;
            }
        }
        Ok(())
    }

    /// Evaluate a relational operator against a constant. `None` means
    /// the pair `(op, value)` is not supported by this strategy.
    pub fn lookup(&self, op: RelOp, value: &Value) -> Option<B> {
        match self {
            Self::Equality(i) => i.lookup(op, value),
            Self::Arithmetic(i) => i.lookup(op, value),
            Self::Address(i) => i.lookup(op, value),
            Self::Port(i) => i.lookup(op, value),
        }
    }

    // -- serialization ------------------------------------------------------

    /// Serialize to the archive blob form:
    /// `strategy | kind | params | bit_length | slice_count | slices...`,
    /// each slice `(set_bits: u32, repr: u8, byte_len: u32, bytes)`. The
    /// validity mask is always the final slice; equality slices carry
    /// their encoded key first.
    pub fn to_blob(&self) -> bincode::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.push(self.strategy());
        out.extend_from_slice(&(self.kind() as u16).to_le_bytes());
        match self {
            Self::Equality(i) => {
                out.extend_from_slice(&1i64.to_le_bytes());
                out.extend_from_slice(&i.len.to_le_bytes());
                out.extend_from_slice(&(i.streams.len() as u32 + 1).to_le_bytes());
                for (value, stream) in &i.streams {
                    let key = bincode::serialize(value)?;
                    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    out.extend_from_slice(&key);
                    write_slice(&mut out, stream);
                }
                out.extend_from_slice(&0u32.to_le_bytes());
                write_slice(&mut out, &i.mask);
            }
            Self::Arithmetic(i) => {
                out.extend_from_slice(&i.granularity.to_le_bytes());
                out.extend_from_slice(&i.len.to_le_bytes());
                write_positional(&mut out, &i.slices, &i.mask);
            }
            Self::Address(i) => {
                out.extend_from_slice(&1i64.to_le_bytes());
                out.extend_from_slice(&i.len.to_le_bytes());
                write_positional(&mut out, &i.slices, &i.mask);
            }
            Self::Port(i) => {
                out.extend_from_slice(&1i64.to_le_bytes());
                out.extend_from_slice(&i.len.to_le_bytes());
                let all: Vec<B> = i.number.iter().chain(i.proto.iter()).cloned().collect();
                write_positional(&mut out, &all, &i.mask);
            }
        }
        Ok(out)
    }

    /// Inverse of [`to_blob`](Self::to_blob). `None` on malformed input.
    /// The checkpoint of the restored index equals its size, so
    /// `appended()` starts at zero.
    pub fn from_blob(bytes: &[u8]) -> Option<Self> {
        let mut c = BlobCursor { bytes, pos: 0 };
        let strategy = c.u8()?;
        let kind = ValueKind::from_u16(c.u16()?)?;
        let granularity = c.i64()?;
        let len = c.u64()?;
        let slice_count = c.u32()? as usize;
        match strategy {
            0 => {
                let mut streams = BTreeMap::new();
                let mut mask = None;
                for i in 0..slice_count {
                    let key_len = c.u32()? as usize;
                    if key_len == 0 {
                        // The keyless final slice is the mask.
                        if i + 1 != slice_count {
                            return None;
                        }
                        mask = Some(read_slice(&mut c)?);
                    } else {
                        let key_bytes = c.take(key_len)?;
                        let value: Value = bincode::deserialize(key_bytes).ok()?;
                        let stream = read_slice(&mut c)?;
                        streams.insert(value, stream);
                    }
                }
                c.finished()?;
                Some(Self::Equality(EqualityIndex {
                    kind,
                    streams,
                    mask: mask?,
                    len,
                    checkpoint: len,
                }))
            }
            1 => {
                let (slices, mask) = read_positional(&mut c, slice_count, 64)?;
                c.finished()?;
                Some(Self::Arithmetic(ArithmeticIndex {
                    kind,
                    granularity,
                    slices,
                    mask,
                    len,
                    checkpoint: len,
                }))
            }
            2 => {
                let (slices, mask) = read_positional(&mut c, slice_count, 128)?;
                c.finished()?;
                Some(Self::Address(AddressIndex {
                    slices,
                    mask,
                    len,
                    checkpoint: len,
                }))
            }
            3 => {
                let (mut slices, mask) = read_positional(&mut c, slice_count, 18)?;
                c.finished()?;
                let proto = slices.split_off(16);
                Some(Self::Port(PortIndex {
                    number: slices,
                    proto,
                    mask,
                    len,
                    checkpoint: len,
                }))
            }
            _ => None,
        }
    }
}

fn write_slice<B: Bitstream>(out: &mut Vec<u8>, stream: &B) {
    let bytes = stream.to_bytes();
    out.extend_from_slice(&(stream.count_ones() as u32).to_le_bytes());
    out.push(B::REPR);
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&bytes);
}

fn write_positional<B: Bitstream>(out: &mut Vec<u8>, slices: &[B], mask: &B) {
    out.extend_from_slice(&(slices.len() as u32 + 1).to_le_bytes());
    for slice in slices {
        write_slice(out, slice);
    }
    write_slice(out, mask);
}

fn read_slice<B: Bitstream>(c: &mut BlobCursor<'_>) -> Option<B> {
    let set_bits = c.u32()? as u64;
    let repr = c.u8()?;
    if repr != B::REPR {
        return None;
    }
    let byte_len = c.u32()? as usize;
    let stream = B::from_bytes(c.take(byte_len)?)?;
    if stream.count_ones() != set_bits {
        return None;
    }
    Some(stream)
}

fn read_positional<B: Bitstream>(
    c: &mut BlobCursor<'_>,
    slice_count: usize,
    expected: usize,
) -> Option<(Vec<B>, B)> {
    if slice_count != expected + 1 {
        return None;
    }
    let mut slices = Vec::with_capacity(expected);
    for _ in 0..expected {
        slices.push(read_slice(c)?);
    }
    let mask = read_slice(c)?;
    Some((slices, mask))
}

struct BlobCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl BlobCursor<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.bytes.len() {
            return None;
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes(b.try_into().unwrap()))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn i64(&mut self) -> Option<i64> {
        self.take(8).map(|b| i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn finished(&self) -> Option<()> {
        (self.pos == self.bytes.len()).then_some(())
    }
}
