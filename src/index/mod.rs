//! Event Indexes
//!
//! The two persistent index trees over an event stream:
//!
//! - [`EventMetaIndex`]: per-event metadata (schema name, timestamp).
//! - [`EventDataIndex`]: per-offset typed record fields.
//!
//! Both share one lifecycle: `scan()` discovers persisted files,
//! `load(ast)` hydrates the ones a query references, `index(event)`
//! appends, `save()` archives whatever changed since the last
//! checkpoint, and `lookup(ast)` translates an AST into a bitstream of
//! matching event ids.
//!
//! [`actor`] wraps each tree in a tokio task speaking the index message
//! protocol.

pub mod actor;
pub mod codec;
mod data;
mod meta;

pub use actor::{IndexHandle, IndexMsg};
pub use data::EventDataIndex;
pub use meta::EventMetaIndex;

use crate::bitmap::{BitmapError, Bitstream};
use crate::expr::{Expr, Predicate};
use crate::value::ValueKind;
use thiserror::Error;

/// Errors from the index layer.
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O failed even after a retry.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A bitmap rejected a mutation (id order or value kind).
    #[error("bitmap error: {0}")]
    Bitmap(#[from] BitmapError),

    /// A value's runtime type diverged from the index file's type.
    #[error("type mismatch for {offset}: expected {want}, got {got}")]
    TypeMismatch {
        offset: String,
        want: ValueKind,
        got: ValueKind,
    },

    /// Bit lengths diverged after a reload; the owning actor must quit.
    #[error("index skew after reload: {0}")]
    Skew(String),
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// A lookup result: the candidate bitstream plus whether it is exact.
///
/// An inexact result is a conservative overapproximation - a conjunction
/// dropped an unsupported child - and callers must revalidate candidates
/// against the full expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Hits<B> {
    pub bits: B,
    pub exact: bool,
}

impl<B: Bitstream> Hits<B> {
    pub fn exact(bits: B) -> Self {
        Self { bits, exact: true }
    }
}

/// The shared lifecycle both index trees expose to their actor.
pub trait EventIndex: Send + 'static {
    /// Discover persisted index files under the tree's directory.
    fn scan(&mut self) -> IndexResult<()>;

    /// Hydrate the index files an AST's extractors reference.
    fn load(&mut self, ast: &Expr) -> IndexResult<()>;

    /// Append one event.
    fn index(&mut self, event: &crate::event::Event) -> IndexResult<()>;

    /// Archive everything appended since the last checkpoint.
    fn save(&mut self) -> IndexResult<()>;

    /// Translate an AST into a bitstream of candidate event ids.
    fn lookup(&self, ast: &Expr) -> Option<Hits<crate::bitmap::DefaultBitstream>>;

    fn description(&self) -> &'static str;
}

/// Walk an AST, evaluating supported predicates through `leaf` and
/// combining the results.
///
/// The combination rules keep every `Some` result an overapproximation
/// of the true hit set:
/// - a conjunction may drop unsupported children (marking the result
///   inexact),
/// - a disjunction with any unsupported child is unsupported (a missing
///   term cannot be overapproximated short of a full scan),
/// - a negation needs an exact child; complementing an
///   overapproximation would lose true hits.
///
/// `frontier` is the bit length complements operate within; position 0
/// (the reserved id) never appears in a result.
pub(crate) fn lookup_tree<B: Bitstream>(
    expr: &Expr,
    frontier: u64,
    leaf: &impl Fn(&Predicate) -> Option<Hits<B>>,
) -> Option<Hits<B>> {
    match expr {
        Expr::Predicate(p) => leaf(p),
        Expr::Conjunction(xs) => {
            let mut acc: Option<Hits<B>> = None;
            let mut dropped = false;
            for x in xs {
                match lookup_tree(x, frontier, leaf) {
                    Some(h) => {
                        acc = Some(match acc {
                            None => h,
                            Some(a) => Hits {
                                bits: a.bits.and(&h.bits),
                                exact: a.exact && h.exact,
                            },
                        });
                    }
                    None => dropped = true,
                }
            }
            acc.map(|mut a| {
                a.exact &= !dropped;
                a
            })
        }
        Expr::Disjunction(xs) => {
            let mut acc: Option<Hits<B>> = None;
            for x in xs {
                let h = lookup_tree(x, frontier, leaf)?;
                acc = Some(match acc {
                    None => h,
                    Some(a) => Hits {
                        bits: a.bits.or(&h.bits),
                        exact: a.exact && h.exact,
                    },
                });
            }
            acc
        }
        Expr::Negation(inner) => {
            let h = lookup_tree(inner, frontier, leaf)?;
            if !h.exact {
                return None;
            }
            let flipped = h.bits.padded(frontier).not();
            Some(Hits::exact(flipped.and(&valid_ids(frontier))))
        }
    }
}

/// All ids up to the frontier except the reserved id 0.
fn valid_ids<B: Bitstream>(frontier: u64) -> B {
    let mut b = B::new();
    if frontier > 0 {
        b.push(false);
        b.append(frontier - 1, true);
    }
    b
}
