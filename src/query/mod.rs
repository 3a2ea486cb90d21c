//! Query Evaluation
//!
//! Turns a query string into a stream of matching events: the
//! [`Exporter`] actor compiles the expression, prefilters through the
//! bitmap indexes, and revalidates candidates with [`evaluate`] before
//! forwarding them to the sink.

mod eval;
mod exporter;

pub use eval::{apply, evaluate};
pub use exporter::{Exporter, ExporterMsg, Statistics};
