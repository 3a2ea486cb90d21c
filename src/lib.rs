//! # Vigil
//!
//! Event-indexing and query-evaluation engine for structured security
//! telemetry. Events carry typed, possibly nested records; persistent
//! bitmap indexes over event metadata and record fields answer boolean
//! expressions with bitstreams of matching event ids.
//!
//! ## Modules
//!
//! - [`value`]: the tagged value union, type tree, and offsets
//! - [`event`]: the event model
//! - [`expr`]: expression AST, parser, and validator
//! - [`bitmap`]: bitstreams and the per-type bitmap index strategies
//! - [`index`]: the persistent meta and data index trees and their actor
//! - [`query`]: direct evaluation and the query exporter actor
//! - [`archive`]: archive and sink collaborator protocols
//! - [`ingest`]: tab-separated log reader
//! - [`api`]: HTTP query endpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vigil::archive::MemoryArchive;
//! use vigil::query::Exporter;
//! use vigil::value::Schema;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let archive = MemoryArchive::spawn(1024);
//!     let index = vigil::index::actor::spawn(std::path::Path::new("vigil_data/index"));
//!
//!     // ... ingest events into both ...
//!
//!     let (sink_tx, mut sink_rx) = mpsc::channel(64);
//!     let exporter = Exporter::spawn(
//!         archive,
//!         index,
//!         sink_tx,
//!         ":addr in 10.0.0.0/8 && :port == 53/udp",
//!         &Schema::new(),
//!     )?;
//!     exporter.start().await;
//!
//!     while let Some(msg) = sink_rx.recv().await {
//!         println!("{:?}", msg);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod archive;
pub mod bitmap;
pub mod config;
pub mod event;
pub mod expr;
pub mod index;
pub mod ingest;
pub mod query;
pub mod value;

// Re-export top-level types for convenience
pub use archive::{ArchiveHandle, MemoryArchive, SinkMsg};
pub use bitmap::{BitmapIndex, Bitstream, DefaultBitstream, EwahBitstream, NullBitstream};
pub use config::{Config, ConfigError};
pub use event::Event;
pub use expr::{Expr, ExprError, Extractor, Operand, Predicate, RelOp};
pub use index::{EventDataIndex, EventMetaIndex, IndexError, IndexHandle};
pub use ingest::{read_log, read_log_file, BroLog, IngestError};
pub use query::{evaluate, Exporter, Statistics};
pub use value::{Offset, Port, Protocol, Schema, Subnet, Type, Value, ValueKind};
