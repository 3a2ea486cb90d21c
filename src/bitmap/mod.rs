//! Bitmap Index Library
//!
//! Bitstream representations and the per-type bitmap index strategies
//! built on top of them. The event indexes compose these to answer
//! point and range lookups with bitstreams of matching event ids.

mod bitstream;
mod index;

pub use bitstream::{Bitstream, EwahBitstream, NullBitstream};
pub use index::{
    AddressIndex, ArithmeticIndex, BitmapError, BitmapIndex, EqualityIndex, PortIndex,
    TIME_GRANULARITY,
};

/// The representation every persistent index uses.
pub type DefaultBitstream = EwahBitstream;
