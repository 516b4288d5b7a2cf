//! MinMax Index
//!
//! The 1-D index variety: one `(min, max, start, end)` node per block per
//! axis key, answering interval-overlap queries over a single coordinate.
//! An ordered node sequence for one key is a **MinMaxList**, the unit of
//! persistence.
//!
//! With a **secondary minmax index** each block is additionally sliced into
//! windows of `inblock_slice_size` particles; the window list is stored
//! under `<axis_key><block_start>` and lets a query narrow a block hit down
//! to the windows that actually overlap.
//!
//! # Invariants
//!
//! - `min ≤ max` and `start < end` for every node.
//! - Every secondary window is contained in its parent block, in both the
//!   value range and the particle range.
//!
//! # Sub-modules
//!
//! - [`build`] — [`MinMaxBuilder`], the pipeline's block processor.
//! - [`query`] — [`MinMaxQuery`], the 1-D overlap prober.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod build;
pub mod query;

#[cfg(test)]
mod tests;

pub use build::MinMaxBuilder;
pub use query::MinMaxQuery;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// MinMaxNode
// ------------------------------------------------------------------------------------------------

/// Value extrema of one block (or intra-block window) together with its
/// particle range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxNode {
    /// Smallest value in the range.
    pub min: f64,

    /// Largest value in the range.
    pub max: f64,

    /// First particle of the range.
    pub start: u64,

    /// One past the last particle of the range.
    pub end: u64,
}

impl MinMaxNode {
    /// Interval-overlap test against `[min, max]`; commutative, so list
    /// order never affects query results.
    pub fn overlaps(&self, min: f64, max: f64) -> bool {
        self.min <= max && self.max >= min
    }
}

impl Encode for MinMaxNode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.min.encode_to(buf)?;
        self.max.encode_to(buf)?;
        self.start.encode_to(buf)?;
        self.end.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MinMaxNode {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (min, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (max, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (start, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (end, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                min,
                max,
                start,
                end,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// MinMaxList codec
// ------------------------------------------------------------------------------------------------

/// Serializes a node list into one persisted record.
pub fn encode_list(nodes: &[MinMaxNode]) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    encoding::encode_vec(nodes, &mut buf)?;
    Ok(buf)
}

/// Decodes one persisted record back into a node list.
pub fn decode_list(bytes: &[u8]) -> Result<Vec<MinMaxNode>, EncodingError> {
    let (nodes, _) = encoding::decode_vec::<MinMaxNode>(bytes)?;
    Ok(nodes)
}
