//! Query result types shared by the MinMax and R-tree queriers.
//!
//! Result maps are keyed by the **decimal encoding of the block start** so
//! that position and momentum results for the same block collide on the
//! same key; `sub_slices` maps are keyed by the decimal slice start for the
//! same reason.

use std::collections::BTreeMap;

use crate::encoding::EncodingError;
use crate::persist::PersistError;
use thiserror::Error;

/// Errors returned by query operations.
///
/// Missing keys are *not* errors — queriers return empty results for them;
/// a decode failure is fatal for the query that hit it.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Error from the persistence layer (open failures, I/O).
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// A persisted record failed to decode.
    #[error("Record decode error: {0}")]
    Decode(#[from] EncodingError),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Particle range of one intra-block slice hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRange {
    /// First particle of the slice.
    pub start: u64,

    /// One past the last particle of the slice.
    pub end: u64,
}

/// One block matched by a range query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryBlockResult {
    /// First particle of the block.
    pub start: u64,

    /// One past the last particle of the block.
    pub end: u64,

    /// Matching intra-block slices, keyed by decimal slice start.
    /// Empty when no secondary index exists.
    pub sub_slices: BTreeMap<String, QueryRange>,
}

impl QueryBlockResult {
    /// A block hit with no sub-slice refinement.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            sub_slices: BTreeMap::new(),
        }
    }
}

/// One block surfaced by an identifier-tracing query.
///
/// Tracing output is a **may-contain** set: Bloom false positives at leaf
/// level surface here as spurious ids, and callers must verify against the
/// actual identifier data downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingResult {
    /// First particle of the block.
    pub start: u64,

    /// One past the last particle of the block.
    pub end: u64,

    /// Ids whose filters matched down to this block.
    pub ids: Vec<u64>,
}
