//! MinMax querier — 1-D overlap probe with optional second-level descent.
//!
//! `query(key, min, max)` walks the primary node list for `key`, keeps the
//! blocks whose `[min, max]` overlaps the probe interval, and — when a
//! secondary index exists — loads the window list at `<key><block_start>`
//! and repeats the overlap test per window.  Unbounded probe endpoints are
//! expressed as ±∞.

use std::collections::BTreeMap;

use tracing::debug;

use super::decode_list;
use crate::persist::{Backend, RecordSource};
use crate::pipeline::{IndexKind, SecondaryIndex};
use crate::results::{QueryBlockResult, QueryError, QueryRange};

/// Read handle over one persisted MinMax index.
pub struct MinMaxQuery {
    /// Primary record source.
    primary: RecordSource,

    /// Secondary record source, present when a secondary index was built.
    secondary_source: Option<RecordSource>,
}

impl MinMaxQuery {
    /// Opens the MinMax index persisted under `index_base` (kind suffix
    /// applied here, matching the builder).
    pub fn open(
        index_base: &str,
        backend: Backend,
        secondary: SecondaryIndex,
    ) -> Result<Self, QueryError> {
        let base = format!("{index_base}_{}", IndexKind::MinMax.suffix());
        let primary = RecordSource::open_primary(&base, backend)?;
        let secondary_source = match secondary {
            SecondaryIndex::None => None,
            other => Some(primary.open_secondary_of(&base, other.name())?),
        };
        Ok(Self {
            primary,
            secondary_source,
        })
    }

    /// Blocks whose extrema overlap `[min, max]`, keyed by decimal block
    /// start; with a secondary index, each hit carries its overlapping
    /// windows in `sub_slices`.
    ///
    /// A key absent from the index yields an empty map.
    pub fn query(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<BTreeMap<String, QueryBlockResult>, QueryError> {
        let mut results = BTreeMap::new();

        let Some(record) = self.primary.read_record(key)? else {
            return Ok(results);
        };
        let nodes = decode_list(&record)?;
        debug!(key, nodes = nodes.len(), "loaded minmax list");

        for node in nodes.iter().filter(|n| n.overlaps(min, max)) {
            let mut block = QueryBlockResult::new(node.start, node.end);
            if let Some(secondary) = &self.secondary_source {
                block.sub_slices = self.query_windows(secondary, key, node.start, min, max)?;
            }
            results.insert(node.start.to_string(), block);
        }
        Ok(results)
    }

    /// Overlap test over the window list of one block.
    fn query_windows(
        &self,
        source: &RecordSource,
        key: &str,
        block_start: u64,
        min: f64,
        max: f64,
    ) -> Result<BTreeMap<String, QueryRange>, QueryError> {
        let mut slices = BTreeMap::new();
        let Some(record) = source.read_record(&format!("{key}{block_start}"))? else {
            return Ok(slices);
        };
        for window in decode_list(&record)?.iter().filter(|w| w.overlaps(min, max)) {
            slices.insert(
                window.start.to_string(),
                QueryRange {
                    start: window.start,
                    end: window.end,
                },
            );
        }
        Ok(slices)
    }
}
