//! R-tree querier — envelope ranges, metadata readers, identifier tracing.
//!
//! All operations load the per-key tree once and descend it:
//!
//! - **Range by envelope** tests `envelope.intersects(probe)` at every node
//!   and prunes subtrees early; leaf hits become block results, refined by
//!   a secondary tree (key `<primary_key><block_start>`) when one exists.
//! - **Metadata** is the range query with an infinite probe; the root
//!   reader returns the root envelope alone.
//! - **Tracing** descends by Bloom filter only — envelopes are never tested
//!   against ids.  A filter saying *may contain* recurses; at leaves the id
//!   is accumulated under the block's start.  False positives surface as
//!   redundant subtree work (internal nodes) or spurious ids (leaves), so
//!   tracer output is a may-contain set.

use std::collections::BTreeMap;

use tracing::debug;

use super::{Envelope3d, StrNode, decode_tree};
use crate::bloom::BloomFilter;
use crate::persist::{Backend, RecordSource};
use crate::pipeline::{IndexKind, SecondaryIndex};
use crate::results::{QueryBlockResult, QueryError, QueryRange, TracingResult};

/// Read handle over one persisted R-tree index.
pub struct RTreeQuery {
    /// Primary record source.
    primary: RecordSource,

    /// Secondary record source, present when a secondary index was built.
    secondary_source: Option<RecordSource>,
}

impl RTreeQuery {
    /// Opens the R-tree index persisted under `index_base` (kind suffix
    /// applied here, matching the builder).
    pub fn open(
        index_base: &str,
        backend: Backend,
        secondary: SecondaryIndex,
    ) -> Result<Self, QueryError> {
        let base = format!("{index_base}_{}", IndexKind::Rtree.suffix());
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

    /// Blocks whose envelopes intersect the probe box, keyed by decimal
    /// block start.  With a secondary index, each hit's secondary tree is
    /// probed with the same box and its leaves populate `sub_slices`.
    #[allow(clippy::too_many_arguments)]
    pub fn query_xyz(
        &self,
        key: &str,
        minx: f64,
        maxx: f64,
        miny: f64,
        maxy: f64,
        minz: f64,
        maxz: f64,
    ) -> Result<BTreeMap<String, QueryBlockResult>, QueryError> {
        let probe = Envelope3d::probe(minx, maxx, miny, maxy, minz, maxz);
        let mut results = BTreeMap::new();

        let Some(root) = self.load_tree(&self.primary, key)? else {
            return Ok(results);
        };

        let mut hits = Vec::new();
        match_env(&root, &probe, &mut hits);
        debug!(key, hits = hits.len(), "envelope query matched leaves");

        for envelope in hits {
            let mut block = QueryBlockResult::new(envelope.start, envelope.end);
            if let Some(secondary) = &self.secondary_source
                && let Some(sec_root) =
                    self.load_tree(secondary, &format!("{key}{}", envelope.start))?
            {
                let mut sec_hits = Vec::new();
                match_env(&sec_root, &probe, &mut sec_hits);
                for slice in sec_hits {
                    block.sub_slices.insert(
                        slice.start.to_string(),
                        QueryRange {
                            start: slice.start,
                            end: slice.end,
                        },
                    );
                }
            }
            results.insert(envelope.start.to_string(), block);
        }
        Ok(results)
    }

    /// Every leaf envelope of the key's tree (infinite probe).
    pub fn metadata(&self, key: &str) -> Result<Vec<Envelope3d>, QueryError> {
        let Some(root) = self.load_tree(&self.primary, key)? else {
            return Ok(Vec::new());
        };
        let probe = Envelope3d::infinite();
        let mut hits = Vec::new();
        match_env(&root, &probe, &mut hits);
        Ok(hits.into_iter().cloned().collect())
    }

    /// The root envelope alone — the overall bounds and particle extent of
    /// the key's data.
    pub fn metadata_root(&self, key: &str) -> Result<Option<Envelope3d>, QueryError> {
        Ok(self
            .load_tree(&self.primary, key)?
            .map(|root| root.envelope))
    }

    /// Blocks that may contain the given ids, keyed by decimal block
    /// start.  Bloom-guided descent from the root; the output is a
    /// **may-contain** set.
    pub fn trace(
        &self,
        key: &str,
        ids: &[u64],
    ) -> Result<BTreeMap<String, TracingResult>, QueryError> {
        let mut results = BTreeMap::new();
        let Some(root) = self.load_tree(&self.primary, key)? else {
            return Ok(results);
        };
        for &id in ids {
            match_id(&root, id, &mut results);
        }
        Ok(results)
    }

    /// Traces the position key and its momentum counterpart ("position" →
    /// "momentum" substitution) and intersects per-block id lists: only
    /// blocks accepted by both trees are emitted, with the sorted
    /// intersection of their id sets.  Keys without "position" skip the
    /// momentum pass.
    pub fn trace_interacted(
        &self,
        key: &str,
        ids: &[u64],
    ) -> Result<BTreeMap<String, TracingResult>, QueryError> {
        let position = self.trace(key, ids)?;

        let momentum_key = key.replacen("position", "momentum", 1);
        if momentum_key == key {
            return Ok(position);
        }
        debug!(momentum_key, "tracing momentum counterpart");
        let momentum = self.trace(&momentum_key, ids)?;

        let mut results = BTreeMap::new();
        for (block_key, position_hit) in position {
            let Some(momentum_hit) = momentum.get(&block_key) else {
                continue;
            };
            results.insert(
                block_key,
                TracingResult {
                    start: position_hit.start,
                    end: position_hit.end,
                    ids: sorted_intersection(&position_hit.ids, &momentum_hit.ids),
                },
            );
        }
        Ok(results)
    }

    /// Loads and decodes the tree stored under `key`; `None` when the key
    /// is absent (missing metadata is an empty result, not an error).
    fn load_tree(&self, source: &RecordSource, key: &str) -> Result<Option<StrNode>, QueryError> {
        let Some(record) = source.read_record(key)? else {
            return Ok(None);
        };
        Ok(decode_tree(&record)?)
    }
}

// ------------------------------------------------------------------------------------------------
// Traversals
// ------------------------------------------------------------------------------------------------

/// Collects the leaf envelopes intersecting `probe`, pruning subtrees
/// whose bounds miss it.
fn match_env<'t>(node: &'t StrNode, probe: &Envelope3d, hits: &mut Vec<&'t Envelope3d>) {
    if !node.envelope.intersects(probe) {
        return;
    }
    if node.is_leaf() {
        hits.push(&node.envelope);
        return;
    }
    for child in &node.children {
        match_env(child, probe, hits);
    }
}

/// Bloom-guided descent for one id, accumulating leaf hits by block start.
fn match_id(node: &StrNode, id: u64, results: &mut BTreeMap<String, TracingResult>) {
    for child in &node.children {
        if !BloomFilter::probe_bytes(&child.envelope.bloom, id) {
            continue;
        }
        if child.is_leaf() {
            results
                .entry(child.envelope.start.to_string())
                .or_insert_with(|| TracingResult {
                    start: child.envelope.start,
                    end: child.envelope.end,
                    ids: Vec::new(),
                })
                .ids
                .push(id);
        } else {
            match_id(child, id, results);
        }
    }
}

/// Sorted intersection of two id lists.
fn sorted_intersection(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut left = a.to_vec();
    let mut right = b.to_vec();
    left.sort_unstable();
    right.sort_unstable();

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(left[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
