//! R-tree builder — the pipeline's block processor for the 3-D index.
//!
//! `process_block` computes the block's bounding envelope and appends it to
//! the per-key envelope vector; persistence bulk-loads one STR tree per key
//! and serializes it depth-first.
//!
//! ## Bloom enrichment
//!
//! When enabled, the builder reads the identifier array for the particle
//! range covered by each tree's root and walks the tree post-order.  A node
//! at level `L` gets a filter over its subtree's ids with
//! `bits_per_key = max_level − L + 1`: shallower nodes get more bits per
//! key, widening the filter, capped at [`MAX_FILTER_BITS`].  Leaves take
//! the exact sub-range of the id array; the root is never enriched —
//! tracing always descends from it, so a root filter would prune nothing.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use tracing::{debug, info};

use super::{DEFAULT_LEAF_FANOUT, Envelope3d, StrNode, bulk_load, encode_tree};
use crate::bloom::{BloomPolicy, MAX_FILTER_BITS};
use crate::persist::{Backend, FileSink, KvStore, kv_namespace_path, primary_file_path};
use crate::pipeline::{BlockData, BlockProcessor, IndexKind, PipelineError};
use crate::store::ParticleStore;

/// Per-key envelope state shared across worker threads.
pub struct RTreeBuilder {
    /// STR leaf fan-out used at persist time.
    leaf_fanout: usize,

    /// Whether to enrich trees with per-subtree Bloom filters.
    build_bloom: bool,

    /// Cap on a single filter's bit count.
    max_filter_bits: u64,

    /// Identifier variable key, derived from iteration and species.
    id_key: String,

    /// Per-key block envelopes in worker completion order.
    envelopes: Mutex<BTreeMap<String, Vec<Envelope3d>>>,
}

impl RTreeBuilder {
    /// Creates a builder for the given iteration and species; the id
    /// variable is located at `/data/<iteration>/particles/<species>/id`.
    pub fn new(leaf_fanout: usize, build_bloom: bool, iteration: u64, species: &str) -> Self {
        Self {
            leaf_fanout: if leaf_fanout == 0 {
                DEFAULT_LEAF_FANOUT
            } else {
                leaf_fanout
            },
            build_bloom,
            max_filter_bits: MAX_FILTER_BITS,
            id_key: format!("/data/{iteration}/particles/{species}/id"),
            envelopes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Bulk-loads, optionally enriches, and serializes one tree per key,
    /// consuming the builder.  `store` is required only for Bloom
    /// enrichment (it re-reads the identifier array).
    pub fn persist(
        mut self,
        store: Option<&Mutex<ParticleStore>>,
        index_base: &str,
        backend: Backend,
    ) -> Result<(), PipelineError> {
        let base = format!("{index_base}_{}", IndexKind::Rtree.suffix());
        let envelopes = std::mem::take(&mut self.envelopes)
            .into_inner()
            .map_err(|_| PipelineError::Internal("envelope map lock poisoned".into()))?;

        info!(keys = envelopes.len(), base, "persisting rtree index");

        let mut records: Vec<(String, Vec<u8>)> = Vec::with_capacity(envelopes.len());
        for (key, envs) in envelopes {
            let block_count = envs.len();
            let Some(mut root) = bulk_load(envs, self.leaf_fanout) else {
                continue;
            };

            if self.build_bloom {
                let store = store.ok_or_else(|| {
                    PipelineError::Config(
                        "bloom enrichment requires access to the particle store".into(),
                    )
                })?;
                self.enrich_tree(store, &mut root)?;
            }

            debug!(
                key,
                blocks = block_count,
                height = root.level,
                "tree bulk-loaded"
            );
            records.push((key, encode_tree(&root)?));
        }

        match backend {
            Backend::File => {
                let mut sink = FileSink::create(&primary_file_path(&base))?;
                for (key, record) in &records {
                    sink.put(key, record)?;
                }
                sink.finish()?;
            }
            Backend::Kv => {
                let kv = KvStore::open_for_build(&kv_namespace_path(&base))?;
                let mut batch = kv.write_batch();
                for (key, record) in &records {
                    batch.put(key, record)?;
                }
                batch.commit()?;
                kv.persist()?;
            }
        }
        Ok(())
    }

    /// Reads the id array for the root's particle range and attaches
    /// filters to every non-root node.
    fn enrich_tree(
        &self,
        store: &Mutex<ParticleStore>,
        root: &mut StrNode,
    ) -> Result<(), PipelineError> {
        let root_start = root.envelope.start;
        let root_count = root.envelope.end - root_start;
        let ids = {
            let store = store
                .lock()
                .map_err(|_| PipelineError::Internal("store lock poisoned".into()))?;
            store.read_u64(&self.id_key, root_start, root_count)?
        };

        let max_level = root.level;
        enrich(root, &ids, root_start, max_level, self.max_filter_bits)?;
        Ok(())
    }
}

impl BlockProcessor for RTreeBuilder {
    fn process_block(&self, block: BlockData) -> Result<(), PipelineError> {
        if block.count == 0 {
            return Ok(());
        }
        let envelope = Envelope3d::from_block(
            &block.x,
            &block.y,
            &block.z,
            block.start,
            block.start + block.count,
        );
        self.envelopes
            .lock()
            .map_err(|_| PipelineError::Internal("envelope map lock poisoned".into()))?
            .entry(block.key)
            .or_default()
            .push(envelope);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Post-order enrichment
// ------------------------------------------------------------------------------------------------

/// Attaches a filter to `node` (unless it is the root) and returns the ids
/// of its subtree.  `ids` covers `[root_start, root_end)`; leaves index it
/// by their particle range.
fn enrich(
    node: &mut StrNode,
    ids: &[u64],
    root_start: u64,
    max_level: u32,
    max_filter_bits: u64,
) -> Result<Vec<u64>, PipelineError> {
    let mut subtree_ids = Vec::new();
    for child in &mut node.children {
        subtree_ids.extend(enrich(child, ids, root_start, max_level, max_filter_bits)?);
    }

    if node.level == 0 {
        let from = (node.envelope.start - root_start) as usize;
        let to = (node.envelope.end - root_start) as usize;
        let leaf_ids = ids.get(from..to).ok_or_else(|| {
            PipelineError::Internal("leaf particle range outside the id array".into())
        })?;
        subtree_ids.extend_from_slice(leaf_ids);
    }

    if node.level == max_level {
        // Root stays unenriched; tracing always descends from it.
        return Ok(subtree_ids);
    }

    let policy = BloomPolicy::new(max_level - node.level + 1, max_filter_bits);
    node.envelope.bloom = policy.build(&subtree_ids).into_bytes();
    Ok(subtree_ids)
}
