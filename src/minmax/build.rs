//! MinMax builder — the pipeline's block processor for the 1-D index.
//!
//! `process_block` emits one primary node per axis key.  Without a
//! secondary index the node carries the exact extrema of the block's
//! array; with `secondary = minmax` the block is sliced into windows of
//! `inblock_slice_size` particles (the last may be short), each window
//! appends a node to the list keyed `<axis_key><block_start>`, and the
//! primary node is the running reduction over the windows.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use tracing::info;

use super::{MinMaxNode, encode_list};
use crate::persist::{
    Backend, FileSink, KvStore, kv_namespace_path, primary_file_path, secondary_file_path,
};
use crate::pipeline::{BlockData, BlockProcessor, IndexKind, PipelineError, SecondaryIndex};

/// Per-key MinMax state shared across worker threads.
///
/// The primary and intra-block maps each have a dedicated lock; appends
/// are serialized per map, so node order across blocks follows worker
/// completion order.
pub struct MinMaxBuilder {
    /// Secondary index selection; only [`SecondaryIndex::MinMax`] produces
    /// intra-block state.
    secondary: SecondaryIndex,

    /// Particles per intra-block window.
    inblock_slice_size: u64,

    /// Primary node lists by axis key.
    primary: Mutex<BTreeMap<String, Vec<MinMaxNode>>>,

    /// Intra-block window lists by `<axis_key><block_start>`.
    inblock: Mutex<BTreeMap<String, Vec<MinMaxNode>>>,
}

impl MinMaxBuilder {
    /// Creates a builder; `inblock_slice_size` is only consulted when
    /// `secondary` is [`SecondaryIndex::MinMax`].
    pub fn new(secondary: SecondaryIndex, inblock_slice_size: u64) -> Self {
        Self {
            secondary,
            inblock_slice_size: inblock_slice_size.max(1),
            primary: Mutex::new(BTreeMap::new()),
            inblock: Mutex::new(BTreeMap::new()),
        }
    }

    /// Folds one axis array into the per-key state.
    fn process_axis(
        &self,
        data: &[f64],
        key: String,
        start: u64,
        end: u64,
    ) -> Result<(), PipelineError> {
        if data.is_empty() {
            return Ok(());
        }

        let node = match self.secondary {
            SecondaryIndex::MinMax => {
                let windows = slice_windows(data, start, end, self.inblock_slice_size);
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                for window in &windows {
                    min = min.min(window.min);
                    max = max.max(window.max);
                }

                let inblock_key = format!("{key}{start}");
                self.inblock
                    .lock()
                    .map_err(|_| PipelineError::Internal("inblock map lock poisoned".into()))?
                    .entry(inblock_key)
                    .or_default()
                    .extend(windows);

                MinMaxNode {
                    min,
                    max,
                    start,
                    end,
                }
            }
            _ => MinMaxNode {
                min: exact_min(data),
                max: exact_max(data),
                start,
                end,
            },
        };

        self.primary
            .lock()
            .map_err(|_| PipelineError::Internal("primary map lock poisoned".into()))?
            .entry(key)
            .or_default()
            .push(node);
        Ok(())
    }

    /// Serializes the per-key state to the chosen backend, consuming the
    /// builder.  The save base gets the `_minmax` kind suffix.
    pub fn persist(self, index_base: &str, backend: Backend) -> Result<(), PipelineError> {
        let base = format!("{index_base}_{}", IndexKind::MinMax.suffix());
        let primary = self
            .primary
            .into_inner()
            .map_err(|_| PipelineError::Internal("primary map lock poisoned".into()))?;
        let inblock = self
            .inblock
            .into_inner()
            .map_err(|_| PipelineError::Internal("inblock map lock poisoned".into()))?;

        info!(
            keys = primary.len(),
            inblock_keys = inblock.len(),
            base,
            "persisting minmax index"
        );

        match backend {
            Backend::File => {
                let mut sink = FileSink::create(&primary_file_path(&base))?;
                for (key, nodes) in &primary {
                    sink.put(key, &encode_list(nodes)?)?;
                }
                sink.finish()?;

                if self.secondary == SecondaryIndex::MinMax {
                    let mut sink =
                        FileSink::create(&secondary_file_path(&base, self.secondary.name()))?;
                    for (key, nodes) in &inblock {
                        sink.put(key, &encode_list(nodes)?)?;
                    }
                    sink.finish()?;
                }
            }
            Backend::Kv => {
                let kv = KvStore::open_for_build(&kv_namespace_path(&base))?;
                let mut batch = kv.write_batch();
                for (key, nodes) in &primary {
                    batch.put(key, &encode_list(nodes)?)?;
                }
                batch.commit()?;

                if self.secondary == SecondaryIndex::MinMax {
                    let mut batch = kv.write_batch();
                    for (key, nodes) in &inblock {
                        batch.put(key, &encode_list(nodes)?)?;
                    }
                    batch.commit()?;
                }
                kv.persist()?;
            }
        }
        Ok(())
    }
}

impl BlockProcessor for MinMaxBuilder {
    fn process_block(&self, block: BlockData) -> Result<(), PipelineError> {
        let end = block.start + block.count;
        self.process_axis(&block.x, format!("{}x", block.key), block.start, end)?;
        self.process_axis(&block.y, format!("{}y", block.key), block.start, end)?;
        self.process_axis(&block.z, format!("{}z", block.key), block.start, end)?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Exact minimum over a non-empty slice.
fn exact_min(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Exact maximum over a non-empty slice.
fn exact_max(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Cuts a block into windows of `slice_size` particles (last may be short)
/// and summarizes each.
fn slice_windows(data: &[f64], start: u64, end: u64, slice_size: u64) -> Vec<MinMaxNode> {
    let mut windows = Vec::with_capacity(data.len().div_ceil(slice_size as usize));
    let mut at = 0u64;
    while at < data.len() as u64 {
        let to = (at + slice_size).min(data.len() as u64);
        let chunk = &data[at as usize..to as usize];
        windows.push(MinMaxNode {
            min: exact_min(chunk),
            max: exact_max(chunk),
            start: start + at,
            end: (start + to).min(end),
        });
        at = to;
    }
    windows
}
