//! Build Pipeline
//!
//! Drives index construction from a particle container: enumerates the
//! selected variables, walks their block inventories, and hands block data
//! to an index-specific [`BlockProcessor`] (the MinMax or R-tree builder).
//!
//! ## Build strategies
//!
//! Two mutually exclusive strategies per run:
//!
//! - **By-block** — for each key and each advertised block, fetch x/y/z
//!   deferred, flush with one `perform_gets`, and process the block inline.
//!   Ordering follows the reader's block iteration.  No queues, no workers.
//!
//! - **By-batch** — the block inventory is partitioned into
//!   [`BatchReadJob`]s of up to `block_batch_size` contiguous blocks (the
//!   last batch may be short).  A single **reader thread** drains the job
//!   list, performs one ranged read per axis for the whole batch while
//!   holding the exclusive store handle, slices the returned buffers along
//!   block boundaries, and sends [`BlockData`] items into a **bounded
//!   channel** of capacity `block_batch_size / 2` (min 1).  A pool of
//!   `max_threads` workers drains the channel and calls `process_block`.
//!
//! ## Concurrency model
//!
//! The channel's blocking `send` is the backpressure: the reader stalls
//! while the pool is more than half a batch behind.  Dropping the sender
//! when the job list is exhausted is the end-of-input signal; workers exit
//! when `recv` disconnects.  The upstream store is not thread-safe, so the
//! store handle is a `Mutex` and the reader holds it across the per-batch
//! axis reads — reader I/O is intentionally serialized.
//!
//! Workers consume in arbitrary order; per-key index state is appended
//! under the builders' per-map locks, so node order across blocks is
//! non-deterministic.  Query correctness never depends on that order.
//!
//! ## Completion
//!
//! After workers join, the caller persists the per-key state; a by-batch
//! run additionally writes the `<index_base>.blockmeta` sidecar — a
//! newline-terminated CSV of `iteration,start,count` per block in reader
//! order, consumed by downstream analytics to reconcile particle offsets.

#[cfg(test)]
mod tests;

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    str::FromStr,
    sync::Mutex,
    time::Instant,
};

use crossbeam::channel;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::encoding::EncodingError;
use crate::persist::PersistError;
use crate::store::{BlockInfo, Dtype, ParticleStore, ReadMode, StoreError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by a build run.  All of them abort the build — there is
/// no retry layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fault propagated from the particle store (fatal for the build).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fault from the persistence layer.
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Record encoding failure.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Sidecar or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A configuration name outside the supported set.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal invariant violation, poisoned lock, or dead worker.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Which index variety a run builds or queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// 1-D min/max per block.
    MinMax,
    /// 3-D STR tree over block envelopes.
    Rtree,
}

impl IndexKind {
    /// Suffix appended to the index save base (`<base>_minmax`, …).
    pub fn suffix(&self) -> &'static str {
        match self {
            IndexKind::MinMax => "minmax",
            IndexKind::Rtree => "rtree",
        }
    }
}

impl FromStr for IndexKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minmax" => Ok(IndexKind::MinMax),
            "rtree" => Ok(IndexKind::Rtree),
            other => Err(PipelineError::Config(format!("unknown index type: {other}"))),
        }
    }
}

/// Secondary (intra-block) index selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondaryIndex {
    /// No intra-block refinement.
    #[default]
    None,
    /// Per-block MinMax slice lists.
    MinMax,
    /// Per-block R-trees.
    Rtree,
}

impl SecondaryIndex {
    /// Name used in secondary file paths.
    pub fn name(&self) -> &'static str {
        match self {
            SecondaryIndex::None => "none",
            SecondaryIndex::MinMax => "minmax",
            SecondaryIndex::Rtree => "rtree",
        }
    }
}

impl FromStr for SecondaryIndex {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SecondaryIndex::None),
            "minmax" => Ok(SecondaryIndex::MinMax),
            "rtree" => Ok(SecondaryIndex::Rtree),
            other => Err(PipelineError::Config(format!(
                "unknown secondary index type: {other}"
            ))),
        }
    }
}

/// Configuration of one build run.
pub struct BuildConfig {
    /// Species path segment to select, e.g. `electrons`.
    pub species: String,

    /// Attribute groups to index (default: position and momentum).
    pub attributes: Vec<String>,

    /// Iteration whose variables are selected.
    pub iteration: u64,

    /// Worker threads draining the block-data channel.
    pub max_threads: usize,

    /// I/O parallelism hint for the upstream store.  The native container
    /// reads through a memory map and takes no hint; kept for stores that
    /// do.
    pub reader_threads: usize,

    /// Blocks per batch-read job; `0` selects by-block mode.
    pub block_batch_size: u64,

    /// Save base for indexes and the `.blockmeta` sidecar.
    pub index_base: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            species: "electrons".into(),
            attributes: vec!["position".into(), "momentum".into()],
            iteration: 500,
            max_threads: 16,
            reader_threads: 16,
            block_batch_size: 10_000,
            index_base: "index".into(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Job / item contracts
// ------------------------------------------------------------------------------------------------

/// One batch-read job: up to `block_batch_size` contiguous blocks of one
/// variable, read in a single ranged request per axis.  Produced at init,
/// consumed exactly once by the reader thread.
#[derive(Debug, Clone)]
pub struct BatchReadJob {
    /// First particle covered by the batch.
    pub start: u64,

    /// Particle count spanning first block start to last block end.
    pub count: u64,

    /// Base key of the variable (without the axis letter).
    pub key: String,

    /// Attribute group the key belongs to (diagnostics).
    pub attribute: String,

    /// The blocks inside this batch, in inventory order.
    pub blocks: Vec<BlockInfo>,
}

/// One block's worth of axis data, produced by the reader in inventory
/// order and consumed by workers in arbitrary order.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// X-axis values of the block.
    pub x: Vec<f64>,

    /// Y-axis values of the block.
    pub y: Vec<f64>,

    /// Z-axis values of the block.
    pub z: Vec<f64>,

    /// First particle of the block.
    pub start: u64,

    /// Number of particles in the block.
    pub count: u64,

    /// Base key of the variable (without the axis letter).
    pub key: String,
}

/// One `.blockmeta` sidecar row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMetaRow {
    /// Iteration parsed from the variable key.
    pub iteration: u64,

    /// First particle of the block.
    pub start: u64,

    /// Number of particles in the block.
    pub count: u64,
}

/// An index builder that folds block data into per-key in-memory state.
///
/// Implementations are shared across worker threads; appends to their
/// per-key maps are serialized by their own locks.
pub trait BlockProcessor: Send + Sync {
    /// Folds one block into the in-memory index state.
    fn process_block(&self, block: BlockData) -> Result<(), PipelineError>;
}

// ------------------------------------------------------------------------------------------------
// Driver
// ------------------------------------------------------------------------------------------------

/// Runs one build over a store with an index-specific processor.
pub struct BuildDriver<'a, P: BlockProcessor> {
    store: &'a Mutex<ParticleStore>,
    config: &'a BuildConfig,
    processor: &'a P,
}

impl<'a, P: BlockProcessor> BuildDriver<'a, P> {
    /// Creates a driver over an exclusive store handle.
    pub fn new(store: &'a Mutex<ParticleStore>, config: &'a BuildConfig, processor: &'a P) -> Self {
        Self {
            store,
            config,
            processor,
        }
    }

    /// Processes every selected block through the processor.
    ///
    /// `block_batch_size == 0` selects the inline by-block strategy;
    /// anything else runs the pipelined by-batch strategy and writes the
    /// `.blockmeta` sidecar.
    pub fn run(&self) -> Result<(), PipelineError> {
        let started = Instant::now();
        let result = if self.config.block_batch_size == 0 {
            self.build_by_block()
        } else {
            self.build_by_batch()
        };
        info!(elapsed = ?started.elapsed(), "block processing finished");
        result
    }

    // --------------------------------------------------------------------------------------------
    // Key selection
    // --------------------------------------------------------------------------------------------

    /// Base keys (axis letter stripped) of every f64 x-axis variable
    /// matching the configured attributes, species, and iteration.
    fn select_keys(&self) -> Result<Vec<String>, PipelineError> {
        let store = self.lock_store()?;
        let iteration_segment = format!("/{}/", self.config.iteration);

        let mut keys = Vec::new();
        for (key, meta) in store.available_variables() {
            if meta.dtype != Dtype::F64 || !key.ends_with('x') {
                continue;
            }
            if !key.contains(&self.config.species) || !key.contains(&iteration_segment) {
                continue;
            }
            if !self
                .config
                .attributes
                .iter()
                .any(|attribute| key.contains(attribute.as_str()))
            {
                continue;
            }
            keys.push(key[..key.len() - 1].to_string());
        }
        debug!(count = keys.len(), "selected variable keys");
        Ok(keys)
    }

    // --------------------------------------------------------------------------------------------
    // By-block strategy
    // --------------------------------------------------------------------------------------------

    fn build_by_block(&self) -> Result<(), PipelineError> {
        for key in self.select_keys()? {
            let blocks = {
                let store = self.lock_store()?;
                let var = store.inquire(&format!("{key}x"))?;
                store.blocks_info(&var)?
            };

            for block in blocks {
                if block.count == 0 {
                    continue;
                }
                let (x, y, z) = self.fetch_block(&key, block)?;
                self.processor.process_block(BlockData {
                    x,
                    y,
                    z,
                    start: block.start,
                    count: block.count,
                    key: key.clone(),
                })?;
            }
        }
        Ok(())
    }

    /// Fetches one block's x/y/z arrays: three deferred gets flushed by a
    /// single `perform_gets`, under the exclusive store handle.
    fn fetch_block(
        &self,
        key: &str,
        block: BlockInfo,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), PipelineError> {
        let store = self.lock_store()?;

        let mut var_x = store.inquire(&format!("{key}x"))?;
        let mut var_y = store.inquire(&format!("{key}y"))?;
        let mut var_z = store.inquire(&format!("{key}z"))?;
        var_x.set_selection(block.start, block.count);
        var_y.set_selection(block.start, block.count);
        var_z.set_selection(block.start, block.count);

        let dx = store.get_f64(&var_x, ReadMode::Deferred)?;
        let dy = store.get_f64(&var_y, ReadMode::Deferred)?;
        let dz = store.get_f64(&var_z, ReadMode::Deferred)?;
        store.perform_gets()?;

        let take = |d: crate::store::Deferred<f64>| {
            d.take()
                .ok_or_else(|| PipelineError::Internal("deferred get left unresolved".into()))
        };
        Ok((take(dx)?, take(dy)?, take(dz)?))
    }

    // --------------------------------------------------------------------------------------------
    // By-batch strategy
    // --------------------------------------------------------------------------------------------

    fn build_by_batch(&self) -> Result<(), PipelineError> {
        let (jobs, rows) = self.plan_batches()?;
        info!(jobs = jobs.len(), blocks = rows.len(), "batch jobs planned");

        let capacity = usize::try_from(self.config.block_batch_size / 2)
            .unwrap_or(usize::MAX)
            .max(1);
        let (tx, rx) = channel::bounded::<BlockData>(capacity);

        let worker_count = self.config.max_threads.max(1);
        let read_started = Instant::now();

        std::thread::scope(|scope| -> Result<(), PipelineError> {
            let reader = scope.spawn(move || self.read_batches(&jobs, tx));

            let mut workers = Vec::with_capacity(worker_count);
            for _ in 0..worker_count {
                let rx = rx.clone();
                workers.push(scope.spawn(move || -> Result<(), PipelineError> {
                    while let Ok(block) = rx.recv() {
                        self.processor.process_block(block)?;
                    }
                    Ok(())
                }));
            }
            drop(rx);

            let mut first_error: Option<PipelineError> = None;
            for worker in workers {
                match worker.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "worker failed");
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error
                            .get_or_insert(PipelineError::Internal("worker thread panicked".into()));
                    }
                }
            }
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "batch reader failed");
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error
                        .get_or_insert(PipelineError::Internal("reader thread panicked".into()));
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })?;

        info!(elapsed = ?read_started.elapsed(), "IO and CPU finished");

        self.write_blockmeta(&rows)?;
        Ok(())
    }

    /// Partitions every selected variable's inventory into batch jobs and
    /// collects the sidecar rows in reader order.
    fn plan_batches(&self) -> Result<(Vec<BatchReadJob>, Vec<BlockMetaRow>), PipelineError> {
        let keys = self.select_keys()?;
        let batch_size = usize::try_from(self.config.block_batch_size)
            .map_err(|_| PipelineError::Config("block batch size exceeds usize".into()))?;

        let mut jobs = Vec::new();
        let mut rows = Vec::new();

        let store = self.lock_store()?;
        for key in keys {
            let var = store.inquire(&format!("{key}x"))?;
            let blocks = store.blocks_info(&var)?;
            let iteration = key_iteration(&key).unwrap_or(self.config.iteration);
            let attribute = self
                .config
                .attributes
                .iter()
                .find(|a| key.contains(a.as_str()))
                .cloned()
                .unwrap_or_default();

            for group in blocks.chunks(batch_size) {
                let Some(first) = group.first() else {
                    continue;
                };
                let Some(last) = group.last() else {
                    continue;
                };
                rows.extend(group.iter().map(|b| BlockMetaRow {
                    iteration,
                    start: b.start,
                    count: b.count,
                }));
                jobs.push(BatchReadJob {
                    start: first.start,
                    count: last.start + last.count - first.start,
                    key: key.clone(),
                    attribute: attribute.clone(),
                    blocks: group.to_vec(),
                });
            }
        }
        Ok((jobs, rows))
    }

    /// Reader thread body: one ranged read per axis per job, sliced back
    /// along block boundaries.  The sender is dropped on return, which is
    /// the workers' end-of-input signal.
    fn read_batches(
        &self,
        jobs: &[BatchReadJob],
        tx: channel::Sender<BlockData>,
    ) -> Result<(), PipelineError> {
        for job in jobs {
            debug!(
                key = %job.key,
                attribute = %job.attribute,
                start = job.start,
                count = job.count,
                "batch read"
            );

            // The store handle is held across all three axis reads: the
            // upstream reader is single-threaded.
            let (x, y, z) = {
                let store = self.lock_store()?;
                let x = store.read_f64(&format!("{}x", job.key), job.start, job.count)?;
                let y = store.read_f64(&format!("{}y", job.key), job.start, job.count)?;
                let z = store.read_f64(&format!("{}z", job.key), job.start, job.count)?;
                (x, y, z)
            };

            for block in &job.blocks {
                if block.count == 0 {
                    continue;
                }
                let from = (block.start - job.start) as usize;
                let to = from + block.count as usize;
                let item = BlockData {
                    x: x[from..to].to_vec(),
                    y: y[from..to].to_vec(),
                    z: z[from..to].to_vec(),
                    start: block.start,
                    count: block.count,
                    key: job.key.clone(),
                };
                if tx.send(item).is_err() {
                    // Every worker is gone; their join result carries the cause.
                    return Err(PipelineError::Internal(
                        "block-data channel disconnected".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Writes the `<index_base>.blockmeta` CSV sidecar.
    fn write_blockmeta(&self, rows: &[BlockMetaRow]) -> Result<(), PipelineError> {
        let path = format!("{}.blockmeta", self.config.index_base);
        let mut out = BufWriter::new(File::create(&path)?);
        for row in rows {
            writeln!(out, "{},{},{}", row.iteration, row.start, row.count)?;
        }
        out.flush()?;
        info!(path, rows = rows.len(), "blockmeta sidecar written");
        Ok(())
    }

    fn lock_store(&self) -> Result<std::sync::MutexGuard<'a, ParticleStore>, PipelineError> {
        self.store
            .lock()
            .map_err(|_| PipelineError::Internal("store lock poisoned".into()))
    }
}

/// Parses the iteration number out of a `/data/<iteration>/…` key.
fn key_iteration(key: &str) -> Option<u64> {
    key.split('/').nth(2)?.parse().ok()
}
