//! Columnar Particle Store
//!
//! A single-file columnar container for per-iteration particle output: for
//! every attribute axis (position/momentum × x/y/z) an f64 column, plus a
//! u64 identifier column, each split into the **variable-sized blocks** the
//! producing simulation emitted.  Block boundaries are preserved verbatim —
//! they are the unit the indexes summarize.
//!
//! The reader surface mirrors the upstream array-store interface the index
//! builder consumes: variable inspection, per-variable block inventory,
//! ranged selections, deferred gets resolved by one [`ParticleStore::perform_gets`].
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC "SWRM"][VERSION_LE]
//! [column payload bytes ...]
//! [TOC_BYTES][TOC_CRC32_LE][TOC_LEN_LE]
//! ```
//!
//! - **Payload** — raw little-endian element bytes, appended block by block.
//! - **TOC** — per variable: key, element type, and the block list
//!   `(start, count, byte offset)`; serialized with [`crate::encoding`].
//! - **Footer** — CRC32 of the TOC bytes, then the TOC length as the file's
//!   last 8 bytes, so a reader can locate the TOC without scanning payload.
//!
//! # Concurrency model
//!
//! The store is read-only after open and memory-mapped; ranged reads are
//! safe from any thread.  The deferred-get queue is interior-mutability
//! state behind a `Mutex`, so gets may be issued from several call sites
//! before a single `perform_gets` resolves them all.  The store itself is
//! **not** handed to multiple threads by the build pipeline — the reader
//! thread owns an exclusive handle (the upstream contract).
//!
//! # Sub-modules
//!
//! - [`writer`] — [`StoreWriter`] for producing container files.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod writer;

#[cfg(test)]
mod tests;

pub use writer::StoreWriter;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    fs::File,
    io,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const STORE_MAGIC: [u8; 4] = *b"SWRM";
pub(crate) const STORE_VERSION: u32 = 1;
pub(crate) const STORE_HDR_SIZE: usize = 8;
pub(crate) const STORE_FOOTER_SIZE: usize = 12; // CRC32 + u64 TOC length

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by store operations. Any of these is fatal for a build.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error in the TOC.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file is not a particle store or has an unsupported version.
    #[error("Invalid container: {0}")]
    InvalidFormat(String),

    /// TOC checksum did not match.
    #[error("TOC checksum mismatch")]
    ChecksumMismatch,

    /// The requested variable is not present in the container.
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// The variable holds a different element type than requested.
    #[error("Element type mismatch for {key}: expected {expected:?}, found {actual:?}")]
    DtypeMismatch {
        /// Variable key.
        key: String,
        /// Requested element type.
        expected: Dtype,
        /// Stored element type.
        actual: Dtype,
    },

    /// A selection or ranged read fell outside the variable's extent.
    #[error("Selection [{start}, {start}+{count}) out of range for {key}")]
    SelectionOutOfRange {
        /// Variable key.
        key: String,
        /// Requested first particle.
        start: u64,
        /// Requested particle count.
        count: u64,
    },

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// TOC structures
// ------------------------------------------------------------------------------------------------

/// Element type of a stored column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    /// IEEE-754 double — attribute axes.
    F64,
    /// Unsigned 64-bit — particle identifiers.
    U64,
}

impl Dtype {
    /// Element width in bytes.
    pub fn width(&self) -> u64 {
        8
    }
}

impl Encode for Dtype {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u32 = match self {
            Dtype::F64 => 0,
            Dtype::U64 => 1,
        };
        tag.encode_to(buf)
    }
}

impl Decode for Dtype {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u32::decode_from(buf)?;
        let dtype = match tag {
            0 => Dtype::F64,
            1 => Dtype::U64,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other,
                    type_name: "Dtype",
                });
            }
        };
        Ok((dtype, n))
    }
}

/// One block of a column: the particle range it covers and where its payload
/// starts in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    /// First particle of the block.
    pub start: u64,

    /// Number of particles in the block.
    pub count: u64,

    /// Absolute byte offset of the block's payload.
    pub offset: u64,
}

impl Encode for BlockSpan {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start.encode_to(buf)?;
        self.count.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockSpan {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (start, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                start,
                count,
                offset,
            },
            off,
        ))
    }
}

/// TOC entry for one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMeta {
    /// Full variable key, e.g. `/data/500/particles/electrons/position/x`.
    pub key: String,

    /// Element type of the column.
    pub dtype: Dtype,

    /// Block inventory in writer order.
    pub blocks: Vec<BlockSpan>,
}

impl Encode for VariableMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.dtype.encode_to(buf)?;
        encoding::encode_vec(&self.blocks, buf)?;
        Ok(())
    }
}

impl Decode for VariableMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (dtype, n) = Dtype::decode_from(&buf[off..])?;
        off += n;
        let (blocks, n) = encoding::decode_vec::<BlockSpan>(&buf[off..])?;
        off += n;
        Ok((Self { key, dtype, blocks }, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Reader-facing types
// ------------------------------------------------------------------------------------------------

/// Particle range of one block, as advertised by the block inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// First particle of the block.
    pub start: u64,

    /// Number of particles in the block.
    pub count: u64,
}

/// A handle to one variable, carrying an optional ranged selection.
///
/// Obtained from [`ParticleStore::inquire`]; a selection set via
/// [`Variable::set_selection`] restricts subsequent gets to
/// `[start, start+count)` in particle space.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Full variable key.
    pub key: String,

    /// Element type of the column.
    pub dtype: Dtype,

    /// Active selection `(start, count)`; `None` means the full extent.
    selection: Option<(u64, u64)>,
}

impl Variable {
    /// Restricts subsequent gets to `[start, start+count)`.
    pub fn set_selection(&mut self, start: u64, count: u64) {
        self.selection = Some((start, count));
    }

    /// The active selection, if any.
    pub fn selection(&self) -> Option<(u64, u64)> {
        self.selection
    }
}

/// Read mode for gets: queue for a later [`ParticleStore::perform_gets`], or
/// resolve immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Queue the request; the slot fills when `perform_gets` runs.
    Deferred,
    /// Resolve before returning.
    Sync,
}

/// A slot that receives the data of a deferred get.
///
/// Cheap to clone; [`Deferred::take`] yields the data exactly once after
/// `perform_gets` has run.
#[derive(Debug, Clone)]
pub struct Deferred<T> {
    slot: Arc<Mutex<Option<Vec<T>>>>,
}

impl<T> Deferred<T> {
    fn empty() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn filled(data: Vec<T>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(data))),
        }
    }

    fn fill(&self, data: Vec<T>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(data);
        }
    }

    /// Takes the fetched data; `None` until `perform_gets` has run (or if
    /// already taken).
    pub fn take(&self) -> Option<Vec<T>> {
        self.slot.lock().ok()?.take()
    }
}

/// One queued deferred request.
#[derive(Debug)]
enum PendingGet {
    F64 {
        key: String,
        start: u64,
        count: u64,
        sink: Deferred<f64>,
    },
    U64 {
        key: String,
        start: u64,
        count: u64,
        sink: Deferred<u64>,
    },
}

// ------------------------------------------------------------------------------------------------
// ParticleStore — reader
// ------------------------------------------------------------------------------------------------

/// A read-only, memory-mapped particle container.
#[derive(Debug)]
pub struct ParticleStore {
    /// Memory-mapped file contents.
    mmap: Mmap,

    /// Variables by key, parsed from the TOC.
    variables: BTreeMap<String, VariableMeta>,

    /// Deferred gets awaiting `perform_gets`.
    pending: Mutex<Vec<PendingGet>>,
}

impl ParticleStore {
    /// Opens a container, verifies magic/version, and parses the TOC.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidFormat`] for wrong magic, version, or a
    ///   truncated file.
    /// - [`StoreError::ChecksumMismatch`] if the TOC CRC fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < STORE_HDR_SIZE + STORE_FOOTER_SIZE {
            return Err(StoreError::InvalidFormat("file too small".into()));
        }

        let (magic, _) = <[u8; 4]>::decode_from(&mmap[..4])?;
        if magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("magic mismatch".into()));
        }
        let (version, _) = u32::decode_from(&mmap[4..8])?;
        if version != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported version {version}"
            )));
        }

        // Footer: [toc][crc32][toc_len]; toc_len is the last 8 bytes.
        let (toc_len, _) = u64::decode_from(&mmap[file_len - 8..])?;
        let toc_len = usize::try_from(toc_len)
            .map_err(|_| StoreError::InvalidFormat("TOC length exceeds address space".into()))?;
        if toc_len + STORE_FOOTER_SIZE + STORE_HDR_SIZE > file_len {
            return Err(StoreError::InvalidFormat("TOC length out of range".into()));
        }

        let toc_start = file_len - STORE_FOOTER_SIZE - toc_len;
        let toc_bytes = &mmap[toc_start..toc_start + toc_len];
        let (stored_crc, _) = u32::decode_from(&mmap[toc_start + toc_len..])?;

        let mut hasher = Crc32::new();
        hasher.update(toc_bytes);
        if hasher.finalize() != stored_crc {
            return Err(StoreError::ChecksumMismatch);
        }

        let (entries, _) = encoding::decode_vec::<VariableMeta>(toc_bytes)?;
        let mut variables = BTreeMap::new();
        for entry in entries {
            variables.insert(entry.key.clone(), entry);
        }

        debug!(
            path = %path.as_ref().display(),
            variables = variables.len(),
            "opened particle store"
        );

        Ok(Self {
            mmap,
            variables,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// All variables in the container, keyed by full variable path.
    pub fn available_variables(&self) -> &BTreeMap<String, VariableMeta> {
        &self.variables
    }

    /// Returns a handle for the named variable.
    pub fn inquire(&self, key: &str) -> Result<Variable, StoreError> {
        let meta = self
            .variables
            .get(key)
            .ok_or_else(|| StoreError::UnknownVariable(key.to_string()))?;
        Ok(Variable {
            key: meta.key.clone(),
            dtype: meta.dtype,
            selection: None,
        })
    }

    /// Block inventory of a variable, in writer order.
    pub fn blocks_info(&self, var: &Variable) -> Result<Vec<BlockInfo>, StoreError> {
        let meta = self
            .variables
            .get(&var.key)
            .ok_or_else(|| StoreError::UnknownVariable(var.key.clone()))?;
        Ok(meta
            .blocks
            .iter()
            .map(|b| BlockInfo {
                start: b.start,
                count: b.count,
            })
            .collect())
    }

    /// Fetches the f64 data selected on `var` (or its full extent).
    ///
    /// In [`ReadMode::Deferred`] the returned slot fills on the next
    /// [`ParticleStore::perform_gets`]; in [`ReadMode::Sync`] it is filled
    /// before returning.
    pub fn get_f64(&self, var: &Variable, mode: ReadMode) -> Result<Deferred<f64>, StoreError> {
        let (start, count) = self.effective_range(var)?;
        self.check_dtype(var, Dtype::F64)?;
        match mode {
            ReadMode::Sync => Ok(Deferred::filled(self.read_f64(&var.key, start, count)?)),
            ReadMode::Deferred => {
                let sink = Deferred::empty();
                self.push_pending(PendingGet::F64 {
                    key: var.key.clone(),
                    start,
                    count,
                    sink: sink.clone(),
                })?;
                Ok(sink)
            }
        }
    }

    /// Fetches the u64 data selected on `var` (or its full extent).
    pub fn get_u64(&self, var: &Variable, mode: ReadMode) -> Result<Deferred<u64>, StoreError> {
        let (start, count) = self.effective_range(var)?;
        self.check_dtype(var, Dtype::U64)?;
        match mode {
            ReadMode::Sync => Ok(Deferred::filled(self.read_u64(&var.key, start, count)?)),
            ReadMode::Deferred => {
                let sink = Deferred::empty();
                self.push_pending(PendingGet::U64 {
                    key: var.key.clone(),
                    start,
                    count,
                    sink: sink.clone(),
                })?;
                Ok(sink)
            }
        }
    }

    /// Resolves every outstanding deferred get.
    pub fn perform_gets(&self) -> Result<(), StoreError> {
        let drained: Vec<PendingGet> = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| StoreError::Internal("pending-get lock poisoned".into()))?;
            std::mem::take(&mut *pending)
        };

        for request in drained {
            match request {
                PendingGet::F64 {
                    key,
                    start,
                    count,
                    sink,
                } => sink.fill(self.read_f64(&key, start, count)?),
                PendingGet::U64 {
                    key,
                    start,
                    count,
                    sink,
                } => sink.fill(self.read_u64(&key, start, count)?),
            }
        }
        Ok(())
    }

    /// Ranged f64 read: `count` elements from particle `start`.
    ///
    /// The range may span several blocks; payload is gathered across their
    /// spans.
    pub fn read_f64(&self, key: &str, start: u64, count: u64) -> Result<Vec<f64>, StoreError> {
        let raw = self.gather(key, Dtype::F64, start, count)?;
        Ok(raw
            .chunks_exact(8)
            .map(|c| {
                let bytes: [u8; 8] = c.try_into().unwrap_or([0; 8]);
                f64::from_le_bytes(bytes)
            })
            .collect())
    }

    /// Ranged u64 read: `count` elements from particle `start`.
    pub fn read_u64(&self, key: &str, start: u64, count: u64) -> Result<Vec<u64>, StoreError> {
        let raw = self.gather(key, Dtype::U64, start, count)?;
        Ok(raw
            .chunks_exact(8)
            .map(|c| {
                let bytes: [u8; 8] = c.try_into().unwrap_or([0; 8]);
                u64::from_le_bytes(bytes)
            })
            .collect())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn push_pending(&self, request: PendingGet) -> Result<(), StoreError> {
        self.pending
            .lock()
            .map_err(|_| StoreError::Internal("pending-get lock poisoned".into()))?
            .push(request);
        Ok(())
    }

    fn check_dtype(&self, var: &Variable, expected: Dtype) -> Result<(), StoreError> {
        if var.dtype != expected {
            return Err(StoreError::DtypeMismatch {
                key: var.key.clone(),
                expected,
                actual: var.dtype,
            });
        }
        Ok(())
    }

    /// The selection on `var`, or the variable's full extent.
    fn effective_range(&self, var: &Variable) -> Result<(u64, u64), StoreError> {
        if let Some(sel) = var.selection {
            return Ok(sel);
        }
        let meta = self
            .variables
            .get(&var.key)
            .ok_or_else(|| StoreError::UnknownVariable(var.key.clone()))?;
        let first = meta.blocks.first().map(|b| b.start).unwrap_or(0);
        let last = meta.blocks.last().map(|b| b.start + b.count).unwrap_or(0);
        Ok((first, last - first))
    }

    /// Gathers the raw bytes of `[start, start+count)` across block spans.
    fn gather(
        &self,
        key: &str,
        expected: Dtype,
        start: u64,
        count: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let meta = self
            .variables
            .get(key)
            .ok_or_else(|| StoreError::UnknownVariable(key.to_string()))?;
        if meta.dtype != expected {
            return Err(StoreError::DtypeMismatch {
                key: key.to_string(),
                expected,
                actual: meta.dtype,
            });
        }

        let end = start + count;
        let width = meta.dtype.width();
        let mut out = Vec::with_capacity((count * width) as usize);
        let mut cursor = start;

        for block in &meta.blocks {
            let block_end = block.start + block.count;
            if block_end <= cursor || block.start >= end {
                continue;
            }
            // Overlap of [cursor, end) with this block.
            let take_from = cursor.max(block.start);
            let take_to = end.min(block_end);

            if take_from != cursor {
                // A gap in the inventory means the request is unsatisfiable.
                break;
            }

            let byte_from = block.offset + (take_from - block.start) * width;
            let byte_to = block.offset + (take_to - block.start) * width;
            let (byte_from, byte_to) = (byte_from as usize, byte_to as usize);
            if byte_to > self.mmap.len() {
                return Err(StoreError::InvalidFormat(
                    "block payload out of range".into(),
                ));
            }
            out.extend_from_slice(&self.mmap[byte_from..byte_to]);
            cursor = take_to;
            if cursor == end {
                break;
            }
        }

        if cursor != end {
            return Err(StoreError::SelectionOutOfRange {
                key: key.to_string(),
                start,
                count,
            });
        }
        Ok(out)
    }
}
