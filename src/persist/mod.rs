//! Index Persistence
//!
//! Both storage backends materialize the same logical mapping:
//! `key → bytes(record)`, where a record is a serialized per-key structure
//! (a MinMax node list or a pre-order tree node list).  Records are
//! immutable after write; replacing an index means deleting the whole file
//! or KV namespace and rebuilding.
//!
//! # File backend layout
//!
//! ```text
//! [record_0 bytes][record_1 bytes]...[record_{N-1} bytes]
//! [catalog bytes]
//! [catalog_length: u64 little-endian, 8 bytes]
//! ```
//!
//! The catalog is a [`MetaRecord`] list naming every record by key, byte
//! offset, and length.  Readers seek to `file_size − 8`, read the catalog
//! length, seek back by that amount, and parse the catalog — no payload
//! scan.  One file exists per index role: the primary index and one file
//! per secondary type.
//!
//! # KV backend
//!
//! A fjall keyspace directory per index; every record is one KV pair in a
//! single partition.  Writes go through a write batch committed at end of
//! build and every [`KV_BATCH_LIMIT`] puts to bound batch size.  Opening a
//! builder against an existing namespace deletes it first.
//!
//! # Error taxonomy
//!
//! - **open-failure** — path and backend reported, caller decides
//!   (build aborts; queries surface the error).
//! - **metadata-missing** — a key absent from catalog or KV yields
//!   `Ok(None)` plus a warning; queriers turn it into an empty result.
//! - **decode-failure** — malformed records are fatal for that query.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use crate::encoding::{self, Decode, Encode, EncodingError};
use fjall::PartitionCreateOptions;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info, warn};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Byte length of the file backend's trailing catalog-length field.
pub const CATALOG_LEN_SIZE: usize = 8;

/// Maximum puts buffered in one KV write batch before an intermediate
/// commit.
pub const KV_BATCH_LIMIT: usize = 1_000;

/// Partition holding all index records of a KV namespace.
const KV_PARTITION: &str = "records";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error (decode failures are fatal for a query).
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Error from the KV backend.
    #[error("KV backend error: {0}")]
    Kv(#[from] fjall::Error),

    /// An index file or namespace could not be opened.
    #[error("Cannot open index at {path}: {reason}")]
    Open {
        /// The path that failed to open.
        path: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// A backend name outside `file` / `kv` was configured.
    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Backend selection
// ------------------------------------------------------------------------------------------------

/// Storage backend, selected per build/query run.
///
/// A tagged variant rather than a string: unknown names are a configuration
/// error at parse time, not a silent runtime branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Footer-cataloged record file per index role.
    File,
    /// fjall keyspace namespace.
    Kv,
}

impl FromStr for Backend {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Backend::File),
            "kv" => Ok(Backend::Kv),
            other => Err(PersistError::UnknownBackend(other.to_string())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Path conventions
// ------------------------------------------------------------------------------------------------

/// Primary index file for a save base (the base already carries the index
/// kind suffix, e.g. `diag2_minmax`).
pub fn primary_file_path(base: &str) -> String {
    format!("{base}.index")
}

/// Secondary index file for a save base and secondary type name.
pub fn secondary_file_path(base: &str, secondary: &str) -> String {
    format!("{base}_secondary_{secondary}.index")
}

/// KV namespace directory for a save base.
pub fn kv_namespace_path(base: &str) -> String {
    format!("{base}_kv")
}

// ------------------------------------------------------------------------------------------------
// Catalog record
// ------------------------------------------------------------------------------------------------

/// One catalog entry of the file backend: a record's key and byte extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    /// Record key.
    pub key: String,

    /// Byte offset of the record from the start of the file.
    pub start_bytes: u64,

    /// Record length in bytes.
    pub length: u64,
}

impl Encode for MetaRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.start_bytes.encode_to(buf)?;
        self.length.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MetaRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (start_bytes, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (length, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key,
                start_bytes,
                length,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// File backend — writer
// ------------------------------------------------------------------------------------------------

/// Append-only writer for one index-role file.
///
/// Records go down in insertion order; [`FileSink::finish`] writes the
/// catalog and the trailing catalog length.  A sink that is dropped without
/// `finish` leaves an unreadable partial file — delete it and rebuild.
pub struct FileSink {
    /// Buffered output file.
    out: BufWriter<File>,

    /// Byte offset of the next record.
    cursor: u64,

    /// Catalog accumulated in insertion order.
    catalog: Vec<MetaRecord>,

    /// Path kept for diagnostics.
    path: String,
}

impl FileSink {
    /// Creates (truncating) the index file at `path`.
    pub fn create(path: &str) -> Result<Self, PersistError> {
        let file = File::create(path).map_err(|e| PersistError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            out: BufWriter::new(file),
            cursor: 0,
            catalog: Vec::new(),
            path: path.to_string(),
        })
    }

    /// Appends one record under `key`.
    pub fn put(&mut self, key: &str, record: &[u8]) -> Result<(), PersistError> {
        self.out.write_all(record)?;
        self.catalog.push(MetaRecord {
            key: key.to_string(),
            start_bytes: self.cursor,
            length: record.len() as u64,
        });
        self.cursor += record.len() as u64;
        Ok(())
    }

    /// Writes the catalog and its length suffix, then flushes.
    pub fn finish(mut self) -> Result<(), PersistError> {
        let mut catalog_bytes = Vec::new();
        encoding::encode_vec(&self.catalog, &mut catalog_bytes)?;

        self.out.write_all(&catalog_bytes)?;
        self.out
            .write_all(&(catalog_bytes.len() as u64).to_le_bytes())?;
        self.out.flush()?;

        info!(
            path = %self.path,
            records = self.catalog.len(),
            catalog_bytes = catalog_bytes.len(),
            "index file written"
        );
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// File backend — reader
// ------------------------------------------------------------------------------------------------

/// Memory-mapped reader over one index-role file.
#[derive(Debug)]
pub struct CatalogReader {
    /// Memory-mapped file contents.
    mmap: Mmap,

    /// Catalog by key.
    catalog: BTreeMap<String, MetaRecord>,

    /// Path kept for diagnostics.
    path: String,
}

impl CatalogReader {
    /// Opens the file and parses the footer catalog.
    pub fn open(path: &str) -> Result<Self, PersistError> {
        let file = File::open(path).map_err(|e| PersistError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < CATALOG_LEN_SIZE {
            return Err(PersistError::Open {
                path: path.to_string(),
                reason: "file shorter than the catalog length suffix".into(),
            });
        }

        let (catalog_len, _) = u64::decode_from(&mmap[file_len - CATALOG_LEN_SIZE..])?;
        let catalog_len = usize::try_from(catalog_len).map_err(|_| {
            PersistError::Internal("catalog length exceeds address space".into())
        })?;
        if catalog_len + CATALOG_LEN_SIZE > file_len {
            return Err(PersistError::Open {
                path: path.to_string(),
                reason: format!("catalog length {catalog_len} out of range"),
            });
        }

        let catalog_start = file_len - CATALOG_LEN_SIZE - catalog_len;
        let (entries, _) =
            encoding::decode_vec::<MetaRecord>(&mmap[catalog_start..catalog_start + catalog_len])?;

        let mut catalog = BTreeMap::new();
        for entry in entries {
            catalog.insert(entry.key.clone(), entry);
        }

        debug!(path, records = catalog.len(), "loaded index catalog");

        Ok(Self {
            mmap,
            catalog,
            path: path.to_string(),
        })
    }

    /// All catalog entries, ordered by key.
    pub fn catalog(&self) -> &BTreeMap<String, MetaRecord> {
        &self.catalog
    }

    /// Reads the record stored under `key`.
    ///
    /// A key absent from the catalog yields `Ok(None)` and a warning
    /// (metadata-missing is not an error — queriers return empty results).
    pub fn read_record(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        let Some(meta) = self.catalog.get(key) else {
            warn!(key, path = %self.path, "key not present in index catalog");
            return Ok(None);
        };

        let start = meta.start_bytes as usize;
        let end = start + meta.length as usize;
        if end > self.mmap.len() {
            return Err(PersistError::Internal(format!(
                "catalog entry for {key} addresses bytes past end of file"
            )));
        }
        Ok(Some(self.mmap[start..end].to_vec()))
    }
}

// ------------------------------------------------------------------------------------------------
// KV backend
// ------------------------------------------------------------------------------------------------

/// Handle to a fjall keyspace namespace holding index records.
///
/// Cloning shares the underlying keyspace — a namespace is opened at most
/// once per process (fjall holds a directory lock).
#[derive(Clone)]
pub struct KvStore {
    /// The underlying keyspace.
    keyspace: fjall::Keyspace,

    /// Partition holding all records.
    records: fjall::PartitionHandle,
}

impl KvStore {
    /// Opens a namespace for building: an existing namespace at `path` is
    /// deleted first (indexes are immutable — a rebuild starts clean).
    pub fn open_for_build(path: &str) -> Result<Self, PersistError> {
        if Path::new(path).exists() {
            info!(path, "removing existing KV namespace before rebuild");
            std::fs::remove_dir_all(path)?;
        }
        Self::open(path)
    }

    /// Opens an existing namespace for queries.
    pub fn open_for_query(path: &str) -> Result<Self, PersistError> {
        if !Path::new(path).exists() {
            return Err(PersistError::Open {
                path: path.to_string(),
                reason: "KV namespace does not exist; build the index first".into(),
            });
        }
        Self::open(path)
    }

    fn open(path: &str) -> Result<Self, PersistError> {
        let keyspace = fjall::Config::new(path).open()?;
        let records = keyspace.open_partition(KV_PARTITION, PartitionCreateOptions::default())?;
        Ok(Self { keyspace, records })
    }

    /// Starts a bounded write batch.
    pub fn write_batch(&self) -> KvWriteBatch<'_> {
        KvWriteBatch {
            store: self,
            batch: self.keyspace.batch(),
            pending: 0,
        }
    }

    /// Writes a single record outside any batch.
    pub fn put(&self, key: &str, record: &[u8]) -> Result<(), PersistError> {
        self.records.insert(key, record)?;
        Ok(())
    }

    /// Reads the record stored under `key`.
    ///
    /// Missing keys yield `Ok(None)` plus a warning, mirroring the file
    /// backend's metadata-missing behavior.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        match self.records.get(key)? {
            Some(slice) => Ok(Some(slice.to_vec())),
            None => {
                warn!(key, "key not present in KV index");
                Ok(None)
            }
        }
    }

    /// Forces buffered writes down to disk.
    pub fn persist(&self) -> Result<(), PersistError> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

/// A write batch that self-commits every [`KV_BATCH_LIMIT`] puts to bound
/// its memory footprint, mirroring the original cadence for secondary
/// record floods.
pub struct KvWriteBatch<'a> {
    store: &'a KvStore,
    batch: fjall::Batch,
    pending: usize,
}

impl KvWriteBatch<'_> {
    /// Buffers one record; commits automatically at the batch limit.
    pub fn put(&mut self, key: &str, record: &[u8]) -> Result<(), PersistError> {
        self.batch.insert(&self.store.records, key, record);
        self.pending += 1;
        if self.pending >= KV_BATCH_LIMIT {
            self.flush()?;
        }
        Ok(())
    }

    /// Commits buffered puts and starts a fresh batch.
    fn flush(&mut self) -> Result<(), PersistError> {
        let full = std::mem::replace(&mut self.batch, self.store.keyspace.batch());
        full.commit()?;
        self.pending = 0;
        debug!("KV write batch committed");
        Ok(())
    }

    /// Commits any remaining puts.
    pub fn commit(mut self) -> Result<(), PersistError> {
        if self.pending > 0 {
            self.flush()?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Unified record source
// ------------------------------------------------------------------------------------------------

/// Backend-independent record reader used by the queriers.
pub enum RecordSource {
    /// File backend: one catalog reader per index role.
    File(CatalogReader),
    /// KV backend: shared namespace.
    Kv(KvStore),
}

impl RecordSource {
    /// Opens the primary record source for a save base.
    pub fn open_primary(base: &str, backend: Backend) -> Result<Self, PersistError> {
        match backend {
            Backend::File => Ok(RecordSource::File(CatalogReader::open(&primary_file_path(
                base,
            ))?)),
            Backend::Kv => Ok(RecordSource::Kv(KvStore::open_for_query(
                &kv_namespace_path(base),
            )?)),
        }
    }

    /// Opens the secondary record source belonging to this primary source.
    /// On the KV backend primary and secondary records share one namespace,
    /// so the existing handle is reused (fjall locks the directory).
    pub fn open_secondary_of(
        &self,
        base: &str,
        secondary: &str,
    ) -> Result<Self, PersistError> {
        match self {
            RecordSource::File(_) => Ok(RecordSource::File(CatalogReader::open(
                &secondary_file_path(base, secondary),
            )?)),
            RecordSource::Kv(store) => Ok(RecordSource::Kv(store.clone())),
        }
    }

    /// Reads the record stored under `key`; `Ok(None)` when absent.
    pub fn read_record(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        match self {
            RecordSource::File(reader) => reader.read_record(key),
            RecordSource::Kv(store) => store.get(key),
        }
    }
}
