//! Container writer.
//!
//! [`StoreWriter`] produces the single-file columnar layout described in the
//! module docs: header, per-block payload appends, then a CRC-protected TOC
//! and the trailing TOC length.  Blocks must be appended per variable in
//! ascending particle order — the order the simulation emitted them.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::encoding;
use crc32fast::Hasher as Crc32;
use tracing::info;

use super::{BlockSpan, Dtype, STORE_MAGIC, STORE_VERSION, StoreError, VariableMeta};

/// Streaming writer for a particle container file.
///
/// ```rust,no_run
/// use swarmindex::store::StoreWriter;
///
/// let mut writer = StoreWriter::create("iteration-500.swrm").unwrap();
/// writer
///     .append_f64_block("/data/500/particles/electrons/position/x", 0, &[1.0, 2.0, 3.0])
///     .unwrap();
/// writer
///     .append_u64_block("/data/500/particles/electrons/id", 0, &[10, 11, 12])
///     .unwrap();
/// writer.finish().unwrap();
/// ```
pub struct StoreWriter {
    /// Buffered output file.
    out: BufWriter<File>,

    /// Byte offset of the next payload write.
    cursor: u64,

    /// TOC entries accumulated so far, in first-append order.
    variables: Vec<VariableMeta>,

    /// Path kept for diagnostics.
    path: String,
}

impl StoreWriter {
    /// Creates (truncating) a container file and writes the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&STORE_MAGIC)?;
        out.write_all(&STORE_VERSION.to_le_bytes())?;
        Ok(Self {
            out,
            cursor: (STORE_MAGIC.len() + 4) as u64,
            variables: Vec::new(),
            path: path.as_ref().display().to_string(),
        })
    }

    /// Appends one f64 block to `key`, covering particles
    /// `[start, start + data.len())`.
    pub fn append_f64_block(
        &mut self,
        key: &str,
        start: u64,
        data: &[f64],
    ) -> Result<(), StoreError> {
        let offset = self.cursor;
        for value in data {
            self.out.write_all(&value.to_le_bytes())?;
        }
        self.cursor += (data.len() * 8) as u64;
        self.record_block(key, Dtype::F64, start, data.len() as u64, offset)
    }

    /// Appends one u64 block to `key`, covering particles
    /// `[start, start + data.len())`.
    pub fn append_u64_block(
        &mut self,
        key: &str,
        start: u64,
        data: &[u64],
    ) -> Result<(), StoreError> {
        let offset = self.cursor;
        for value in data {
            self.out.write_all(&value.to_le_bytes())?;
        }
        self.cursor += (data.len() * 8) as u64;
        self.record_block(key, Dtype::U64, start, data.len() as u64, offset)
    }

    /// Writes the TOC, its CRC32, and the trailing TOC length, then flushes.
    pub fn finish(mut self) -> Result<(), StoreError> {
        let mut toc = Vec::new();
        encoding::encode_vec(&self.variables, &mut toc)?;

        let mut hasher = Crc32::new();
        hasher.update(&toc);
        let crc = hasher.finalize();

        self.out.write_all(&toc)?;
        self.out.write_all(&crc.to_le_bytes())?;
        self.out.write_all(&(toc.len() as u64).to_le_bytes())?;
        self.out.flush()?;

        info!(
            path = %self.path,
            variables = self.variables.len(),
            "particle store written"
        );
        Ok(())
    }

    fn record_block(
        &mut self,
        key: &str,
        dtype: Dtype,
        start: u64,
        count: u64,
        offset: u64,
    ) -> Result<(), StoreError> {
        let span = BlockSpan {
            start,
            count,
            offset,
        };
        match self.variables.iter_mut().find(|v| v.key == key) {
            Some(meta) => {
                if meta.dtype != dtype {
                    return Err(StoreError::DtypeMismatch {
                        key: key.to_string(),
                        expected: meta.dtype,
                        actual: dtype,
                    });
                }
                meta.blocks.push(span);
            }
            None => self.variables.push(VariableMeta {
                key: key.to_string(),
                dtype,
                blocks: vec![span],
            }),
        }
        Ok(())
    }
}
