//! Bloom filters over 64-bit particle identifiers.
//!
//! Tracing queries walk an R-tree whose envelopes carry one filter per
//! subtree; a filter answering "definitely absent" prunes the whole subtree.
//! This module implements the **build / probe / merge** primitive those
//! queries rely on.
//!
//! ## Serialized form
//!
//! ```text
//! [bit bytes ...][k: 1 byte]
//! ```
//!
//! The probe count `k` travels inside the filter, so probing needs no
//! out-of-band parameters.  A **zero-length** filter is the *accept-all*
//! filter: probing it always answers *may contain*.  Unenriched tree nodes
//! persist an empty payload, and tracing through them stays sound.
//!
//! ## Parameters
//!
//! Construction takes `bits_per_key` and a size cap `max_size_bits`:
//!
//! - `k = clamp(⌊bits_per_key · ln 2⌋, 1, 30)`
//! - allocated bits = `min(bits_per_key · n, max_size_bits)`, rounded up to
//!   a whole byte
//!
//! ## Probing
//!
//! Double hashing in the fjall style: two xxh3 hashes of the id's
//! little-endian bytes seed a probe sequence of `k` bit positions.  Probing
//! a bit that is unset means *definitely absent*; all `k` bits set means
//! *probably present*.
//!
//! ## Merging
//!
//! Two filters of equal bit length merge by bitwise OR; the merged filter
//! accepts every id either input accepted.  Merging anything with the
//! accept-all filter yields the accept-all filter.

#[cfg(test)]
mod tests;

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64_with_seed;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default cap on a single filter's bit count (10⁹ bits = 125 MB).
pub const MAX_FILTER_BITS: u64 = 1_000_000_000;

/// Lower clamp for the probe count.
const MIN_PROBES: u32 = 1;

/// Upper clamp for the probe count.
const MAX_PROBES: u32 = 30;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by filter operations.
#[derive(Debug, Error)]
pub enum BloomError {
    /// Two filters of different bit lengths cannot be merged.
    #[error("cannot merge filters of different lengths ({left} vs {right} bytes)")]
    LengthMismatch {
        /// Byte length of the left-hand filter.
        left: usize,
        /// Byte length of the right-hand filter.
        right: usize,
    },

    /// Two filters with different probe counts cannot be merged.
    #[error("cannot merge filters with different probe counts ({left} vs {right})")]
    ProbeCountMismatch {
        /// Probe count of the left-hand filter.
        left: u8,
        /// Probe count of the right-hand filter.
        right: u8,
    },
}

// ------------------------------------------------------------------------------------------------
// Policy — sizing parameters
// ------------------------------------------------------------------------------------------------

/// Sizing policy for filter construction.
///
/// The tree builder constructs one policy per tree level; shallower nodes
/// get more bits per key, widening their filters.
#[derive(Debug, Clone, Copy)]
pub struct BloomPolicy {
    /// Bits allocated per inserted id before the size cap.
    bits_per_key: u32,

    /// Hard cap on the allocated bit count.
    max_size_bits: u64,

    /// Derived probe count: `clamp(⌊bits_per_key · ln 2⌋, 1, 30)`.
    k: u32,
}

impl BloomPolicy {
    /// Creates a policy with the given per-key budget and size cap.
    pub fn new(bits_per_key: u32, max_size_bits: u64) -> Self {
        let k = ((f64::from(bits_per_key) * std::f64::consts::LN_2) as u32)
            .clamp(MIN_PROBES, MAX_PROBES);
        Self {
            bits_per_key,
            max_size_bits,
            k,
        }
    }

    /// The derived probe count.
    pub fn probes(&self) -> u32 {
        self.k
    }

    /// Builds a filter over `ids` (duplicates are harmless).
    ///
    /// An empty `ids` slice produces the accept-all filter.
    pub fn build(&self, ids: &[u64]) -> BloomFilter {
        if ids.is_empty() {
            return BloomFilter::accept_all();
        }

        let wanted_bits = (ids.len() as u64).saturating_mul(u64::from(self.bits_per_key));
        let bits = wanted_bits.min(self.max_size_bits).max(8);
        let byte_len = bits.div_ceil(8) as usize;
        let bit_count = (byte_len * 8) as u64;

        let mut bytes = vec![0u8; byte_len + 1];
        bytes[byte_len] = self.k as u8;

        for &id in ids {
            let (mut h1, mut h2) = id_hash(id);
            for i in 1..=u64::from(self.k) {
                let idx = (h1 % bit_count) as usize;
                bytes[idx / 8] |= 1 << (idx % 8);
                h1 = h1.wrapping_add(h2);
                h2 = h2.wrapping_mul(i);
            }
        }

        BloomFilter { bytes }
    }
}

// ------------------------------------------------------------------------------------------------
// Filter
// ------------------------------------------------------------------------------------------------

/// An immutable membership filter over u64 ids.
///
/// Probing never yields a false negative for an id the filter was built
/// over; false positives occur with a probability governed by the policy's
/// `bits_per_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Bit bytes followed by the trailing probe-count byte; empty for the
    /// accept-all filter.
    bytes: Vec<u8>,
}

impl BloomFilter {
    /// The accept-all filter: zero bytes, every probe answers *may contain*.
    pub fn accept_all() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Wraps previously serialized filter bytes.
    ///
    /// A payload shorter than 2 bytes cannot hold bit bytes plus the probe
    /// count and is treated as accept-all.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.len() < 2 {
            return Self::accept_all();
        }
        Self { bytes }
    }

    /// The serialized payload (empty for accept-all).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the filter, returning its serialized payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// True if this is the accept-all filter.
    pub fn is_accept_all(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Probes the filter: `false` ⇒ definitely absent, `true` ⇒ probably
    /// present.
    pub fn may_contain(&self, id: u64) -> bool {
        BloomFilter::probe_bytes(&self.bytes, id)
    }

    /// Probes serialized filter bytes in place, without wrapping them.
    ///
    /// Tree traversals call this against the bloom payload of a borrowed
    /// envelope.  A payload too short to be a filter (including the empty
    /// accept-all payload) answers *may contain*.
    pub fn probe_bytes(bytes: &[u8], id: u64) -> bool {
        if bytes.len() < 2 {
            return true;
        }

        let byte_len = bytes.len() - 1;
        let k = u64::from(bytes[byte_len]);
        let bit_count = (byte_len * 8) as u64;

        let (mut h1, mut h2) = id_hash(id);
        for i in 1..=k {
            let idx = (h1 % bit_count) as usize;
            if bytes[idx / 8] & (1 << (idx % 8)) == 0 {
                return false;
            }
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }
        true
    }

    /// Merges `other` into `self` by bitwise OR.
    ///
    /// Both filters must have equal byte length and probe count; merging
    /// with accept-all (either side) yields accept-all.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<(), BloomError> {
        if self.is_accept_all() {
            return Ok(());
        }
        if other.is_accept_all() {
            self.bytes.clear();
            return Ok(());
        }
        if self.bytes.len() != other.bytes.len() {
            return Err(BloomError::LengthMismatch {
                left: self.bytes.len(),
                right: other.bytes.len(),
            });
        }

        let k_at = self.bytes.len() - 1;
        if self.bytes[k_at] != other.bytes[k_at] {
            return Err(BloomError::ProbeCountMismatch {
                left: self.bytes[k_at],
                right: other.bytes[k_at],
            });
        }

        for (dst, src) in self.bytes[..k_at].iter_mut().zip(&other.bytes[..k_at]) {
            *dst |= src;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Hashing
// ------------------------------------------------------------------------------------------------

/// Two xxh3 hashes of the id's little-endian bytes, feeding the double-
/// hashing probe sequence.
#[inline]
fn id_hash(id: u64) -> (u64, u64) {
    let bytes = id.to_le_bytes();
    let h1 = xxh3_64_with_seed(&bytes, 0);
    let h2 = xxh3_64_with_seed(&bytes, h1);
    (h1, h2)
}
