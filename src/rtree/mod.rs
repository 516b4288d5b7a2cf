//! R-tree Index
//!
//! The 3-D index variety: per block one axis-aligned bounding envelope over
//! the x/y/z arrays, bulk-loaded into a **Sort-Tile-Recursive (STR)** tree
//! with configurable leaf fan-out.  Envelope queries descend the tree with
//! early pruning; identifier tracing descends it guided by per-subtree
//! Bloom filters.
//!
//! ## Tree shape
//!
//! The tree is an owned structure of child vectors — parent→child edges
//! only, no back pointers.  Leaves sit at level 0 and carry the block
//! envelopes; internal levels increase toward the root, and every internal
//! node's envelope is the tight union of its children's (coordinates and
//! particle range alike).
//!
//! ## Serialization
//!
//! Depth-first **pre-order**: each node emits
//! `(level, child_count, minx..maxz, start, end, bloom bytes)`;
//! deserialization reads a node and recurses `child_count` times.
//! The round-trip is structurally exact.
//!
//! # Sub-modules
//!
//! - [`build`] — [`RTreeBuilder`], the pipeline's block processor, with
//!   optional Bloom enrichment for tracing.
//! - [`query`] — [`RTreeQuery`]: envelope ranges, metadata readers,
//!   tracing.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod build;
pub mod query;

#[cfg(test)]
mod tests;

pub use build::RTreeBuilder;
pub use query::RTreeQuery;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default STR leaf fan-out.
pub const DEFAULT_LEAF_FANOUT: usize = 10;

// ------------------------------------------------------------------------------------------------
// Envelope3d
// ------------------------------------------------------------------------------------------------

/// Axis-aligned 3-D bounding box with particle-range endpoints and an
/// optional serialized Bloom filter over the ids of the subtree it bounds.
///
/// Invariants: `min* ≤ max*` per axis and `start < end` for every envelope
/// produced from a block; internal envelopes contain their children.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope3d {
    /// Smallest x value.
    pub minx: f64,
    /// Largest x value.
    pub maxx: f64,
    /// Smallest y value.
    pub miny: f64,
    /// Largest y value.
    pub maxy: f64,
    /// Smallest z value.
    pub minz: f64,
    /// Largest z value.
    pub maxz: f64,

    /// First particle covered.
    pub start: u64,

    /// One past the last particle covered.
    pub end: u64,

    /// Serialized Bloom filter of the subtree's ids; empty when the node
    /// was never enriched (empty probes as accept-all).
    pub bloom: Vec<u8>,
}

impl Envelope3d {
    /// Bounding envelope of one block's axis arrays.
    pub fn from_block(x: &[f64], y: &[f64], z: &[f64], start: u64, end: u64) -> Self {
        let fold = |data: &[f64]| {
            data.iter().copied().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), v| (lo.min(v), hi.max(v)),
            )
        };
        let (minx, maxx) = fold(x);
        let (miny, maxy) = fold(y);
        let (minz, maxz) = fold(z);
        Self {
            minx,
            maxx,
            miny,
            maxy,
            minz,
            maxz,
            start,
            end,
            bloom: Vec::new(),
        }
    }

    /// A probe envelope for queries.  Each axis pair is normalised so that
    /// swapped (or inverted-infinite) bounds still describe the intended
    /// range — an all-infinite probe matches everything.
    pub fn probe(minx: f64, maxx: f64, miny: f64, maxy: f64, minz: f64, maxz: f64) -> Self {
        let norm = |a: f64, b: f64| if a <= b { (a, b) } else { (b, a) };
        let (minx, maxx) = norm(minx, maxx);
        let (miny, maxy) = norm(miny, maxy);
        let (minz, maxz) = norm(minz, maxz);
        Self {
            minx,
            maxx,
            miny,
            maxy,
            minz,
            maxz,
            start: 0,
            end: 0,
            bloom: Vec::new(),
        }
    }

    /// A probe spanning the whole coordinate space.
    pub fn infinite() -> Self {
        Self::probe(
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
        )
    }

    /// Closed-interval intersection test on the coordinate axes.
    pub fn intersects(&self, other: &Envelope3d) -> bool {
        self.minx <= other.maxx
            && self.maxx >= other.minx
            && self.miny <= other.maxy
            && self.maxy >= other.miny
            && self.minz <= other.maxz
            && self.maxz >= other.minz
    }

    /// Expands this envelope to tightly include `other`, in coordinates
    /// and particle range.
    fn expand_to_include(&mut self, other: &Envelope3d) {
        self.minx = self.minx.min(other.minx);
        self.maxx = self.maxx.max(other.maxx);
        self.miny = self.miny.min(other.miny);
        self.maxy = self.maxy.max(other.maxy);
        self.minz = self.minz.min(other.minz);
        self.maxz = self.maxz.max(other.maxz);
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }

    fn center_x(&self) -> f64 {
        (self.minx + self.maxx) / 2.0
    }

    fn center_y(&self) -> f64 {
        (self.miny + self.maxy) / 2.0
    }

    fn center_z(&self) -> f64 {
        (self.minz + self.maxz) / 2.0
    }
}

// ------------------------------------------------------------------------------------------------
// StrNode — the in-memory tree
// ------------------------------------------------------------------------------------------------

/// One node of a bulk-loaded STR tree.
#[derive(Debug, Clone, PartialEq)]
pub struct StrNode {
    /// 0 for leaves, increasing toward the root.
    pub level: u32,

    /// Bounds of this node's subtree.
    pub envelope: Envelope3d,

    /// Child nodes; empty for leaves.
    pub children: Vec<StrNode>,
}

impl StrNode {
    /// True for block-carrying leaves.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// STR bulk load
// ------------------------------------------------------------------------------------------------

/// Bulk-loads an STR tree over block envelopes with the given leaf
/// fan-out.  Returns `None` for an empty envelope list; a single envelope
/// yields a root that is itself a leaf.
pub fn bulk_load(envelopes: Vec<Envelope3d>, fanout: usize) -> Option<StrNode> {
    let fanout = fanout.max(2);
    let mut nodes: Vec<StrNode> = envelopes
        .into_iter()
        .map(|envelope| StrNode {
            level: 0,
            envelope,
            children: Vec::new(),
        })
        .collect();

    let mut level = 0u32;
    while nodes.len() > 1 {
        level += 1;
        nodes = pack_level(nodes, fanout, level);
    }
    nodes.pop()
}

/// Packs one tree level: sort by x center, tile into vertical slabs, sort
/// each slab by y, tile into runs, sort each run by z, and group runs into
/// parents of up to `fanout` children.
fn pack_level(mut nodes: Vec<StrNode>, fanout: usize, level: u32) -> Vec<StrNode> {
    let group_count = nodes.len().div_ceil(fanout);
    let slab_count = (group_count as f64).cbrt().ceil() as usize;
    let slab_len = nodes.len().div_ceil(slab_count.max(1));

    sort_by_center(&mut nodes, Envelope3d::center_x);

    let mut parents = Vec::with_capacity(group_count);
    let mut rest = nodes;
    while !rest.is_empty() {
        let mut slab: Vec<StrNode> = rest.drain(..slab_len.min(rest.len())).collect();

        let slab_groups = slab.len().div_ceil(fanout);
        let run_count = (slab_groups as f64).sqrt().ceil() as usize;
        let run_len = slab.len().div_ceil(run_count.max(1));

        sort_by_center(&mut slab, Envelope3d::center_y);

        while !slab.is_empty() {
            let mut run: Vec<StrNode> = slab.drain(..run_len.min(slab.len())).collect();
            sort_by_center(&mut run, Envelope3d::center_z);

            while !run.is_empty() {
                let children: Vec<StrNode> = run.drain(..fanout.min(run.len())).collect();
                parents.push(make_parent(children, level));
            }
        }
    }
    parents
}

fn make_parent(children: Vec<StrNode>, level: u32) -> StrNode {
    let mut envelope = children[0].envelope.clone();
    envelope.bloom = Vec::new();
    for child in &children[1..] {
        envelope.expand_to_include(&child.envelope);
    }
    StrNode {
        level,
        envelope,
        children,
    }
}

fn sort_by_center(nodes: &mut [StrNode], center: fn(&Envelope3d) -> f64) {
    nodes.sort_by(|a, b| {
        center(&a.envelope)
            .partial_cmp(&center(&b.envelope))
            .unwrap_or(Ordering::Equal)
    });
}

// ------------------------------------------------------------------------------------------------
// Serialization — pre-order node records
// ------------------------------------------------------------------------------------------------

/// Serialized form of one tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Node level; leaves are 0.
    pub level: u32,

    /// Number of direct children following this node in pre-order.
    pub child_count: u32,

    /// Node bounds, including the bloom payload.
    pub envelope: Envelope3d,
}

impl Encode for TreeNode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.level.encode_to(buf)?;
        self.child_count.encode_to(buf)?;
        self.envelope.minx.encode_to(buf)?;
        self.envelope.maxx.encode_to(buf)?;
        self.envelope.miny.encode_to(buf)?;
        self.envelope.maxy.encode_to(buf)?;
        self.envelope.minz.encode_to(buf)?;
        self.envelope.maxz.encode_to(buf)?;
        self.envelope.start.encode_to(buf)?;
        self.envelope.end.encode_to(buf)?;
        self.envelope.bloom.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TreeNode {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (level, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (child_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (minx, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (maxx, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (miny, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (maxy, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (minz, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (maxz, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (start, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (end, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (bloom, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                level,
                child_count,
                envelope: Envelope3d {
                    minx,
                    maxx,
                    miny,
                    maxy,
                    minz,
                    maxz,
                    start,
                    end,
                    bloom,
                },
            },
            off,
        ))
    }
}

/// Serializes a tree into one persisted record (pre-order node list).
pub fn encode_tree(root: &StrNode) -> Result<Vec<u8>, EncodingError> {
    let mut flat = Vec::new();
    flatten(root, &mut flat);
    let mut buf = Vec::new();
    encoding::encode_vec(&flat, &mut buf)?;
    Ok(buf)
}

fn flatten(node: &StrNode, out: &mut Vec<TreeNode>) {
    out.push(TreeNode {
        level: node.level,
        child_count: node.children.len() as u32,
        envelope: node.envelope.clone(),
    });
    for child in &node.children {
        flatten(child, out);
    }
}

/// Decodes one persisted record back into a tree.  An empty node list
/// yields `None`.
pub fn decode_tree(bytes: &[u8]) -> Result<Option<StrNode>, EncodingError> {
    let (flat, _) = encoding::decode_vec::<TreeNode>(bytes)?;
    if flat.is_empty() {
        return Ok(None);
    }
    let mut seq = 0usize;
    let root = rebuild(&flat, &mut seq)?;
    Ok(Some(root))
}

fn rebuild(flat: &[TreeNode], seq: &mut usize) -> Result<StrNode, EncodingError> {
    let record = flat
        .get(*seq)
        .ok_or_else(|| EncodingError::Custom("truncated tree record".into()))?;
    *seq += 1;

    let mut node = StrNode {
        level: record.level,
        envelope: record.envelope.clone(),
        children: Vec::with_capacity(record.child_count as usize),
    };
    for _ in 0..record.child_count {
        node.children.push(rebuild(flat, seq)?);
    }
    Ok(node)
}
