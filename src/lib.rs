//! # swarmindex
//!
//! Spatial and scalar block indexes for columnar particle-simulation
//! output, with Bloom-filtered particle-id tracing.  For each simulation
//! iteration, particles live as parallel per-axis f64 arrays (x/y/z of
//! position and momentum) plus a u64 identifier array, grouped into the
//! variable-sized blocks the producing simulation emitted.  swarmindex
//! builds per-key summaries of those blocks and answers two query classes:
//!
//! - **Range queries** — which blocks (and finer intra-block slices)
//!   intersect a 1-D interval (MinMax index) or a 3-D bounding box
//!   (R-tree index)?
//! - **Tracing queries** — which blocks *may* contain these particle ids?
//!   Per-subtree Bloom filters prune the search; the answer is a
//!   may-contain set.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       Build pipeline                      │
//! │   ┌──────────┐   batch    ┌────────┐   bounded   ┌─────┐  │
//! │   │ particle │── jobs ──► │ reader │── channel ─►│ N   │  │
//! │   │  store   │            │ thread │             │ wrk │  │
//! │   └──────────┘            └────────┘             └──┬──┘  │
//! │                                                     │     │
//! │            per-key maps under per-map locks  ◄──────┘     │
//! │                      │                                    │
//! │        ┌─────────────┴─────────────┐                      │
//! │        ▼                           ▼                      │
//! │   MinMax lists               STR trees (+ Bloom)          │
//! │        │                           │                      │
//! │        └────────────┬──────────────┘                      │
//! │                     ▼                                     │
//! │     record stream + footer catalog  /  fjall KV           │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | Columnar particle container — variables, block inventories, ranged and deferred reads |
//! | [`pipeline`] | By-block / by-batch build strategies, reader thread, worker pool, sidecar |
//! | [`minmax`] | 1-D min/max index — builder and overlap querier |
//! | [`rtree`] | 3-D STR-tree index — builder, Bloom enrichment, range and tracing queriers |
//! | [`bloom`] | Build/probe/merge membership filters over u64 ids |
//! | [`persist`] | Footer-cataloged record files and the fjall KV backend |
//! | [`encoding`] | Deterministic little-endian wire format for all persisted records |
//! | [`results`] | Query result types shared by both queriers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Mutex;
//! use swarmindex::minmax::{MinMaxBuilder, MinMaxQuery};
//! use swarmindex::persist::Backend;
//! use swarmindex::pipeline::{BuildConfig, BuildDriver, SecondaryIndex};
//! use swarmindex::store::ParticleStore;
//!
//! // Build
//! let store = Mutex::new(ParticleStore::open("diags/it500.swrm").unwrap());
//! let config = BuildConfig {
//!     iteration: 500,
//!     index_base: "diags/it500".into(),
//!     ..BuildConfig::default()
//! };
//! let builder = MinMaxBuilder::new(SecondaryIndex::None, 1000);
//! BuildDriver::new(&store, &config, &builder).run().unwrap();
//! builder.persist(&config.index_base, Backend::File).unwrap();
//!
//! // Query
//! let query = MinMaxQuery::open("diags/it500", Backend::File, SecondaryIndex::None).unwrap();
//! let hits = query
//!     .query("/data/500/particles/electrons/position/x", -1.0e-5, 1.0e-5)
//!     .unwrap();
//! for (block, result) in hits {
//!     println!("block {block}: particles [{}, {})", result.start, result.end);
//! }
//! ```
//!
//! ## Guarantees & non-goals
//!
//! - Indexes are **immutable after write**; a rebuild deletes the previous
//!   file or KV namespace first.
//! - Per-key node order is **non-deterministic** across blocks (workers
//!   race); all query predicates are commutative, so results never depend
//!   on it.
//! - The tracer has **no false negatives** but may have false positives —
//!   callers filter downstream.
//! - One index per iteration; no cross-iteration queries, no distributed
//!   coordination.

#![allow(dead_code)]

pub mod bloom;
pub mod encoding;
pub mod minmax;
pub mod persist;
pub mod pipeline;
pub mod results;
pub mod rtree;
pub mod store;
