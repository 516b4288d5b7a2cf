//! Command-line front-end: `swarmindex build` / `swarmindex query`.
//!
//! Diagnostics go to stderr through `tracing`; query results and phase
//! timings go to stdout.  Unknown index types, secondary types, or
//! backends are configuration errors and exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use swarmindex::minmax::{MinMaxBuilder, MinMaxQuery};
use swarmindex::persist::Backend;
use swarmindex::pipeline::{BuildConfig, BuildDriver, IndexKind, SecondaryIndex};
use swarmindex::rtree::{DEFAULT_LEAF_FANOUT, RTreeBuilder, RTreeQuery};
use swarmindex::store::ParticleStore;

#[derive(Parser)]
#[command(
    name = "swarmindex",
    version,
    about = "Build and query spatial/scalar indexes over particle simulation output"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an index from a particle container.
    Build(BuildArgs),
    /// Query a previously built index.
    Query(QueryArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Input particle container file.
    #[arg(short = 'f', long = "input")]
    input: PathBuf,

    /// Worker threads for index building.
    #[arg(short = 'm', long = "workers", default_value_t = 16)]
    workers: usize,

    /// Reader-thread hint for the upstream store.
    #[arg(short = 'n', long = "reader-threads", default_value_t = 16)]
    reader_threads: usize,

    /// Iteration to index.
    #[arg(long = "iteration", default_value_t = 500)]
    iteration: u64,

    /// Index save base; files become `<base>_<type>.index`.
    #[arg(short = 'i', long = "index-base", default_value = "index")]
    index_base: String,

    /// Blocks per batch-read job; 0 selects by-block mode.
    #[arg(short = 'b', long = "block-batch-size", default_value_t = 10_000)]
    block_batch_size: u64,

    /// Index type: minmax | rtree.
    #[arg(short = 't', long = "index-type", default_value = "minmax")]
    index_type: IndexKind,

    /// Attribute group to index (repeatable); defaults to position and
    /// momentum.
    #[arg(short = 'p', long = "attribute")]
    attributes: Vec<String>,

    /// Species to index.
    #[arg(short = 's', long = "species", default_value = "electrons")]
    species: String,

    /// Storage backend: file | kv.
    #[arg(short = 'd', long = "backend", default_value = "file")]
    backend: Backend,

    /// Secondary index type: none | minmax | rtree.
    #[arg(short = 'x', long = "secondary", default_value = "none")]
    secondary: SecondaryIndex,

    /// Particles per intra-block slice (secondary minmax).
    #[arg(short = 'l', long = "inblock-slice-size", default_value_t = 1000)]
    inblock_slice_size: u64,

    /// Enrich R-trees with Bloom filters for id tracing.
    #[arg(long = "bloom", default_value_t = false)]
    bloom: bool,

    /// STR leaf fan-out for rtree indexes.
    #[arg(long = "leaf-size", default_value_t = DEFAULT_LEAF_FANOUT)]
    leaf_size: usize,
}

#[derive(Args)]
struct QueryArgs {
    /// Index save base used at build time.
    #[arg(short = 'i', long = "index-base", default_value = "index")]
    index_base: String,

    /// Index type: minmax | rtree.
    #[arg(short = 't', long = "index-type", default_value = "minmax")]
    index_type: IndexKind,

    /// Storage backend: file | kv.
    #[arg(short = 'd', long = "backend", default_value = "file")]
    backend: Backend,

    /// Secondary index type the index was built with.
    #[arg(short = 'x', long = "secondary", default_value = "none")]
    secondary: SecondaryIndex,

    /// Key to query, e.g. `/data/500/particles/electrons/position/x`.
    #[arg(short = 'k', long = "key")]
    key: String,

    /// Interval lower bound (minmax).
    #[arg(long = "min")]
    min: Option<f64>,

    /// Interval upper bound (minmax).
    #[arg(long = "max")]
    max: Option<f64>,

    /// Box bounds (rtree).
    #[arg(long = "minx")]
    minx: Option<f64>,
    #[arg(long = "maxx")]
    maxx: Option<f64>,
    #[arg(long = "miny")]
    miny: Option<f64>,
    #[arg(long = "maxy")]
    maxy: Option<f64>,
    #[arg(long = "minz")]
    minz: Option<f64>,
    #[arg(long = "maxz")]
    maxz: Option<f64>,

    /// Particle ids to trace (rtree; comma-separated).
    #[arg(long = "trace", value_delimiter = ',')]
    trace: Vec<u64>,

    /// Intersect position and momentum tracing results.
    #[arg(long = "interacted", default_value_t = false)]
    interacted: bool,

    /// Print the root envelope only (rtree).
    #[arg(long = "root", default_value_t = false)]
    root: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Build(args) => run_build(args),
        Command::Query(args) => run_query(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run_build(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let opened = Instant::now();
    let store = Mutex::new(ParticleStore::open(&args.input)?);
    println!("open: {:?}", opened.elapsed());

    let attributes = if args.attributes.is_empty() {
        vec!["position".into(), "momentum".into()]
    } else {
        args.attributes.clone()
    };

    let config = BuildConfig {
        species: args.species.clone(),
        attributes,
        iteration: args.iteration,
        max_threads: args.workers,
        reader_threads: args.reader_threads,
        block_batch_size: args.block_batch_size,
        index_base: args.index_base.clone(),
    };

    let building = Instant::now();
    match args.index_type {
        IndexKind::MinMax => {
            let builder = MinMaxBuilder::new(args.secondary, args.inblock_slice_size);
            BuildDriver::new(&store, &config, &builder).run()?;
            println!("build: {:?}", building.elapsed());

            let persisting = Instant::now();
            builder.persist(&args.index_base, args.backend)?;
            println!("persist: {:?}", persisting.elapsed());
        }
        IndexKind::Rtree => {
            let builder =
                RTreeBuilder::new(args.leaf_size, args.bloom, args.iteration, &args.species);
            BuildDriver::new(&store, &config, &builder).run()?;
            println!("build: {:?}", building.elapsed());

            let persisting = Instant::now();
            builder.persist(Some(&store), &args.index_base, args.backend)?;
            println!("persist: {:?}", persisting.elapsed());
        }
    }
    Ok(())
}

fn run_query(args: QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let unbounded = |v: Option<f64>, sign: f64| v.unwrap_or(sign * f64::INFINITY);

    match args.index_type {
        IndexKind::MinMax => {
            let query = MinMaxQuery::open(&args.index_base, args.backend, args.secondary)?;
            let results = query.query(
                &args.key,
                unbounded(args.min, -1.0),
                unbounded(args.max, 1.0),
            )?;
            for (block, hit) in &results {
                println!("block {block}: particles [{}, {})", hit.start, hit.end);
                for (slice, range) in &hit.sub_slices {
                    println!("  slice {slice}: [{}, {})", range.start, range.end);
                }
            }
            println!("{} block(s) matched", results.len());
        }
        IndexKind::Rtree => {
            let query = RTreeQuery::open(&args.index_base, args.backend, args.secondary)?;

            if args.root {
                match query.metadata_root(&args.key)? {
                    Some(root) => println!(
                        "root: x [{}, {}] y [{}, {}] z [{}, {}] particles [{}, {})",
                        root.minx,
                        root.maxx,
                        root.miny,
                        root.maxy,
                        root.minz,
                        root.maxz,
                        root.start,
                        root.end
                    ),
                    None => println!("no tree for key"),
                }
                return Ok(());
            }

            if !args.trace.is_empty() {
                let results = if args.interacted {
                    query.trace_interacted(&args.key, &args.trace)?
                } else {
                    query.trace(&args.key, &args.trace)?
                };
                for (block, hit) in &results {
                    println!(
                        "block {block}: particles [{}, {}) ids {:?}",
                        hit.start, hit.end, hit.ids
                    );
                }
                println!("{} block(s) may contain the ids", results.len());
                return Ok(());
            }

            let results = query.query_xyz(
                &args.key,
                unbounded(args.minx, -1.0),
                unbounded(args.maxx, 1.0),
                unbounded(args.miny, -1.0),
                unbounded(args.maxy, 1.0),
                unbounded(args.minz, -1.0),
                unbounded(args.maxz, 1.0),
            )?;
            for (block, hit) in &results {
                println!("block {block}: particles [{}, {})", hit.start, hit.end);
                for (slice, range) in &hit.sub_slices {
                    println!("  slice {slice}: [{}, {})", range.start, range.end);
                }
            }
            println!("{} block(s) matched", results.len());
        }
    }
    Ok(())
}
