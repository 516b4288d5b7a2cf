use std::sync::Mutex;

use crate::pipeline::{BlockData, BlockProcessor, BuildConfig, PipelineError};
use crate::store::StoreWriter;
use tempfile::TempDir;

/// Base position key used by the pipeline tests.
pub const POS: &str = "/data/7/particles/electrons/position/";

/// Records every processed block for inspection.
#[derive(Default)]
pub struct CollectingProcessor {
    pub blocks: Mutex<Vec<BlockData>>,
}

impl BlockProcessor for CollectingProcessor {
    fn process_block(&self, block: BlockData) -> Result<(), PipelineError> {
        self.blocks
            .lock()
            .map_err(|_| PipelineError::Internal("test lock poisoned".into()))?
            .push(block);
        Ok(())
    }
}

/// Three position blocks of sizes 3, 2, 4 with distinguishable values:
/// x counts up from 1.0, y = x + 10, z = x + 20.
pub fn write_store(path: &std::path::Path) {
    let mut writer = StoreWriter::create(path).unwrap();
    let blocks: [(u64, Vec<f64>); 3] = [
        (0, vec![1.0, 2.0, 3.0]),
        (3, vec![4.0, 5.0]),
        (5, vec![6.0, 7.0, 8.0, 9.0]),
    ];
    for (start, xs) in &blocks {
        writer
            .append_f64_block(&format!("{POS}x"), *start, xs)
            .unwrap();
        let ys: Vec<f64> = xs.iter().map(|v| v + 10.0).collect();
        let zs: Vec<f64> = xs.iter().map(|v| v + 20.0).collect();
        writer
            .append_f64_block(&format!("{POS}y"), *start, &ys)
            .unwrap();
        writer
            .append_f64_block(&format!("{POS}z"), *start, &zs)
            .unwrap();
    }
    writer.finish().unwrap();
}

/// Build config over the temp dir with the given batch size.
pub fn config(tmp: &TempDir, batch: u64) -> BuildConfig {
    BuildConfig {
        species: "electrons".into(),
        attributes: vec!["position".into(), "momentum".into()],
        iteration: 7,
        max_threads: 4,
        reader_threads: 1,
        block_batch_size: batch,
        index_base: tmp.path().join("idx").to_str().unwrap().to_string(),
    }
}
