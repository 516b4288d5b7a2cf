#[cfg(test)]
mod tests {
    use crate::pipeline::BuildDriver;
    use crate::pipeline::tests::helpers::*;
    use crate::store::{ParticleStore, StoreWriter};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_by_block_processes_all_blocks_in_order() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        write_store(&store_path);

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 0);
        let processor = CollectingProcessor::default();

        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        let blocks = processor.blocks.lock().unwrap();
        assert_eq!(blocks.len(), 3);
        // Inline mode follows inventory order.
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[1].start, 3);
        assert_eq!(blocks[2].start, 5);
        assert_eq!(blocks[0].x, vec![1.0, 2.0, 3.0]);
        assert_eq!(blocks[0].y, vec![11.0, 12.0, 13.0]);
        assert_eq!(blocks[2].z, vec![26.0, 27.0, 28.0, 29.0]);
        assert_eq!(blocks[1].key, POS);
        assert_eq!(blocks[1].count, 2);
    }

    #[test]
    fn test_by_block_writes_no_sidecar() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        write_store(&store_path);

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 0);
        let processor = CollectingProcessor::default();
        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        assert!(!tmp.path().join("idx.blockmeta").exists());
    }

    #[test]
    fn test_species_filter_excludes_other_species() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        {
            let mut writer = StoreWriter::create(&store_path).unwrap();
            for axis in ["x", "y", "z"] {
                writer
                    .append_f64_block(
                        &format!("/data/7/particles/protons/position/{axis}"),
                        0,
                        &[1.0],
                    )
                    .unwrap();
            }
            writer.finish().unwrap();
        }

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 0);
        let processor = CollectingProcessor::default();
        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        assert!(processor.blocks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_iteration_filter_excludes_other_iterations() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        {
            let mut writer = StoreWriter::create(&store_path).unwrap();
            for axis in ["x", "y", "z"] {
                writer
                    .append_f64_block(
                        &format!("/data/70/particles/electrons/position/{axis}"),
                        0,
                        &[1.0],
                    )
                    .unwrap();
            }
            writer.finish().unwrap();
        }

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 0); // iteration 7 must not match /70/
        let processor = CollectingProcessor::default();
        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        assert!(processor.blocks.lock().unwrap().is_empty());
    }
}
