#[cfg(test)]
mod tests {
    use crate::pipeline::BuildDriver;
    use crate::pipeline::tests::helpers::*;
    use crate::store::ParticleStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_by_batch_processes_every_block() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        write_store(&store_path);

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 2); // 3 blocks → batches of 2 + 1
        let processor = CollectingProcessor::default();

        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        let mut blocks = processor.blocks.lock().unwrap().clone();
        // Workers consume in arbitrary order; sort for comparison.
        blocks.sort_by_key(|b| b.start);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].x, vec![1.0, 2.0, 3.0]);
        assert_eq!(blocks[1].x, vec![4.0, 5.0]);
        assert_eq!(blocks[1].y, vec![14.0, 15.0]);
        assert_eq!(blocks[2].x, vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(blocks[2].z, vec![26.0, 27.0, 28.0, 29.0]);
    }

    #[test]
    fn test_by_batch_matches_by_block_output() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        write_store(&store_path);

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());

        let inline = CollectingProcessor::default();
        BuildDriver::new(&store, &config(&tmp, 0), &inline)
            .run()
            .unwrap();

        let piped = CollectingProcessor::default();
        BuildDriver::new(&store, &config(&tmp, 2), &piped)
            .run()
            .unwrap();

        let mut a: Vec<_> = inline
            .blocks
            .lock()
            .unwrap()
            .iter()
            .map(|b| (b.start, b.count, b.x.clone(), b.y.clone(), b.z.clone()))
            .collect();
        let mut b: Vec<_> = piped
            .blocks
            .lock()
            .unwrap()
            .iter()
            .map(|b| (b.start, b.count, b.x.clone(), b.y.clone(), b.z.clone()))
            .collect();
        a.sort_by_key(|t| t.0);
        b.sort_by_key(|t| t.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_blockmeta_sidecar_rows_in_reader_order() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        write_store(&store_path);

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 2);
        let processor = CollectingProcessor::default();
        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        let sidecar = tmp.path().join("idx.blockmeta");
        let contents = std::fs::read_to_string(&sidecar).unwrap();
        assert_eq!(contents, "7,0,3\n7,3,2\n7,5,4\n");
    }

    #[test]
    fn test_single_batch_covers_whole_inventory() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("it7.swrm");
        write_store(&store_path);

        let store = Mutex::new(ParticleStore::open(&store_path).unwrap());
        let cfg = config(&tmp, 10_000);
        let processor = CollectingProcessor::default();
        BuildDriver::new(&store, &cfg, &processor).run().unwrap();

        assert_eq!(processor.blocks.lock().unwrap().len(), 3);
    }
}
