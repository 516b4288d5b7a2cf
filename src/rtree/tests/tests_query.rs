#[cfg(test)]
mod tests {
    use crate::persist::Backend;
    use crate::pipeline::{BlockData, BlockProcessor, SecondaryIndex};
    use crate::rtree::{RTreeBuilder, RTreeQuery};
    use tempfile::TempDir;

    const KEY: &str = "/data/1/particles/e/position/";

    /// Two well-separated blocks: coords around 0–1 for [0,10) and 5–6 for
    /// [10,20).
    fn two_block_builder() -> RTreeBuilder {
        let builder = RTreeBuilder::new(10, false, 1, "e");
        let spread = |lo: f64, n: usize| -> Vec<f64> {
            (0..n).map(|i| lo + i as f64 / n as f64).collect()
        };
        builder
            .process_block(BlockData {
                x: spread(0.0, 10),
                y: spread(0.0, 10),
                z: spread(0.0, 10),
                start: 0,
                count: 10,
                key: KEY.to_string(),
            })
            .unwrap();
        builder
            .process_block(BlockData {
                x: spread(5.0, 10),
                y: spread(5.0, 10),
                z: spread(5.0, 10),
                start: 10,
                count: 10,
                key: KEY.to_string(),
            })
            .unwrap();
        builder
    }

    #[test]
    fn test_envelope_query_hits_one_block() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::File)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let results = query
            .query_xyz(KEY, 0.5, 0.6, 0.5, 0.6, 0.5, 0.6)
            .unwrap();

        assert_eq!(results.len(), 1);
        let hit = &results["0"];
        assert_eq!((hit.start, hit.end), (0, 10));
        assert!(hit.sub_slices.is_empty());
    }

    #[test]
    fn test_envelope_query_outside_both_blocks() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::File)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let results = query
            .query_xyz(KEY, 2.0, 3.0, 2.0, 3.0, 2.0, 3.0)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_infinite_probe_returns_all_blocks() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::File)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let results = query
            .query_xyz(
                KEY,
                f64::NEG_INFINITY,
                f64::INFINITY,
                f64::NEG_INFINITY,
                f64::INFINITY,
                f64::NEG_INFINITY,
                f64::INFINITY,
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.contains_key("0") && results.contains_key("10"));
    }

    #[test]
    fn test_metadata_returns_all_leaf_envelopes() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::File)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let mut leaves = query.metadata(KEY).unwrap();
        leaves.sort_by_key(|e| e.start);

        assert_eq!(leaves.len(), 2);
        assert_eq!((leaves[0].start, leaves[0].end), (0, 10));
        assert_eq!((leaves[1].start, leaves[1].end), (10, 20));
    }

    #[test]
    fn test_metadata_root_spans_everything() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::File)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let root = query.metadata_root(KEY).unwrap().unwrap();

        assert_eq!((root.start, root.end), (0, 20));
        assert!(root.minx <= 0.0 && root.maxx >= 5.9);
    }

    #[test]
    fn test_missing_key_yields_empty_results() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::File)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        assert!(query
            .query_xyz("/absent/", 0.0, 1.0, 0.0, 1.0, 0.0, 1.0)
            .unwrap()
            .is_empty());
        assert!(query.metadata("/absent/").unwrap().is_empty());
        assert!(query.metadata_root("/absent/").unwrap().is_none());
        assert!(query.trace("/absent/", &[1, 2]).unwrap().is_empty());
    }

    #[test]
    fn test_query_on_kv_backend() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        two_block_builder()
            .persist(None, &base, Backend::Kv)
            .unwrap();

        let query = RTreeQuery::open(&base, Backend::Kv, SecondaryIndex::None).unwrap();
        let results = query
            .query_xyz(KEY, 5.5, 5.6, 5.5, 5.6, 5.5, 5.6)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["10"].start, 10);
    }
}
