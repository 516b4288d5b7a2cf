#[cfg(test)]
mod tests {
    use crate::minmax::{MinMaxBuilder, MinMaxQuery};
    use crate::persist::Backend;
    use crate::pipeline::{BlockData, BlockProcessor, SecondaryIndex};
    use tempfile::TempDir;

    const KEY: &str = "/k/";

    fn one_block_builder(secondary: SecondaryIndex, slice: u64) -> MinMaxBuilder {
        let builder = MinMaxBuilder::new(secondary, slice);
        builder
            .process_block(BlockData {
                x: vec![1.0, 2.0, 3.0],
                y: vec![1.0, 2.0, 3.0],
                z: vec![1.0, 2.0, 3.0],
                start: 0,
                count: 3,
                key: KEY.to_string(),
            })
            .unwrap();
        builder
    }

    #[test]
    fn test_single_block_overlap() {
        // Build from one block with x ∈ {1, 2, 3}; query (1.5, 2.5) hits it.
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        one_block_builder(SecondaryIndex::None, 100)
            .persist(&base, Backend::File)
            .unwrap();

        let query = MinMaxQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let results = query.query(&format!("{KEY}x"), 1.5, 2.5).unwrap();

        assert_eq!(results.len(), 1);
        let block = &results["0"];
        assert_eq!((block.start, block.end), (0, 3));
        assert!(block.sub_slices.is_empty());
    }

    #[test]
    fn test_non_overlapping_interval_misses() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        one_block_builder(SecondaryIndex::None, 100)
            .persist(&base, Backend::File)
            .unwrap();

        let query = MinMaxQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        assert!(query.query(&format!("{KEY}x"), 5.0, 9.0).unwrap().is_empty());
    }

    #[test]
    fn test_unbounded_endpoints_match_everything() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        one_block_builder(SecondaryIndex::None, 100)
            .persist(&base, Backend::File)
            .unwrap();

        let query = MinMaxQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        let results = query
            .query(&format!("{KEY}x"), f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_secondary_slices_filtered_by_overlap() {
        // Windows of 2 over {1, 2, 3}: [0,2) spans 1–2 and overlaps
        // (1.5, 2.5); [2,3) holds only 3 and must be excluded.
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        one_block_builder(SecondaryIndex::MinMax, 2)
            .persist(&base, Backend::File)
            .unwrap();

        let query = MinMaxQuery::open(&base, Backend::File, SecondaryIndex::MinMax).unwrap();
        let results = query.query(&format!("{KEY}x"), 1.5, 2.5).unwrap();

        assert_eq!(results.len(), 1);
        let block = &results["0"];
        assert_eq!(block.sub_slices.len(), 1);
        let slice = &block.sub_slices["0"];
        assert_eq!((slice.start, slice.end), (0, 2));
        assert!(!block.sub_slices.contains_key("2"));
    }

    #[test]
    fn test_missing_key_yields_empty_result() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        one_block_builder(SecondaryIndex::None, 100)
            .persist(&base, Backend::File)
            .unwrap();

        let query = MinMaxQuery::open(&base, Backend::File, SecondaryIndex::None).unwrap();
        assert!(query.query("/absent/x", 0.0, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_query_on_kv_backend() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("run").to_str().unwrap().to_string();
        one_block_builder(SecondaryIndex::MinMax, 2)
            .persist(&base, Backend::Kv)
            .unwrap();

        let query = MinMaxQuery::open(&base, Backend::Kv, SecondaryIndex::MinMax).unwrap();
        let results = query.query(&format!("{KEY}x"), 1.5, 2.5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["0"].sub_slices.len(), 1);
    }

    #[test]
    fn test_open_missing_index_fails() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("never_built").to_str().unwrap().to_string();
        assert!(MinMaxQuery::open(&base, Backend::File, SecondaryIndex::None).is_err());
    }
}
