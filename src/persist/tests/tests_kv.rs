#[cfg(test)]
mod tests {
    use crate::persist::{KvStore, kv_namespace_path};
    use tempfile::TempDir;

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let ns = kv_namespace_path(tmp.path().join("run_rtree").to_str().unwrap());

        let store = KvStore::open_for_build(&ns).unwrap();
        store.put("/k/x", b"tree-bytes").unwrap();
        store.persist().unwrap();

        assert_eq!(store.get("/k/x").unwrap().unwrap(), b"tree-bytes");
        assert!(store.get("/k/missing").unwrap().is_none());
    }

    #[test]
    fn test_batched_writes_visible_after_commit() {
        let tmp = TempDir::new().unwrap();
        let ns = kv_namespace_path(tmp.path().join("run_minmax").to_str().unwrap());

        let store = KvStore::open_for_build(&ns).unwrap();
        let mut batch = store.write_batch();
        for i in 0..2_500u32 {
            // Crosses the intermediate-commit threshold twice.
            batch.put(&format!("/k/x{i}"), &i.to_le_bytes()).unwrap();
        }
        batch.commit().unwrap();

        assert_eq!(
            store.get("/k/x0").unwrap().unwrap(),
            0u32.to_le_bytes().to_vec()
        );
        assert_eq!(
            store.get("/k/x2499").unwrap().unwrap(),
            2499u32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_open_for_build_clears_existing_namespace() {
        let tmp = TempDir::new().unwrap();
        let ns = kv_namespace_path(tmp.path().join("run_minmax").to_str().unwrap());

        {
            let store = KvStore::open_for_build(&ns).unwrap();
            store.put("stale", b"old").unwrap();
            store.persist().unwrap();
        }

        let store = KvStore::open_for_build(&ns).unwrap();
        assert!(store.get("stale").unwrap().is_none());
    }

    #[test]
    fn test_open_for_query_requires_existing_namespace() {
        let tmp = TempDir::new().unwrap();
        let ns = kv_namespace_path(tmp.path().join("never_built").to_str().unwrap());
        assert!(KvStore::open_for_query(&ns).is_err());
    }
}
