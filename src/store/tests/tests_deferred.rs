#[cfg(test)]
mod tests {
    use crate::store::{ParticleStore, ReadMode, StoreWriter};
    use tempfile::TempDir;

    const KEY_X: &str = "/data/1/particles/e/position/x";
    const KEY_Y: &str = "/data/1/particles/e/position/y";
    const KEY_Z: &str = "/data/1/particles/e/position/z";

    fn write_xyz_store(path: &std::path::Path) {
        let mut writer = StoreWriter::create(path).unwrap();
        writer.append_f64_block(KEY_X, 0, &[1.0, 2.0]).unwrap();
        writer.append_f64_block(KEY_Y, 0, &[3.0, 4.0]).unwrap();
        writer.append_f64_block(KEY_Z, 0, &[5.0, 6.0]).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_deferred_gets_resolved_by_perform_gets() {
        // The by-block build path issues x/y/z deferred and flushes once.
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("it1.swrm");
        write_xyz_store(&path);

        let store = ParticleStore::open(&path).unwrap();
        let x = store
            .get_f64(&store.inquire(KEY_X).unwrap(), ReadMode::Deferred)
            .unwrap();
        let y = store
            .get_f64(&store.inquire(KEY_Y).unwrap(), ReadMode::Deferred)
            .unwrap();
        let z = store
            .get_f64(&store.inquire(KEY_Z).unwrap(), ReadMode::Deferred)
            .unwrap();

        // Nothing resolves before the flush.
        assert!(x.take().is_none());

        store.perform_gets().unwrap();

        assert_eq!(x.take().unwrap(), vec![1.0, 2.0]);
        assert_eq!(y.take().unwrap(), vec![3.0, 4.0]);
        assert_eq!(z.take().unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_take_is_one_shot() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("it1.swrm");
        write_xyz_store(&path);

        let store = ParticleStore::open(&path).unwrap();
        let x = store
            .get_f64(&store.inquire(KEY_X).unwrap(), ReadMode::Sync)
            .unwrap();
        assert!(x.take().is_some());
        assert!(x.take().is_none());
    }

    #[test]
    fn test_perform_gets_with_empty_queue_is_noop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("it1.swrm");
        write_xyz_store(&path);

        let store = ParticleStore::open(&path).unwrap();
        store.perform_gets().unwrap();
    }
}
