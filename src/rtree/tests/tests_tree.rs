#[cfg(test)]
mod tests {
    use crate::rtree::{Envelope3d, StrNode, bulk_load, decode_tree, encode_tree};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn block_envelope(lo: f64, hi: f64, start: u64, end: u64) -> Envelope3d {
        Envelope3d {
            minx: lo,
            maxx: hi,
            miny: lo,
            maxy: hi,
            minz: lo,
            maxz: hi,
            start,
            end,
            bloom: Vec::new(),
        }
    }

    fn random_envelopes(n: usize, seed: u64) -> Vec<Envelope3d> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let cx: f64 = rng.random_range(-100.0..100.0);
                let cy: f64 = rng.random_range(-100.0..100.0);
                let cz: f64 = rng.random_range(-100.0..100.0);
                let r: f64 = rng.random_range(0.1..5.0);
                Envelope3d {
                    minx: cx - r,
                    maxx: cx + r,
                    miny: cy - r,
                    maxy: cy + r,
                    minz: cz - r,
                    maxz: cz + r,
                    start: i as u64 * 10,
                    end: (i as u64 + 1) * 10,
                    bloom: Vec::new(),
                }
            })
            .collect()
    }

    /// Containment, level monotonicity, and fan-out bounds, recursively.
    fn check_invariants(node: &StrNode, fanout: usize) -> usize {
        if node.is_leaf() {
            assert_eq!(node.level, 0, "leaves sit at level 0");
            return 1;
        }

        assert!(node.children.len() <= fanout, "fan-out bound violated");
        let mut leaves = 0;
        for child in &node.children {
            assert_eq!(
                child.level + 1,
                node.level,
                "child level must be one below the parent"
            );
            let e = &node.envelope;
            let c = &child.envelope;
            assert!(
                e.minx <= c.minx
                    && e.maxx >= c.maxx
                    && e.miny <= c.miny
                    && e.maxy >= c.maxy
                    && e.minz <= c.minz
                    && e.maxz >= c.maxz,
                "parent envelope must contain its children"
            );
            assert!(e.start <= c.start && e.end >= c.end);
            leaves += check_invariants(child, fanout);
        }
        leaves
    }

    #[test]
    fn test_bulk_load_empty() {
        assert!(bulk_load(Vec::new(), 10).is_none());
    }

    #[test]
    fn test_bulk_load_single_envelope_is_leaf_root() {
        let root = bulk_load(vec![block_envelope(0.0, 1.0, 0, 10)], 10).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.level, 0);
        assert_eq!((root.envelope.start, root.envelope.end), (0, 10));
    }

    #[test]
    fn test_bulk_load_invariants_small() {
        let envelopes = vec![
            block_envelope(0.0, 1.0, 0, 10),
            block_envelope(5.0, 6.0, 10, 20),
            block_envelope(-3.0, -2.0, 20, 30),
        ];
        let root = bulk_load(envelopes, 10).unwrap();
        assert_eq!(check_invariants(&root, 10), 3);
        // Root bounds are the tight union.
        assert_eq!(root.envelope.minx, -3.0);
        assert_eq!(root.envelope.maxx, 6.0);
        assert_eq!((root.envelope.start, root.envelope.end), (0, 30));
    }

    #[test]
    fn test_bulk_load_invariants_large() {
        for &(n, fanout) in &[(100usize, 10usize), (1000, 10), (257, 4), (64, 2)] {
            let root = bulk_load(random_envelopes(n, 42), fanout).unwrap();
            let leaves = check_invariants(&root, fanout);
            assert_eq!(leaves, n, "every envelope must appear as a leaf");
        }
    }

    #[test]
    fn test_serialize_roundtrip_structural_equality() {
        let mut envelopes = random_envelopes(87, 7);
        // Give one envelope a bloom payload so it round-trips too.
        envelopes[3].bloom = vec![0xAB, 0xCD, 0x06];

        let root = bulk_load(envelopes, 10).unwrap();
        let bytes = encode_tree(&root).unwrap();
        let restored = decode_tree(&bytes).unwrap().unwrap();

        assert_eq!(restored, root);
    }

    #[test]
    fn test_decode_empty_record() {
        // A record holding zero nodes decodes to no tree.
        assert!(decode_tree(&[0, 0, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn test_decode_truncated_tree_fails() {
        let root = bulk_load(random_envelopes(20, 3), 5).unwrap();
        let mut bytes = encode_tree(&root).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(decode_tree(&bytes).is_err());
    }
}
