#[cfg(test)]
mod tests {
    use crate::bloom::{BloomError, BloomFilter, BloomPolicy, MAX_FILTER_BITS};

    /// Builds two filters with identical geometry by padding the id sets to
    /// the same length.
    fn same_size_pair() -> (BloomFilter, BloomFilter, Vec<u64>, Vec<u64>) {
        let a_ids: Vec<u64> = (0..1000).collect();
        let b_ids: Vec<u64> = (5000..6000).collect();
        let policy = BloomPolicy::new(10, MAX_FILTER_BITS);
        (policy.build(&a_ids), policy.build(&b_ids), a_ids, b_ids)
    }

    #[test]
    fn test_merge_accepts_union() {
        let (mut a, b, a_ids, b_ids) = same_size_pair();
        a.merge(&b).unwrap();

        for id in a_ids.iter().chain(b_ids.iter()) {
            assert!(a.may_contain(*id), "merged filter lost id {id}");
        }
    }

    #[test]
    fn test_merge_commutative() {
        let (a0, b0, _, _) = same_size_pair();

        let mut ab = a0.clone();
        ab.merge(&b0).unwrap();
        let mut ba = b0.clone();
        ba.merge(&a0).unwrap();

        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_associative() {
        let policy = BloomPolicy::new(10, MAX_FILTER_BITS);
        let a = policy.build(&(0..100u64).collect::<Vec<_>>());
        let b = policy.build(&(100..200u64).collect::<Vec<_>>());
        let c = policy.build(&(200..300u64).collect::<Vec<_>>());

        // (a ∪ b) ∪ c
        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        // a ∪ (b ∪ c)
        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = a.clone();
        right.merge(&bc).unwrap();

        assert_eq!(left, right);
    }

    #[test]
    fn test_merge_probe_equals_or_of_inputs() {
        let (a0, b0, _, _) = same_size_pair();
        let mut merged = a0.clone();
        merged.merge(&b0).unwrap();

        for id in [0u64, 500, 5500, 7777, 123_456] {
            assert_eq!(
                merged.may_contain(id),
                a0.may_contain(id) || b0.may_contain(id)
            );
        }
    }

    #[test]
    fn test_merge_length_mismatch_rejected() {
        let policy = BloomPolicy::new(10, MAX_FILTER_BITS);
        let mut small = policy.build(&[1, 2, 3]);
        let large = policy.build(&(0..1000u64).collect::<Vec<_>>());

        let err = small.merge(&large).unwrap_err();
        assert!(matches!(err, BloomError::LengthMismatch { .. }));
    }

    #[test]
    fn test_merge_with_accept_all_is_accept_all() {
        let policy = BloomPolicy::new(10, MAX_FILTER_BITS);
        let mut filter = policy.build(&[1, 2, 3]);
        filter.merge(&BloomFilter::accept_all()).unwrap();
        assert!(filter.is_accept_all());

        let mut all = BloomFilter::accept_all();
        all.merge(&policy.build(&[9])).unwrap();
        assert!(all.is_accept_all());
    }
}
