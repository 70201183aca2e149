// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_bitfield::{ranges_from_bits, BitField};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_fields(n: usize, seed: u64) -> Vec<BitField> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let len = rng.gen_range(0..1000);
            let bits: Vec<u64> = (0..len).filter(|_| rng.gen::<bool>()).collect();
            BitField::try_from_bits(bits).unwrap()
        })
        .collect()
}

#[test]
fn union_is_idempotent() {
    for field in random_fields(50, 1) {
        assert_eq!(&field | &field, field);
    }
}

#[test]
fn union_then_intersect_recovers_operand() {
    let fields = random_fields(100, 2);
    for pair in fields.chunks(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let merged = a | b;
        assert_eq!(&merged & b, *b);
        assert!(merged.contains_all(a));
    }
}

#[test]
fn self_subtraction_is_empty() {
    for field in random_fields(50, 3) {
        let diff = &field - &field;
        assert!(diff.is_empty());
        assert_eq!(diff.len(), 0);
    }
}

#[test]
fn count_matches_iteration() {
    for field in random_fields(50, 4) {
        assert_eq!(field.len(), field.iter().count() as u64);
        // iteration is strictly ascending
        let bits: Vec<u64> = field.iter().collect();
        assert!(bits.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn multi_union_matches_pairwise() {
    let fields = random_fields(9, 5);
    let merged = BitField::union(&fields);
    let mut expected = BitField::new();
    for field in &fields {
        expected |= field;
    }
    assert_eq!(merged, expected);
}

#[test]
fn subtract_then_union_partitions_the_set() {
    let fields = random_fields(40, 6);
    for pair in fields.chunks(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let only_a = a - b;
        let both = a & b;
        assert!(!only_a.contains_any(b));
        assert_eq!(&only_a | &both, *a);
        assert_eq!(only_a.len() + both.len(), a.len());
    }
}

#[test]
fn serde_roundtrip_preserves_bits() {
    for field in random_fields(20, 7) {
        let decoded = BitField::from_bytes(&field.to_bytes()).unwrap();
        assert_eq!(decoded, field);
        assert_eq!(decoded.len(), field.len());
    }
}

#[test]
fn encoding_is_stable() {
    // the canonical byte form of a set never depends on how it was built
    let a = BitField::try_from_bits([3, 4, 5, 99]).unwrap();
    let mut b = BitField::new();
    for bit in [99, 5, 3, 4] {
        b.set(bit);
    }
    assert_eq!(a.to_bytes(), b.to_bytes());
}

#[test]
fn ranges_from_bits_coalesces() {
    assert_eq!(ranges_from_bits([1, 2, 3, 7, 8, 10]), vec![1..4, 7..9, 10..11]);
}

#[test]
fn bounded_iter_enforces_limit() {
    let field = BitField::try_from_bits(0..100).unwrap();
    assert!(field.bounded_iter(99).is_err());
    assert_eq!(field.bounded_iter(100).unwrap().count(), 100);
}

#[test]
fn first_and_last() {
    let field = BitField::try_from_bits([5, 6, 90]).unwrap();
    assert_eq!(field.first(), Some(5));
    assert_eq!(field.last(), Some(90));
    assert_eq!(BitField::new().first(), None);
}
