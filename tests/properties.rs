//! Property-based tests for the universal properties that should hold
//! across arbitrary inputs, not just hand-picked examples.

use proptest::prelude::*;
use rag_core::chunk::chunk_text;
use rag_core::normalize::normalize;
use rag_core::vector::{dot, dot_packed_le, normalize_l2, pack, unpack};

proptest! {
    #[test]
    fn pack_unpack_roundtrips(v in proptest::collection::vec(-1000.0f32..1000.0f32, 0..64)) {
        let packed = pack(&v);
        let restored = unpack(&packed).unwrap();
        prop_assert_eq!(v, restored);
    }

    #[test]
    fn dot_matches_dot_packed_le_for_arbitrary_vectors(
        a in proptest::collection::vec(-10.0f32..10.0f32, 1..16),
        b in proptest::collection::vec(-10.0f32..10.0f32, 1..16),
    ) {
        let n = a.len().min(b.len());
        let packed = pack(&b);
        let direct = dot(&a, &b);
        let via_packed = dot_packed_le(&a, &packed, 0, n).unwrap();
        prop_assert!((direct - via_packed).abs() < 1e-3);
    }

    #[test]
    fn normalize_l2_always_yields_unit_norm_or_zero(
        v in proptest::collection::vec(-100.0f32..100.0f32, 1..32)
    ) {
        let mut v = v;
        normalize_l2(&mut v);
        let norm: f64 = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
        prop_assert!((norm - 1.0).abs() < 1e-3 || norm < 1e-3);
    }

    #[test]
    fn chunk_text_never_loses_content(
        text in "[a-zA-Z0-9 .!?\n]{0,2000}",
        target in 20usize..400,
        overlap in 0usize..19,
    ) {
        let chunks = chunk_text("doc", &text, target, overlap);
        prop_assert!(!chunks.is_empty());
        let normalized = normalize(&text);
        let total_chunk_chars: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        // Every character of the normalized source survives into some chunk;
        // with overlap > 0 the total is strictly larger since shared tails
        // are duplicated across adjacent chunks.
        prop_assert!(total_chunk_chars >= normalized.chars().count());
    }

    #[test]
    fn chunk_text_with_zero_overlap_partitions_the_source_exactly(
        text in "[a-zA-Z0-9 .!?\n]{0,2000}",
        target in 20usize..400,
    ) {
        let chunks = chunk_text("doc", &text, target, 0);
        let reconstructed: String = chunks.iter().map(|c| c.text.as_str()).collect();
        prop_assert_eq!(reconstructed, normalize(&text));
    }

    #[test]
    fn chunk_text_indices_are_always_contiguous_from_zero(
        text in "[a-zA-Z0-9 .!?\n]{0,2000}",
        target in 20usize..400,
        overlap in 0usize..19,
    ) {
        let chunks = chunk_text("doc", &text, target, overlap);
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn chunk_text_is_deterministic_for_same_input(
        text in "[a-zA-Z0-9 .!?\n]{0,500}",
        target in 20usize..200,
        overlap in 0usize..19,
    ) {
        let a = chunk_text("doc", &text, target, overlap);
        let b = chunk_text("doc", &text, target, overlap);
        prop_assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert_eq!(&x.text, &y.text);
            prop_assert_eq!(&x.chunk_id, &y.chunk_id);
        }
    }

    #[test]
    fn normalize_is_idempotent(text in ".{0,500}") {
        let once = normalize(&text);
        let twice = normalize(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalize_never_contains_nul_or_carriage_return(text in ".{0,500}") {
        let out = normalize(&text);
        prop_assert!(!out.contains('\0'));
        prop_assert!(!out.contains('\r'));
    }

    #[test]
    fn normalize_caps_blank_line_runs_at_two_newlines(text in "[a-z\n]{0,500}") {
        let out = normalize(&text);
        prop_assert!(!out.contains("\n\n\n"));
    }
}
