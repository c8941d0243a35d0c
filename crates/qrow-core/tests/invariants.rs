//! Invariants of the row evaluator.
//!
//! The split high/low evaluation must agree with the full evaluator for
//! every width the successor index uses it at, and the reflection helper
//! must be an involution — both are assumptions the index construction
//! and the visited-set symmetrisation build on.

use proptest::prelude::*;
use qrow_core::{flip_row, BoundarySymmetry, Row, RowEvaluator, Symmetry};
use qrow_rule::parse_rule;

fn evaluator(width: u32, symmetry: Symmetry, boundary: BoundarySymmetry) -> RowEvaluator {
    let tab = parse_rule("B36/S23").unwrap();
    RowEvaluator::new(&tab, width, symmetry, boundary, 0)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// Half-evaluations recompose into the full successor, including the
    /// rejection verdict, for every symmetry and boundary pairing.
    #[test]
    fn high_low_recomposition(
        width in 4u32..=9,
        r1 in any::<u16>(),
        r2 in any::<u16>(),
        r3 in any::<u16>(),
        sym_pick in 0usize..4,
        boundary_pick in 0usize..4,
    ) {
        let symmetry = [
            Symmetry::Asymmetric,
            Symmetry::Odd,
            Symmetry::Even,
            Symmetry::Gutter,
        ][sym_pick];
        let boundary = [
            BoundarySymmetry::Undefined,
            BoundarySymmetry::Odd,
            BoundarySymmetry::Even,
            BoundarySymmetry::Gutter,
        ][boundary_pick];
        let ev = evaluator(width, symmetry, boundary);

        let mask = (1u16 << width) - 1;
        let (r1, r2, r3) = (r1 & mask, r2 & mask, r3 & mask);

        let low_bits = (width >> 1) + 1;
        let hi_bits = ((width + 1) >> 1) + 1;
        let full = ev.evolve_row(r1, r2, r3);
        let low = ev.evolve_row_low(r1, r2, r3, low_bits - 1);
        let high = ev.evolve_row_high(r1, r2, r3, hi_bits - 1);

        match (low, high) {
            (Some(l), Some(h)) => prop_assert_eq!(full, Some(l | h)),
            _ => prop_assert_eq!(full, None),
        }
    }

    /// Reflection is an involution and preserves popcount.
    #[test]
    fn flip_is_an_involution(width in 1u32..=14, r in any::<u16>()) {
        let r: Row = r & ((1 << width) - 1);
        let f = flip_row(r, width);
        prop_assert!(f <= (1 << width) - 1);
        prop_assert_eq!(flip_row(f, width), r);
        prop_assert_eq!(f.count_ones(), r.count_ones());
    }
}
