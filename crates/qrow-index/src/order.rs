// crates/qrow-index/src/order.rs

//! Row-preference order.
//!
//! The order in which candidate successor rows are tried matters a lot for
//! how quickly the depth-first probes find completions. The statistical
//! policy estimates, per successor row, how many one-step continuations the
//! row admits under the active symmetry, by a column-by-column dynamic
//! program over 3×3 windows conditioned on the two trailing bits of each
//! input row. The empty row is always tried first.

use qrow_core::{ReorderPolicy, Row, RowEvaluator, Symmetry};

/// Likelihood count per successor row. Index = row value; larger = tried
/// earlier. `counts[0]` is saturated so the empty row always sorts first.
#[must_use]
pub fn likelihood_counts(ev: &RowEvaluator, policy: ReorderPolicy) -> Vec<u64> {
    let width = ev.width();
    let mut counts = match policy {
        ReorderPolicy::Off => vec![0u64; 1 << width],
        ReorderPolicy::Statistical => stat_counts(ev),
        // Emptier rows first: invert popcount into a descending count.
        ReorderPolicy::Popcount => (0..1u64 << width)
            .map(|r| u64::from(width) + 1 - u64::from(r.count_ones()))
            .collect(),
    };
    counts[0] = u64::MAX;
    counts
}

/// Candidate iteration order: descending numeric order, stably sorted by
/// descending likelihood count.
#[must_use]
pub fn preference_order(counts: &[u64], width: u32, policy: ReorderPolicy) -> Vec<Row> {
    let mut order: Vec<Row> = (0..1u32 << width)
        .map(|i| ((1u32 << width) - 1 - i) as Row)
        .collect();
    if policy != ReorderPolicy::Off {
        sort_rows(&mut order, counts);
    }
    order
}

/// Insertion sort, descending by count; stable so ties keep the natural
/// descending-numeric order.
fn sort_rows(rows: &mut [Row], counts: &[u64]) {
    for i in 1..rows.len() {
        let t = rows[i];
        let mut j = i;
        while j > 0 && counts[rows[j - 1] as usize] < counts[t as usize] {
            rows[j] = rows[j - 1];
            j -= 1;
        }
        rows[j] = t;
    }
}

/// The statistical dynamic program.
///
/// `cnt` is indexed by `(1 << nb | partial_row4) << 7 | row4_bit << 6 |
/// tail bits of row1..row3`; a leading 1 separates widths. The left edge
/// forbids generation left of the new row; the right edge accumulates only
/// configurations the symmetry admits.
fn stat_counts(ev: &RowEvaluator) -> Vec<u64> {
    let width = ev.width() as usize;
    let triple = ev.triple();
    let s = match ev.symmetry() {
        Symmetry::Odd => 2usize,
        Symmetry::Even => 1,
        _ => width + 2,
    };

    let mut cnt = vec![0u64; 128 << width];
    for r1 in 0..2usize {
        for r2 in 0..2usize {
            for r3 in 0..2usize {
                if triple.step(r1 as i32, r2 as i32, r3 as i32) == 0 {
                    cnt[(1 << 6) + (r1 << 4) + (r2 << 2) + r3] += 1;
                }
            }
        }
    }

    for nb in 0..width {
        for r1 in 0..8usize {
            for r2 in 0..8usize {
                for r3 in 0..8usize {
                    if nb == width - 1
                        && ((((r1 >> s) ^ r1) & 1) != 0
                            || (((r2 >> s) ^ r2) & 1) != 0
                            || (((r3 >> s) ^ r3) & 1) != 0)
                    {
                        continue;
                    }
                    let bit = triple.step(r1 as i32, r2 as i32, r3 as i32);
                    if bit < 0 {
                        continue;
                    }
                    let bit = bit as usize;
                    for row4 in 0..1usize << nb {
                        let src = (((1 << nb) + row4) << 6)
                            + ((r1 >> 1) << 4)
                            + ((r2 >> 1) << 2)
                            + (r3 >> 1);
                        let dst = (((((1 << nb) + row4) << 1) + bit) << 6)
                            + ((r1 & 3) << 4)
                            + ((r2 & 3) << 2)
                            + (r3 & 3);
                        cnt[dst] += cnt[src];
                    }
                }
            }
        }
    }

    let mut gcount = vec![0u64; 1 << width];
    for r1 in 0..4usize {
        for r2 in 0..4usize {
            for r3 in 0..4usize {
                if ev.symmetry() != Symmetry::Asymmetric
                    || triple.step((r1 << 1) as i32, (r2 << 1) as i32, (r3 << 1) as i32) == 0
                {
                    for (row4, g) in gcount.iter_mut().enumerate() {
                        *g += cnt[(((1 << width) + row4) << 6) + (r1 << 4) + (r2 << 2) + r3];
                    }
                }
            }
        }
    }
    gcount
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrow_core::{BoundarySymmetry, RowEvaluator, Symmetry};
    use qrow_rule::parse_rule;

    fn evaluator(width: u32, symmetry: Symmetry) -> RowEvaluator {
        let tab = parse_rule("B3/S23").unwrap();
        RowEvaluator::new(&tab, width, symmetry, BoundarySymmetry::Undefined, 0)
    }

    #[test]
    fn empty_row_is_always_first() {
        for policy in [
            ReorderPolicy::Off,
            ReorderPolicy::Statistical,
            ReorderPolicy::Popcount,
        ] {
            for symmetry in [Symmetry::Asymmetric, Symmetry::Odd, Symmetry::Even] {
                let ev = evaluator(5, symmetry);
                let counts = likelihood_counts(&ev, policy);
                let order = preference_order(&counts, 5, policy);
                assert_eq!(order.len(), 32);
                if policy == ReorderPolicy::Off {
                    assert_eq!(order[0], 31);
                } else {
                    assert_eq!(order[0], 0, "{policy:?}/{symmetry}");
                }
            }
        }
    }

    #[test]
    fn order_is_a_permutation() {
        let ev = evaluator(6, Symmetry::Even);
        let counts = likelihood_counts(&ev, ReorderPolicy::Statistical);
        let mut order = preference_order(&counts, 6, ReorderPolicy::Statistical);
        order.sort_unstable();
        let want: Vec<Row> = (0..64).collect();
        assert_eq!(order, want);
    }

    #[test]
    fn popcount_policy_prefers_sparser_rows() {
        let ev = evaluator(4, Symmetry::Asymmetric);
        let counts = likelihood_counts(&ev, ReorderPolicy::Popcount);
        let order = preference_order(&counts, 4, ReorderPolicy::Popcount);
        let pops: Vec<u32> = order.iter().map(|r| u32::from(*r).count_ones()).collect();
        let mut sorted = pops.clone();
        sorted.sort_unstable();
        assert_eq!(pops, sorted);
    }

    #[test]
    fn statistical_counts_are_not_degenerate() {
        let ev = evaluator(5, Symmetry::Odd);
        let counts = likelihood_counts(&ev, ReorderPolicy::Statistical);
        // At least two distinct finite values besides the pinned maximum.
        let mut finite: Vec<u64> = counts[1..].to_vec();
        finite.sort_unstable();
        finite.dedup();
        assert!(finite.len() > 2);
    }
}
