// crates/qrow-engine/src/lookahead.rs

//! Three-generation feasibility certification.
//!
//! After appending a row at stack position `a`, check that the partial
//! pattern still admits consistent rows one, two and three generations
//! ahead (two rows deep each where needed). The enumeration walks three
//! "vertical strands" of candidate rows through the successor index; the
//! innermost step only needs bucket non-emptiness. When
//! `triple_offset ≥ period`, the third strand is already pinned by the
//! current row stack and is not enumerated.
//!
//! The whole verdict is memoised in the per-thread cache, keyed on the
//! identities of the three innermost buckets plus the packed two-row
//! lookbehind.

use crate::cache::{LookaheadCache, Probe};
use qrow_core::{PhaseTables, Row};
use qrow_index::{bucket, bucket_key, bucket_len, SuccessorIndex};

/// Can the pattern still be completed after placing `p_rows[a]`?
#[allow(clippy::too_many_arguments)]
pub fn lookahead(
    idx: &SuccessorIndex,
    phases: &PhaseTables,
    cache: &mut LookaheadCache,
    p_rows: &[Row],
    a: usize,
    phase: usize,
    period: usize,
    width: u32,
) -> bool {
    let fwd = phases.fwd[phase];
    let dbl = phases.double[phase];
    let tri = phases.triple[phase];

    let rec11 = idx.record(p_rows[a - period - fwd], p_rows[a - fwd]);
    let b11 = bucket(rec11, p_rows[a]);
    if b11.is_empty() {
        return false;
    }

    let rec12 = idx.record(p_rows[a - period - dbl], p_rows[a - dbl]);
    let b12 = bucket(rec12, p_rows[a - fwd]);

    let abn = (u32::from(p_rows[a - dbl]) << width) + u32::from(p_rows[a - tri]);

    // Third strand: pinned when the stack already contains its row.
    let pinned: [Row; 1];
    let (b13, k3): (&[Row], usize) = if tri >= period {
        pinned = [p_rows[a + period - tri]];
        // Row values are tiny and can never collide with a heap bucket
        // address, so the value itself is a sound cache identity.
        (&pinned, usize::from(pinned[0]))
    } else {
        let rec13 = idx.record(p_rows[a - period - tri], p_rows[a - tri]);
        let b = bucket(rec13, p_rows[a - dbl]);
        (b, bucket_key(b))
    };

    let slot = match cache.probe(bucket_key(b11), bucket_key(b12), k3, abn) {
        Probe::Hit(v) => return v,
        Probe::Miss(slot) => slot,
    };

    for &row11 in b11 {
        for &row12 in b12 {
            let b22 = idx.successors(p_rows[a - dbl], row12, row11);
            if b22.is_empty() {
                continue;
            }
            for &row13 in b13 {
                let b23 = idx.successors(p_rows[a - tri], row13, row12);
                if b23.is_empty() {
                    continue;
                }
                for &row23 in b23 {
                    let rec33 = idx.record(row13, row23);
                    for &row22 in b22 {
                        if bucket_len(rec33, row22) != 0 {
                            cache.set(slot, true);
                            return true;
                        }
                    }
                }
            }
        }
    }
    cache.set(slot, false);
    false
}
