// crates/qrow-index/src/lib.rs

//! The memoised successor-row index.
//!
//! For every ordered pair `(row1, row2)` the index holds one record
//! listing, bucketed by resulting successor row, every `row3` such that
//! `row1/row2/row3` evolves `row2` into that successor. Records are built
//! lazily on first access, bucket lists come out pre-sorted in the active
//! row-preference order, and byte-identical records share storage (two
//! different pairs frequently induce the same successor structure).
//!
//! Layout of a record of width W:
//!
//! ```text
//! [ offsets[0] … offsets[2^W] | row3 values, bucket by bucket ]
//! ```
//!
//! `offsets[k] .. offsets[k+1]` (absolute indices into the record) bound
//! the bucket of successor `k`; `offsets[2^W]` is the record length.
//!
//! Publication: one `OnceLock` slot per pair, set exactly once while the
//! single construction mutex is held. Readers never take the lock after a
//! record is published.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

mod order;

pub use order::{likelihood_counts, preference_order};

use anyhow::{ensure, Result};
use parking_lot::Mutex;
use qrow_core::{ReorderPolicy, Row, RowEvaluator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Bucket of candidate `row3` values for a fixed `(row1, row2, successor)`.
#[inline]
#[must_use]
pub fn bucket(record: &[u16], successor: Row) -> &[u16] {
    let s = successor as usize;
    &record[record[s] as usize..record[s + 1] as usize]
}

/// Number of candidates for a `(row1, row2, successor)` triple without
/// materialising the slice.
#[inline]
#[must_use]
pub fn bucket_len(record: &[u16], successor: Row) -> usize {
    let s = successor as usize;
    (record[s + 1] - record[s]) as usize
}

/// A stable identity for a bucket, usable as a cache key. Records are
/// heap-pinned and shared, so the address of the bucket start identifies
/// the `(record, successor)` pair for the life of the process.
#[inline]
#[must_use]
pub fn bucket_key(b: &[u16]) -> usize {
    b.as_ptr() as usize
}

struct Core {
    /// Content digest → shared record, for cross-pair sharing.
    dedup: HashMap<[u8; 32], Arc<[u16]>>,
    scratch: BuildScratch,
}

struct BuildScratch {
    /// Successor (or `None`) per candidate row3.
    successors: Vec<Option<Row>>,
    /// Half-evaluation workspace for the split construction.
    halves: Vec<Option<Row>>,
}

/// The process-global successor index.
pub struct SuccessorIndex {
    evaluator: RowEvaluator,
    width: u32,
    /// Candidate iteration order; buckets inherit it.
    valorder: Vec<Row>,
    slots: Vec<OnceLock<Arc<[u16]>>>,
    core: Mutex<Core>,
    mem_usage: AtomicU64,
    mem_limit: Option<u64>,
    over_budget: AtomicBool,
}

impl SuccessorIndex {
    /// Set up the index: preference order, slot table, and the warm
    /// `(0, row2)` records every search touches immediately.
    ///
    /// # Errors
    ///
    /// Fails if the fixed tables alone exceed the memory cap.
    pub fn new(
        evaluator: RowEvaluator,
        reorder: ReorderPolicy,
        mem_limit_mb: i64,
    ) -> Result<Self> {
        let width = evaluator.width();
        let counts = likelihood_counts(&evaluator, reorder);
        let valorder = preference_order(&counts, width, reorder);

        let slot_count = 1usize << (2 * width);
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, OnceLock::new);

        let mem_limit = (mem_limit_mb >= 0).then(|| (mem_limit_mb as u64) << 20);
        let fixed = (std::mem::size_of::<OnceLock<Arc<[u16]>>>() as u64) * slot_count as u64
            + 8 * (1u64 << width);

        let index = Self {
            evaluator,
            width,
            valorder,
            slots,
            core: Mutex::new(Core {
                dedup: HashMap::new(),
                scratch: BuildScratch {
                    successors: vec![None; 1 << width],
                    halves: vec![None; 1 << width],
                },
            }),
            mem_usage: AtomicU64::new(fixed),
            mem_limit,
            over_budget: AtomicBool::new(false),
        };
        ensure!(
            !index.charge(0),
            "memory limit exceeded by the successor-index tables"
        );

        for row2 in 0..1u32 << width {
            index.record(0, row2 as Row);
        }
        Ok(index)
    }

    /// The row evaluator this index was built from.
    #[must_use]
    pub fn evaluator(&self) -> &RowEvaluator {
        &self.evaluator
    }

    /// Bytes currently attributed to the index.
    #[must_use]
    pub fn mem_usage(&self) -> u64 {
        self.mem_usage.load(Ordering::Relaxed)
    }

    /// True once the soft memory cap has been crossed. The search driver
    /// polls this and aborts; construction itself never blocks on it.
    #[must_use]
    pub fn memory_exceeded(&self) -> bool {
        self.over_budget.load(Ordering::Relaxed)
    }

    /// Add `bytes` to the running usage; returns true when over budget.
    fn charge(&self, bytes: u64) -> bool {
        let total = self.mem_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(limit) = self.mem_limit {
            if total > limit {
                self.over_budget.store(true, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// The record for `(row1, row2)`, building and publishing it on first
    /// access. Lock-free once published.
    pub fn record(&self, row1: Row, row2: Row) -> &[u16] {
        let slot = ((row1 as usize) << self.width) | row2 as usize;
        if let Some(rec) = self.slots[slot].get() {
            return rec;
        }
        self.build(slot, row1, row2)
    }

    /// Candidate bucket for the `(row1, row2) → successor` triple.
    #[inline]
    pub fn successors(&self, row1: Row, row2: Row, successor: Row) -> &[u16] {
        bucket(self.record(row1, row2), successor)
    }

    fn build(&self, slot: usize, row1: Row, row2: Row) -> &[u16] {
        let mut core = self.core.lock();
        // Double-checked: another thread may have published while we
        // waited for the lock.
        if let Some(rec) = self.slots[slot].get() {
            return rec;
        }

        let Core { dedup, scratch } = &mut *core;
        Self::evaluate_successors(&self.evaluator, row1, row2, scratch);
        let record = self.assemble_record(&scratch.successors);

        let digest: [u8; 32] = {
            let mut h = blake3::Hasher::new();
            for w in &record {
                h.update(&w.to_le_bytes());
            }
            *h.finalize().as_bytes()
        };

        // Identical record already published for some other pair: drop the
        // fresh buffer and alias the existing storage.
        let shared = if let Some(existing) = dedup.get(&digest) {
            Arc::clone(existing)
        } else {
            let arc: Arc<[u16]> = Arc::from(record.into_boxed_slice());
            self.charge(2 * arc.len() as u64);
            dedup.insert(digest, Arc::clone(&arc));
            arc
        };

        self.slots[slot].get_or_init(|| shared)
    }

    /// Fill `scratch.successors[row3]` for every candidate row3. Width ≥ 4
    /// evaluates the low and high output halves separately so the work per
    /// pair is `O(2^W · 2^{W/2})` instead of `O(2^W · W)` full rows.
    fn evaluate_successors(ev: &RowEvaluator, row1: Row, row2: Row, scratch: &mut BuildScratch) {
        let width = ev.width();
        if width < 4 {
            for row3 in 0..1u32 << width {
                scratch.successors[row3 as usize] = ev.evolve_row(row1, row2, row3 as Row);
            }
            return;
        }

        let low_bits = (width >> 1) + 1;
        let hi_bits = ((width + 1) >> 1) + 1;
        let hi_shift = low_bits - 2;
        let low_count = 1usize << low_bits;

        for row3 in 0..1u32 << low_bits {
            scratch.halves[row3 as usize] = ev.evolve_row_low(row1, row2, row3 as Row, low_bits - 1);
        }
        for row3 in (0..1u32 << width).step_by(1 << hi_shift) {
            scratch.halves[low_count + (row3 >> hi_shift) as usize] =
                ev.evolve_row_high(row1, row2, row3 as Row, hi_bits - 1);
        }
        let low_mask = (1u32 << low_bits) - 1;
        for row3 in 0..1u32 << width {
            let low = scratch.halves[(row3 & low_mask) as usize];
            let high = scratch.halves[low_count + (row3 >> hi_shift) as usize];
            scratch.successors[row3 as usize] = match (low, high) {
                (Some(l), Some(h)) => Some(l | h),
                _ => None,
            };
        }
    }

    /// Counting sort into the record layout, iterating candidates in
    /// preference order so each bucket comes out pre-sorted.
    fn assemble_record(&self, successors: &[Option<Row>]) -> Vec<u16> {
        let n = 1usize << self.width;
        let mut pairs: Vec<(Row, Row)> = Vec::with_capacity(n);
        for &row3 in &self.valorder {
            if let Some(row4) = successors[row3 as usize] {
                pairs.push((row3, row4));
            }
        }

        let mut record = vec![0u16; 1 + n + pairs.len()];
        record[0] = (1 + n) as u16;
        for &(_, row4) in &pairs {
            record[row4 as usize] += 1;
        }
        record[n] = 0;
        for k in 0..n {
            record[k + 1] += record[k];
        }
        for &(row3, row4) in pairs.iter().rev() {
            let r4 = row4 as usize;
            record[r4] -= 1;
            let at = record[r4] as usize;
            record[at] = row3;
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrow_core::{BoundarySymmetry, Symmetry};
    use qrow_rule::parse_rule;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn index_with(rule: &str, width: u32, symmetry: Symmetry, reorder: ReorderPolicy) -> SuccessorIndex {
        let tab = parse_rule(rule).unwrap();
        let ev = RowEvaluator::new(&tab, width, symmetry, BoundarySymmetry::Undefined, 0);
        SuccessorIndex::new(ev, reorder, -1).unwrap()
    }

    fn index(width: u32, symmetry: Symmetry, reorder: ReorderPolicy) -> SuccessorIndex {
        index_with("B3/S23", width, symmetry, reorder)
    }

    /// Every listed row3 evolves to the bucket it is listed under, and
    /// every valid row3 is listed exactly once.
    #[test]
    fn buckets_agree_with_the_evaluator() {
        let idx = index(5, Symmetry::Odd, ReorderPolicy::Statistical);
        let ev = idx.evaluator().clone();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..40 {
            let r1: Row = rng.gen_range(0..32);
            let r2: Row = rng.gen_range(0..32);
            let mut listed = 0usize;
            for succ in 0..32u16 {
                for &r3 in idx.successors(r1, r2, succ) {
                    assert_eq!(ev.evolve_row(r1, r2, r3), Some(succ));
                    listed += 1;
                }
            }
            let valid = (0..32u16)
                .filter(|&r3| ev.evolve_row(r1, r2, r3).is_some())
                .count();
            assert_eq!(listed, valid);
        }
    }

    /// The split high/low construction must agree with direct evaluation
    /// (widths below and above the split threshold).
    #[test]
    fn split_construction_matches_direct() {
        for width in [3u32, 4, 6, 7] {
            let idx = index(width, Symmetry::Even, ReorderPolicy::Off);
            let ev = idx.evaluator().clone();
            let n = 1u16 << width;
            for r1 in [0u16, 1, n / 2, n - 1] {
                for r2 in 0..n {
                    for succ in 0..n {
                        for &r3 in idx.successors(r1, r2, succ) {
                            assert_eq!(ev.evolve_row(r1, r2, r3), Some(succ));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn buckets_follow_preference_order() {
        let idx = index(5, Symmetry::Odd, ReorderPolicy::Statistical);
        let ev = idx.evaluator().clone();
        let counts = likelihood_counts(&ev, ReorderPolicy::Statistical);
        let order = preference_order(&counts, 5, ReorderPolicy::Statistical);
        let rank: Vec<usize> = {
            let mut rank = vec![0usize; 32];
            for (i, &r) in order.iter().enumerate() {
                rank[r as usize] = i;
            }
            rank
        };
        for succ in 0..32u16 {
            let b = idx.successors(3, 9, succ);
            for pair in b.windows(2) {
                assert!(
                    rank[pair[0] as usize] < rank[pair[1] as usize],
                    "bucket {succ} out of order"
                );
            }
        }
    }

    /// Identical records are shared: in the empty rule every pair induces
    /// the same all-dead successor structure, so a single allocation backs
    /// the whole table.
    #[test]
    fn identical_records_share_storage() {
        let idx = index_with("B/S", 4, Symmetry::Asymmetric, ReorderPolicy::Off);
        let mut distinct: Vec<usize> = Vec::new();
        for r1 in 0..16u16 {
            for r2 in 0..16u16 {
                let p = idx.record(r1, r2).as_ptr() as usize;
                if !distinct.contains(&p) {
                    distinct.push(p);
                }
            }
        }
        assert_eq!(distinct.len(), 1);
    }

    #[test]
    fn memory_cap_trips_the_flag() {
        let tab = parse_rule("B3/S23").unwrap();
        let ev = RowEvaluator::new(&tab, 8, Symmetry::Odd, BoundarySymmetry::Undefined, 0);
        // One megabyte is far below the 2^16-slot table plus warm records.
        match SuccessorIndex::new(ev, ReorderPolicy::Off, 1) {
            Err(_) => {}
            Ok(idx) => assert!(idx.memory_exceeded()),
        }
    }

    #[test]
    fn bucket_helpers_are_consistent() {
        let idx = index(4, Symmetry::Even, ReorderPolicy::Off);
        let rec = idx.record(2, 5);
        for succ in 0..16u16 {
            assert_eq!(bucket(rec, succ).len(), bucket_len(rec, succ));
        }
    }
}
