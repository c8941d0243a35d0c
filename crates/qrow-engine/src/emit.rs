// crates/qrow-engine/src/emit.rs

//! Result emission.
//!
//! A result is reconstructed from a queue node (walking parent pointers
//! one period at a time) plus, for ships completed inside a deepening
//! probe, the probe's scratch rows. The logical half-rows are unfolded per
//! the symmetry, trimmed, left-shifted against the column axis,
//! deduplicated against the previously emitted pattern, and serialised as
//! run-length-encoded Life format.

use crate::queue::RowSource;
use qrow_core::{gcd, grid, prime_divisors, NodeId, Row, Symmetry, MAX_WIDTH};
use qrow_rule::TripleTable;
use tracing::warn;

const MAX_RLE_LINE_WIDTH: usize = 63;
const MW: usize = MAX_WIDTH as usize;

/// RLE serialiser with the line-width cap.
struct Rle {
    out: String,
    count: u32,
    ch: u8,
    line_width: usize,
}

impl Rle {
    fn new(out: String) -> Self {
        Self {
            out,
            count: 0,
            ch: 0,
            line_width: 0,
        }
    }

    fn push(&mut self, c: u8) {
        if self.count > 0 && c != self.ch {
            let lw = self.line_width;
            self.line_width += 1;
            if lw >= MAX_RLE_LINE_WIDTH {
                if self.ch != b'\n' {
                    self.out.push('\n');
                }
                self.line_width = 0;
            }
            if self.count == 1 {
                self.out.push(self.ch as char);
            } else {
                self.out.push_str(&self.count.to_string());
                self.out.push(self.ch as char);
                self.line_width += 1;
                if self.count > 9 {
                    self.line_width += 1;
                }
            }
            self.count = 0;
            if self.ch == b'\n' {
                self.line_width = 0;
            }
        }
        if c != 0 {
            self.count += 1;
            self.ch = c;
        } else {
            self.line_width = 0;
        }
    }

    fn push_row(&mut self, mut r: u64) {
        while r != 0 {
            self.push(if r & 1 != 0 { b'o' } else { b'b' });
            r >>= 1;
        }
        self.push(b'$');
    }

    /// Drop any pending `$` run and close with `!`.
    fn finish(mut self) -> String {
        self.count = 1;
        self.ch = b'!';
        self.push(0);
        self.out
    }
}

/// Rows handed over from a deepening probe: the scratch stack plus the
/// node row index the stack was loaded at and the last stack row to use.
pub struct DeepRows<'a> {
    /// The probe's row stack (node prefix included).
    pub rows: &'a [Row],
    /// Stack index of the node's own row when the stack was loaded.
    pub node_row: usize,
    /// Last stack index to consider.
    pub last_row: usize,
}

/// Reconstructs, deduplicates, and serialises results.
pub struct Emitter {
    base_rule: String,
    symmetry: Symmetry,
    gutter_skew: usize,
    period: usize,
    offset: u32,
    suppress_subperiodic: bool,
    sub_primes: Vec<u32>,
    triple: TripleTable,
    prev: Vec<u64>,
    longest: Option<String>,
    root_error: bool,
}

impl Emitter {
    /// Build an emitter for one search configuration.
    #[must_use]
    pub fn new(
        base_rule: String,
        symmetry: Symmetry,
        gutter_skew: u32,
        period: u32,
        offset: u32,
        full_period_only: bool,
        triple: TripleTable,
    ) -> Self {
        let g = gcd(period, offset);
        Self {
            base_rule,
            symmetry,
            gutter_skew: gutter_skew as usize,
            period: period as usize,
            offset,
            suppress_subperiodic: full_period_only && g > 1,
            sub_primes: if g > 1 { prime_divisors(g) } else { Vec::new() },
            triple,
            prev: Vec::new(),
            longest: None,
            root_error: false,
        }
    }

    /// A reconstruction reached the search root; the driver treats this as
    /// a fatal internal error.
    #[must_use]
    pub fn root_error(&self) -> bool {
        self.root_error
    }

    /// The buffered longest partial, if any.
    #[must_use]
    pub fn longest_partial(&self) -> Option<&str> {
        self.longest.as_deref()
    }

    /// Height in rows of the most recently emitted result.
    #[must_use]
    pub fn previous_height(&self) -> Option<usize> {
        (!self.prev.is_empty()).then(|| self.prev.len())
    }

    /// Emit a completed ship/wave: `None` when it is subperiodic (and
    /// suppression is on), a duplicate of the previous emission, or
    /// degenerate.
    pub fn try_emit(
        &mut self,
        src: &impl RowSource,
        node: NodeId,
        deep: Option<DeepRows<'_>>,
    ) -> Option<String> {
        let (rows, width) = self.collect(src, node, deep, true)?;
        if self.suppress_subperiodic && self.is_subperiodic(&rows, width) {
            return None;
        }
        if rows == self.prev {
            return None;
        }
        self.prev = rows.clone();
        Some(self.encode(&rows, width))
    }

    /// Buffer the partial pattern ending at `node` as the longest seen so
    /// far (no dedup, no emission).
    pub fn buffer_longest(&mut self, src: &impl RowSource, node: NodeId) {
        if let Some((rows, width)) = self.collect(src, node, None, false) {
            self.longest = Some(self.encode(&rows, width));
        }
    }

    /// Emit without updating dedup state (previews).
    pub fn preview(
        &mut self,
        src: &impl RowSource,
        node: NodeId,
        deep: Option<DeepRows<'_>>,
    ) -> Option<String> {
        let (rows, width) = self.collect(src, node, deep, false)?;
        Some(self.encode(&rows, width))
    }

    /// Walk the pattern out of the queue (and scratch rows), unfold the
    /// symmetry, and normalise. Returns the physical rows (index 0 =
    /// trailing edge) and the bounding width.
    fn collect(
        &mut self,
        src: &impl RowSource,
        mut node: NodeId,
        deep: Option<DeepRows<'_>>,
        expect_nonroot: bool,
    ) -> Option<(Vec<u64>, usize)> {
        let period = self.period;
        let mut n_deep_rows: i64 = 0;
        let mut curr_row: i64 = 0;
        let mut nrows: i64 = 0;

        if let Some(d) = &deep {
            let mut cr = d.last_row as i64;
            while d.rows[cr as usize] == 0 {
                if cr == 0 {
                    if expect_nonroot {
                        warn!("result reconstruction reached the search root");
                        self.root_error = true;
                    }
                    return None;
                }
                cr -= 1;
            }
            n_deep_rows = cr / period as i64 - 1;
            let node_diff = d.node_row as i64 - period as i64 - cr.rem_euclid(period as i64);
            for _ in 0..node_diff {
                node = src.parent(node);
            }
            curr_row = cr - period as i64 + 1;
            nrows = n_deep_rows;
        } else {
            while src.row(node) == 0 {
                node = src.parent(node);
                if node == 0 {
                    if expect_nonroot {
                        warn!("result reconstruction reached the search root");
                        self.root_error = true;
                    }
                    return None;
                }
            }
        }
        nrows = nrows.max(0);

        // Step back to the leading edge of the ship.
        for _ in 0..period - 1 {
            node = src.parent(node);
        }
        if node == 0 {
            if expect_nonroot {
                warn!("result reconstruction reached the search root");
                self.root_error = true;
            }
            return None;
        }

        let mut c = node;
        while c != 0 {
            for _ in 0..period {
                c = src.parent(c);
            }
            nrows += 1;
        }
        let nrows = nrows as usize;

        let mut srows = vec![0u64; nrows + MW + 1];
        let deep_rows = deep.as_ref().map(|d| d.rows);
        for i in (0..nrows).rev() {
            let r = if n_deep_rows > 0 {
                let v = deep_rows.map_or(0, |dr| dr[curr_row as usize]);
                curr_row -= period as i64;
                n_deep_rows -= 1;
                v
            } else {
                let v = src.row(node);
                for _ in 0..period {
                    node = src.parent(node);
                }
                v
            };
            let r = u64::from(r);
            match self.symmetry {
                Symmetry::Asymmetric => srows[i] = r,
                Symmetry::Odd => {
                    srows[i] |= r << (MW - 1);
                    for j in 1..MW {
                        if r & (1 << j) != 0 {
                            srows[i] |= 1 << (MW - 1 - j);
                        }
                    }
                }
                Symmetry::Even => {
                    srows[i] |= r << MW;
                    for j in 0..MW {
                        if r & (1 << j) != 0 {
                            srows[i] |= 1 << (MW - 1 - j);
                        }
                    }
                }
                Symmetry::Gutter => {
                    srows[i] |= r << (MW + 1);
                    for j in 0..MW {
                        if r & (1 << j) != 0 {
                            srows[i + self.gutter_skew] |= 1 << (MW - 1 - j);
                        }
                    }
                }
            }
        }

        // Trim blank rows at both ends.
        let mut end = srows.len();
        while end > 0 && srows[end - 1] == 0 {
            end -= 1;
        }
        let mut start = 0;
        while start < end && srows[start] == 0 {
            start += 1;
        }
        if start >= end {
            return None;
        }
        let mut rows = srows[start..end].to_vec();

        // Left-shift until the pattern touches column 0.
        while rows.iter().all(|r| r & 1 == 0) {
            for r in &mut rows {
                *r >>= 1;
            }
        }
        let width = rows
            .iter()
            .map(|r| 64 - r.leading_zeros() as usize)
            .max()
            .unwrap_or(0);
        Some((rows, width))
    }

    /// True when the pattern is invariant under some proper sub-velocity:
    /// P/p generations composed with a Y/p row shift, for a prime divisor
    /// p of gcd(P, Y).
    fn is_subperiodic(&self, rows: &[u64], width: usize) -> bool {
        for &p in &self.sub_primes {
            let q = self.period as u32 / p;
            let k = i64::from(self.offset / p);
            let margin = q as usize + 1;
            let mut canvas: Vec<u64> = Vec::with_capacity(rows.len() + 2 * margin);
            canvas.resize(margin, 0);
            canvas.extend(rows.iter().map(|r| r << margin));
            canvas.resize(rows.len() + 2 * margin, 0);
            let canvas_width = (width + 2 * margin) as u32;
            let Some(stepped) = grid::step_n(&self.triple, &canvas, canvas_width, q) else {
                continue;
            };
            if grid::shifted_eq(&canvas, &stepped, k) || grid::shifted_eq(&canvas, &stepped, -k) {
                return true;
            }
        }
        false
    }

    fn encode(&self, rows: &[u64], width: usize) -> String {
        let header = format!(
            "x = {}, y = {}, rule = {}\n",
            width,
            rows.len(),
            self.base_rule
        );
        let mut rle = Rle::new(header);
        for &r in rows {
            rle.push_row(r);
        }
        rle.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Queue;
    use qrow_rule::parse_rule;

    fn emitter(symmetry: Symmetry, period: u32, offset: u32, full_period_only: bool) -> Emitter {
        let triple = TripleTable::new(&parse_rule("B3/S23").unwrap());
        Emitter::new(
            "B3/S23".to_owned(),
            symmetry,
            0,
            period,
            offset,
            full_period_only,
            triple,
        )
    }

    /// Chain a fixed per-period row sequence onto the queue and emit it.
    fn chain(q: &mut Queue, rows_per_gen: &[Row]) -> NodeId {
        q.enqueue(0, 0);
        let mut parent = 0;
        for &r in rows_per_gen {
            q.enqueue(parent, r);
            parent = q.bounds().1 - 1;
        }
        parent
    }

    #[test]
    fn rle_machine_formats_runs() {
        let mut rle = Rle::new(String::new());
        rle.push_row(0b1110);
        rle.push_row(0b0001);
        let s = rle.finish();
        assert_eq!(s, "b3o$o!");
    }

    #[test]
    fn rle_line_cap_splits_long_rows() {
        let mut rle = Rle::new(String::new());
        for _ in 0..80 {
            rle.push(b'o');
            rle.push(b'b');
        }
        let s = rle.finish();
        assert!(s.lines().all(|l| l.len() <= MAX_RLE_LINE_WIDTH + 2));
        assert!(s.contains('\n'));
    }

    #[test]
    fn asymmetric_pattern_roundtrip() {
        // Period 1: each node is one generation. Two live rows then the
        // trailing blank period.
        let mut q = Queue::new(10, 2, 4, 1);
        let node = chain(&mut q, &[0b0110, 0b0110, 0]);
        let mut em = emitter(Symmetry::Asymmetric, 1, 1, false);
        let s = em.try_emit(&q, node, None).unwrap();
        assert_eq!(s, "x = 2, y = 2, rule = B3/S23\n2o$2o!");
        // Identical emission is suppressed.
        assert!(em.try_emit(&q, node, None).is_none());
    }

    #[test]
    fn odd_symmetry_unfolds_with_shared_axis() {
        let mut q = Queue::new(10, 2, 3, 1);
        let node = chain(&mut q, &[0b110, 0]);
        let mut em = emitter(Symmetry::Odd, 1, 1, false);
        let s = em.try_emit(&q, node, None).unwrap();
        // Logical 110 (axis column dead) mirrors to five columns with the
        // shared axis in the middle.
        assert_eq!(s, "x = 5, y = 1, rule = B3/S23\n2ob2o!");
    }

    #[test]
    fn even_symmetry_doubles_the_axis_cell() {
        let mut q = Queue::new(10, 2, 3, 1);
        let node = chain(&mut q, &[0b001, 0]);
        let mut em = emitter(Symmetry::Even, 1, 1, false);
        let s = em.try_emit(&q, node, None).unwrap();
        assert_eq!(s, "x = 2, y = 1, rule = B3/S23\n2o!");
    }

    #[test]
    fn gutter_symmetry_keeps_the_empty_column() {
        let mut q = Queue::new(10, 2, 3, 1);
        let node = chain(&mut q, &[0b001, 0]);
        let mut em = emitter(Symmetry::Gutter, 1, 1, false);
        let s = em.try_emit(&q, node, None).unwrap();
        assert_eq!(s, "x = 3, y = 1, rule = B3/S23\nobo!");
    }

    #[test]
    fn blank_chain_is_degenerate() {
        let mut q = Queue::new(10, 2, 4, 1);
        let node = chain(&mut q, &[0, 0]);
        let mut em = emitter(Symmetry::Asymmetric, 1, 1, false);
        assert!(em.try_emit(&q, node, None).is_none());
        assert!(em.root_error());
    }

    #[test]
    fn longest_partial_is_buffered_not_deduped() {
        let mut q = Queue::new(10, 2, 4, 1);
        let node = chain(&mut q, &[0b0010, 0b0111, 0]);
        let mut em = emitter(Symmetry::Asymmetric, 1, 1, false);
        em.buffer_longest(&q, node);
        let buffered = em.longest_partial().unwrap().to_owned();
        assert!(buffered.contains("3o"));
        // Buffering does not poison ship dedup.
        assert!(em.try_emit(&q, node, None).is_some());
    }

    /// Reconstruction that mixes queue rows with a deepening probe's
    /// scratch stack: the probe's rows extend the node's chain seamlessly.
    #[test]
    fn extension_rows_extend_the_queue_chain() {
        let mut q = Queue::new(10, 2, 4, 1);
        let node = chain(&mut q, &[0b001, 0b011, 0b111]);
        // Probe stack: the node's own last three rows followed by two
        // found rows and a blank.
        let stack: Vec<Row> = vec![0b001, 0b011, 0b111, 0b110, 0b100, 0];
        let mut em = emitter(Symmetry::Asymmetric, 1, 1, false);
        let s = em
            .try_emit(
                &q,
                node,
                Some(DeepRows {
                    rows: &stack,
                    node_row: 2,
                    last_row: 5,
                }),
            )
            .unwrap();
        assert_eq!(s, "x = 3, y = 5, rule = B3/S23\no$2o$3o$b2o$2bo!");
    }

    /// A true 2c/4 ship reported at 4c/8 is recognised as subperiodic;
    /// an oscillator with no sub-velocity is not.
    #[test]
    fn subperiodic_results_are_detected() {
        let em = emitter(Symmetry::Asymmetric, 8, 4, true);
        // A vertically travelling lightweight spaceship: moves 2 rows
        // every 4 generations, i.e. exactly the p = 2 sub-velocity of
        // 4c/8.
        let lwss = vec![0b1110u64, 0b1001, 0b1000, 0b1000, 0b0101];
        assert!(em.is_subperiodic(&lwss, 4));

        let em = emitter(Symmetry::Asymmetric, 4, 2, true);
        // A blinker repeats in place; it never matches the required
        // 1-row shift after 2 generations.
        let blinker = vec![0b010u64, 0b010, 0b010];
        assert!(!em.is_subperiodic(&blinker, 3));
    }
}
