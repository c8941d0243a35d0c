// crates/qrow-engine/src/visited.rs

//! Duplicate elimination over partial patterns.
//!
//! A state is its last 2·P rows. The table is open-addressed with a single
//! probe (collisions simply evict), indexed by a rolling ×269 polynomial
//! hash of the row chain read through parent pointers. Asymmetric searches
//! fold mirror images together: the hash adds the flipped row, and
//! structural confirmation also tries the flipped chain.

use crate::queue::{Queue, RowSource};
use qrow_core::{flip_row, NodeId, Row};

/// The visited-state hash table. Size 0 disables everything except the
/// root check.
pub struct VisitedSet {
    table: Vec<NodeId>,
    mask: u64,
    rows_in_state: usize,
    flip: Option<Vec<Row>>,
}

impl VisitedSet {
    /// `hash_bits` 0 disables the table; `symmetrise` folds mirror images
    /// (asymmetric searches only).
    #[must_use]
    pub fn new(hash_bits: u32, rows_in_state: usize, width: u32, symmetrise: bool) -> Self {
        let size = if hash_bits == 0 { 0 } else { 1usize << hash_bits };
        Self {
            table: vec![0; size],
            mask: size.wrapping_sub(1) as u64,
            rows_in_state,
            flip: symmetrise.then(|| (0..1u32 << width).map(|r| flip_row(r as Row, width)).collect()),
        }
    }

    /// Clear the table.
    pub fn reset(&mut self) {
        self.table.fill(0);
    }

    fn hash(&self, q: &Queue, mut b: NodeId, r: Row) -> usize {
        let mut h = i64::from(r);
        if let Some(flip) = &self.flip {
            h += i64::from(flip[r as usize]);
        }
        for _ in 0..self.rows_in_state {
            let row = q.row(b);
            h = h.wrapping_mul(269).wrapping_add(i64::from(row));
            if let Some(flip) = &self.flip {
                h = h.wrapping_add(i64::from(flip[row as usize]));
            }
            b = q.parent(b);
        }
        h = h.wrapping_add((h >> 16).wrapping_mul(269));
        h = h.wrapping_add((h >> 8).wrapping_mul(269));
        (h as u64 & self.mask) as usize
    }

    /// Structural equality: does the chain `q_node + r` match the chain at
    /// `p` over the state rows?
    fn same(&self, q: &Queue, mut p: NodeId, mut qn: NodeId, mut r: Row) -> bool {
        let cap = q.capacity();
        for _ in 0..self.rows_in_state {
            if p >= cap || qn >= cap || q.is_empty_slot(p) || q.is_empty_slot(qn) {
                return false;
            }
            if q.row(p) != r {
                return false;
            }
            p = q.parent(p);
            r = q.row(qn);
            qn = q.parent(qn);
        }
        true
    }

    fn same_flipped(&self, q: &Queue, mut p: NodeId, mut qn: NodeId, mut r: Row) -> bool {
        let Some(flip) = &self.flip else { return false };
        let cap = q.capacity();
        for _ in 0..self.rows_in_state {
            if p >= cap || qn >= cap || q.is_empty_slot(p) || q.is_empty_slot(qn) {
                return false;
            }
            if flip[q.row(p) as usize] != r {
                return false;
            }
            p = q.parent(p);
            r = q.row(qn);
            qn = q.parent(qn);
        }
        true
    }

    /// Has the state `parent-chain(b) + r` been seen? The empty state
    /// (node 0's chain) is always considered visited.
    #[must_use]
    pub fn is_visited(&self, q: &Queue, b: NodeId, r: Row) -> bool {
        if self.same(q, 0, b, r) {
            return true;
        }
        if self.table.is_empty() {
            return false;
        }
        let node = self.table[self.hash(q, b, r)];
        if node == 0 {
            return false;
        }
        self.same(q, node, b, r) || self.same_flipped(q, node, b, r)
    }

    /// Record `node` (not a prospective child) as visited.
    pub fn set_visited(&mut self, q: &Queue, node: NodeId) {
        if self.table.is_empty() {
            return;
        }
        let h = self.hash(q, q.parent(node), q.row(node));
        self.table[h] = node;
    }
}
