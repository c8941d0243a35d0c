// crates/qrow-engine/src/compact.rs

//! In-place queue compaction.
//!
//! Three passes: (1) backwards from the tail, emptying interior nodes no
//! surviving node points at; (2) forwards, rewriting each parent pointer
//! as a one-bit "same parent as previous / next parent" tag; (3)
//! backwards, sliding nodes to the high end of the array to close gaps.
//! After pass 3 the range `[q_start, q_end)` is dense — the form
//! checkpoints are written in. Part 2 (a fourth pass) re-enqueues that
//! dense form at the front, re-establishing absolute parents, group
//! bases, the visited set, and the extension attachments.

use crate::extend::Extensions;
use crate::queue::{Queue, RowSource};
use crate::visited::VisitedSet;
use anyhow::{bail, Result};
use qrow_core::NodeId;
use tracing::warn;

/// Passes 1–3: compress the queue into the dense high-end form.
///
/// The caller must ensure the queue is non-empty and `tail - 1` is a
/// non-empty slot.
pub fn part1(q: &mut Queue) {
    q.q_end = q.tail;

    // Pass 1. Invariants: everything after y is still live; everything
    // after x points past y; x is non-empty and points at or before y. If
    // x does not point at y, nothing does.
    let mut x = i64::from(q.tail) - 1;
    let mut y = i64::from(q.head) - 1;
    while y > 0 {
        if !q.is_empty_slot(y as NodeId) {
            if y > i64::from(q.parent(x as NodeId)) {
                q.make_empty(y as NodeId);
            } else {
                while q.is_empty_slot(x as NodeId) || i64::from(q.parent(x as NodeId)) == y {
                    x -= 1;
                }
            }
        }
        y -= 1;
    }

    // Pass 2: parent pointers become one-bit deltas. After pass 1 every
    // surviving offset is zero or one.
    let mut prev_parent: NodeId = 0;
    for i in 0..q.tail {
        if !q.is_empty_slot(i) {
            if q.parent(i) == prev_parent {
                let row = q.row(i);
                q.rows[i as usize] = row;
            } else {
                prev_parent = q.parent(i);
                let row = q.row(i);
                q.rows[i as usize] = (1 << q.width) | row;
            }
        }
    }

    // Pass 3: slide everything to the high end. y reads, x writes.
    let mut x = i64::from(q.tail) - 1;
    let mut y = x;
    loop {
        if i64::from(q.head) == y {
            q.head = x as NodeId;
        }
        if !q.is_empty_slot(y as NodeId) {
            q.rows[x as usize] = q.rows[y as usize];
            x -= 1;
        }
        if y == 0 {
            break;
        }
        y -= 1;
    }
    q.q_start = (x + 1) as NodeId;
}

/// Pass 4: re-enqueue the dense form from the front, rebuilding absolute
/// parents, bases, the visited set, and the phase bookkeeping; then repack
/// extension attachments to match the new node positions.
///
/// # Errors
///
/// Fails when the extension attachments outnumber the queue (internal
/// limit; the search cannot continue).
pub fn part2(
    q: &mut Queue,
    visited: &mut VisitedSet,
    ext: &Extensions,
    period: usize,
) -> Result<()> {
    q.tail = 0;
    let mut parent: NodeId = 0;
    visited.reset();
    for x in q.q_start..q.q_end {
        if q.offset_field(x) != 0 {
            // Tag bit set: step to the next surviving parent.
            parent += 1;
            while q.is_empty_slot(parent) {
                parent += 1;
            }
        }
        let row = q.row(x);
        q.enqueue(parent, row);
        if q.head == x {
            q.head = q.tail - 1;
        }
        visited.set_visited(q, q.tail - 1);
    }
    q.rephase();

    // Repack extension attachments to the high end, preserving order.
    let size = q.deep_indices.len();
    let mut j = size as i64 - 1;
    for i in (0..size).rev() {
        if q.deep_indices[i] != 0 {
            let v = q.deep_indices[i];
            q.deep_indices[i] = 0;
            q.deep_indices[j as usize] = v;
            j -= 1;
        }
    }
    if q.deep_indices[0] != 0 {
        bail!("extension queue has too many elements");
    }

    // Respace them against the new frontier, sanity-checking each saved
    // extension against its node's actual ancestor rows.
    let mut i = 0usize;
    let mut src = 0usize;
    while src < size && q.deep_indices[src] == 0 {
        src += 1;
    }
    let (head, tail) = q.bounds();
    let mut x = head;
    while x < tail && src < size {
        if q.is_empty_slot(x) {
            i += 1;
            x += 1;
            continue;
        }
        let idx = q.deep_indices[src];
        q.deep_indices[i] = idx;
        if idx > 1 {
            let matches = {
                let qr: &Queue = q;
                ext.with_slot(idx, |slot| {
                    let Some(slot) = slot else { return false };
                    let start = slot[1] as usize + 1;
                    let mut node = x;
                    for k in 0..2 * period {
                        if slot[start - k] != qr.row(node) {
                            return false;
                        }
                        node = qr.parent(node);
                    }
                    true
                })
            };
            if !matches {
                warn!(node = x, "extension rows do not match node rows; dropping extension");
                debug_assert!(false, "extension/ancestor mismatch after compaction");
                ext.release(idx);
                q.deep_indices[i] = 0;
            }
        }
        if src > i {
            q.deep_indices[src] = 0;
        }
        i += 1;
        src += 1;
        x += 1;
    }
    for k in (tail - head) as usize..size {
        q.deep_indices[k] = 0;
    }
    q.deep_head = 0;
    q.deep_tail = tail - head;
    Ok(())
}
