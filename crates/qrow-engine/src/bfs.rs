// crates/qrow-engine/src/bfs.rs

//! Breadth-first expansion of one frontier node.

use crate::engine::{Abort, Engine};
use crate::lookahead::lookahead;
use crate::queue::{Queue, RowSource};
use qrow_core::{NodeId, Row, MAX_PERIOD};
use qrow_index::{bucket, bucket_len};
use tracing::warn;

/// Can the search stop at `n`? The last P rows must be empty and the P
/// rows before them must not give birth into an empty neighborhood.
pub(crate) fn terminal(q: &Queue, causes_birth: &[bool], period: usize, mut n: NodeId) -> bool {
    for _ in 0..period {
        if q.row(n) != 0 {
            return false;
        }
        n = q.parent(n);
    }
    for _ in 0..period {
        if causes_birth[q.row(n) as usize] {
            return false;
        }
        n = q.parent(n);
    }
    true
}

impl Engine {
    /// Expand `node`: replay its saved extension row if one exists, then
    /// try every remaining successor row gated by the visited set and the
    /// lookahead.
    pub(crate) fn process(&mut self, node: NodeId) {
        let period = self.params.period as usize;
        let width = self.params.width;
        let curr_row = 2 * period + 1;
        let mut p_rows = [0 as Row; 2 * MAX_PERIOD as usize + 2];

        let node_phase = self.queue.peek_phase(node) as usize;
        let mut x = node;
        for i in (0..curr_row).rev() {
            p_rows[i] = self.queue.row(x);
            x = self.queue.parent(x);
        }
        let p_phase = (node_phase + 1) % period;

        // The successor triple this node expands under.
        let r1 = p_rows[curr_row - 2 * period];
        let r2 = p_rows[curr_row - period];
        let succ = p_rows[curr_row - period + self.phases.back[p_phase]];
        let n_candidates = bucket_len(self.index.record(r1, r2), succ);

        let deep_index = self.queue.deep_index_at_old_head();
        let mut first_row = 0usize;
        if node != 0 && deep_index > 1 {
            first_row = self.replay_extension(node, deep_index, r1, r2, succ, n_candidates);
        }
        self.queue.clear_old_head_deep_index();

        for i in first_row..n_candidates {
            let candidate = bucket(self.index.record(r1, r2), succ)[i];
            p_rows[curr_row] = candidate;
            if self.visited.is_visited(&self.queue, node, candidate) {
                continue;
            }
            let passes = {
                let mut worker = self.workers[0].lock();
                lookahead(
                    &self.index,
                    &self.phases,
                    &mut worker.cache,
                    &p_rows,
                    curr_row,
                    p_phase,
                    period,
                    width,
                )
            };
            if !passes {
                continue;
            }
            self.queue.enqueue(node, candidate);
            if self.queue.hit_capacity() {
                return;
            }
            let tail_node = self.queue.bounds().1 - 1;
            self.note_depth(tail_node);
            if terminal(&self.queue, &self.causes_birth, period, tail_node)
                && !terminal(
                    &self.queue,
                    &self.causes_birth,
                    period,
                    self.queue.parent(tail_node),
                )
            {
                self.emit_from_queue(tail_node);
            }
            self.visited.set_visited(&self.queue, tail_node);
        }
    }

    /// Advance a previously saved extension by one row: sanity-check it
    /// against the node's ancestors, enqueue the next stored row, and hand
    /// the (shrunk) extension to the new tail node. Returns the candidate
    /// index to resume normal expansion at.
    fn replay_extension(
        &mut self,
        node: NodeId,
        deep_index: u32,
        r1: Row,
        r2: Row,
        succ: Row,
        n_candidates: usize,
    ) -> usize {
        let period = self.params.period as usize;

        let matches = {
            let q = &self.queue;
            self.extensions.with_slot(deep_index, |slot| {
                let Some(slot) = slot else { return false };
                let start = slot[1] as usize + 1;
                let mut y = node;
                for k in 0..2 * period {
                    if slot[start - k] != q.row(y) {
                        return false;
                    }
                    y = q.parent(y);
                }
                true
            })
        };
        if !matches {
            warn!(node, "extension rows do not match node rows; dropping extension");
            debug_assert!(false, "extension/ancestor mismatch in process");
            self.extensions.release(deep_index);
            return 0;
        }

        // Read the next stored row and advance the cursor.
        let (next, exhausted) = self.extensions.with_slot(deep_index, |slot| {
            let slot = slot.expect("extension vanished under the BFS driver");
            let next = slot[slot[1] as usize + 2];
            slot[1] += 1;
            (next, slot[1] > slot[0])
        });

        let pos = (0..n_candidates)
            .find(|&i| bucket(self.index.record(r1, r2), succ)[i] == next);
        let Some(pos) = pos else {
            warn!(node, "saved extension row is not a legal successor; dropping extension");
            debug_assert!(false, "extension row missing from successor bucket");
            self.extensions.release(deep_index);
            return 0;
        };

        let mut handed_over = false;
        if !self.visited.is_visited(&self.queue, node, next) {
            self.queue.enqueue(node, next);
            if self.queue.hit_capacity() {
                return n_candidates;
            }
            let tail_node = self.queue.bounds().1 - 1;
            self.queue.attach_deep_index_to_tail(deep_index);
            handed_over = !exhausted;
            self.note_depth(tail_node);
            if terminal(&self.queue, &self.causes_birth, period, tail_node)
                && !terminal(
                    &self.queue,
                    &self.causes_birth,
                    period,
                    self.queue.parent(tail_node),
                )
            {
                self.emit_from_queue(tail_node);
            }
            self.visited.set_visited(&self.queue, tail_node);
            if exhausted {
                self.queue.attach_deep_index_to_tail(0);
            }
        }
        // Exhausted extensions and extensions whose replay was a visited
        // duplicate have no owner any more.
        if !handed_over {
            self.extensions.release(deep_index);
        }
        pos + 1
    }

    /// Track the deepest partial seen; buffer it when configured.
    fn note_depth(&mut self, tail_node: NodeId) {
        let depth = self.queue.current_depth();
        if depth > self.longest {
            if self.params.print_longest {
                self.emitter.lock().buffer_longest(&self.queue, tail_node);
            }
            self.longest = depth;
        }
    }

    /// Emit a completed result found in the queue.
    pub(crate) fn emit_from_queue(&mut self, node: NodeId) {
        let mut em = self.emitter.lock();
        if let Some(rle) = em.try_emit(&self.queue, node, None) {
            println!("\n{rle}");
            drop(em);
            self.record_found();
        } else if em.root_error() {
            self.set_abort(Abort::Fatal);
        }
    }

    /// Count one emitted result; flips the abort flag at the ship limit.
    pub(crate) fn record_found(&self) {
        let found = self
            .num_found
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if self.params.num_ships > 0 && found >= self.params.num_ships {
            self.set_abort(Abort::ShipLimit);
        }
    }
}
