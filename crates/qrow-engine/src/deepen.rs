// crates/qrow-engine/src/deepen.rs

//! The parallel deepening pass.
//!
//! When the queue nears capacity, every frontier node is probed by a
//! bounded depth-first search; nodes with no extension of the requested
//! length are emptied (and later compacted away). Successful probes may
//! store their found rows for reuse. Work is distributed over the rayon
//! pool with per-node granularity; workers cooperate through three atomic
//! flags: a running work counter, a hard stop (ship limit or fatal), and
//! a soft "pass has already succeeded" used for early exit when threads
//! start going idle.

use crate::cache::LookaheadCache;
use crate::emit::{DeepRows, Emitter};
use crate::engine::{Abort, Engine};
use crate::extend::{Extensions, EXT_BARE_SUCCESS};
use crate::lookahead::lookahead;
use crate::queue::{QueueView, RowSource, EMPTY_ROW};
use parking_lot::Mutex;
use qrow_core::{DumpMode, NodeId, PhaseTables, Row};
use qrow_index::{bucket, bucket_len, SuccessorIndex};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use tracing::{info, warn};

/// One depth level of a probe: the successor triple it expands under and
/// how many candidates are still untried.
#[derive(Clone, Copy, Default)]
struct Level {
    r1: Row,
    r2: Row,
    succ: Row,
    remain: usize,
}

/// Per-worker scratch: the lookahead cache plus the probe stacks.
pub(crate) struct WorkerState {
    pub(crate) cache: LookaheadCache,
    levels: Vec<Level>,
    rows: Vec<Row>,
}

impl WorkerState {
    pub(crate) fn new(cache_entries: usize) -> Self {
        Self {
            cache: LookaheadCache::new(cache_entries),
            levels: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn reserve(&mut self, need: usize) {
        if self.levels.len() < need {
            self.levels.resize(need, Level::default());
            self.rows.resize(need, 0);
        }
    }
}

/// Everything a probe needs, shared across workers.
struct DeepCtx<'a> {
    idx: &'a SuccessorIndex,
    phases: &'a PhaseTables,
    ext: &'a Extensions,
    emitter: &'a Mutex<Emitter>,
    causes_birth: &'a [bool],
    period: usize,
    width: u32,
    how_deep: usize,
    min_extension: usize,
    print_deep: bool,
    early_exit: bool,
    threads: i64,
    num_ships: u32,
    num_found: &'a AtomicU32,
    abort: &'a AtomicU8,
    remaining: &'a AtomicI64,
    force_exit: &'a AtomicBool,
    passed: &'a AtomicBool,
    queue_phase: u32,
    next_rephase: NodeId,
}

impl DeepCtx<'_> {
    fn phase_of(&self, node: NodeId) -> usize {
        let p = self.period as u32;
        (if node < self.next_rephase {
            self.queue_phase
        } else {
            (self.queue_phase + 1) % p
        }) as usize
    }

    fn stop_requested(&self) -> bool {
        self.force_exit.load(Ordering::Relaxed)
            || (self.early_exit
                && self.remaining.load(Ordering::Relaxed) < self.threads
                && self.passed.load(Ordering::Relaxed))
    }

    fn raise(&self, level: Abort) {
        self.abort.store(level as u8, Ordering::SeqCst);
        self.force_exit.store(true, Ordering::SeqCst);
    }
}

fn fetch_level(ctx: &DeepCtx<'_>, ws: &mut WorkerState, curr_row: usize, phase: usize) {
    let r1 = ws.rows[curr_row - 2 * ctx.period];
    let r2 = ws.rows[curr_row - ctx.period];
    let succ = ws.rows[curr_row - ctx.period + ctx.phases.back[phase]];
    let remain = bucket_len(ctx.idx.record(r1, r2), succ);
    ws.levels[curr_row] = Level {
        r1,
        r2,
        succ,
        remain,
    };
}

/// Store the probe's rows `[0, start_row + got]` as an extension and
/// attach it. A full table is fatal: the search cannot keep its books.
fn save_extension(ctx: &DeepCtx<'_>, deep: &mut u32, rows: &[Row], start_row: usize, got: usize) {
    match ctx.ext.save(&rows[..=start_row + got], (start_row + got) as u16, start_row as u16) {
        Some(idx) => *deep = idx,
        None => {
            warn!("no available extension indices");
            ctx.raise(Abort::Fatal);
        }
    }
}

/// Bounded depth-first probe of one frontier node. Returns false when the
/// node admits no extension of the requested depth (the caller empties
/// its slot).
fn depth_first(
    ctx: &DeepCtx<'_>,
    view: &QueueView<'_>,
    node: NodeId,
    deep: &mut u32,
    ws: &mut WorkerState,
) -> bool {
    let period = ctx.period;
    let start_row = 2 * period + 1;
    ws.reserve(start_row + ctx.how_deep + 2);

    let mut x = node;
    for i in (0..start_row).rev() {
        ws.rows[i] = view.row(x);
        x = view.parent(x);
    }
    let mut p_phase = (ctx.phase_of(node) + 1) % period;
    let mut curr_row = start_row;

    // Reload a previously saved extension, positioning the stacks past
    // its rows.
    let saved = *deep;
    if saved > 1 {
        match reload_extension(ctx, ws, node, saved, start_row, p_phase) {
            Reload::Keep => return true,
            Reload::Resume { next_row, next_phase } => {
                curr_row = next_row;
                p_phase = next_phase;
            }
            Reload::Absent => {}
        }
    }
    *deep = 0;

    fetch_level(ctx, ws, curr_row, p_phase);

    loop {
        if ws.levels[curr_row].remain == 0 {
            if curr_row == start_row {
                return false;
            }
            curr_row -= 1;
            p_phase = (p_phase + period - 1) % period;
            continue;
        }

        let lv = ws.levels[curr_row];
        ws.rows[curr_row] = {
            let b = bucket(ctx.idx.record(lv.r1, lv.r2), lv.succ);
            b[b.len() - lv.remain]
        };
        ws.levels[curr_row].remain = lv.remain - 1;

        if !lookahead(
            ctx.idx,
            ctx.phases,
            &mut ws.cache,
            &ws.rows,
            curr_row,
            p_phase,
            period,
            ctx.width,
        ) {
            continue;
        }

        // Cooperative exit: the pass already has what it needs, so
        // pretend success and let the BFS driver revisit this node.
        if ctx.stop_requested() {
            *deep = EXT_BARE_SUCCESS;
            let got = curr_row - start_row;
            if got > 0 && got >= ctx.min_extension {
                save_extension(ctx, deep, &ws.rows, start_row, got);
            }
            return true;
        }

        curr_row += 1;
        p_phase = (p_phase + 1) % period;

        if curr_row > start_row + ctx.how_deep {
            *deep = EXT_BARE_SUCCESS;
            if ctx.how_deep >= ctx.min_extension {
                save_extension(ctx, deep, &ws.rows, start_row, ctx.how_deep);
            }
            ctx.passed.store(true, Ordering::SeqCst);

            // Did the extension finish a whole ship?
            if !ctx.print_deep {
                return true;
            }
            for i in 1..=period {
                if ws.rows[curr_row - i] != 0 {
                    return true;
                }
            }
            let cr = curr_row - period;
            for i in 1..=period {
                if ctx.causes_birth[ws.rows[cr - i] as usize] {
                    return true;
                }
            }
            let mut em = ctx.emitter.lock();
            if let Some(rle) = em.try_emit(
                view,
                node,
                Some(DeepRows {
                    rows: &ws.rows[..],
                    node_row: start_row - 1,
                    last_row: cr + period - 1,
                }),
            ) {
                println!("\n{rle}");
                let found = ctx.num_found.fetch_add(1, Ordering::Relaxed) + 1;
                if ctx.num_ships > 0 && found >= ctx.num_ships {
                    ctx.raise(Abort::ShipLimit);
                }
            }
            if em.root_error() {
                ctx.raise(Abort::Fatal);
            }
            return true;
        }

        fetch_level(ctx, ws, curr_row, p_phase);
    }
}

enum Reload {
    /// Extension is at least as long as this pass; keep it attached.
    Keep,
    /// Stacks positioned past the extension's rows.
    Resume { next_row: usize, next_phase: usize },
    /// No usable extension.
    Absent,
}

fn reload_extension(
    ctx: &DeepCtx<'_>,
    ws: &mut WorkerState,
    node: NodeId,
    idx: u32,
    start_row: usize,
    p_phase: usize,
) -> Reload {
    let header = ctx.ext.with_slot(idx, |s| s.map(|s| (s[0] as usize, s[1] as usize)));
    let Some((total, cursor)) = header else {
        return Reload::Absent;
    };
    if total >= ctx.how_deep + cursor {
        return Reload::Keep;
    }

    let matches = ctx.ext.with_slot(idx, |s| {
        let Some(s) = s else { return false };
        let start = s[1] as usize + 1;
        for k in 0..2 * ctx.period {
            if s[start - k] != ws.rows[start_row - 1 - k] {
                return false;
            }
        }
        true
    });
    if !matches {
        warn!(node, "extension rows do not match node rows; dropping extension");
        debug_assert!(false, "extension/ancestor mismatch in depth_first");
        ctx.ext.release(idx);
        return Reload::Absent;
    }

    let Some(buf) = ctx.ext.take(idx) else {
        return Reload::Absent;
    };
    let count = total - cursor;
    ws.reserve(start_row + count + ctx.how_deep + 2);
    for k in 0..=count {
        ws.rows[start_row + k] = buf[2 + cursor + k];
    }
    let mut phase = p_phase;
    for cr in start_row..=start_row + count {
        let r1 = ws.rows[cr - 2 * ctx.period];
        let r2 = ws.rows[cr - ctx.period];
        let succ = ws.rows[cr - ctx.period + ctx.phases.back[phase]];
        let b = bucket(ctx.idx.record(r1, r2), succ);
        let mut remain = b.len();
        loop {
            if remain == 0 {
                warn!(node, "saved extension row is not a legal successor; dropping extension");
                debug_assert!(false, "extension row missing from successor bucket");
                return Reload::Absent;
            }
            if b[b.len() - remain] == ws.rows[cr] {
                break;
            }
            remain -= 1;
        }
        ws.levels[cr] = Level {
            r1,
            r2,
            succ,
            remain: remain - 1,
        };
        phase = (phase + 1) % ctx.period;
    }
    Reload::Resume {
        next_row: start_row + count + 1,
        next_phase: phase,
    }
}

impl Engine {
    /// One deepening pass over the whole frontier, followed by compaction
    /// (and a checkpoint when the dump interval has elapsed).
    pub(crate) fn deepen(&mut self) {
        let depth = self.queue.current_depth();
        let mut amount = if depth >= self.last_deep {
            self.params.min_deep
        } else {
            self.last_deep + self.params.min_deep - depth
        };
        if self.first_deep > 0 {
            amount = self.first_deep;
            self.first_deep = 0;
        }
        self.last_deep = depth + amount;

        let (head, tail) = self.queue.bounds();
        info!(
            "depth {}, deepening {}, {}/{}",
            depth,
            amount,
            human(tail - head),
            human(tail)
        );

        let remaining = AtomicI64::new(i64::from(tail - head));
        let force_exit = AtomicBool::new(false);
        let passed = AtomicBool::new(false);
        let (queue_phase, next_rephase) = self.queue.phase_snapshot();

        {
            let ctx = DeepCtx {
                idx: &self.index,
                phases: &self.phases,
                ext: &self.extensions,
                emitter: &self.emitter,
                causes_birth: &self.causes_birth,
                period: self.params.period as usize,
                width: self.params.width,
                how_deep: amount as usize,
                min_extension: self.params.min_extension as usize,
                print_deep: self.params.print_deep,
                early_exit: self.params.early_exit,
                threads: self.params.threads as i64,
                num_ships: self.params.num_ships,
                num_found: &self.num_found,
                abort: &self.abort,
                remaining: &remaining,
                force_exit: &force_exit,
                passed: &passed,
                queue_phase,
                next_rephase,
            };

            let len = (tail - head) as usize;
            let (low_rows, high_rows) = self.queue.rows.split_at_mut(head as usize);
            let low_rows: &[Row] = low_rows;
            let frontier = &mut high_rows[..len];
            let deep_lo = self.queue.deep_head as usize;
            let deep_slice = &mut self.queue.deep_indices[deep_lo..deep_lo + len];
            let base: &[NodeId] = &self.queue.base;
            let width = self.queue.width;
            let base_bits = self.queue.base_bits;
            let workers = &self.workers;

            self.pool.install(|| {
                frontier
                    .par_iter_mut()
                    .zip(deep_slice.par_iter_mut())
                    .enumerate()
                    .for_each(|(k, (cell, deep))| {
                        if *cell == EMPTY_ROW {
                            ctx.remaining.fetch_sub(1, Ordering::Relaxed);
                            return;
                        }
                        let node = head + k as NodeId;
                        let wi = rayon::current_thread_index().unwrap_or(0);
                        let mut ws = workers[wi].lock();
                        let view = QueueView {
                            rows: low_rows,
                            base,
                            width,
                            base_bits,
                            own: (node, *cell),
                        };
                        if !depth_first(&ctx, &view, node, deep, &mut ws) {
                            *cell = EMPTY_ROW;
                        }
                        ctx.remaining.fetch_sub(1, Ordering::Relaxed);
                    });
            });
        }

        // Checkpoint cadence: at most one dump per interval, taken inside
        // the compaction that follows.
        let dump_pending = self.dump_mode != DumpMode::Disabled
            && self.last_dump.elapsed().as_secs() >= self.params.dump_interval_secs;
        if dump_pending {
            self.last_dump = std::time::Instant::now();
        }
        let dumped = self.do_compact(dump_pending);

        let (head, tail) = self.queue.bounds();
        info!("-> {}/{}", human(tail - head), human(tail));
        if let Some(path) = dumped {
            info!("State dumped to {}", path.display());
            if self.dump_num >= crate::checkpoint::DUMP_LIMIT {
                info!("Sequential dump limit reached. Changing to overwrite mode.");
            }
        } else if dump_pending {
            info!("State dump unsuccessful");
        }
    }
}

/// Humanised node counts for progress lines (1.2k, 34M).
pub(crate) fn human(n: u32) -> String {
    let (scaled, suffix) = if n >= 1_000_000 {
        (n / 100_000, "M")
    } else if n >= 1_000 {
        (n / 100, "k")
    } else {
        return n.to_string();
    };
    if scaled >= 100 {
        format!("{}{suffix}", scaled / 10)
    } else {
        format!("{}.{}{suffix}", scaled / 10, scaled % 10)
    }
}

#[cfg(test)]
mod tests {
    use super::human;

    #[test]
    fn humanised_counts() {
        assert_eq!(human(999), "999");
        assert_eq!(human(1_000), "1.0k");
        assert_eq!(human(1_234), "1.2k");
        assert_eq!(human(123_456), "123k");
        assert_eq!(human(1_200_000), "1.2M");
        assert_eq!(human(34_000_000), "34M");
    }
}
