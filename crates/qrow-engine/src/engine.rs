// crates/qrow-engine/src/engine.rs

//! The owned search engine.

use crate::checkpoint;
use crate::compact;
use crate::deepen::WorkerState;
use crate::emit::{DeepRows, Emitter};
use crate::extend::Extensions;
use crate::queue::{Queue, RowSource};
use crate::visited::VisitedSet;
use crate::LookaheadCache;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use qrow_core::{BoundarySymmetry, DumpMode, PhaseTables, Row, SearchParams, Symmetry};
use qrow_index::SuccessorIndex;
use qrow_rule::{base_rule, parse_rule, TripleTable};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Instant;
use tracing::{error, info};

/// Why (or whether) the search is stopping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Abort {
    /// Not aborting.
    None = 0,
    /// Internal or resource failure.
    Fatal = 1,
    /// The BFS queue filled up; the search ends cleanly but incompletely.
    QueueFull = 2,
    /// The requested number of ships was found.
    ShipLimit = 3,
}

/// Final outcome of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The search space was exhausted.
    Complete,
    /// Stopped at the queue-size limit.
    QueueFull,
    /// Stopped at the requested ship count.
    ShipLimit,
}

/// The search engine: immutable configuration plus all runtime state.
pub struct Engine {
    pub(crate) params: SearchParams,
    pub(crate) phases: PhaseTables,
    pub(crate) index: SuccessorIndex,
    pub(crate) queue: Queue,
    pub(crate) visited: VisitedSet,
    pub(crate) extensions: Extensions,
    pub(crate) emitter: Mutex<Emitter>,
    pub(crate) causes_birth: Vec<bool>,
    pub(crate) workers: Vec<Mutex<WorkerState>>,
    pub(crate) pool: rayon::ThreadPool,

    pub(crate) num_found: AtomicU32,
    pub(crate) abort: AtomicU8,
    pub(crate) longest: u32,
    pub(crate) last_deep: u32,
    pub(crate) first_deep: u32,

    pub(crate) dump_mode: DumpMode,
    pub(crate) dump_num: u32,
    pub(crate) dump_root: String,
    pub(crate) last_dump: Instant,
}

impl Engine {
    /// Build the engine: rule tables, successor index (with its warm
    /// records), queue, visited set, worker pool and caches.
    ///
    /// # Errors
    ///
    /// Configuration that survived validation can still fail here on
    /// resource grounds (memory cap, thread-pool construction).
    pub fn new(params: SearchParams) -> Result<Self> {
        let rule_table =
            parse_rule(&params.rule).with_context(|| format!("failed to parse rule {}", params.rule))?;
        let evaluator = qrow_core::RowEvaluator::new(
            &rule_table,
            params.width,
            params.symmetry,
            params.boundary,
            params.gutter_skew,
        );
        let causes_birth = evaluator.causes_birth_table();

        let cache_entries = LookaheadCache::entries_for_budget(params.cache_mem_mb);
        if params.mem_limit_mb >= 0 {
            let cache_bytes = LookaheadCache::bytes(cache_entries) * params.threads as u64;
            if cache_bytes > (params.mem_limit_mb as u64) << 20 {
                bail!("not enough memory to allocate the lookahead cache");
            }
        }

        let index = SuccessorIndex::new(evaluator, params.reorder, params.mem_limit_mb)
            .context("building the successor index")?;
        if index.memory_exceeded() {
            bail!("memory limit exceeded while building the successor index");
        }

        let queue = Queue::new(
            params.queue_bits,
            params.base_bits,
            params.width,
            params.period,
        );
        let visited = VisitedSet::new(
            params.hash_bits,
            params.rows_in_state(),
            params.width,
            params.symmetry == Symmetry::Asymmetric,
        );
        let extensions = Extensions::new(2usize << params.depth_limit);
        let emitter = Emitter::new(
            base_rule(&params.rule),
            params.symmetry,
            params.gutter_skew,
            params.period,
            params.offset,
            params.full_period_only,
            TripleTable::new(&rule_table),
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .build()
            .context("building the worker pool")?;
        let workers = (0..params.threads.max(1))
            .map(|_| Mutex::new(WorkerState::new(cache_entries)))
            .collect();

        let unix_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let dump_root = checkpoint::resolve_dump_root(&params.dump_root, &params.rule, unix_time);

        Ok(Self {
            phases: PhaseTables::new(params.period, params.offset),
            first_deep: params.first_deep,
            dump_mode: params.dump_mode,
            params,
            index,
            queue,
            visited,
            extensions,
            emitter: Mutex::new(emitter),
            causes_birth,
            workers,
            pool,
            num_found: AtomicU32::new(0),
            abort: AtomicU8::new(Abort::None as u8),
            longest: 0,
            last_deep: 0,
            dump_num: 1,
            dump_root,
            last_dump: Instant::now(),
        })
    }

    /// Current abort level.
    #[must_use]
    pub fn abort(&self) -> Abort {
        match self.abort.load(Ordering::Relaxed) {
            1 => Abort::Fatal,
            2 => Abort::QueueFull,
            3 => Abort::ShipLimit,
            _ => Abort::None,
        }
    }

    pub(crate) fn set_abort(&self, level: Abort) {
        self.abort.store(level as u8, Ordering::SeqCst);
    }

    /// Ships/waves emitted so far.
    #[must_use]
    pub fn num_found(&self) -> u32 {
        self.num_found.load(Ordering::Relaxed)
    }

    /// Maximum depth reached.
    #[must_use]
    pub fn longest_depth(&self) -> u32 {
        self.longest
    }

    /// Height in rows of the last emitted result, if any.
    #[must_use]
    pub fn last_result_height(&self) -> Option<usize> {
        self.emitter.lock().previous_height()
    }

    /// The search parameters.
    #[must_use]
    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Seed a fresh search: the empty root, plus optional initial rows
    /// (2·P lines of `.`/`o`, echoed as they are consumed).
    ///
    /// # Errors
    ///
    /// Malformed initial-rows files are configuration errors.
    pub fn seed(&mut self, init_rows: Option<&Path>) -> Result<()> {
        self.queue.reset();
        self.visited.reset();
        self.queue.enqueue(0, 0);

        if let Some(path) = init_rows {
            let f = std::fs::File::open(path)
                .with_context(|| format!("open initial rows file {}", path.display()))?;
            let mut lines = std::io::BufReader::new(f).lines();
            println!("Starting search from rows in {}:", path.display());
            for _ in 0..2 * self.params.period {
                let line = lines
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("initial rows file is too short"))??;
                let line = line.trim_end();
                let mut row: Row = 0;
                for j in 0..self.params.width as usize {
                    let c = line
                        .as_bytes()
                        .get(self.params.width as usize - j - 1)
                        .copied()
                        .ok_or_else(|| anyhow::anyhow!("initial row is too short: {line:?}"))?;
                    if c != b'.' {
                        row |= 1 << j;
                    }
                }
                println!("{}", render_row(row, self.params.width));
                let parent = self.queue.dequeue();
                self.queue.enqueue(parent, row);
            }
        }
        self.queue.rephase();
        Ok(())
    }

    /// Restore a dumped state and finish its compaction.
    ///
    /// # Errors
    ///
    /// Malformed or incompatible dumps are fatal.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let st = checkpoint::load_state(path, &mut self.queue, &self.extensions)
            .with_context(|| format!("load from file {} failed", path.display()))?;
        self.last_deep = st.last_deep;
        self.dump_num = if self.dump_mode == DumpMode::Sequential {
            1
        } else {
            st.dump_num
        };
        compact::part2(
            &mut self.queue,
            &mut self.visited,
            &self.extensions,
            self.params.period as usize,
        )?;
        info!("State successfully loaded from file {}", path.display());
        Ok(())
    }

    /// The breadth-first driver: expand nodes until the space is
    /// exhausted or an abort level is raised, deepening whenever the
    /// frontier nears the queue's limits.
    ///
    /// # Errors
    ///
    /// Resource exhaustion (memory cap, internal table overflow) is
    /// returned as an error; queue-full and ship-limit stops are normal
    /// outcomes.
    pub fn run(&mut self) -> Result<Outcome> {
        let depth_trigger = 1u32 << self.params.depth_limit;
        let capacity = self.queue.capacity();

        while self.abort() == Abort::None && !self.queue.is_drained() {
            if self.index.memory_exceeded() {
                bail!("aborting due to excessive memory usage");
            }
            let (head, tail) = self.queue.bounds();
            if tail - head >= depth_trigger || tail >= capacity - capacity / 16 {
                self.deepen();
            } else if self.params.every_depth && head == self.queue.next_rephase {
                self.deepen();
            } else {
                let node = self.queue.dequeue();
                self.process(node);
                if self.queue.hit_capacity() && self.abort() == Abort::None {
                    info!("Exceeded {} node limit, search aborted", capacity);
                    self.set_abort(Abort::QueueFull);
                }
            }
        }

        match self.abort() {
            Abort::Fatal => bail!("search aborted on an internal error"),
            Abort::QueueFull => Ok(Outcome::QueueFull),
            Abort::ShipLimit => Ok(Outcome::ShipLimit),
            Abort::None => Ok(Outcome::Complete),
        }
    }

    /// Print the final report: counts, maximum depth, and the longest
    /// partial (suppressed after a ship-limit stop).
    pub fn final_report(&self) {
        info!("Search complete.");
        let kind = if self.params.boundary == BoundarySymmetry::Undefined {
            "spaceship"
        } else {
            "wave"
        };
        let found = self.num_found();
        println!(
            "\n{found} {kind}{} found.",
            if found == 1 { "" } else { "s" }
        );
        println!("Maximum depth reached: {}", self.longest);
        if self.params.print_longest && self.abort() != Abort::ShipLimit {
            match self.emitter.lock().longest_partial() {
                Some(rle) => println!("Longest partial result:\n\n{rle}"),
                None => println!("No partial results found."),
            }
        }
    }

    /// Emit every frontier node's partial pattern, newest first, using
    /// stored extensions where present.
    pub fn preview(&mut self) {
        let (head, tail) = self.queue.bounds();
        let mut first = head;
        while first < tail && self.queue.is_empty_slot(first) {
            first += 1;
        }
        if first >= tail {
            return;
        }
        let mut j = tail - 1;
        loop {
            if !self.queue.is_empty_slot(j) {
                let deep_idx =
                    self.queue.deep_indices[(self.queue.deep_head + (j - head)) as usize];
                let rle = if deep_idx > 1 {
                    let period = self.params.period as usize;
                    let mut p_rows: Vec<Row> = Vec::new();
                    let mut x = j;
                    for _ in 0..=2 * period {
                        p_rows.push(self.queue.row(x));
                        x = self.queue.parent(x);
                    }
                    p_rows.reverse();
                    let ok = self.extensions.with_slot(deep_idx, |s| {
                        let Some(s) = s else { return false };
                        let (total, cursor) = (s[0] as usize, s[1] as usize);
                        for k in cursor..=total {
                            p_rows.push(s[2 + k]);
                        }
                        true
                    });
                    if ok {
                        let last = p_rows.len() - 1;
                        self.emitter.lock().preview(
                            &self.queue,
                            j,
                            Some(DeepRows {
                                rows: &p_rows,
                                node_row: 2 * period,
                                last_row: last,
                            }),
                        )
                    } else {
                        self.emitter.lock().preview(&self.queue, j, None)
                    }
                } else {
                    self.emitter.lock().preview(&self.queue, j, None)
                };
                if let Some(rle) = rle {
                    println!("\n{rle}");
                }
            }
            if j == first {
                break;
            }
            j -= 1;
        }
    }

    /// Slice the live frontier into at most `pieces` contiguous dumps
    /// (sequential numbering) for distributed continuation.
    ///
    /// # Errors
    ///
    /// Failing to write any piece is fatal.
    pub fn split(&mut self, pieces: u32) -> Result<Vec<PathBuf>> {
        self.dump_mode = DumpMode::Sequential;
        self.dump_num = 1;
        let (head, tail) = self.queue.bounds();
        let total: u32 = (head..tail)
            .filter(|&i| !self.queue.is_empty_slot(i))
            .count() as u32;

        if total == 0 || pieces <= 1 || head == 0 {
            let dumped = self
                .do_compact(true)
                .ok_or_else(|| anyhow::anyhow!("dump failed"))?;
            return Ok(vec![dumped]);
        }

        let pieces = pieces.min(checkpoint::DUMP_LIMIT - 1);
        let per_file = (total - 1) / pieces + 1;
        info!("Splitting search state with {per_file} queue nodes per file");

        let snap_rows = self.queue.rows.clone();
        let snap_base = self.queue.base.clone();
        let snap_deep = self.queue.deep_indices.clone();
        let snap_bounds = (
            self.queue.head,
            self.queue.tail,
            self.queue.deep_head,
            self.queue.deep_tail,
        );
        let snap_ext = self.extensions.snapshot_all();

        let mut written = Vec::new();
        let mut curr = head;
        while curr < tail {
            self.queue.rows.copy_from_slice(&snap_rows);
            self.queue.base.copy_from_slice(&snap_base);
            self.queue.deep_indices.copy_from_slice(&snap_deep);
            self.queue.head = snap_bounds.0;
            self.queue.tail = snap_bounds.1;
            self.queue.deep_head = snap_bounds.2;
            self.queue.deep_tail = snap_bounds.3;
            self.extensions.restore_all(&snap_ext);

            for x in head..curr {
                self.queue.make_empty(x);
                self.queue.deep_indices[(snap_bounds.2 + (x - head)) as usize] = 0;
            }
            let mut x = curr;
            let mut taken = 0;
            while taken < per_file && x < tail {
                if !self.queue.is_empty_slot(x) {
                    taken += 1;
                }
                x += 1;
            }
            let next = x;
            while x < tail {
                self.queue.make_empty(x);
                self.queue.deep_indices[(snap_bounds.2 + (x - head)) as usize] = 0;
                x += 1;
            }

            let dumped = self
                .do_compact(true)
                .ok_or_else(|| anyhow::anyhow!("failed to save a split piece"))?;
            written.push(dumped);
            curr = next;
        }
        Ok(written)
    }

    /// Compact the queue, optionally writing a checkpoint between the
    /// dense and re-enqueue halves.
    pub(crate) fn do_compact(&mut self, dump_pending: bool) -> Option<PathBuf> {
        if self.queue.is_drained() {
            self.queue.head = 0;
            self.queue.tail = 0;
            return None;
        }
        while self.queue.is_empty_slot(self.queue.tail - 1) {
            self.queue.tail -= 1;
        }
        compact::part1(&mut self.queue);
        let dumped = if dump_pending {
            checkpoint::dump_state(
                &self.queue,
                &self.extensions,
                &self.params,
                &self.dump_root,
                &mut self.dump_mode,
                &mut self.dump_num,
                self.last_deep,
            )
        } else {
            None
        };
        if let Err(e) = compact::part2(
            &mut self.queue,
            &mut self.visited,
            &self.extensions,
            self.params.period as usize,
        ) {
            error!("compaction failed: {e}");
            self.set_abort(Abort::Fatal);
        }
        dumped
    }

    /// Echo the effective configuration at startup.
    pub fn echo_params(&self) {
        let p = &self.params;
        println!();
        println!("Rule: {}", p.rule);
        print!("Speed: ");
        if p.offset != 1 {
            print!("{}", p.offset);
        }
        println!("c/{}", p.period);
        println!("Width: {}", p.width);
        println!("Symmetry: {}", p.symmetry);
        if p.boundary != BoundarySymmetry::Undefined {
            println!("Wave search enabled");
            println!("Boundary symmetry: {}", p.boundary);
        }
        if p.full_period_only && qrow_core::gcd(p.period, p.offset) > 1 {
            println!("Suppress subperiodic results");
        }
        if p.dump_mode == DumpMode::Disabled {
            println!("Dump disabled");
        } else {
            println!(
                "Dump interval: {} second{}",
                p.dump_interval_secs,
                if p.dump_interval_secs == 1 { "" } else { "s" }
            );
            println!(
                "Dump mode: {}",
                if p.dump_mode == DumpMode::Overwrite {
                    "overwrite"
                } else {
                    "sequential"
                }
            );
        }
        println!("Queue size: 2^{}", p.queue_bits);
        println!("Hash table size: 2^{}", p.hash_bits);
        if p.every_depth {
            println!("Fixed deepening amount: {}", p.first_deep.max(1));
        } else {
            println!("Minimum deepening increment: {}", p.min_deep);
        }
        if !p.print_deep {
            println!("Output disabled while deepening");
        }
        if p.cache_mem_mb > 0 {
            println!("Cache memory per thread: {} megabytes", p.cache_mem_mb);
        } else {
            println!("Lookahead caching disabled");
        }
        if p.mem_limit_mb >= 0 {
            println!("Memory limit: {} megabytes", p.mem_limit_mb);
        }
        println!("Number of threads: {}", p.threads);
        if p.min_extension > 0 {
            println!(
                "Save depth-first extensions of length at least {}",
                p.min_extension
            );
        }
        if !p.print_longest {
            println!("Printing of longest partial result disabled");
        }
        println!();
    }

}

fn render_row(row: Row, width: u32) -> String {
    (0..width)
        .rev()
        .map(|i| if row & (1 << i) != 0 { 'o' } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrow_core::{BoundarySymmetry, Symmetry};

    fn params(period: u32, offset: u32, width: u32, symmetry: Symmetry) -> SearchParams {
        let p = SearchParams {
            width,
            period,
            offset,
            symmetry,
            boundary: BoundarySymmetry::Undefined,
            queue_bits: 16,
            hash_bits: 15,
            dump_mode: DumpMode::Disabled,
            ..SearchParams::default()
        };
        p.validate().map(|(p, _)| p).unwrap()
    }

    fn tmp_root(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!(
            "qrow_engine_{}_{}_{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        format!("{}/d", dir.display())
    }

    /// Life admits no c/5 ship at width 4: the search must terminate
    /// cleanly with nothing found but a non-trivial longest partial.
    #[test]
    fn c5_width4_asymmetric_completes_empty() {
        let mut e = Engine::new(params(5, 1, 4, Symmetry::Asymmetric)).unwrap();
        e.seed(None).unwrap();
        let outcome = e.run().unwrap();
        assert_eq!(outcome, Outcome::Complete);
        assert_eq!(e.num_found(), 0);
        assert!(e.longest_depth() > 0);
        assert!(e.emitter.lock().longest_partial().is_some());
    }

    /// The classic width-5 odd c/4 search finds the known period-4 ship;
    /// its first emission is 8 rows tall.
    #[test]
    fn c4_width5_odd_finds_the_known_ship() {
        let mut p = params(4, 1, 5, Symmetry::Odd);
        p.num_ships = 1;
        let mut e = Engine::new(p).unwrap();
        e.seed(None).unwrap();
        let outcome = e.run().unwrap();
        assert_eq!(outcome, Outcome::ShipLimit);
        assert_eq!(e.num_found(), 1);
        assert_eq!(e.last_result_height(), Some(8));
    }

    /// Dump → load is a round trip: reloading a checkpoint reproduces the
    /// same dense state, byte for byte on the next dump.
    #[test]
    fn dump_and_reload_roundtrip() {
        let mut base = params(3, 1, 4, Symmetry::Even);
        // Sequential mode pins the parity line, keeping dumps comparable.
        base.dump_mode = DumpMode::Sequential;
        let mut e1 = Engine::new(base.clone()).unwrap();
        e1.seed(None).unwrap();
        for _ in 0..400 {
            if e1.queue.is_drained() || e1.abort() != Abort::None {
                break;
            }
            let n = e1.queue.dequeue();
            e1.process(n);
        }
        assert!(!e1.queue.is_drained(), "state under test must be live");

        e1.dump_mode = DumpMode::Sequential;
        e1.dump_num = 1;
        e1.dump_root = tmp_root("roundtrip");
        let first = e1.do_compact(true).unwrap();

        let mut e2 = Engine::new(base).unwrap();
        e2.dump_mode = DumpMode::Sequential;
        e2.dump_root = e1.dump_root.clone();
        e2.load(&first).unwrap();
        e2.last_deep = e1.last_deep;

        let f1: Vec<(u16, u16)> = frontier_chain_sample(&e1);
        let f2: Vec<(u16, u16)> = frontier_chain_sample(&e2);
        assert_eq!(f1, f2);

        let d1 = e1.do_compact(true).unwrap();
        let d2 = e2.do_compact(true).unwrap();
        let c1 = std::fs::read_to_string(&d1).unwrap();
        let c2 = std::fs::read_to_string(&d2).unwrap();
        assert_eq!(c1, c2);
    }

    /// Frontier rows plus each node's two immediate ancestor rows.
    fn frontier_chain_sample(e: &Engine) -> Vec<(u16, u16)> {
        use crate::queue::RowSource;
        let (head, tail) = e.queue.bounds();
        (head..tail)
            .filter(|&i| !e.queue.is_empty_slot(i))
            .map(|i| (e.queue.row(i), e.queue.row(e.queue.parent(i))))
            .collect()
    }

    /// Initial rows seed a 2·P-row chain whose frontier is the last row.
    #[test]
    fn initial_rows_seed_the_chain() {
        use crate::queue::RowSource;
        let dir = std::path::PathBuf::from(tmp_root("seed"))
            .parent()
            .unwrap()
            .to_path_buf();
        let file = dir.join("rows.txt");
        std::fs::write(&file, "..o.\n.oo.\no..o\noooo\n").unwrap();

        let mut e = Engine::new(params(2, 1, 4, Symmetry::Asymmetric)).unwrap();
        e.seed(Some(&file)).unwrap();

        let (head, tail) = e.queue.bounds();
        assert_eq!(tail - head, 1);
        let mut n = head;
        let mut rows = Vec::new();
        while n != 0 {
            rows.push(e.queue.row(n));
            n = e.queue.parent(n);
        }
        assert_eq!(rows, vec![0b1111, 0b1001, 0b0110, 0b0010]);
    }

    /// Splitting a loaded state partitions the frontier across pieces.
    #[test]
    fn split_partitions_the_frontier() {
        let base = params(3, 1, 4, Symmetry::Even);
        let mut e1 = Engine::new(base.clone()).unwrap();
        e1.seed(None).unwrap();
        for _ in 0..300 {
            if e1.queue.is_drained() || e1.abort() != Abort::None {
                break;
            }
            let n = e1.queue.dequeue();
            e1.process(n);
        }
        let live: usize = {
            let (h, t) = e1.queue.bounds();
            (h..t).filter(|&i| !e1.queue.is_empty_slot(i)).count()
        };
        assert!(live > 4, "need a few frontier nodes to split");

        e1.dump_root = tmp_root("split");
        let pieces = e1.split(3).unwrap();
        assert!(pieces.len() >= 2 && pieces.len() <= 3);

        let mut total = 0usize;
        for piece in &pieces {
            let mut e = Engine::new(base.clone()).unwrap();
            e.load(piece).unwrap();
            let (h, t) = e.queue.bounds();
            total += (h..t).filter(|&i| !e.queue.is_empty_slot(i)).count();
        }
        assert_eq!(total, live);
    }
}

