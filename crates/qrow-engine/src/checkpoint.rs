// crates/qrow-engine/src/checkpoint.rs

//! Checkpoint dumps and restores.
//!
//! The dump is a line-oriented text file written between compaction
//! passes 3 and 4, when the queue sits in its dense tag-bit form: format
//! version, rule, dump root, every configurable parameter, the search
//! geometry, the dense row range, and the saved extensions (with runs of
//! bare-success markers run-length encoded). The loader reverses the
//! format exactly and finishes with compaction pass 4.

use crate::extend::Extensions;
use crate::queue::Queue;
use anyhow::{bail, Context, Result};
use qrow_core::{
    BoundarySymmetry, DumpMode, NodeId, ReorderPolicy, Row, SearchParams, Symmetry, FILE_VERSION,
};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Number of serialised parameters.
pub const NUM_PARAMS: usize = 24;

/// Maximum number of sequential dump files.
pub const DUMP_LIMIT: u32 = 100_000;

/// Expand `@time` (six hex digits of the Unix time) and `@rule` (rule with
/// `/` replaced) in a dump-root template; any remaining `@` becomes `_`.
#[must_use]
pub fn resolve_dump_root(template: &str, rule: &str, unix_time: u64) -> String {
    let mut root = template.to_owned();
    if let Some(at) = root.find("@time") {
        let stamp = format!("{:06x}", unix_time & 0xff_ffff);
        root.replace_range(at..at + 5, &stamp);
    }
    if let Some(at) = root.find("@rule") {
        let rule = rule.replace('/', "_");
        root.replace_range(at..at + 5, &rule);
    }
    root.replace('@', "_")
}

fn symmetry_code(s: Symmetry) -> i64 {
    match s {
        Symmetry::Asymmetric => 1,
        Symmetry::Odd => 2,
        Symmetry::Even => 3,
        Symmetry::Gutter => 4,
    }
}

fn symmetry_from(code: i64) -> Result<Symmetry> {
    Ok(match code {
        1 => Symmetry::Asymmetric,
        2 => Symmetry::Odd,
        3 => Symmetry::Even,
        4 => Symmetry::Gutter,
        _ => bail!("bad symmetry code {code} in dump"),
    })
}

fn boundary_code(b: BoundarySymmetry) -> i64 {
    match b {
        BoundarySymmetry::Undefined => 0,
        BoundarySymmetry::Odd => 2,
        BoundarySymmetry::Even => 3,
        BoundarySymmetry::Gutter => 4,
    }
}

fn boundary_from(code: i64) -> Result<BoundarySymmetry> {
    Ok(match code {
        0 => BoundarySymmetry::Undefined,
        2 => BoundarySymmetry::Odd,
        3 => BoundarySymmetry::Even,
        4 => BoundarySymmetry::Gutter,
        _ => bail!("bad boundary symmetry code {code} in dump"),
    })
}

fn encode_params(p: &SearchParams) -> [i64; NUM_PARAMS] {
    [
        i64::from(p.width),
        i64::from(p.period),
        i64::from(p.offset),
        symmetry_code(p.symmetry),
        match p.reorder {
            ReorderPolicy::Off => 0,
            ReorderPolicy::Statistical => 1,
            ReorderPolicy::Popcount => 2,
        },
        match p.dump_mode {
            DumpMode::Disabled => 0,
            DumpMode::Overwrite => 1,
            DumpMode::Sequential => 2,
        },
        i64::from(p.base_bits),
        i64::from(p.queue_bits),
        i64::from(p.hash_bits),
        i64::from(p.depth_limit),
        p.threads as i64,
        i64::from(p.min_deep),
        p.mem_limit_mb,
        i64::from(p.cache_mem_mb),
        i64::from(p.print_deep),
        i64::from(p.print_longest),
        i64::from(p.first_deep),
        i64::from(p.num_ships),
        i64::from(p.min_extension),
        i64::from(p.full_period_only),
        boundary_code(p.boundary),
        p.dump_interval_secs as i64,
        i64::from(p.every_depth),
        i64::from(p.early_exit),
    ]
}

fn decode_params(rule: &str, dump_root: &str, v: &[i64; NUM_PARAMS]) -> Result<SearchParams> {
    Ok(SearchParams {
        rule: rule.to_owned(),
        width: v[0] as u32,
        period: v[1] as u32,
        offset: v[2] as u32,
        symmetry: symmetry_from(v[3])?,
        reorder: match v[4] {
            0 => ReorderPolicy::Off,
            1 => ReorderPolicy::Statistical,
            2 => ReorderPolicy::Popcount,
            c => bail!("bad reorder code {c} in dump"),
        },
        dump_mode: match v[5] {
            0 => DumpMode::Disabled,
            1 => DumpMode::Overwrite,
            2 => DumpMode::Sequential,
            c => bail!("bad dump mode code {c} in dump"),
        },
        base_bits: v[6] as u32,
        queue_bits: v[7] as u32,
        hash_bits: v[8] as u32,
        depth_limit: v[9] as u32,
        threads: v[10].max(1) as usize,
        min_deep: v[11] as u32,
        mem_limit_mb: v[12],
        cache_mem_mb: v[13] as i32,
        print_deep: v[14] != 0,
        print_longest: v[15] != 0,
        first_deep: v[16] as u32,
        num_ships: v[17] as u32,
        min_extension: v[18] as u32,
        full_period_only: v[19] != 0,
        boundary: boundary_from(v[20])?,
        dump_interval_secs: v[21].max(0) as u64,
        every_depth: v[22] != 0,
        early_exit: v[23] != 0,
        dump_root: dump_root.to_owned(),
        gutter_skew: 0,
    })
}

/// Pick (and create) the next dump file per the mode. Overwrite mode
/// alternates `<root>gold` / `<root>blue`; sequential mode takes the first
/// unused `<root>NNNNN`, falling back to overwrite at the file limit.
fn open_dump_file(
    root: &str,
    mode: &mut DumpMode,
    dump_num: &mut u32,
) -> Option<(PathBuf, File)> {
    match mode {
        DumpMode::Disabled => None,
        DumpMode::Overwrite => {
            *dump_num += 1;
            let suffix = if *dump_num % 2 == 1 { "gold" } else { "blue" };
            let path = PathBuf::from(format!("{root}{suffix}"));
            File::create(&path).ok().map(|f| (path, f))
        }
        DumpMode::Sequential => {
            while *dump_num < DUMP_LIMIT {
                let path = PathBuf::from(format!("{root}{:05}", *dump_num));
                *dump_num += 1;
                if !path.exists() {
                    return File::create(&path).ok().map(|f| (path, f));
                }
            }
            *mode = DumpMode::Overwrite;
            open_dump_file(root, mode, dump_num)
        }
    }
}

/// Write the full search state. Call only between compaction parts 1 and
/// 2 (the queue must be in its dense form).
///
/// Returns the file written, or `None` when the file could not be opened
/// (a transient warning for the caller; the search continues).
#[allow(clippy::too_many_arguments)]
pub fn dump_state(
    q: &Queue,
    ext: &Extensions,
    params: &SearchParams,
    root: &str,
    mode: &mut DumpMode,
    dump_num: &mut u32,
    last_deep: u32,
) -> Option<PathBuf> {
    let (path, file) = open_dump_file(root, mode, dump_num)?;
    let mut w = BufWriter::new(file);
    match write_dump(&mut w, q, ext, params, root, *dump_num, last_deep) {
        Ok(()) => Some(path),
        Err(_) => None,
    }
}

fn write_dump(
    w: &mut impl Write,
    q: &Queue,
    ext: &Extensions,
    params: &SearchParams,
    root: &str,
    dump_num: u32,
    last_deep: u32,
) -> Result<()> {
    writeln!(w, "{FILE_VERSION}")?;
    writeln!(w, "{}", params.rule)?;
    writeln!(w, "{root}")?;
    for v in encode_params(params) {
        writeln!(w, "{v}")?;
    }
    writeln!(w, "{}", params.width)?;
    writeln!(w, "{}", params.period)?;
    writeln!(w, "{}", params.offset)?;
    writeln!(w, "{last_deep}")?;
    if params.dump_mode == DumpMode::Sequential {
        writeln!(w, "1")?;
    } else {
        writeln!(w, "{}", dump_num % 2)?;
    }
    writeln!(w, "{}", q.head - q.q_start)?;
    writeln!(w, "{}", q.q_end - q.q_start)?;
    for i in q.q_start..q.q_end {
        writeln!(w, "{}", q.rows[i as usize])?;
    }

    // Extension stream: stored slots verbatim, bare-success markers as a
    // zero header plus a run count.
    let size = q.deep_indices.len();
    let mut i = 0usize;
    while i < size {
        let idx = q.deep_indices[i];
        if idx == 0 {
            i += 1;
            continue;
        }
        if idx > 1 {
            if let Some(slot) = ext.snapshot(idx) {
                for v in slot {
                    writeln!(w, "{v}")?;
                }
            }
            i += 1;
        } else {
            writeln!(w, "0")?;
            let mut run = 0u64;
            while i < size && q.deep_indices[i] <= 1 {
                if q.deep_indices[i] == 1 {
                    run += 1;
                }
                i += 1;
            }
            writeln!(w, "{run}")?;
        }
    }
    w.flush()?;
    Ok(())
}

struct LineReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl LineReader {
    fn open(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(f).lines(),
        })
    }

    fn next_line(&mut self) -> Result<String> {
        match self.lines.next() {
            Some(l) => Ok(l?.trim().to_owned()),
            None => bail!("unexpected end of dump file"),
        }
    }

    fn next_i64(&mut self) -> Result<i64> {
        let l = self.next_line()?;
        l.parse().with_context(|| format!("bad integer {l:?} in dump"))
    }

    fn maybe_i64(&mut self) -> Result<Option<i64>> {
        match self.lines.next() {
            None => Ok(None),
            Some(l) => {
                let l = l?;
                let t = l.trim();
                Ok(Some(
                    t.parse()
                        .with_context(|| format!("bad integer {t:?} in dump"))?,
                ))
            }
        }
    }
}

/// Header of a dump: the parameters needed to rebuild the engine.
pub struct DumpHeader {
    /// Reconstructed parameters (including rule and dump root).
    pub params: SearchParams,
}

/// Read a dump's parameter header (version-checked).
pub fn load_params(path: &Path) -> Result<DumpHeader> {
    let mut r = LineReader::open(path)?;
    let version = r.next_i64()?;
    if version != i64::from(FILE_VERSION) {
        bail!("incompatible dump file version {version}");
    }
    let rule = r.next_line()?;
    if rule.len() > qrow_rule::MAX_RULE_LEN {
        bail!("rule string in dump exceeds maximum allowed length");
    }
    let dump_root = r.next_line()?;
    let mut vals = [0i64; NUM_PARAMS];
    for v in &mut vals {
        *v = r.next_i64()?;
    }
    Ok(DumpHeader {
        params: decode_params(&rule, &dump_root, &vals)?,
    })
}

/// Body of a dump: everything `load_state` restores into the queue.
pub struct LoadedState {
    /// The deepening watermark at dump time.
    pub last_deep: u32,
    /// Dump sequence parity / number.
    pub dump_num: u32,
}

/// Restore the queue, extensions and attachment markers from a dump. The
/// caller finishes with compaction pass 4.
pub fn load_state(path: &Path, q: &mut Queue, ext: &Extensions) -> Result<LoadedState> {
    let mut r = LineReader::open(path)?;
    let version = r.next_i64()?;
    if version != i64::from(FILE_VERSION) {
        bail!("incompatible dump file version {version}");
    }
    let _rule = r.next_line()?;
    let _root = r.next_line()?;
    for _ in 0..NUM_PARAMS {
        let _ = r.next_i64()?;
    }
    let _width = r.next_i64()?;
    let _period = r.next_i64()?;
    let _offset = r.next_i64()?;
    let last_deep = r.next_i64()? as u32;
    let dump_num = r.next_i64()? as u32;

    let qsize = q.capacity();
    let head_rel = r.next_i64()? as NodeId;
    let end_rel = r.next_i64()? as NodeId;
    if end_rel > qsize || end_rel < qsize / 16 {
        bail!("BFS queue is too small for saved state");
    }
    let q_start = qsize - end_rel;
    q.q_start = q_start;
    q.q_end = qsize;
    q.head = q_start + head_rel;
    q.tail = qsize;
    for i in q_start..qsize {
        let v = r.next_i64()?;
        if !(0..=i64::from(Row::MAX)).contains(&v) {
            bail!("row value {v} out of range in dump");
        }
        q.rows[i as usize] = v as Row;
    }

    // Extension stream.
    ext.clear();
    q.deep_indices.fill(0);
    let mut deep_tail = 0usize;
    let mut next_slot = 2u32;
    while let Some(header) = r.maybe_i64()? {
        if header == 0 {
            let run = r.next_i64()?;
            for _ in 0..run {
                if deep_tail >= q.deep_indices.len() {
                    bail!("dump carries more extension markers than queue nodes");
                }
                q.deep_indices[deep_tail] = crate::extend::EXT_BARE_SUCCESS;
                deep_tail += 1;
            }
            continue;
        }
        let total = header as usize;
        let mut contents = vec![0u16; total + 3];
        contents[0] = total as u16;
        for v in contents.iter_mut().skip(1) {
            let x = r.next_i64()?;
            if !(0..=i64::from(u16::MAX)).contains(&x) {
                bail!("extension value {x} out of range in dump");
            }
            *v = x as u16;
        }
        if deep_tail >= q.deep_indices.len() || !ext.install(next_slot, contents) {
            bail!("dump carries more extensions than this configuration can hold");
        }
        q.deep_indices[deep_tail] = next_slot;
        deep_tail += 1;
        next_slot += 1;
    }
    q.deep_head = 0;
    q.deep_tail = deep_tail as NodeId;

    Ok(LoadedState {
        last_deep,
        dump_num,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_root_templating() {
        assert_eq!(
            resolve_dump_root("dump-@time-", "B3/S23", 0x00ab_cdef),
            "dump-abcdef-"
        );
        assert_eq!(
            resolve_dump_root("@rule-x", "B36/S23", 0),
            "B36_S23-x"
        );
        assert_eq!(resolve_dump_root("a@b", "B3/S23", 0), "a_b");
        assert_eq!(
            resolve_dump_root("run-@time-@rule", "B3/S23", 0x123456),
            "run-123456-B3_S23"
        );
    }

    #[test]
    fn params_roundtrip_through_codes() {
        let mut p = SearchParams {
            width: 7,
            period: 5,
            offset: 2,
            symmetry: Symmetry::Gutter,
            boundary: BoundarySymmetry::Even,
            num_ships: 3,
            every_depth: true,
            ..SearchParams::default()
        };
        p.full_period_only = true;
        let codes = encode_params(&p);
        let back = decode_params(&p.rule, &p.dump_root, &codes).unwrap();
        assert_eq!(back.width, 7);
        assert_eq!(back.period, 5);
        assert_eq!(back.offset, 2);
        assert_eq!(back.symmetry, Symmetry::Gutter);
        assert_eq!(back.boundary, BoundarySymmetry::Even);
        assert_eq!(back.num_ships, 3);
        assert!(back.every_depth);
        assert!(back.full_period_only);
        assert_eq!(back.queue_bits, p.queue_bits);
    }

    #[test]
    fn sequential_numbering_skips_existing_files() {
        let dir = std::env::temp_dir().join(format!(
            "qrow_ckpt_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let root = format!("{}/d", dir.display());
        let mut mode = DumpMode::Sequential;
        let mut num = 1;
        let (p1, _) = open_dump_file(&root, &mut mode, &mut num).unwrap();
        let (p2, _) = open_dump_file(&root, &mut mode, &mut num).unwrap();
        assert!(p1.to_string_lossy().ends_with("00001"));
        assert!(p2.to_string_lossy().ends_with("00002"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
