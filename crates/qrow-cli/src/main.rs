// crates/qrow-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use qrow_core::{
    parse_velocity, BoundarySymmetry, DumpMode, SearchParams, Symmetry,
};
use qrow_engine::Engine;
use qrow_rule::{check_gutter, check_rule, parse_rule, MAX_RULE_LEN};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "qrow",
    about = "Searches for orthogonal spaceships and waves in binary cellular automata",
    long_about = "qrow searches for orthogonal spaceships and waves in outer-totalistic and \
                  non-totalistic (Hensel) cellular automata, row by row with breadth-first \
                  expansion and parallel iterated deepening.\n\nOptions are read left to right; \
                  later occurrences of an option override earlier ones.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true,
    disable_help_flag = true,
    args_override_self = true
)]
struct Cli {
    /// Velocity, written as c/P, Yc/P, or (Y,0)c/P (orthogonal only)
    #[arg(short = 'v', long)]
    velocity: Option<String>,

    /// Logical width (full width depends on symmetry)
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// Spaceship symmetry type
    #[arg(short = 's', long, value_enum)]
    symmetry: Option<SymmetryOpt>,

    /// Rule in Hensel notation; '~' introduces forbidden conditions
    /// (e.g. B3~6c7/S23~8)
    #[arg(short = 'r', long)]
    rule: Option<String>,

    /// Number of threads during deepening
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Maximum number of spaceships to output
    #[arg(short = 'f', long = "found")]
    found: Option<u32>,

    /// Minimum deepening increment
    #[arg(short = 'i', long = "increment")]
    increment: Option<u32>,

    /// Minimum length of saved extensions
    #[arg(short = 'g', long = "min-extension")]
    min_extension: Option<u32>,

    /// Depth of the first deepening step
    #[arg(short = 'n', long = "first-depth")]
    first_depth: Option<u32>,

    /// Deepen at every new depth by the given amount
    #[arg(long = "fixed-depth")]
    fixed_depth: Option<u32>,

    /// File containing the initial rows for the search
    #[arg(short = 'e', long = "extend")]
    extend: Option<PathBuf>,

    /// Megabytes per thread for the lookahead cache (0 disables)
    #[arg(short = 'c', long = "cache-mem", alias = "cache-memory")]
    cache_mem: Option<i32>,

    /// Limit lookup-table memory to N megabytes
    #[arg(short = 'm', long = "mem-limit", alias = "memory-limit")]
    mem_limit: Option<i64>,

    /// BFS queue size of 2^N nodes
    #[arg(short = 'q', long = "queue-bits")]
    queue_bits: Option<u32>,

    /// Hash table size of 2^N nodes (0 disables duplicate elimination)
    #[arg(short = 'h', long = "hash-bits")]
    hash_bits: Option<u32>,

    /// Group 2^N queue entries per parent base
    #[arg(short = 'b', long = "base-bits")]
    base_bits: Option<u32>,

    /// Dump filename prefix (@time and @rule are expanded)
    #[arg(short = 'd', long = "dump-root")]
    dump_root: Option<String>,

    /// Wait at least N seconds between dumps
    #[arg(short = 'a', long = "dump-interval", alias = "dump-int")]
    dump_interval: Option<u64>,

    /// Checkpoint policy
    #[arg(long = "dump-mode", value_enum)]
    dump_mode: Option<DumpModeOpt>,

    /// Load the search state from a dump file
    #[arg(short = 'l', long = "load")]
    load: Option<PathBuf>,

    /// Split a loaded search state into at most N files and exit
    #[arg(short = 'j', long = "split")]
    split: Option<u32>,

    /// Preview partial results from a loaded state and exit
    #[arg(short = 'p', long = "preview", action = ArgAction::SetTrue)]
    preview: bool,

    /// Boundary symmetry type for wave searches
    #[arg(short = 'o', long = "boundary-sym", alias = "boundary-symmetry", value_enum)]
    boundary_sym: Option<BoundaryOpt>,

    /// Print subperiodic results (default)
    #[arg(long = "enable-subperiod", alias = "enable-subperiodic",
          overrides_with = "disable_subperiod", action = ArgAction::SetTrue)]
    enable_subperiod: bool,
    /// Suppress subperiodic results
    #[arg(long = "disable-subperiod", alias = "disable-subperiodic",
          overrides_with = "enable_subperiod", action = ArgAction::SetTrue)]
    disable_subperiod: bool,

    /// Print ships found during deepening (default)
    #[arg(long = "enable-deep-print", overrides_with = "disable_deep_print",
          action = ArgAction::SetTrue)]
    enable_deep_print: bool,
    /// Do not print ships found during deepening
    #[arg(long = "disable-deep-print", overrides_with = "enable_deep_print",
          action = ArgAction::SetTrue)]
    disable_deep_print: bool,

    /// Print the longest partial result at the end (default)
    #[arg(long = "enable-longest", overrides_with = "disable_longest",
          action = ArgAction::SetTrue)]
    enable_longest: bool,
    /// Do not print the longest partial result
    #[arg(long = "disable-longest", overrides_with = "enable_longest",
          action = ArgAction::SetTrue)]
    disable_longest: bool,

    /// Allow early exit from a deepening pass when threads go idle (default)
    #[arg(long = "enable-early-exit", overrides_with = "disable_early_exit",
          action = ArgAction::SetTrue)]
    enable_early_exit: bool,
    /// Run every deepening pass to completion
    #[arg(long = "disable-early-exit", overrides_with = "enable_early_exit",
          action = ArgAction::SetTrue)]
    disable_early_exit: bool,

    /// Print usage instructions and exit
    #[arg(long = "help", action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum SymmetryOpt {
    Asymmetric,
    Odd,
    Even,
    Gutter,
}

impl From<SymmetryOpt> for Symmetry {
    fn from(v: SymmetryOpt) -> Self {
        match v {
            SymmetryOpt::Asymmetric => Self::Asymmetric,
            SymmetryOpt::Odd => Self::Odd,
            SymmetryOpt::Even => Self::Even,
            SymmetryOpt::Gutter => Self::Gutter,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum BoundaryOpt {
    Disabled,
    Odd,
    Even,
    Gutter,
    /// Rejected: asymmetric wave searching is not supported.
    Asymmetric,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum DumpModeOpt {
    Overwrite,
    Sequential,
    Disabled,
}

fn main() -> Result<()> {
    println!("qrow v{}", env!("CARGO_PKG_VERSION"));
    print!("Input:");
    for arg in std::env::args() {
        print!(" {arg}");
    }
    println!("\n");

    init_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not errors; everything else is a
            // configuration error and exits 1.
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let params = build_params(&cli)?;
    let mut engine = Engine::new(params).context("search setup failed")?;

    if cli.preview {
        let load = cli
            .load
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!(
                "the search state must be loaded from a file to preview partial results"
            ))?;
        engine.load(load)?;
        engine.preview();
        return Ok(());
    }

    if let Some(pieces) = cli.split {
        match &cli.load {
            Some(load) => engine.load(load)?,
            None => engine.seed(None)?,
        }
        engine.echo_params();
        let written = engine.split(pieces.max(1))?;
        match (written.first(), written.last()) {
            (Some(first), Some(last)) if written.len() > 1 => {
                println!(
                    "Saved pieces in files {} to {}",
                    first.display(),
                    last.display()
                );
            }
            (Some(only), _) => println!("State dumped to {}", only.display()),
            _ => {}
        }
        return Ok(());
    }

    match &cli.load {
        Some(load) => engine.load(load)?,
        None => engine.seed(cli.extend.as_deref())?,
    }

    engine.echo_params();
    println!("Starting search");
    let _outcome = engine.run()?;
    engine.final_report();
    Ok(())
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Assemble and validate the search parameters: dump-file parameters
/// first when loading, explicit options on top, then the rule and
/// geometry checks.
fn build_params(cli: &Cli) -> Result<SearchParams> {
    let mut p = match &cli.load {
        Some(path) => qrow_engine::load_dump_params(path)?,
        None => SearchParams::default(),
    };

    if let Some(rule) = &cli.rule {
        if rule.len() > MAX_RULE_LEN {
            bail!(
                "rule string exceeds maximum allowed length ({MAX_RULE_LEN}). \
                 You must write the rule more efficiently."
            );
        }
        p.rule = rule.clone();
    }
    if let Some(vel) = &cli.velocity {
        let (period, offset) = parse_velocity(vel)
            .with_context(|| format!("invalid velocity {vel}"))?;
        p.period = period;
        p.offset = offset;
    }
    if let Some(w) = cli.width {
        if w == 0 {
            bail!("width must be positive");
        }
        p.width = w;
    }
    if let Some(s) = cli.symmetry {
        p.symmetry = s.into();
    }
    if let Some(b) = cli.boundary_sym {
        p.boundary = match b {
            BoundaryOpt::Disabled => BoundarySymmetry::Undefined,
            BoundaryOpt::Odd => BoundarySymmetry::Odd,
            BoundaryOpt::Even => BoundarySymmetry::Even,
            BoundaryOpt::Gutter => BoundarySymmetry::Gutter,
            BoundaryOpt::Asymmetric => bail!("asymmetric wave searching is not supported"),
        };
    }
    if let Some(t) = cli.threads {
        if t == 0 {
            bail!("thread count must be positive");
        }
        p.threads = t;
    }
    if let Some(f) = cli.found {
        p.num_ships = f;
    }
    if let Some(i) = cli.increment {
        p.min_deep = i;
    }
    if let Some(g) = cli.min_extension {
        p.min_extension = g;
    }
    if let Some(n) = cli.first_depth {
        if n == 0 {
            bail!("first depth must be positive");
        }
        p.first_deep = n;
    }
    if let Some(n) = cli.fixed_depth {
        if n == 0 {
            bail!("fixed depth must be positive");
        }
        p.every_depth = true;
        p.min_deep = 1;
        p.first_deep = n;
    }
    if let Some(c) = cli.cache_mem {
        p.cache_mem_mb = c;
    }
    if let Some(m) = cli.mem_limit {
        p.mem_limit_mb = m;
    }
    if let Some(q) = cli.queue_bits {
        p.queue_bits = q;
    }
    if let Some(h) = cli.hash_bits {
        p.hash_bits = h;
    }
    if let Some(b) = cli.base_bits {
        p.base_bits = b;
    }
    if let Some(root) = &cli.dump_root {
        p.dump_root = root.clone();
    }
    if let Some(a) = cli.dump_interval {
        p.dump_interval_secs = a;
    }
    if let Some(mode) = cli.dump_mode {
        p.dump_mode = match mode {
            DumpModeOpt::Overwrite => DumpMode::Overwrite,
            DumpModeOpt::Sequential => DumpMode::Sequential,
            DumpModeOpt::Disabled => DumpMode::Disabled,
        };
    }
    if cli.disable_subperiod {
        p.full_period_only = true;
    } else if cli.enable_subperiod {
        p.full_period_only = false;
    }
    if cli.disable_deep_print {
        p.print_deep = false;
    } else if cli.enable_deep_print {
        p.print_deep = true;
    }
    if cli.disable_longest {
        p.print_longest = false;
    } else if cli.enable_longest {
        p.print_longest = true;
    }
    if cli.disable_early_exit {
        p.early_exit = false;
    } else if cli.enable_early_exit {
        p.early_exit = true;
    }

    if cli.extend.is_some() && cli.load.is_some() {
        bail!("initial rows file cannot be used when the search state is loaded from a saved state");
    }
    if cli.preview && cli.load.is_none() {
        bail!("the search state must be loaded from a file to preview partial results");
    }

    // Rule feasibility before any allocation.
    let table = parse_rule(&p.rule).with_context(|| format!("failed to parse rule {}", p.rule))?;
    let spaceship_like =
        p.boundary == BoundarySymmetry::Undefined || p.symmetry == Symmetry::Asymmetric;
    let report = check_rule(&table, spaceship_like, p.period, p.offset);
    for w in &report.warnings {
        warn!("{w}");
    }
    if !report.is_ok() {
        bail!("{}", report.errors.join("\n"));
    }
    if p.symmetry == Symmetry::Gutter || p.boundary == BoundarySymmetry::Gutter {
        let gutter = check_gutter(&table)?;
        p.gutter_skew = gutter.skew;
        if gutter.forbidden_unchecked {
            warn!("forbidden birth conditions cannot be checked along a skew gutter");
        }
    }

    let (p, warnings) = p.validate()?;
    for w in warnings {
        warn!("{w}");
    }
    Ok(p)
}
