// crates/qrow-engine/src/lib.rs

//! The qrow search engine.
//!
//! A breadth-first queue over partial patterns (one new row per node) with
//! a parallel bounded depth-first "deepening" pass that prunes frontier
//! nodes admitting no sufficiently long extension. See the crate's
//! `DESIGN.md` for the provenance of each piece.
//!
//! The engine is an owned value: configuration in
//! [`qrow_core::SearchParams`], all runtime state inside [`Engine`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

mod bfs;
mod cache;
mod checkpoint;
mod compact;
mod deepen;
mod emit;
mod engine;
mod extend;
mod lookahead;
mod queue;
mod visited;

pub use cache::LookaheadCache;
pub use checkpoint::resolve_dump_root;
pub use emit::{DeepRows, Emitter};
pub use engine::{Abort, Engine, Outcome};
pub use extend::Extensions;
pub use queue::{Queue, RowSource, EMPTY_ROW};
pub use visited::VisitedSet;

use std::path::Path;

/// Read the parameter header of a dump file (for `-l`: the dump's
/// parameters seed the configuration, explicit options override them).
///
/// # Errors
///
/// Unknown versions and malformed headers are fatal.
pub fn load_dump_params(path: &Path) -> anyhow::Result<qrow_core::SearchParams> {
    Ok(checkpoint::load_params(path)?.params)
}
