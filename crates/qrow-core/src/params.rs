// crates/qrow-core/src/params.rs

//! Immutable search configuration.
//!
//! All knobs are fixed before the engine is built; the engine never writes
//! back into `SearchParams`. Validation mirrors the CLI surface: fatal
//! findings abort before any allocation, advisory findings are returned
//! for the caller to log.

use crate::types::{BoundarySymmetry, DumpMode, ReorderPolicy, Symmetry, MAX_PERIOD, MAX_WIDTH};
use anyhow::{bail, Result};

/// Default BFS queue size exponent.
pub const DEFAULT_QUEUE_BITS: u32 = 20;
/// Default visited-set size exponent.
pub const DEFAULT_HASH_BITS: u32 = 20;
/// Default per-thread lookahead cache budget, megabytes.
pub const DEFAULT_CACHE_MEM_MB: i32 = 32;
/// Default minimum deepening increment.
pub const DEFAULT_MIN_DEEP: u32 = 3;
/// Default seconds between checkpoint dumps.
pub const DEFAULT_DUMP_INTERVAL_SECS: u64 = 1800;

/// Everything a search run is configured by.
#[derive(Clone, Debug)]
pub struct SearchParams {
    /// Rule string in Hensel notation (with optional `~` forbidden blocks).
    pub rule: String,
    /// Logical width, 1..=[`MAX_WIDTH`].
    pub width: u32,
    /// Period P of the ship.
    pub period: u32,
    /// Translation Y per period.
    pub offset: u32,
    /// Left-edge reflection.
    pub symmetry: Symmetry,
    /// Right-edge reflection (wave searches).
    pub boundary: BoundarySymmetry,
    /// Successor-row preference order.
    pub reorder: ReorderPolicy,
    /// Queue size is `2^queue_bits` nodes.
    pub queue_bits: u32,
    /// Visited set size is `2^hash_bits`; 0 disables deduplication.
    pub hash_bits: u32,
    /// One parent base per `2^base_bits` queue entries.
    pub base_bits: u32,
    /// Deepening triggers when the frontier reaches `2^depth_limit`.
    pub depth_limit: u32,
    /// Worker threads for the deepening pass.
    pub threads: usize,
    /// Minimum deepening increment.
    pub min_deep: u32,
    /// One-shot override for the first deepening amount (0 = none).
    pub first_deep: u32,
    /// Deepen at every new generation by a pinned amount.
    pub every_depth: bool,
    /// Allow workers to exit a deepening pass early once it has passed.
    pub early_exit: bool,
    /// Only extensions at least this long are saved for reuse.
    pub min_extension: u32,
    /// Stop after this many ships (0 = unlimited).
    pub num_ships: u32,
    /// Suppress subperiodic results when `gcd(P, Y) > 1`.
    pub full_period_only: bool,
    /// Print ships discovered inside the deepening pass.
    pub print_deep: bool,
    /// Track and finally print the longest partial result.
    pub print_longest: bool,
    /// Lookahead cache per thread, MB; negative = auto, 0 = disabled.
    pub cache_mem_mb: i32,
    /// Soft cap on successor-index memory, MB; negative = unlimited.
    pub mem_limit_mb: i64,
    /// Checkpoint policy.
    pub dump_mode: DumpMode,
    /// Minimum seconds between checkpoint dumps.
    pub dump_interval_secs: u64,
    /// Dump filename prefix; `@time` and `@rule` are expanded.
    pub dump_root: String,
    /// Vertical offset between gutter halves (set from the rule check).
    pub gutter_skew: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            rule: "B3/S23".to_owned(),
            width: 0,
            period: 0,
            offset: 0,
            symmetry: Symmetry::Asymmetric,
            boundary: BoundarySymmetry::Undefined,
            reorder: ReorderPolicy::Statistical,
            queue_bits: DEFAULT_QUEUE_BITS,
            hash_bits: DEFAULT_HASH_BITS,
            base_bits: 4,
            depth_limit: DEFAULT_QUEUE_BITS - 3,
            threads: 1,
            min_deep: DEFAULT_MIN_DEEP,
            first_deep: 0,
            every_depth: false,
            early_exit: true,
            min_extension: 0,
            num_ships: 0,
            full_period_only: false,
            print_deep: true,
            print_longest: true,
            cache_mem_mb: -DEFAULT_CACHE_MEM_MB,
            mem_limit_mb: -1,
            dump_mode: DumpMode::Overwrite,
            dump_interval_secs: DEFAULT_DUMP_INTERVAL_SECS,
            dump_root: "dump-@time-".to_owned(),
            gutter_skew: 0,
        }
    }
}

impl SearchParams {
    /// Queue capacity in nodes.
    #[inline]
    #[must_use]
    pub fn queue_size(&self) -> usize {
        1 << self.queue_bits
    }

    /// Visited-set capacity (0 when disabled).
    #[inline]
    #[must_use]
    pub fn hash_size(&self) -> usize {
        if self.hash_bits == 0 {
            0
        } else {
            1 << self.hash_bits
        }
    }

    /// Rows a state comprises for dedup purposes: the last 2·P rows.
    #[inline]
    #[must_use]
    pub fn rows_in_state(&self) -> usize {
        2 * self.period as usize
    }

    /// Check the configuration, resolve the automatic cache policy, clamp
    /// oversize bit counts, and fold a wave boundary on an asymmetric
    /// search down to a plain spaceship search.
    ///
    /// Returns the (possibly adjusted) parameters plus advisory warnings.
    ///
    /// # Errors
    ///
    /// All fatal findings are joined into one error, one per line.
    pub fn validate(mut self) -> Result<(Self, Vec<String>)> {
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        // Negative cache budget: auto-enable only above c/5.
        if self.cache_mem_mb < 0 {
            self.cache_mem_mb = if 5 * self.offset > self.period {
                -self.cache_mem_mb
            } else {
                0
            };
        }

        if self.period > MAX_PERIOD {
            errors.push(format!("maximum allowed period ({MAX_PERIOD}) exceeded."));
        }
        if self.offset > self.period && self.period > 0 {
            errors.push("translation cannot exceed period.".to_owned());
        }
        if self.offset == self.period && self.period > 0 {
            errors.push("photon searches are not supported.".to_owned());
        }
        if self.period == 0 {
            errors.push("you must specify a velocity (-v).".to_owned());
        }
        if self.width == 0 {
            errors.push("you must specify a width (-w).".to_owned());
        } else if self.width > MAX_WIDTH {
            errors.push(format!("width must be at most {MAX_WIDTH}."));
        }
        if self.queue_bits == 0 {
            errors.push("queue bits (-q) must be positive.".to_owned());
        }
        if self.base_bits == 0 {
            errors.push("base bits (-b) must be positive.".to_owned());
        }
        if self.base_bits >= self.queue_bits {
            errors.push("base bits (-b) must be less than queue bits (-q).".to_owned());
        }

        if 2 * self.offset > self.period && self.period > 0 {
            warnings
                .push("searches for speeds exceeding c/2 may not work correctly.".to_owned());
        }
        if 5 * self.offset <= self.period && self.offset > 0 && self.cache_mem_mb > 0 {
            warnings.push(
                "searches for speeds at or below c/5 may be slower with caching; consider -c 0."
                    .to_owned(),
            );
        }
        if self.symmetry == Symmetry::Asymmetric && self.boundary != BoundarySymmetry::Undefined {
            warnings.push(
                "the wave symmetry settings are equivalent to a spaceship search.".to_owned(),
            );
            self.symmetry = match self.boundary {
                BoundarySymmetry::Odd => Symmetry::Odd,
                BoundarySymmetry::Even => Symmetry::Even,
                BoundarySymmetry::Gutter => Symmetry::Gutter,
                BoundarySymmetry::Undefined => unreachable!(),
            };
            self.boundary = BoundarySymmetry::Undefined;
        }

        if self.queue_bits > 31 {
            warnings.push("queue bits (-q) reduced to 31.".to_owned());
            self.queue_bits = 31;
        }
        if self.base_bits > 30 {
            warnings.push("base bits (-b) reduced to 30.".to_owned());
            self.base_bits = 30;
        }
        if self.hash_bits > 31 {
            warnings.push("hash bits (-h) reduced to 31.".to_owned());
            self.hash_bits = 31;
        }
        if self.min_deep == 0 {
            self.min_deep = DEFAULT_MIN_DEEP;
        }
        self.depth_limit = self.queue_bits - 3;

        if !errors.is_empty() {
            bail!("{}", errors.join("\n"));
        }
        Ok((self, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SearchParams {
        SearchParams {
            width: 5,
            period: 4,
            offset: 1,
            symmetry: Symmetry::Odd,
            ..SearchParams::default()
        }
    }

    #[test]
    fn minimal_config_is_valid() {
        let (p, warnings) = minimal().validate().unwrap();
        assert!(warnings.is_empty());
        assert_eq!(p.depth_limit, p.queue_bits - 3);
        // c/4 exceeds c/5, so the auto cache stays on.
        assert_eq!(p.cache_mem_mb, DEFAULT_CACHE_MEM_MB);
    }

    #[test]
    fn slow_ship_disables_auto_cache() {
        let mut p = minimal();
        p.period = 5;
        let (p, _) = p.validate().unwrap();
        assert_eq!(p.cache_mem_mb, 0);
    }

    #[test]
    fn photon_and_oscillator_rejected() {
        let mut p = minimal();
        p.offset = 4;
        assert!(p.validate().is_err());

        let mut p = minimal();
        p.period = 0;
        p.offset = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn asymmetric_wave_downgrades_to_spaceship() {
        let mut p = minimal();
        p.symmetry = Symmetry::Asymmetric;
        p.boundary = BoundarySymmetry::Even;
        let (p, warnings) = p.validate().unwrap();
        assert_eq!(p.symmetry, Symmetry::Even);
        assert_eq!(p.boundary, BoundarySymmetry::Undefined);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn oversize_bits_are_clamped() {
        let mut p = minimal();
        p.queue_bits = 40;
        p.hash_bits = 40;
        let (p, warnings) = p.validate().unwrap();
        assert_eq!(p.queue_bits, 31);
        assert_eq!(p.hash_bits, 31);
        assert_eq!(p.depth_limit, 28);
        assert_eq!(warnings.len(), 2);
    }
}
