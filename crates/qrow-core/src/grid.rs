// crates/qrow-core/src/grid.rs

//! Whole-pattern stepping on a fixed canvas.
//!
//! Used by the subperiod filter and by tests that check an emitted ship
//! actually reproduces shifted after P generations. Rows are `u64`
//! bitmasks (physical width never exceeds 2·14+1 plus margins); the canvas
//! edges are treated as dead, so callers must leave enough margin for the
//! generations they step.

use qrow_rule::TripleTable;

/// One generation on the canvas. Returns `None` if any cell lands in a
/// forbidden neighborhood.
#[must_use]
pub fn step(triple: &TripleTable, rows: &[u64], width: u32) -> Option<Vec<u64>> {
    let h = rows.len();
    let mut out = vec![0u64; h];
    for y in 0..h {
        let top = if y > 0 { rows[y - 1] } else { 0 };
        let mid = rows[y];
        let bot = if y + 1 < h { rows[y + 1] } else { 0 };
        for x in 0..width {
            // Window bits x-1..=x+1, zero-padded on the left.
            let t = (((top << 1) >> x) & 7) as i32;
            let m = (((mid << 1) >> x) & 7) as i32;
            let b = (((bot << 1) >> x) & 7) as i32;
            match triple.step(t, m, b) {
                -1 => return None,
                0 => {}
                _ => out[y] |= 1u64 << x,
            }
        }
    }
    Some(out)
}

/// `n` generations; `None` if any intermediate hits a forbidden
/// neighborhood.
#[must_use]
pub fn step_n(triple: &TripleTable, rows: &[u64], width: u32, n: u32) -> Option<Vec<u64>> {
    let mut cur = rows.to_vec();
    for _ in 0..n {
        cur = step(triple, &cur, width)?;
    }
    Some(cur)
}

/// Does `b` equal `a` shifted down by `dy` rows (negative = up) on the
/// same canvas, with vacated rows empty?
#[must_use]
pub fn shifted_eq(a: &[u64], b: &[u64], dy: i64) -> bool {
    let h = a.len() as i64;
    if b.len() as i64 != h {
        return false;
    }
    for y in 0..h {
        let src = y - dy;
        let expect = if (0..h).contains(&src) {
            a[src as usize]
        } else {
            0
        };
        if b[y as usize] != expect {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrow_rule::{parse_rule, TripleTable};

    fn life() -> TripleTable {
        TripleTable::new(&parse_rule("B3/S23").unwrap())
    }

    #[test]
    fn lone_cell_dies_and_blinker_oscillates() {
        let t = life();
        let lone = vec![0, 0b010 << 2, 0, 0, 0];
        assert_eq!(step(&t, &lone, 8).unwrap(), vec![0; 5]);

        let blinker = vec![0, 0, 0b111 << 2, 0, 0];
        let g1 = step(&t, &blinker, 8).unwrap();
        assert_eq!(g1, vec![0, 0b010 << 2, 0b010 << 2, 0b010 << 2, 0]);
        let g2 = step(&t, &g1, 8).unwrap();
        assert_eq!(g2, blinker);
    }

    #[test]
    fn lwss_translates_two_columns_per_period() {
        let t = life();
        // Canonical lightweight spaceship (bo2bo$o$o3bo$4o).
        let x0 = 4;
        let ship: Vec<u64> = vec![
            0,
            0,
            0,
            (0b10010 << x0),
            (0b00001 << x0),
            (0b10001 << x0),
            (0b01111 << x0),
            0,
            0,
            0,
        ];
        let after = step_n(&t, &ship, 16, 4).unwrap();
        let west: Vec<u64> = ship.iter().map(|r| r >> 2).collect();
        let east: Vec<u64> = ship.iter().map(|r| r << 2).collect();
        assert!(after == west || after == east, "not a 2-cell translation");
    }

    #[test]
    fn forbidden_neighborhood_aborts_stepping() {
        let t = TripleTable::new(&parse_rule("B3~1c/S23").unwrap());
        // Any lone cell exposes a 1c neighborhood to its diagonal
        // neighbors.
        let lone = vec![0, 0, 0b0100 << 2, 0, 0];
        assert!(step(&t, &lone, 10).is_none());
    }

    #[test]
    fn shifted_eq_handles_edges() {
        let a = vec![1, 2, 3];
        assert!(shifted_eq(&a, &[1, 2, 3], 0));
        assert!(shifted_eq(&a, &[0, 1, 2], 1));
        assert!(shifted_eq(&a, &[2, 3, 0], -1));
        assert!(!shifted_eq(&a, &[1, 2, 0], 0));
    }
}
