// crates/qrow-rule/src/parse.rs

//! The Hensel rule-string parser.
//!
//! Grammar, per half (`B…` then `/S…`): a sequence of neighbor counts, each
//! optionally followed by isotropic letters (`B3j`), a negated letter list
//! (`B34-w` = all of B4 except 4w), or nothing (all letters). A `~`
//! introduces *forbidden* conditions for the rest of the half: neighborhoods
//! that must never occur anywhere in any generation of a result. Within a
//! forbidden block, `4-a` forbids every 4-letter except `a`.

use crate::keys::RULE_KEYS;
use crate::table::{RuleTable, ALIVE, FORBIDDEN};
use anyhow::{bail, Result};

#[inline]
fn key_digit(i: usize) -> u8 {
    RULE_KEYS[i].as_bytes()[0]
}

#[inline]
fn key_letter(i: usize) -> Option<u8> {
    RULE_KEYS[i].as_bytes().get(1).copied()
}

/// Parse a rule string into its 512-entry transition table.
///
/// # Errors
///
/// Returns a message pinpointing the first offending token, in the same
/// terms the CLI reports them.
pub fn parse_rule(rule: &str) -> Result<RuleTable> {
    let bytes = rule.as_bytes();
    let mut pos = 0usize;
    let mut tab = [0i8; 512];

    let cur = |pos: usize| -> u8 { bytes.get(pos).copied().unwrap_or(0) };

    for bs in [0usize, 256] {
        if bs == 0 {
            if cur(pos) != b'B' && cur(pos) != b'b' {
                bail!("Expected B at start of rule");
            }
        } else if cur(pos) != b'S' && cur(pos) != b's' {
            bail!("Expected S after slash");
        }
        pos += 1;

        // Flips to FORBIDDEN after a '~'; applies to the rest of the half.
        let mut polarity = ALIVE;

        while cur(pos) != b'/' && cur(pos) != 0 {
            if cur(pos) == b'~' {
                pos += 1;
                if polarity == FORBIDDEN || cur(pos) == b'~' {
                    if bs == 0 {
                        bail!("Can't have multiple tildes in birth conditions");
                    }
                    bail!("Can't have multiple tildes in survival conditions");
                }
                if cur(pos) == b'/' || cur(pos) == 0 {
                    continue;
                }
                polarity = FORBIDDEN;
            }
            if !cur(pos).is_ascii_digit() {
                bail!("Missing number in rule");
            }
            if cur(pos) == b'9' {
                bail!("Unexpected character in rule");
            }
            let dig = cur(pos);
            pos += 1;

            // Bare count (possibly before '-' in the allowed half): the
            // whole condition class is set; letters then subtract.
            let next = cur(pos);
            if next == b'/'
                || next == 0
                || (next == b'-' && polarity == ALIVE)
                || next == b'~'
                || next.is_ascii_digit()
            {
                for i in 0..256 {
                    if key_digit(i) == dig {
                        tab[bs + i] = polarity;
                    }
                }
            }

            let mut negated = false;
            let mut negated_letters = 0i32;
            let mut mismatches = [0i32; 256];
            if cur(pos) == b'-' {
                negated = true;
                pos += 1;
            }

            while cur(pos) != b'/' && cur(pos) != 0 && cur(pos) != b'~' && !cur(pos).is_ascii_digit()
            {
                let c = cur(pos);
                if c == b'-' {
                    bail!("Improperly placed negation sign");
                }
                if !c.is_ascii_lowercase() {
                    bail!("Unexpected character in rule");
                }
                let mut used = 0;
                for i in 0..256 {
                    if key_digit(i) != dig {
                        continue;
                    }
                    if key_letter(i) == Some(c) {
                        if polarity == ALIVE {
                            tab[bs + i] = i8::from(!negated);
                        } else if !negated {
                            tab[bs + i] = FORBIDDEN;
                        }
                        used += 1;
                    } else if negated && polarity == FORBIDDEN {
                        mismatches[i] += 1;
                    }
                }
                if negated && polarity == FORBIDDEN {
                    negated_letters += 1;
                }
                if used == 0 {
                    bail!("Unexpected character in rule");
                }
                pos += 1;
            }

            // A negated forbidden list marks every configuration of the
            // class that matched none of the listed letters.
            if negated && polarity == FORBIDDEN {
                for i in 0..256 {
                    if key_digit(i) == dig && mismatches[i] == negated_letters {
                        tab[bs + i] = FORBIDDEN;
                    }
                }
            }
        }

        if bs == 0 {
            if cur(pos) != b'/' {
                bail!("Missing expected slash between B and S");
            }
            pos += 1;
        } else if pos != bytes.len() {
            bail!("Extra unparsed junk at end of rule string");
        }
    }

    Ok(RuleTable::from_cells(tab))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ALIVE, DEAD, FORBIDDEN};

    fn entries_for<'a>(tab: &'a RuleTable, bs: usize) -> impl Iterator<Item = (usize, i8)> + 'a {
        (0..256).map(move |i| (i, tab.transition(bs + i)))
    }

    #[test]
    fn letter_selection_and_subtraction() {
        // B3j: only the 3j configurations are born.
        let tab = parse_rule("B3j/S23").unwrap();
        for (i, v) in entries_for(&tab, 0) {
            let expected = if RULE_KEYS[i] == "3j" { ALIVE } else { DEAD };
            assert_eq!(v, expected, "key {}", RULE_KEYS[i]);
        }

        // B34-w: all of B4 except 4w.
        let tab = parse_rule("B34-w/S23").unwrap();
        for (i, v) in entries_for(&tab, 0) {
            let key = RULE_KEYS[i];
            let expected = match key {
                "4w" => DEAD,
                k if k.starts_with('3') || k.starts_with('4') => ALIVE,
                _ => DEAD,
            };
            assert_eq!(v, expected, "key {key}");
        }
    }

    #[test]
    fn forbidden_conditions() {
        let tab = parse_rule("B3~4ei/S23~8").unwrap();
        for (i, v) in entries_for(&tab, 0) {
            match RULE_KEYS[i] {
                "4e" | "4i" => assert_eq!(v, FORBIDDEN),
                k if k.starts_with('3') => assert_eq!(v, ALIVE),
                _ => assert_eq!(v, DEAD),
            }
        }
        assert_eq!(tab.transition(256 + 255), FORBIDDEN); // S8
        assert!(tab.has_forbidden_births());
    }

    #[test]
    fn negated_forbidden_list() {
        // Forbid every 4-letter except 4a.
        let tab = parse_rule("B3~4-a/S23").unwrap();
        for (i, v) in entries_for(&tab, 0) {
            let key = RULE_KEYS[i];
            if key == "4a" {
                assert_eq!(v, DEAD);
            } else if key.starts_with('4') {
                assert_eq!(v, FORBIDDEN, "key {key}");
            }
        }
    }

    #[test]
    fn malformed_rules_are_rejected() {
        for bad in [
            "3/S23",      // missing B
            "B3 S23",     // missing slash
            "B3/23",      // missing S
            "B9/S23",     // out-of-range count
            "B3x/S23",    // unknown letter for the count
            "B3~4~5/S23", // double tilde
            "B3e-j/S23",  // negation after letters
            "B3/S23/",    // trailing junk
        ] {
            assert!(parse_rule(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn life_roundtrip_spotcheck() {
        let tab = parse_rule("b3/s23").unwrap();
        let alive_births = entries_for(&tab, 0).filter(|&(_, v)| v == ALIVE).count();
        // |B3| = C(8,3) configurations.
        assert_eq!(alive_births, 56);
    }
}
