// crates/qrow-rule/src/feasibility.rs

//! Rule feasibility analysis.
//!
//! Before a search starts, the rule is screened for conditions under which
//! no spaceship or wave can exist. Some findings are fatal (the search is
//! pointless or the engine cannot represent the dynamics); others are mere
//! warnings, since a user may still want wick-stretcher output. The
//! condition lists and their proofs come from the cellular-automata
//! literature on speed limits and non-shrinking patterns.

use crate::keys::RULE_KEYS;
use crate::table::{RuleTable, FORBIDDEN};
use anyhow::{bail, Result};

/// Outcome of [`check_rule`]: fatal findings and advisory findings.
#[derive(Debug, Default)]
pub struct FeasibilityReport {
    /// Conditions that make the requested search meaningless; abort.
    pub errors: Vec<String>,
    /// Conditions under which no ship can exist, printed but not fatal.
    pub warnings: Vec<String>,
}

impl FeasibilityReport {
    /// True when no fatal finding was recorded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[inline]
fn key_digit(i: usize) -> u8 {
    RULE_KEYS[i].as_bytes()[0]
}

#[inline]
fn key_letter(i: usize) -> Option<u8> {
    RULE_KEYS[i].as_bytes().get(1).copied()
}

/// Query the rule table over a condition list such as `"B34-w6ci"` or
/// `"S0123"` (one half only).
///
/// Returns `-1` if every named condition is forbidden; otherwise the
/// common table value of the named conditions ignoring forbidden ones, or
/// `2` if they disagree.
#[must_use]
pub fn check_conditions(tab: &RuleTable, conditions: &str) -> i32 {
    let bytes = conditions.as_bytes();
    let bs = if bytes[0] == b's' || bytes[0] == b'S' {
        256
    } else {
        0
    };
    let mut pos = 1usize;
    let mut val: i32 = -1;

    let mut merge = |entry: i8, val: &mut i32| -> bool {
        if entry != FORBIDDEN {
            if *val == -1 {
                *val = i32::from(entry);
            }
            if *val != i32::from(entry) {
                return false;
            }
        }
        true
    };

    while pos < bytes.len() {
        let dig = bytes[pos];
        pos += 1;
        let next = bytes.get(pos).copied();

        match next {
            None | Some(b'0'..=b'8') => {
                // Bare count: every configuration of the class.
                for i in 0..256 {
                    if key_digit(i) == dig && !merge(tab.transition(bs + i), &mut val) {
                        return 2;
                    }
                }
            }
            Some(b'-') => {
                pos += 1;
                let mut mismatches = [0i32; 256];
                let mut negated = 0i32;
                while pos < bytes.len() && !bytes[pos].is_ascii_digit() {
                    let c = bytes[pos];
                    for (i, m) in mismatches.iter_mut().enumerate() {
                        if key_digit(i) == dig && key_letter(i) != Some(c) {
                            *m += 1;
                        }
                    }
                    negated += 1;
                    pos += 1;
                }
                for i in 0..256 {
                    if key_digit(i) == dig
                        && mismatches[i] == negated
                        && !merge(tab.transition(bs + i), &mut val)
                    {
                        return 2;
                    }
                }
            }
            Some(_) => {
                while pos < bytes.len() && !bytes[pos].is_ascii_digit() {
                    let c = bytes[pos];
                    for i in 0..256 {
                        if key_digit(i) == dig
                            && key_letter(i) == Some(c)
                            && !merge(tab.transition(bs + i), &mut val)
                        {
                            return 2;
                        }
                    }
                    pos += 1;
                }
            }
        }
    }
    val
}

/// Screen a rule for searchability.
///
/// `spaceship_checks` applies the finite-pattern conditions, which hold for
/// spaceship searches (and asymmetric pseudo-waves) but not for genuine
/// wave searches whose patterns are infinite in one dimension.
#[must_use]
pub fn check_rule(
    tab: &RuleTable,
    spaceship_checks: bool,
    period: u32,
    offset: u32,
) -> FeasibilityReport {
    let mut report = FeasibilityReport::default();
    let chk = |s: &str| check_conditions(tab, s);
    // Satisfied by the maximum rule: the whole class is alive (or wholly
    // forbidden, which can never appear either).
    let all = |v: i32| (v + 1) % 2 == 0;

    if chk("B0") == 1 {
        report
            .errors
            .push("rules with B0 are not supported.".to_owned());
    }
    if chk("B0") == -1 {
        report.errors.push(
            "any pattern that is not infinite in both dimensions must contain the B0 neighborhood."
                .to_owned(),
        );
    }
    if chk("B1c") == -1 {
        report
            .errors
            .push("spaceships and waves must contain the B1c neighborhood.".to_owned());
    } else if chk("B1e2a") == -1 {
        report.errors.push(
            "spaceships and waves must contain at least one of the B1e or B2a neighborhoods."
                .to_owned(),
        );
    }
    if chk("B1c") == 1 && chk("B0") == 0 {
        report
            .errors
            .push("patterns in rules with B1c and without B0 expand in all directions.".to_owned());
    } else if chk("B1e2a") == 1 && chk("B0") == 0 {
        report.errors.push(
            "patterns in rules with B1e2a and without B0 expand in all directions.".to_owned(),
        );
    }

    if spaceship_checks {
        if chk("B012ac3i") <= 0 {
            report.errors.push(
                "patterns in rules without any of B012ac3i cannot leave their initial bounding box."
                    .to_owned(),
            );
        }
        if chk("B012ae3a") <= 0 {
            report.errors.push(
                "patterns in rules without any of B012ae3a cannot leave their initial bounding diamond."
                    .to_owned(),
            );
        }
        if chk("B01245") <= 0 && chk("S012345") <= 0 {
            report.errors.push(
                "patterns in rules without any of B01245/S012345 cannot move a distance of more than one cell outside their initial bounding diamond."
                    .to_owned(),
            );
        }
        if chk("B01e2a") <= 0 && 2 * offset > period && period > 0 {
            report.errors.push(
                "orthogonal spaceship speed limit in rules without any of B01e2a is c/2."
                    .to_owned(),
            );
        }

        if chk("B0") == 0 && all(chk("B23")) && all(chk("S0")) {
            report.warnings.push(
                "no spaceships exist in rules with all of B23/S0 and without B0, because the trailing edge of a pattern cannot die."
                    .to_owned(),
            );
        } else if chk("B0") == 0 && chk("B123") >= 1 && all(chk("S0123")) {
            report.warnings.push(
                "no spaceships exist in rules with one of B1, B2, or B3, all of S0123, and without B0, because the trailing edge of a pattern cannot die."
                    .to_owned(),
            );
        }
        if all(chk("S012acek3aijn4a")) {
            report.warnings.push(
                "no spaceships exist in rules with all of S012acek3aijn4a and without B0, because patterns cannot shrink."
                    .to_owned(),
            );
        }
        if all(chk("S1234-wz5-aqr6ce")) {
            report.warnings.push(
                "no spaceships exist in rules with all of S1234-wz5-aqr6ce and without B0, because connected patterns cannot shrink."
                    .to_owned(),
            );
        }
        if all(chk("B34")) && all(chk("S12345")) {
            report.warnings.push(
                "no spaceships exist in rules with all of B34/S12345 and without B0, because connected patterns cannot shrink."
                    .to_owned(),
            );
        }
        if all(chk("B345")) && all(chk("S1234")) {
            report.warnings.push(
                "no spaceships exist in rules with all of B345/S1234 and without B0, because connected patterns cannot shrink."
                    .to_owned(),
            );
        }
        if chk("B012") <= 0 && all(chk("S234567")) {
            report.warnings.push(
                "no spaceships exist in rules with all of S234567 and none of B012, because patterns cannot escape their bounding diamond without an immortal triangle."
                    .to_owned(),
            );
        }
    }

    report
}

/// Result of [`check_gutter`]: the vertical skew between mirrored halves
/// and an optional warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GutterCheck {
    /// Rows of vertical offset between the mirrored halves (0, 1, or 2).
    pub skew: u32,
    /// Forbidden birth conditions cannot be enforced along a skewed gutter.
    pub forbidden_unchecked: bool,
}

/// Decide whether a gutter is compatible with the rule's birth conditions
/// and pick the smallest workable skew.
///
/// # Errors
///
/// Fails when every skew family has a satisfiable birth condition on the
/// gutter column.
pub fn check_gutter(tab: &RuleTable) -> Result<GutterCheck> {
    let skew = if check_conditions(tab, "B2ci4ci6i") <= 0 {
        0
    } else if check_conditions(tab, "B1c2kn3ny4yz5r6i") <= 0 {
        1
    } else if check_conditions(tab, "B12aikn3cqr4cnyz5er6i") <= 0 {
        2
    } else {
        bail!(
            "gutters do not work with the given birth conditions. The forbidden birth \
             conditions for different gutter types are: skew 0: B2ci4ci6i; skew 1: \
             B1c2kn3ny4yz5r6i; skew 2: B12aikn3cqr4cnyz5er6i"
        );
    };
    Ok(GutterCheck {
        skew,
        forbidden_unchecked: skew > 0 && tab.has_forbidden_births(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_rule;

    #[test]
    fn condition_values() {
        let life = parse_rule("B3/S23").unwrap();
        assert_eq!(check_conditions(&life, "B3"), 1);
        assert_eq!(check_conditions(&life, "B0"), 0);
        assert_eq!(check_conditions(&life, "S23"), 1);
        assert_eq!(check_conditions(&life, "S0123"), 2); // mixed
        assert_eq!(check_conditions(&life, "B3j"), 1);
        assert_eq!(check_conditions(&life, "B4-a"), 0);
    }

    #[test]
    fn forbidden_only_conditions_report_minus_one() {
        let tab = parse_rule("B3~4ei/S23").unwrap();
        assert_eq!(check_conditions(&tab, "B4ei"), -1);
        assert_eq!(check_conditions(&tab, "B4"), 0); // other 4-letters are dead
    }

    #[test]
    fn life_is_searchable() {
        let life = parse_rule("B3/S23").unwrap();
        let report = check_rule(&life, true, 4, 1);
        assert!(report.is_ok(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn b0_rules_are_rejected() {
        let tab = parse_rule("B03/S23").unwrap();
        let report = check_rule(&tab, true, 2, 1);
        assert!(!report.is_ok());
    }

    #[test]
    fn speed_limit_without_b1e2a() {
        let tab = parse_rule("B3/S23").unwrap();
        // c/2 exactly is fine...
        assert!(check_rule(&tab, true, 2, 1).is_ok());
        // ...but faster than c/2 is impossible without B01e2a.
        assert!(!check_rule(&tab, true, 3, 2).is_ok());
    }

    #[test]
    fn gutter_selection() {
        let life = parse_rule("B3/S23").unwrap();
        assert_eq!(
            check_gutter(&life).unwrap(),
            GutterCheck {
                skew: 0,
                forbidden_unchecked: false
            }
        );
        // A rule with births all over the small classes defeats every skew.
        let dense = parse_rule("B123/S23").unwrap();
        assert!(check_gutter(&dense).is_err());
    }
}
