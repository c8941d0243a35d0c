// crates/qrow-core/src/velocity.rs

//! Velocity strings: `c/P`, `Yc/P`, `(Y,0)c/P`, with an optional trailing
//! `o` (orthogonal). Diagonal (`d`, or `(y,±y)`) and oblique forms are
//! rejected — this engine only searches orthogonal translations.

use anyhow::{bail, Result};

/// Parse a velocity into `(period, offset)`.
///
/// # Errors
///
/// Rejects diagonal, oblique, oscillator (zero offset) and photon-adjacent
/// ill-formed strings with a message naming the problem.
pub fn parse_velocity(vel: &str) -> Result<(u32, u32)> {
    if vel == "c" {
        return Ok((1, 1));
    }

    if let Some(rest) = vel.strip_prefix("c/") {
        let (per, tail) = split_int(rest)?;
        return finish_simple(per, 1, tail);
    }

    if let Some(rest) = vel.strip_prefix('(') {
        return parse_tuple(rest);
    }

    let (off, tail) = split_signed_int(vel)?;
    let Some(rest) = tail.strip_prefix("c/") else {
        bail!("Unable to read offset and period.");
    };
    let (per, tail) = split_int(rest)?;
    if off == 0 {
        bail!("oscillator searches are not supported.");
    }
    if off < 0 {
        bail!("offset must be positive.");
    }
    finish_simple(per, off.unsigned_abs(), tail)
}

fn finish_simple(per: u32, off: u32, tail: &str) -> Result<(u32, u32)> {
    match tail {
        "" | "o" => Ok((per, off)),
        "d" => bail!("diagonal spaceship searches are not supported."),
        _ => bail!("illegal characters after velocity"),
    }
}

/// `(y,x)c/P` — accepted only when one coordinate is zero.
fn parse_tuple(rest: &str) -> Result<(u32, u32)> {
    let Some((y_str, rest)) = rest.split_once(',') else {
        bail!("Unable to read offset and period.");
    };
    let Some((x_str, rest)) = rest.split_once(')') else {
        bail!("Unable to read offset and period.");
    };
    let y: i32 = y_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Unable to read offset and period."))?;
    let x: i32 = x_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Unable to read offset and period."))?;
    let Some(rest) = rest.strip_prefix("c/") else {
        bail!("Unable to read offset and period.");
    };
    let (per, tail) = split_int(rest)?;
    if !matches!(tail, "" | "o") {
        bail!("illegal characters after velocity");
    }

    if x != 0 {
        if y == 0 {
            // (0, x): orthogonal, just written in the other coordinate.
            return checked_offset(x, per);
        }
        if x == y || x == -y {
            bail!("diagonal spaceship searches are not supported.");
        }
        bail!("oblique spaceship searches are not supported.");
    }
    checked_offset(y, per)
}

fn checked_offset(off: i32, per: u32) -> Result<(u32, u32)> {
    if off == 0 {
        bail!("oscillator searches are not supported.");
    }
    if off < 0 {
        bail!("offset must be positive.");
    }
    Ok((per, off.unsigned_abs()))
}

/// Split a leading unsigned integer off `s`; the integer must be nonempty.
fn split_int(s: &str) -> Result<(u32, &str)> {
    let end = s.bytes().take_while(u8::is_ascii_digit).count();
    if end == 0 {
        bail!("Unable to read offset and period.");
    }
    let v = s[..end]
        .parse()
        .map_err(|_| anyhow::anyhow!("Unable to read offset and period."))?;
    Ok((v, &s[end..]))
}

fn split_signed_int(s: &str) -> Result<(i32, &str)> {
    let sign = usize::from(s.starts_with('-'));
    let end = sign
        + s[sign..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
    if end == sign {
        bail!("Unable to read offset and period.");
    }
    let v = s[..end]
        .parse()
        .map_err(|_| anyhow::anyhow!("Unable to read offset and period."))?;
    Ok((v, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::parse_velocity;

    #[test]
    fn accepted_forms() {
        assert_eq!(parse_velocity("c").unwrap(), (1, 1));
        assert_eq!(parse_velocity("c/4").unwrap(), (4, 1));
        assert_eq!(parse_velocity("c/4o").unwrap(), (4, 1));
        assert_eq!(parse_velocity("2c/5").unwrap(), (5, 2));
        assert_eq!(parse_velocity("2c/5o").unwrap(), (5, 2));
        assert_eq!(parse_velocity("(3,0)c/7").unwrap(), (7, 3));
        assert_eq!(parse_velocity("(0,3)c/7").unwrap(), (7, 3));
    }

    #[test]
    fn rejected_forms() {
        for bad in [
            "c/4d",      // diagonal
            "2c/5d",     // diagonal
            "(2,2)c/5",  // diagonal
            "(2,-2)c/5", // diagonal
            "(2,1)c/5",  // oblique
            "0c/5",      // oscillator
            "(0,0)c/5",  // oscillator
            "-1c/5",     // negative offset
            "c/",        // no period
            "2c5",       // garbage
            "c/4x",      // trailing junk
        ] {
            assert!(parse_velocity(bad).is_err(), "{bad} should be rejected");
        }
    }
}
