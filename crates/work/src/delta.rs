//! Parsing of signed progress amounts such as `+10` or `-5`.

use crate::error::{Result, WorkError};

/// Parse a signed progress delta.
///
/// Accepts an optional `+`/`-` sign followed by decimal digits, with
/// surrounding whitespace ignored. Anything else is rejected.
pub fn parse_delta(raw: &str) -> Result<i32> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(WorkError::InvalidInput(format!("invalid amount format: '{}'", raw)));
    }
    trimmed
        .parse::<i32>()
        .map_err(|_| WorkError::InvalidInput(format!("amount out of range: '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signed_amounts() {
        assert_eq!(parse_delta("+10").unwrap(), 10);
        assert_eq!(parse_delta("-5").unwrap(), -5);
        assert_eq!(parse_delta(" 25 ").unwrap(), 25);
        assert_eq!(parse_delta("0").unwrap(), 0);
    }

    #[test]
    fn test_reject_non_numeric() {
        for raw in ["", "+", "ten", "10%", "1.5", "--3", "+-3"] {
            assert!(
                matches!(parse_delta(raw), Err(WorkError::InvalidInput(_))),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_reject_overflow() {
        assert!(matches!(parse_delta("99999999999"), Err(WorkError::InvalidInput(_))));
    }
}
