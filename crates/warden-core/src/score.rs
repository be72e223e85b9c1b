//! Saturating score arithmetic.
//!
//! Every preference value in the policy engine lives in `[-INFINITY, +INFINITY]`.
//! Combining a "must not" with anything yields `-INFINITY`, combining a "must"
//! with any finite value yields `+INFINITY`, and finite sums are clamped.

use crate::error::{Result, WardenError};

/// The saturation bound for all scores
pub const INFINITY: i32 = 1_000_000;

/// Textual forms accepted and produced for the bounds
pub const INFINITY_S: &str = "INFINITY";
pub const PLUS_INFINITY_S: &str = "+INFINITY";
pub const MINUS_INFINITY_S: &str = "-INFINITY";

/// Clamp an arbitrary value into the score range
pub fn clamp_score(value: i64) -> i32 {
    if value >= INFINITY as i64 {
        INFINITY
    } else if value <= -(INFINITY as i64) {
        -INFINITY
    } else {
        value as i32
    }
}

/// Combine two scores.
///
/// `-INFINITY` always wins, then `+INFINITY`, otherwise the clamped sum.
pub fn merge_weights(w1: i32, w2: i32) -> i32 {
    if w1 <= -INFINITY || w2 <= -INFINITY {
        return -INFINITY;
    }
    if w1 >= INFINITY || w2 >= INFINITY {
        return INFINITY;
    }
    clamp_score(w1 as i64 + w2 as i64)
}

/// Parse a score string such as `100`, `-50`, `INFINITY` or `-INFINITY`
pub fn parse_score(value: &str) -> Result<i32> {
    let trimmed = value.trim();
    match trimmed {
        INFINITY_S | PLUS_INFINITY_S => Ok(INFINITY),
        MINUS_INFINITY_S => Ok(-INFINITY),
        _ => trimmed
            .parse::<i64>()
            .map(clamp_score)
            .map_err(|_| WardenError::invalid_score(value)),
    }
}

/// Render a score the way it is written in configuration
pub fn score_to_string(score: i32) -> String {
    if score >= INFINITY {
        PLUS_INFINITY_S.to_string()
    } else if score <= -INFINITY {
        MINUS_INFINITY_S.to_string()
    } else {
        score.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_not_wins() {
        assert_eq!(merge_weights(INFINITY, -INFINITY), -INFINITY);
        assert_eq!(merge_weights(-INFINITY, INFINITY), -INFINITY);
        assert_eq!(merge_weights(-INFINITY, 500), -INFINITY);
    }

    #[test]
    fn test_infinity_absorbs_finite() {
        for n in [-999_999, -1, 0, 1, 42, 999_999] {
            assert_eq!(merge_weights(n, INFINITY), INFINITY);
            assert_eq!(merge_weights(INFINITY, n), INFINITY);
        }
    }

    #[test]
    fn test_finite_sums_saturate() {
        assert_eq!(merge_weights(100, 50), 150);
        assert_eq!(merge_weights(600_000, 600_000), INFINITY);
        assert_eq!(merge_weights(-600_000, -600_000), -INFINITY);
        assert_eq!(merge_weights(i32::MAX, i32::MAX), INFINITY);
        assert_eq!(merge_weights(i32::MIN, 10), -INFINITY);
    }

    #[test]
    fn test_merge_order_independent() {
        let values = [INFINITY, -INFINITY, 700_000, -300, 12];
        for a in values {
            for b in values {
                assert_eq!(merge_weights(a, b), merge_weights(b, a));
            }
        }
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("INFINITY").unwrap(), INFINITY);
        assert_eq!(parse_score("+INFINITY").unwrap(), INFINITY);
        assert_eq!(parse_score("-INFINITY").unwrap(), -INFINITY);
        assert_eq!(parse_score(" 25 ").unwrap(), 25);
        assert_eq!(parse_score("5000000").unwrap(), INFINITY);
        assert!(parse_score("lots").is_err());
    }

    #[test]
    fn test_score_to_string() {
        assert_eq!(score_to_string(INFINITY), "+INFINITY");
        assert_eq!(score_to_string(-INFINITY), "-INFINITY");
        assert_eq!(score_to_string(-7), "-7");
    }
}
