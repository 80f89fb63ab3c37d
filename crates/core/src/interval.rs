//! Go-style duration strings as used by `spec.interval` (`30s`, `5m`, `1h30m`, `5m0s`).

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("empty interval")]
    Empty,
    #[error("invalid interval {0:?}: expected <number><unit> pairs with unit ms, s, m or h")]
    Malformed(String),
    #[error("interval {0:?} must be greater than zero")]
    Zero(String),
}

pub fn parse_interval(input: &str) -> Result<Duration, IntervalError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(IntervalError::Empty);
    }
    let malformed = || IntervalError::Malformed(input.to_string());
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut total_ms: u128 = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() { i += 1; }
        if start == i {
            return Err(malformed());
        }
        let value: u128 = s[start..i].parse().map_err(|_| malformed())?;
        let unit_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() { i += 1; }
        let factor_ms: u128 = match &s[unit_start..i] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            _ => return Err(malformed()),
        };
        total_ms = total_ms
            .checked_add(value.checked_mul(factor_ms).ok_or_else(malformed)?)
            .ok_or_else(malformed)?;
    }
    if total_ms == 0 {
        return Err(IntervalError::Zero(input.to_string()));
    }
    let ms = u64::try_from(total_ms).map_err(|_| malformed())?;
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_compound_units() {
        assert_eq!(parse_interval("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_interval("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_interval("5m0s"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_interval("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_interval("1500ms"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_interval(" 2m "), Ok(Duration::from_secs(120)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_interval(""), Err(IntervalError::Empty));
        assert!(matches!(parse_interval("10"), Err(IntervalError::Malformed(_))));
        assert!(matches!(parse_interval("m5"), Err(IntervalError::Malformed(_))));
        assert!(matches!(parse_interval("5d"), Err(IntervalError::Malformed(_))));
        assert!(matches!(parse_interval("5 m"), Err(IntervalError::Malformed(_))));
        assert!(matches!(parse_interval("0s"), Err(IntervalError::Zero(_))));
    }
}
