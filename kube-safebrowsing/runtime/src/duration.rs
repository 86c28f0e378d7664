use std::{fmt, str::FromStr, time::Duration};

/// A refresh period given in Go's `time.ParseDuration` syntax, e.g. `5m` or
/// `1h30m`.
///
/// Negative and zero periods are rejected.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Interval(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("interval must be positive")]
    NotPositive,

    #[error("interval is too large")]
    Overflow,
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl From<Interval> for Duration {
    fn from(Interval(d): Interval) -> Self {
        d
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl FromStr for Interval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('-') {
            return Err(ParseError::NotPositive);
        }

        let mut rest = s.trim_start_matches('+');
        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let Some(unit_start) = rest.find(|c: char| c.is_alphabetic()) else {
                // A bare "0" is the only value Go accepts without a unit.
                if rest == "0" {
                    break;
                }
                return Err(ParseError::NoUnit);
            };
            let (val, tail) = rest.split_at(unit_start);
            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            let base = unit_duration(unit)?;
            let d = Duration::try_from_secs_f64(base.as_secs_f64() * val.parse::<f64>()?)
                .map_err(|_| ParseError::Overflow)?;
            total = total.checked_add(d).ok_or(ParseError::Overflow)?;
            rest = tail;
        }

        if total.is_zero() {
            return Err(ParseError::NotPositive);
        }
        Ok(Self(total))
    }
}

fn unit_duration(unit: &str) -> Result<Duration, ParseError> {
    const MINUTE: Duration = Duration::from_secs(60);
    let d = match unit {
        "ns" => Duration::from_nanos(1),
        // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
        "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => MINUTE,
        "h" => MINUTE * 60,
        _ => return Err(ParseError::InvalidUnit),
    };
    Ok(d)
}
