//! This module contains a [`Duration`] struct which is able to parse the
//! compact duration format used by Vault and Go tooling, like `168h`, `1h30m`,
//! `1.5h` or `500ms`. Groups may optionally be separated by whitespace, e.g.
//! `2h 30m`. Fractions are truncated to whole nanoseconds.
//!
//! [`Duration`] implements [`Deref`], which enables us to use all associated
//! functions of [`std::time::Duration`] without re-implementing the public
//! functions on our own type.

use std::{
    fmt::{Display, Write as _},
    num::ParseIntError,
    ops::Deref,
    str::FromStr,
};

use snafu::{OptionExt, ResultExt, Snafu};
use strum::EnumString;

#[derive(Debug, PartialEq, Snafu)]
pub enum DurationParseError {
    #[snafu(display("empty input"))]
    EmptyInput,

    #[snafu(display("expected a number at {input:?}"))]
    ExpectedNumber { input: String },

    #[snafu(display("failed to parse {input:?} as a number"))]
    ParseNumber {
        source: ParseIntError,
        input: String,
    },

    #[snafu(display("missing unit after {number}"))]
    MissingUnit { number: String },

    #[snafu(display("invalid unit {unit:?}"))]
    InvalidUnit {
        source: strum::ParseError,
        unit: String,
    },

    #[snafu(display("duration overflow"))]
    NumberOverflow,
}

/// A [`Duration`] which is capable of parsing compact duration formats, like
/// `168h`, `1h30m` or `1.5h`.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Duration(std::time::Duration);

#[derive(Clone, Copy, Debug, EnumString)]
enum DurationUnit {
    #[strum(serialize = "ns")]
    Nanoseconds,

    #[strum(serialize = "us", serialize = "µs", serialize = "μs")]
    Microseconds,

    #[strum(serialize = "ms")]
    Milliseconds,

    #[strum(serialize = "s")]
    Seconds,

    #[strum(serialize = "m")]
    Minutes,

    #[strum(serialize = "h")]
    Hours,

    #[strum(serialize = "d")]
    Days,
}

impl DurationUnit {
    const fn nanos(self) -> u128 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => NANOS_PER_SEC,
            Self::Minutes => 60 * NANOS_PER_SEC,
            Self::Hours => 3600 * NANOS_PER_SEC,
            Self::Days => 86400 * NANOS_PER_SEC,
        }
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Fraction digits beyond this don't change the result at nanosecond
/// precision and are ignored.
const MAX_FRACTION_DIGITS: usize = 18;

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut rest = input.trim();
        if rest.is_empty() {
            return EmptyInputSnafu.fail();
        }

        // A lone zero is the only number allowed without a unit.
        if rest == "0" {
            return Ok(Self::default());
        }

        let mut total_nanos: u128 = 0;

        while !rest.is_empty() {
            let (number, tail) = split_number(rest);
            let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
            if whole.is_empty() && fraction.is_empty() {
                return ExpectedNumberSnafu { input: rest }.fail();
            }

            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
                .unwrap_or(tail.len());
            if unit_end == 0 {
                return MissingUnitSnafu { number }.fail();
            }

            let (unit, tail) = tail.split_at(unit_end);
            let unit_nanos = DurationUnit::from_str(unit)
                .context(InvalidUnitSnafu { unit })?
                .nanos();

            let whole = match whole {
                "" => 0,
                whole => whole
                    .parse::<u64>()
                    .context(ParseNumberSnafu { input: whole })?,
            };
            let fraction_nanos = fraction_of(fraction, unit_nanos)
                .context(ParseNumberSnafu { input: fraction })?;

            total_nanos = u128::from(whole)
                .checked_mul(unit_nanos)
                .and_then(|part| part.checked_add(fraction_nanos))
                .and_then(|part| total_nanos.checked_add(part))
                .context(NumberOverflowSnafu)?;

            rest = tail.trim_start();
        }

        let secs = u64::try_from(total_nanos / NANOS_PER_SEC)
            .ok()
            .context(NumberOverflowSnafu)?;
        let nanos = u32::try_from(total_nanos % NANOS_PER_SEC)
            .ok()
            .context(NumberOverflowSnafu)?;

        Ok(Self(std::time::Duration::new(secs, nanos)))
    }
}

/// Splits `input` after its leading decimal number, e.g. `1.5` of `1.5h`.
fn split_number(input: &str) -> (&str, &str) {
    let whole_end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());

    let number_end = match input[whole_end..].strip_prefix('.') {
        Some(fraction) => {
            whole_end
                + 1
                + fraction
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(fraction.len())
        }
        None => whole_end,
    };

    input.split_at(number_end)
}

/// Nanoseconds contributed by the decimal `fraction` digits of a unit worth
/// `unit_nanos`, truncated like Go's `time.ParseDuration`.
fn fraction_of(fraction: &str, unit_nanos: u128) -> Result<u128, ParseIntError> {
    let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    if digits.is_empty() {
        return Ok(0);
    }

    let value = digits.parse::<u128>()?;
    let scale = digits.bytes().fold(1u128, |scale, _| scale * 10);
    Ok(value * unit_nanos / scale)
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_zero() {
            return f.write_str("0s");
        }

        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();
        let mut out = String::new();

        for (value, unit) in [(secs / 3600, "h"), (secs % 3600 / 60, "m"), (secs % 60, "s")] {
            if value != 0 {
                write!(out, "{value}{unit}")?;
            }
        }

        if nanos != 0 {
            if nanos % 1_000_000 == 0 {
                write!(out, "{}ms", nanos / 1_000_000)?;
            } else if nanos % 1_000 == 0 {
                write!(out, "{}us", nanos / 1_000)?;
            } else {
                write!(out, "{nanos}ns")?;
            }
        }

        f.write_str(&out)
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Self(value)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        value.0
    }
}

impl Duration {
    /// Creates a new [`Duration`] from the specified number of whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    /// Creates a new [`Duration`] from the specified number of whole hours.
    ///
    /// Panics on overflow, which can only happen for values no real
    /// configuration would ever use.
    pub const fn from_hours_unchecked(hours: u64) -> Self {
        Self::from_secs(hours * 3600)
    }
}
