//! Granularity range resolution for partial date input.
//!
//! A filter value such as `2023-09` at month granularity stands for every instant of
//! September 2023 in some timezone. [`smallest_instant`] and [`largest_instant`]
//! return the inclusive bounds of that span as UTC instants.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dst::{parse_timezone, resolve_local, Fold};
use crate::error::{DateRecurError, Result};

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").expect("valid pattern"));
static MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("valid pattern"));
static DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid pattern"));
static SECOND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}$").expect("valid pattern")
});

/// Precision at which a partial date is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Year,
    Month,
    Day,
    Second,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Year,
        Granularity::Month,
        Granularity::Day,
        Granularity::Second,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Year => "year",
            Granularity::Month => "month",
            Granularity::Day => "day",
            Granularity::Second => "second",
        }
    }

    /// The input format users are told to follow.
    pub fn expected_format(self) -> &'static str {
        match self {
            Granularity::Year => "YYYY",
            Granularity::Month => "YYYY-MM",
            Granularity::Day => "YYYY-MM-DD",
            Granularity::Second => "YYYY-MM-DDTHH:MM:SS",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Granularity::Year => &YEAR,
            Granularity::Month => &MONTH,
            Granularity::Day => &DAY,
            Granularity::Second => &SECOND,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = DateRecurError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Granularity::ALL
            .into_iter()
            .find(|g| g.as_str() == lower)
            .ok_or_else(|| DateRecurError::Config(format!("unknown granularity '{}'", s.trim())))
    }
}

/// First instant represented by `input` at `granularity` in `timezone`.
///
/// # Errors
/// [`DateRecurError::InvalidGranularityInput`] when `input` does not match the
/// granularity's format or names an impossible date; [`DateRecurError::InvalidTimezone`]
/// for an unknown zone.
pub fn smallest_instant(granularity: Granularity, input: &str, timezone: &str) -> Result<DateTime<Utc>> {
    let tz = parse_timezone(timezone)?;
    let (first, _) = local_bounds(granularity, input)?;
    Ok(resolve_local(&tz, &first, Fold::Earliest).with_timezone(&Utc))
}

/// Last instant (to the microsecond) represented by `input` at `granularity`.
///
/// # Errors
/// Same as [`smallest_instant`].
pub fn largest_instant(granularity: Granularity, input: &str, timezone: &str) -> Result<DateTime<Utc>> {
    let tz = parse_timezone(timezone)?;
    let (_, last) = local_bounds(granularity, input)?;
    Ok(resolve_local(&tz, &last, Fold::Latest).with_timezone(&Utc))
}

/// Both bounds at once, as `(smallest, largest)`.
pub fn range(granularity: Granularity, input: &str, timezone: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let tz: Tz = parse_timezone(timezone)?;
    let (first, last) = local_bounds(granularity, input)?;
    Ok((
        resolve_local(&tz, &first, Fold::Earliest).with_timezone(&Utc),
        resolve_local(&tz, &last, Fold::Latest).with_timezone(&Utc),
    ))
}

/// Wall-clock bounds of the period, before any timezone is applied.
fn local_bounds(granularity: Granularity, input: &str) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let input = input.trim();
    let invalid = || DateRecurError::InvalidGranularityInput {
        granularity: granularity.as_str(),
        input: input.to_string(),
        expected: granularity.expected_format(),
    };
    if !granularity.pattern().is_match(input) {
        return Err(invalid());
    }

    let midnight = NaiveTime::MIN;
    let last_micro = |date: NaiveDate| {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).map(|t| date.and_time(t))
    };

    let bounds = match granularity {
        Granularity::Year => input.parse::<i32>().ok().and_then(|year| {
            let first = NaiveDate::from_ymd_opt(year, 1, 1)?;
            let last = NaiveDate::from_ymd_opt(year, 12, 31)?;
            Some((first.and_time(midnight), last_micro(last)?))
        }),
        Granularity::Month => NaiveDate::parse_from_str(&format!("{input}-01"), "%Y-%m-%d")
            .ok()
            .and_then(|first| {
                let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
                Some((first.and_time(midnight), last_micro(last)?))
            }),
        Granularity::Day => NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .ok()
            .and_then(|day| Some((day.and_time(midnight), last_micro(day)?))),
        Granularity::Second => NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .and_then(|first| {
                let last = first.with_nanosecond(999_999_000)?;
                Some((first, last))
            }),
    };
    bounds.ok_or_else(invalid)
}
