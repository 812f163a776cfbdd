//! RRULE parsing -- turns an RFC 5545 `recur` string into a validated [`Rule`].
//!
//! Only the rule grammar is handled here. Expansion into concrete instants lives in
//! [`crate::helper`], which hands the validated rule to the `rrule` crate.
//!
//! A value carries at most one RRULE; EXRULE, EXDATE and RDATE composition is not
//! supported.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dst::{resolve_local, Fold};
use crate::error::{DateRecurError, Result};
use crate::grid::PartGrid;

static BYDAY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?)(\d{1,2})?(MO|TU|WE|TH|FR|SA|SU)$").expect("valid BYDAY pattern")
});

static UNTIL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(\d{2})(\d{2})(?:T(\d{2})(\d{2})(\d{2})(Z)?)?$")
        .expect("valid UNTIL pattern")
});

const WEEKDAYS: [&str; 7] = ["MO", "TU", "WE", "TH", "FR", "SA", "SU"];

/// Recurrence frequency (the `FREQ` part).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub const ALL: [Frequency; 7] = [
        Frequency::Secondly,
        Frequency::Minutely,
        Frequency::Hourly,
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Yearly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Secondly => "SECONDLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = DateRecurError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Frequency::ALL
            .into_iter()
            .find(|f| f.as_str() == upper)
            .ok_or_else(|| malformed(format!("unknown frequency '{}'", s.trim())))
    }
}

/// A rule part other than `FREQ`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Part {
    Until,
    Count,
    Interval,
    BySecond,
    ByMinute,
    ByHour,
    ByDay,
    ByMonthDay,
    ByYearDay,
    ByWeekNo,
    ByMonth,
    BySetPos,
    Wkst,
}

impl Part {
    pub const ALL: [Part; 13] = [
        Part::Until,
        Part::Count,
        Part::Interval,
        Part::BySecond,
        Part::ByMinute,
        Part::ByHour,
        Part::ByDay,
        Part::ByMonthDay,
        Part::ByYearDay,
        Part::ByWeekNo,
        Part::ByMonth,
        Part::BySetPos,
        Part::Wkst,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Part::Until => "UNTIL",
            Part::Count => "COUNT",
            Part::Interval => "INTERVAL",
            Part::BySecond => "BYSECOND",
            Part::ByMinute => "BYMINUTE",
            Part::ByHour => "BYHOUR",
            Part::ByDay => "BYDAY",
            Part::ByMonthDay => "BYMONTHDAY",
            Part::ByYearDay => "BYYEARDAY",
            Part::ByWeekNo => "BYWEEKNO",
            Part::ByMonth => "BYMONTH",
            Part::BySetPos => "BYSETPOS",
            Part::Wkst => "WKST",
        }
    }

    /// Whether this is one of the `BYxxx` expansion/limit parts.
    pub fn is_by_part(self) -> bool {
        self.as_str().starts_with("BY")
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Part {
    type Err = DateRecurError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Part::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| malformed(format!("unknown rule part '{}'", s.trim())))
    }
}

/// A parsed recurrence rule: a frequency plus the remaining parts in source order.
///
/// Part values are kept as normalized (upper-case, trimmed) strings. They have been
/// validated at parse time, so the typed accessors never fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    frequency: Frequency,
    parts: Vec<(Part, String)>,
}

impl Rule {
    /// Parse an RRULE string such as `FREQ=WEEKLY;BYDAY=MO,WE,FR;COUNT=6`.
    ///
    /// A leading `RRULE:` is accepted. Names and values are case-insensitive.
    ///
    /// # Errors
    /// Returns [`DateRecurError::MalformedRule`] when FREQ is missing or unknown, a
    /// part is unknown, repeated or syntactically invalid, COUNT and UNTIL are both
    /// present, or a part is not permitted with the rule's frequency.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let body = match trimmed.get(..6) {
            Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &trimmed[6..],
            _ => trimmed,
        };
        if body.trim().is_empty() {
            return Err(malformed("empty RRULE string"));
        }

        let mut frequency = None;
        let mut parts: Vec<(Part, String)> = Vec::new();

        for pair in body.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| malformed(format!("expected NAME=VALUE, found '{pair}'")))?;
            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_ascii_uppercase();
            if value.is_empty() {
                return Err(malformed(format!("{name} has an empty value")));
            }

            if name == "FREQ" {
                if frequency.is_some() {
                    return Err(malformed("FREQ appears more than once"));
                }
                frequency = Some(value.parse::<Frequency>()?);
                continue;
            }

            let part: Part = name.parse()?;
            if parts.iter().any(|(p, _)| *p == part) {
                return Err(malformed(format!("{part} appears more than once")));
            }
            validate_value(part, &value)?;
            parts.push((part, value));
        }

        let frequency = frequency.ok_or_else(|| malformed("FREQ is required"))?;
        let rule = Rule { frequency, parts };
        rule.validate_combination()?;
        tracing::debug!(rule = %rule, "parsed recurrence rule");
        Ok(rule)
    }

    /// Build a rule from a frequency and raw part values, applying the same
    /// validation as [`Rule::parse`].
    pub fn from_parts<I, V>(frequency: Frequency, parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Part, V)>,
        V: AsRef<str>,
    {
        let mut rule = Rule {
            frequency,
            parts: Vec::new(),
        };
        for (part, value) in parts {
            let value = value.as_ref().trim().to_ascii_uppercase();
            if rule.has(part) {
                return Err(malformed(format!("{part} appears more than once")));
            }
            validate_value(part, &value)?;
            rule.parts.push((part, value));
        }
        rule.validate_combination()?;
        Ok(rule)
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Parts in source order, excluding FREQ.
    pub fn parts(&self) -> &[(Part, String)] {
        &self.parts
    }

    pub fn get(&self, part: Part) -> Option<&str> {
        self.parts
            .iter()
            .find(|(p, _)| *p == part)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, part: Part) -> bool {
        self.get(part).is_some()
    }

    pub fn count(&self) -> Option<u32> {
        self.get(Part::Count).and_then(|v| v.parse().ok())
    }

    pub fn interval(&self) -> u32 {
        self.get(Part::Interval)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    /// The UNTIL bound as an instant, if the rule has one.
    ///
    /// A `Z`-suffixed DATE-TIME is UTC. A floating DATE-TIME is wall-clock time in
    /// `tz`. A DATE covers the whole local day, so the bound is its last instant.
    pub fn until(&self, tz: &Tz) -> Option<DateTime<Utc>> {
        let caps = UNTIL_VALUE.captures(self.get(Part::Until)?)?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;

        let Some(hour) = num(4) else {
            let last = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)?;
            return Some(resolve_local(tz, &date.and_time(last), Fold::Latest).with_timezone(&Utc));
        };
        let naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(hour, num(5)?, num(6)?)?);
        if caps.get(7).is_some() {
            Some(Utc.from_utc_datetime(&naive))
        } else {
            Some(resolve_local(tz, &naive, Fold::Latest).with_timezone(&Utc))
        }
    }

    /// A rule is infinite when it has neither COUNT nor UNTIL.
    pub fn is_infinite(&self) -> bool {
        !self.has(Part::Count) && !self.has(Part::Until)
    }

    /// Drop every part the grid does not allow for this rule's frequency.
    ///
    /// Dropping is silent: the result is what gets persisted. BYSETPOS is also
    /// dropped when no other BYxxx part survives, since it cannot stand alone.
    pub fn filtered(&self, grid: &PartGrid) -> Rule {
        let mut parts: Vec<(Part, String)> = self
            .parts
            .iter()
            .filter(|(part, _)| {
                let allowed = grid.is_part_allowed(self.frequency, *part);
                if !allowed {
                    tracing::debug!(frequency = %self.frequency, %part, "dropping disallowed rule part");
                }
                allowed
            })
            .cloned()
            .collect();

        let orphan_setpos = !parts
            .iter()
            .any(|(p, _)| p.is_by_part() && *p != Part::BySetPos);
        if orphan_setpos {
            parts.retain(|(p, _)| *p != Part::BySetPos);
        }

        Rule {
            frequency: self.frequency,
            parts,
        }
    }

    /// The rule text handed to the expansion library. UNTIL is enforced by the
    /// generator itself, so it is left out here.
    pub(crate) fn expansion_text(&self) -> String {
        let mut text = format!("FREQ={}", self.frequency);
        for (part, value) in &self.parts {
            if *part != Part::Until {
                text.push_str(&format!(";{part}={value}"));
            }
        }
        text
    }

    fn validate_combination(&self) -> Result<()> {
        if self.has(Part::Count) && self.has(Part::Until) {
            return Err(malformed("COUNT and UNTIL must not both be present"));
        }

        let freq = self.frequency;
        if self.has(Part::ByWeekNo) && freq != Frequency::Yearly {
            return Err(malformed(format!("BYWEEKNO is only valid with FREQ=YEARLY, not {freq}")));
        }
        if self.has(Part::ByYearDay)
            && matches!(freq, Frequency::Daily | Frequency::Weekly | Frequency::Monthly)
        {
            return Err(malformed(format!("BYYEARDAY is not valid with FREQ={freq}")));
        }
        if self.has(Part::ByMonthDay) && freq == Frequency::Weekly {
            return Err(malformed("BYMONTHDAY is not valid with FREQ=WEEKLY"));
        }

        if let Some(byday) = self.get(Part::ByDay) {
            let has_ordinal = byday.split(',').any(|token| {
                BYDAY_TOKEN
                    .captures(token.trim())
                    .is_some_and(|caps| caps.get(2).is_some())
            });
            if has_ordinal {
                if !matches!(freq, Frequency::Monthly | Frequency::Yearly) {
                    return Err(malformed(format!(
                        "numeric BYDAY values are only valid with MONTHLY or YEARLY, not {freq}"
                    )));
                }
                if freq == Frequency::Yearly && self.has(Part::ByWeekNo) {
                    return Err(malformed("numeric BYDAY values are not valid with BYWEEKNO"));
                }
            }
        }

        if self.has(Part::BySetPos)
            && !self
                .parts
                .iter()
                .any(|(p, _)| p.is_by_part() && *p != Part::BySetPos)
        {
            return Err(malformed("BYSETPOS requires another BYxxx part"));
        }

        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={}", self.frequency)?;
        for (part, value) in &self.parts {
            write!(f, ";{part}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for Rule {
    type Err = DateRecurError;

    fn from_str(s: &str) -> Result<Self> {
        Rule::parse(s)
    }
}

fn malformed(message: impl Into<String>) -> DateRecurError {
    DateRecurError::MalformedRule(message.into())
}

/// Check the syntax of a single (already upper-cased) part value.
fn validate_value(part: Part, value: &str) -> Result<()> {
    match part {
        Part::Count | Part::Interval => match value.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(()),
            _ => Err(malformed(format!("{part} must be a positive integer, found '{value}'"))),
        },
        Part::BySecond => int_list(part, value, 0..=59, false),
        Part::ByMinute => int_list(part, value, 0..=59, false),
        Part::ByHour => int_list(part, value, 0..=23, false),
        Part::ByMonth => int_list(part, value, 1..=12, false),
        Part::ByMonthDay => int_list(part, value, 1..=31, true),
        Part::ByYearDay => int_list(part, value, 1..=366, true),
        Part::ByWeekNo => int_list(part, value, 1..=53, true),
        Part::BySetPos => int_list(part, value, 1..=366, true),
        Part::ByDay => {
            for token in value.split(',') {
                let token = token.trim();
                let caps = BYDAY_TOKEN
                    .captures(token)
                    .ok_or_else(|| malformed(format!("invalid BYDAY value '{token}'")))?;
                if !caps[1].is_empty() && caps.get(2).is_none() {
                    return Err(malformed(format!("BYDAY sign without a number in '{token}'")));
                }
                if let Some(n) = caps.get(2) {
                    let n: u32 = n
                        .as_str()
                        .parse()
                        .map_err(|_| malformed(format!("invalid BYDAY value '{token}'")))?;
                    if !(1..=53).contains(&n) {
                        return Err(malformed(format!("BYDAY ordinal out of range in '{token}'")));
                    }
                }
            }
            Ok(())
        }
        Part::Wkst => {
            if WEEKDAYS.contains(&value) {
                Ok(())
            } else {
                Err(malformed(format!("invalid WKST value '{value}'")))
            }
        }
        Part::Until => {
            let caps = UNTIL_VALUE
                .captures(value)
                .ok_or_else(|| malformed(format!("invalid UNTIL value '{value}'")))?;
            let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            let date = num(1)
                .zip(num(2))
                .zip(num(3))
                .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y as i32, m, d));
            let time_ok = match num(4) {
                None => true,
                Some(h) => num(5)
                    .zip(num(6))
                    .and_then(|(mi, s)| NaiveTime::from_hms_opt(h, mi, s))
                    .is_some(),
            };
            if date.is_some() && time_ok {
                Ok(())
            } else {
                Err(malformed(format!("UNTIL is not a valid date or date-time: '{value}'")))
            }
        }
    }
}

/// Validate a comma-separated integer list. Signed lists accept `-n` and `+n` with
/// `n` in `range`; zero is never valid for them.
fn int_list(part: Part, value: &str, range: RangeInclusive<i32>, signed: bool) -> Result<()> {
    for token in value.split(',') {
        let token = token.trim();
        let n: i32 = token
            .parse()
            .map_err(|_| malformed(format!("{part} expects integers, found '{token}'")))?;
        let in_range = if signed {
            n.checked_abs().is_some_and(|abs| range.contains(&abs))
        } else {
            !token.starts_with(['+', '-']) && range.contains(&n)
        };
        if !in_range {
            return Err(malformed(format!("{part} value {token} is out of range")));
        }
    }
    Ok(())
}
