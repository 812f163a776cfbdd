//! Occurrence generation -- turns a rule plus its anchor dates into concrete occurrences.
//!
//! Wraps the `rrule` crate for RFC 5545 BYxxx expansion and uses `chrono-tz` so that
//! wall-clock times survive DST transitions (the UTC instant moves, the local time
//! does not). Both the recurring and the non-recurring case sit behind the
//! [`DateRecurHelper`] trait; [`create`] picks the right one.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rrule::{RRule, RRuleSet, Unvalidated};

use crate::dst::{resolve_local, Fold};
use crate::error::{DateRecurError, Result};
use crate::occurrence::Occurrence;
use crate::rule::Rule;

/// Shared interface of the recurring and non-recurring helpers.
///
/// Ranges use overlap semantics: an occurrence is produced when it ends at or after
/// `range_start` and starts at or before `range_end`.
pub trait DateRecurHelper {
    /// Lazily generate occurrences in chronological order.
    ///
    /// Every call starts a fresh sequence. For an infinite rule without `range_end`
    /// the iterator never ends on its own, so callers must bound it.
    fn generate<'a>(
        &'a self,
        range_start: Option<DateTime<Utc>>,
        range_end: Option<DateTime<Utc>>,
    ) -> Box<dyn Iterator<Item = Occurrence> + 'a>;

    /// Whether the sequence is unbounded (a rule with neither COUNT nor UNTIL).
    fn is_infinite(&self) -> bool;

    /// The rule driving the recurrence, if any.
    fn rule(&self) -> Option<&Rule>;

    /// Collect occurrences, stopping at `limit` results or past `range_end`.
    ///
    /// # Errors
    /// Returns [`DateRecurError::UnboundedGeneration`] when the sequence is infinite and
    /// neither `range_end` nor `limit` is given.
    fn occurrences(
        &self,
        range_start: Option<DateTime<Utc>>,
        range_end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Occurrence>> {
        if self.is_infinite() && range_end.is_none() && limit.is_none() {
            return Err(DateRecurError::UnboundedGeneration);
        }
        let iter = self.generate(range_start, range_end);
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }
}

/// Build the helper for a value: recurring when a rule is given, single otherwise.
///
/// # Errors
/// Returns [`DateRecurError::InvalidValue`] if `end` precedes `start`, and
/// [`DateRecurError::MalformedRule`] if the expansion library rejects the rule.
pub fn create(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    rule: Option<Rule>,
    timezone: Tz,
) -> Result<Box<dyn DateRecurHelper>> {
    Ok(match rule {
        Some(rule) => Box::new(RecurringHelper::new(rule, start, end, timezone)?),
        None => Box::new(SingleHelper::new(start, end)?),
    })
}

/// Generator for values carrying an RRULE.
#[derive(Debug, Clone)]
pub struct RecurringHelper {
    rule: Rule,
    timezone: Tz,
    duration: Duration,
    until: Option<DateTime<Utc>>,
    /// The anchor, when the expansion was seeded with a different reading of its
    /// wall-clock time: `(seeded instant, anchor)`.
    reseat: Option<(DateTime<Utc>, DateTime<Utc>)>,
    set: RRuleSet,
}

impl RecurringHelper {
    pub fn new(
        rule: Rule,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        timezone: Tz,
    ) -> Result<Self> {
        let duration = duration_between(start, end)?;

        // Expansion runs on wall-clock time in `timezone`, which stays fixed across DST
        // changes. The expansion resolves ambiguous local times to their earlier
        // reading, so an anchor in a fall-back overlap is seeded that way and the
        // first occurrence is mapped back to the anchor itself.
        let wall_clock = start.with_timezone(&timezone).naive_local();
        let seed = resolve_local(&timezone, &wall_clock, Fold::Earliest).with_timezone(&Utc);
        let set = rule
            .expansion_text()
            .parse::<RRule<Unvalidated>>()
            .and_then(|unvalidated| unvalidated.build(seed.with_timezone(&rrule::Tz::Tz(timezone))))
            .map_err(|e| DateRecurError::MalformedRule(format!("{e}")))?;
        let reseat = (seed != start).then_some((seed, start));

        let until = rule.until(&timezone);
        Ok(Self {
            rule,
            timezone,
            duration,
            until,
            reseat,
            set,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl DateRecurHelper for RecurringHelper {
    fn generate<'a>(
        &'a self,
        range_start: Option<DateTime<Utc>>,
        range_end: Option<DateTime<Utc>>,
    ) -> Box<dyn Iterator<Item = Occurrence> + 'a> {
        let duration = self.duration;
        let until = self.until;
        let reseat = self.reseat;
        let mut last: Option<DateTime<Utc>> = None;

        Box::new(
            (&self.set)
                .into_iter()
                .map(|dt| dt.with_timezone(&Utc))
                .map(move |start| match reseat {
                    Some((seed, anchor)) if start == seed => anchor,
                    _ => start,
                })
                .take_while(move |start| until.is_none_or(|u| *start <= u))
                .take_while(move |start| range_end.is_none_or(|e| *start <= e))
                // Starts must be strictly increasing; anything else is a duplicate.
                .filter(move |start| {
                    let fresh = last.is_none_or(|l| *start > l);
                    if fresh {
                        last = Some(*start);
                    }
                    fresh
                })
                .map(move |start| Occurrence::new(start, start + duration))
                .filter(move |occ| range_start.is_none_or(|s| occ.end >= s)),
        )
    }

    fn is_infinite(&self) -> bool {
        self.rule.is_infinite()
    }

    fn rule(&self) -> Option<&Rule> {
        Some(&self.rule)
    }
}

/// Helper for values without an RRULE: exactly one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleHelper {
    occurrence: Occurrence,
}

impl SingleHelper {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Self> {
        let duration = duration_between(start, end)?;
        Ok(Self {
            occurrence: Occurrence::new(start, start + duration),
        })
    }
}

impl DateRecurHelper for SingleHelper {
    /// The occurrence is produced unless it ends before `range_start`; `range_end`
    /// does not apply to a single occurrence.
    fn generate<'a>(
        &'a self,
        range_start: Option<DateTime<Utc>>,
        _range_end: Option<DateTime<Utc>>,
    ) -> Box<dyn Iterator<Item = Occurrence> + 'a> {
        Box::new(
            std::iter::once(self.occurrence)
                .filter(move |occ| range_start.is_none_or(|s| occ.end >= s)),
        )
    }

    fn is_infinite(&self) -> bool {
        false
    }

    fn rule(&self) -> Option<&Rule> {
        None
    }
}

fn duration_between(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Duration> {
    let end = end.unwrap_or(start);
    if end < start {
        return Err(DateRecurError::InvalidValue(format!(
            "end {} is before start {}",
            end.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    Ok(end - start)
}
