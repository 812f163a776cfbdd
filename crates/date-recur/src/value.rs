//! The recurring date value: start, end, timezone and an optional RRULE.
//!
//! Values are immutable. Everything derived from them (the parsed rule, the helper,
//! the infinite flag) is computed from the four inputs on request, and
//! [`RecurringDateValue::fingerprint`] identifies those inputs for memoization.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::dst::parse_timezone;
use crate::error::{DateRecurError, Result};
use crate::helper::{self, DateRecurHelper};
use crate::rule::Rule;

/// Storage format of the `value` and `end_value` columns (UTC, no offset).
pub const STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The raw storage columns of one field item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldColumns {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub end_value: Option<String>,
    #[serde(default)]
    pub rrule: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringDateValue {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    timezone: Tz,
    rule: Option<Rule>,
}

impl RecurringDateValue {
    /// Build and validate a value.
    ///
    /// Sub-second precision is dropped, matching the storage format. An empty
    /// `rrule` means the value does not recur.
    ///
    /// # Errors
    /// - [`DateRecurError::InvalidTimezone`] for an unknown zone id
    /// - [`DateRecurError::MalformedRule`] when the rule does not parse or cannot be expanded
    /// - [`DateRecurError::InvalidValue`] when `end` precedes `start`
    pub fn new(
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        timezone: &str,
        rrule: Option<&str>,
    ) -> Result<Self> {
        let timezone = parse_timezone(timezone)?;
        let rule = match rrule.map(str::trim) {
            Some(text) if !text.is_empty() => Some(Rule::parse(text)?),
            _ => None,
        };
        Self::from_parts(start, end, timezone, rule)
    }

    /// Build a value from already-parsed parts.
    pub fn from_parts(
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        timezone: Tz,
        rule: Option<Rule>,
    ) -> Result<Self> {
        let value = Self {
            start: start.trunc_subsecs(0),
            end: end.map(|e| e.trunc_subsecs(0)),
            timezone,
            rule,
        };
        // Building the helper runs the expansion library's own validation.
        value.helper()?;
        Ok(value)
    }

    /// Load a value from storage columns. Returns `None` for an empty item (no start).
    ///
    /// # Errors
    /// Returns [`DateRecurError::InvalidValue`] for unparseable dates or a missing
    /// timezone, plus everything [`RecurringDateValue::new`] can return.
    pub fn from_columns(columns: &FieldColumns) -> Result<Option<Self>> {
        let Some(start) = non_empty(&columns.value) else {
            return Ok(None);
        };
        let start = parse_storage_datetime(start)?;
        let end = non_empty(&columns.end_value)
            .map(parse_storage_datetime)
            .transpose()?;
        let timezone = non_empty(&columns.timezone).ok_or_else(|| {
            DateRecurError::InvalidValue("timezone is required when a date is set".to_string())
        })?;
        Self::new(start, end, timezone, non_empty(&columns.rrule)).map(Some)
    }

    pub fn to_columns(&self) -> FieldColumns {
        FieldColumns {
            value: Some(self.start.format(STORAGE_FORMAT).to_string()),
            end_value: self.end.map(|e| e.format(STORAGE_FORMAT).to_string()),
            rrule: self.rule.as_ref().map(Rule::to_string),
            timezone: Some(self.timezone.name().to_string()),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The end instant, defaulting to the start.
    pub fn end(&self) -> DateTime<Utc> {
        self.end.unwrap_or(self.start)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn rule(&self) -> Option<&Rule> {
        self.rule.as_ref()
    }

    pub fn is_recurring(&self) -> bool {
        self.rule.is_some()
    }

    pub fn is_infinite(&self) -> bool {
        self.rule.as_ref().is_some_and(Rule::is_infinite)
    }

    pub fn with_start(&self, start: DateTime<Utc>) -> Result<Self> {
        Self::from_parts(start, self.end, self.timezone, self.rule.clone())
    }

    pub fn with_end(&self, end: Option<DateTime<Utc>>) -> Result<Self> {
        Self::from_parts(self.start, end, self.timezone, self.rule.clone())
    }

    pub fn with_timezone(&self, timezone: &str) -> Result<Self> {
        Self::from_parts(self.start, self.end, parse_timezone(timezone)?, self.rule.clone())
    }

    pub fn with_rrule(&self, rrule: Option<&str>) -> Result<Self> {
        Self::new(self.start, self.end, self.timezone.name(), rrule)
    }

    /// A fresh helper for this value.
    pub fn helper(&self) -> Result<Box<dyn DateRecurHelper>> {
        helper::create(self.start, self.end, self.rule.clone(), self.timezone)
    }

    /// Number of occurrences, or `None` for an infinite rule. Counting stops at `cap`.
    pub fn occurrence_count(&self, cap: usize) -> Result<Option<usize>> {
        if self.is_infinite() {
            return Ok(None);
        }
        Ok(Some(self.helper()?.generate(None, None).take(cap).count()))
    }

    /// Hash of the four inputs. Equal inputs give equal fingerprints within a process.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.start.timestamp().hash(&mut hasher);
        self.end().timestamp().hash(&mut hasher);
        self.timezone.name().hash(&mut hasher);
        self.rule.as_ref().map(Rule::to_string).hash(&mut hasher);
        hasher.finish()
    }
}

fn non_empty(column: &Option<String>) -> Option<&str> {
    column.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a stored datetime: the UTC storage format, or RFC 3339 with an offset.
pub fn parse_storage_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, STORAGE_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DateRecurError::InvalidValue(format!("invalid datetime '{s}': {e}")))
}
