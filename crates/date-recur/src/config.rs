//! Engine configuration: the part grid and occurrence cache settings.
//!
//! The configuration is plain serde data so it can come from any format; the CLI
//! reads it from TOML.
//!
//! ```toml
//! precreate = "P2Y"
//! max_rows_per_value = 5000
//!
//! [part_grid]
//! all = true
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use serde::{de, Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{DateRecurError, Result};
use crate::grid::{PartGrid, PartGridConfig};

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$",
    )
    .expect("valid ISO 8601 duration pattern")
});

pub const DEFAULT_PRECREATE: &str = "P2Y";
pub const DEFAULT_MAX_ROWS_PER_VALUE: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_part_grid")]
    pub part_grid: PartGridConfig,

    /// How far past "now" infinite rules are materialized. An empty string disables
    /// the horizon, leaving only `max_rows_per_value` as the cap.
    #[serde(default = "default_precreate", with = "optional_interval")]
    pub precreate: Option<PrecreateInterval>,

    #[serde(default = "default_max_rows")]
    pub max_rows_per_value: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            part_grid: default_part_grid(),
            precreate: default_precreate(),
            max_rows_per_value: DEFAULT_MAX_ROWS_PER_VALUE,
        }
    }
}

impl EngineConfig {
    pub fn part_grid(&self) -> Result<PartGrid> {
        PartGrid::try_from(&self.part_grid)
    }

    pub fn cache_config(&self) -> Result<CacheConfig> {
        if self.max_rows_per_value == 0 {
            return Err(DateRecurError::Config(
                "max_rows_per_value must be at least 1".to_string(),
            ));
        }
        Ok(CacheConfig {
            precreate: self.precreate,
            max_rows_per_value: self.max_rows_per_value,
        })
    }
}

fn default_part_grid() -> PartGridConfig {
    PartGridConfig {
        all: true,
        ..PartGridConfig::default()
    }
}

fn default_precreate() -> Option<PrecreateInterval> {
    DEFAULT_PRECREATE.parse().ok()
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS_PER_VALUE
}

/// A calendar interval in ISO 8601 duration notation (`P2Y`, `P6M`, `P1Y2M10DT2H`).
///
/// Years and months are added on the calendar; weeks, days and the time part are
/// added as fixed durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrecreateInterval {
    pub months: u32,
    pub days: i64,
    pub seconds: i64,
}

impl PrecreateInterval {
    /// `from` moved forward by this interval, or `None` on overflow.
    pub fn after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        from.checked_add_months(Months::new(self.months))?
            .checked_add_signed(Duration::try_days(self.days)?)?
            .checked_add_signed(Duration::try_seconds(self.seconds)?)
    }
}

impl FromStr for PrecreateInterval {
    type Err = DateRecurError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || DateRecurError::Config(format!("invalid ISO 8601 duration '{s}'"));
        let caps = ISO_DURATION.captures(s).ok_or_else(invalid)?;
        if s == "P" || s.ends_with('T') {
            return Err(invalid());
        }
        let num = |i: usize| -> Result<i64> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<i64>().map_err(|_| invalid()))
        };

        let months = num(1)?
            .checked_mul(12)
            .and_then(|m| m.checked_add(num(2).ok()?))
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(invalid)?;
        let days = num(3)?
            .checked_mul(7)
            .and_then(|d| d.checked_add(num(4).ok()?))
            .ok_or_else(invalid)?;
        let seconds = num(5)?
            .checked_mul(3600)
            .and_then(|h| h.checked_add(num(6).ok()?.checked_mul(60)?))
            .and_then(|hm| hm.checked_add(num(7).ok()?))
            .ok_or_else(invalid)?;

        Ok(Self {
            months,
            days,
            seconds,
        })
    }
}

impl fmt::Display for PrecreateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("P")?;
        let (years, months) = (self.months / 12, self.months % 12);
        if years > 0 {
            write!(f, "{years}Y")?;
        }
        if months > 0 {
            write!(f, "{months}M")?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.seconds > 0 {
            write!(f, "T{}S", self.seconds)?;
        }
        if self.months == 0 && self.days == 0 && self.seconds == 0 {
            f.write_str("0D")?;
        }
        Ok(())
    }
}

mod optional_interval {
    use super::*;

    pub fn serialize<S>(value: &Option<PrecreateInterval>, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match value {
            Some(interval) => serializer.collect_str(interval),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<PrecreateInterval>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IntervalVisitor;

        impl de::Visitor<'_> for IntervalVisitor {
            type Value = Option<PrecreateInterval>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(r#"an ISO 8601 duration like "P2Y" or "P6M", or "" for none"#)
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value.trim().is_empty() {
                    return Ok(None);
                }
                value
                    .parse()
                    .map(Some)
                    .map_err(|e: DateRecurError| de::Error::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(IntervalVisitor)
    }
}
