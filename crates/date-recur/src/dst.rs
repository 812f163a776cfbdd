//! Wall-clock to instant resolution across DST transitions.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;

use crate::error::{DateRecurError, Result};

/// Which instant to use when a wall-clock time occurs twice (clocks turned back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fold {
    #[default]
    Earliest,
    Latest,
}

/// Parse an IANA timezone identifier.
pub fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .trim()
        .parse()
        .map_err(|_| DateRecurError::InvalidTimezone(timezone.to_string()))
}

/// Resolve a wall-clock time in `tz` to a single instant.
///
/// Ambiguous times pick the instant given by `fold`. Times inside a gap (clocks
/// turned forward) are shifted forward by the length of the gap, so a boundary at
/// the start of the gap lands on the first instant after it.
pub fn resolve_local(tz: &Tz, naive: &NaiveDateTime, fold: Fold) -> DateTime<Tz> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(a, b) => match fold {
            Fold::Earliest => a.min(b),
            Fold::Latest => a.max(b),
        },
        LocalResult::None => {
            let before = tz
                .offset_from_utc_datetime(&(*naive - Duration::hours(24)))
                .fix()
                .local_minus_utc();
            let utc = *naive - Duration::seconds(i64::from(before));
            tracing::debug!(%naive, %tz, "local time falls in a DST gap, shifting forward");
            tz.from_utc_datetime(&utc)
        }
    }
}
