//! A single materialized instance of a date value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One occurrence: a start/end instant pair with `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Occurrence {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Inclusive overlap: touching at a single instant counts.
    pub fn overlaps(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        self.start <= window_end && self.end >= window_start
    }
}
