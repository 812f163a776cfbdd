//! # date-recur
//!
//! A recurring date engine: RFC 5545 RRULE parsing, occurrence generation with DST
//! handling, partial-date range resolution and an occurrence cache for range queries.
//!
//! BYxxx expansion is delegated to the `rrule` crate; `chrono-tz` supplies the
//! timezone rules so that wall-clock times stay put across DST transitions.
//!
//! ## Modules
//!
//! - [`rule`]: RRULE string → validated [`Rule`]
//! - [`grid`]: which rule parts are allowed per frequency
//! - [`helper`]: rule + anchor dates → occurrences
//! - [`value`]: the start/end/timezone/rrule field value
//! - [`granularity`]: partial date input → inclusive instant range
//! - [`cache`]: materialized occurrences and overlap queries
//! - [`config`]: engine configuration
//! - [`dst`]: wall-clock resolution across DST gaps and overlaps
//! - [`error`]: Error types
//!
//! ## Quick start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use date_recur::RecurringDateValue;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
//! let end = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
//! let value = RecurringDateValue::new(
//!     start,
//!     Some(end),
//!     "UTC",
//!     Some("FREQ=WEEKLY;BYDAY=MO,WE,FR;COUNT=6"),
//! )
//! .unwrap();
//!
//! let occurrences = value.helper().unwrap().occurrences(None, None, None).unwrap();
//! assert_eq!(occurrences.len(), 6);
//! ```

pub mod cache;
pub mod config;
pub mod dst;
pub mod error;
pub mod granularity;
pub mod grid;
pub mod helper;
pub mod occurrence;
pub mod rule;
pub mod value;

pub use cache::{CacheConfig, EntityId, MemoryStore, OccurrenceCache, OccurrenceRow, OccurrenceStore, SyncReport};
pub use config::{EngineConfig, PrecreateInterval};
pub use error::DateRecurError;
pub use granularity::{largest_instant, smallest_instant, Granularity};
pub use grid::{PartGrid, PartGridConfig};
pub use helper::{DateRecurHelper, RecurringHelper, SingleHelper};
pub use occurrence::Occurrence;
pub use rule::{Frequency, Part, Rule};
pub use value::{FieldColumns, RecurringDateValue};
