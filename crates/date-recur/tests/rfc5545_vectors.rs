//! RFC 5545 compliance vectors: derived from Section 3.8.5 examples.
//!
//! Bi-weekly multi-day, yearly, leap year, COUNT, INTERVAL, BYSETPOS and
//! multi-part intersections, all expanded through `RecurringDateValue`.

use chrono::{Datelike, NaiveDateTime, Utc};
use date_recur::dst::{parse_timezone, resolve_local, Fold};
use date_recur::{Occurrence, RecurringDateValue};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn expand(rrule: &str, start_local: &str, tz: &str, limit: usize) -> Vec<Occurrence> {
    let zone = parse_timezone(tz).unwrap();
    let naive = NaiveDateTime::parse_from_str(start_local, "%Y-%m-%dT%H:%M:%S").unwrap();
    let start = resolve_local(&zone, &naive, Fold::Earliest).with_timezone(&Utc);
    RecurringDateValue::new(start, None, tz, Some(rrule))
        .expect("valid value")
        .helper()
        .unwrap()
        .occurrences(None, None, Some(limit))
        .expect("bounded expansion")
}

/// Local (year, month, day) tuples.
fn dates(events: &[Occurrence], tz: &str) -> Vec<(i32, u32, u32)> {
    let zone = parse_timezone(tz).unwrap();
    events
        .iter()
        .map(|e| {
            let local = e.start.with_timezone(&zone);
            (local.year(), local.month(), local.day())
        })
        .collect()
}

// ===========================================================================
// 1. Every other week on Tuesday and Thursday (INTERVAL=2, multi-BYDAY)
// ===========================================================================

#[test]
fn biweekly_tue_thu_alternating_weeks() {
    let result = expand("FREQ=WEEKLY;INTERVAL=2;BYDAY=TU,TH", "2026-01-06T10:00:00", "UTC", 8);

    assert_eq!(
        dates(&result, "UTC"),
        vec![
            (2026, 1, 6),
            (2026, 1, 8),
            (2026, 1, 20),
            (2026, 1, 22),
            (2026, 2, 3),
            (2026, 2, 5),
            (2026, 2, 17),
            (2026, 2, 19),
        ]
    );
}

// ===========================================================================
// 2. Yearly by month and day: June 15 every year
// ===========================================================================

#[test]
fn yearly_june_15() {
    let result = expand("FREQ=YEARLY;BYMONTH=6;BYMONTHDAY=15", "2026-06-15T12:00:00", "UTC", 4);

    assert_eq!(
        dates(&result, "UTC"),
        vec![(2026, 6, 15), (2027, 6, 15), (2028, 6, 15), (2029, 6, 15)]
    );
}

// ===========================================================================
// 3. Leap year Feb 29 handling: skips non-leap years
// ===========================================================================

#[test]
fn leap_year_feb_29() {
    let result = expand("FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=29", "2024-02-29T08:00:00", "UTC", 3);

    assert_eq!(
        dates(&result, "UTC"),
        vec![(2024, 2, 29), (2028, 2, 29), (2032, 2, 29)],
        "non-leap years have no Feb 29"
    );
}

// ===========================================================================
// 4. COUNT limit in a DST-observing zone
// ===========================================================================

#[test]
fn count_limit_daily_five_new_york() {
    let result = expand("FREQ=DAILY;COUNT=5", "2026-06-01T08:00:00", "America/New_York", 100);

    assert_eq!(result.len(), 5, "COUNT=5 must win over the larger limit");
    let d = dates(&result, "America/New_York");
    for (i, day) in d.iter().enumerate() {
        assert_eq!(*day, (2026, 6, 1 + i as u32));
    }
}

// ===========================================================================
// 5. INTERVAL: FREQ=MONTHLY;INTERVAL=3 (quarterly)
// ===========================================================================

#[test]
fn monthly_interval_three_quarterly() {
    let result = expand("FREQ=MONTHLY;INTERVAL=3", "2026-03-15T09:00:00", "UTC", 5);

    assert_eq!(
        dates(&result, "UTC"),
        vec![
            (2026, 3, 15),
            (2026, 6, 15),
            (2026, 9, 15),
            (2026, 12, 15),
            (2027, 3, 15),
        ]
    );
}

// ===========================================================================
// 6. BYSETPOS + BYDAY: last weekday of each month
// ===========================================================================

#[test]
fn last_weekday_of_month_bysetpos_neg1() {
    let result = expand(
        "FREQ=MONTHLY;BYDAY=MO,TU,WE,TH,FR;BYSETPOS=-1",
        "2026-01-30T17:00:00",
        "UTC",
        6,
    );

    assert_eq!(
        dates(&result, "UTC"),
        vec![
            (2026, 1, 30),
            (2026, 2, 27),
            (2026, 3, 31),
            (2026, 4, 30),
            (2026, 5, 29),
            (2026, 6, 30),
        ]
    );
}

// ===========================================================================
// 7. BYMONTH + BYDAY + BYSETPOS: second Tuesday of January and June only
// ===========================================================================

#[test]
fn second_tuesday_of_jan_and_jun() {
    let result = expand(
        "FREQ=MONTHLY;BYMONTH=1,6;BYDAY=TU;BYSETPOS=2",
        "2026-01-13T14:00:00",
        "UTC",
        4,
    );

    assert_eq!(
        dates(&result, "UTC"),
        vec![(2026, 1, 13), (2026, 6, 9), (2027, 1, 12), (2027, 6, 8)]
    );
}

// ===========================================================================
// 8. Ordinal BYDAY: first Monday of every month
// ===========================================================================

#[test]
fn first_monday_of_month() {
    // 2026-01-05, 2026-02-02 and 2026-03-02 are the first Mondays.
    let result = expand("FREQ=MONTHLY;BYDAY=1MO", "2026-01-05T19:00:00", "Europe/Berlin", 3);

    assert_eq!(
        dates(&result, "Europe/Berlin"),
        vec![(2026, 1, 5), (2026, 2, 2), (2026, 3, 2)]
    );
}

// ===========================================================================
// 9. Every weekday, week starting on Monday
// ===========================================================================

#[test]
fn weekdays_skip_weekends() {
    // Fri 2026-01-09 → Mon 12, Tue 13.
    let result = expand(
        "FREQ=DAILY;BYDAY=MO,TU,WE,TH,FR;WKST=MO",
        "2026-01-09T07:30:00",
        "UTC",
        3,
    );

    assert_eq!(
        dates(&result, "UTC"),
        vec![(2026, 1, 9), (2026, 1, 12), (2026, 1, 13)]
    );
}
