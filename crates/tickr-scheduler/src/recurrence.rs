use chrono::{DateTime, Duration, Months, Utc};

use crate::{
    error::{Result, SchedulerError},
    types::{is_storable, Recurrence, RecurrenceType},
};

/// Advance `reference` by one recurrence step.
///
/// HOURLY, DAILY and WEEKLY are fixed-length steps (a day is exactly 24 h,
/// since every instant is UTC). MONTHLY moves N calendar months and keeps the
/// day-of-month, clamping to the month's last day: Jan 31 + 1 month lands on
/// Feb 28 (or Feb 29 in a leap year), never in March.
///
/// A result past the year 9999 is an `InvalidSchedule` error.
pub fn next_occurrence(
    reference: DateTime<Utc>,
    recurrence_type: RecurrenceType,
    recurrence_value: u32,
) -> Result<DateTime<Utc>> {
    let next = match fixed_step(recurrence_type, recurrence_value) {
        Some(step) => reference.checked_add_signed(step),
        None => reference.checked_add_months(Months::new(recurrence_value)),
    };
    next.filter(|t| is_storable(*t)).ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!(
            "{reference} + {recurrence_value} {recurrence_type} is out of range"
        ))
    })
}

/// First occurrence in the chain starting at `reference` that is strictly
/// after `floor`.
///
/// When the very next step is already past `floor` this is exactly
/// `next_occurrence`. Otherwise the missed occurrences are skipped rather than
/// fired back to back, keeping the result on the original step grid.
pub fn next_after(
    reference: DateTime<Utc>,
    recurrence: Recurrence,
    floor: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let Recurrence {
        recurrence_type,
        recurrence_value,
    } = recurrence;

    let first = next_occurrence(reference, recurrence_type, recurrence_value)?;
    if first > floor {
        return Ok(first);
    }

    if let Some(step) = fixed_step(recurrence_type, recurrence_value) {
        // Jump straight to the right grid point instead of stepping.
        let step_ms = step.num_milliseconds();
        let behind_ms = (floor - reference).num_milliseconds();
        let steps = behind_ms / step_ms + 1;
        return Duration::try_milliseconds(steps.saturating_mul(step_ms))
            .and_then(|d| reference.checked_add_signed(d))
            .filter(|t| is_storable(*t))
            .ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!(
                    "catch-up from {reference} past {floor} is out of range"
                ))
            });
    }

    // Month lengths differ, so walk the chain; each hop clamps like a
    // regular step would.
    let mut next = first;
    while next <= floor {
        next = next_occurrence(next, recurrence_type, recurrence_value)?;
    }
    Ok(next)
}

fn fixed_step(recurrence_type: RecurrenceType, value: u32) -> Option<Duration> {
    let n = i64::from(value);
    match recurrence_type {
        RecurrenceType::Hourly => Some(Duration::hours(n)),
        RecurrenceType::Daily => Some(Duration::days(n)),
        RecurrenceType::Weekly => Some(Duration::days(7 * n)),
        RecurrenceType::Monthly => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn hourly_daily_weekly_are_fixed_offsets() {
        let base = at(2024, 3, 10, 1, 30);
        assert_eq!(
            next_occurrence(base, RecurrenceType::Hourly, 5).unwrap(),
            at(2024, 3, 10, 6, 30)
        );
        assert_eq!(
            next_occurrence(base, RecurrenceType::Daily, 2).unwrap(),
            at(2024, 3, 12, 1, 30)
        );
        assert_eq!(
            next_occurrence(base, RecurrenceType::Weekly, 3).unwrap(),
            at(2024, 3, 31, 1, 30)
        );
    }

    #[test]
    fn monthly_keeps_day_of_month() {
        assert_eq!(
            next_occurrence(at(2024, 1, 15, 9, 0), RecurrenceType::Monthly, 1).unwrap(),
            at(2024, 2, 15, 9, 0)
        );
        assert_eq!(
            next_occurrence(at(2024, 11, 15, 9, 0), RecurrenceType::Monthly, 3).unwrap(),
            at(2025, 2, 15, 9, 0)
        );
    }

    #[test]
    fn monthly_from_jan_31_clamps_to_end_of_february() {
        assert_eq!(
            next_occurrence(at(2023, 1, 31, 12, 0), RecurrenceType::Monthly, 1).unwrap(),
            at(2023, 2, 28, 12, 0)
        );
        assert_eq!(
            next_occurrence(at(2024, 1, 31, 12, 0), RecurrenceType::Monthly, 1).unwrap(),
            at(2024, 2, 29, 12, 0)
        );
    }

    #[test]
    fn monthly_clamps_to_thirty_day_months() {
        assert_eq!(
            next_occurrence(at(2024, 3, 31, 0, 0), RecurrenceType::Monthly, 1).unwrap(),
            at(2024, 4, 30, 0, 0)
        );
    }

    #[test]
    fn overflow_is_an_error_not_a_panic() {
        let err = next_occurrence(DateTime::<Utc>::MAX_UTC, RecurrenceType::Hourly, 1)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn steps_past_year_9999_are_rejected() {
        let err = next_occurrence(at(9999, 12, 15, 0, 0), RecurrenceType::Monthly, 1).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));

        let err = next_occurrence(at(9999, 12, 28, 0, 0), RecurrenceType::Weekly, 1).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));

        assert_eq!(
            next_occurrence(at(9999, 12, 30, 0, 0), RecurrenceType::Daily, 1).unwrap(),
            at(9999, 12, 31, 0, 0)
        );
    }

    #[test]
    fn catch_up_past_year_9999_is_rejected() {
        let rec = Recurrence::new(RecurrenceType::Hourly, 1);
        let floor = at(9999, 12, 31, 23, 30);
        let err = next_after(at(9999, 12, 31, 20, 0), rec, floor).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn next_after_is_plain_step_when_not_behind() {
        let base = at(2024, 5, 1, 8, 0);
        let rec = Recurrence::new(RecurrenceType::Daily, 1);
        assert_eq!(
            next_after(base, rec, at(2024, 5, 1, 8, 0)).unwrap(),
            at(2024, 5, 2, 8, 0)
        );
    }

    #[test]
    fn next_after_skips_missed_fixed_occurrences_on_grid() {
        let base = at(2024, 5, 1, 8, 0);
        let rec = Recurrence::new(RecurrenceType::Hourly, 2);
        // 09:59 on May 3rd; grid points are even hours offset from 08:00
        let next = next_after(base, rec, at(2024, 5, 3, 9, 59)).unwrap();
        assert_eq!(next, at(2024, 5, 3, 10, 0));

        // floor exactly on a grid point moves past it
        let next = next_after(base, rec, at(2024, 5, 3, 10, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 3, 12, 0));
    }

    #[test]
    fn next_after_walks_monthly_chain() {
        let rec = Recurrence::new(RecurrenceType::Monthly, 1);
        // Jan 31 -> Feb 29 -> Mar 29 -> Apr 29 (clamping carries along the chain)
        let next = next_after(at(2024, 1, 31, 0, 0), rec, at(2024, 4, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 4, 29, 0, 0));
    }

    #[test]
    fn repeated_steps_do_not_drift() {
        let start = at(2024, 1, 1, 0, 0);
        let mut t = start;
        for _ in 0..10 {
            t = next_occurrence(t, RecurrenceType::Daily, 2).unwrap();
        }
        assert_eq!(t, start + Duration::days(20));
    }
}
