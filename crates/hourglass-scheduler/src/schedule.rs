use chrono::{DateTime, Duration, Utc};

use crate::types::Frequency;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Gap between two triggers of `frequency` repeated `magnitude` times.
///
/// `magnitude` below 1 is treated as 1. For `TimesPerDay` the gap never
/// drops below one second. `None` when the gap is not representable.
pub fn interval(frequency: Frequency, magnitude: u32) -> Option<Duration> {
    let m = i64::from(magnitude.max(1));
    match frequency {
        Frequency::Minutely => Duration::try_minutes(m),
        Frequency::Hourly => Duration::try_hours(m),
        Frequency::Daily => Duration::try_days(m),
        Frequency::Weekly => Duration::try_weeks(m),
        Frequency::TimesPerDay => Duration::try_milliseconds((MILLIS_PER_DAY / m).max(1_000)),
    }
}

/// Compute the trigger that follows `current`.
///
/// The result is always strictly after `current`; at the far end of the
/// representable range it saturates to `DateTime::<Utc>::MAX_UTC`.
pub fn next_run(current: DateTime<Utc>, frequency: Frequency, magnitude: u32) -> DateTime<Utc> {
    interval(frequency, magnitude)
        .and_then(|gap| current.checked_add_signed(gap))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// First trigger on the `previous` cadence that lies strictly after `now`.
///
/// Slots missed while the scheduler was down are skipped in one step
/// instead of being replayed tick by tick.
pub fn next_run_after(
    previous: DateTime<Utc>,
    now: DateTime<Utc>,
    frequency: Frequency,
    magnitude: u32,
) -> DateTime<Utc> {
    let next = next_run(previous, frequency, magnitude);
    if next > now {
        return next;
    }
    let Some(gap) = interval(frequency, magnitude) else {
        return DateTime::<Utc>::MAX_UTC;
    };
    let gap_ms = gap.num_milliseconds().max(1);
    let steps = (now - previous).num_milliseconds() / gap_ms + 1;
    steps
        .checked_mul(gap_ms)
        .and_then(Duration::try_milliseconds)
        .and_then(|ahead| previous.checked_add_signed(ahead))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
