use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::schemas::exam::ExamStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TimingError {
    #[error("duration_minutes must be positive, got {0}")]
    NonPositiveDuration(i64),
    #[error("duration_minutes is too large: {0}")]
    DurationOverflow(i64),
}

pub(crate) fn normalize_duration(duration_minutes: i64) -> Result<Duration, TimingError> {
    if duration_minutes <= 0 {
        return Err(TimingError::NonPositiveDuration(duration_minutes));
    }

    duration_minutes
        .checked_mul(60)
        .map(Duration::seconds)
        .ok_or(TimingError::DurationOverflow(duration_minutes))
}

/// Earlier of `started_at + duration` and the scheduled end.
pub(crate) fn compute_effective_deadline(
    started_at: OffsetDateTime,
    duration_minutes: i64,
    scheduled_end: OffsetDateTime,
) -> Result<OffsetDateTime, TimingError> {
    let duration = normalize_duration(duration_minutes)?;
    let duration_deadline = started_at
        .checked_add(duration)
        .ok_or(TimingError::DurationOverflow(duration_minutes))?;

    Ok(if duration_deadline < scheduled_end { duration_deadline } else { scheduled_end })
}

/// Whole seconds left until `deadline`, clamped at zero.
pub(crate) fn remaining_seconds(deadline: OffsetDateTime, now: OffsetDateTime) -> u64 {
    let left = deadline - now;
    if left <= Duration::ZERO {
        return 0;
    }

    left.whole_seconds() as u64
}

/// Status of an exam window. Both bounds are inclusive: an exam is still
/// ongoing at exactly its scheduled end.
pub(crate) fn derive_exam_status(
    scheduled_start: OffsetDateTime,
    scheduled_end: OffsetDateTime,
    now: OffsetDateTime,
) -> ExamStatus {
    if now < scheduled_start {
        ExamStatus::Upcoming
    } else if now <= scheduled_end {
        ExamStatus::Ongoing
    } else {
        ExamStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-06-01 10:00 UTC);

    #[test]
    fn rejects_non_positive_duration() {
        assert_eq!(
            compute_effective_deadline(NOW, 0, NOW + Duration::hours(1)),
            Err(TimingError::NonPositiveDuration(0))
        );
        assert_eq!(normalize_duration(-5), Err(TimingError::NonPositiveDuration(-5)));
        assert_eq!(normalize_duration(i64::MAX), Err(TimingError::DurationOverflow(i64::MAX)));
    }

    #[test]
    fn effective_deadline_is_min_of_both_bounds() {
        let cases = [
            (60, Duration::minutes(10), Duration::minutes(10)),
            (10, Duration::minutes(60), Duration::minutes(10)),
            (30, Duration::minutes(30), Duration::minutes(30)),
            (45, -Duration::minutes(5), -Duration::minutes(5)),
        ];

        for (duration_minutes, end_offset, expected_offset) in cases {
            let deadline =
                compute_effective_deadline(NOW, duration_minutes, NOW + end_offset).unwrap();
            assert_eq!(deadline, NOW + expected_offset, "duration={duration_minutes}");
        }
    }

    #[test]
    fn tighter_scheduled_end_wins() {
        let deadline =
            compute_effective_deadline(NOW, 60, NOW + Duration::minutes(10)).expect("deadline");
        assert_eq!(deadline, NOW + Duration::minutes(10));
        assert_eq!(remaining_seconds(deadline, NOW), 600);
    }

    #[test]
    fn reopening_keeps_original_start() {
        let started_at = NOW;
        let reopened_at = NOW + Duration::minutes(5);
        let deadline =
            compute_effective_deadline(started_at, 10, NOW + Duration::hours(2)).expect("deadline");

        assert_eq!(remaining_seconds(deadline, reopened_at), 300);
    }

    #[test]
    fn remaining_seconds_floors_and_never_goes_negative() {
        let deadline = NOW + Duration::milliseconds(2_999);
        assert_eq!(remaining_seconds(deadline, NOW), 2);
        assert_eq!(remaining_seconds(NOW, NOW), 0);
        assert_eq!(remaining_seconds(NOW - Duration::hours(3), NOW), 0);
    }

    #[test]
    fn status_boundaries_are_inclusive() {
        let start = NOW;
        let end = NOW + Duration::hours(1);

        assert_eq!(
            derive_exam_status(start, end, start - Duration::nanoseconds(1)),
            ExamStatus::Upcoming
        );
        assert_eq!(derive_exam_status(start, end, start), ExamStatus::Ongoing);
        assert_eq!(derive_exam_status(start, end, end), ExamStatus::Ongoing);
        assert_eq!(
            derive_exam_status(start, end, end + Duration::nanoseconds(1)),
            ExamStatus::Completed
        );
    }
}
