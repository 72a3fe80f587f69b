//! Interval algebra over temporal ranges.
//!
//! Every function here is pure. Inputs are expected to be sorted by `from`
//! ascending; that is a precondition, not something these functions check.
//!
//! # Closed vs. half-open
//!
//! Ranges handled here are closed on both ends. The orchestrator later uses
//! the request window as half-open when it reads rows, so a row sitting
//! exactly on the window end is covered by the index but not returned.

use crate::{TemporalRange, TidemarkResult, Timestamp, ValidationError, END_OF_DAY};
use chrono::{NaiveTime, TimeDelta};
use std::fmt::Display;

// ============================================================================
// GAP COMPUTATION
// ============================================================================

/// Compute the sub-ranges of `[from, to]` not covered by `valid`.
///
/// `valid` must be sorted by `from` ascending. Feeding it squashed ranges is
/// the normal case, but overlapping input is tolerated.
///
/// The exclusivity offsets shift the start of every gap after a covered range
/// forward by `from_offset` and pull the end of every gap before a covered
/// range back by `to_offset`. A gap whose shifted start passes its shifted end
/// is dropped. Offsets are never applied to the window start itself.
///
/// A covered range ending exactly at `from` moves the sweep cursor to
/// `from + from_offset`; the following gap then applies `from_offset` once
/// more on top of it.
///
/// # Errors
///
/// `to < from`, an inverted valid range, a negative offset, or an offset that
/// overflows the timestamp range.
pub fn missing(
    from: Timestamp,
    to: Timestamp,
    valid: &[TemporalRange<Timestamp>],
    from_offset: Option<TimeDelta>,
    to_offset: Option<TimeDelta>,
) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
    if to < from {
        return Err(ValidationError::invalid_range("window", from, to).into());
    }
    let from_offset = checked_offset("from_offset", from_offset)?;
    let to_offset = checked_offset("to_offset", to_offset)?;

    if let Some(bad) = valid.iter().find(|r| !r.is_valid()) {
        return Err(ValidationError::invalid_range("valid_range", bad.from(), bad.to()).into());
    }

    if valid.is_empty() {
        return Ok(vec![TemporalRange::new(from, to)]);
    }

    let from_plus_offset = shift_forward(from, from_offset)?;
    let mut cursor = from;
    let mut gaps = Vec::new();

    for range in valid {
        if range.from() <= cursor {
            if range.to() > from {
                cursor = cursor.max(range.to());
            } else if range.to() == from {
                cursor = cursor.max(from_plus_offset);
            }
            continue;
        }

        if cursor > to || range.from() > to {
            break;
        }

        let gap_from = shift_forward(cursor, from_offset)?;
        let gap_to = shift_back(range.from(), to_offset)?;
        if gap_from <= gap_to {
            let gap_from = if cursor == from { cursor } else { gap_from.min(to) };
            gaps.push(TemporalRange::new(gap_from, gap_to.max(from)));
        }

        cursor = range.to();
        if range.to() >= to {
            break;
        }
    }

    let cursor = cursor.max(from);
    if cursor < to {
        let gap_from = if cursor == from {
            cursor
        } else {
            shift_forward(cursor, from_offset)?
        };
        // An offset can push the trailing gap past the window end.
        if gap_from <= to {
            gaps.push(TemporalRange::new(gap_from, to));
        }
    }

    Ok(gaps)
}

fn checked_offset(field: &str, offset: Option<TimeDelta>) -> TidemarkResult<TimeDelta> {
    let offset = offset.unwrap_or_else(TimeDelta::zero);
    if offset < TimeDelta::zero() {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("offset must not be negative, got {}", offset),
        }
        .into());
    }
    Ok(offset)
}

fn shift_forward(t: Timestamp, offset: TimeDelta) -> TidemarkResult<Timestamp> {
    t.checked_add_signed(offset).ok_or_else(|| {
        ValidationError::InvalidValue {
            field: "from_offset".to_string(),
            reason: format!("{} + {} overflows", t, offset),
        }
        .into()
    })
}

fn shift_back(t: Timestamp, offset: TimeDelta) -> TidemarkResult<Timestamp> {
    t.checked_sub_signed(offset).ok_or_else(|| {
        ValidationError::InvalidValue {
            field: "to_offset".to_string(),
            reason: format!("{} - {} overflows", t, offset),
        }
        .into()
    })
}

// ============================================================================
// MERGING AND CLIPPING
// ============================================================================

/// Merge overlapping or touching ranges in one pass.
///
/// Input must be sorted by `from` ascending. Ranges that share an endpoint are
/// merged. Squashing already squashed input returns it unchanged.
pub fn squash<T: Ord + Copy>(sorted: &[TemporalRange<T>]) -> Vec<TemporalRange<T>> {
    let mut merged = Vec::with_capacity(sorted.len());
    let mut iter = sorted.iter();
    let Some(first) = iter.next() else {
        return merged;
    };

    let (mut from, mut to) = (first.from(), first.to());
    for range in iter {
        if range.from() > to {
            merged.push(TemporalRange::new(from, to));
            from = range.from();
            to = range.to();
        } else if range.to() > to {
            to = range.to();
        }
    }
    merged.push(TemporalRange::new(from, to));
    merged
}

/// Clip ranges to `[from, to]`, dropping ranges wholly outside it.
pub fn clamp_to_window<T: Ord + Copy + Display>(
    sorted: &[TemporalRange<T>],
    from: T,
    to: T,
) -> TidemarkResult<Vec<TemporalRange<T>>> {
    if sorted.is_empty() {
        return Ok(Vec::new());
    }
    if to < from {
        return Err(ValidationError::invalid_range("window", from, to).into());
    }

    Ok(sorted
        .iter()
        .filter(|r| r.from() <= to && r.to() >= from)
        .map(|r| TemporalRange::new(from.max(r.from()), to.min(r.to())))
        .collect())
}

/// Split ranges into per-day pieces restricted to a daily clock window.
///
/// Days are UTC calendar days. `from_time` defaults to midnight and `to_time`
/// to [`END_OF_DAY`]. Zero-width pieces are dropped, so a range that only
/// touches the window on a boundary produces nothing for that day.
pub fn clamp_to_time_of_day(
    sorted: &[TemporalRange<Timestamp>],
    from_time: Option<NaiveTime>,
    to_time: Option<NaiveTime>,
) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
    if sorted.is_empty() {
        return Ok(Vec::new());
    }
    let from_time = from_time.unwrap_or(NaiveTime::MIN);
    let to_time = to_time.unwrap_or(END_OF_DAY);
    if to_time < from_time {
        return Err(ValidationError::invalid_range("time_of_day", from_time, to_time).into());
    }

    let mut pieces = Vec::new();
    for range in sorted {
        let mut day = range.from().date_naive();
        loop {
            let day_start = day.and_time(NaiveTime::MIN).and_utc();
            if day_start > range.to() {
                break;
            }

            let window_from = day.and_time(from_time).and_utc();
            let window_to = day.and_time(to_time).and_utc();
            let next_day = day.succ_opt();

            let clamped_from = range.from().max(window_from);
            let mut clamped_to = range.to().min(window_to);
            if let Some(next) = next_day {
                clamped_to = clamped_to.min(next.and_time(NaiveTime::MIN).and_utc());
            }

            if clamped_to >= window_from && clamped_from <= window_to && clamped_from != clamped_to
            {
                pieces.push(TemporalRange::new(clamped_from, clamped_to));
            }

            match next_day {
                Some(next) => day = next,
                None => break,
            }
        }
    }
    Ok(pieces)
}

// ============================================================================
// ORDER HELPERS
// ============================================================================

/// The later of two values; `a` on ties.
pub fn max<T: Ord>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

/// The earlier of two values; `a` on ties.
pub fn min<T: Ord>(a: T, b: T) -> T {
    if b < a {
        b
    } else {
        a
    }
}

/// Whether `t` lies between `from` and `to`.
///
/// Equality with either bound only counts when `inclusive` is set.
pub fn is_between<T: Ord>(t: &T, from: &T, to: &T, inclusive: bool) -> bool {
    if inclusive && (t == from || t == to) {
        return true;
    }
    t > from && t < to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TidemarkError;
    use chrono::{NaiveDateTime, TimeZone, Utc};

    fn ts(s: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
            .expect("fixture timestamp should parse")
            .and_utc()
    }

    fn range(from: &str, to: &str) -> TemporalRange<Timestamp> {
        TemporalRange::new(ts(from), ts(to))
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // ------------------------------------------------------------------------
    // missing
    // ------------------------------------------------------------------------

    #[test]
    fn test_missing_week_scenario() {
        let valid = vec![
            range("2021-01-01T01:00", "2021-01-03T12:30"),
            range("2021-01-02T00:00", "2021-01-04T00:00"),
            range("2021-01-05T09:00", "2021-01-06T01:00"),
            range("2021-01-06T04:00", "2021-01-06T08:00"),
        ];
        let gaps = missing(ts("2021-01-01T00:00"), ts("2021-01-07T00:00"), &valid, None, None)
            .expect("missing should succeed");

        assert_eq!(
            gaps,
            vec![
                range("2021-01-01T00:00", "2021-01-01T01:00"),
                range("2021-01-04T00:00", "2021-01-05T09:00"),
                range("2021-01-06T01:00", "2021-01-06T04:00"),
                range("2021-01-06T08:00", "2021-01-07T00:00"),
            ]
        );
    }

    #[test]
    fn test_missing_without_valid_ranges_is_whole_window() {
        let gaps = missing(ts("2021-01-01T00:00"), ts("2021-01-02T00:00"), &[], None, None)
            .unwrap();
        assert_eq!(gaps, vec![range("2021-01-01T00:00", "2021-01-02T00:00")]);
    }

    #[test]
    fn test_missing_zero_width_window() {
        let at = ts("2021-01-01T00:00");
        assert_eq!(
            missing(at, at, &[], None, None).unwrap(),
            vec![TemporalRange::new(at, at)]
        );
        assert!(missing(at, at, &[TemporalRange::new(at, at)], None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_fully_covered() {
        let valid = vec![range("2020-12-31T00:00", "2021-01-03T00:00")];
        let gaps = missing(ts("2021-01-01T00:00"), ts("2021-01-02T00:00"), &valid, None, None)
            .unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_missing_rejects_inverted_window() {
        let err = missing(ts("2021-01-02T00:00"), ts("2021-01-01T00:00"), &[], None, None)
            .unwrap_err();
        assert!(matches!(err, TidemarkError::Validation(_)));
    }

    #[test]
    fn test_missing_rejects_inverted_valid_range() {
        let valid = vec![range("2021-01-01T05:00", "2021-01-01T04:00")];
        let err = missing(ts("2021-01-01T00:00"), ts("2021-01-02T00:00"), &valid, None, None)
            .unwrap_err();
        assert!(matches!(err, TidemarkError::Validation(_)));
    }

    #[test]
    fn test_missing_rejects_negative_offset() {
        let err = missing(
            ts("2021-01-01T00:00"),
            ts("2021-01-02T00:00"),
            &[],
            Some(TimeDelta::seconds(-1)),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("from_offset"));
    }

    #[test]
    fn test_missing_applies_offsets_between_valid_ranges() {
        let valid = vec![
            range("2021-01-01T00:00", "2021-01-01T06:00"),
            range("2021-01-01T12:00", "2021-01-01T18:00"),
        ];
        let gaps = missing(
            ts("2021-01-01T00:00"),
            ts("2021-01-02T00:00"),
            &valid,
            Some(TimeDelta::minutes(1)),
            Some(TimeDelta::minutes(2)),
        )
        .unwrap();

        assert_eq!(
            gaps,
            vec![
                range("2021-01-01T06:01", "2021-01-01T11:58"),
                range("2021-01-01T18:01", "2021-01-02T00:00"),
            ]
        );
    }

    #[test]
    fn test_missing_leading_gap_keeps_window_start() {
        let valid = vec![range("2021-01-01T06:00", "2021-01-02T00:00")];
        let gaps = missing(
            ts("2021-01-01T00:00"),
            ts("2021-01-02T00:00"),
            &valid,
            Some(TimeDelta::minutes(1)),
            Some(TimeDelta::minutes(1)),
        )
        .unwrap();

        assert_eq!(gaps, vec![range("2021-01-01T00:00", "2021-01-01T05:59")]);
    }

    #[test]
    fn test_missing_valid_range_ending_at_window_start() {
        let valid = vec![
            range("2020-12-31T00:00", "2021-01-01T00:00"),
            range("2021-01-01T12:00", "2021-01-01T13:00"),
        ];
        let from = ts("2021-01-01T00:00");
        let to = ts("2021-01-02T00:00");

        let plain = missing(from, to, &valid, None, None).unwrap();
        assert_eq!(
            plain,
            vec![
                range("2021-01-01T00:00", "2021-01-01T12:00"),
                range("2021-01-01T13:00", "2021-01-02T00:00"),
            ]
        );

        // The offset lands on the cursor and is applied again to the gap.
        let offset = missing(from, to, &valid, Some(TimeDelta::minutes(1)), None).unwrap();
        assert_eq!(
            offset,
            vec![
                range("2021-01-01T00:02", "2021-01-01T12:00"),
                range("2021-01-01T13:01", "2021-01-02T00:00"),
            ]
        );
    }

    #[test]
    fn test_missing_only_valid_range_ends_at_window_start() {
        let valid = vec![range("2020-12-31T00:00", "2021-01-01T00:00")];
        let gaps = missing(
            ts("2021-01-01T00:00"),
            ts("2021-01-02T00:00"),
            &valid,
            Some(TimeDelta::minutes(1)),
            None,
        )
        .unwrap();
        assert_eq!(gaps, vec![range("2021-01-01T00:02", "2021-01-02T00:00")]);
    }

    #[test]
    fn test_missing_valid_range_starting_at_window_end() {
        let valid = vec![range("2021-01-02T00:00", "2021-01-03T00:00")];
        let gaps = missing(ts("2021-01-01T00:00"), ts("2021-01-02T00:00"), &valid, None, None)
            .unwrap();
        assert_eq!(gaps, vec![range("2021-01-01T00:00", "2021-01-02T00:00")]);
    }

    #[test]
    fn test_missing_drops_gap_crossed_by_offsets() {
        let valid = vec![
            range("2021-01-01T00:00", "2021-01-01T06:00"),
            range("2021-01-01T06:01", "2021-01-02T00:00"),
        ];
        let gaps = missing(
            ts("2021-01-01T00:00"),
            ts("2021-01-02T00:00"),
            &valid,
            Some(TimeDelta::minutes(1)),
            Some(TimeDelta::minutes(1)),
        )
        .unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_missing_drops_trailing_gap_crossed_by_offset() {
        let valid = vec![range("2021-01-01T00:00", "2021-01-01T23:59")];
        let gaps = missing(
            ts("2021-01-01T00:00"),
            ts("2021-01-02T00:00"),
            &valid,
            Some(TimeDelta::minutes(5)),
            None,
        )
        .unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_missing_nested_range_does_not_reopen_covered_span() {
        let valid = vec![
            range("2021-01-01T00:00", "2021-01-01T10:00"),
            range("2021-01-01T02:00", "2021-01-01T03:00"),
        ];
        let gaps = missing(ts("2021-01-01T00:00"), ts("2021-01-02T00:00"), &valid, None, None)
            .unwrap();
        assert_eq!(gaps, vec![range("2021-01-01T10:00", "2021-01-02T00:00")]);
    }

    // ------------------------------------------------------------------------
    // squash / clamp
    // ------------------------------------------------------------------------

    #[test]
    fn test_squash_merges_overlapping_and_touching() {
        let input = vec![
            TemporalRange::new(0, 5),
            TemporalRange::new(3, 4),
            TemporalRange::new(5, 8),
            TemporalRange::new(10, 12),
            TemporalRange::new(11, 15),
        ];
        assert_eq!(
            squash(&input),
            vec![TemporalRange::new(0, 8), TemporalRange::new(10, 15)]
        );
    }

    #[test]
    fn test_squash_empty() {
        assert!(squash::<i64>(&[]).is_empty());
    }

    #[test]
    fn test_clamp_to_window() {
        let input = vec![
            TemporalRange::new(0, 2),
            TemporalRange::new(3, 7),
            TemporalRange::new(8, 9),
            TemporalRange::new(9, 20),
            TemporalRange::new(21, 30),
        ];
        assert_eq!(
            clamp_to_window(&input, 5, 20).unwrap(),
            vec![
                TemporalRange::new(5, 7),
                TemporalRange::new(8, 9),
                TemporalRange::new(9, 20),
            ]
        );
    }

    #[test]
    fn test_clamp_to_window_keeps_touching_ranges() {
        let input = vec![TemporalRange::new(0, 5), TemporalRange::new(20, 25)];
        assert_eq!(
            clamp_to_window(&input, 5, 20).unwrap(),
            vec![TemporalRange::new(5, 5), TemporalRange::new(20, 20)]
        );
    }

    #[test]
    fn test_clamp_to_window_validates_only_non_empty_input() {
        assert!(clamp_to_window::<i64>(&[], 5, 1).unwrap().is_empty());
        assert!(clamp_to_window(&[TemporalRange::new(0, 1)], 5, 1).is_err());
    }

    #[test]
    fn test_clamp_to_time_of_day_splits_days() {
        let input = vec![range("2021-01-01T12:00", "2021-01-03T10:00")];
        let pieces = clamp_to_time_of_day(&input, Some(hm(9, 30)), Some(hm(16, 0))).unwrap();
        assert_eq!(
            pieces,
            vec![
                range("2021-01-01T12:00", "2021-01-01T16:00"),
                range("2021-01-02T09:30", "2021-01-02T16:00"),
                range("2021-01-03T09:30", "2021-01-03T10:00"),
            ]
        );
    }

    #[test]
    fn test_clamp_to_time_of_day_defaults_split_at_midnight() {
        let input = vec![range("2021-01-01T22:00", "2021-01-02T02:00")];
        let pieces = clamp_to_time_of_day(&input, None, None).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].from(), ts("2021-01-01T22:00"));
        assert_eq!(
            pieces[0].to(),
            ts("2021-01-01T00:00")
                .date_naive()
                .and_time(END_OF_DAY)
                .and_utc()
        );
        assert_eq!(pieces[1], range("2021-01-02T00:00", "2021-01-02T02:00"));
    }

    #[test]
    fn test_clamp_to_time_of_day_drops_boundary_touch() {
        // Ends exactly when the daily window opens.
        let input = vec![range("2021-01-01T08:00", "2021-01-01T09:30")];
        let pieces = clamp_to_time_of_day(&input, Some(hm(9, 30)), Some(hm(16, 0))).unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_clamp_to_time_of_day_rejects_inverted_times() {
        let input = vec![range("2021-01-01T08:00", "2021-01-01T09:30")];
        assert!(clamp_to_time_of_day(&input, Some(hm(16, 0)), Some(hm(9, 30))).is_err());
    }

    #[test]
    fn test_clamp_to_time_of_day_validates_only_non_empty_input() {
        let pieces = clamp_to_time_of_day(&[], Some(hm(16, 0)), Some(hm(9, 30))).unwrap();
        assert!(pieces.is_empty());
    }

    // ------------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------------

    #[test]
    fn test_is_between() {
        assert!(is_between(&5, &1, &10, false));
        assert!(!is_between(&1, &1, &10, false));
        assert!(is_between(&1, &1, &10, true));
        assert!(is_between(&10, &1, &10, true));
        assert!(!is_between(&11, &1, &10, true));
    }

    #[test]
    fn test_max_min() {
        let a = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(max(a, b), b);
        assert_eq!(min(a, b), a);
        assert_eq!(max(3, 3), 3);
    }
}
