//! Five-field cron expression parsing and evaluation.
//!
//! Deliberately hand-rolled rather than wrapping the `cron` crate or
//! `tokio-cron-scheduler`'s six-field (with seconds) schedules: neither
//! exposes a `minimum_interval()` and neither documents the POSIX
//! day-of-month/day-of-week union this scheduler relies on.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use std::fmt;

/// How far forward or backward a search for a firing instant will look
/// before giving up.
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

/// Cap on how many consecutive firings `minimum_interval` will sample.
const MIN_INTERVAL_SAMPLE_CAP: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronParseError {
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for CronParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}': {}", self.field, self.reason)
    }
}

impl std::error::Error for CronParseError {}

/// A single field's set of permitted values, represented as a dense bitmap
/// over `[min, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldMask {
    min: u32,
    max: u32,
    allowed: Vec<bool>,
    is_wildcard: bool,
}

impl FieldMask {
    fn parse(spec: &str, min: u32, max: u32, field: &'static str) -> Result<Self, CronParseError> {
        let size = (max - min + 1) as usize;
        let mut allowed = vec![false; size];
        let is_wildcard = spec == "*";

        for item in spec.split(',') {
            Self::parse_item(item, min, max, field, &mut allowed)?;
        }

        if !allowed.iter().any(|&b| b) {
            return Err(CronParseError {
                field,
                reason: format!("expression '{}' permits no values", spec),
            });
        }

        Ok(Self {
            min,
            max,
            allowed,
            is_wildcard,
        })
    }

    fn parse_item(
        item: &str,
        min: u32,
        max: u32,
        field: &'static str,
        allowed: &mut [bool],
    ) -> Result<(), CronParseError> {
        let (range_part, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| CronParseError {
                    field,
                    reason: format!("invalid step '{}'", step),
                })?;
                if step == 0 {
                    return Err(CronParseError {
                        field,
                        reason: "step cannot be 0".to_string(),
                    });
                }
                (range, step)
            }
            None => (item, 1),
        };

        // Range ordering (and the step walk below) is checked against the
        // raw, un-normalized value: day-of-week's `7` must still compare as
        // greater than `5` so `"5-7"` (Fri-Sat-Sun) parses as an ordinary
        // forward range instead of failing as "backwards". Only the bitmap
        // index gets the `7` -> `0` fold, since `0` and `7` name the same
        // Sunday bucket.
        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a = Self::parse_raw_value(a, min, max, field)?;
            let b = Self::parse_raw_value(b, min, max, field)?;
            if a > b {
                return Err(CronParseError {
                    field,
                    reason: format!("range '{}' is backwards", range_part),
                });
            }
            (a, b)
        } else {
            let v = Self::parse_raw_value(range_part, min, max, field)?;
            (v, v)
        };

        let mut v = start;
        while v <= end {
            let bucket = Self::normalize(field, v);
            allowed[(bucket - min) as usize] = true;
            v += step;
        }
        Ok(())
    }

    /// Parses a single literal value within `[min, max]`, without folding
    /// day-of-week's `7` to `0` — callers that need the ordering-safe raw
    /// value (range bounds) use this directly; callers that need the
    /// bitmap bucket apply [`Self::normalize`] afterwards.
    fn parse_raw_value(raw: &str, min: u32, max: u32, field: &'static str) -> Result<u32, CronParseError> {
        let v: u32 = raw.parse().map_err(|_| CronParseError {
            field,
            reason: format!("'{}' is not a number", raw),
        })?;
        if v < min || v > max {
            return Err(CronParseError {
                field,
                reason: format!("value {} outside range {}-{}", v, min, max),
            });
        }
        Ok(v)
    }

    /// Folds day-of-week's `7` (POSIX's alternate Sunday) onto `0` so both
    /// spellings land in the same bitmap bucket.
    fn normalize(field: &'static str, v: u32) -> u32 {
        if field == "day-of-week" && v == 7 {
            0
        } else {
            v
        }
    }

    fn contains(&self, value: u32) -> bool {
        if value < self.min || value > self.max {
            return false;
        }
        self.allowed[(value - self.min) as usize]
    }

    /// Smallest cyclic gap between two permitted values, in units of this
    /// field (e.g. minutes for the minute field).
    fn minimum_gap(&self) -> u32 {
        let set: Vec<u32> = (self.min..=self.max).filter(|&v| self.contains(v)).collect();
        if set.len() < 2 {
            return self.max - self.min + 1;
        }
        let mut gap = u32::MAX;
        for w in set.windows(2) {
            gap = gap.min(w[1] - w[0]);
        }
        let wrap = (self.min + (self.max - self.min + 1)) - set[set.len() - 1] + (set[0] - self.min);
        gap.min(wrap)
    }
}

/// A parsed, evaluable five-field cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    raw: String,
    minute: FieldMask,
    hour: FieldMask,
    day_of_month: FieldMask,
    month: FieldMask,
    day_of_week: FieldMask,
}

impl CronSchedule {
    /// Parses a five-field `minute hour day-of-month month day-of-week`
    /// expression.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError {
                field: "expression",
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        Ok(Self {
            raw: expr.to_string(),
            minute: FieldMask::parse(fields[0], 0, 59, "minute")?,
            hour: FieldMask::parse(fields[1], 0, 23, "hour")?,
            day_of_month: FieldMask::parse(fields[2], 1, 31, "day-of-month")?,
            month: FieldMask::parse(fields[3], 1, 12, "month")?,
            day_of_week: FieldMask::parse(fields[4], 0, 7, "day-of-week")?,
        })
    }

    pub fn source(&self) -> &str {
        &self.raw
    }

    fn day_matches(&self, day_of_month: u32, weekday_sun0: u32) -> bool {
        match (self.day_of_month.is_wildcard, self.day_of_week.is_wildcard) {
            (true, true) => true,
            (false, true) => self.day_of_month.contains(day_of_month),
            (true, false) => self.day_of_week.contains(weekday_sun0),
            (false, false) => {
                self.day_of_month.contains(day_of_month) || self.day_of_week.contains(weekday_sun0)
            }
        }
    }

    /// True iff all five fields permit the minute-aligned instant `t`.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        let weekday_sun0 = t.weekday().num_days_from_sunday();
        self.minute.contains(t.minute())
            && self.hour.contains(t.hour())
            && self.month.contains(t.month())
            && self.day_matches(t.day(), weekday_sun0)
    }

    /// Earliest minute-aligned instant `>= t` for which `matches` is true.
    pub fn next_firing_at_or_after(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>, CronParseError> {
        let start = floor_to_minute(t);
        let mut day_cursor = start.date_naive();
        let horizon = day_cursor + ChronoDuration::days(SEARCH_HORIZON_DAYS);

        loop {
            if day_cursor > horizon {
                return Err(no_firing_found());
            }
            let month = day_cursor.month();
            let day = day_cursor.day();
            let weekday_sun0 = day_cursor.weekday().num_days_from_sunday();

            if self.month.contains(month) && self.day_matches(day, weekday_sun0) {
                let start_minute_of_day = if day_cursor == start.date_naive() {
                    start.hour() * 60 + start.minute()
                } else {
                    0
                };
                for minute_of_day in start_minute_of_day..(24 * 60) {
                    let hour = minute_of_day / 60;
                    let minute = minute_of_day % 60;
                    if self.hour.contains(hour) && self.minute.contains(minute) {
                        return Ok(Utc
                            .from_utc_datetime(&day_cursor.and_hms_opt(hour, minute, 0).unwrap()));
                    }
                }
            }
            day_cursor += ChronoDuration::days(1);
        }
    }

    /// Latest minute-aligned instant `<= t` for which `matches` is true, or
    /// `None` if nothing in the search horizon matches.
    pub fn last_firing_at_or_before(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = floor_to_minute(t);
        let mut day_cursor = start.date_naive();
        let horizon = day_cursor - ChronoDuration::days(SEARCH_HORIZON_DAYS);

        loop {
            if day_cursor < horizon {
                return None;
            }
            let month = day_cursor.month();
            let day = day_cursor.day();
            let weekday_sun0 = day_cursor.weekday().num_days_from_sunday();

            if self.month.contains(month) && self.day_matches(day, weekday_sun0) {
                let start_minute_of_day = if day_cursor == start.date_naive() {
                    start.hour() * 60 + start.minute()
                } else {
                    24 * 60 - 1
                };
                for minute_of_day in (0..=start_minute_of_day).rev() {
                    let hour = minute_of_day / 60;
                    let minute = minute_of_day % 60;
                    if self.hour.contains(hour) && self.minute.contains(minute) {
                        return Some(Utc
                            .from_utc_datetime(&day_cursor.and_hms_opt(hour, minute, 0).unwrap()));
                    }
                }
            }
            day_cursor -= ChronoDuration::days(1);
        }
    }

    /// Smallest gap, in milliseconds, this expression can produce between
    /// two consecutive firings. Computed by sampling a bounded run of
    /// consecutive firings forward from the Unix epoch and taking the
    /// minimum adjacent gap; exact for any expression built from
    /// comma-lists/ranges/steps, since those repeat with a period well
    /// inside the sample cap.
    pub fn minimum_interval_ms(&self) -> u64 {
        if !self.day_of_month.is_wildcard && !self.day_of_week.is_wildcard {
            // Unioned day fields can produce back-to-back calendar days;
            // the minute/hour masks alone still bound the minimum gap from
            // below, so fall through to sampling rather than special-casing.
        }

        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        let Ok(mut current) = self.next_firing_at_or_after(epoch) else {
            return u64::MAX;
        };

        let mut min_gap_minutes: i64 = i64::MAX;
        for _ in 0..MIN_INTERVAL_SAMPLE_CAP {
            let Ok(next) = self.next_firing_at_or_after(current + ChronoDuration::minutes(1)) else {
                break;
            };
            let gap = (next - current).num_minutes();
            min_gap_minutes = min_gap_minutes.min(gap);
            current = next;
        }

        if min_gap_minutes == i64::MAX {
            // Only ever fires once within the search horizon.
            let minute_gap = self.minute.minimum_gap() as i64;
            let hour_gap = self.hour.minimum_gap() as i64;
            min_gap_minutes = minute_gap.min(hour_gap * 60);
        }

        (min_gap_minutes.max(0) as u64) * 60_000
    }
}

fn floor_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

fn no_firing_found() -> CronParseError {
    CronParseError {
        field: "expression",
        reason: format!("no firing instant found within {} days", SEARCH_HORIZON_DAYS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test_case("* * * *"; "too few fields")]
    #[test_case("* * * * * *"; "too many fields")]
    #[test_case("60 * * * *"; "minute out of range")]
    #[test_case("* 24 * * *"; "hour out of range")]
    #[test_case("* * 32 * *"; "day of month out of range")]
    #[test_case("* * * 13 *"; "month out of range")]
    #[test_case("* * * * 8"; "day of week out of range")]
    #[test_case("*/0 * * * *"; "zero step")]
    #[test_case("5-1 * * * *"; "backwards range")]
    fn rejects_invalid_expression(expr: &str) {
        assert!(CronSchedule::parse(expr).is_err());
    }

    #[test]
    fn accepts_day_of_week_seven_as_sunday() {
        let cron = CronSchedule::parse("0 0 * * 7").unwrap();
        // 2021-01-03 is a Sunday.
        assert!(cron.matches(dt(2021, 1, 3, 0, 0)));
    }

    #[test]
    fn day_of_week_range_spanning_seven_parses_as_forward_range() {
        // "5-7" is Friday-Saturday-Sunday, not a backwards range: 7 must
        // compare as greater than 5 before it is folded onto 0.
        let cron = CronSchedule::parse("0 0 * * 5-7").unwrap();
        assert!(cron.matches(dt(2021, 1, 1, 0, 0))); // Friday
        assert!(cron.matches(dt(2021, 1, 2, 0, 0))); // Saturday
        assert!(cron.matches(dt(2021, 1, 3, 0, 0))); // Sunday
        assert!(!cron.matches(dt(2021, 1, 4, 0, 0))); // Monday
    }

    #[test]
    fn hourly_matches_on_the_hour_only() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        assert!(cron.matches(dt(2021, 1, 1, 5, 0)));
        assert!(!cron.matches(dt(2021, 1, 1, 5, 1)));
    }

    #[test]
    fn next_firing_skips_to_next_hour() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        let next = cron.next_firing_at_or_after(dt(2021, 1, 1, 0, 5)).unwrap();
        assert_eq!(next, dt(2021, 1, 1, 1, 0));
    }

    #[test]
    fn next_firing_is_identity_when_already_matching() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        let next = cron.next_firing_at_or_after(dt(2021, 1, 1, 1, 0)).unwrap();
        assert_eq!(next, dt(2021, 1, 1, 1, 0));
    }

    #[test]
    fn last_firing_before_is_inclusive_and_bounded() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        let last = cron.last_firing_at_or_before(dt(2021, 1, 1, 0, 5)).unwrap();
        assert_eq!(last, dt(2021, 1, 1, 0, 0));

        let last = cron.last_firing_at_or_before(dt(2021, 1, 1, 1, 0)).unwrap();
        assert_eq!(last, dt(2021, 1, 1, 1, 0));
    }

    #[test]
    fn day_of_month_and_day_of_week_union_when_both_restricted() {
        // The 1st of the month OR any Monday.
        let cron = CronSchedule::parse("0 0 1 * 1").unwrap();
        // 2021-01-04 is a Monday, not the 1st.
        assert!(cron.matches(dt(2021, 1, 4, 0, 0)));
        // 2021-02-01 is a Monday AND the 1st.
        assert!(cron.matches(dt(2021, 2, 1, 0, 0)));
        // 2021-01-05 is neither.
        assert!(!cron.matches(dt(2021, 1, 5, 0, 0)));
    }

    #[test]
    fn day_of_month_only_restriction_governs_alone() {
        let cron = CronSchedule::parse("0 0 15 * *").unwrap();
        assert!(cron.matches(dt(2021, 3, 15, 0, 0)));
        assert!(!cron.matches(dt(2021, 3, 16, 0, 0)));
    }

    #[test]
    fn minimum_interval_every_minute() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(cron.minimum_interval_ms(), 60_000);
    }

    #[test]
    fn minimum_interval_hourly() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(cron.minimum_interval_ms(), 3_600_000);
    }

    #[test]
    fn minimum_interval_uneven_minute_list() {
        let cron = CronSchedule::parse("0,5 * * * *").unwrap();
        assert_eq!(cron.minimum_interval_ms(), 5 * 60_000);
    }

    #[test]
    fn step_expression_parses() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert!(cron.matches(dt(2021, 1, 1, 0, 0)));
        assert!(cron.matches(dt(2021, 1, 1, 0, 15)));
        assert!(!cron.matches(dt(2021, 1, 1, 0, 20)));
    }
}
