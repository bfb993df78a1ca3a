/// Period math over unix timestamps (seconds, UTC)
///
/// Every `abs_*` function maps a timestamp to the start of the calendar
/// period containing it, so `abs_x(t) <= t` and `abs_x(abs_x(t)) == abs_x(t)`.
use chrono::{DateTime, Datelike, NaiveDate, Utc};

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;

/// Start of the day (UTC midnight)
pub fn abs_day(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)
}

/// Start of the week; weeks begin on Sunday
pub fn abs_week(timestamp: i64) -> i64 {
    let day = timestamp.div_euclid(SECONDS_PER_DAY);
    // 1970-01-01 was a Thursday, four days after a Sunday
    let since_sunday = (day + 4).rem_euclid(7);
    (day - since_sunday) * SECONDS_PER_DAY
}

/// Start of the month
pub fn abs_month(timestamp: i64) -> i64 {
    match to_datetime(timestamp) {
        Some(dt) => midnight(dt.year(), dt.month()).unwrap_or_else(|| abs_day(timestamp)),
        None => abs_day(timestamp),
    }
}

/// Start of the year
pub fn abs_year(timestamp: i64) -> i64 {
    match to_datetime(timestamp) {
        Some(dt) => midnight(dt.year(), 1).unwrap_or_else(|| abs_day(timestamp)),
        None => abs_day(timestamp),
    }
}

/// Start of the decade (year - year mod 10)
pub fn abs_decade(timestamp: i64) -> i64 {
    match to_datetime(timestamp) {
        Some(dt) => {
            let year = dt.year() - dt.year().rem_euclid(10);
            midnight(year, 1).unwrap_or_else(|| abs_year(timestamp))
        }
        None => abs_day(timestamp),
    }
}

/// Relative change from `previous` to `current`
///
/// Returns 0 when both are zero and 1 when only `previous` is zero.
pub fn diff(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            1.0
        }
    } else {
        (current - previous) / previous
    }
}

fn to_datetime(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
}

fn midnight(year: i32, month: u32) -> Option<i64> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2020-03-18 13:45:10 UTC, a Wednesday
    const WEDNESDAY: i64 = 1_584_539_110;

    #[test]
    fn test_abs_day() {
        assert_eq!(abs_day(WEDNESDAY), 1_584_489_600);
        assert_eq!(abs_day(0), 0);
        assert_eq!(abs_day(-1), -SECONDS_PER_DAY);
    }

    #[test]
    fn test_abs_week_starts_on_sunday() {
        // Sunday 2020-03-15
        assert_eq!(abs_week(WEDNESDAY), 1_584_230_400);
        let sunday = DateTime::from_timestamp(abs_week(WEDNESDAY), 0).unwrap();
        assert_eq!(sunday.weekday(), chrono::Weekday::Sun);
        // A Sunday maps to itself
        assert_eq!(abs_week(1_584_230_400), 1_584_230_400);
        // The epoch was a Thursday; its week started 1969-12-28
        assert_eq!(abs_week(0), -4 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_abs_month_year_decade() {
        assert_eq!(abs_month(WEDNESDAY), 1_583_020_800); // 2020-03-01
        assert_eq!(abs_year(WEDNESDAY), 1_577_836_800); // 2020-01-01
        assert_eq!(abs_decade(WEDNESDAY), 1_577_836_800); // 2020-01-01
        assert_eq!(abs_decade(1_262_304_000 + 5), 1_262_304_000); // 2010-01-01
        assert_eq!(abs_decade(1_546_300_800), 1_262_304_000); // 2019 -> 2010
    }

    #[test]
    fn test_period_bounds_and_idempotence() {
        let samples = [
            -86_401,
            0,
            1,
            951_782_400, // 2000-02-29
            WEDNESDAY,
            1_609_459_199, // 2020-12-31 23:59:59
            1_893_456_000,
        ];
        let fns: [(fn(i64) -> i64, i64); 5] = [
            (abs_day, SECONDS_PER_DAY),
            (abs_week, SECONDS_PER_WEEK),
            (abs_month, 31 * SECONDS_PER_DAY),
            (abs_year, 366 * SECONDS_PER_DAY),
            (abs_decade, 3_653 * SECONDS_PER_DAY),
        ];

        for t in samples {
            for (f, max_len) in fns {
                let start = f(t);
                assert!(start <= t, "start {} > {}", start, t);
                assert!(t < start + max_len);
                assert_eq!(f(start), start);
            }
        }
    }

    #[test]
    fn test_diff() {
        assert_eq!(diff(0.0, 0.0), 0.0);
        assert_eq!(diff(5.0, 0.0), 1.0);
        assert_eq!(diff(10.0, 5.0), 1.0);
        assert_eq!(diff(5.0, 10.0), -0.5);
    }
}
