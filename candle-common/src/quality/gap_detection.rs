//! Calendar gap detection between consecutive candles.
//!
//! Weekends are expected closures and never count as missing data. A gap is
//! measured in business days (Monday to Friday) from one candle's date to the
//! next; Friday to Monday is one business day and therefore not a gap.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

use crate::data::Timeframe;

fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Number of business days in `(from, to]`
pub fn business_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let days = (to - from).num_days();
    if days <= 0 {
        return 0;
    }

    let full_weeks = days / 7;
    let mut count = full_weeks * 5;

    let mut date = from + Duration::weeks(full_weeks);
    for _ in 0..days % 7 {
        date = date + Duration::days(1);
        if is_business_day(date) {
            count += 1;
        }
    }
    count
}

/// Whether the step from `previous` to `current` skips expected trading days.
///
/// Only day-to-day steps are judged: candles on the same date never form a
/// gap, and weekly candles are skipped since every step spans a weekend.
pub fn is_unexpected_gap(
    previous: DateTime<Utc>,
    current: DateTime<Utc>,
    timeframe: Timeframe,
    threshold_business_days: u32,
) -> bool {
    if timeframe == Timeframe::W1 {
        return false;
    }

    let business_days = business_days_between(previous.date_naive(), current.date_naive());
    business_days > 1 && business_days >= i64::from(threshold_business_days)
}
