//! `@now`-style identifier macros, evaluated at filter build time (UTC).

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use rusqlite::types::Value as SqlValue;

use crate::validators::format_datetime;

fn date_value(dt: DateTime<Utc>) -> SqlValue {
    SqlValue::Text(format_datetime(&dt))
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

fn end_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_milli_opt(23, 59, 59, 999).map(|naive| Utc.from_utc_datetime(&naive))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).and_then(|d| d.pred_opt())
}

/// Value of the macro `name` at `now`, or `None` for unknown macros.
pub fn macro_value(name: &str, now: DateTime<Utc>) -> Option<SqlValue> {
    let today = now.date_naive();
    let value = match name {
        "@now" => date_value(now),
        "@yesterday" => date_value(now - Duration::days(1)),
        "@tomorrow" => date_value(now + Duration::days(1)),
        "@second" => SqlValue::Integer(i64::from(now.second())),
        "@minute" => SqlValue::Integer(i64::from(now.minute())),
        "@hour" => SqlValue::Integer(i64::from(now.hour())),
        "@day" => SqlValue::Integer(i64::from(now.day())),
        "@month" => SqlValue::Integer(i64::from(now.month())),
        "@year" => SqlValue::Integer(i64::from(now.year())),
        "@weekday" => SqlValue::Integer(i64::from(now.weekday().num_days_from_sunday())),
        "@todayStart" => date_value(start_of_day(today)?),
        "@todayEnd" => date_value(end_of_day(today)?),
        "@monthStart" => date_value(start_of_day(today.with_day(1)?)?),
        "@monthEnd" => date_value(end_of_day(last_day_of_month(now.year(), now.month())?)?),
        "@yearStart" => date_value(start_of_day(NaiveDate::from_ymd_opt(now.year(), 1, 1)?)?),
        "@yearEnd" => date_value(end_of_day(NaiveDate::from_ymd_opt(now.year(), 12, 31)?)?),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: Option<SqlValue>) -> String {
        match value {
            Some(SqlValue::Text(s)) => s,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_date_macros() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 13, 45, 30).unwrap();
        assert_eq!(text(macro_value("@now", now)), "2024-02-10 13:45:30.000Z");
        assert_eq!(text(macro_value("@yesterday", now)), "2024-02-09 13:45:30.000Z");
        assert_eq!(text(macro_value("@todayStart", now)), "2024-02-10 00:00:00.000Z");
        assert_eq!(text(macro_value("@monthEnd", now)), "2024-02-29 23:59:59.999Z");
        assert_eq!(text(macro_value("@yearStart", now)), "2024-01-01 00:00:00.000Z");
        assert_eq!(macro_value("@weekday", now), Some(SqlValue::Integer(6)));
        assert_eq!(macro_value("@hour", now), Some(SqlValue::Integer(13)));
        assert_eq!(macro_value("@unknown", now), None);
    }
}
