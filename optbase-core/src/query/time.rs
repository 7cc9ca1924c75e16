use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

const DAY_MS: i64 = 86_400_000;

/// One end of a query range.
///
/// Calendar dates widen to the whole day: as a start they mean
/// 00:00:00.000 UTC, as an end 23:59:59.999 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    Millis(i64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl TimeBound {
    pub fn start_ms(self) -> i64 {
        match self {
            TimeBound::Millis(ms) => ms,
            TimeBound::Date(d) => midnight_ms(d),
            TimeBound::DateTime(dt) => dt.and_utc().timestamp_millis(),
        }
    }

    pub fn end_ms(self) -> i64 {
        match self {
            TimeBound::Millis(ms) => ms,
            TimeBound::Date(d) => midnight_ms(d) + DAY_MS - 1,
            TimeBound::DateTime(dt) => dt.and_utc().timestamp_millis(),
        }
    }
}

fn midnight_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

impl From<i64> for TimeBound {
    fn from(ms: i64) -> Self {
        TimeBound::Millis(ms)
    }
}

impl From<NaiveDate> for TimeBound {
    fn from(d: NaiveDate) -> Self {
        TimeBound::Date(d)
    }
}

impl From<NaiveDateTime> for TimeBound {
    fn from(dt: NaiveDateTime) -> Self {
        TimeBound::DateTime(dt)
    }
}

impl From<DateTime<Utc>> for TimeBound {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeBound::Millis(dt.timestamp_millis())
    }
}
