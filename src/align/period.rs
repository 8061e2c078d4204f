//! Alignment periods: map any instant to the start of its enclosing bucket

use crate::error::CompileError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pure, total mapping from an instant to its bucket start
pub trait AlignmentPeriod: Send + Sync + std::fmt::Debug {
    /// Start of the bucket containing `ts`
    fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc>;

    /// The boundary following `boundary` (which is itself a bucket start)
    fn next_boundary(&self, boundary: DateTime<Utc>) -> DateTime<Utc>;
}

/// Fixed-width buckets, floored in a UTC offset
#[derive(Debug, Clone, Copy)]
pub struct FixedPeriod {
    width_ms: i64,
    offset: FixedOffset,
}

impl FixedPeriod {
    pub fn new(width: Duration, offset: FixedOffset) -> Result<Self, CompileError> {
        let width_ms = width.num_milliseconds();
        if width_ms <= 0 {
            return Err(CompileError::InvalidConfig(format!(
                "alignment period must be positive, got {}ms",
                width_ms
            )));
        }
        Ok(Self { width_ms, offset })
    }

    /// Width in seconds, aligned in UTC
    pub fn seconds(secs: i64) -> Result<Self, CompileError> {
        Self::new(Duration::seconds(secs), utc_offset())
    }

    pub fn width(&self) -> Duration {
        Duration::milliseconds(self.width_ms)
    }
}

impl AlignmentPeriod for FixedPeriod {
    fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let offset_ms = self.offset.local_minus_utc() as i64 * 1000;
        let local_ms = ts.timestamp_millis() + offset_ms;
        let floored = local_ms.div_euclid(self.width_ms) * self.width_ms;
        let sub_ms = ts.timestamp_subsec_nanos() as i64 % 1_000_000;
        // Drop sub-millisecond precision as well as the remainder
        ts - Duration::milliseconds(local_ms - floored) - Duration::nanoseconds(sub_ms)
    }

    fn next_boundary(&self, boundary: DateTime<Utc>) -> DateTime<Utc> {
        boundary + self.width()
    }
}

/// Calendar unit for [`CalendarPeriod`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarUnit {
    Day,
    /// ISO weeks, starting Monday
    Week,
    Month,
}

/// Day/week/month buckets in a UTC offset
#[derive(Debug, Clone, Copy)]
pub struct CalendarPeriod {
    unit: CalendarUnit,
    offset: FixedOffset,
}

impl CalendarPeriod {
    pub fn new(unit: CalendarUnit, offset: FixedOffset) -> Self {
        Self { unit, offset }
    }

    fn start_of(&self, date: NaiveDate) -> NaiveDate {
        match self.unit {
            CalendarUnit::Day => date,
            CalendarUnit::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            CalendarUnit::Month => date.with_day(1).unwrap_or(date),
        }
    }

    fn to_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        match self.offset.from_local_datetime(&midnight).single() {
            Some(local) => local.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&midnight),
        }
    }
}

impl AlignmentPeriod for CalendarPeriod {
    fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let local = ts.with_timezone(&self.offset).date_naive();
        self.to_utc(self.start_of(local))
    }

    fn next_boundary(&self, boundary: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start_of(boundary.with_timezone(&self.offset).date_naive());
        let next = match self.unit {
            CalendarUnit::Day => start.succ_opt().unwrap_or(start),
            CalendarUnit::Week => start + Duration::days(7),
            CalendarUnit::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(start)
            }
        };
        self.to_utc(next)
    }
}

/// Serializable period description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PeriodSpec {
    Fixed {
        width_secs: i64,
        #[serde(default)]
        utc_offset_secs: i32,
    },
    Calendar {
        unit: CalendarUnit,
        #[serde(default)]
        utc_offset_secs: i32,
    },
}

impl PeriodSpec {
    pub fn build(&self) -> Result<Arc<dyn AlignmentPeriod>, CompileError> {
        match self {
            PeriodSpec::Fixed {
                width_secs,
                utc_offset_secs,
            } => Ok(Arc::new(FixedPeriod::new(
                Duration::seconds(*width_secs),
                offset(*utc_offset_secs)?,
            )?)),
            PeriodSpec::Calendar {
                unit,
                utc_offset_secs,
            } => Ok(Arc::new(CalendarPeriod::new(
                *unit,
                offset(*utc_offset_secs)?,
            ))),
        }
    }
}

pub(crate) fn offset(secs: i32) -> Result<FixedOffset, CompileError> {
    FixedOffset::east_opt(secs)
        .ok_or_else(|| CompileError::InvalidConfig(format!("invalid UTC offset {}s", secs)))
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_fixed_period_floor() {
        let period = FixedPeriod::seconds(60).unwrap();
        assert_eq!(period.align(ts(45)), ts(0));
        assert_eq!(period.align(ts(60)), ts(60));
        assert_eq!(period.align(ts(119)), ts(60));
        assert_eq!(period.align(ts(-1)), ts(-60));
        assert_eq!(period.next_boundary(ts(60)), ts(120));
    }

    #[test]
    fn test_fixed_period_drops_sub_second() {
        let period = FixedPeriod::seconds(1).unwrap();
        let t = Utc.timestamp_opt(10, 123_456_789).unwrap();
        assert_eq!(period.align(t), ts(10));
    }

    #[test]
    fn test_fixed_period_with_offset() {
        // Hourly buckets in UTC+00:30 start at half past each UTC hour
        let period =
            FixedPeriod::new(Duration::hours(1), FixedOffset::east_opt(1800).unwrap()).unwrap();
        assert_eq!(period.align(ts(3600)), ts(1800));
        assert_eq!(period.align(ts(5400)), ts(5400));
    }

    #[test]
    fn test_rejects_non_positive_width() {
        assert!(FixedPeriod::seconds(0).is_err());
    }

    #[test]
    fn test_calendar_month() {
        let period = CalendarPeriod::new(CalendarUnit::Month, utc_offset());
        let t = Utc.with_ymd_and_hms(2024, 12, 17, 8, 30, 0).unwrap();
        let start = period.align(t);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(
            period.next_boundary(start),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_calendar_week_in_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let period = CalendarPeriod::new(CalendarUnit::Week, offset);
        // Sunday 23:00 UTC is already Monday 01:00 in UTC+2
        let t = Utc.with_ymd_and_hms(2024, 6, 2, 23, 0, 0).unwrap();
        assert_eq!(
            period.align(t),
            Utc.with_ymd_and_hms(2024, 6, 2, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_period_spec_from_json() {
        let spec: PeriodSpec =
            serde_json::from_str(r#"{"kind": "fixed", "width_secs": 300}"#).unwrap();
        let period = spec.build().unwrap();
        assert_eq!(period.align(ts(599)), ts(300));

        let spec: PeriodSpec =
            serde_json::from_str(r#"{"kind": "calendar", "unit": "day"}"#).unwrap();
        assert!(spec.build().is_ok());
    }
}
