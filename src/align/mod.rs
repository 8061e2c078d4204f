//! Resampling of irregular streams onto fixed period boundaries
//!
//! - [`Align`]: one value per occupied bucket, by time-weighted interpolation
//! - [`GapFill`]: densify an aligned stream to every grid point

mod aligner;
mod gapfill;
pub mod period;

pub use aligner::Align;
pub use gapfill::{FillMode, GapFill};
pub use period::{AlignmentPeriod, CalendarPeriod, CalendarUnit, FixedPeriod, PeriodSpec};

use crate::data::{seconds_between, DataType, Value};
use crate::error::EvalError;
use chrono::{DateTime, Utc};

/// Time-weighted linear interpolation of `v1@t1` and `v2@t2` at `target`.
///
/// `target` must lie in `[t1, t2]`. The result is computed in f64 and cast
/// back to `data_type`, truncating toward zero for Integer.
pub fn interpolate(
    data_type: DataType,
    (t1, v1): (DateTime<Utc>, &Value),
    (t2, v2): (DateTime<Utc>, &Value),
    target: DateTime<Utc>,
) -> Result<Value, EvalError> {
    if target < t1 || target > t2 {
        return Err(EvalError::InterpolationOutOfBounds {
            target,
            start: t1,
            end: t2,
        });
    }
    let f1 = data_type.to_f64(v1)?;
    let f2 = data_type.to_f64(v2)?;
    if t1 == t2 {
        return data_type.from_f64(f1);
    }
    let weight = seconds_between(t1, target) / seconds_between(t1, t2);
    data_type.from_f64(f1 + (f2 - f1) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_interpolation_is_linear_in_time() {
        let v1 = Value::Decimal(10.0);
        let v2 = Value::Decimal(-30.0);
        for tau in 0..=40 {
            let got = interpolate(DataType::Decimal, (ts(100), &v1), (ts(140), &v2), ts(100 + tau))
                .unwrap()
                .as_f64()
                .unwrap();
            let expected = 10.0 + (-30.0 - 10.0) * (tau as f64 / 40.0);
            let scale = expected.abs().max(1.0);
            assert!((got - expected).abs() / scale < 1e-10, "tau={}", tau);
        }
    }

    #[test]
    fn test_integer_interpolation_truncates() {
        let got = interpolate(
            DataType::Integer,
            (ts(0), &Value::Integer(0)),
            (ts(3), &Value::Integer(10)),
            ts(1),
        )
        .unwrap();
        assert_eq!(got, Value::Integer(3));
    }

    #[test]
    fn test_interpolation_bounds() {
        let err = interpolate(
            DataType::Decimal,
            (ts(10), &Value::Decimal(1.0)),
            (ts(20), &Value::Decimal(2.0)),
            ts(5),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::InterpolationOutOfBounds { .. }));
    }

    #[test]
    fn test_interpolation_rejects_non_numeric() {
        let v = Value::String("a".into());
        let err = interpolate(DataType::String, (ts(0), &v), (ts(2), &v), ts(1)).unwrap_err();
        assert_eq!(err, EvalError::NonNumericType(DataType::String));
    }
}
