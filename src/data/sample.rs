use super::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of field values, positionally matching a descriptor list
pub type Row = Vec<Value>;

/// One observation: a timestamp and the value(s) recorded at it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<V = Row> {
    pub timestamp: DateTime<Utc>,
    pub value: V,
}

impl<V> Sample<V> {
    pub fn new(timestamp: DateTime<Utc>, value: V) -> Self {
        Self { timestamp, value }
    }

    pub fn map<W>(self, f: impl FnOnce(V) -> W) -> Sample<W> {
        Sample {
            timestamp: self.timestamp,
            value: f(self.value),
        }
    }
}

impl Sample<Row> {
    /// Single-field row sample
    pub fn scalar(timestamp: DateTime<Utc>, value: impl Into<Value>) -> Self {
        Self::new(timestamp, vec![value.into()])
    }

    /// First field of the row, Null when the row is empty
    pub fn first(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.value.first().unwrap_or(&NULL)
    }
}

/// Elapsed seconds from `from` to `to`, negative when `to` is earlier
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seconds_between() {
        let a = Utc.timestamp_opt(100, 0).unwrap();
        let b = Utc.timestamp_millis_opt(101_500).unwrap();
        assert_eq!(seconds_between(a, b), 1.5);
        assert_eq!(seconds_between(b, a), -1.5);
    }

    #[test]
    fn test_scalar_sample() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let sample = Sample::scalar(ts, 3.5);
        assert_eq!(sample.first(), &Value::Decimal(3.5));
        assert_eq!(Sample::new(ts, Row::new()).first(), &Value::Null);
    }
}
