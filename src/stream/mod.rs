//! Lazy sample streams and the datasource/filter contracts built on them
//!
//! A stream is a pull-based iterator of `Result<Sample, QueryError>`. Every
//! stage checks the traversal's [`CancellationToken`] once per element it
//! emits, and stops after yielding the first error.

mod source;

pub use source::{TimeWindow, VecSource};

use crate::data::{FieldDescriptor, Row, Sample};
use crate::error::{CompileError, QueryError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Boxed lazy stream of samples
pub type SampleStream<V = Row> = Box<dyn Iterator<Item = Result<Sample<V>, QueryError>> + Send>;

/// Cooperative cancellation flag shared by every stage of one traversal
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Err(Cancelled) once the token has fired
    pub fn check(&self) -> Result<(), QueryError> {
        if self.is_cancelled() {
            Err(QueryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Half-open time range `[from, to)`; a missing bound is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts < to)
    }

    /// Range covered by both `self` and `other`
    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        let from = match (self.from, other.from) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        TimeRange { from, to }
    }
}

/// Per-traversal execution context
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub range: TimeRange,
    pub cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wrap an iterator so it honours cancellation and stops after an error
    pub fn guard<V, I>(&self, inner: I) -> SampleStream<V>
    where
        V: Send + 'static,
        I: Iterator<Item = Result<Sample<V>, QueryError>> + Send + 'static,
    {
        Box::new(Guarded {
            inner,
            cancel: self.cancel.clone(),
            done: false,
        })
    }
}

struct Guarded<I> {
    inner: I,
    cancel: CancellationToken,
    done: bool,
}

impl<V, I> Iterator for Guarded<I>
where
    I: Iterator<Item = Result<Sample<V>, QueryError>>,
{
    type Item = Result<Sample<V>, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            tracing::warn!("Stream traversal cancelled");
            return Some(Err(QueryError::Cancelled));
        }
        match self.inner.next() {
            Some(Ok(sample)) => Some(Ok(sample)),
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Descriptors plus the lazy stream of rows matching them
pub struct QueryResult {
    pub fields: Vec<FieldDescriptor>,
    pub samples: SampleStream,
}

impl QueryResult {
    pub fn new(fields: Vec<FieldDescriptor>, samples: SampleStream) -> Self {
        Self { fields, samples }
    }

    /// Descriptors with an empty stream
    pub fn empty(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            samples: Box::new(std::iter::empty()),
        }
    }

    /// The only field of a single-field result
    pub fn single_field(&self, stage: &'static str) -> Result<&FieldDescriptor, CompileError> {
        match self.fields.as_slice() {
            [field] => Ok(field),
            fields => Err(CompileError::ExpectedSingleField {
                stage,
                found: fields.len(),
            }),
        }
    }

    /// Drain the stream into memory
    pub fn collect(self) -> Result<Vec<Sample>, QueryError> {
        self.samples.collect()
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Something that produces a [`QueryResult`] for a time range
pub trait Datasource: Send + Sync {
    fn execute(&self, ctx: &ExecContext) -> Result<QueryResult, QueryError>;

    /// Offer a filter for the source to absorb. Returns the fused source when
    /// accepted, in which case the filter must not be applied again.
    fn try_fuse(&self, _filter: &dyn Filter) -> Option<Arc<dyn Datasource>> {
        None
    }
}

/// A transform from one result to another
pub trait Filter: Send + Sync {
    /// Short description used in logs and error context
    fn name(&self) -> String;

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError>;

    /// What a datasource would have to do to absorb this filter
    fn fusion_hint(&self) -> Option<FusionHint> {
        None
    }
}

/// Capabilities a filter can ask a datasource to take over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionHint {
    /// Restrict the scan to a time window
    TimeWindow(TimeRange),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(ts(10), ts(20));
        assert!(range.contains(ts(10)));
        assert!(range.contains(ts(19)));
        assert!(!range.contains(ts(20)));
        assert!(TimeRange::all().contains(ts(-5)));

        let other = TimeRange {
            from: Some(ts(15)),
            to: None,
        };
        assert_eq!(range.intersect(&other), TimeRange::new(ts(15), ts(20)));
    }

    #[test]
    fn test_guard_stops_on_cancel() {
        let ctx = ExecContext::default();
        let samples: Vec<Result<Sample, QueryError>> = (0..5)
            .map(|i| Ok(Sample::scalar(ts(i), Value::Integer(i))))
            .collect();
        let mut stream = ctx.guard(samples.into_iter());

        assert!(stream.next().unwrap().is_ok());
        ctx.cancel.cancel();
        assert!(matches!(stream.next(), Some(Err(QueryError::Cancelled))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_guard_fuses_after_error() {
        let ctx = ExecContext::default();
        let samples: Vec<Result<Sample, QueryError>> = vec![
            Err(crate::error::EvalError::DivisionByZero.into()),
            Ok(Sample::scalar(ts(1), Value::Integer(1))),
        ];
        let mut stream = ctx.guard(samples.into_iter());
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }
}
