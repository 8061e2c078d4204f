use super::period::AlignmentPeriod;
use super::interpolate;
use crate::data::{DataType, Sample};
use crate::error::{CompileError, QueryError};
use crate::stream::{ExecContext, Filter, QueryResult, SampleStream};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Resamples a numeric stream to one value per occupied period bucket.
///
/// For every bucket, in order:
/// - the first bucket of the stream takes its first sample's value (smear)
/// - a sample exactly on the boundary is passed through unchanged
/// - otherwise the value is interpolated between the last sample of the
///   previous bucket and the first sample of this one
#[derive(Debug, Clone)]
pub struct Align {
    period: Arc<dyn AlignmentPeriod>,
}

impl Align {
    pub fn new(period: Arc<dyn AlignmentPeriod>) -> Self {
        Self { period }
    }

    /// Wrap a single-field result; the field must be required and numeric,
    /// checked before any data is read
    pub fn align(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let field = input.single_field("alignment")?.clone();
        if !field.data_type().is_numeric() {
            return Err(CompileError::UnsupportedDataType {
                operation: "alignment",
                data_type: field.data_type(),
            }
            .context(format!("align({})", field.urn()))
            .into());
        }
        if !field.is_required() {
            return Err(CompileError::OperandNotRequired(field.urn().to_string())
                .context(format!("align({})", field.urn()))
                .into());
        }
        tracing::debug!("Aligning '{}' ({})", field.urn(), field.data_type());

        let iter = AlignIter {
            inner: input.samples,
            period: Arc::clone(&self.period),
            data_type: field.data_type(),
            stage: format!("align({})", field.urn()),
            bucket: None,
            previous: None,
        };
        Ok(QueryResult::new(vec![field], ctx.guard(iter)))
    }
}

impl Filter for Align {
    fn name(&self) -> String {
        format!("align({:?})", self.period)
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        self.align(ctx, input)
    }
}

/// Streaming state: the current bucket and the last sample seen in it
struct AlignIter {
    inner: SampleStream,
    period: Arc<dyn AlignmentPeriod>,
    data_type: DataType,
    stage: String,
    bucket: Option<DateTime<Utc>>,
    previous: Option<Sample>,
}

impl AlignIter {
    fn emit(&self, boundary: DateTime<Utc>, current: &Sample) -> Result<Sample, QueryError> {
        let value = current.first();
        match &self.previous {
            None => Ok(Sample::new(boundary, vec![value.clone()])),
            Some(_) if current.timestamp == boundary => Ok(current.clone()),
            Some(prev) => {
                let interpolated = interpolate(
                    self.data_type,
                    (prev.timestamp, prev.first()),
                    (current.timestamp, value),
                    boundary,
                )
                .map_err(|e| QueryError::from(e.context(self.stage.clone())))?;
                tracing::trace!("{}: interpolated {} at {}", self.stage, interpolated, boundary);
                Ok(Sample::new(boundary, vec![interpolated]))
            }
        }
    }
}

impl Iterator for AlignIter {
    type Item = Result<Sample, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sample = match self.inner.next()? {
                Ok(sample) => sample,
                Err(e) => return Some(Err(e)),
            };
            let boundary = self.period.align(sample.timestamp);
            if self.bucket == Some(boundary) {
                self.previous = Some(sample);
                continue;
            }
            self.bucket = Some(boundary);
            let out = self.emit(boundary, &sample);
            self.previous = Some(sample);
            return Some(out);
        }
    }
}
