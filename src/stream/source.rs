use super::{Datasource, ExecContext, Filter, FusionHint, QueryResult, TimeRange};
use crate::data::{validate_fields, FieldDescriptor, Sample};
use crate::error::{EvalError, QueryError};
use std::sync::Arc;

/// A fixed, pre-sorted set of rows served from memory
#[derive(Debug, Clone)]
pub struct VecSource {
    fields: Vec<FieldDescriptor>,
    samples: Arc<Vec<Sample>>,
}

impl VecSource {
    pub fn new(fields: Vec<FieldDescriptor>, samples: Vec<Sample>) -> Self {
        Self {
            fields,
            samples: Arc::new(samples),
        }
    }

    /// Single-field source
    pub fn scalar(field: FieldDescriptor, samples: Vec<Sample>) -> Self {
        Self::new(vec![field], samples)
    }
}

impl Datasource for VecSource {
    fn execute(&self, ctx: &ExecContext) -> Result<QueryResult, QueryError> {
        validate_fields(&self.fields)?;

        let fields = self.fields.clone();
        let width = fields.len();
        let range = ctx.range;
        let samples = Arc::clone(&self.samples);
        let rows = (0..samples.len())
            .map(move |i| samples[i].clone())
            .filter(move |s| range.contains(s.timestamp))
            .map(move |s| -> Result<Sample, QueryError> {
                if s.value.len() != width {
                    return Err(EvalError::RowWidthMismatch {
                        input: 0,
                        expected: width,
                        found: s.value.len(),
                    }
                    .into());
                }
                for (value, field) in s.value.iter().zip(&fields) {
                    field
                        .check(value)
                        .map_err(|e| QueryError::from(e.context(field.urn().to_string())))?;
                }
                Ok(s)
            });

        Ok(QueryResult::new(self.fields.clone(), ctx.guard(rows)))
    }
}

/// Keeps only samples inside a time window
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    range: TimeRange,
}

impl TimeWindow {
    pub fn new(range: TimeRange) -> Self {
        Self { range }
    }
}

impl Filter for TimeWindow {
    fn name(&self) -> String {
        format!("window({:?}..{:?})", self.range.from, self.range.to)
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let range = self.range;
        let samples = input.samples.filter(move |item| match item {
            Ok(sample) => range.contains(sample.timestamp),
            Err(_) => true,
        });
        Ok(QueryResult::new(input.fields, ctx.guard(samples)))
    }

    fn fusion_hint(&self) -> Option<FusionHint> {
        Some(FusionHint::TimeWindow(self.range))
    }
}
