//! Stateful single-pass filters deriving a metric from consecutive samples
//!
//! Each traversal owns a fresh [`PreviousSample`]; a filter instance holds
//! only configuration and can be applied to any number of streams.

mod counter;
mod delta;

pub use counter::CounterDelta;
pub use delta::{Delta, Rate};

use crate::data::{FieldDescriptor, Sample, Value};
use crate::error::{CompileError, EvalError, QueryError};
use crate::stream::{ExecContext, QueryResult, SampleStream};
use chrono::{DateTime, Utc};

/// The one sample retained between steps of a traversal
#[derive(Debug, Clone, Default)]
pub struct PreviousSample {
    previous: Option<(DateTime<Utc>, Value)>,
}

impl PreviousSample {
    /// Store `current`, returning what was there before
    pub fn replace(
        &mut self,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Option<(DateTime<Utc>, Value)> {
        self.previous.replace((timestamp, value))
    }
}

/// One derivation rule: given the retained state and the current sample,
/// decide what (if anything) to emit
pub(crate) trait Derivation: Send + 'static {
    fn step(
        &mut self,
        state: &mut PreviousSample,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Result<Option<Value>, EvalError>;
}

/// Validate the common precondition: a single required numeric field
pub(crate) fn numeric_input<'a>(
    input: &'a QueryResult,
    stage: &'static str,
) -> Result<&'a FieldDescriptor, CompileError> {
    let field = input.single_field(stage)?;
    let context = format!("{}({})", stage, field.urn());
    field
        .data_type()
        .require_numeric()
        .map_err(|e| e.context(context.clone()))?;
    if !field.is_required() {
        return Err(CompileError::OperandNotRequired(field.urn().to_string()).context(context));
    }
    Ok(field)
}

/// Run a derivation over a stream, with its own fresh state
pub(crate) fn derive_stream<D: Derivation>(
    ctx: &ExecContext,
    input: SampleStream,
    derivation: D,
    stage: String,
) -> SampleStream {
    ctx.guard(DerivedIter {
        inner: input,
        state: PreviousSample::default(),
        derivation,
        stage,
    })
}

struct DerivedIter<D> {
    inner: SampleStream,
    state: PreviousSample,
    derivation: D,
    stage: String,
}

impl<D: Derivation> Iterator for DerivedIter<D> {
    type Item = Result<Sample, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sample = match self.inner.next()? {
                Ok(sample) => sample,
                Err(e) => return Some(Err(e)),
            };
            let timestamp = sample.timestamp;
            let value = sample.value.into_iter().next().unwrap_or(Value::Null);
            match self.derivation.step(&mut self.state, timestamp, value) {
                Ok(Some(derived)) => return Some(Ok(Sample::new(timestamp, vec![derived]))),
                Ok(None) => {
                    tracing::trace!("{}: no output at {}", self.stage, timestamp);
                    continue;
                }
                Err(e) => return Some(Err(e.context(self.stage.clone()).into())),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::data::{DataType, FieldDescriptor, Sample, Value};
    use crate::error::QueryError;
    use crate::stream::{Datasource, ExecContext, Filter, VecSource};
    use chrono::{TimeZone, Utc};

    /// Apply `filter` to a single-field stream given as (seconds, value) pairs
    pub fn run(
        filter: &dyn Filter,
        field: FieldDescriptor,
        points: &[(i64, Value)],
    ) -> Result<Vec<(i64, Value)>, QueryError> {
        let samples = points
            .iter()
            .map(|(t, v)| Sample::scalar(Utc.timestamp_opt(*t, 0).unwrap(), v.clone()))
            .collect();
        let ctx = ExecContext::default();
        let input = VecSource::scalar(field, samples).execute(&ctx)?;
        Ok(filter
            .apply(&ctx, input)?
            .collect()?
            .into_iter()
            .map(|s| (s.timestamp.timestamp(), s.first().clone()))
            .collect())
    }

    pub fn integer_field() -> FieldDescriptor {
        FieldDescriptor::new("requests", DataType::Integer).with_unit("req")
    }
}
