use super::{derive_stream, numeric_input, Derivation, PreviousSample};
use crate::data::{seconds_between, DataType, Value};
use crate::error::{EvalError, QueryError};
use crate::stream::{ExecContext, Filter, QueryResult};
use chrono::{DateTime, Utc};

/// Difference between consecutive values. The first sample only seeds state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Delta;

struct DeltaStep {
    data_type: DataType,
}

impl Derivation for DeltaStep {
    fn step(
        &mut self,
        state: &mut PreviousSample,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Result<Option<Value>, EvalError> {
        let previous = state.replace(timestamp, value.clone());
        match previous {
            None => Ok(None),
            Some((_, previous)) => subtract(self.data_type, &value, &previous).map(Some),
        }
    }
}

impl Filter for Delta {
    fn name(&self) -> String {
        "delta".to_string()
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let field = numeric_input(&input, "delta")?.clone();
        tracing::debug!("Computing delta of '{}'", field.urn());

        let step = DeltaStep {
            data_type: field.data_type(),
        };
        let stage = format!("delta({})", field.urn());
        Ok(QueryResult::new(
            vec![field],
            derive_stream(ctx, input.samples, step, stage),
        ))
    }
}

/// Per-second rate of change between consecutive values, always DECIMAL
#[derive(Debug, Clone, Copy, Default)]
pub struct Rate;

struct RateStep {
    data_type: DataType,
}

impl Derivation for RateStep {
    fn step(
        &mut self,
        state: &mut PreviousSample,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Result<Option<Value>, EvalError> {
        let current = self.data_type.to_f64(&value)?;
        let previous = state.replace(timestamp, value);
        let Some((previous_ts, previous)) = previous else {
            return Ok(None);
        };
        let elapsed = seconds_between(previous_ts, timestamp);
        if elapsed == 0.0 {
            return Err(EvalError::ZeroTimeDelta(timestamp));
        }
        let previous = self.data_type.to_f64(&previous)?;
        Ok(Some(Value::Decimal((current - previous) / elapsed)))
    }
}

impl Filter for Rate {
    fn name(&self) -> String {
        "rate".to_string()
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let field = numeric_input(&input, "rate")?.clone();
        tracing::debug!("Computing rate of '{}'", field.urn());

        let unit = field.unit().map(|u| format!("{}/s", u));
        let output = field
            .derive(DataType::Decimal, true)
            .with_optional_unit(unit);
        let step = RateStep {
            data_type: field.data_type(),
        };
        let stage = format!("rate({})", field.urn());
        Ok(QueryResult::new(
            vec![output],
            derive_stream(ctx, input.samples, step, stage),
        ))
    }
}

/// `current - previous` in the field's own arithmetic
pub(super) fn subtract(
    data_type: DataType,
    current: &Value,
    previous: &Value,
) -> Result<Value, EvalError> {
    match (current, previous) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_sub(*b)
            .map(Value::Integer)
            .ok_or(EvalError::Overflow("delta")),
        _ => {
            let a = data_type.to_f64(current)?;
            let b = data_type.to_f64(previous)?;
            data_type.from_f64(a - b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{integer_field, run};
    use super::*;
    use crate::data::FieldDescriptor;

    #[test]
    fn test_delta_suppresses_first_sample() {
        let points: Vec<(i64, Value)> = vec![
            (0, Value::Integer(10)),
            (10, Value::Integer(15)),
            (20, Value::Integer(12)),
            (30, Value::Integer(30)),
        ];
        let out = run(&Delta, integer_field(), &points).unwrap();
        assert_eq!(
            out,
            vec![
                (10, Value::Integer(5)),
                (20, Value::Integer(-3)),
                (30, Value::Integer(18)),
            ]
        );
    }

    #[test]
    fn test_emits_n_minus_one() {
        for n in 0..6 {
            let points: Vec<(i64, Value)> = (0..n).map(|i| (i * 5, Value::Decimal(i as f64))).collect();
            let field = FieldDescriptor::new("x", DataType::Decimal);
            let delta = run(&Delta, field.clone(), &points).unwrap();
            let rate = run(&Rate, field, &points).unwrap();
            let expected = (n as usize).saturating_sub(1);
            assert_eq!(delta.len(), expected);
            assert_eq!(rate.len(), expected);
            assert!(delta.iter().all(|(t, _)| *t != 0));
        }
    }

    #[test]
    fn test_rate_is_decimal_per_second() {
        let points = vec![(0, Value::Integer(100)), (4, Value::Integer(110))];
        let out = run(&Rate, integer_field(), &points).unwrap();
        assert_eq!(out, vec![(4, Value::Decimal(2.5))]);
    }

    #[test]
    fn test_rate_output_descriptor() {
        let ctx = ExecContext::default();
        let input = QueryResult::empty(vec![integer_field()]);
        let output = Rate.apply(&ctx, input).unwrap();
        assert_eq!(output.fields[0].data_type(), DataType::Decimal);
        assert_eq!(output.fields[0].unit(), Some("req/s"));
    }

    #[test]
    fn test_rate_zero_time_delta() {
        let points = vec![(7, Value::Integer(1)), (7, Value::Integer(2))];
        let err = run(&Rate, integer_field(), &points).unwrap_err();
        assert!(matches!(
            err,
            QueryError::Eval(EvalError::Context { ref source, .. })
                if matches!(**source, EvalError::ZeroTimeDelta(_))
        ));
    }

    #[test]
    fn test_requires_required_numeric_field() {
        let ctx = ExecContext::default();
        let optional = QueryResult::empty(vec![FieldDescriptor::optional("x", DataType::Integer)]);
        assert!(matches!(
            Delta.apply(&ctx, optional),
            Err(QueryError::Compile(_))
        ));

        let text = QueryResult::empty(vec![FieldDescriptor::new("x", DataType::String)]);
        assert!(matches!(Rate.apply(&ctx, text), Err(QueryError::Compile(_))));
    }

    #[test]
    fn test_filter_is_reusable_across_traversals() {
        let points = vec![(0, Value::Integer(1)), (1, Value::Integer(3))];
        let first = run(&Delta, integer_field(), &points).unwrap();
        let second = run(&Delta, integer_field(), &points).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![(1, Value::Integer(2))]);
    }
}
