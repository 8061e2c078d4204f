use super::delta::subtract;
use super::{derive_stream, numeric_input, Derivation, PreviousSample};
use crate::data::{DataType, Value};
use crate::error::{CompileError, EvalError, QueryError};
use crate::stream::{ExecContext, Filter, QueryResult};
use chrono::{DateTime, Utc};

/// Non-negative delta for monotonically increasing counters.
///
/// - negative samples are dropped and leave the state untouched
/// - a decrease is a wrap when `max_value` is set (`max - previous + current`)
///   and a reset to `current` otherwise
/// - anything else yields `current - previous`
#[derive(Debug, Clone, Default)]
pub struct CounterDelta {
    max_value: Option<Value>,
}

impl CounterDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter wraps back to zero after reaching `max_value`
    pub fn with_max_value(mut self, max_value: impl Into<Value>) -> Self {
        self.max_value = Some(max_value.into());
        self
    }
}

struct CounterStep {
    data_type: DataType,
    max_value: Option<Value>,
}

impl CounterStep {
    fn is_negative(&self, value: &Value) -> Result<bool, EvalError> {
        Ok(self.data_type.to_f64(value)? < 0.0)
    }

    fn is_less(&self, current: &Value, previous: &Value) -> Result<bool, EvalError> {
        match (current, previous) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a < b),
            _ => Ok(self.data_type.to_f64(current)? < self.data_type.to_f64(previous)?),
        }
    }

    fn wrapped(&self, max: &Value, current: &Value, previous: &Value) -> Result<Value, EvalError> {
        let headroom = subtract(self.data_type, max, previous)?;
        match (headroom, current) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_add(*b)
                .map(Value::Integer)
                .ok_or(EvalError::Overflow("counter wrap")),
            (headroom, current) => {
                let sum = self.data_type.to_f64(&headroom)? + self.data_type.to_f64(current)?;
                self.data_type.from_f64(sum)
            }
        }
    }
}

impl Derivation for CounterStep {
    fn step(
        &mut self,
        state: &mut PreviousSample,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Result<Option<Value>, EvalError> {
        if self.is_negative(&value)? {
            tracing::trace!("Dropping negative counter value {} at {}", value, timestamp);
            return Ok(None);
        }
        let Some((_, previous)) = state.replace(timestamp, value.clone()) else {
            return Ok(None);
        };
        if !self.is_less(&value, &previous)? {
            return subtract(self.data_type, &value, &previous).map(Some);
        }
        match &self.max_value {
            Some(max) => {
                tracing::debug!("Counter wrapped at {} ({} -> {})", timestamp, previous, value);
                self.wrapped(max, &value, &previous).map(Some)
            }
            None => {
                tracing::debug!("Counter reset at {} ({} -> {})", timestamp, previous, value);
                Ok(Some(value))
            }
        }
    }
}

impl Filter for CounterDelta {
    fn name(&self) -> String {
        match &self.max_value {
            Some(max) => format!("counter_delta(max={})", max),
            None => "counter_delta".to_string(),
        }
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let field = numeric_input(&input, "counter_delta")?.clone();
        let max_value = match &self.max_value {
            Some(max) => Some(field.data_type().force_cast_and_validate(max.clone()).map_err(
                |_| CompileError::TypeMismatch {
                    expected: field.data_type(),
                    found: format!("counter maximum {}", max),
                },
            )?),
            None => None,
        };
        tracing::debug!("Computing counter delta of '{}'", field.urn());

        let step = CounterStep {
            data_type: field.data_type(),
            max_value,
        };
        let stage = format!("counter_delta({})", field.urn());
        Ok(QueryResult::new(
            vec![field],
            derive_stream(ctx, input.samples, step, stage),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{integer_field, run};
    use super::*;
    use crate::data::FieldDescriptor;

    fn ints(values: &[i64]) -> Vec<(i64, Value)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 10, Value::Integer(*v)))
            .collect()
    }

    #[test]
    fn test_monotonic_counter() {
        let out = run(&CounterDelta::new(), integer_field(), &ints(&[5, 8, 8, 20])).unwrap();
        assert_eq!(
            out,
            vec![
                (10, Value::Integer(3)),
                (20, Value::Integer(0)),
                (30, Value::Integer(12)),
            ]
        );
    }

    #[test]
    fn test_reset_emits_current() {
        let out = run(&CounterDelta::new(), integer_field(), &ints(&[100, 120, 7, 10])).unwrap();
        assert_eq!(
            out,
            vec![
                (10, Value::Integer(20)),
                (20, Value::Integer(7)),
                (30, Value::Integer(3)),
            ]
        );
    }

    #[test]
    fn test_wrap_with_max_value() {
        let filter = CounterDelta::new().with_max_value(255i64);
        let out = run(&filter, integer_field(), &ints(&[250, 3])).unwrap();
        assert_eq!(out, vec![(10, Value::Integer(8))]);
    }

    #[test]
    fn test_negative_values_dropped() {
        let out = run(&CounterDelta::new(), integer_field(), &ints(&[10, -1, 15])).unwrap();
        assert_eq!(out, vec![(20, Value::Integer(5))]);
    }

    #[test]
    fn test_decimal_counter_with_integer_max() {
        let field = FieldDescriptor::new("bytes", DataType::Decimal);
        let filter = CounterDelta::new().with_max_value(100i64);
        let points = vec![(0, Value::Decimal(90.0)), (1, Value::Decimal(5.5))];
        let out = run(&filter, field, &points).unwrap();
        assert_eq!(out, vec![(1, Value::Decimal(15.5))]);
    }

    #[test]
    fn test_max_value_type_checked() {
        let filter = CounterDelta::new().with_max_value("lots");
        let ctx = ExecContext::default();
        let err = filter
            .apply(&ctx, QueryResult::empty(vec![integer_field()]))
            .unwrap_err();
        assert!(matches!(err, QueryError::Compile(CompileError::TypeMismatch { .. })));
    }
}
