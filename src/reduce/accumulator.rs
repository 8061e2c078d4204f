use crate::data::{DataType, Value};
use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fold of one value per input at a shared timestamp
pub trait Accumulator: Send {
    /// Add a value to the accumulator
    fn accumulate(&mut self, value: &Value) -> Result<(), EvalError>;

    /// Get the final result
    fn result(&self) -> Result<Value, EvalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionType {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl ReductionType {
    /// Data type of the reduction of `input` values
    pub fn output_type(&self, input: DataType) -> DataType {
        match self {
            ReductionType::Avg => DataType::Decimal,
            ReductionType::Count => DataType::Integer,
            _ => input,
        }
    }

    /// A single input reduces to itself, so it can be passed through
    pub fn uses_identity(&self) -> bool {
        matches!(
            self,
            ReductionType::Sum | ReductionType::Min | ReductionType::Max
        )
    }

    /// Whether the output keeps the unit shared by the inputs
    pub fn keeps_unit(&self) -> bool {
        *self != ReductionType::Count
    }

    /// Fresh accumulator for one time slice
    pub fn accumulator(&self, data_type: DataType) -> Box<dyn Accumulator> {
        match self {
            ReductionType::Sum => Box::new(SumAccumulator::new(data_type)),
            ReductionType::Avg => Box::new(AvgAccumulator::new(data_type)),
            ReductionType::Min => Box::new(ExtremeAccumulator::min(data_type)),
            ReductionType::Max => Box::new(ExtremeAccumulator::max(data_type)),
            ReductionType::Count => Box::new(CountAccumulator::default()),
        }
    }
}

impl std::fmt::Display for ReductionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReductionType::Sum => "sum",
            ReductionType::Avg => "avg",
            ReductionType::Min => "min",
            ReductionType::Max => "max",
            ReductionType::Count => "count",
        };
        f.write_str(name)
    }
}

/// Number of values in the slice, whatever they are
#[derive(Debug, Clone, Default)]
pub struct CountAccumulator {
    count: i64,
}

impl Accumulator for CountAccumulator {
    fn accumulate(&mut self, _value: &Value) -> Result<(), EvalError> {
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Result<Value, EvalError> {
        Ok(Value::Integer(self.count))
    }
}

/// Sum in the input's own arithmetic (checked for Integer)
#[derive(Debug, Clone)]
pub struct SumAccumulator {
    data_type: DataType,
    integer: i64,
    decimal: f64,
}

impl SumAccumulator {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            integer: 0,
            decimal: 0.0,
        }
    }
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), EvalError> {
        match (self.data_type, value) {
            (DataType::Integer, Value::Integer(v)) => {
                self.integer = self
                    .integer
                    .checked_add(*v)
                    .ok_or(EvalError::Overflow("sum"))?;
            }
            (data_type, value) => self.decimal += data_type.to_f64(value)?,
        }
        Ok(())
    }

    fn result(&self) -> Result<Value, EvalError> {
        match self.data_type {
            DataType::Integer => Ok(Value::Integer(self.integer)),
            data_type => data_type.from_f64(self.decimal),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AvgAccumulator {
    data_type: DataType,
    sum: f64,
    count: i64,
}

impl AvgAccumulator {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            sum: 0.0,
            count: 0,
        }
    }
}

impl Accumulator for AvgAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), EvalError> {
        self.sum += self.data_type.to_f64(value)?;
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Result<Value, EvalError> {
        if self.count > 0 {
            Ok(Value::Decimal(self.sum / self.count as f64))
        } else {
            Ok(Value::Null)
        }
    }
}

/// MIN or MAX by pairwise comparison
#[derive(Debug, Clone)]
pub struct ExtremeAccumulator {
    data_type: DataType,
    keep_greater: bool,
    current: Option<Value>,
}

impl ExtremeAccumulator {
    pub fn min(data_type: DataType) -> Self {
        Self {
            data_type,
            keep_greater: false,
            current: None,
        }
    }

    pub fn max(data_type: DataType) -> Self {
        Self {
            data_type,
            keep_greater: true,
            current: None,
        }
    }

    fn replaces(&self, candidate: &Value, current: &Value) -> Result<bool, EvalError> {
        let ordering = match (candidate, current) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            _ => self
                .data_type
                .to_f64(candidate)?
                .partial_cmp(&self.data_type.to_f64(current)?),
        };
        Ok(match ordering {
            Some(Ordering::Greater) => self.keep_greater,
            Some(Ordering::Less) => !self.keep_greater,
            _ => false,
        })
    }
}

impl Accumulator for ExtremeAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), EvalError> {
        self.data_type.validate(value)?;
        let replace = match &self.current {
            None => true,
            Some(current) => self.replaces(value, current)?,
        };
        if replace {
            self.current = Some(value.clone());
        }
        Ok(())
    }

    fn result(&self) -> Result<Value, EvalError> {
        Ok(self.current.clone().unwrap_or(Value::Null))
    }
}
