use crate::error::{CompileError, EvalError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Scalar values flowing through the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Data type of a non-null value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Decimal(_) => Some(DataType::Decimal),
            Value::String(_) => Some(DataType::String),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

/// A compiled conversion between two data types. Null handling is left to
/// the caller.
pub type CastFn = fn(Value) -> Result<Value, EvalError>;

/// Field data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Decimal,
    String,
    Boolean,
    Timestamp,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Decimal)
    }

    /// Fail at compile time unless this type is numeric
    pub fn require_numeric(&self) -> Result<(), CompileError> {
        if self.is_numeric() {
            Ok(())
        } else {
            Err(CompileError::NonNumericType(*self))
        }
    }

    /// Convert a value of this type to f64
    pub fn to_f64(&self, value: &Value) -> Result<f64, EvalError> {
        match (self, value) {
            (DataType::Integer, Value::Integer(v)) => Ok(*v as f64),
            (DataType::Decimal, Value::Decimal(v)) => Ok(*v),
            (DataType::Integer, _) | (DataType::Decimal, _) => Err(self.mismatch(value)),
            _ => Err(EvalError::NonNumericType(*self)),
        }
    }

    /// Convert an f64 into a value of this type, truncating toward zero for Integer
    pub fn from_f64(&self, value: f64) -> Result<Value, EvalError> {
        match self {
            DataType::Decimal => Ok(Value::Decimal(value)),
            DataType::Integer => truncate_to_i64(value).map(Value::Integer),
            _ => Err(EvalError::NonNumericType(*self)),
        }
    }

    /// Check that a non-null value has the shape of this type
    pub fn validate(&self, value: &Value) -> Result<(), EvalError> {
        if value.data_type() == Some(*self) {
            Ok(())
        } else {
            Err(self.mismatch(value))
        }
    }

    /// Coerce a loosely typed value into this type, then validate it.
    ///
    /// Null passes through. Numeric values convert between Integer and
    /// Decimal, Integer converts to Timestamp as epoch milliseconds and
    /// RFC 3339 strings parse into Timestamp.
    pub fn force_cast_and_validate(&self, value: Value) -> Result<Value, EvalError> {
        let coerced = match (self, value) {
            (_, Value::Null) => Value::Null,
            (DataType::Integer, Value::Decimal(v)) => Value::Integer(truncate_to_i64(v)?),
            (DataType::Decimal, Value::Integer(v)) => Value::Decimal(v as f64),
            (DataType::Timestamp, Value::Integer(ms)) => Value::Timestamp(
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| cast_failed(&Value::Integer(ms), *self, "out of range"))?,
            ),
            (DataType::Timestamp, Value::String(s)) => {
                let parsed = DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| cast_failed(&Value::String(s.clone()), *self, &e.to_string()))?;
                Value::Timestamp(parsed.with_timezone(&Utc))
            }
            (_, other) => other,
        };
        if !coerced.is_null() {
            self.validate(&coerced)?;
        }
        Ok(coerced)
    }

    /// Look up the conversion from this type to `target`
    pub fn cast_to(&self, target: DataType) -> Result<CastFn, CompileError> {
        use DataType::*;
        let cast: CastFn = match (self, target) {
            (source, target) if *source == target => cast_identity,
            (Integer, Decimal) => cast_integer_to_decimal,
            (Integer, String) => cast_integer_to_string,
            (Decimal, Integer) => cast_decimal_to_integer,
            (Decimal, String) => cast_decimal_to_string,
            (String, Integer) => cast_string_to_integer,
            (String, Decimal) => cast_string_to_decimal,
            _ => {
                return Err(CompileError::UnsupportedCast {
                    from: *self,
                    to: target,
                })
            }
        };
        Ok(cast)
    }

    fn mismatch(&self, value: &Value) -> EvalError {
        EvalError::TypeMismatch {
            expected: *self,
            value: format!("{} ({})", value, value.type_name()),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Decimal => write!(f, "DECIMAL"),
            DataType::String => write!(f, "STRING"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

fn truncate_to_i64(value: f64) -> Result<i64, EvalError> {
    let truncated = value.trunc();
    if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(cast_failed(
            &Value::Decimal(value),
            DataType::Integer,
            "out of range",
        ));
    }
    Ok(truncated as i64)
}

fn cast_failed(value: &Value, target: DataType, reason: &str) -> EvalError {
    EvalError::CastFailed {
        value: value.to_string(),
        target,
        reason: reason.to_string(),
    }
}

fn cast_identity(value: Value) -> Result<Value, EvalError> {
    Ok(value)
}

fn cast_integer_to_decimal(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Integer(v) => Ok(Value::Decimal(v as f64)),
        other => Err(DataType::Integer.mismatch(&other)),
    }
}

fn cast_integer_to_string(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Integer(v) => Ok(Value::String(v.to_string())),
        other => Err(DataType::Integer.mismatch(&other)),
    }
}

fn cast_decimal_to_integer(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Decimal(v) => truncate_to_i64(v).map(Value::Integer),
        other => Err(DataType::Decimal.mismatch(&other)),
    }
}

fn cast_decimal_to_string(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Decimal(v) => Ok(Value::String(v.to_string())),
        other => Err(DataType::Decimal.mismatch(&other)),
    }
}

fn cast_string_to_integer(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| cast_failed(&Value::String(s.clone()), DataType::Integer, &e.to_string())),
        other => Err(DataType::String.mismatch(&other)),
    }
}

fn cast_string_to_decimal(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Decimal)
            .map_err(|e| cast_failed(&Value::String(s.clone()), DataType::Decimal, &e.to_string())),
        other => Err(DataType::String.mismatch(&other)),
    }
}
