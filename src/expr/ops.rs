use crate::data::{DataType, Value};
use crate::error::{CompileError, EvalError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison operators of a condition node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Comparison {
    fn is_equality(&self) -> bool {
        matches!(self, Comparison::Equals | Comparison::NotEquals)
    }

    fn holds(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Comparison::NotEquals, None) => true,
            (_, None) => false,
            (Comparison::Equals, Some(o)) => o == Ordering::Equal,
            (Comparison::NotEquals, Some(o)) => o != Ordering::Equal,
            (Comparison::Greater, Some(o)) => o == Ordering::Greater,
            (Comparison::GreaterOrEqual, Some(o)) => o != Ordering::Less,
            (Comparison::Less, Some(o)) => o == Ordering::Less,
            (Comparison::LessOrEqual, Some(o)) => o != Ordering::Greater,
        }
    }

    /// Check that this comparison is defined for `data_type`
    pub(crate) fn check(&self, data_type: DataType) -> Result<(), CompileError> {
        let supported = match data_type {
            DataType::Integer | DataType::Decimal => true,
            DataType::String | DataType::Boolean => self.is_equality(),
            DataType::Timestamp => false,
        };
        if supported {
            Ok(())
        } else {
            Err(CompileError::UnsupportedOperator {
                operator: self.to_string(),
                data_type,
            })
        }
    }

    /// Compare two non-null values of the same type
    pub(crate) fn evaluate(&self, left: &Value, right: &Value) -> Result<bool, EvalError> {
        let ordering = match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(if a == b {
                Ordering::Equal
            } else {
                Ordering::Less
            }),
            (Value::Boolean(a), Value::Boolean(b)) => Some(if a == b {
                Ordering::Equal
            } else {
                Ordering::Less
            }),
            (left, right) => {
                return Err(EvalError::TypeMismatch {
                    expected: left.data_type().unwrap_or(DataType::Boolean),
                    value: format!("{} ({})", right, right.type_name()),
                })
            }
        };
        Ok(self.holds(ordering))
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Comparison::Equals => "==",
            Comparison::NotEquals => "!=",
            Comparison::Greater => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::Less => "<",
            Comparison::LessOrEqual => "<=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl std::fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOp::And => f.write_str("and"),
            LogicalOp::Or => f.write_str("or"),
        }
    }
}

/// Binary arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl NumericOp {
    pub(crate) fn check(&self, data_type: DataType) -> Result<(), CompileError> {
        data_type.require_numeric()?;
        if *self == NumericOp::Modulo && data_type != DataType::Integer {
            return Err(CompileError::UnsupportedOperator {
                operator: self.to_string(),
                data_type,
            });
        }
        Ok(())
    }

    /// Integer arithmetic is checked; Decimal follows IEEE-754
    pub(crate) fn evaluate(&self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => self.integer(*a, *b).map(Value::Integer),
            (Value::Decimal(a), Value::Decimal(b)) => Ok(Value::Decimal(self.decimal(*a, *b))),
            (left, right) => Err(EvalError::TypeMismatch {
                expected: left.data_type().unwrap_or(DataType::Decimal),
                value: format!("{} ({})", right, right.type_name()),
            }),
        }
    }

    fn integer(&self, a: i64, b: i64) -> Result<i64, EvalError> {
        let result = match self {
            NumericOp::Add => a.checked_add(b),
            NumericOp::Subtract => a.checked_sub(b),
            NumericOp::Multiply => a.checked_mul(b),
            NumericOp::Divide | NumericOp::Modulo if b == 0 => {
                return Err(EvalError::DivisionByZero)
            }
            NumericOp::Divide => a.checked_div(b),
            NumericOp::Modulo => a.checked_rem(b),
        };
        result.ok_or(EvalError::Overflow(self.name()))
    }

    fn decimal(&self, a: f64, b: f64) -> f64 {
        match self {
            NumericOp::Add => a + b,
            NumericOp::Subtract => a - b,
            NumericOp::Multiply => a * b,
            NumericOp::Divide => a / b,
            NumericOp::Modulo => a % b,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            NumericOp::Add => "addition",
            NumericOp::Subtract => "subtraction",
            NumericOp::Multiply => "multiplication",
            NumericOp::Divide => "division",
            NumericOp::Modulo => "modulo",
        }
    }
}

impl std::fmt::Display for NumericOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            NumericOp::Add => "+",
            NumericOp::Subtract => "-",
            NumericOp::Multiply => "*",
            NumericOp::Divide => "/",
            NumericOp::Modulo => "%",
        };
        f.write_str(symbol)
    }
}

/// Single-operand numeric functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
    Negate,
    Sqrt,
    Ceil,
    Floor,
    Round,
    Log,
    Log10,
    Exp,
    Sin,
    Cos,
    Tan,
}

impl UnaryOp {
    pub(crate) fn check(&self, data_type: DataType) -> Result<(), CompileError> {
        data_type.require_numeric()?;
        let integer_op = matches!(self, UnaryOp::Abs | UnaryOp::Negate | UnaryOp::Sqrt);
        if data_type == DataType::Integer && !integer_op {
            return Err(CompileError::UnsupportedOperator {
                operator: self.to_string(),
                data_type,
            });
        }
        Ok(())
    }

    pub(crate) fn evaluate(&self, value: &Value) -> Result<Value, EvalError> {
        match value {
            Value::Integer(v) => self.integer(*v).map(Value::Integer),
            Value::Decimal(v) => Ok(Value::Decimal(self.decimal(*v))),
            other => Err(EvalError::TypeMismatch {
                expected: DataType::Decimal,
                value: format!("{} ({})", other, other.type_name()),
            }),
        }
    }

    fn integer(&self, v: i64) -> Result<i64, EvalError> {
        match self {
            UnaryOp::Abs => v.checked_abs().ok_or(EvalError::Overflow("abs")),
            UnaryOp::Negate => v.checked_neg().ok_or(EvalError::Overflow("negate")),
            UnaryOp::Sqrt if v < 0 => Err(EvalError::Domain {
                operation: "sqrt",
                value: v.to_string(),
            }),
            UnaryOp::Sqrt => Ok((v as f64).sqrt().trunc() as i64),
            _ => Err(EvalError::Domain {
                operation: "integer function",
                value: format!("{}({})", self, v),
            }),
        }
    }

    fn decimal(&self, v: f64) -> f64 {
        match self {
            UnaryOp::Abs => v.abs(),
            UnaryOp::Negate => -v,
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Ceil => v.ceil(),
            UnaryOp::Floor => v.floor(),
            UnaryOp::Round => v.round(),
            UnaryOp::Log => v.ln(),
            UnaryOp::Log10 => v.log10(),
            UnaryOp::Exp => v.exp(),
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Tan => v.tan(),
        }
    }
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Negate => "negate",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Floor => "floor",
            UnaryOp::Round => "round",
            UnaryOp::Log => "log",
            UnaryOp::Log10 => "log10",
            UnaryOp::Exp => "exp",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_support() {
        assert!(Comparison::Less.check(DataType::Integer).is_ok());
        assert!(Comparison::Equals.check(DataType::String).is_ok());
        assert!(Comparison::Greater.check(DataType::Boolean).is_err());
        assert!(Comparison::Equals.check(DataType::Timestamp).is_err());
    }

    #[test]
    fn test_comparison_evaluation() {
        let one = Value::Integer(1);
        let two = Value::Integer(2);
        assert!(Comparison::Less.evaluate(&one, &two).unwrap());
        assert!(Comparison::LessOrEqual.evaluate(&one, &one).unwrap());
        assert!(!Comparison::Greater.evaluate(&one, &two).unwrap());

        let nan = Value::Decimal(f64::NAN);
        assert!(!Comparison::Equals.evaluate(&nan, &nan).unwrap());
        assert!(Comparison::NotEquals.evaluate(&nan, &nan).unwrap());

        let a = Value::String("a".into());
        assert!(Comparison::Equals.evaluate(&a, &a).unwrap());
        assert!(Comparison::NotEquals
            .evaluate(&a, &Value::String("b".into()))
            .unwrap());
    }

    #[test]
    fn test_integer_arithmetic_is_checked() {
        let max = Value::Integer(i64::MAX);
        assert_eq!(
            NumericOp::Add.evaluate(&max, &Value::Integer(1)),
            Err(EvalError::Overflow("addition"))
        );
        assert_eq!(
            NumericOp::Divide.evaluate(&Value::Integer(7), &Value::Integer(0)),
            Err(EvalError::DivisionByZero)
        );
        assert_eq!(
            NumericOp::Divide.evaluate(&Value::Integer(-7), &Value::Integer(2)),
            Ok(Value::Integer(-3))
        );
        assert_eq!(
            NumericOp::Modulo.evaluate(&Value::Integer(7), &Value::Integer(3)),
            Ok(Value::Integer(1))
        );
    }

    #[test]
    fn test_decimal_division_by_zero() {
        let out = NumericOp::Divide
            .evaluate(&Value::Decimal(1.0), &Value::Decimal(0.0))
            .unwrap();
        assert_eq!(out, Value::Decimal(f64::INFINITY));
    }

    #[test]
    fn test_modulo_integer_only() {
        assert!(NumericOp::Modulo.check(DataType::Integer).is_ok());
        assert!(NumericOp::Modulo.check(DataType::Decimal).is_err());
        assert!(NumericOp::Add.check(DataType::String).is_err());
    }

    #[test]
    fn test_unary_integer_domain() {
        assert!(UnaryOp::Sqrt.check(DataType::Integer).is_ok());
        assert!(UnaryOp::Log.check(DataType::Integer).is_err());
        assert!(UnaryOp::Log.check(DataType::Decimal).is_ok());

        assert_eq!(UnaryOp::Sqrt.evaluate(&Value::Integer(10)), Ok(Value::Integer(3)));
        assert_eq!(UnaryOp::Abs.evaluate(&Value::Integer(-4)), Ok(Value::Integer(4)));
        assert!(matches!(
            UnaryOp::Sqrt.evaluate(&Value::Integer(-1)),
            Err(EvalError::Domain { .. })
        ));
        assert_eq!(
            UnaryOp::Negate.evaluate(&Value::Integer(i64::MIN)),
            Err(EvalError::Overflow("negate"))
        );
    }

    #[test]
    fn test_unary_decimal() {
        assert_eq!(UnaryOp::Floor.evaluate(&Value::Decimal(-1.5)), Ok(Value::Decimal(-2.0)));
        let log = UnaryOp::Log10.evaluate(&Value::Decimal(1000.0)).unwrap();
        assert!((log.as_f64().unwrap() - 3.0).abs() < 1e-12);
    }
}
