//! Typed scalar expressions over sample rows
//!
//! An [`Expr`] is compiled once against the input descriptors. Compilation
//! validates types and nullability and yields a [`Compiled`] node: the output
//! descriptor plus a closure evaluated once per row. Expression trees hold no
//! state and can be compiled any number of times.

mod compile;
mod filter;
mod ops;

pub use filter::{OverrideMetadata, Project, Where};
pub use ops::{Comparison, LogicalOp, NumericOp, UnaryOp};

use crate::data::{DataType, FieldDescriptor, Value};
use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-row evaluation function produced by compilation
pub type EvalFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    /// Fixed value with its own descriptor
    Constant { field: FieldDescriptor, value: Value },
    /// Input field looked up by URN
    Reference { urn: String },
    Cast { source: Box<Expr>, target: DataType },
    Condition {
        op: Comparison,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Numeric {
        op: NumericOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// `source` unless it is null, else `alternative`
    Nvl {
        source: Box<Expr>,
        alternative: Box<Expr>,
    },
    /// `when_true` if `selector` holds, else `when_false`
    Selector {
        selector: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
    },
}

impl Expr {
    pub fn constant(field: FieldDescriptor, value: impl Into<Value>) -> Self {
        Expr::Constant {
            field,
            value: value.into(),
        }
    }

    pub fn reference(urn: impl Into<String>) -> Self {
        Expr::Reference { urn: urn.into() }
    }

    pub fn cast(self, target: DataType) -> Self {
        Expr::Cast {
            source: Box::new(self),
            target,
        }
    }

    pub fn compare(op: Comparison, left: Expr, right: Expr) -> Self {
        Expr::Condition {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::Logical {
            op: LogicalOp::And,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Logical {
            op: LogicalOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn numeric(op: NumericOp, left: Expr, right: Expr) -> Self {
        Expr::Numeric {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn nvl(self, alternative: Expr) -> Self {
        Expr::Nvl {
            source: Box::new(self),
            alternative: Box::new(alternative),
        }
    }

    pub fn select(selector: Expr, when_true: Expr, when_false: Expr) -> Self {
        Expr::Selector {
            selector: Box::new(selector),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        }
    }
}

/// A compiled expression: output descriptor and evaluation closure
#[derive(Clone)]
pub struct Compiled {
    pub field: FieldDescriptor,
    pub eval: EvalFn,
}

impl Compiled {
    pub(crate) fn new<F>(field: FieldDescriptor, eval: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            field,
            eval: Arc::new(eval),
        }
    }

    pub fn evaluate(&self, row: &[Value]) -> Result<Value, EvalError> {
        (self.eval)(row)
    }
}

impl std::fmt::Debug for Compiled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiled")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}
