//! Error types shared by every stage of the engine
//!
//! Failures fall into two classes plus cancellation:
//! - [`CompileError`]: raised while descriptors are being produced, before any
//!   sample is read
//! - [`EvalError`]: raised while a stream is being traversed
//! - [`QueryError::Cancelled`]: the traversal was stopped by its caller

use crate::data::DataType;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Unsupported cast from {from} to {to}")]
    UnsupportedCast { from: DataType, to: DataType },

    #[error("Data type {0} is not numeric")]
    NonNumericType(DataType),

    #[error("Unsupported data type {data_type} for {operation}")]
    UnsupportedDataType {
        operation: &'static str,
        data_type: DataType,
    },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: DataType, found: String },

    #[error("Field '{0}' not found")]
    FieldNotFound(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Duplicate field '{0}'")]
    DuplicateField(String),

    #[error("Constant '{0}' is required but its value is null")]
    NullRequiredConstant(String),

    #[error("Operand '{0}' must be required")]
    OperandNotRequired(String),

    #[error("Operand '{operand}' must be BOOLEAN, found {found}")]
    OperandNotBoolean { operand: String, found: DataType },

    #[error("Operand types differ: {left} vs {right}")]
    OperandTypeMismatch { left: DataType, right: DataType },

    #[error("Operator '{operator}' is not supported for {data_type}")]
    UnsupportedOperator {
        operator: String,
        data_type: DataType,
    },

    #[error("Selector branches differ in {0}")]
    BranchMismatch(&'static str),

    #[error("{stage} expects exactly one field, found {found}")]
    ExpectedSingleField { stage: &'static str, found: usize },

    #[error("Reduction input {index} ('{urn}'): {reason}")]
    ReductionInput {
        index: usize,
        urn: String,
        reason: String,
    },

    #[error("Reduction has no datasources and no fallback value")]
    NoDatasources,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CompileError>,
    },
}

impl CompileError {
    /// Wrap this error with the node/operand that produced it
    pub fn context(self, context: impl Into<String>) -> Self {
        CompileError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("Value {value} does not match data type {expected}")]
    TypeMismatch { expected: DataType, value: String },

    #[error("Data type {0} is not numeric")]
    NonNumericType(DataType),

    #[error("Cannot cast '{value}' to {target}: {reason}")]
    CastFailed {
        value: String,
        target: DataType,
        reason: String,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {0}")]
    Overflow(&'static str),

    #[error("{operation} is undefined for {value}")]
    Domain { operation: &'static str, value: String },

    #[error("Interpolation target {target} outside [{start}, {end}]")]
    InterpolationOutOfBounds {
        target: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Consecutive samples share timestamp {0}")]
    ZeroTimeDelta(DateTime<Utc>),

    #[error("Input {input} declared {expected} fields but produced {found}")]
    RowWidthMismatch {
        input: usize,
        expected: usize,
        found: usize,
    },

    #[error("Input {input} is not sorted: {timestamp} follows {previous}")]
    Unsorted {
        input: usize,
        previous: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    #[error("Alignment period did not advance past {0}")]
    NonAdvancingPeriod(DateTime<Utc>),

    #[error("Gap between {from} and {to} exceeds {limit} fill points")]
    GapTooLarge {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    },

    #[error("{stage}: {source}")]
    Context {
        stage: String,
        #[source]
        source: Box<EvalError>,
    },
}

impl EvalError {
    /// Wrap this error with the stage/field that produced it
    pub fn context(self, stage: impl Into<String>) -> Self {
        EvalError::Context {
            stage: stage.into(),
            source: Box::new(self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Query cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }

    /// Attach stage context; cancellation passes through untouched
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            QueryError::Compile(e) => QueryError::Compile(e.context(stage)),
            QueryError::Eval(e) => QueryError::Eval(e.context(stage)),
            QueryError::Cancelled => QueryError::Cancelled,
        }
    }
}
