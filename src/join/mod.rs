//! Time-keyed joins of several independently sorted streams

mod merge;

pub use merge::{merge_join, MergeJoin};

use crate::data::{validate_fields, Row, Value};
use crate::error::{CompileError, EvalError, QueryError};
use crate::stream::{Datasource, ExecContext, QueryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Timestamps present in every input
    Inner,
    /// Every timestamp of input 0
    Left,
    /// Union of all timestamps
    Full,
}

impl JoinType {
    /// Whether fields of input `index` can be missing from an output row
    pub fn is_optional(&self, index: usize) -> bool {
        match self {
            JoinType::Inner => false,
            JoinType::Left => index > 0,
            JoinType::Full => true,
        }
    }
}

/// Joins the rows of several datasources into one wide row per timestamp.
///
/// Output fields are the inputs' fields in order. A missing input contributes
/// one null per declared field.
pub struct JoinSource {
    inputs: Vec<Arc<dyn Datasource>>,
    join_type: JoinType,
}

impl JoinSource {
    pub fn new(join_type: JoinType) -> Self {
        Self {
            inputs: Vec::new(),
            join_type,
        }
    }

    pub fn with_input(mut self, input: Arc<dyn Datasource>) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn inner(inputs: Vec<Arc<dyn Datasource>>) -> Self {
        Self {
            inputs,
            join_type: JoinType::Inner,
        }
    }

    pub fn left(inputs: Vec<Arc<dyn Datasource>>) -> Self {
        Self {
            inputs,
            join_type: JoinType::Left,
        }
    }

    pub fn full(inputs: Vec<Arc<dyn Datasource>>) -> Self {
        Self {
            inputs,
            join_type: JoinType::Full,
        }
    }
}

impl Datasource for JoinSource {
    fn execute(&self, ctx: &ExecContext) -> Result<QueryResult, QueryError> {
        if self.inputs.is_empty() {
            return Err(CompileError::InvalidConfig("join needs at least one input".into()).into());
        }

        let mut fields = Vec::new();
        let mut widths = Vec::with_capacity(self.inputs.len());
        let mut streams = Vec::with_capacity(self.inputs.len());
        for (i, input) in self.inputs.iter().enumerate() {
            let result = input.execute(ctx)?;
            widths.push(result.fields.len());
            fields.extend(result.fields.into_iter().map(|f| {
                if self.join_type.is_optional(i) {
                    f.derive(f.data_type(), false)
                } else {
                    f
                }
            }));
            streams.push(result.samples);
        }
        validate_fields(&fields)?;
        tracing::debug!(
            "{:?} join of {} inputs into {} fields",
            self.join_type,
            widths.len(),
            fields.len()
        );

        let width: usize = widths.iter().sum();
        let samples = merge_join(ctx, streams, self.join_type, move |slots| {
            flatten(&widths, width, slots)
        });
        Ok(QueryResult::new(fields, samples))
    }
}

/// Concatenate the slots of one output row, padding missing inputs with nulls
fn flatten(widths: &[usize], width: usize, slots: Vec<Option<Row>>) -> Result<Row, EvalError> {
    let mut row = Vec::with_capacity(width);
    for (input, (slot, expected)) in slots.into_iter().zip(widths).enumerate() {
        match slot {
            Some(values) if values.len() != *expected => {
                return Err(EvalError::RowWidthMismatch {
                    input,
                    expected: *expected,
                    found: values.len(),
                })
            }
            Some(values) => row.extend(values),
            None => row.extend(std::iter::repeat(Value::Null).take(*expected)),
        }
    }
    Ok(row)
}
