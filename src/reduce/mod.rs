//! Cross-series reduction onto a shared alignment grid

mod accumulator;

pub use accumulator::{
    Accumulator, AvgAccumulator, CountAccumulator, ExtremeAccumulator, ReductionType,
    SumAccumulator,
};

use crate::align::{Align, AlignmentPeriod};
use crate::data::{common_unit, DataType, FieldDescriptor, Row};
use crate::error::{CompileError, EvalError, QueryError};
use crate::expr::Expr;
use crate::join::{merge_join, JoinType};
use crate::stream::{Datasource, ExecContext, QueryResult};
use std::sync::Arc;

/// Aligns every input onto one grid and folds each time slice into one value.
///
/// The output descriptor takes its URN and custom metadata from the template;
/// data type, required-ness and unit follow from the inputs and reduction.
pub struct ReduceSource {
    inputs: Vec<Arc<dyn Datasource>>,
    reduction: ReductionType,
    period: Arc<dyn AlignmentPeriod>,
    template: FieldDescriptor,
    fallback: Option<Expr>,
}

impl ReduceSource {
    pub fn new(
        reduction: ReductionType,
        period: Arc<dyn AlignmentPeriod>,
        template: FieldDescriptor,
    ) -> Self {
        Self {
            inputs: Vec::new(),
            reduction,
            period,
            template,
            fallback: None,
        }
    }

    pub fn with_input(mut self, input: Arc<dyn Datasource>) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = Arc<dyn Datasource>>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Value reported when there are no inputs at all
    pub fn with_fallback(mut self, fallback: Expr) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn no_inputs(&self) -> Result<QueryResult, QueryError> {
        match &self.fallback {
            Some(fallback) => {
                let compiled = fallback
                    .compile(&[])
                    .map_err(|e| e.context("reduction fallback"))?;
                tracing::debug!(
                    "{} reduction has no inputs, using fallback '{}'",
                    self.reduction,
                    compiled.field.urn()
                );
                Ok(QueryResult::empty(vec![compiled.field]))
            }
            None => Err(CompileError::NoDatasources.into()),
        }
    }

    fn aligned_input(&self, ctx: &ExecContext, index: usize) -> Result<QueryResult, QueryError> {
        let result = self.inputs[index].execute(ctx)?;
        let urn = result
            .fields
            .first()
            .map(|f| f.urn().to_string())
            .unwrap_or_default();
        Align::new(Arc::clone(&self.period))
            .align(ctx, result)
            .map_err(|e| match e {
                QueryError::Compile(e) => CompileError::ReductionInput {
                    index,
                    urn,
                    reason: e.to_string(),
                }
                .into(),
                other => other,
            })
    }
}

/// Every input must be required and share the first input's numeric type
fn check_inputs(fields: &[FieldDescriptor]) -> Result<DataType, CompileError> {
    let data_type = fields
        .first()
        .map(|f| f.data_type())
        .ok_or(CompileError::NoDatasources)?;
    for (index, field) in fields.iter().enumerate() {
        let reason = if field.data_type() != data_type {
            Some(format!("expected {}, found {}", data_type, field.data_type()))
        } else if !field.is_required() {
            Some("field must be required".to_string())
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(CompileError::ReductionInput {
                index,
                urn: field.urn().to_string(),
                reason,
            });
        }
    }
    Ok(data_type)
}

impl Datasource for ReduceSource {
    fn execute(&self, ctx: &ExecContext) -> Result<QueryResult, QueryError> {
        if self.inputs.is_empty() {
            return self.no_inputs();
        }

        let aligned = (0..self.inputs.len())
            .map(|i| self.aligned_input(ctx, i))
            .collect::<Result<Vec<_>, _>>()?;
        let fields: Vec<FieldDescriptor> = aligned.iter().map(|r| r.fields[0].clone()).collect();
        let data_type = check_inputs(&fields)?;

        let unit = if self.reduction.keeps_unit() {
            common_unit(&fields)
        } else {
            None
        };
        let output = self
            .template
            .derive(self.reduction.output_type(data_type), true)
            .with_optional_unit(unit);

        if aligned.len() == 1 && self.reduction.uses_identity() {
            tracing::debug!(
                "{} of a single input '{}' passes through",
                self.reduction,
                fields[0].urn()
            );
            let mut aligned = aligned;
            let single = aligned.remove(0);
            return Ok(QueryResult::new(vec![output], single.samples));
        }

        tracing::debug!(
            "{} reduction of {} inputs into '{}'",
            self.reduction,
            aligned.len(),
            output.urn()
        );
        let reduction = self.reduction;
        let streams = aligned.into_iter().map(|r| r.samples).collect();
        let stage = format!("{}({})", reduction, output.urn());
        let samples = merge_join(ctx, streams, JoinType::Inner, move |slots: Vec<Option<Row>>| {
            let mut acc = reduction.accumulator(data_type);
            for slot in slots.iter().flatten() {
                let value = slot.first().ok_or(EvalError::RowWidthMismatch {
                    input: 0,
                    expected: 1,
                    found: 0,
                })?;
                acc.accumulate(value)?;
            }
            let value = acc.result().map_err(|e| e.context(stage.clone()))?;
            Ok(vec![value])
        });
        Ok(QueryResult::new(vec![output], samples))
    }
}
