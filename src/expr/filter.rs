use super::{Compiled, Expr};
use crate::data::{find_field, merge_meta, validate_fields, CustomMeta, DataType, Sample};
use crate::error::{CompileError, QueryError};
use crate::stream::{ExecContext, Filter, QueryResult};

/// Evaluates a list of expressions into a new row per sample
#[derive(Debug, Clone, Default)]
pub struct Project {
    columns: Vec<(Option<String>, Expr)>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, expr: Expr) -> Self {
        self.columns.push((None, expr));
        self
    }

    /// Add a column under an explicit URN
    pub fn column_as(mut self, urn: impl Into<String>, expr: Expr) -> Self {
        self.columns.push((Some(urn.into()), expr));
        self
    }
}

impl Filter for Project {
    fn name(&self) -> String {
        format!("project({} columns)", self.columns.len())
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let compiled = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, (alias, expr))| {
                let mut compiled = expr
                    .compile(&input.fields)
                    .map_err(|e| e.context(format!("projection column {}", i)))?;
                if let Some(alias) = alias {
                    compiled.field = compiled.field.with_urn(alias.clone());
                }
                Ok(compiled)
            })
            .collect::<Result<Vec<Compiled>, CompileError>>()?;
        let fields: Vec<_> = compiled.iter().map(|c| c.field.clone()).collect();
        validate_fields(&fields)?;
        tracing::debug!(
            "Projecting {} input fields into [{}]",
            input.fields.len(),
            fields.iter().map(|f| f.urn()).collect::<Vec<_>>().join(", ")
        );

        let samples = input.samples.map(move |item| -> Result<Sample, QueryError> {
            let sample = item?;
            let mut row = Vec::with_capacity(compiled.len());
            for column in &compiled {
                let value = column.evaluate(&sample.value)?;
                column
                    .field
                    .check(&value)
                    .map_err(|e| e.context(column.field.urn().to_string()))?;
                row.push(value);
            }
            Ok(Sample::new(sample.timestamp, row))
        });
        Ok(QueryResult::new(fields, ctx.guard(samples)))
    }
}

/// Keeps the rows for which a BOOLEAN predicate is true. Null drops the row.
#[derive(Debug, Clone)]
pub struct Where {
    predicate: Expr,
}

impl Where {
    pub fn new(predicate: Expr) -> Self {
        Self { predicate }
    }
}

impl Filter for Where {
    fn name(&self) -> String {
        "where".to_string()
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let predicate = self
            .predicate
            .compile(&input.fields)
            .map_err(|e| e.context("where predicate"))?;
        if predicate.field.data_type() != DataType::Boolean {
            return Err(CompileError::OperandNotBoolean {
                operand: predicate.field.urn().to_string(),
                found: predicate.field.data_type(),
            }
            .into());
        }
        tracing::debug!("Filtering rows where {}", predicate.field.urn());

        let samples = input.samples.filter_map(move |item| {
            let sample = match item {
                Ok(sample) => sample,
                Err(e) => return Some(Err(e)),
            };
            match predicate.evaluate(&sample.value) {
                Ok(value) if value.as_bool() == Some(true) => Some(Ok(sample)),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(QueryResult::new(input.fields, ctx.guard(samples)))
    }
}

/// Rewrites the URN, unit or custom metadata of one field. Data type and
/// required-ness are never touched.
#[derive(Debug, Clone)]
pub struct OverrideMetadata {
    target: String,
    urn: Option<String>,
    unit: Option<Option<String>>,
    meta: CustomMeta,
}

impl OverrideMetadata {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            urn: None,
            unit: None,
            meta: CustomMeta::new(),
        }
    }

    pub fn rename(mut self, urn: impl Into<String>) -> Self {
        self.urn = Some(urn.into());
        self
    }

    /// Replace the unit; `None` clears it
    pub fn unit(mut self, unit: Option<&str>) -> Self {
        self.unit = Some(unit.map(str::to_string));
        self
    }

    /// Merge a key into the custom metadata, overwriting an existing one
    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

impl Filter for OverrideMetadata {
    fn name(&self) -> String {
        format!("override_metadata({})", self.target)
    }

    fn apply(&self, _ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let mut fields = input.fields;
        let index = find_field(&fields, &self.target)?;

        let mut field = fields[index].clone();
        if let Some(urn) = &self.urn {
            field = field.with_urn(urn.clone());
        }
        if let Some(unit) = &self.unit {
            field = field.with_optional_unit(unit.clone());
        }
        let meta = merge_meta(field.custom_meta(), &self.meta);
        fields[index] = field.with_custom_meta(meta);
        validate_fields(&fields)?;
        tracing::debug!("Field '{}' is now {}", self.target, fields[index]);

        Ok(QueryResult::new(fields, input.samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldDescriptor, Value};
    use crate::expr::{Comparison, NumericOp};
    use crate::stream::{Datasource, VecSource};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn source() -> VecSource {
        let fields = vec![
            FieldDescriptor::new("used", DataType::Integer).with_unit("B"),
            FieldDescriptor::new("total", DataType::Integer).with_unit("B"),
        ];
        let rows = vec![
            Sample::new(ts(0), vec![Value::Integer(25), Value::Integer(100)]),
            Sample::new(ts(10), vec![Value::Integer(80), Value::Integer(100)]),
            Sample::new(ts(20), vec![Value::Integer(50), Value::Integer(0)]),
        ];
        VecSource::new(fields, rows)
    }

    fn used_percent() -> Expr {
        let hundred = Expr::constant(FieldDescriptor::new("100", DataType::Integer), 100i64);
        Expr::numeric(
            NumericOp::Divide,
            Expr::numeric(NumericOp::Multiply, Expr::reference("used"), hundred),
            Expr::reference("total"),
        )
    }

    #[test]
    fn test_project() {
        let ctx = ExecContext::default();
        let project = Project::new()
            .column(Expr::reference("total"))
            .column_as("pct", used_percent());
        let input = source().execute(&ctx).unwrap();
        let output = project.apply(&ctx, input).unwrap();

        assert_eq!(output.fields[0].urn(), "total");
        assert_eq!(output.fields[1].urn(), "pct");
        assert_eq!(output.fields[1].unit(), None);

        let mut rows = output.samples;
        assert_eq!(
            rows.next().unwrap().unwrap().value,
            vec![Value::Integer(100), Value::Integer(25)]
        );
        assert_eq!(rows.next().unwrap().unwrap().value[1], Value::Integer(80));
        let err = rows.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("Division by zero"), "{}", err);
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_project_rejects_duplicate_columns() {
        let ctx = ExecContext::default();
        let project = Project::new()
            .column(Expr::reference("used"))
            .column(Expr::reference("used"));
        let input = source().execute(&ctx).unwrap();
        assert!(matches!(
            project.apply(&ctx, input),
            Err(QueryError::Compile(CompileError::DuplicateField(_)))
        ));
    }

    #[test]
    fn test_where() {
        let ctx = ExecContext::default();
        let fifty = Expr::constant(FieldDescriptor::new("50", DataType::Integer), 50i64);
        let filter = Where::new(Expr::compare(
            Comparison::GreaterOrEqual,
            Expr::reference("used"),
            fifty,
        ));
        let rows = filter
            .apply(&ctx, source().execute(&ctx).unwrap())
            .unwrap()
            .collect()
            .unwrap();
        let times: Vec<i64> = rows.iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(times, vec![10, 20]);

        let not_boolean = Where::new(Expr::reference("used"));
        assert!(not_boolean
            .apply(&ctx, source().execute(&ctx).unwrap())
            .is_err());
    }

    #[test]
    fn test_override_metadata() {
        let ctx = ExecContext::default();
        let filter = OverrideMetadata::new("used")
            .rename("memory:used")
            .unit(Some("bytes"))
            .meta("host", json!("db-1"));
        let output = filter
            .apply(&ctx, source().execute(&ctx).unwrap())
            .unwrap();

        let field = &output.fields[0];
        assert_eq!(field.urn(), "memory:used");
        assert_eq!(field.unit(), Some("bytes"));
        assert_eq!(field.custom_meta()["host"], json!("db-1"));
        assert_eq!(field.data_type(), DataType::Integer);
        assert!(field.is_required());
        assert_eq!(output.collect().unwrap().len(), 3);

        let clash = OverrideMetadata::new("used").rename("total");
        assert!(clash.apply(&ctx, source().execute(&ctx).unwrap()).is_err());
    }
}
