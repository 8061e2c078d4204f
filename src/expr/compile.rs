use super::ops::{Comparison, LogicalOp, NumericOp, UnaryOp};
use super::{Compiled, Expr};
use crate::data::{common_unit, find_field, merge_meta, DataType, FieldDescriptor, Value};
use crate::error::{CompileError, EvalError};

impl Expr {
    /// Validate this tree against `fields` and build its evaluator
    pub fn compile(&self, fields: &[FieldDescriptor]) -> Result<Compiled, CompileError> {
        match self {
            Expr::Constant { field, value } => constant(field, value),
            Expr::Reference { urn } => reference(fields, urn),
            Expr::Cast { source, target } => cast(fields, source, *target),
            Expr::Condition { op, left, right } => condition(fields, *op, left, right),
            Expr::Logical { op, left, right } => logical(fields, *op, left, right),
            Expr::Numeric { op, left, right } => numeric(fields, *op, left, right),
            Expr::Unary { op, operand } => unary(fields, *op, operand),
            Expr::Nvl {
                source,
                alternative,
            } => nvl(fields, source, alternative),
            Expr::Selector {
                selector: sel,
                when_true,
                when_false,
            } => selector(fields, sel, when_true, when_false),
        }
    }
}

fn operand(fields: &[FieldDescriptor], expr: &Expr, role: String) -> Result<Compiled, CompileError> {
    expr.compile(fields).map_err(|e| e.context(role))
}

fn constant(field: &FieldDescriptor, value: &Value) -> Result<Compiled, CompileError> {
    if value.is_null() && field.is_required() {
        return Err(CompileError::NullRequiredConstant(field.urn().to_string()));
    }
    // Integer -> Decimal is the only widening allowed; nothing is truncated
    let value = match (field.data_type(), value) {
        (DataType::Decimal, Value::Integer(v)) => Value::Decimal(*v as f64),
        (_, other) => other.clone(),
    };
    if !value.is_null() {
        field
            .data_type()
            .validate(&value)
            .map_err(|_| CompileError::TypeMismatch {
                expected: field.data_type(),
                found: format!("constant {} ({})", value, value.type_name()),
            })?;
    }
    Ok(Compiled::new(field.clone(), move |_| Ok(value.clone())))
}

fn reference(fields: &[FieldDescriptor], urn: &str) -> Result<Compiled, CompileError> {
    let index = find_field(fields, urn)?;
    let width = fields.len();
    let field = fields[index].clone();
    let stage = field.urn().to_string();
    Ok(Compiled::new(field, move |row| {
        if row.len() != width {
            return Err(EvalError::RowWidthMismatch {
                input: 0,
                expected: width,
                found: row.len(),
            }
            .context(stage.clone()));
        }
        Ok(row[index].clone())
    }))
}

fn cast(fields: &[FieldDescriptor], source: &Expr, target: DataType) -> Result<Compiled, CompileError> {
    let source = operand(fields, source, "cast source".to_string())?;
    let from = source.field.data_type();
    let cast_fn = from
        .cast_to(target)
        .map_err(|e| e.context(format!("cast of '{}'", source.field.urn())))?;

    let field = source.field.derive(target, source.field.is_required());
    let stage = format!("cast({} as {})", source.field.urn(), target);
    let eval = source.eval;
    Ok(Compiled::new(field, move |row| match eval(row)? {
        Value::Null => Ok(Value::Null),
        value => cast_fn(value).map_err(|e| e.context(stage.clone())),
    }))
}

fn same_type(left: &Compiled, right: &Compiled) -> Result<DataType, CompileError> {
    let (l, r) = (left.field.data_type(), right.field.data_type());
    if l != r {
        return Err(CompileError::OperandTypeMismatch { left: l, right: r });
    }
    Ok(l)
}

fn output(urn: &str, data_type: DataType, required: bool) -> FieldDescriptor {
    if required {
        FieldDescriptor::new(urn, data_type)
    } else {
        FieldDescriptor::optional(urn, data_type)
    }
}

fn binary_urn(left: &Compiled, op: impl std::fmt::Display, right: &Compiled) -> String {
    format!("({} {} {})", left.field.urn(), op, right.field.urn())
}

fn condition(
    fields: &[FieldDescriptor],
    op: Comparison,
    left: &Expr,
    right: &Expr,
) -> Result<Compiled, CompileError> {
    let left = operand(fields, left, format!("left operand of {}", op))?;
    let right = operand(fields, right, format!("right operand of {}", op))?;
    let urn = binary_urn(&left, op, &right);
    let data_type = same_type(&left, &right).map_err(|e| e.context(urn.clone()))?;
    op.check(data_type).map_err(|e| e.context(urn.clone()))?;

    let required = left.field.is_required() && right.field.is_required();
    let field = output(&urn, DataType::Boolean, required);
    let (l, r) = (left.eval, right.eval);
    Ok(Compiled::new(field, move |row| {
        let a = l(row)?;
        let b = r(row)?;
        if a.is_null() || b.is_null() {
            return Ok(Value::Boolean(false));
        }
        op.evaluate(&a, &b)
            .map(Value::Boolean)
            .map_err(|e| e.context(urn.clone()))
    }))
}

fn require_boolean(compiled: &Compiled) -> Result<(), CompileError> {
    let field = &compiled.field;
    if field.data_type() != DataType::Boolean {
        return Err(CompileError::OperandNotBoolean {
            operand: field.urn().to_string(),
            found: field.data_type(),
        });
    }
    if !field.is_required() {
        return Err(CompileError::OperandNotRequired(field.urn().to_string()));
    }
    Ok(())
}

fn logical(
    fields: &[FieldDescriptor],
    op: LogicalOp,
    left: &Expr,
    right: &Expr,
) -> Result<Compiled, CompileError> {
    let left = operand(fields, left, format!("left operand of {}", op))?;
    let right = operand(fields, right, format!("right operand of {}", op))?;
    let urn = binary_urn(&left, op, &right);
    require_boolean(&left).map_err(|e| e.context(urn.clone()))?;
    require_boolean(&right).map_err(|e| e.context(urn.clone()))?;

    let field = FieldDescriptor::new(urn.clone(), DataType::Boolean);
    let (l, r) = (left.eval, right.eval);
    Ok(Compiled::new(field, move |row| {
        let a = as_bool(l(row)?, &urn)?;
        let result = match op {
            LogicalOp::And => a && as_bool(r(row)?, &urn)?,
            LogicalOp::Or => a || as_bool(r(row)?, &urn)?,
        };
        Ok(Value::Boolean(result))
    }))
}

fn as_bool(value: Value, stage: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::TypeMismatch {
            expected: DataType::Boolean,
            value: format!("{} ({})", value, value.type_name()),
        }
        .context(stage.to_string())
    })
}

fn numeric(
    fields: &[FieldDescriptor],
    op: NumericOp,
    left: &Expr,
    right: &Expr,
) -> Result<Compiled, CompileError> {
    let left = operand(fields, left, format!("left operand of {}", op))?;
    let right = operand(fields, right, format!("right operand of {}", op))?;
    let urn = binary_urn(&left, op, &right);
    let data_type = same_type(&left, &right).map_err(|e| e.context(urn.clone()))?;
    op.check(data_type).map_err(|e| e.context(urn.clone()))?;

    let required = left.field.is_required() && right.field.is_required();
    let field = output(&urn, data_type, required)
        .with_optional_unit(common_unit([&left.field, &right.field]))
        .with_custom_meta(merge_meta(left.field.custom_meta(), right.field.custom_meta()));
    let (l, r) = (left.eval, right.eval);
    Ok(Compiled::new(field, move |row| {
        let a = l(row)?;
        let b = r(row)?;
        if a.is_null() || b.is_null() {
            return Ok(Value::Null);
        }
        op.evaluate(&a, &b).map_err(|e| e.context(urn.clone()))
    }))
}

fn unary(fields: &[FieldDescriptor], op: UnaryOp, operand_expr: &Expr) -> Result<Compiled, CompileError> {
    let inner = operand(fields, operand_expr, format!("operand of {}", op))?;
    let urn = format!("{}({})", op, inner.field.urn());
    op.check(inner.field.data_type())
        .map_err(|e| e.context(urn.clone()))?;

    let field = inner.field.clone().with_urn(urn.clone());
    let eval = inner.eval;
    Ok(Compiled::new(field, move |row| match eval(row)? {
        Value::Null => Ok(Value::Null),
        value => op.evaluate(&value).map_err(|e| e.context(urn.clone())),
    }))
}

fn nvl(fields: &[FieldDescriptor], source: &Expr, alternative: &Expr) -> Result<Compiled, CompileError> {
    let source = operand(fields, source, "nvl source".to_string())?;
    let alternative = operand(fields, alternative, "nvl alternative".to_string())?;
    let urn = format!("nvl({}, {})", source.field.urn(), alternative.field.urn());
    if !alternative.field.is_required() {
        return Err(
            CompileError::OperandNotRequired(alternative.field.urn().to_string()).context(urn),
        );
    }
    let data_type = same_type(&source, &alternative).map_err(|e| e.context(urn.clone()))?;

    if source.field.is_required() {
        tracing::debug!("{}: source is required, alternative never evaluated", urn);
        return Ok(source);
    }
    let field = source.field.derive(data_type, true);
    let (s, a) = (source.eval, alternative.eval);
    Ok(Compiled::new(field, move |row| match s(row)? {
        Value::Null => a(row),
        value => Ok(value),
    }))
}

fn selector(
    fields: &[FieldDescriptor],
    selector: &Expr,
    when_true: &Expr,
    when_false: &Expr,
) -> Result<Compiled, CompileError> {
    let selector = operand(fields, selector, "selector".to_string())?;
    let when_true = operand(fields, when_true, "true branch".to_string())?;
    let when_false = operand(fields, when_false, "false branch".to_string())?;
    let urn = format!(
        "({} ? {} : {})",
        selector.field.urn(),
        when_true.field.urn(),
        when_false.field.urn()
    );
    require_boolean(&selector).map_err(|e| e.context(urn.clone()))?;

    let (t, f) = (&when_true.field, &when_false.field);
    let mismatch = if t.data_type() != f.data_type() {
        Some("data type")
    } else if t.unit() != f.unit() {
        Some("unit")
    } else if t.is_required() != f.is_required() {
        Some("required")
    } else {
        None
    };
    if let Some(what) = mismatch {
        return Err(CompileError::BranchMismatch(what).context(urn));
    }

    let field = t
        .clone()
        .with_urn(urn.clone())
        .with_custom_meta(merge_meta(t.custom_meta(), f.custom_meta()));
    let (s, on_true, on_false) = (selector.eval, when_true.eval, when_false.eval);
    Ok(Compiled::new(field, move |row| {
        if as_bool(s(row)?, &urn)? {
            on_true(row)
        } else {
            on_false(row)
        }
    }))
}
