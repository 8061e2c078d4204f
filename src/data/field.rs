use super::value::{DataType, Value};
use crate::error::{CompileError, EvalError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Free-form metadata attached to a field
pub type CustomMeta = BTreeMap<String, serde_json::Value>;

/// Describes one field of a sample row.
///
/// Data type and required-ness are fixed at construction; URN, unit and
/// custom metadata can only change by building a new descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    urn: String,
    data_type: DataType,
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    custom_meta: CustomMeta,
}

impl FieldDescriptor {
    /// Create a required field
    pub fn new(urn: impl Into<String>, data_type: DataType) -> Self {
        Self {
            urn: urn.into(),
            data_type,
            required: true,
            unit: None,
            custom_meta: CustomMeta::new(),
        }
    }

    /// Create a field that may carry nulls
    pub fn optional(urn: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: false,
            ..Self::new(urn, data_type)
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_meta.insert(key.into(), value);
        self
    }

    pub fn with_urn(mut self, urn: impl Into<String>) -> Self {
        self.urn = urn.into();
        self
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn custom_meta(&self) -> &CustomMeta {
        &self.custom_meta
    }

    /// New descriptor keeping URN and metadata but with another type/nullability.
    /// Only the engine's own stages may change these.
    pub(crate) fn derive(&self, data_type: DataType, required: bool) -> Self {
        Self {
            data_type,
            required,
            ..self.clone()
        }
    }

    pub(crate) fn with_optional_unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit;
        self
    }

    pub(crate) fn with_custom_meta(mut self, meta: CustomMeta) -> Self {
        self.custom_meta = meta;
        self
    }

    /// Check a runtime value against this descriptor
    pub fn check(&self, value: &Value) -> Result<(), EvalError> {
        if value.is_null() {
            if self.required {
                return Err(EvalError::TypeMismatch {
                    expected: self.data_type,
                    value: format!("NULL in required field '{}'", self.urn),
                });
            }
            return Ok(());
        }
        self.data_type.validate(value)
    }
}

impl std::fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.urn, self.data_type)?;
        if !self.required {
            write!(f, " NULL")?;
        }
        if let Some(unit) = &self.unit {
            write!(f, " [{}]", unit)?;
        }
        Ok(())
    }
}

/// Unit shared by every descriptor, or None when any differs
pub fn common_unit<'a>(fields: impl IntoIterator<Item = &'a FieldDescriptor>) -> Option<String> {
    let mut iter = fields.into_iter();
    let first = iter.next()?.unit.clone();
    for field in iter {
        if field.unit != first {
            return None;
        }
    }
    first
}

/// Merge custom metadata; later maps overwrite earlier keys
pub fn merge_meta(first: &CustomMeta, second: &CustomMeta) -> CustomMeta {
    let mut merged = first.clone();
    merged.extend(second.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Validate a row schema: non-empty and unique URNs
pub fn validate_fields(fields: &[FieldDescriptor]) -> Result<(), CompileError> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        if field.urn.trim().is_empty() {
            return Err(CompileError::InvalidField(format!(
                "empty URN for {} field",
                field.data_type
            )));
        }
        if !seen.insert(field.urn.as_str()) {
            return Err(CompileError::DuplicateField(field.urn.clone()));
        }
    }
    Ok(())
}

/// Position of a field by URN
pub fn find_field(fields: &[FieldDescriptor], urn: &str) -> Result<usize, CompileError> {
    fields
        .iter()
        .position(|f| f.urn == urn)
        .ok_or_else(|| CompileError::FieldNotFound(urn.to_string()))
}
