use crate::data::{DataType, FieldDescriptor, Sample, Value};
use crate::error::{EvalError, QueryError};
use crate::stream::{Datasource, ExecContext, Filter, FusionHint, QueryResult, TimeRange};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// One named series: its descriptor and samples kept sorted by timestamp
#[derive(Debug)]
pub struct Series {
    field: FieldDescriptor,
    samples: RwLock<Vec<Sample<Value>>>,
}

impl Series {
    fn new(field: FieldDescriptor) -> Self {
        Self {
            field,
            samples: RwLock::new(Vec::new()),
        }
    }

    pub fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    /// Insert after any sample with the same timestamp
    fn insert(&self, timestamp: DateTime<Utc>, value: Value) -> Result<(), EvalError> {
        self.field.check(&value)?;
        let mut samples = self.samples.write();
        let at = samples.partition_point(|s| s.timestamp <= timestamp);
        samples.insert(at, Sample::new(timestamp, value));
        Ok(())
    }

    /// Copy of the samples inside `range`, located by binary search
    fn scan(&self, range: &TimeRange) -> Vec<Sample<Value>> {
        let samples = self.samples.read();
        let start = match range.from {
            Some(from) => samples.partition_point(|s| s.timestamp < from),
            None => 0,
        };
        let end = match range.to {
            Some(to) => samples.partition_point(|s| s.timestamp < to),
            None => samples.len(),
        };
        if start >= end {
            return Vec::new();
        }
        samples[start..end].to_vec()
    }
}

/// In-memory store of named single-field series
pub struct SeriesStore {
    /// Series indexed by name
    series: DashMap<String, Arc<Series>>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
        }
    }

    /// Create a series named after the field's URN
    pub fn create_series(&self, field: FieldDescriptor) -> Result<Arc<Series>, StorageError> {
        let name = field.urn().to_string();
        match self.series.entry(name) {
            Entry::Occupied(entry) => Err(StorageError::SeriesExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::debug!("Created series '{}'", entry.key());
                let series = Arc::new(Series::new(field));
                entry.insert(Arc::clone(&series));
                Ok(series)
            }
        }
    }

    pub fn get_series(&self, name: &str) -> Option<Arc<Series>> {
        self.series.get(name).map(|s| Arc::clone(&s))
    }

    pub fn drop_series(&self, name: &str) -> Result<(), StorageError> {
        if self.series.remove(name).is_none() {
            return Err(StorageError::SeriesNotFound(name.to_string()));
        }
        Ok(())
    }

    /// List all series names, sorted
    pub fn list_series(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn require(&self, name: &str) -> Result<Arc<Series>, StorageError> {
        self.get_series(name)
            .ok_or_else(|| StorageError::SeriesNotFound(name.to_string()))
    }

    /// Insert one sample, keeping the series sorted
    pub fn insert(
        &self,
        name: &str,
        timestamp: DateTime<Utc>,
        value: impl Into<Value>,
    ) -> Result<(), StorageError> {
        let series = self.require(name)?;
        series
            .insert(timestamp, value.into())
            .map_err(|source| StorageError::InvalidSample {
                series: name.to_string(),
                source,
            })
    }

    /// Insert samples, skipping (and logging) the ones that fail validation
    pub fn insert_batch(
        &self,
        name: &str,
        samples: impl IntoIterator<Item = (DateTime<Utc>, Value)>,
    ) -> Result<usize, StorageError> {
        let series = self.require(name)?;
        let mut inserted = 0;
        for (timestamp, value) in samples {
            match series.insert(timestamp, value) {
                Ok(()) => inserted += 1,
                Err(e) => tracing::warn!("Failed to insert into '{}': {}", name, e),
            }
        }
        Ok(inserted)
    }

    /// Insert a loosely typed JSON value, coerced to the series' data type
    pub fn insert_json(
        &self,
        name: &str,
        timestamp: DateTime<Utc>,
        json: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let series = self.require(name)?;
        let invalid = |source| StorageError::InvalidSample {
            series: name.to_string(),
            source,
        };
        let value = json_to_value(json).map_err(invalid)?;
        let value = series
            .field()
            .data_type()
            .force_cast_and_validate(value)
            .map_err(invalid)?;
        series.insert(timestamp, value).map_err(invalid)
    }

    /// Datasource reading one series
    pub fn source(&self, name: &str) -> Result<SeriesSource, StorageError> {
        Ok(SeriesSource {
            series: self.require(name)?,
            window: TimeRange::all(),
        })
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

fn json_to_value(json: &serde_json::Value) -> Result<Value, EvalError> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n.as_f64().map(Value::Decimal).ok_or_else(|| EvalError::CastFailed {
                value: n.to_string(),
                target: DataType::Decimal,
                reason: "number out of range".to_string(),
            }),
        },
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        other => Err(EvalError::CastFailed {
            value: other.to_string(),
            target: DataType::String,
            reason: "arrays and objects are not scalar values".to_string(),
        }),
    }
}

/// Scan of one series, optionally narrowed by a fused time window
#[derive(Debug, Clone)]
pub struct SeriesSource {
    series: Arc<Series>,
    window: TimeRange,
}

impl Datasource for SeriesSource {
    fn execute(&self, ctx: &ExecContext) -> Result<QueryResult, QueryError> {
        let range = ctx.range.intersect(&self.window);
        let samples = self.series.scan(&range);
        tracing::debug!(
            "Scanning '{}': {} samples in range",
            self.series.field().urn(),
            samples.len()
        );
        let rows = samples
            .into_iter()
            .map(|s| -> Result<Sample, QueryError> { Ok(s.map(|value| vec![value])) });
        Ok(QueryResult::new(
            vec![self.series.field().clone()],
            ctx.guard(rows),
        ))
    }

    fn try_fuse(&self, filter: &dyn Filter) -> Option<Arc<dyn Datasource>> {
        match filter.fusion_hint()? {
            FusionHint::TimeWindow(window) => {
                tracing::debug!(
                    "Fusing {} into scan of '{}'",
                    filter.name(),
                    self.series.field().urn()
                );
                Some(Arc::new(SeriesSource {
                    series: Arc::clone(&self.series),
                    window: self.window.intersect(&window),
                }))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Series '{0}' already exists")]
    SeriesExists(String),

    #[error("Series '{0}' not found")]
    SeriesNotFound(String),

    #[error("Invalid sample for series '{series}': {source}")]
    InvalidSample {
        series: String,
        #[source]
        source: EvalError,
    },
}
