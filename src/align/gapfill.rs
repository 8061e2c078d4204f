use super::interpolate;
use super::period::AlignmentPeriod;
use crate::data::{DataType, Sample};
use crate::error::{CompileError, EvalError, QueryError};
use crate::stream::{ExecContext, Filter, QueryResult, SampleStream};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How grid points without an aligned sample are synthesized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Time-weighted interpolation between the surrounding aligned points
    Linear,
    /// Repeat the most recent aligned value
    ForwardFill,
}

/// Densifies an aligned stream to every grid point between its first and
/// last sample. Aligned samples are always passed through unchanged.
#[derive(Debug, Clone)]
pub struct GapFill {
    period: Arc<dyn AlignmentPeriod>,
    mode: FillMode,
    max_points: usize,
}

impl GapFill {
    pub const DEFAULT_MAX_POINTS: usize = 1_000_000;

    pub fn new(period: Arc<dyn AlignmentPeriod>, mode: FillMode) -> Self {
        Self {
            period,
            mode,
            max_points: Self::DEFAULT_MAX_POINTS,
        }
    }

    /// Limit the number of points synthesized for a single gap
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }
}

impl Filter for GapFill {
    fn name(&self) -> String {
        format!("gap_fill({:?}, {:?})", self.mode, self.period)
    }

    fn apply(&self, ctx: &ExecContext, input: QueryResult) -> Result<QueryResult, QueryError> {
        let field = input.single_field("gap fill")?.clone();
        if self.mode == FillMode::Linear && !field.data_type().is_numeric() {
            return Err(CompileError::UnsupportedDataType {
                operation: "linear gap fill",
                data_type: field.data_type(),
            }
            .into());
        }
        tracing::debug!("Gap filling '{}' with {:?}", field.urn(), self.mode);

        let iter = GapFillIter {
            inner: input.samples,
            period: Arc::clone(&self.period),
            mode: self.mode,
            max_points: self.max_points,
            data_type: field.data_type(),
            stage: format!("gap_fill({})", field.urn()),
            previous: None,
            pending: None,
        };
        Ok(QueryResult::new(vec![field], ctx.guard(iter)))
    }
}

/// A gap being filled: the next grid point and the aligned sample closing it
struct Gap {
    cursor: DateTime<Utc>,
    end: Sample,
    synthesized: usize,
}

struct GapFillIter {
    inner: SampleStream,
    period: Arc<dyn AlignmentPeriod>,
    mode: FillMode,
    max_points: usize,
    data_type: DataType,
    stage: String,
    previous: Option<Sample>,
    pending: Option<Gap>,
}

impl GapFillIter {
    fn synthesize(&self, previous: &Sample, gap: &Gap) -> Result<Sample, EvalError> {
        let value = match self.mode {
            FillMode::ForwardFill => previous.first().clone(),
            FillMode::Linear => interpolate(
                self.data_type,
                (previous.timestamp, previous.first()),
                (gap.end.timestamp, gap.end.first()),
                gap.cursor,
            )?,
        };
        Ok(Sample::new(gap.cursor, vec![value]))
    }

    fn fail(&self, e: EvalError) -> QueryError {
        e.context(self.stage.clone()).into()
    }

    fn step(&mut self) -> Result<Option<Sample>, QueryError> {
        loop {
            if let Some(mut gap) = self.pending.take() {
                let previous = match &self.previous {
                    Some(previous) if gap.cursor < gap.end.timestamp => previous,
                    _ => {
                        self.previous = Some(gap.end.clone());
                        return Ok(Some(gap.end));
                    }
                };
                if gap.synthesized >= self.max_points {
                    return Err(self.fail(EvalError::GapTooLarge {
                        from: previous.timestamp,
                        to: gap.end.timestamp,
                        limit: self.max_points,
                    }));
                }
                let sample = self
                    .synthesize(previous, &gap)
                    .map_err(|e| self.fail(e))?;
                let next = self.period.next_boundary(gap.cursor);
                if next <= gap.cursor {
                    return Err(self.fail(EvalError::NonAdvancingPeriod(gap.cursor)));
                }
                gap.cursor = next;
                gap.synthesized += 1;
                tracing::trace!("{}: filled {}", self.stage, sample.timestamp);
                self.pending = Some(gap);
                return Ok(Some(sample));
            }

            let sample = match self.inner.next() {
                None => return Ok(None),
                Some(sample) => sample?,
            };
            let cursor = match &self.previous {
                None => {
                    self.previous = Some(sample.clone());
                    return Ok(Some(sample));
                }
                Some(previous) => {
                    let cursor = self.period.next_boundary(previous.timestamp);
                    if cursor <= previous.timestamp {
                        return Err(self.fail(EvalError::NonAdvancingPeriod(previous.timestamp)));
                    }
                    cursor
                }
            };
            self.pending = Some(Gap {
                cursor,
                end: sample,
                synthesized: 0,
            });
        }
    }
}

impl Iterator for GapFillIter {
    type Item = Result<Sample, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{Align, FixedPeriod};
    use crate::data::{FieldDescriptor, Value};
    use crate::stream::{Datasource, VecSource};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn aligned_then_filled(mode: FillMode, points: &[(i64, f64)]) -> Vec<Sample> {
        let samples = points
            .iter()
            .map(|(t, v)| Sample::scalar(ts(*t), *v))
            .collect();
        let source = VecSource::scalar(FieldDescriptor::new("m", DataType::Decimal), samples);
        let period: Arc<dyn AlignmentPeriod> = Arc::new(FixedPeriod::seconds(60).unwrap());
        let ctx = ExecContext::default();

        let aligned = Align::new(Arc::clone(&period))
            .apply(&ctx, source.execute(&ctx).unwrap())
            .unwrap();
        GapFill::new(period, mode)
            .apply(&ctx, aligned)
            .unwrap()
            .collect()
            .unwrap()
    }

    #[test]
    fn test_linear_fill_density() {
        let out = aligned_then_filled(FillMode::Linear, &[(0, 10.0), (3600, 20.0)]);

        assert_eq!(out.len(), 61);
        for (i, sample) in out.iter().enumerate() {
            assert_eq!(sample.timestamp, ts(i as i64 * 60));
        }
        assert_eq!(out[0].first(), &Value::Decimal(10.0));
        assert_eq!(out[60].first(), &Value::Decimal(20.0));
        let mid = out[30].first().as_f64().unwrap();
        assert!((mid - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_forward_fill_plateau() {
        let out = aligned_then_filled(FillMode::ForwardFill, &[(0, 10.0), (3600, 20.0)]);

        assert_eq!(out.len(), 61);
        assert!(out[..60].iter().all(|s| s.first() == &Value::Decimal(10.0)));
        assert_eq!(out[60].first(), &Value::Decimal(20.0));
    }

    #[test]
    fn test_dense_input_unchanged() {
        let points: Vec<(i64, f64)> = (0..5).map(|i| (i * 60, i as f64)).collect();
        let out = aligned_then_filled(FillMode::Linear, &points);
        let got: Vec<(i64, f64)> = out
            .iter()
            .map(|s| (s.timestamp.timestamp(), s.first().as_f64().unwrap()))
            .collect();
        assert_eq!(got, points);
    }

    #[test]
    fn test_gap_limit() {
        let source = VecSource::scalar(
            FieldDescriptor::new("m", DataType::Integer),
            vec![Sample::scalar(ts(0), 1i64), Sample::scalar(ts(600), 2i64)],
        );
        let ctx = ExecContext::default();
        let period = Arc::new(FixedPeriod::seconds(60).unwrap());
        let filled = GapFill::new(period, FillMode::ForwardFill)
            .with_max_points(3)
            .apply(&ctx, source.execute(&ctx).unwrap())
            .unwrap();
        let err = filled.collect().unwrap_err();
        assert!(err.to_string().contains("exceeds 3 fill points"), "{}", err);
    }

    #[test]
    fn test_forward_fill_accepts_strings() {
        let source = VecSource::scalar(
            FieldDescriptor::new("state", DataType::String),
            vec![Sample::scalar(ts(0), "up"), Sample::scalar(ts(180), "down")],
        );
        let ctx = ExecContext::default();
        let period: Arc<dyn AlignmentPeriod> = Arc::new(FixedPeriod::seconds(60).unwrap());

        let linear = GapFill::new(Arc::clone(&period), FillMode::Linear)
            .apply(&ctx, source.execute(&ctx).unwrap());
        assert!(matches!(linear, Err(QueryError::Compile(_))));

        let out = GapFill::new(period, FillMode::ForwardFill)
            .apply(&ctx, source.execute(&ctx).unwrap())
            .unwrap()
            .collect()
            .unwrap();
        let values: Vec<&str> = out.iter().map(|s| s.first().as_str().unwrap()).collect();
        assert_eq!(values, vec!["up", "up", "up", "down"]);
    }
}
