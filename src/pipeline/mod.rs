//! A datasource followed by an ordered chain of filters

use crate::error::QueryError;
use crate::stream::{Datasource, ExecContext, Filter, QueryResult};
use std::sync::Arc;

/// Datasource plus filters, itself usable as a datasource.
///
/// On execution the leading filters are offered to the source one at a time;
/// each one it absorbs is skipped. The first refusal ends fusion and every
/// remaining filter is applied in order.
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn Datasource>,
    filters: Vec<Arc<dyn Filter>>,
}

impl Pipeline {
    pub fn new(source: Arc<dyn Datasource>) -> Self {
        Self {
            source,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(self, filter: impl Filter + 'static) -> Self {
        self.with_shared_filter(Arc::new(filter))
    }

    pub fn with_shared_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Source after fusion, and the filters it did not absorb
    fn plan(&self) -> (Arc<dyn Datasource>, &[Arc<dyn Filter>]) {
        let mut source = Arc::clone(&self.source);
        for (i, filter) in self.filters.iter().enumerate() {
            match source.try_fuse(filter.as_ref()) {
                Some(fused) => {
                    tracing::debug!("Filter {} fused into its datasource", filter.name());
                    source = fused;
                }
                None => return (source, &self.filters[i..]),
            }
        }
        (source, &[])
    }
}

impl Datasource for Pipeline {
    fn execute(&self, ctx: &ExecContext) -> Result<QueryResult, QueryError> {
        let (source, remaining) = self.plan();
        let mut result = source.execute(ctx)?;
        for filter in remaining {
            result = filter
                .apply(ctx, result)
                .map_err(|e| e.in_stage(filter.name()))?;
        }
        Ok(result)
    }

    fn try_fuse(&self, filter: &dyn Filter) -> Option<Arc<dyn Datasource>> {
        if !self.filters.is_empty() {
            return None;
        }
        self.source.try_fuse(filter)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("filters", &self.filter_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{Align, AlignmentPeriod, FillMode, FixedPeriod, GapFill};
    use crate::data::{DataType, FieldDescriptor, Value};
    use crate::derive::{CounterDelta, Rate};
    use crate::expr::{Comparison, Expr, NumericOp, Project, Where};
    use crate::join::JoinSource;
    use crate::reduce::{ReduceSource, ReductionType};
    use crate::storage::SeriesStore;
    use crate::stream::{CancellationToken, TimeRange, TimeWindow};
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn minute() -> Arc<dyn AlignmentPeriod> {
        Arc::new(FixedPeriod::seconds(60).unwrap())
    }

    /// Irregular request counters for two hosts
    fn store() -> SeriesStore {
        let store = SeriesStore::new();
        for host in ["web-1", "web-2"] {
            store
                .create_series(FieldDescriptor::new(host, DataType::Decimal).with_unit("req"))
                .unwrap();
        }
        for (t, v) in [(5, 100.0), (65, 160.0), (130, 230.0), (250, 350.0)] {
            store.insert("web-1", ts(t), v).unwrap();
        }
        for (t, v) in [(0, 10.0), (60, 40.0), (120, 70.0), (180, 100.0), (240, 130.0)] {
            store.insert("web-2", ts(t), v).unwrap();
        }
        store
    }

    fn collect(source: &dyn Datasource) -> Vec<(i64, Vec<Value>)> {
        source
            .execute(&ExecContext::default())
            .unwrap()
            .collect()
            .unwrap()
            .into_iter()
            .map(|s| (s.timestamp.timestamp(), s.value))
            .collect()
    }

    #[test]
    fn test_align_fill_rate() {
        let store = store();
        let pipeline = Pipeline::new(Arc::new(store.source("web-1").unwrap()))
            .with_filter(Align::new(minute()))
            .with_filter(GapFill::new(minute(), FillMode::Linear))
            .with_filter(Rate);

        let result = pipeline.execute(&ExecContext::default()).unwrap();
        assert_eq!(result.fields[0].unit(), Some("req/s"));
        let rows = result.collect().unwrap();
        let times: Vec<i64> = rows.iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(times, vec![60, 120, 180, 240]);
        assert!(rows
            .iter()
            .all(|s| s.first().as_f64().map_or(false, |r| r > 0.0)));
    }

    #[test]
    fn test_leading_window_is_fused() {
        let store = store();
        let window = TimeWindow::new(TimeRange {
            from: Some(ts(100)),
            to: None,
        });
        let pipeline = Pipeline::new(Arc::new(store.source("web-2").unwrap()))
            .with_filter(window)
            .with_filter(CounterDelta::new());
        let (source, remaining) = pipeline.plan();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name(), "counter_delta");
        assert_eq!(collect(source.as_ref()).len(), 3);

        let rows = collect(&pipeline);
        assert_eq!(
            rows,
            vec![(180, vec![Value::Decimal(30.0)]), (240, vec![Value::Decimal(30.0)])]
        );
    }

    #[test]
    fn test_window_after_other_filters_is_applied() {
        let store = store();
        let pipeline = Pipeline::new(Arc::new(store.source("web-2").unwrap()))
            .with_filter(CounterDelta::new())
            .with_filter(TimeWindow::new(TimeRange::new(ts(60), ts(121))));
        let (_, remaining) = pipeline.plan();
        assert_eq!(remaining.len(), 2);

        let times: Vec<i64> = collect(&pipeline).into_iter().map(|(t, _)| t).collect();
        assert_eq!(times, vec![60, 120]);
    }

    #[test]
    fn test_join_then_project() {
        let store = store();
        let aligned = |name: &str| -> Arc<dyn Datasource> {
            Arc::new(
                Pipeline::new(Arc::new(store.source(name).unwrap()))
                    .with_filter(Align::new(minute())),
            )
        };
        let total = Expr::numeric(
            NumericOp::Add,
            Expr::reference("web-1"),
            Expr::reference("web-2"),
        );
        let busy = Expr::compare(
            Comparison::Greater,
            Expr::reference("total"),
            Expr::constant(FieldDescriptor::new("limit", DataType::Decimal), 250.0),
        );
        let pipeline = Pipeline::new(Arc::new(JoinSource::inner(vec![
            aligned("web-1"),
            aligned("web-2"),
        ])))
        .with_filter(Project::new().column_as("total", total))
        .with_filter(Where::new(busy));

        let result = pipeline.execute(&ExecContext::default()).unwrap();
        assert_eq!(result.fields[0].urn(), "total");
        assert_eq!(result.fields[0].unit(), Some("req"));
        let rows = result.collect().unwrap();
        let times: Vec<i64> = rows.iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(times, vec![120, 240]);
    }

    #[test]
    fn test_reduce_over_pipelines() {
        let store = store();
        let inputs: Vec<Arc<dyn Datasource>> = ["web-1", "web-2"]
            .iter()
            .map(|name| Arc::new(store.source(name).unwrap()) as Arc<dyn Datasource>)
            .collect();
        let reduce = ReduceSource::new(
            ReductionType::Sum,
            minute(),
            FieldDescriptor::new("requests", DataType::Decimal),
        )
        .with_inputs(inputs);
        let pipeline = Pipeline::new(Arc::new(reduce))
            .with_filter(GapFill::new(minute(), FillMode::ForwardFill));

        let rows = collect(&pipeline);
        let times: Vec<i64> = rows.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0, 60, 120, 180, 240]);
        assert_eq!(rows[0].1, vec![Value::Decimal(110.0)]);
    }

    #[test]
    fn test_errors_name_the_stage() {
        let store = store();
        store
            .create_series(FieldDescriptor::new("state", DataType::String))
            .unwrap();
        let pipeline = Pipeline::new(Arc::new(store.source("state").unwrap()))
            .with_filter(Rate);
        let err = pipeline.execute(&ExecContext::default()).unwrap_err();
        assert!(matches!(err, QueryError::Compile(_)));
        assert!(err.to_string().starts_with("Compile error: rate: "), "{}", err);
    }

    #[test]
    fn test_cancellation_stops_traversal() {
        let store = store();
        let cancel = CancellationToken::new();
        let ctx = ExecContext::default().with_cancel(cancel.clone());
        let pipeline = Pipeline::new(Arc::new(store.source("web-2").unwrap()))
            .with_filter(Align::new(minute()))
            .with_filter(GapFill::new(minute(), FillMode::Linear));

        let mut samples = pipeline.execute(&ctx).unwrap().samples;
        assert!(samples.next().unwrap().is_ok());
        cancel.cancel();
        let err = samples.next().unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(samples.next().is_none());
    }
}
