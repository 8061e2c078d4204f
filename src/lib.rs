//! Tidal: Time-Series Query Execution Engine
//!
//! Lazily evaluated pipelines over streams of timestamped samples, with a
//! typed expression language compiled before any data is read.
//!
//! # Features
//!
//! - **Alignment**: time-weighted interpolation onto fixed or calendar periods
//! - **Gap Filling**: linear or forward fill of every missing grid point
//! - **Derived Metrics**: delta, per-second rate, counter-aware delta
//! - **Merge Joins**: inner, left and full joins of sorted streams
//! - **Reductions**: SUM, AVG, MIN, MAX, COUNT across aligned series
//! - **Expressions**: arithmetic, comparisons, casts, nvl and selectors
//! - **Cancellation**: every stage stops promptly once a traversal is cancelled
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use tidal::align::{Align, FillMode, FixedPeriod, GapFill};
//! use tidal::derive::Rate;
//! use tidal::{DataType, Datasource, ExecContext, FieldDescriptor, Pipeline, SeriesStore};
//!
//! let store = SeriesStore::new();
//! store
//!     .create_series(FieldDescriptor::new("requests", DataType::Integer).with_unit("req"))
//!     .unwrap();
//! store.insert("requests", Utc.timestamp_opt(5, 0).unwrap(), 120i64).unwrap();
//! store.insert("requests", Utc.timestamp_opt(130, 0).unwrap(), 480i64).unwrap();
//!
//! let minute = Arc::new(FixedPeriod::seconds(60).unwrap());
//! let pipeline = Pipeline::new(Arc::new(store.source("requests").unwrap()))
//!     .with_filter(Align::new(minute.clone()))
//!     .with_filter(GapFill::new(minute, FillMode::Linear))
//!     .with_filter(Rate);
//!
//! let result = pipeline.execute(&ExecContext::default()).unwrap();
//! println!("{:?}", result.collect().unwrap());
//! ```

pub mod align;
pub mod config;
pub mod data;
pub mod derive;
pub mod error;
pub mod expr;
pub mod join;
pub mod pipeline;
pub mod reduce;
pub mod storage;
pub mod stream;

// Re-export commonly used types
pub use config::EngineConfig;
pub use data::{DataType, FieldDescriptor, Sample, Value};
pub use error::{CompileError, EvalError, QueryError};
pub use expr::Expr;
pub use pipeline::Pipeline;
pub use storage::{SeriesStore, StorageError};
pub use stream::{CancellationToken, Datasource, ExecContext, Filter, QueryResult, TimeRange};
