pub mod engine;

pub use engine::{Series, SeriesSource, SeriesStore, StorageError};
