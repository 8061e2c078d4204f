//! Engine configuration and tracing setup

use crate::align::period::offset;
use crate::align::{AlignmentPeriod, FillMode, FixedPeriod, GapFill};
use crate::error::CompileError;
use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_LOG_FILTER: &str = "tidal=info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Offset used to floor fixed alignment periods
    pub utc_offset_secs: i32,
    /// Most points a single gap may synthesize before failing
    pub max_gap_fill_points: usize,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_secs: 0,
            max_gap_fill_points: GapFill::DEFAULT_MAX_POINTS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Read `TIDAL_UTC_OFFSET_SECS`, `TIDAL_MAX_GAP_FILL_POINTS` and `RUST_LOG`.
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            utc_offset_secs: var("TIDAL_UTC_OFFSET_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.utc_offset_secs),
            max_gap_fill_points: var("TIDAL_MAX_GAP_FILL_POINTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_gap_fill_points),
            log_filter: var("RUST_LOG").unwrap_or(defaults.log_filter),
        }
    }

    /// Parse a JSON object; unknown keys and non-object documents are rejected
    pub fn from_json_str(json: &str) -> Result<Self, CompileError> {
        let invalid =
            |e: serde_json::Error| CompileError::InvalidConfig(format!("engine config: {}", e));
        let document: serde_json::Value = serde_json::from_str(json).map_err(invalid)?;
        if !document.is_object() {
            return Err(CompileError::InvalidConfig(
                "engine config must be a JSON object".to_string(),
            ));
        }
        let config: Self = serde_json::from_value(document).map_err(invalid)?;
        config.time_zone()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CompileError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CompileError::InvalidConfig(format!("reading {}: {}", path.display(), e))
        })?;
        tracing::info!("Loading engine config from {}", path.display());
        Self::from_json_str(&json)
    }

    pub fn with_utc_offset_secs(mut self, secs: i32) -> Self {
        self.utc_offset_secs = secs;
        self
    }

    pub fn with_max_gap_fill_points(mut self, max_points: usize) -> Self {
        self.max_gap_fill_points = max_points;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn time_zone(&self) -> Result<FixedOffset, CompileError> {
        offset(self.utc_offset_secs)
    }

    /// Fixed-width period floored in the configured offset
    pub fn fixed_period(&self, width: Duration) -> Result<Arc<dyn AlignmentPeriod>, CompileError> {
        Ok(Arc::new(FixedPeriod::new(width, self.time_zone()?)?))
    }

    /// Gap-fill filter bounded by `max_gap_fill_points`
    pub fn gap_fill(&self, period: Arc<dyn AlignmentPeriod>, mode: FillMode) -> GapFill {
        GapFill::new(period, mode).with_max_points(self.max_gap_fill_points)
    }

    /// Install the global fmt subscriber. `RUST_LOG` wins over `log_filter`.
    pub fn init_tracing(&self) {
        let result = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| self.log_filter.as_str().into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        if result.is_err() {
            tracing::debug!("Tracing subscriber already installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.utc_offset_secs, 0);
        assert_eq!(config.max_gap_fill_points, 1_000_000);
        assert_eq!(config.log_filter, "tidal=info");
        assert_eq!(config.time_zone().unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn test_vars_override_defaults() {
        let vars: HashMap<&str, &str> = [
            ("TIDAL_UTC_OFFSET_SECS", "3600"),
            ("TIDAL_MAX_GAP_FILL_POINTS", "not a number"),
            ("RUST_LOG", "tidal=trace"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.utc_offset_secs, 3600);
        assert_eq!(config.max_gap_fill_points, 1_000_000);
        assert_eq!(config.log_filter, "tidal=trace");
    }

    #[test]
    fn test_json_partial_document() {
        let config = EngineConfig::from_json_str(r#"{"max_gap_fill_points": 10}"#).unwrap();
        assert_eq!(config, EngineConfig::default().with_max_gap_fill_points(10));

        let err = EngineConfig::from_json_str(r#"{"utc_offset_secs": 90000}"#).unwrap_err();
        assert!(matches!(err, CompileError::InvalidConfig(_)));
        assert!(matches!(
            EngineConfig::from_json_str("[1, 2]"),
            Err(CompileError::InvalidConfig(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"max_gap_fill_point": 10}"#),
            Err(CompileError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"utc_offset_secs": -18000, "log_filter": "tidal=debug"}}"#
        )
        .unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.utc_offset_secs, -18000);
        assert_eq!(config.log_filter, "tidal=debug");

        let missing = file.path().with_extension("missing");
        assert!(EngineConfig::from_file(missing).is_err());
    }

    #[test]
    fn test_fixed_period_uses_offset() {
        use chrono::{TimeZone, Utc};
        let config = EngineConfig::default().with_utc_offset_secs(1800);
        let period = config.fixed_period(Duration::hours(1)).unwrap();
        let t = Utc.timestamp_opt(4000, 0).unwrap();
        assert_eq!(period.align(t), Utc.timestamp_opt(1800, 0).unwrap());
        assert!(config.fixed_period(Duration::zero()).is_err());
    }

    #[test]
    fn test_init_tracing_twice() {
        let config = EngineConfig::default();
        config.init_tracing();
        config.init_tracing();
    }
}
