//! Error types for the forecasting engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for forecasting operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors raised while loading inputs or producing forecasts.
///
/// Some variants only ever affect a single series (see
/// [`ForecastError::is_series_skip`]); the aggregators turn those into a zero
/// contribution instead of aborting the run.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// No trained artifact exists for the series.
    #[error("no trained model for series {series} at {}", path.display())]
    MissingModel { series: String, path: PathBuf },

    /// The model's expected inputs cannot be produced by the feature recipe.
    #[error("feature mismatch for series {series}: model expects {expected} inputs, recipe produces {got}")]
    FeatureMismatch {
        series: String,
        expected: usize,
        got: usize,
    },

    /// The model failed to evaluate or its artifact is unusable.
    #[error("model error: {0}")]
    Model(String),

    /// The series has no column in the sales history.
    #[error("series {0} not present in sales history")]
    MissingSeries(String),

    /// The per-series computation exceeded its time budget.
    #[error("forecast for series {series} timed out after {secs}s")]
    Timeout { series: String, secs: u64 },

    /// Horizon parameters are unusable (zero length, malformed month, ...).
    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),

    /// Sales history is malformed.
    #[error("data error: {0}")]
    Data(String),

    /// A date cell in the primary series could not be parsed.
    #[error("unparsable date {value:?} on row {row}")]
    DateParse { value: String, row: usize },

    /// Weather refresh failed.
    #[error("weather error: {0}")]
    Weather(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ForecastError {
    /// Whether this error only removes one series from a horizon call.
    pub fn is_series_skip(&self) -> bool {
        matches!(
            self,
            ForecastError::MissingModel { .. }
                | ForecastError::FeatureMismatch { .. }
                | ForecastError::Model(_)
                | ForecastError::MissingSeries(_)
                | ForecastError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_descriptive() {
        let err = ForecastError::MissingModel {
            series: "N02BE".to_string(),
            path: PathBuf::from("saved_models/rf_model_N02BE.json"),
        };
        assert_eq!(
            err.to_string(),
            "no trained model for series N02BE at saved_models/rf_model_N02BE.json"
        );

        let err = ForecastError::FeatureMismatch {
            series: "R03".to_string(),
            expected: 19,
            got: 17,
        };
        assert_eq!(
            err.to_string(),
            "feature mismatch for series R03: model expects 19 inputs, recipe produces 17"
        );

        let err = ForecastError::DateParse {
            value: "31/31/2020".to_string(),
            row: 4,
        };
        assert_eq!(err.to_string(), "unparsable date \"31/31/2020\" on row 4");
    }

    #[test]
    fn test_series_skip_classification() {
        assert!(ForecastError::Model("nan".to_string()).is_series_skip());
        assert!(ForecastError::MissingSeries("R06".to_string()).is_series_skip());
        assert!(
            ForecastError::Timeout {
                series: "R06".to_string(),
                secs: 5
            }
            .is_series_skip()
        );

        assert!(!ForecastError::InvalidHorizon("zero days".to_string()).is_series_skip());
        assert!(!ForecastError::Data("negative value".to_string()).is_series_skip());
    }
}
