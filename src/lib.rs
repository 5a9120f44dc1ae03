//! Drug Sales Forecast Library
//!
//! Recursive daily sales forecasting per drug series, with monthly and
//! yearly totals built on top. Exposed for the CLI and for testing.

pub mod config;
pub mod data;
pub mod error;
pub mod forecast;
pub mod ml;
pub mod runner;
pub mod store;
pub mod traits;
pub mod weather;
pub mod weather_api;

// Re-export commonly used types
pub use config::AppConfig;
pub use data::{SalesHistory, SeriesHistory};
pub use error::{ForecastError, Result};
pub use forecast::{
    DailyForecast,
    EngineConfig,
    ForecastEngine,
    MAX_FORECAST_DAYS,
    MAX_FORECAST_MONTHS,
    MAX_FORECAST_YEARS,
    MonthlyAggregator,
    MonthlyForecast,
    MonthlyForecastRow,
    Prediction,
    SeriesSkip,
    YearMonth,
    YearlyAggregator,
    YearlyForecast,
    YearlyForecastRow,
    // Default start points
    default_daily_start,
    yearly::default_start_year,
};
pub use ml::{FeatureSchema, FeatureVector, ModelKind, ModelRegistry, PersistedModel, TrainedModel};
pub use runner::{ForecastRunner, RunProgress, RunnerConfig};
pub use store::{ForecastStore, PivotTable};
pub use traits::{Clock, MockClock, MockPredictor, Predictor, SystemClock};
pub use weather::{WeatherHistory, WeatherResolver};
pub use weather_api::{WeatherApiClient, classify_summary};
