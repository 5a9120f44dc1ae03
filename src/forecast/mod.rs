//! Multi-horizon forecasting
//!
//! [`ForecastEngine`] owns the inputs of a run (sales history, weather,
//! models) and produces recursive daily predictions per series. The monthly
//! and yearly aggregators are built on top of it.

pub mod daily;
pub mod monthly;
pub mod yearly;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{SalesHistory, SeriesHistory};
use crate::error::{ForecastError, Result};
use crate::ml::features::WEEKDAYS;
use crate::ml::{FeatureSchema, ModelKind, ModelRegistry};
use crate::traits::{Clock, Predictor};
use crate::weather::{WeatherHistory, WeatherResolver};

pub use daily::{HistoryBaseline, LagBuilder, PredictionBuffer, RecentActuals};
pub use monthly::{MonthlyAggregator, MonthlyForecast, MonthlyForecastRow, SeriesMonthlyTotals, YearMonth};
pub use yearly::{YearlyAggregator, YearlyForecast, YearlyForecastRow, yearly_from_monthly};

use daily::DailyForecaster;

/// Series forecast by default, in output column order.
pub const DEFAULT_SERIES: [&str; 8] = ["M01AB", "M01AE", "N02BA", "N02BE", "N05B", "N05C", "R03", "R06"];

/// Number of most recent actuals that seed the lag features.
pub const DEFAULT_RECENT_WINDOW: usize = 7;

/// Longest daily horizon accepted in one call (about a century).
pub const MAX_FORECAST_DAYS: usize = 36_600;

/// Longest monthly horizon accepted in one call.
pub const MAX_FORECAST_MONTHS: usize = 1_200;

/// Longest yearly horizon accepted in one call.
pub const MAX_FORECAST_YEARS: usize = MAX_FORECAST_MONTHS / 12;

/// One forecast value for one series on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub date: NaiveDate,
    pub series_id: String,
    pub value: f64,
}

/// A series that produced no forecast, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSkip {
    pub series_id: String,
    pub reason: String,
}

impl SeriesSkip {
    pub fn new(series_id: impl Into<String>, error: &ForecastError) -> Self {
        Self {
            series_id: series_id.into(),
            reason: error.to_string(),
        }
    }
}

/// Daily predictions for every configured series over one horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyForecast {
    pub start: NaiveDate,
    pub num_days: usize,
    /// Configured series, in output order (skipped ones included).
    pub series: Vec<String>,
    /// Grouped by series, chronological within each series.
    pub predictions: Vec<Prediction>,
    pub skipped: Vec<SeriesSkip>,
}

impl DailyForecast {
    pub fn for_series<'a>(&'a self, series_id: &'a str) -> impl Iterator<Item = &'a Prediction> + 'a {
        self.predictions.iter().filter(move |p| p.series_id == series_id)
    }

    /// Series with at least one prediction, in configured order.
    pub fn forecast_series(&self) -> Vec<&str> {
        self.series
            .iter()
            .filter(|s| self.predictions.iter().any(|p| &p.series_id == *s))
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub series: Vec<String>,
    pub model_kind: ModelKind,
    pub recent_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            series: DEFAULT_SERIES.iter().map(|s| s.to_string()).collect(),
            model_kind: ModelKind::default(),
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }
}

struct EngineState {
    config: EngineConfig,
    sales: SalesHistory,
    weather: WeatherResolver,
    models: ModelRegistry,
}

/// Read-only forecasting context shared by every horizon call.
///
/// Cloning is cheap; clones share the same inputs, so one engine can be
/// handed to blocking worker tasks.
#[derive(Clone)]
pub struct ForecastEngine {
    inner: Arc<EngineState>,
}

impl ForecastEngine {
    pub fn new(config: EngineConfig, sales: SalesHistory, weather: &WeatherHistory, models: ModelRegistry) -> Self {
        info!(
            series = config.series.len(),
            models = models.len(),
            weather_rows = weather.len(),
            kind = %config.model_kind,
            "Forecast engine ready"
        );
        Self {
            inner: Arc::new(EngineState {
                weather: WeatherResolver::new(weather),
                config,
                sales,
                models,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn series(&self) -> &[String] {
        &self.inner.config.series
    }

    pub fn sales(&self) -> &SalesHistory {
        &self.inner.sales
    }

    pub fn weather(&self) -> &WeatherResolver {
        &self.inner.weather
    }

    /// Daily predictions for one series, reporting per-series failures as errors.
    pub fn try_forecast_daily(&self, series_id: &str, start: NaiveDate, num_days: usize) -> Result<Vec<Prediction>> {
        validate_horizon("number of days", num_days, MAX_FORECAST_DAYS)?;

        let predictor = self.inner.models.get(series_id)?;
        let history = self
            .inner
            .sales
            .series(series_id)
            .ok_or_else(|| ForecastError::MissingSeries(series_id.to_string()))?;
        let schema = schema_for(series_id, history, predictor.as_ref())?;

        let lags = LagBuilder::new(
            RecentActuals::from_history(history, self.inner.config.recent_window),
            HistoryBaseline::from_history(history),
        );
        DailyForecaster::new(series_id, predictor.as_ref(), schema, &self.inner.weather, lags).run(start, num_days)
    }

    /// Daily predictions for one series; a skipped series yields no rows.
    pub fn forecast_daily(&self, series_id: &str, start: NaiveDate, num_days: usize) -> Result<Vec<Prediction>> {
        match self.try_forecast_daily(series_id, start, num_days) {
            Err(e) if e.is_series_skip() => {
                warn!(series = %series_id, %start, error = %e, "Skipping series");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Daily predictions for every configured series.
    pub fn forecast_daily_all(&self, start: NaiveDate, num_days: usize) -> Result<DailyForecast> {
        validate_horizon("number of days", num_days, MAX_FORECAST_DAYS)?;

        let results = self
            .series()
            .iter()
            .map(|series_id| (series_id.clone(), self.try_forecast_daily(series_id, start, num_days)))
            .collect();
        collect_daily(self.series().to_vec(), start, num_days, results)
    }
}

/// Merge per-series outcomes into one table, keeping configured order.
pub(crate) fn collect_daily(
    series: Vec<String>,
    start: NaiveDate,
    num_days: usize,
    results: Vec<(String, Result<Vec<Prediction>>)>,
) -> Result<DailyForecast> {
    let rows = results.iter().map(|(_, r)| r.as_ref().map_or(0, Vec::len)).sum::<usize>();
    let mut predictions = Vec::with_capacity(rows);
    let mut skipped = Vec::new();

    for (series_id, result) in results {
        match result {
            Ok(rows) => predictions.extend(rows),
            Err(e) if e.is_series_skip() => {
                warn!(series = %series_id, %start, error = %e, "Skipping series");
                skipped.push(SeriesSkip::new(series_id, &e));
            }
            Err(e) => return Err(e),
        }
    }

    debug!(rows = predictions.len(), skipped = skipped.len(), "Daily forecast collected");
    Ok(DailyForecast {
        start,
        num_days,
        series,
        predictions,
        skipped,
    })
}

/// Input layout for a series: the model's declared names, or the default recipe.
fn schema_for(series_id: &str, history: &SeriesHistory, predictor: &dyn Predictor) -> Result<FeatureSchema> {
    if let Some(names) = predictor.expected_feature_names() {
        let schema = FeatureSchema::from_names(series_id, names);
        let absent = schema.absent_names();
        if !absent.is_empty() {
            debug!(series = %series_id, ?absent, "Model expects inputs with no known source, filled with 0");
        }
        return Ok(schema);
    }

    let mut weekdays: HashSet<Weekday> = history.points().iter().map(|(d, _)| d.weekday()).collect();
    if weekdays.is_empty() {
        weekdays.extend(WEEKDAYS);
    }
    let schema = FeatureSchema::recipe(series_id, &weekdays);
    match predictor.input_width() {
        Some(expected) if expected != schema.len() => Err(ForecastError::FeatureMismatch {
            series: series_id.to_string(),
            expected,
            got: schema.len(),
        }),
        _ => Ok(schema),
    }
}

pub(crate) fn validate_horizon(what: &str, n: usize, max: usize) -> Result<()> {
    if n == 0 {
        return Err(ForecastError::InvalidHorizon(format!("{what} must be at least 1")));
    }
    if n > max {
        return Err(ForecastError::InvalidHorizon(format!("{what} must be at most {max}, got {n}")));
    }
    Ok(())
}

/// Today, the default first day of a daily horizon.
pub fn default_daily_start(clock: &dyn Clock) -> NaiveDate {
    clock.today()
}
