//! Recursive daily forecasting for a single series.
//!
//! Each day's lag and rolling-mean inputs come either from real history or
//! from predictions made earlier in the same call, so days are evaluated
//! strictly in order.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};

use super::Prediction;
use crate::data::SeriesHistory;
use crate::error::{ForecastError, Result};
use crate::ml::{FeatureRow, FeatureSchema, LagFeatures};
use crate::traits::Predictor;
use crate::weather::WeatherResolver;

/// Append-only record of the predictions made so far in one horizon call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionBuffer {
    values: Vec<f64>,
}

impl PredictionBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// The prediction made `n` days before the next day (`n >= 1`).
    pub fn back(&self, n: usize) -> Option<f64> {
        if n == 0 {
            return None;
        }
        self.values.len().checked_sub(n).map(|i| self.values[i])
    }

    /// The last `n` predictions, if that many exist.
    pub fn last_n(&self, n: usize) -> Option<&[f64]> {
        self.values.len().checked_sub(n).map(|start| &self.values[start..])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// The most recent actual values of a series, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentActuals {
    values: Vec<f64>,
}

impl RecentActuals {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn from_history(history: &SeriesHistory, window: usize) -> Self {
        Self::new(history.recent_values(window))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The `n`-th most recent value; `n = 1` is the latest.
    pub fn nth_latest(&self, n: usize) -> Option<f64> {
        if n == 0 {
            return None;
        }
        self.values.len().checked_sub(n).map(|i| self.values[i])
    }

    /// The latest `n` values, only if at least `n` exist.
    pub fn tail(&self, n: usize) -> Option<&[f64]> {
        self.values.len().checked_sub(n).map(|start| &self.values[start..])
    }

    pub fn mean(&self) -> Option<f64> {
        mean(&self.values)
    }
}

/// Trailing-year sales averages used to seed a series with no recent actuals.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBaseline {
    overall: f64,
    by_month: HashMap<u32, f64>,
    by_weekday: HashMap<u32, f64>,
}

impl HistoryBaseline {
    /// Days of history, counted back from the last observation.
    pub const WINDOW_DAYS: i64 = 365;
    /// Below this many rows in the window, the full history is used instead.
    pub const MIN_ROWS: usize = 30;

    pub fn from_history(history: &SeriesHistory) -> Self {
        let points = history.points();
        let window: Vec<(NaiveDate, f64)> = match history.last_date() {
            Some(last) => {
                let cutoff = last - Duration::days(Self::WINDOW_DAYS);
                points.iter().copied().filter(|(d, _)| *d >= cutoff).collect()
            }
            None => Vec::new(),
        };
        let rows = if window.len() < Self::MIN_ROWS {
            points
        } else {
            window.as_slice()
        };

        let mut months: HashMap<u32, Vec<f64>> = HashMap::new();
        let mut weekdays: HashMap<u32, Vec<f64>> = HashMap::new();
        for (date, value) in rows {
            months.entry(date.month()).or_default().push(*value);
            weekdays
                .entry(date.weekday().num_days_from_monday())
                .or_default()
                .push(*value);
        }

        let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
        let average = |groups: HashMap<u32, Vec<f64>>| {
            groups
                .into_iter()
                .filter_map(|(key, vals)| mean(&vals).map(|m| (key, m)))
                .collect()
        };

        Self {
            overall: mean(&values).unwrap_or(0.0),
            by_month: average(months),
            by_weekday: average(weekdays),
        }
    }

    pub fn overall(&self) -> f64 {
        self.overall
    }

    /// Midpoint of the target month's and target weekday's averages.
    pub fn seed(&self, date: NaiveDate) -> f64 {
        let month = self.by_month.get(&date.month()).copied().unwrap_or(self.overall);
        let weekday = self
            .by_weekday
            .get(&date.weekday().num_days_from_monday())
            .copied()
            .unwrap_or(self.overall);
        (month + weekday) / 2.0
    }
}

/// Builds the lag and rolling-mean inputs for each day of a horizon.
#[derive(Debug, Clone)]
pub struct LagBuilder {
    actuals: RecentActuals,
    baseline: HistoryBaseline,
    fallback_roll3: f64,
    fallback_roll7: f64,
}

impl LagBuilder {
    pub fn new(actuals: RecentActuals, baseline: HistoryBaseline) -> Self {
        let fallback_roll3 = actuals.tail(3).and_then(mean).unwrap_or(baseline.overall());
        let fallback_roll7 = actuals.mean().unwrap_or(baseline.overall());
        Self {
            actuals,
            baseline,
            fallback_roll3,
            fallback_roll7,
        }
    }

    /// Inputs for the day following the predictions already in `predictions`.
    pub fn features(&self, date: NaiveDate, predictions: &PredictionBuffer) -> LagFeatures {
        let lag1 = self.lag1(date, predictions);
        LagFeatures {
            lag1,
            lag2: self.lag(2, lag1, predictions),
            lag3: self.lag(3, lag1, predictions),
            lag7: self.lag(7, lag1, predictions),
            roll3_mean: self.rolling(3, self.fallback_roll3, predictions),
            roll7_mean: self.rolling(7, self.fallback_roll7, predictions),
        }
    }

    fn lag1(&self, date: NaiveDate, predictions: &PredictionBuffer) -> f64 {
        predictions
            .back(1)
            .or_else(|| self.actuals.nth_latest(1))
            .unwrap_or_else(|| self.baseline.seed(date))
    }

    fn lag(&self, n: usize, lag1: f64, predictions: &PredictionBuffer) -> f64 {
        let day = predictions.len();
        if day >= n {
            predictions.back(n).unwrap_or(lag1)
        } else {
            self.actuals.nth_latest(n - day).unwrap_or(lag1)
        }
    }

    fn rolling(&self, window: usize, fallback: f64, predictions: &PredictionBuffer) -> f64 {
        if let Some(recent) = predictions.last_n(window) {
            return mean(recent).unwrap_or(fallback);
        }

        // Actuals fill the slots before the horizon, all or nothing.
        let mut blend: Vec<f64> = self
            .actuals
            .tail(window - predictions.len())
            .map(<[f64]>::to_vec)
            .unwrap_or_default();
        blend.extend_from_slice(predictions.as_slice());
        mean(&blend).unwrap_or(fallback)
    }
}

/// Runs the recursive loop for one series with one model.
pub(crate) struct DailyForecaster<'a> {
    series_id: &'a str,
    predictor: &'a dyn Predictor,
    schema: FeatureSchema,
    weather: &'a WeatherResolver,
    lags: LagBuilder,
}

impl<'a> DailyForecaster<'a> {
    pub(crate) fn new(
        series_id: &'a str,
        predictor: &'a dyn Predictor,
        schema: FeatureSchema,
        weather: &'a WeatherResolver,
        lags: LagBuilder,
    ) -> Self {
        Self {
            series_id,
            predictor,
            schema,
            weather,
            lags,
        }
    }

    pub(crate) fn run(&self, start: NaiveDate, num_days: usize) -> Result<Vec<Prediction>> {
        let mut buffer = PredictionBuffer::with_capacity(num_days);
        let mut predictions = Vec::with_capacity(num_days);

        for date in start.iter_days().take(num_days) {
            let row = FeatureRow::new(
                date,
                self.weather.resolve(date),
                self.lags.features(date, &buffer),
            );
            let vector = self.schema.assemble(&row);

            let raw = self.predictor.predict(&vector).map_err(|e| match e {
                ForecastError::Model(msg) => ForecastError::Model(format!("{} on {date}: {msg}", self.series_id)),
                other => other,
            })?;
            if !raw.is_finite() {
                return Err(ForecastError::Model(format!(
                    "{} on {date}: model returned {raw}",
                    self.series_id
                )));
            }
            let value = raw.max(0.0);

            buffer.push(value);
            predictions.push(Prediction {
                date,
                series_id: self.series_id.to_string(),
                value,
            });
        }

        Ok(predictions)
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
