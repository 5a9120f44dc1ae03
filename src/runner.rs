//! Concurrent forecasting
//!
//! Series are independent, so [`ForecastRunner`] evaluates them on tokio's
//! blocking pool:
//! - At most `max_concurrent_series` series run at once
//! - A series that exceeds its time budget is reported as skipped
//! - Results are merged in configured series order, so output matches the
//!   sequential aggregators exactly

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{ForecastError, Result};
use crate::forecast::monthly::{SeriesMonthlyTotals, assemble_monthly, series_monthly_totals};
use crate::forecast::yearly::yearly_window;
use crate::forecast::{
    DailyForecast, ForecastEngine, MAX_FORECAST_DAYS, MAX_FORECAST_MONTHS, MonthlyForecast, YearMonth,
    YearlyForecast, collect_daily, validate_horizon, yearly_from_monthly,
};

/// Progress update, sent whenever a series finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    pub series_id: String,
    pub completed: usize,
    pub total: usize,
}

/// Runner limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerConfig {
    pub max_concurrent_series: usize,
    pub series_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for RunnerConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_concurrent_series: config.max_concurrent_series,
            series_timeout: Duration::from_secs(config.series_timeout_secs),
        }
    }
}

/// Runs per-series forecasts in parallel over a shared [`ForecastEngine`].
pub struct ForecastRunner {
    engine: ForecastEngine,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    progress_tx: Option<mpsc::UnboundedSender<RunProgress>>,
}

impl ForecastRunner {
    pub fn new(engine: ForecastEngine, config: RunnerConfig) -> Self {
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_series.max(1))),
            timeout: config.series_timeout,
            progress_tx: None,
        }
    }

    /// Report each finished series on `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<RunProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn engine(&self) -> &ForecastEngine {
        &self.engine
    }

    pub async fn forecast_daily(&self, start: NaiveDate, num_days: usize) -> Result<DailyForecast> {
        validate_horizon("number of days", num_days, MAX_FORECAST_DAYS)?;

        let results = self
            .run_per_series(move |engine, series_id| engine.try_forecast_daily(series_id, start, num_days))
            .await;
        collect_daily(self.engine.series().to_vec(), start, num_days, results)
    }

    pub async fn forecast_monthly(&self, start: YearMonth, num_months: usize) -> Result<MonthlyForecast> {
        validate_horizon("number of months", num_months, MAX_FORECAST_MONTHS)?;
        let periods = start.range(num_months)?;

        let job_periods = periods.clone();
        let results = self
            .run_per_series(move |engine, series_id| series_monthly_totals(engine, series_id, &job_periods))
            .await;

        let mut per_series = Vec::with_capacity(results.len());
        for (series_id, result) in results {
            match result {
                Ok(totals) => per_series.push(totals),
                Err(e) if e.is_series_skip() => {
                    warn!(series = %series_id, error = %e, "Series contributes zero");
                    per_series.push(SeriesMonthlyTotals::skipped(&series_id, num_months, &e));
                }
                Err(e) => return Err(e),
            }
        }

        assemble_monthly(self.engine.series().to_vec(), &periods, per_series)
    }

    pub async fn forecast_yearly(&self, start_year: i32, num_years: usize) -> Result<YearlyForecast> {
        let (start, num_months) = yearly_window(start_year, num_years)?;
        let monthly = self.forecast_monthly(start, num_months).await?;
        Ok(yearly_from_monthly(start_year, num_years, monthly))
    }

    /// Run `job` once per configured series; results come back in series order.
    ///
    /// A timed-out job keeps running on the blocking pool (and keeps its
    /// permit) until it finishes; only its result is discarded.
    async fn run_per_series<T, F>(&self, job: F) -> Vec<(String, Result<T>)>
    where
        T: Send + 'static,
        F: Fn(&ForecastEngine, &str) -> Result<T> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let series = self.engine.series().to_vec();
        let total = series.len();
        let mut handles = Vec::with_capacity(total);

        for series_id in series {
            let engine = self.engine.clone();
            let job = Arc::clone(&job);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.timeout;
            let id = series_id.clone();

            let handle = tokio::spawn(async move {
                let permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ForecastError::Model(format!("runner closed: {e}")))?;
                debug!(series = %id, "Series started");

                let worker_id = id.clone();
                let task = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    job(&engine, &worker_id)
                });

                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(ForecastError::Model(format!("worker for {id} failed: {e}"))),
                    Err(_) => Err(ForecastError::Timeout {
                        series: id,
                        secs: timeout.as_secs(),
                    }),
                }
            });
            handles.push((series_id, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (completed, (series_id, handle)) in handles.into_iter().enumerate() {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(ForecastError::Model(format!("worker for {series_id} failed: {e}"))));

            if let Some(tx) = &self.progress_tx {
                let _ = tx.send(RunProgress {
                    series_id: series_id.clone(),
                    completed: completed + 1,
                    total,
                });
            }
            results.push((series_id, result));
        }
        results
    }
}
