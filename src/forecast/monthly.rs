//! Monthly totals built from independent daily runs, one per month.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use tracing::{info, warn};

use super::{ForecastEngine, MAX_FORECAST_MONTHS, SeriesSkip, validate_horizon};
use crate::error::{ForecastError, Result};
use crate::traits::Clock;

/// A calendar month, held as its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    first: NaiveDate,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ForecastError::InvalidHorizon(format!("month {month} is not in 1..=12")));
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| ForecastError::InvalidHorizon(format!("year {year} is out of range")))?;
        Ok(Self { first })
    }

    /// Parse `YYYY-MM`.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || ForecastError::InvalidHorizon(format!("expected YYYY-MM, got {value:?}"));
        let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    /// The next month after mid-month, otherwise the current one.
    pub fn default_start(clock: &dyn Clock) -> Self {
        let today = clock.today();
        let current = Self::from_date(today);
        if today.day() > 15 {
            current.offset(1).unwrap_or(current)
        } else {
            current
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    /// The month `months` after this one, rolling over years.
    pub fn offset(self, months: usize) -> Result<Self> {
        let out_of_range = || ForecastError::InvalidHorizon(format!("{months} months after {self} is out of range"));
        let months = u32::try_from(months).map_err(|_| out_of_range())?;
        let first = self
            .first
            .checked_add_months(Months::new(months))
            .ok_or_else(out_of_range)?;
        Ok(Self { first })
    }

    /// `count` consecutive months starting with this one.
    pub fn range(self, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|i| self.offset(i)).collect()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn days_in_month(&self) -> u32 {
        match self.first.checked_add_months(Months::new(1)) {
            Some(next) => (next - self.first).num_days() as u32,
            // Only December of the last representable year.
            None => 31,
        }
    }

    /// `YYYY-MM`.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Forecast totals of one month, in configured series order.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyForecastRow {
    pub period: YearMonth,
    pub totals: Vec<(String, f64)>,
}

impl MonthlyForecastRow {
    pub fn year(&self) -> i32 {
        self.period.year()
    }

    pub fn month(&self) -> u32 {
        self.period.month()
    }

    pub fn label(&self) -> String {
        self.period.label()
    }

    pub fn total(&self, series_id: &str) -> Option<f64> {
        self.totals.iter().find(|(s, _)| s == series_id).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyForecast {
    pub start: YearMonth,
    pub series: Vec<String>,
    pub rows: Vec<MonthlyForecastRow>,
    pub skipped: Vec<SeriesSkip>,
}

/// Per-month totals for one series.
///
/// A month whose daily run failed counts as zero; `skip` keeps the first
/// such failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMonthlyTotals {
    pub series_id: String,
    pub totals: Vec<f64>,
    pub skip: Option<SeriesSkip>,
}

impl SeriesMonthlyTotals {
    pub(crate) fn skipped(series_id: &str, num_months: usize, error: &ForecastError) -> Self {
        Self {
            series_id: series_id.to_string(),
            totals: vec![0.0; num_months],
            skip: Some(SeriesSkip::new(series_id, error)),
        }
    }
}

/// Sum each month's daily forecast for one series.
///
/// Every month restarts from the real recent history, so months do not feed
/// predictions into each other. A failed month contributes zero and the
/// remaining months still run. A missing model or sales column fails every
/// month the same way, so the series is zeroed at once.
pub fn series_monthly_totals(
    engine: &ForecastEngine,
    series_id: &str,
    periods: &[YearMonth],
) -> Result<SeriesMonthlyTotals> {
    validate_horizon("number of months", periods.len(), MAX_FORECAST_MONTHS)?;

    let mut totals = Vec::with_capacity(periods.len());
    let mut skip = None;
    for period in periods {
        let days = period.days_in_month() as usize;
        match engine.try_forecast_daily(series_id, period.first_day(), days) {
            Ok(predictions) => totals.push(predictions.iter().map(|p| p.value).sum::<f64>()),
            Err(
                e @ (ForecastError::MissingModel { .. }
                | ForecastError::MissingSeries(_)
                | ForecastError::FeatureMismatch { .. }),
            ) => {
                warn!(series = %series_id, error = %e, "Series contributes zero");
                return Ok(SeriesMonthlyTotals::skipped(series_id, periods.len(), &e));
            }
            Err(e) if e.is_series_skip() => {
                warn!(series = %series_id, %period, error = %e, "Month contributes zero");
                skip.get_or_insert_with(|| SeriesSkip::new(series_id, &e));
                totals.push(0.0);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(SeriesMonthlyTotals {
        series_id: series_id.to_string(),
        totals,
        skip,
    })
}

/// Pivot per-series totals into one row per month.
pub fn assemble_monthly(
    series: Vec<String>,
    periods: &[YearMonth],
    per_series: Vec<SeriesMonthlyTotals>,
) -> Result<MonthlyForecast> {
    let start = *periods
        .first()
        .ok_or_else(|| ForecastError::InvalidHorizon("number of months must be at least 1".to_string()))?;

    let rows = periods
        .iter()
        .enumerate()
        .map(|(i, period)| MonthlyForecastRow {
            period: *period,
            totals: series
                .iter()
                .map(|s| {
                    let total = per_series
                        .iter()
                        .find(|t| &t.series_id == s)
                        .and_then(|t| t.totals.get(i).copied())
                        .unwrap_or(0.0);
                    (s.clone(), total)
                })
                .collect(),
        })
        .collect();

    let skipped = per_series.into_iter().filter_map(|t| t.skip).collect();

    Ok(MonthlyForecast {
        start,
        series,
        rows,
        skipped,
    })
}

/// Monthly totals for every configured series.
pub struct MonthlyAggregator<'a> {
    engine: &'a ForecastEngine,
}

impl<'a> MonthlyAggregator<'a> {
    pub fn new(engine: &'a ForecastEngine) -> Self {
        Self { engine }
    }

    pub fn forecast_monthly(&self, start: YearMonth, num_months: usize) -> Result<MonthlyForecast> {
        validate_horizon("number of months", num_months, MAX_FORECAST_MONTHS)?;
        let periods = start.range(num_months)?;
        info!(%start, months = num_months, "Forecasting monthly totals");

        let per_series = self
            .engine
            .series()
            .iter()
            .map(|s| series_monthly_totals(self.engine, s, &periods))
            .collect::<Result<Vec<_>>>()?;

        assemble_monthly(self.engine.series().to_vec(), &periods, per_series)
    }
}
