//! Yearly totals: the monthly forecast from January of the first year,
//! grouped by calendar year.

use chrono::Datelike;
use tracing::info;

use super::monthly::{MonthlyAggregator, MonthlyForecast, YearMonth};
use super::{ForecastEngine, MAX_FORECAST_YEARS, SeriesSkip, validate_horizon};
use crate::error::{ForecastError, Result};
use crate::traits::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct YearlyForecastRow {
    pub year: i32,
    pub totals: Vec<(String, f64)>,
}

impl YearlyForecastRow {
    pub fn total(&self, series_id: &str) -> Option<f64> {
        self.totals.iter().find(|(s, _)| s == series_id).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearlyForecast {
    pub start_year: i32,
    pub series: Vec<String>,
    pub rows: Vec<YearlyForecastRow>,
    pub skipped: Vec<SeriesSkip>,
}

/// Next year from October onwards, otherwise the current year.
pub fn default_start_year(clock: &dyn Clock) -> i32 {
    let today = clock.today();
    if today.month() >= 10 { today.year() + 1 } else { today.year() }
}

/// Sum monthly rows into one row per year in `start_year..start_year + num_years`.
pub fn yearly_from_monthly(start_year: i32, num_years: usize, monthly: MonthlyForecast) -> YearlyForecast {
    let rows = (start_year..=i32::MAX)
        .take(num_years)
        .map(|year| {
            let totals = monthly
                .series
                .iter()
                .map(|s| {
                    let total = monthly
                        .rows
                        .iter()
                        .filter(|row| row.year() == year)
                        .filter_map(|row| row.total(s))
                        .sum::<f64>();
                    (s.clone(), total)
                })
                .collect();
            YearlyForecastRow { year, totals }
        })
        .collect();

    YearlyForecast {
        start_year,
        series: monthly.series,
        rows,
        skipped: monthly.skipped,
    }
}

/// January of `start_year` and the number of months covering `num_years`.
pub(crate) fn yearly_window(start_year: i32, num_years: usize) -> Result<(YearMonth, usize)> {
    validate_horizon("number of years", num_years, MAX_FORECAST_YEARS)?;
    let num_months = num_years
        .checked_mul(12)
        .ok_or_else(|| ForecastError::InvalidHorizon(format!("{num_years} years is too long")))?;
    Ok((YearMonth::new(start_year, 1)?, num_months))
}

pub struct YearlyAggregator<'a> {
    engine: &'a ForecastEngine,
}

impl<'a> YearlyAggregator<'a> {
    pub fn new(engine: &'a ForecastEngine) -> Self {
        Self { engine }
    }

    pub fn forecast_yearly(&self, start_year: i32, num_years: usize) -> Result<YearlyForecast> {
        let (start, num_months) = yearly_window(start_year, num_years)?;
        info!(start_year, years = num_years, "Forecasting yearly totals");

        let monthly = MonthlyAggregator::new(self.engine).forecast_monthly(start, num_months)?;
        Ok(yearly_from_monthly(start_year, num_years, monthly))
    }
}
