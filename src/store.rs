//! Forecast persistence - CSV tables in long and pivoted layouts
//!
//! File names encode the model kind and the first period of the horizon:
//! - `daily_forecast_<kind>_<YYYYMMDD>.csv` (one row per series and date)
//! - `daily_forecast_pivot_<kind>_<YYYYMMDD>.csv` (one row per date)
//! - `monthly_forecast_<kind>_<YYYYMM>.csv`
//! - `yearly_forecast_<kind>_<YYYY>.csv`

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ForecastError, Result};
use crate::forecast::{DailyForecast, MonthlyForecast, MonthlyForecastRow, Prediction, YearMonth, YearlyForecast, YearlyForecastRow};
use crate::ml::ModelKind;

/// One row of the long daily layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LongRecord {
    #[serde(rename = "Drug")]
    drug: String,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Predicted_Sales")]
    predicted_sales: f64,
}

impl From<&Prediction> for LongRecord {
    fn from(p: &Prediction) -> Self {
        Self {
            drug: p.series_id.clone(),
            date: p.date,
            predicted_sales: p.value,
        }
    }
}

impl From<LongRecord> for Prediction {
    fn from(r: LongRecord) -> Self {
        Self {
            date: r.date,
            series_id: r.drug,
            value: r.predicted_sales,
        }
    }
}

/// Daily predictions with one column per series.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub series: Vec<String>,
    pub rows: Vec<PivotRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub date: NaiveDate,
    /// Aligned with [`PivotTable::series`]
    pub values: Vec<f64>,
}

impl PivotTable {
    /// Pivot the series that produced predictions, in configured order.
    pub fn from_daily(forecast: &DailyForecast) -> Self {
        let series: Vec<String> = forecast.forecast_series().into_iter().map(str::to_string).collect();

        let mut dates: Vec<NaiveDate> = forecast.predictions.iter().map(|p| p.date).collect();
        dates.sort();
        dates.dedup();

        let rows = dates
            .into_iter()
            .map(|date| PivotRow {
                date,
                values: series
                    .iter()
                    .map(|s| {
                        forecast
                            .predictions
                            .iter()
                            .find(|p| p.date == date && &p.series_id == s)
                            .map_or(0.0, |p| p.value)
                    })
                    .collect(),
            })
            .collect();

        Self { series, rows }
    }

    pub fn value(&self, date: NaiveDate, series_id: &str) -> Option<f64> {
        let column = self.series.iter().position(|s| s == series_id)?;
        self.rows
            .iter()
            .find(|r| r.date == date)
            .and_then(|r| r.values.get(column).copied())
    }
}

/// Reads and writes forecast tables under one output directory.
#[derive(Debug, Clone)]
pub struct ForecastStore {
    output_dir: PathBuf,
    kind: ModelKind,
}

impl ForecastStore {
    pub fn new(output_dir: impl Into<PathBuf>, kind: ModelKind) -> Self {
        Self {
            output_dir: output_dir.into(),
            kind,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    // ==================== File Names ====================

    pub fn daily_path(&self, start: NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("daily_forecast_{}_{}.csv", self.kind, start.format("%Y%m%d")))
    }

    pub fn pivot_path(&self, start: NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("daily_forecast_pivot_{}_{}.csv", self.kind, start.format("%Y%m%d")))
    }

    pub fn monthly_path(&self, start: YearMonth) -> PathBuf {
        self.output_dir.join(format!(
            "monthly_forecast_{}_{:04}{:02}.csv",
            self.kind,
            start.year(),
            start.month()
        ))
    }

    pub fn yearly_path(&self, start_year: i32) -> PathBuf {
        self.output_dir
            .join(format!("yearly_forecast_{}_{:04}.csv", self.kind, start_year))
    }

    // ==================== Writers ====================

    /// Write the long daily layout.
    pub fn save_daily(&self, forecast: &DailyForecast) -> Result<PathBuf> {
        let path = self.daily_path(forecast.start);
        let mut wtr = self.writer(&path)?;
        for prediction in &forecast.predictions {
            wtr.serialize(LongRecord::from(prediction))?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = forecast.predictions.len(), "Daily forecast saved");
        Ok(path)
    }

    /// Write the pivoted daily layout.
    pub fn save_pivot(&self, forecast: &DailyForecast) -> Result<PathBuf> {
        let path = self.pivot_path(forecast.start);
        let table = PivotTable::from_daily(forecast);

        let mut wtr = self.writer(&path)?;
        wtr.write_record(std::iter::once("Date").chain(table.series.iter().map(String::as_str)))?;
        for row in &table.rows {
            let mut record = vec![row.date.format("%Y-%m-%d").to_string()];
            record.extend(row.values.iter().map(f64::to_string));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = table.rows.len(), "Daily pivot saved");
        Ok(path)
    }

    pub fn save_monthly(&self, forecast: &MonthlyForecast) -> Result<PathBuf> {
        let path = self.monthly_path(forecast.start);

        let mut wtr = self.writer(&path)?;
        wtr.write_record(
            ["Year", "Month", "Month_Label"]
                .into_iter()
                .chain(forecast.series.iter().map(String::as_str)),
        )?;
        for row in &forecast.rows {
            let mut record = vec![row.year().to_string(), row.month().to_string(), row.label()];
            record.extend(
                forecast
                    .series
                    .iter()
                    .map(|s| row.total(s).unwrap_or(0.0).to_string()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = forecast.rows.len(), "Monthly forecast saved");
        Ok(path)
    }

    pub fn save_yearly(&self, forecast: &YearlyForecast) -> Result<PathBuf> {
        let path = self.yearly_path(forecast.start_year);

        let mut wtr = self.writer(&path)?;
        wtr.write_record(std::iter::once("Year").chain(forecast.series.iter().map(String::as_str)))?;
        for row in &forecast.rows {
            let mut record = vec![row.year.to_string()];
            record.extend(
                forecast
                    .series
                    .iter()
                    .map(|s| row.total(s).unwrap_or(0.0).to_string()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = forecast.rows.len(), "Yearly forecast saved");
        Ok(path)
    }

    fn writer(&self, path: &Path) -> Result<csv::Writer<fs::File>> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(csv::Writer::from_path(path)?)
    }

    // ==================== Readers ====================

    pub fn load_daily(path: &Path) -> Result<Vec<Prediction>> {
        let mut rdr = csv::Reader::from_path(path)?;
        rdr.deserialize::<LongRecord>()
            .map(|r| r.map(Prediction::from).map_err(ForecastError::from))
            .collect()
    }

    pub fn load_pivot(path: &Path) -> Result<PivotTable> {
        let mut rdr = csv::Reader::from_path(path)?;
        let series = value_columns(rdr.headers()?, 1);

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            rows.push(PivotRow {
                date: parse_cell::<NaiveDate>(&record, 0, i)?,
                values: parse_values(&record, 1, i)?,
            });
        }
        Ok(PivotTable { series, rows })
    }

    pub fn load_monthly(path: &Path) -> Result<Vec<MonthlyForecastRow>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let series = value_columns(rdr.headers()?, 3);

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let period = YearMonth::new(parse_cell(&record, 0, i)?, parse_cell(&record, 1, i)?)?;
            let values = parse_values(&record, 3, i)?;
            rows.push(MonthlyForecastRow {
                period,
                totals: series.iter().cloned().zip(values).collect(),
            });
        }
        Ok(rows)
    }

    pub fn load_yearly(path: &Path) -> Result<Vec<YearlyForecastRow>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let series = value_columns(rdr.headers()?, 1);

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let year = parse_cell(&record, 0, i)?;
            let values = parse_values(&record, 1, i)?;
            rows.push(YearlyForecastRow {
                year,
                totals: series.iter().cloned().zip(values).collect(),
            });
        }
        Ok(rows)
    }
}

fn value_columns(headers: &csv::StringRecord, skip: usize) -> Vec<String> {
    headers.iter().skip(skip).map(str::to_string).collect()
}

fn parse_cell<T: std::str::FromStr>(record: &csv::StringRecord, column: usize, row: usize) -> Result<T> {
    let cell = record.get(column).unwrap_or("");
    cell.trim()
        .parse()
        .map_err(|_| ForecastError::Data(format!("bad value {cell:?} in row {} column {column}", row + 1)))
}

fn parse_values(record: &csv::StringRecord, skip: usize, row: usize) -> Result<Vec<f64>> {
    (skip..record.len()).map(|c| parse_cell(record, c, row)).collect()
}
